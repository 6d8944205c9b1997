#![crate_name = "lantern"]

//! A Z-Machine interpreter core: story memory with its ROM/dynamic split,
//! the ZString codec, the object tree, the four-form instruction decoder,
//! and the opcode dispatch loop, for story versions 1 through 8 (fully
//! exercised on 1-5). The terminal and the entropy source are injected
//! collaborators; see [`screen::Screen`] and [`zrand::ZRand`].

pub mod error;
pub mod header;
pub mod instruction;
pub mod interpreter;
pub mod memory;
pub mod opcode_tables;
pub mod screen;
pub mod text;
pub mod vm;
pub mod zobject;
pub mod zrand;

#[cfg(test)]
mod test_utils;
