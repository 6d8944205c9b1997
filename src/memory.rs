use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{ZError, ZResult};
use crate::header::{self, Header};

/// The story image: one contiguous byte buffer plus the parsed header.
///
/// Until the interpreter has finished patching its own header fields the
/// image is unsealed and writes land anywhere in bounds. Sealing turns on
/// the dynamic-memory boundary: opcode stores at or above the static-memory
/// base fail with `WriteViolation`.
pub struct Memory {
    bytes: Vec<u8>,
    pub header: Header,
    sealed: bool,
}

impl Memory {
    /// Load a story file from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ZResult<Memory> {
        let bytes = fs::read(path.as_ref())
            .map_err(|e| ZError::LoadFailure(format!("{}: {e}", path.as_ref().display())))?;
        Memory::from_bytes(bytes)
    }

    /// Build a story image from raw bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> ZResult<Memory> {
        if bytes.len() < 64 {
            return Err(ZError::LoadFailure(format!(
                "story file is {} bytes, shorter than the 64-byte header",
                bytes.len()
            )));
        }
        let header = Header::parse(&bytes)?;
        Ok(Memory {
            bytes,
            header,
            sealed: false,
        })
    }

    /// End the initialization window. Subsequent writes are held to the
    /// dynamic-memory boundary.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn version(&self) -> u8 {
        self.header.version
    }

    pub fn initial_pc(&self) -> u32 {
        self.header.initial_pc as u32
    }

    pub fn globals_addr(&self) -> u32 {
        self.header.global_variables as u32
    }

    pub fn abbreviations_addr(&self) -> u32 {
        self.header.abbrev_table as u32
    }

    pub fn objects_addr(&self) -> u32 {
        self.header.object_table as u32
    }

    pub fn alphabet_addr(&self) -> u32 {
        self.header.alphabet_table as u32
    }

    pub fn static_base(&self) -> u32 {
        self.header.base_static_mem as u32
    }

    pub fn routines_offset(&self) -> u16 {
        self.header.routines_offset
    }

    pub fn strings_offset(&self) -> u16 {
        self.header.strings_offset
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The whole image as a slice (the decoder walks it directly).
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// The image from `addr` to the end of the file.
    pub fn slice_from(&self, addr: u32) -> ZResult<&[u8]> {
        if addr as usize >= self.bytes.len() {
            return Err(ZError::OutOfBounds(addr));
        }
        Ok(&self.bytes[addr as usize..])
    }

    pub fn read_byte(&self, addr: u32) -> ZResult<u8> {
        self.bytes
            .get(addr as usize)
            .copied()
            .ok_or(ZError::OutOfBounds(addr))
    }

    /// Big-endian 16-bit read.
    pub fn read_word(&self, addr: u32) -> ZResult<u16> {
        let high = self.read_byte(addr)?;
        let low = self.read_byte(addr + 1)?;
        Ok(((high as u16) << 8) | low as u16)
    }

    pub fn read_bytes(&self, addr: u32, len: usize) -> ZResult<&[u8]> {
        let start = addr as usize;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ZError::OutOfBounds(addr))?;
        Ok(&self.bytes[start..end])
    }

    fn check_writable(&self, addr: u32) -> ZResult<()> {
        if addr as usize >= self.bytes.len() {
            return Err(ZError::OutOfBounds(addr));
        }
        if self.sealed && addr >= self.static_base() {
            debug!(
                "blocked write at {:#06x} (static memory starts at {:#06x})",
                addr,
                self.static_base()
            );
            return Err(ZError::WriteViolation(addr));
        }
        Ok(())
    }

    pub fn write_byte(&mut self, addr: u32, value: u8) -> ZResult<()> {
        self.check_writable(addr)?;
        self.bytes[addr as usize] = value;
        Ok(())
    }

    /// Big-endian 16-bit write. Both bytes are checked up front so a store
    /// straddling the static boundary leaves memory untouched.
    pub fn write_word(&mut self, addr: u32, value: u16) -> ZResult<()> {
        self.check_writable(addr)?;
        self.check_writable(addr + 1)?;
        self.bytes[addr as usize] = (value >> 8) as u8;
        self.bytes[addr as usize + 1] = (value & 0xff) as u8;
        Ok(())
    }

    /// Write a run of bytes; the whole span must lie in dynamic memory.
    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) -> ZResult<()> {
        if !data.is_empty() {
            self.check_writable(addr)?;
            self.check_writable(addr + data.len() as u32 - 1)?;
        }
        self.bytes[addr as usize..addr as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Unchecked-by-seal write for interpreter-owned header fields.
    fn poke(&mut self, addr: u32, value: u8) -> ZResult<()> {
        if addr as usize >= self.bytes.len() {
            return Err(ZError::OutOfBounds(addr));
        }
        self.bytes[addr as usize] = value;
        Ok(())
    }

    /// Unpack a routine address. v6/7 add eight times the header routine
    /// offset.
    pub fn packed_routine(&self, packed: u16) -> ZResult<u32> {
        match self.header.version {
            1..=3 => Ok(packed as u32 * 2),
            4..=5 => Ok(packed as u32 * 4),
            6..=7 => Ok(packed as u32 * 4 + 8 * self.header.routines_offset as u32),
            8 => Ok(packed as u32 * 8),
            v => Err(ZError::UnknownVersion(v)),
        }
    }

    /// Unpack a string address. v6/7 add eight times the header string
    /// offset.
    pub fn packed_string(&self, packed: u16) -> ZResult<u32> {
        match self.header.version {
            1..=3 => Ok(packed as u32 * 2),
            4..=5 => Ok(packed as u32 * 4),
            6..=7 => Ok(packed as u32 * 4 + 8 * self.header.strings_offset as u32),
            8 => Ok(packed as u32 * 8),
            v => Err(ZError::UnknownVersion(v)),
        }
    }

    pub fn flag1_bit(&self, bit: u8) -> ZResult<bool> {
        Ok(self.read_byte(header::OFF_FLAGS1)? & (1 << bit) != 0)
    }

    /// Flags1 is interpreter-writable at any time.
    pub fn set_flag1_bit(&mut self, bit: u8, on: bool) -> ZResult<()> {
        let flags = self.read_byte(header::OFF_FLAGS1)?;
        let flags = if on {
            flags | (1 << bit)
        } else {
            flags & !(1 << bit)
        };
        self.poke(header::OFF_FLAGS1, flags)
    }

    pub fn flag2_bit(&self, bit: u8) -> ZResult<bool> {
        Ok(self.read_word(header::OFF_FLAGS2)? & (1 << bit) != 0)
    }

    pub fn set_flag2_bit(&mut self, bit: u8, on: bool) -> ZResult<()> {
        let flags = self.read_word(header::OFF_FLAGS2)?;
        let flags = if on {
            flags | (1 << bit)
        } else {
            flags & !(1 << bit)
        };
        self.poke(header::OFF_FLAGS2, (flags >> 8) as u8)?;
        self.poke(header::OFF_FLAGS2 + 1, (flags & 0xff) as u8)
    }

    /// Screen geometry header bytes (v4+ reads them; harmless earlier).
    pub fn set_screen_size(&mut self, height: u8, width: u8) -> ZResult<()> {
        self.poke(header::OFF_SCREEN_HEIGHT, height)?;
        self.poke(header::OFF_SCREEN_WIDTH, width)
    }
}
