use thiserror::Error;

/// Shorthand for results carrying a [`ZError`].
pub type ZResult<T> = Result<T, ZError>;

/// Everything that can go fatally wrong while loading or running a story.
///
/// Every error here ends the current run; no opcode handler recovers from
/// any of them.
#[derive(Debug, Error)]
pub enum ZError {
    #[error("story load failed: {0}")]
    LoadFailure(String),

    #[error("story version {0} is not in the supported range 1-8")]
    UnknownVersion(u8),

    #[error("no handler for opcode {opcode:#04x} in version {version}")]
    UnknownOpcode { opcode: u8, version: u8 },

    #[error("malformed instruction at {addr:#07x}: {reason}")]
    MalformedInstruction { addr: u32, reason: &'static str },

    #[error("malformed encoded string: {0}")]
    MalformedZString(&'static str),

    #[error("write into read-only memory at {0:#07x}")]
    WriteViolation(u32),

    #[error("memory access out of bounds at {0:#07x}")]
    OutOfBounds(u32),

    #[error("evaluation stack underflow")]
    StackUnderflow,

    #[error("local variable {0} out of range for the current routine")]
    BadLocal(u8),

    #[error("object {0} has no property {1}")]
    PropertyMissing(u16, u8),

    #[error("division by zero")]
    DivisionByZero,
}
