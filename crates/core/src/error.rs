//! Error types.
//!
//! Only fatal conditions are errors. Wiring problems, unknown pin names and
//! unacknowledged I2C addresses are logged and otherwise ignored.

use thiserror::Error;

/// Intel HEX parse failure. Line numbers are 1-based.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("line {line}: record does not start with ':'")]
    InvalidStart { line: usize },
    #[error("line {line}: invalid hex digit")]
    InvalidDigit { line: usize },
    #[error("line {line}: record shorter than its byte count")]
    Truncated { line: usize },
    #[error("line {line}: checksum mismatch (expected {expected:#04x}, got {actual:#04x})")]
    Checksum { line: usize, expected: u8, actual: u8 },
    #[error("line {line}: address {address:#06x} beyond program memory")]
    OutOfRange { line: usize, address: usize },
}

#[derive(Debug, Error)]
pub enum DesignError {
    #[error("design has no microcontroller component")]
    NoMicrocontroller,
    #[error("microcontroller '{0}' has no firmware")]
    MissingFirmware(String),
    #[error("firmware for '{0}' is source text but no compiler was supplied")]
    NoCompiler(String),
    #[error("invalid design JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("illegal instruction {opcode:#06x} at word address {pc:#06x}")]
    IllegalInstruction { pc: u16, opcode: u16 },
    #[error("program counter {pc:#06x} outside flash")]
    PcOutOfRange { pc: u32 },
    #[error("compilation failed: {0}")]
    Compile(String),
    #[error(transparent)]
    Hex(#[from] HexError),
    #[error(transparent)]
    Design(#[from] DesignError),
    #[error("save state: {0}")]
    SaveState(String),
    #[error("simulation is not running")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, SimError>;
