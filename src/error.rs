//! Error types for the mibbus stack
//!
//! The taxonomy separates link-level failures (connection, IO, timeout),
//! frame-level failures (checksum, framing, device exceptions) and
//! logic-level failures (decoding, write capability, unknown names).
//! Link and frame errors are retried by the transaction manager; logic
//! errors are surfaced immediately and never retried.

use thiserror::Error;

/// Result type for mibbus operations
pub type Result<T> = std::result::Result<T, ModbusError>;

/// Frame-level errors: the received bytes could not be turned into a valid
/// response ADU, or the device rejected the request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame shorter than the minimum for its transport
    #[error("Frame truncated")]
    Truncated,

    /// CRC16/LRC over the frame body does not match the trailing checksum
    #[error("Checksum mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// TCP MBAP protocol identifier was not zero
    #[error("Protocol id mismatch: expected 0, got {0}")]
    ProtocolIdMismatch(u16),

    /// TCP MBAP length field disagrees with the actual byte count
    #[error("Length mismatch: header declares {declared} bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// ASCII start/end markers absent
    #[error("Framing error: missing start or end marker")]
    FramingError,

    /// Non-hex characters inside an ASCII frame body
    #[error("Hex decode error: {0}")]
    HexDecode(String),

    /// Device answered with an exception PDU (function code | 0x80)
    #[error("Exception response for FC{function:02X}: {} (code 0x{code:02X})", exception_description(*.code))]
    ExceptionResponse { function: u8, code: u8 },
}

/// Decode-pipeline errors: the response bytes were valid, interpreting them
/// under the entry's decode rule failed. Never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Word count does not match the rule's requirement
    #[error("Word count mismatch: rule requires {expected}, got {actual}")]
    WordCountMismatch { expected: usize, actual: usize },

    /// Register bytes did not form a valid string
    #[error("Invalid string data: {0}")]
    InvalidString(String),

    /// Custom rule name not present in the decode registry
    #[error("Unknown decode rule: {0}")]
    UnknownRule(String),

    /// Custom rule rejected its parameters
    #[error("Bad rule parameters: {0}")]
    BadParams(String),
}

/// Write-path errors: the entry or value cannot be turned into register
/// words. Never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// Entry's function code or decode rule has no write inverse
    #[error("Not writable: {0}")]
    NotWritable(String),

    /// Value does not fit the target register span
    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),

    /// Value variant does not match what the rule encodes
    #[error("Type mismatch: rule encodes {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Top-level error for all mibbus operations
#[derive(Debug, Error, Clone)]
pub enum ModbusError {
    /// Cannot open the transport; fatal to the connection until reconnect
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transient IO failure on an open transport
    #[error("IO error: {0}")]
    Io(String),

    /// No (complete) response within the deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed or device-rejected exchange
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Raw words could not be interpreted under the entry's rule
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Value could not be encoded for writing
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// Logical name absent from the slave's MIB
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration or MIB definition
    #[error("Configuration error: {0}")]
    Config(String),

    /// Retry budget exhausted for one transaction
    #[error("Communication failed after {attempts} attempts: {last}")]
    Communication { attempts: u32, last: String },
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::Io(err.to_string())
    }
}

/// Human-readable description for a Modbus exception code
pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}
