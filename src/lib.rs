//! # mibbus - Modbus Master Stack with Logical Register Mapping
//!
//! A Modbus master (client) implementation for TCP, RTU and ASCII
//! transports, built around a MIB (Memory Information Block): a per-slave
//! mapping from human-readable names to register addresses, function codes
//! and value-decoding rules.
//!
//! ## Architecture
//!
//! ```text
//! ModbusMaster (read/write orchestration, request batching)
//!     ├── Mib (logical name -> address/function code/decode rule)
//!     ├── DecodeRegistry + DecodeRule (raw words -> typed values)
//!     └── TransactionManager (serialization, correlation, retry)
//!             ├── FrameCodec (TCP MBAP / RTU CRC16 / ASCII LRC framing)
//!             └── ModbusTransport (TcpTransport / SerialTransport)
//! ```
//!
//! Each connection owns its transport exclusively; requests over one link
//! are serialized because Modbus is half-duplex per channel. Batch reads
//! and writes group contiguous addresses into minimal wire requests and
//! always return one result per requested name, with failures inline.
//!
//! ## Supported Function Codes
//!
//! | Code | Function |
//! |------|----------|
//! | 0x01 | Read Coils |
//! | 0x02 | Read Discrete Inputs |
//! | 0x03 | Read Holding Registers |
//! | 0x04 | Read Input Registers |
//! | 0x05 | Write Single Coil |
//! | 0x06 | Write Single Register |
//! | 0x0F | Write Multiple Coils |
//! | 0x10 | Write Multiple Registers |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mibbus::{
//!     DecodeRule, FunctionCode, MibEntry, ModbusMaster, RetryPolicy, Selector, TcpConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> mibbus::Result<()> {
//!     let config = TcpConfig {
//!         host: "192.168.1.50".to_string(),
//!         port: 502,
//!         connect_timeout_ms: 5000,
//!     };
//!     let mut master = ModbusMaster::connect_tcp(config, RetryPolicy::default()).await?;
//!
//!     master.define_slave(
//!         1,
//!         vec![MibEntry::new(
//!             "Temperature",
//!             1,
//!             FunctionCode::ReadInputRegisters,
//!             DecodeRule::Scale { factor: 1.0, places: 1 },
//!         )],
//!     )?;
//!
//!     let result = master.read(1, Selector::All).await;
//!     println!("Temperature: {:?}", result.value("Temperature"));
//!
//!     master.close().await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Error taxonomy and result handling
pub mod error;

/// Protocol constants from the Modbus specification
pub mod constants;

/// CRC16 (RTU) and LRC (ASCII) checksums
pub mod checksum;

/// PDU structure, function codes and request builders
pub mod pdu;

/// Per-transport ADU framing (TCP / RTU / ASCII)
pub mod frame;

/// Byte transports: TCP sockets and serial ports
pub mod transport;

/// Transaction sequencing, correlation and retry
pub mod transaction;

/// Logical name to register mapping
pub mod mib;

/// Typed value decoding pipeline
pub mod codec;

/// Read/write orchestration
pub mod master;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Error handling ===
pub use error::{DecodeError, FrameError, ModbusError, Result, WriteError};

// === Core types ===
pub use codec::{CustomRule, DecodeRegistry, DecodeRule, Value};
pub use mib::{Mib, MibEntry};
pub use pdu::{FunctionCode, ModbusPdu, PduBuilder};

// === Framing ===
pub use frame::{DecodedFrame, FrameCodec, WireMode};

// === Transports ===
pub use transport::{
    ModbusTransport, Parity, SerialConfig, SerialFraming, SerialTransport, TcpConfig, TcpTransport,
};

// === Transactions ===
pub use transaction::{RetryPolicy, TransactionManager};

// === Master API ===
pub use master::{ModbusMaster, ReadResult, Selector, WriteResult};

// === Checksums ===
pub use checksum::{crc16, lrc};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
