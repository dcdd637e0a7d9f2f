//! Modbus protocol constants based on the official specification
//!
//! Register/coil limits are derived from the 253-byte PDU size constraint
//! inherited from the RS485 ADU limit of 256 bytes.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Modbus MBAP header length for TCP.
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) = 6 bytes;
/// the Unit ID byte is counted by the Length field, not the header.
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU (Protocol Data Unit) size.
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU).
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Response buffer size for receiving Modbus frames.
///
/// The largest legal frame is an ASCII ADU: 1 (':') + 2 * (1 + 253 + 1) hex
/// characters + 2 (CRLF) = 513 bytes. One power-of-two above covers every
/// transport.
pub const RESPONSE_BUFFER_SIZE: usize = 1024;

/// Minimum RTU frame length: slave id + function code + CRC16.
pub const MIN_RTU_FRAME_LEN: usize = 4;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum registers for FC03/FC04 reads.
/// Response PDU: 1 (FC) + 1 (byte count) + N*2 <= 253, so N <= 125.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum registers for FC16 writes.
/// Request PDU: 1 + 2 + 2 + 1 + N*2 <= 253, so N <= 123.
pub const MAX_WRITE_REGISTERS: u16 = 123;

// ============================================================================
// Coil Operation Limits
// ============================================================================

/// Maximum coils for FC01/FC02 reads, per the Modbus specification.
pub const MAX_READ_COILS: u16 = 2000;

/// Maximum coils for FC15 writes (0x7B0), per the Modbus specification.
pub const MAX_WRITE_COILS: u16 = 1968;

// ============================================================================
// Addressing
// ============================================================================

/// Broadcast slave id, valid for write requests only. No response follows.
pub const BROADCAST_SLAVE_ID: u8 = 0;

/// Highest individually addressable slave id.
pub const MAX_SLAVE_ID: u8 = 247;

// ============================================================================
// ASCII framing
// ============================================================================

/// ASCII frame start marker.
pub const ASCII_FRAME_START: u8 = b':';

/// ASCII frame terminator.
pub const ASCII_FRAME_END: &[u8] = b"\r\n";
