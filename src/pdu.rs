//! Modbus PDU data structure and builders
//!
//! The PDU (function code + function-specific data) is transport
//! independent; a fixed-size stack buffer avoids heap allocation on the
//! hot request/response path.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{self, MAX_PDU_SIZE};
use crate::error::{FrameError, ModbusError, Result};

/// Modbus function codes supported by the master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionCode {
    /// FC01 - read coils
    ReadCoils,
    /// FC02 - read discrete inputs
    ReadDiscreteInputs,
    /// FC03 - read holding registers
    ReadHoldingRegisters,
    /// FC04 - read input registers
    ReadInputRegisters,
    /// FC05 - write single coil
    WriteSingleCoil,
    /// FC06 - write single register
    WriteSingleRegister,
    /// FC15 - write multiple coils
    WriteMultipleCoils,
    /// FC16 - write multiple registers
    WriteMultipleRegisters,
}

impl FunctionCode {
    /// Wire value of the function code
    pub fn to_u8(self) -> u8 {
        match self {
            FunctionCode::ReadCoils => 0x01,
            FunctionCode::ReadDiscreteInputs => 0x02,
            FunctionCode::ReadHoldingRegisters => 0x03,
            FunctionCode::ReadInputRegisters => 0x04,
            FunctionCode::WriteSingleCoil => 0x05,
            FunctionCode::WriteSingleRegister => 0x06,
            FunctionCode::WriteMultipleCoils => 0x0F,
            FunctionCode::WriteMultipleRegisters => 0x10,
        }
    }

    /// Parse a wire value, exception bit stripped by the caller
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(FunctionCode::ReadCoils),
            0x02 => Some(FunctionCode::ReadDiscreteInputs),
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x04 => Some(FunctionCode::ReadInputRegisters),
            0x05 => Some(FunctionCode::WriteSingleCoil),
            0x06 => Some(FunctionCode::WriteSingleRegister),
            0x0F => Some(FunctionCode::WriteMultipleCoils),
            0x10 => Some(FunctionCode::WriteMultipleRegisters),
            _ => None,
        }
    }

    /// True for FC01-04
    pub fn is_read(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
        )
    }

    /// True for FC05/06/15/16
    pub fn is_write(self) -> bool {
        !self.is_read()
    }

    /// True if the address space is bit-addressable (coils/discrete inputs)
    pub fn is_bit_level(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::WriteSingleCoil
                | FunctionCode::WriteMultipleCoils
        )
    }

    /// Maximum quantity for one read request in this address space
    pub fn read_limit(self) -> u16 {
        if self.is_bit_level() {
            constants::MAX_READ_COILS
        } else {
            constants::MAX_READ_REGISTERS
        }
    }

    /// Human-readable description, exception bit ignored
    pub fn description(value: u8) -> &'static str {
        match value & 0x7F {
            0x01 => "Read Coils",
            0x02 => "Read Discrete Inputs",
            0x03 => "Read Holding Registers",
            0x04 => "Read Input Registers",
            0x05 => "Write Single Coil",
            0x06 => "Write Single Register",
            0x0F => "Write Multiple Coils",
            0x10 => "Write Multiple Registers",
            _ => "Unknown Function",
        }
    }
}

/// PDU with stack-allocated fixed buffer
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::Config(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::Config("PDU buffer full".to_string()));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)?;
        Ok(())
    }

    /// Extend with a byte slice
    pub fn extend(&mut self, data: &[u8]) -> Result<()> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::Config(format!(
                "PDU would exceed max size: {} + {} > {}",
                self.len,
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    /// Get immutable data slice
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Get current length
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        if self.len > 0 {
            Some(self.data[0])
        } else {
            None
        }
    }

    /// Check if exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & 0x80 != 0)
            .unwrap_or(false)
    }

    /// Get exception code
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len > 1 {
            Some(self.data[1])
        } else {
            None
        }
    }

    /// Parse a read-registers response (FC03/04): byte count + big-endian
    /// words. The byte count must cover exactly `expected` registers.
    pub fn parse_registers(&self, expected: u16) -> Result<Vec<u16>> {
        let data = self.as_slice();
        if data.len() < 2 {
            return Err(FrameError::Truncated.into());
        }

        let byte_count = data[1] as usize;
        let payload = &data[2..];
        if byte_count != expected as usize * 2 || payload.len() != byte_count {
            return Err(FrameError::LengthMismatch {
                declared: byte_count,
                actual: payload.len(),
            }
            .into());
        }

        let registers = payload
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Ok(registers)
    }

    /// Parse a read-bits response (FC01/02): byte count + packed bits,
    /// LSB first within each byte. Returns exactly `expected` bits.
    pub fn parse_bits(&self, expected: u16) -> Result<Vec<bool>> {
        let data = self.as_slice();
        if data.len() < 2 {
            return Err(FrameError::Truncated.into());
        }

        let byte_count = data[1] as usize;
        let payload = &data[2..];
        let needed = (expected as usize).div_ceil(8);
        if byte_count != needed || payload.len() != byte_count {
            return Err(FrameError::LengthMismatch {
                declared: byte_count,
                actual: payload.len(),
            }
            .into());
        }

        let bits = (0..expected as usize)
            .map(|i| payload[i / 8] & (1 << (i % 8)) != 0)
            .collect();
        Ok(bits)
    }

    /// Verify a write response echoes the expected function code
    pub fn verify_write_echo(&self, expected: FunctionCode) -> Result<()> {
        let fc = self.function_code().ok_or(FrameError::Truncated)?;
        if fc != expected.to_u8() {
            return Err(ModbusError::Config(format!(
                "Write echo mismatch: expected FC{:02X}, got FC{:02X}",
                expected.to_u8(),
                fc
            )));
        }
        Ok(())
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    /// Set function code
    pub fn function_code(mut self, fc: FunctionCode) -> Result<Self> {
        self.pdu.push(fc.to_u8())?;
        Ok(self)
    }

    /// Add a big-endian address field
    pub fn address(mut self, addr: u16) -> Result<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    /// Add a big-endian quantity field
    pub fn quantity(mut self, qty: u16) -> Result<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    /// Add a byte
    pub fn byte(mut self, b: u8) -> Result<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    /// Build the PDU
    pub fn build(self) -> ModbusPdu {
        if let Some(fc) = self.pdu.function_code() {
            debug!(
                "PDU built: FC={:02X} ({}), len={}",
                fc,
                FunctionCode::description(fc),
                self.pdu.len()
            );
        }
        self.pdu
    }

    /// Build a read request PDU for FC01-04
    pub fn read_request(fc: FunctionCode, address: u16, quantity: u16) -> Result<ModbusPdu> {
        if !fc.is_read() {
            return Err(ModbusError::Config(format!(
                "read_request only supports FC01-04, got FC{:02X}",
                fc.to_u8()
            )));
        }
        if quantity == 0 || quantity > fc.read_limit() {
            return Err(ModbusError::Config(format!(
                "Invalid read quantity {} for FC{:02X}",
                quantity,
                fc.to_u8()
            )));
        }
        Ok(PduBuilder::new()
            .function_code(fc)?
            .address(address)?
            .quantity(quantity)?
            .build())
    }

    /// Build an FC05 (write single coil) request.
    /// The request value is 0xFF00 for ON, 0x0000 for OFF.
    pub fn write_single_coil(address: u16, value: bool) -> Result<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FunctionCode::WriteSingleCoil)?
            .address(address)?
            .quantity(if value { 0xFF00 } else { 0x0000 })?
            .build())
    }

    /// Build an FC06 (write single register) request
    pub fn write_single_register(address: u16, value: u16) -> Result<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FunctionCode::WriteSingleRegister)?
            .address(address)?
            .quantity(value)?
            .build())
    }

    /// Build an FC15 (write multiple coils) request
    pub fn write_multiple_coils(start_address: u16, values: &[bool]) -> Result<ModbusPdu> {
        if values.is_empty() || values.len() > constants::MAX_WRITE_COILS as usize {
            return Err(ModbusError::Config(format!(
                "Invalid coil count for FC15: {}",
                values.len()
            )));
        }

        let mut pdu = ModbusPdu::new();
        pdu.push(FunctionCode::WriteMultipleCoils.to_u8())?;
        pdu.push_u16(start_address)?;
        pdu.push_u16(values.len() as u16)?;
        pdu.push(values.len().div_ceil(8) as u8)?;

        let mut current_byte = 0u8;
        let mut bit_index = 0;
        for &value in values {
            if value {
                current_byte |= 1 << bit_index;
            }
            bit_index += 1;

            if bit_index == 8 {
                pdu.push(current_byte)?;
                current_byte = 0;
                bit_index = 0;
            }
        }
        if bit_index > 0 {
            pdu.push(current_byte)?;
        }

        Ok(pdu)
    }

    /// Build an FC16 (write multiple registers) request
    pub fn write_multiple_registers(start_address: u16, values: &[u16]) -> Result<ModbusPdu> {
        if values.is_empty() || values.len() > constants::MAX_WRITE_REGISTERS as usize {
            return Err(ModbusError::Config(format!(
                "Invalid register count for FC16: {}",
                values.len()
            )));
        }

        let mut pdu = ModbusPdu::new();
        pdu.push(FunctionCode::WriteMultipleRegisters.to_u8())?;
        pdu.push_u16(start_address)?;
        pdu.push_u16(values.len() as u16)?;
        pdu.push((values.len() * 2) as u8)?;
        for &value in values {
            pdu.push_u16(value)?;
        }

        Ok(pdu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdu_basic_operations() {
        let mut pdu = ModbusPdu::new();
        assert_eq!(pdu.len(), 0);
        assert!(pdu.is_empty());

        pdu.push(0x03).unwrap();
        assert_eq!(pdu.function_code(), Some(0x03));
        assert!(!pdu.is_exception());

        pdu.push_u16(0x0100).unwrap();
        pdu.push_u16(0x000A).unwrap();

        assert_eq!(pdu.len(), 5);
        assert_eq!(pdu.as_slice(), &[0x03, 0x01, 0x00, 0x00, 0x0A]);
    }

    #[test]
    fn test_pdu_from_slice_too_large() {
        let large = vec![0xFF; MAX_PDU_SIZE + 1];
        assert!(ModbusPdu::from_slice(&large).is_err());
    }

    #[test]
    fn test_pdu_push_until_full() {
        let mut pdu = ModbusPdu::new();
        for i in 0..MAX_PDU_SIZE {
            pdu.push(i as u8).unwrap();
        }
        assert!(pdu.push(0xFF).is_err());
    }

    #[test]
    fn test_exception_response() {
        let mut pdu = ModbusPdu::new();
        pdu.push(0x83).unwrap(); // FC03 + 0x80
        pdu.push(0x02).unwrap();

        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), Some(0x02));
    }

    #[test]
    fn test_exception_without_code_byte() {
        let mut pdu = ModbusPdu::new();
        pdu.push(0x83).unwrap();

        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), None);
    }

    // ========================================================================
    // Function code tests
    // ========================================================================

    #[test]
    fn test_function_code_roundtrip() {
        let all = [
            FunctionCode::ReadCoils,
            FunctionCode::ReadDiscreteInputs,
            FunctionCode::ReadHoldingRegisters,
            FunctionCode::ReadInputRegisters,
            FunctionCode::WriteSingleCoil,
            FunctionCode::WriteSingleRegister,
            FunctionCode::WriteMultipleCoils,
            FunctionCode::WriteMultipleRegisters,
        ];
        for fc in all {
            assert_eq!(FunctionCode::from_u8(fc.to_u8()), Some(fc));
        }
        assert_eq!(FunctionCode::from_u8(0x2B), None);
    }

    #[test]
    fn test_function_code_classification() {
        assert!(FunctionCode::ReadCoils.is_read());
        assert!(FunctionCode::ReadCoils.is_bit_level());
        assert!(FunctionCode::ReadHoldingRegisters.is_read());
        assert!(!FunctionCode::ReadHoldingRegisters.is_bit_level());
        assert!(FunctionCode::WriteSingleRegister.is_write());
        assert!(FunctionCode::WriteMultipleCoils.is_bit_level());
    }

    #[test]
    fn test_read_limits() {
        assert_eq!(FunctionCode::ReadHoldingRegisters.read_limit(), 125);
        assert_eq!(FunctionCode::ReadCoils.read_limit(), 2000);
    }

    // ========================================================================
    // Request builder tests
    // ========================================================================

    #[test]
    fn test_read_request_fc03() {
        let pdu = PduBuilder::read_request(FunctionCode::ReadHoldingRegisters, 0x006B, 3).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x6B, 0x00, 0x03]);
    }

    #[test]
    fn test_read_request_rejects_write_fc() {
        assert!(PduBuilder::read_request(FunctionCode::WriteSingleCoil, 0, 1).is_err());
    }

    #[test]
    fn test_read_request_rejects_bad_quantity() {
        assert!(PduBuilder::read_request(FunctionCode::ReadHoldingRegisters, 0, 126).is_err());
        assert!(PduBuilder::read_request(FunctionCode::ReadCoils, 0, 2001).is_err());
        assert!(PduBuilder::read_request(FunctionCode::ReadCoils, 0, 0).is_err());
    }

    #[test]
    fn test_write_single_coil_on_off() {
        let on = PduBuilder::write_single_coil(0x0100, true).unwrap();
        assert_eq!(on.as_slice(), &[0x05, 0x01, 0x00, 0xFF, 0x00]);

        let off = PduBuilder::write_single_coil(0x0200, false).unwrap();
        assert_eq!(off.as_slice(), &[0x05, 0x02, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_write_single_register() {
        let pdu = PduBuilder::write_single_register(0x0300, 0x1234).unwrap();
        assert_eq!(pdu.as_slice(), &[0x06, 0x03, 0x00, 0x12, 0x34]);
    }

    #[test]
    fn test_write_multiple_coils_packing() {
        let pdu = PduBuilder::write_multiple_coils(0x0100, &[true]).unwrap();
        assert_eq!(pdu.as_slice(), &[0x0F, 0x01, 0x00, 0x00, 0x01, 0x01, 0x01]);

        // 10 coils, LSB-first packing: CD 01
        let coils = [
            true, false, true, true, false, false, true, true, true, false,
        ];
        let pdu = PduBuilder::write_multiple_coils(0x0013, &coils).unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]
        );
    }

    #[test]
    fn test_write_multiple_registers() {
        let pdu = PduBuilder::write_multiple_registers(0x0100, &[0x1234]).unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x10, 0x01, 0x00, 0x00, 0x01, 0x02, 0x12, 0x34]
        );
    }

    #[test]
    fn test_write_multiple_empty_rejected() {
        assert!(PduBuilder::write_multiple_coils(0, &[]).is_err());
        assert!(PduBuilder::write_multiple_registers(0, &[]).is_err());
    }

    // ========================================================================
    // Response parsing tests
    // ========================================================================

    #[test]
    fn test_parse_registers_basic() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x04, 0x00, 0x0A, 0x01, 0x02]).unwrap();
        let regs = pdu.parse_registers(2).unwrap();
        assert_eq!(regs, vec![0x000A, 0x0102]);
    }

    #[test]
    fn test_parse_registers_byte_count_mismatch() {
        // Byte count says 4 but the request expected 1 register
        let pdu = ModbusPdu::from_slice(&[0x03, 0x04, 0x00, 0x0A, 0x01, 0x02]).unwrap();
        let err = pdu.parse_registers(1).unwrap_err();
        assert!(matches!(
            err,
            ModbusError::Frame(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_registers_truncated() {
        let pdu = ModbusPdu::from_slice(&[0x03]).unwrap();
        let err = pdu.parse_registers(1).unwrap_err();
        assert!(matches!(err, ModbusError::Frame(FrameError::Truncated)));
    }

    #[test]
    fn test_parse_bits_basic() {
        let pdu = ModbusPdu::from_slice(&[0x01, 0x02, 0xCD, 0x01]).unwrap();
        let bits = pdu.parse_bits(10).unwrap();
        assert_eq!(
            bits,
            vec![true, false, true, true, false, false, true, true, true, false]
        );
    }

    #[test]
    fn test_parse_bits_byte_count_mismatch() {
        let pdu = ModbusPdu::from_slice(&[0x01, 0x02, 0xCD, 0x01]).unwrap();
        assert!(pdu.parse_bits(20).is_err());
    }

    #[test]
    fn test_verify_write_echo() {
        let pdu = ModbusPdu::from_slice(&[0x06, 0x01, 0x00, 0x12, 0x34]).unwrap();
        assert!(pdu
            .verify_write_echo(FunctionCode::WriteSingleRegister)
            .is_ok());
        assert!(pdu.verify_write_echo(FunctionCode::WriteSingleCoil).is_err());
    }
}
