//! Per-transport ADU codec
//!
//! Encodes a (slave id, PDU) pair into the transport-specific Application
//! Data Unit and decodes received bytes back. The PDU itself is shared
//! across transports; only framing, addressing and checksums differ:
//!
//! - **TCP**: MBAP header (transaction id, protocol id 0, length, unit id)
//! - **RTU**: slave id + PDU + CRC16 (little-endian)
//! - **ASCII**: `':'` + uppercase hex of (slave id + PDU + LRC) + CRLF
//!
//! Exception PDUs (function code | 0x80) surface as
//! [`FrameError::ExceptionResponse`], never as decoded data.

use tracing::debug;

use crate::checksum::{crc16, lrc};
use crate::constants::{
    ASCII_FRAME_END, ASCII_FRAME_START, MAX_PDU_SIZE, MBAP_HEADER_LEN, MIN_RTU_FRAME_LEN,
};
use crate::error::FrameError;
use crate::pdu::ModbusPdu;

/// Wire framing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireMode {
    /// MBAP-framed TCP
    Tcp,
    /// Binary serial with CRC16
    Rtu,
    /// Text serial with LRC
    Ascii,
}

/// A decoded response ADU
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// MBAP transaction id; None for serial modes
    pub transaction_id: Option<u16>,
    /// Responding slave / unit id
    pub slave_id: u8,
    /// Transport-independent PDU
    pub pdu: ModbusPdu,
}

/// Frame codec for one wire mode
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    mode: WireMode,
}

impl FrameCodec {
    /// Create a codec for the given wire mode
    pub fn new(mode: WireMode) -> Self {
        Self { mode }
    }

    /// Wire mode of this codec
    pub fn mode(&self) -> WireMode {
        self.mode
    }

    /// Encode a request ADU. `transaction_id` is only used in TCP mode;
    /// serial modes ignore it.
    pub fn encode(&self, slave_id: u8, pdu: &ModbusPdu, transaction_id: u16) -> Vec<u8> {
        match self.mode {
            WireMode::Tcp => self.encode_tcp(slave_id, pdu, transaction_id),
            WireMode::Rtu => self.encode_rtu(slave_id, pdu),
            WireMode::Ascii => self.encode_ascii(slave_id, pdu),
        }
    }

    /// Decode a response ADU
    pub fn decode(&self, data: &[u8]) -> Result<DecodedFrame, FrameError> {
        let frame = match self.mode {
            WireMode::Tcp => self.decode_tcp(data),
            WireMode::Rtu => self.decode_rtu(data),
            WireMode::Ascii => self.decode_ascii(data),
        }?;

        if frame.pdu.is_exception() {
            let function = frame.pdu.function_code().unwrap_or(0) & 0x7F;
            let code = frame.pdu.exception_code().unwrap_or(0);
            return Err(FrameError::ExceptionResponse { function, code });
        }

        Ok(frame)
    }

    fn encode_tcp(&self, slave_id: u8, pdu: &ModbusPdu, transaction_id: u16) -> Vec<u8> {
        let length = (pdu.len() + 1) as u16; // unit id + PDU

        let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes()); // protocol id
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(slave_id);
        frame.extend_from_slice(pdu.as_slice());

        debug!(
            "TCP frame built: tid={:04X}, unit={}, len={}",
            transaction_id,
            slave_id,
            frame.len()
        );
        frame
    }

    fn encode_rtu(&self, slave_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
        let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
        frame.push(slave_id);
        frame.extend_from_slice(pdu.as_slice());

        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        debug!(
            "RTU frame built: slave={}, len={}, crc={:04X}",
            slave_id,
            frame.len(),
            crc
        );
        frame
    }

    fn encode_ascii(&self, slave_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
        let mut body = Vec::with_capacity(1 + pdu.len() + 1);
        body.push(slave_id);
        body.extend_from_slice(pdu.as_slice());
        body.push(lrc(&body));

        let mut frame = Vec::with_capacity(1 + body.len() * 2 + 2);
        frame.push(ASCII_FRAME_START);
        frame.extend_from_slice(hex::encode_upper(&body).as_bytes());
        frame.extend_from_slice(ASCII_FRAME_END);

        debug!("ASCII frame built: slave={}, len={}", slave_id, frame.len());
        frame
    }

    fn decode_tcp(&self, data: &[u8]) -> Result<DecodedFrame, FrameError> {
        // Minimum: MBAP header + unit id + function code
        if data.len() < MBAP_HEADER_LEN + 2 {
            return Err(FrameError::Truncated);
        }

        let transaction_id = u16::from_be_bytes([data[0], data[1]]);
        let protocol_id = u16::from_be_bytes([data[2], data[3]]);
        let length = u16::from_be_bytes([data[4], data[5]]) as usize;
        let slave_id = data[6];

        if protocol_id != 0 {
            return Err(FrameError::ProtocolIdMismatch(protocol_id));
        }
        if data.len() != MBAP_HEADER_LEN + length {
            return Err(FrameError::LengthMismatch {
                declared: length,
                actual: data.len() - MBAP_HEADER_LEN,
            });
        }

        let pdu = pdu_from_bytes(&data[MBAP_HEADER_LEN + 1..])?;
        Ok(DecodedFrame {
            transaction_id: Some(transaction_id),
            slave_id,
            pdu,
        })
    }

    fn decode_rtu(&self, data: &[u8]) -> Result<DecodedFrame, FrameError> {
        if data.len() < MIN_RTU_FRAME_LEN {
            return Err(FrameError::Truncated);
        }

        let body = &data[..data.len() - 2];
        let received = u16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]]);
        let computed = crc16(body);
        if received != computed {
            return Err(FrameError::ChecksumMismatch {
                expected: computed,
                actual: received,
            });
        }

        let pdu = pdu_from_bytes(&body[1..])?;
        Ok(DecodedFrame {
            transaction_id: None,
            slave_id: body[0],
            pdu,
        })
    }

    fn decode_ascii(&self, data: &[u8]) -> Result<DecodedFrame, FrameError> {
        if data.len() < 1 + 2 {
            return Err(FrameError::Truncated);
        }
        if data[0] != ASCII_FRAME_START || !data.ends_with(ASCII_FRAME_END) {
            return Err(FrameError::FramingError);
        }

        let body = hex::decode(&data[1..data.len() - 2])
            .map_err(|e| FrameError::HexDecode(e.to_string()))?;

        // slave id + function code + LRC at minimum
        if body.len() < 3 {
            return Err(FrameError::Truncated);
        }

        let (payload, check) = body.split_at(body.len() - 1);
        let computed = lrc(payload);
        if check[0] != computed {
            return Err(FrameError::ChecksumMismatch {
                expected: u16::from(computed),
                actual: u16::from(check[0]),
            });
        }

        let pdu = pdu_from_bytes(&payload[1..])?;
        Ok(DecodedFrame {
            transaction_id: None,
            slave_id: payload[0],
            pdu,
        })
    }
}

fn pdu_from_bytes(bytes: &[u8]) -> Result<ModbusPdu, FrameError> {
    if bytes.len() > MAX_PDU_SIZE {
        return Err(FrameError::LengthMismatch {
            declared: bytes.len(),
            actual: MAX_PDU_SIZE,
        });
    }
    ModbusPdu::from_slice(bytes).map_err(|_| FrameError::Truncated)
}
