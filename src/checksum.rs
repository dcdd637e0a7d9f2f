//! Frame checksums: CRC16 for RTU, LRC for ASCII
//!
//! Both are pure functions over the frame bytes preceding the checksum
//! field. CRC16 is serialized little-endian on the wire; LRC is a single
//! byte hex-encoded like the rest of an ASCII frame.

/// CRC16 over `data` using the Modbus polynomial 0xA001, initialized to
/// 0xFFFF.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// LRC over `data`: two's complement of the byte sum modulo 256.
pub fn lrc(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    sum.wrapping_neg()
}
