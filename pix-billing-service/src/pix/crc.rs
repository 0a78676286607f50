//! CRC-16/CCITT-FALSE as required by the BR Code checksum field.

const POLYNOMIAL: u16 = 0x1021;
const INITIAL: u16 = 0xFFFF;

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no final XOR.
pub fn crc16_ccitt_false(data: &[u8]) -> u16 {
    let mut crc = INITIAL;

    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

/// Checksum rendered the way it is embedded in a payload: 4 uppercase hex digits.
pub fn checksum_hex(data: &[u8]) -> String {
    format!("{:04X}", crc16_ccitt_false(data))
}
