//! CRC-16 checksum shared by GFDI packets, transfer chunks and FIT files
//!
//! The checksum takes an explicit running-state parameter so it can be
//! accumulated incrementally across chunk boundaries: feeding a buffer in
//! pieces, threading each result back in as the next initial value, yields
//! the same checksum as one pass over the whole buffer.

const CRC_TABLE: [u16; 16] = [
    0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800,
    0xB401, 0x5000, 0x9C01, 0x8801, 0x4400,
];

/// Compute the CRC-16 of `data`, continuing from `initial`.
///
/// Pass `0` as `initial` for a fresh checksum.
pub fn compute_crc(initial: u16, data: &[u8]) -> u16 {
    let mut crc = initial;
    for &byte in data {
        // process the low nibble, then the high nibble
        let mut tmp = CRC_TABLE[(crc & 0x0F) as usize];
        crc = (crc >> 4) & 0x0FFF;
        crc = crc ^ tmp ^ CRC_TABLE[(byte & 0x0F) as usize];

        tmp = CRC_TABLE[(crc & 0x0F) as usize];
        crc = (crc >> 4) & 0x0FFF;
        crc = crc ^ tmp ^ CRC_TABLE[((byte >> 4) & 0x0F) as usize];
    }
    crc
}
