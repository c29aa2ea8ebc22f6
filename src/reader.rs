//! Endianness-aware byte cursor primitives used by every codec in the crate

use std::fmt;

use thiserror::Error;

/// Raised when a read runs past the end of the underlying buffer
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Unexpected end of data: wanted {wanted} bytes, {remaining} remaining")]
pub struct EndOfData {
    pub wanted: usize,
    pub remaining: usize,
}

/// Byte order for multi-byte reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// Convert the FIT architecture byte (0 = little endian, 1 = big endian)
    pub fn from_arch(value: u8) -> Option<Self> {
        match value {
            0 => Some(ByteOrder::LittleEndian),
            1 => Some(ByteOrder::BigEndian),
            _ => None,
        }
    }

    /// The FIT architecture byte for this order
    pub fn arch(self) -> u8 {
        match self {
            ByteOrder::LittleEndian => 0,
            ByteOrder::BigEndian => 1,
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOrder::LittleEndian => write!(f, "little-endian"),
            ByteOrder::BigEndian => write!(f, "big-endian"),
        }
    }
}

/// Position-tracked read cursor over a byte slice
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
    byte_order: ByteOrder,
}

impl<'a> ByteReader<'a> {
    /// Create a little-endian cursor at position 0
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader {
            data,
            position: 0,
            byte_order: ByteOrder::LittleEndian,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn set_byte_order(&mut self, byte_order: ByteOrder) {
        self.byte_order = byte_order;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EndOfData> {
        if self.remaining() < n {
            return Err(EndOfData {
                wanted: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + n];
        self.position += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), EndOfData> {
        self.take(n).map(|_| ())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], EndOfData> {
        self.take(n)
    }

    pub fn read_u8(&mut self) -> Result<u8, EndOfData> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, EndOfData> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, EndOfData> {
        let bytes: [u8; 2] = self.take(2)?.try_into().unwrap();
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
            ByteOrder::BigEndian => u16::from_be_bytes(bytes),
        })
    }

    pub fn read_i16(&mut self) -> Result<i16, EndOfData> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32, EndOfData> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => u32::from_le_bytes(bytes),
            ByteOrder::BigEndian => u32::from_be_bytes(bytes),
        })
    }

    pub fn read_i32(&mut self) -> Result<i32, EndOfData> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64, EndOfData> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => u64::from_le_bytes(bytes),
            ByteOrder::BigEndian => u64::from_be_bytes(bytes),
        })
    }

    pub fn read_i64(&mut self) -> Result<i64, EndOfData> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32, EndOfData> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, EndOfData> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read bytes up to (and consuming) the next NUL, or to the end of the
    /// buffer, and decode them as UTF-8, replacing invalid sequences.
    pub fn read_string_null_terminated(&mut self) -> String {
        let start = self.position;
        let mut end = self.position;
        while end < self.data.len() && self.data[end] != 0 {
            end += 1;
        }
        let value = String::from_utf8_lossy(&self.data[start..end]).into_owned();
        // consume the terminator when present
        self.position = (end + 1).min(self.data.len());
        value
    }
}

/// Growable write buffer mirroring [`ByteReader`]
#[derive(Debug, Default)]
pub struct ByteWriter {
    data: Vec<u8>,
    byte_order: ByteOrder,
}

impl ByteWriter {
    pub fn new() -> Self {
        ByteWriter::default()
    }

    pub fn with_byte_order(byte_order: ByteOrder) -> Self {
        ByteWriter {
            data: Vec::new(),
            byte_order,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn set_byte_order(&mut self, byte_order: ByteOrder) {
        self.byte_order = byte_order;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.write_u8(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        match self.byte_order {
            ByteOrder::LittleEndian => self.data.extend_from_slice(&value.to_le_bytes()),
            ByteOrder::BigEndian => self.data.extend_from_slice(&value.to_be_bytes()),
        }
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_u16(value as u16);
    }

    pub fn write_u32(&mut self, value: u32) {
        match self.byte_order {
            ByteOrder::LittleEndian => self.data.extend_from_slice(&value.to_le_bytes()),
            ByteOrder::BigEndian => self.data.extend_from_slice(&value.to_be_bytes()),
        }
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    pub fn write_u64(&mut self, value: u64) {
        match self.byte_order {
            ByteOrder::LittleEndian => self.data.extend_from_slice(&value.to_le_bytes()),
            ByteOrder::BigEndian => self.data.extend_from_slice(&value.to_be_bytes()),
        }
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_u64(value as u64);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Patch a previously written u16, e.g. a length placeholder
    pub fn write_u16_at(&mut self, position: usize, value: u16) {
        let bytes = match self.byte_order {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        self.data[position..position + 2].copy_from_slice(&bytes);
    }

    /// Patch a previously written u32
    pub fn write_u32_at(&mut self, position: usize, value: u32) {
        let bytes = match self.byte_order {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        self.data[position..position + 4].copy_from_slice(&bytes);
    }
}
