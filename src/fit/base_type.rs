//! FIT base types: wire identifiers, sizes, invalid-value sentinels and the
//! raw decode/encode of a single value slot

use std::fmt;

use crate::reader::{ByteReader, ByteWriter, EndOfData};

/// A decoded FIT field value.
///
/// Integral base types decode to `Int` regardless of width; scaled fields and
/// floating-point base types decode to `Float`. Multi-slot fields decode to
/// `Array`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// FIT base types as carried in definition-record field entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseType {
    Enum,
    Sint8,
    Uint8,
    Sint16,
    Uint16,
    Sint32,
    Uint32,
    String,
    Float32,
    Float64,
    Uint8z,
    Uint16z,
    Uint32z,
    Byte,
    Sint64,
    Uint64,
    Uint64z,
}

impl BaseType {
    /// Resolve a wire identifier byte (including the endian-capable bit 7)
    pub fn from_identifier(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(BaseType::Enum),
            0x01 => Some(BaseType::Sint8),
            0x02 => Some(BaseType::Uint8),
            0x83 => Some(BaseType::Sint16),
            0x84 => Some(BaseType::Uint16),
            0x85 => Some(BaseType::Sint32),
            0x86 => Some(BaseType::Uint32),
            0x07 => Some(BaseType::String),
            0x88 => Some(BaseType::Float32),
            0x89 => Some(BaseType::Float64),
            0x0A => Some(BaseType::Uint8z),
            0x8B => Some(BaseType::Uint16z),
            0x8C => Some(BaseType::Uint32z),
            0x0D => Some(BaseType::Byte),
            0x8E => Some(BaseType::Sint64),
            0x8F => Some(BaseType::Uint64),
            0x90 => Some(BaseType::Uint64z),
            _ => None,
        }
    }

    /// The wire identifier byte
    pub fn identifier(self) -> u8 {
        match self {
            BaseType::Enum => 0x00,
            BaseType::Sint8 => 0x01,
            BaseType::Uint8 => 0x02,
            BaseType::Sint16 => 0x83,
            BaseType::Uint16 => 0x84,
            BaseType::Sint32 => 0x85,
            BaseType::Uint32 => 0x86,
            BaseType::String => 0x07,
            BaseType::Float32 => 0x88,
            BaseType::Float64 => 0x89,
            BaseType::Uint8z => 0x0A,
            BaseType::Uint16z => 0x8B,
            BaseType::Uint32z => 0x8C,
            BaseType::Byte => 0x0D,
            BaseType::Sint64 => 0x8E,
            BaseType::Uint64 => 0x8F,
            BaseType::Uint64z => 0x90,
        }
    }

    /// Size in bytes of one value slot
    pub fn size(self) -> usize {
        match self {
            BaseType::Enum
            | BaseType::Sint8
            | BaseType::Uint8
            | BaseType::String
            | BaseType::Uint8z
            | BaseType::Byte => 1,
            BaseType::Sint16 | BaseType::Uint16 | BaseType::Uint16z => 2,
            BaseType::Sint32 | BaseType::Uint32 | BaseType::Float32 | BaseType::Uint32z => 4,
            BaseType::Float64 | BaseType::Sint64 | BaseType::Uint64 | BaseType::Uint64z => 8,
        }
    }

    /// Write this type's "no value" sentinel for a single slot
    pub fn write_invalid(self, writer: &mut ByteWriter) {
        match self {
            BaseType::Enum | BaseType::Uint8 | BaseType::Byte => writer.write_u8(0xFF),
            BaseType::Sint8 => writer.write_u8(0x7F),
            BaseType::Uint8z | BaseType::String => writer.write_u8(0x00),
            BaseType::Sint16 => writer.write_u16(0x7FFF),
            BaseType::Uint16 => writer.write_u16(0xFFFF),
            BaseType::Uint16z => writer.write_u16(0x0000),
            BaseType::Sint32 => writer.write_u32(0x7FFF_FFFF),
            BaseType::Uint32 | BaseType::Float32 => writer.write_u32(0xFFFF_FFFF),
            BaseType::Uint32z => writer.write_u32(0x0000_0000),
            BaseType::Sint64 => writer.write_u64(0x7FFF_FFFF_FFFF_FFFF),
            BaseType::Uint64 | BaseType::Float64 => writer.write_u64(0xFFFF_FFFF_FFFF_FFFF),
            BaseType::Uint64z => writer.write_u64(0),
        }
    }

    /// Decode one value slot, yielding `None` for the invalid sentinel.
    ///
    /// Strings are handled at the field layer (they span a whole slot of
    /// bytes); decoding a `String` base type here reads a single byte.
    pub fn decode(self, reader: &mut ByteReader) -> Result<Option<Value>, EndOfData> {
        let value = match self {
            BaseType::Enum | BaseType::Uint8 | BaseType::Byte | BaseType::String => {
                let raw = reader.read_u8()?;
                if raw == 0xFF && self != BaseType::String {
                    None
                } else {
                    Some(Value::Int(raw as i64))
                }
            }
            BaseType::Sint8 => {
                let raw = reader.read_i8()?;
                (raw != 0x7F).then_some(Value::Int(raw as i64))
            }
            BaseType::Uint8z => {
                let raw = reader.read_u8()?;
                (raw != 0).then_some(Value::Int(raw as i64))
            }
            BaseType::Sint16 => {
                let raw = reader.read_i16()?;
                (raw != 0x7FFF).then_some(Value::Int(raw as i64))
            }
            BaseType::Uint16 => {
                let raw = reader.read_u16()?;
                (raw != 0xFFFF).then_some(Value::Int(raw as i64))
            }
            BaseType::Uint16z => {
                let raw = reader.read_u16()?;
                (raw != 0).then_some(Value::Int(raw as i64))
            }
            BaseType::Sint32 => {
                let raw = reader.read_i32()?;
                (raw != 0x7FFF_FFFF).then_some(Value::Int(raw as i64))
            }
            BaseType::Uint32 => {
                let raw = reader.read_u32()?;
                (raw != 0xFFFF_FFFF).then_some(Value::Int(raw as i64))
            }
            BaseType::Uint32z => {
                let raw = reader.read_u32()?;
                (raw != 0).then_some(Value::Int(raw as i64))
            }
            BaseType::Float32 => {
                let bits = reader.read_u32()?;
                (bits != 0xFFFF_FFFF).then_some(Value::Float(f32::from_bits(bits) as f64))
            }
            BaseType::Float64 => {
                let bits = reader.read_u64()?;
                (bits != 0xFFFF_FFFF_FFFF_FFFF).then_some(Value::Float(f64::from_bits(bits)))
            }
            BaseType::Sint64 => {
                let raw = reader.read_i64()?;
                (raw != 0x7FFF_FFFF_FFFF_FFFF).then_some(Value::Int(raw))
            }
            BaseType::Uint64 => {
                let raw = reader.read_u64()?;
                (raw != u64::MAX).then_some(Value::Int(raw as i64))
            }
            BaseType::Uint64z => {
                let raw = reader.read_u64()?;
                (raw != 0).then_some(Value::Int(raw as i64))
            }
        };
        Ok(value)
    }

    /// Encode one numeric value slot. Returns false if the value cannot be
    /// represented by this base type.
    pub fn encode(self, writer: &mut ByteWriter, value: &Value) -> bool {
        match self {
            BaseType::Float32 => match value.as_f64() {
                Some(v) => {
                    writer.write_f32(v as f32);
                    true
                }
                None => false,
            },
            BaseType::Float64 => match value.as_f64() {
                Some(v) => {
                    writer.write_f64(v);
                    true
                }
                None => false,
            },
            _ => {
                let raw = match value {
                    Value::Int(v) => *v,
                    Value::Float(v) => v.round() as i64,
                    _ => return false,
                };
                match self {
                    BaseType::Enum
                    | BaseType::Uint8
                    | BaseType::Uint8z
                    | BaseType::Byte
                    | BaseType::String => writer.write_u8(raw as u8),
                    BaseType::Sint8 => writer.write_i8(raw as i8),
                    BaseType::Sint16 => writer.write_i16(raw as i16),
                    BaseType::Uint16 | BaseType::Uint16z => writer.write_u16(raw as u16),
                    BaseType::Sint32 => writer.write_i32(raw as i32),
                    BaseType::Uint32 | BaseType::Uint32z => writer.write_u32(raw as u32),
                    BaseType::Sint64 => writer.write_i64(raw),
                    BaseType::Uint64 | BaseType::Uint64z => writer.write_u64(raw as u64),
                    BaseType::Float32 | BaseType::Float64 => unreachable!(),
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ByteOrder;

    #[test]
    fn test_identifier_roundtrip() {
        for id in 0u8..=0xFF {
            if let Some(base_type) = BaseType::from_identifier(id) {
                assert_eq!(base_type.identifier(), id);
            }
        }
        assert_eq!(BaseType::from_identifier(0x84), Some(BaseType::Uint16));
        assert_eq!(BaseType::from_identifier(0x42), None);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(BaseType::Enum.size(), 1);
        assert_eq!(BaseType::Uint16.size(), 2);
        assert_eq!(BaseType::Sint32.size(), 4);
        assert_eq!(BaseType::Float64.size(), 8);
    }

    #[test]
    fn test_invalid_sentinel_decodes_to_none() {
        let types = [
            BaseType::Enum,
            BaseType::Sint8,
            BaseType::Uint8,
            BaseType::Sint16,
            BaseType::Uint16,
            BaseType::Uint16z,
            BaseType::Sint32,
            BaseType::Uint32,
            BaseType::Uint32z,
            BaseType::Float32,
            BaseType::Float64,
            BaseType::Sint64,
            BaseType::Uint64,
            BaseType::Uint64z,
        ];
        for base_type in types {
            let mut writer = ByteWriter::new();
            base_type.write_invalid(&mut writer);
            let bytes = writer.into_bytes();
            assert_eq!(bytes.len(), base_type.size());
            let mut reader = ByteReader::new(&bytes);
            assert_eq!(base_type.decode(&mut reader).unwrap(), None, "{base_type:?}");
        }
    }

    #[test]
    fn test_decode_values() {
        let data = [0x2A, 0xD6, 0xFE, 0xCA];
        let mut reader = ByteReader::new(&data);
        assert_eq!(
            BaseType::Uint8.decode(&mut reader).unwrap(),
            Some(Value::Int(0x2A))
        );
        assert_eq!(
            BaseType::Sint8.decode(&mut reader).unwrap(),
            Some(Value::Int(-42))
        );
        assert_eq!(
            BaseType::Uint16.decode(&mut reader).unwrap(),
            Some(Value::Int(0xCAFE))
        );
    }

    #[test]
    fn test_decode_big_endian() {
        let data = [0x12, 0x34];
        let mut reader = ByteReader::new(&data);
        reader.set_byte_order(ByteOrder::BigEndian);
        assert_eq!(
            BaseType::Uint16.decode(&mut reader).unwrap(),
            Some(Value::Int(0x1234))
        );
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut writer = ByteWriter::new();
        assert!(BaseType::Sint16.encode(&mut writer, &Value::Int(-1234)));
        assert!(BaseType::Float32.encode(&mut writer, &Value::Float(2.5)));
        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(
            BaseType::Sint16.decode(&mut reader).unwrap(),
            Some(Value::Int(-1234))
        );
        assert_eq!(
            BaseType::Float32.decode(&mut reader).unwrap(),
            Some(Value::Float(2.5))
        );
    }

    #[test]
    fn test_encode_rejects_text_for_numeric() {
        let mut writer = ByteWriter::new();
        assert!(!BaseType::Uint32.encode(&mut writer, &Value::Text("x".into())));
        assert!(writer.is_empty());
    }
}
