//! FIT field definitions: scale/offset arithmetic and semantic field kinds

use crate::fit::base_type::{BaseType, Value};
use crate::fit::profile::FieldSpec;
use crate::reader::{ByteReader, ByteWriter, EndOfData};

/// Seconds between the Unix epoch and the Garmin epoch (1989-12-31 00:00 UTC)
pub const GARMIN_EPOCH_OFFSET: i64 = 631_065_600;

/// Semantic interpretation layered on top of a field's base type.
///
/// Every kind shares the one physical codec; the tag only selects an extra
/// value mapping applied after scale/offset on decode (and inverted before
/// scale/offset on encode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKind {
    #[default]
    Plain,
    /// Garmin-epoch seconds, decoded to Unix seconds
    Timestamp,
    /// Semicircles, decoded to degrees
    Coordinate,
    Temperature,
    DayOfWeek,
    WeatherCondition,
    /// Minutes since midnight
    AlarmTime,
    SleepStage,
    Language,
    MeasurementSystem,
    FileType,
    GoalType,
    GoalSource,
}

const SEMICIRCLES_PER_DEGREE: f64 = (1u64 << 31) as f64 / 180.0;

impl FieldKind {
    fn map_decoded(self, value: Value) -> Value {
        match self {
            FieldKind::Timestamp => match value {
                Value::Int(v) => Value::Int(v + GARMIN_EPOCH_OFFSET),
                other => other,
            },
            FieldKind::Coordinate => match value {
                Value::Int(v) => Value::Float(v as f64 / SEMICIRCLES_PER_DEGREE),
                other => other,
            },
            _ => value,
        }
    }

    fn unmap(self, value: &Value) -> Value {
        match self {
            FieldKind::Timestamp => match value {
                Value::Int(v) => Value::Int(v - GARMIN_EPOCH_OFFSET),
                other => other.clone(),
            },
            FieldKind::Coordinate => match value.as_f64() {
                Some(v) => Value::Int((v * SEMICIRCLES_PER_DEGREE).round() as i64),
                None => value.clone(),
            },
            _ => value.clone(),
        }
    }
}

/// One field of a record definition.
///
/// Identity for schema matching is `(number, size)`; `size` is the total
/// byte width on the wire, which may span several base-type slots (an array)
/// or, for strings, the whole fixed character slot.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    pub number: u8,
    pub size: usize,
    pub base_type: BaseType,
    pub name: String,
    pub scale: i32,
    pub offset: i32,
    pub kind: FieldKind,
}

impl FieldDefinition {
    /// A field recovered from the registry, sized as seen on the wire
    pub fn from_spec(spec: &FieldSpec, size: usize) -> Self {
        FieldDefinition {
            number: spec.number,
            size,
            base_type: spec.base_type,
            name: spec.name.to_string(),
            scale: spec.scale,
            offset: spec.offset,
            kind: spec.kind,
        }
    }

    /// A field with no registry entry; keeps raw decoding available
    pub fn unknown(number: u8, size: usize, base_type: BaseType) -> Self {
        FieldDefinition {
            number,
            size,
            base_type,
            name: format!("unknown_{number}"),
            scale: 1,
            offset: 0,
            kind: FieldKind::Plain,
        }
    }

    /// Plain named field with no scaling
    pub fn named(number: u8, size: usize, base_type: BaseType, name: &str) -> Self {
        FieldDefinition {
            number,
            size,
            base_type,
            name: name.to_string(),
            scale: 1,
            offset: 0,
            kind: FieldKind::Plain,
        }
    }

    /// Number of base-type slots in this field
    pub fn slots(&self) -> usize {
        (self.size / self.base_type.size()).max(1)
    }

    fn has_scaling(&self) -> bool {
        self.scale != 1 || self.offset != 0
    }

    fn apply_scaling(&self, value: Value) -> Value {
        if !self.has_scaling() {
            return value;
        }
        match value.as_f64() {
            Some(v) => Value::Float((v - self.offset as f64) / self.scale as f64),
            None => value,
        }
    }

    fn unapply_scaling(&self, value: &Value) -> Value {
        if !self.has_scaling() {
            return value.clone();
        }
        match value.as_f64() {
            Some(v) => Value::Int((v * self.scale as f64 + self.offset as f64).round() as i64),
            None => value.clone(),
        }
    }

    fn decode_slot(&self, reader: &mut ByteReader) -> Result<Option<Value>, EndOfData> {
        Ok(self
            .base_type
            .decode(reader)?
            .map(|raw| self.kind.map_decoded(self.apply_scaling(raw))))
    }

    /// Decode the whole field from the cursor. Strings decode to the bytes
    /// before the first NUL; multi-slot fields decode to an array of the
    /// valid slots; a field whose every slot holds the invalid sentinel
    /// decodes to `None`.
    pub fn decode(&self, reader: &mut ByteReader) -> Result<Option<Value>, EndOfData> {
        if self.base_type == BaseType::String {
            let bytes = reader.read_bytes(self.size)?;
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            if end == 0 {
                return Ok(None);
            }
            return Ok(Some(Value::Text(
                String::from_utf8_lossy(&bytes[..end]).into_owned(),
            )));
        }

        if self.slots() == 1 {
            return self.decode_slot(reader);
        }

        let mut values = Vec::with_capacity(self.slots());
        for _ in 0..self.slots() {
            if let Some(value) = self.decode_slot(reader)? {
                values.push(value);
            }
        }
        if values.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Value::Array(values)))
        }
    }

    fn encode_slot(&self, writer: &mut ByteWriter, value: &Value) -> bool {
        let raw = self.unapply_scaling(&self.kind.unmap(value));
        self.base_type.encode(writer, &raw)
    }

    /// Encode a value into the field's full wire width. Strings are
    /// truncated to `size - 1` bytes and NUL padded; short arrays have their
    /// trailing slots invalidated. Returns false on a type mismatch or when
    /// an array carries more elements than the field has slots.
    pub fn encode(&self, writer: &mut ByteWriter, value: &Value) -> bool {
        if self.base_type == BaseType::String {
            let text = match value {
                Value::Text(text) => text,
                _ => return false,
            };
            let truncated = truncate_utf8(text, self.size.saturating_sub(1));
            writer.write_bytes(truncated.as_bytes());
            for _ in truncated.len()..self.size {
                writer.write_u8(0);
            }
            return true;
        }

        let values: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        if values.len() > self.slots() {
            return false;
        }
        for item in &values {
            if !self.encode_slot(writer, item) {
                return false;
            }
        }
        for _ in values.len()..self.slots() {
            self.base_type.write_invalid(writer);
        }
        true
    }

    /// Fill the field's wire width with the invalid sentinel
    pub fn write_invalid(&self, writer: &mut ByteWriter) {
        if self.base_type == BaseType::String {
            for _ in 0..self.size {
                writer.write_u8(0);
            }
            return;
        }
        for _ in 0..self.slots() {
            self.base_type.write_invalid(writer);
        }
    }
}

/// Truncate to at most `max` bytes without splitting a UTF-8 sequence
pub(crate) fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Human-readable name for a weather condition code
pub fn weather_condition_name(code: u8) -> &'static str {
    match code {
        0 => "clear",
        1 => "partly_cloudy",
        2 => "mostly_cloudy",
        3 => "rain",
        4 => "snow",
        5 => "windy",
        6 => "thunderstorms",
        7 => "wintry_mix",
        8 => "fog",
        11 => "hazy",
        12 => "hail",
        13 => "scattered_showers",
        14 => "scattered_thunderstorms",
        21 => "cloudy",
        _ => "unknown",
    }
}

/// Human-readable name for a FIT day-of-week code (0 = Sunday)
pub fn day_of_week_name(code: u8) -> &'static str {
    match code {
        0 => "sunday",
        1 => "monday",
        2 => "tuesday",
        3 => "wednesday",
        4 => "thursday",
        5 => "friday",
        6 => "saturday",
        _ => "unknown",
    }
}

/// Human-readable name for a sleep stage code
pub fn sleep_stage_name(code: u8) -> &'static str {
    match code {
        0 => "unmeasurable",
        1 => "awake",
        2 => "light",
        3 => "deep",
        4 => "rem",
        _ => "unknown",
    }
}
