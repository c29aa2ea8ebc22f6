//! FIT record headers, record definitions and schema-bound record data

use std::sync::Arc;

use log::warn;

use crate::fit::base_type::{BaseType, Value};
use crate::fit::field::{FieldDefinition, FieldKind, GARMIN_EPOCH_OFFSET};
use crate::fit::profile::{self, GlobalDefinition};
use crate::fit::FitError;
use crate::reader::{ByteOrder, ByteReader, ByteWriter};

const DEFINITION_FLAG: u8 = 0x40;
const DEVELOPER_DATA_FLAG: u8 = 0x20;
const COMPRESSED_TIMESTAMP_FLAG: u8 = 0x80;

/// The one-byte header preceding every FIT record.
///
/// Normal headers carry a 4-bit local message type plus definition and
/// developer-data flags; compressed-timestamp headers carry a 2-bit local
/// message type and a 5-bit time offset against the running reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    definition: bool,
    developer_data: bool,
    local_message_type: u8,
    time_offset: Option<u8>,
}

impl RecordHeader {
    pub fn from_byte(byte: u8) -> Self {
        if byte & COMPRESSED_TIMESTAMP_FLAG != 0 {
            RecordHeader {
                definition: false,
                developer_data: false,
                local_message_type: (byte >> 5) & 0x03,
                time_offset: Some(byte & 0x1F),
            }
        } else {
            RecordHeader {
                definition: byte & DEFINITION_FLAG != 0,
                developer_data: byte & DEVELOPER_DATA_FLAG != 0,
                local_message_type: byte & 0x0F,
                time_offset: None,
            }
        }
    }

    pub fn to_byte(self) -> u8 {
        match self.time_offset {
            Some(offset) => {
                COMPRESSED_TIMESTAMP_FLAG | ((self.local_message_type & 0x03) << 5) | (offset & 0x1F)
            }
            None => {
                let mut byte = self.local_message_type & 0x0F;
                if self.definition {
                    byte |= DEFINITION_FLAG;
                }
                if self.developer_data {
                    byte |= DEVELOPER_DATA_FLAG;
                }
                byte
            }
        }
    }

    pub fn definition(local_message_type: u8, developer_data: bool) -> Self {
        RecordHeader {
            definition: true,
            developer_data,
            local_message_type: local_message_type & 0x0F,
            time_offset: None,
        }
    }

    pub fn data(local_message_type: u8) -> Self {
        RecordHeader {
            definition: false,
            developer_data: false,
            local_message_type: local_message_type & 0x0F,
            time_offset: None,
        }
    }

    pub fn is_definition(self) -> bool {
        self.definition
    }

    pub fn has_developer_data(self) -> bool {
        self.developer_data
    }

    pub fn local_message_type(self) -> u8 {
        self.local_message_type
    }

    /// The 5-bit compressed time offset, when this is a compressed header
    pub fn time_offset(self) -> Option<u8> {
        self.time_offset
    }
}

/// A developer field entry of a definition record.
///
/// Name and base type are unknown at definition time; they are filled in
/// from a previously seen FIELD_DESCRIPTION data record.
#[derive(Debug, Clone, PartialEq)]
pub struct DevFieldDefinition {
    pub field_number: u8,
    pub size: usize,
    pub developer_data_index: u8,
    pub base_type: BaseType,
    pub name: String,
}

/// The schema for one local message type: byte order, global message
/// identity and the ordered field list that fixes every data record's layout
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDefinition {
    pub header: RecordHeader,
    pub byte_order: ByteOrder,
    pub global_message_number: u16,
    pub global_name: String,
    pub field_definitions: Vec<FieldDefinition>,
    pub dev_field_definitions: Vec<DevFieldDefinition>,
}

impl RecordDefinition {
    /// Build an output-mode definition from the registry
    pub fn new(
        local_message_type: u8,
        global_message_number: u16,
        field_numbers: &[u8],
    ) -> Result<Self, FitError> {
        let global = profile::global_definition(global_message_number).ok_or_else(|| {
            FitError::MalformedDefinition(format!(
                "global message {global_message_number} is not in the registry"
            ))
        })?;
        let mut field_definitions = Vec::with_capacity(field_numbers.len());
        for &number in field_numbers {
            let spec = global
                .field(number)
                .ok_or(FitError::UnknownFieldNumber(number))?;
            field_definitions.push(FieldDefinition::from_spec(
                spec,
                GlobalDefinition::field_size(spec),
            ));
        }
        Ok(RecordDefinition {
            header: RecordHeader::definition(local_message_type, false),
            byte_order: ByteOrder::LittleEndian,
            global_message_number,
            global_name: global.name.to_string(),
            field_definitions,
            dev_field_definitions: Vec::new(),
        })
    }

    /// Parse a definition record body (the header byte is already consumed)
    pub fn parse(reader: &mut ByteReader, header: RecordHeader) -> Result<Self, FitError> {
        reader.read_u8()?; // reserved
        let arch = reader.read_u8()?;
        let byte_order = ByteOrder::from_arch(arch)
            .ok_or_else(|| FitError::MalformedDefinition(format!("architecture byte {arch}")))?;
        reader.set_byte_order(byte_order);
        let global_message_number = reader.read_u16()?;
        let global = profile::global_definition(global_message_number);

        let field_count = reader.read_u8()?;
        let mut field_definitions = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let number = reader.read_u8()?;
            let size = reader.read_u8()? as usize;
            let base_type_id = reader.read_u8()?;
            let base_type = match BaseType::from_identifier(base_type_id) {
                Some(base_type) => base_type,
                None => {
                    warn!(
                        "Unknown base type {base_type_id:#04x} for field {number} of message {global_message_number}, treating as bytes"
                    );
                    BaseType::Byte
                }
            };
            let definition = match global.and_then(|g| g.field_sized(number, size)) {
                Some(spec) => FieldDefinition {
                    // the wire's base type wins over the registry's
                    base_type,
                    ..FieldDefinition::from_spec(spec, size)
                },
                None => FieldDefinition::unknown(number, size, base_type),
            };
            field_definitions.push(definition);
        }

        let mut dev_field_definitions = Vec::new();
        if header.has_developer_data() {
            let dev_count = reader.read_u8()?;
            for _ in 0..dev_count {
                let field_number = reader.read_u8()?;
                let size = reader.read_u8()? as usize;
                let developer_data_index = reader.read_u8()?;
                dev_field_definitions.push(DevFieldDefinition {
                    field_number,
                    size,
                    developer_data_index,
                    base_type: BaseType::Byte,
                    name: format!("dev_{developer_data_index}_{field_number}"),
                });
            }
        }

        Ok(RecordDefinition {
            header,
            byte_order,
            global_message_number,
            global_name: profile::global_message_name(global_message_number),
            field_definitions,
            dev_field_definitions,
        })
    }

    /// Serialize the definition record, header byte included
    pub fn generate(&self, writer: &mut ByteWriter) {
        writer.write_u8(self.header.to_byte());
        writer.write_u8(0); // reserved
        writer.write_u8(self.byte_order.arch());
        let previous_order = writer.byte_order();
        writer.set_byte_order(self.byte_order);
        writer.write_u16(self.global_message_number);
        writer.set_byte_order(previous_order);
        writer.write_u8(self.field_definitions.len() as u8);
        for field in &self.field_definitions {
            writer.write_u8(field.number);
            writer.write_u8(field.size as u8);
            writer.write_u8(field.base_type.identifier());
        }
        if self.header.has_developer_data() {
            writer.write_u8(self.dev_field_definitions.len() as u8);
            for dev in &self.dev_field_definitions {
                writer.write_u8(dev.field_number);
                writer.write_u8(dev.size as u8);
                writer.write_u8(dev.developer_data_index);
            }
        }
    }

    /// Resolve developer field names and base types from a previously parsed
    /// FIELD_DESCRIPTION data record
    pub fn populate_dev_fields(&mut self, description: &RecordData) {
        let index = description
            .get_field_by_number(0)
            .and_then(|v| v.as_i64())
            .map(|v| v as u8);
        let number = description
            .get_field_by_number(1)
            .and_then(|v| v.as_i64())
            .map(|v| v as u8);
        let (Some(index), Some(number)) = (index, number) else {
            return;
        };
        for dev in &mut self.dev_field_definitions {
            if dev.developer_data_index != index || dev.field_number != number {
                continue;
            }
            if let Some(base_type) = description
                .get_field_by_number(2)
                .and_then(|v| v.as_i64())
                .and_then(|id| BaseType::from_identifier(id as u8))
            {
                dev.base_type = base_type;
            }
            if let Some(Value::Text(name)) = description.get_field_by_number(3) {
                dev.name = name;
            }
        }
    }

    /// Total byte size of one data record built from this definition
    pub fn data_size(&self) -> usize {
        self.field_definitions.iter().map(|f| f.size).sum::<usize>()
            + self.dev_field_definitions.iter().map(|f| f.size).sum::<usize>()
    }

    pub fn local_message_type(&self) -> u8 {
        self.header.local_message_type()
    }
}

#[derive(Debug)]
struct FieldSlot {
    position: usize,
    definition: FieldDefinition,
}

/// A fixed-size byte block bound to one [`RecordDefinition`].
///
/// Every field slot is invalidated at construction; values are set and read
/// through the owning definition's field list, by name or number.
pub struct RecordData {
    definition: Arc<RecordDefinition>,
    header: RecordHeader,
    slots: Vec<FieldSlot>,
    values: Vec<u8>,
    /// Running timestamp for this record: field 253 when present, otherwise
    /// the reference carried from earlier records (compressed or not)
    pub computed_timestamp: Option<i64>,
}

impl RecordData {
    pub fn new(definition: Arc<RecordDefinition>) -> Self {
        let header = RecordHeader::data(definition.local_message_type());
        Self::with_header(definition, header)
    }

    /// Bind to a definition under an explicit data header (compressed
    /// headers keep their time offset this way)
    pub fn with_header(definition: Arc<RecordDefinition>, header: RecordHeader) -> Self {
        let mut slots = Vec::new();
        let mut position = 0;
        let mut writer = ByteWriter::with_byte_order(definition.byte_order);
        for field in &definition.field_definitions {
            field.write_invalid(&mut writer);
            slots.push(FieldSlot {
                position,
                definition: field.clone(),
            });
            position += field.size;
        }
        for dev in &definition.dev_field_definitions {
            let field =
                FieldDefinition::named(dev.field_number, dev.size, dev.base_type, &dev.name);
            field.write_invalid(&mut writer);
            slots.push(FieldSlot {
                position,
                definition: field,
            });
            position += dev.size;
        }
        RecordData {
            definition,
            header,
            slots,
            values: writer.into_bytes(),
            computed_timestamp: None,
        }
    }

    pub fn definition(&self) -> &Arc<RecordDefinition> {
        &self.definition
    }

    pub fn header(&self) -> RecordHeader {
        self.header
    }

    pub fn global_message_number(&self) -> u16 {
        self.definition.global_message_number
    }

    /// Consume this record's bytes from the cursor. Returns the decoded
    /// timestamp when the record carries field 253, re-establishing the
    /// parser's running reference.
    pub fn parse_data(&mut self, reader: &mut ByteReader) -> Result<Option<i64>, FitError> {
        let block = reader.read_bytes(self.values.len())?;
        self.values.copy_from_slice(block);
        let reference = self.timestamp_field_value();
        if reference.is_some() {
            self.computed_timestamp = reference;
        }
        Ok(reference)
    }

    /// Serialize the data record, header byte included
    pub fn generate(&self, writer: &mut ByteWriter) {
        writer.write_u8(self.header.to_byte());
        writer.write_bytes(&self.values);
    }

    fn timestamp_field_value(&self) -> Option<i64> {
        let slot = self.slots.iter().find(|s| s.definition.number == 253)?;
        let value = self.decode_slot(slot)?.as_i64()?;
        // normalize to Unix seconds when the schema did not mark the field
        if slot.definition.kind == FieldKind::Timestamp {
            Some(value)
        } else {
            Some(value + GARMIN_EPOCH_OFFSET)
        }
    }

    fn decode_slot(&self, slot: &FieldSlot) -> Option<Value> {
        let range = slot.position..slot.position + slot.definition.size;
        let mut reader = ByteReader::new(&self.values[range]);
        reader.set_byte_order(self.definition.byte_order);
        slot.definition.decode(&mut reader).ok().flatten()
    }

    fn encode_slot(&mut self, index: usize, value: &Value) -> Result<(), FitError> {
        let slot = &self.slots[index];
        let mut writer = ByteWriter::with_byte_order(self.definition.byte_order);
        if !slot.definition.encode(&mut writer, value) {
            return Err(FitError::ValueMismatch(slot.definition.name.clone()));
        }
        let encoded = writer.into_bytes();
        debug_assert_eq!(encoded.len(), slot.definition.size);
        let position = slot.position;
        self.values[position..position + encoded.len()].copy_from_slice(&encoded);
        Ok(())
    }

    pub fn get_field_by_number(&self, number: u8) -> Option<Value> {
        let slot = self.slots.iter().find(|s| s.definition.number == number)?;
        self.decode_slot(slot)
    }

    pub fn get_field_by_name(&self, name: &str) -> Option<Value> {
        let slot = self.slots.iter().find(|s| s.definition.name == name)?;
        self.decode_slot(slot)
    }

    pub fn set_field_by_number(&mut self, number: u8, value: Value) -> Result<(), FitError> {
        let index = self
            .slots
            .iter()
            .position(|s| s.definition.number == number)
            .ok_or(FitError::UnknownFieldNumber(number))?;
        self.encode_slot(index, &value)
    }

    pub fn set_field_by_name(&mut self, name: &str, value: Value) -> Result<(), FitError> {
        let index = self
            .slots
            .iter()
            .position(|s| s.definition.name == name)
            .ok_or_else(|| FitError::UnknownFieldName(name.to_string()))?;
        self.encode_slot(index, &value)
    }

    pub fn field_numbers(&self) -> Vec<u8> {
        self.slots.iter().map(|s| s.definition.number).collect()
    }
}

impl std::fmt::Debug for RecordData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut builder = f.debug_struct(&self.definition.global_name);
        if let Some(ts) = self.computed_timestamp {
            builder.field("computed_timestamp", &ts);
        }
        for slot in &self.slots {
            match self.decode_slot(slot) {
                Some(value) => builder.field(&slot.definition.name, &value.to_string()),
                None => builder.field(&slot.definition.name, &"<invalid>"),
            };
        }
        builder.finish()
    }
}
