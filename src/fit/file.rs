//! FIT file container: header, record stream and trailing checksum

use std::collections::HashMap;
use std::sync::Arc;

use log::trace;

use crate::checksum::compute_crc;
use crate::fit::profile;
use crate::fit::record::{RecordData, RecordDefinition, RecordHeader};
use crate::fit::FitError;
use crate::reader::{ByteOrder, ByteReader, ByteWriter};

/// `.FIT` as a little-endian u32
pub const FIT_MAGIC: u32 = 0x5449_462E;

const PROTOCOL_VERSION: u8 = 16;
const PROFILE_VERSION: u16 = 21117;

/// The 12- or 14-byte file header.
///
/// The 14-byte form appends a CRC-16 over the first 12 bytes; a zero CRC
/// field means "not computed" and is accepted without verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitFileHeader {
    pub has_crc: bool,
    pub protocol_version: u8,
    pub profile_version: u16,
    pub data_size: u32,
}

impl FitFileHeader {
    pub fn new(has_crc: bool, protocol_version: u8, profile_version: u16) -> Self {
        FitFileHeader {
            has_crc,
            protocol_version,
            profile_version,
            data_size: 0,
        }
    }

    pub fn header_size(&self) -> usize {
        if self.has_crc {
            14
        } else {
            12
        }
    }

    /// Parse the header from the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self, FitError> {
        let mut reader = ByteReader::new(bytes);
        let header_size = reader.read_u8()?;
        if header_size < 12 {
            return Err(FitError::MalformedHeader(format!(
                "declared header size {header_size}"
            )));
        }
        if header_size != 12 && header_size != 14 {
            return Err(FitError::MalformedHeader(format!(
                "unsupported header size {header_size}"
            )));
        }
        let protocol_version = reader.read_u8()?;
        let profile_version = reader.read_u16()?;
        let data_size = reader.read_u32()?;
        let magic = reader.read_u32()?;
        if magic != FIT_MAGIC {
            return Err(FitError::MalformedHeader(format!("magic {magic:#010x}")));
        }
        let has_crc = header_size == 14;
        if has_crc {
            let declared = reader.read_u16()?;
            if declared != 0 {
                let computed = compute_crc(0, &bytes[..12]);
                if declared != computed {
                    return Err(FitError::HeaderChecksumMismatch {
                        expected: computed,
                        got: declared,
                    });
                }
            }
        }
        Ok(FitFileHeader {
            has_crc,
            protocol_version,
            profile_version,
            data_size,
        })
    }

    /// Serialize the header. Must be written at the start of `writer` so the
    /// optional header CRC covers the right bytes.
    pub fn generate(&self, writer: &mut ByteWriter) {
        writer.set_byte_order(ByteOrder::LittleEndian);
        writer.write_u8(self.header_size() as u8);
        writer.write_u8(self.protocol_version);
        writer.write_u16(self.profile_version);
        writer.write_u32(self.data_size);
        writer.write_u32(FIT_MAGIC);
        if self.has_crc {
            let crc = compute_crc(0, writer.bytes());
            writer.write_u16(crc);
        }
    }
}

/// A parsed or under-construction FIT file.
///
/// Files obtained from [`FitFile::parse`] are read-only; only files built in
/// output mode from [`FitFile::new`] can be serialized.
#[derive(Debug)]
pub struct FitFile {
    header: FitFileHeader,
    records: Vec<RecordData>,
    can_generate: bool,
}

impl FitFile {
    /// Build a file in output mode from a record list
    pub fn new(records: Vec<RecordData>) -> Self {
        FitFile {
            header: FitFileHeader::new(true, PROTOCOL_VERSION, PROFILE_VERSION),
            records,
            can_generate: true,
        }
    }

    pub fn header(&self) -> &FitFileHeader {
        &self.header
    }

    pub fn records(&self) -> &[RecordData] {
        &self.records
    }

    pub fn records_by_global(&self, global_message_number: u16) -> Vec<&RecordData> {
        self.records
            .iter()
            .filter(|r| r.global_message_number() == global_message_number)
            .collect()
    }

    /// Parse a whole file, verifying the trailing CRC over the body
    pub fn parse(bytes: &[u8]) -> Result<Self, FitError> {
        let header = FitFileHeader::parse(bytes)?;
        let header_size = header.header_size();
        let body_end = header_size + header.data_size as usize;
        if bytes.len() < body_end + 2 {
            return Err(FitError::UnexpectedEndOfData);
        }

        let mut reader = ByteReader::new(bytes);
        reader.skip(header_size)?;

        // definitions may be replaced mid-stream; the last one for a local
        // message type wins for subsequent data records
        let mut definitions: HashMap<u8, Arc<RecordDefinition>> = HashMap::new();
        let mut records: Vec<RecordData> = Vec::new();
        let mut reference_timestamp: Option<i64> = None;

        while reader.position() < body_end {
            reader.set_byte_order(ByteOrder::LittleEndian);
            let record_header = RecordHeader::from_byte(reader.read_u8()?);

            if let Some(offset) = record_header.time_offset() {
                let reference = reference_timestamp
                    .ok_or(FitError::CompressedTimestampWithoutReference)?;
                let offset = offset as i64;
                reference_timestamp = Some(if offset >= (reference & 0x1F) {
                    (reference & !0x1F) + offset
                } else {
                    (reference & !0x1F) + offset + 0x20
                });
            }

            if record_header.is_definition() {
                let mut definition = RecordDefinition::parse(&mut reader, record_header)?;
                if record_header.has_developer_data() {
                    for record in &records {
                        if record.global_message_number() == profile::FIELD_DESCRIPTION {
                            definition.populate_dev_fields(record);
                        }
                    }
                }
                trace!(
                    "Definition for local type {}: {} ({} bytes)",
                    record_header.local_message_type(),
                    definition.global_name,
                    definition.data_size()
                );
                definitions.insert(record_header.local_message_type(), Arc::new(definition));
            } else {
                let definition = definitions
                    .get(&record_header.local_message_type())
                    .ok_or_else(|| {
                        FitError::UndefinedLocalMessageType(record_header.local_message_type())
                    })?
                    .clone();
                let mut record = RecordData::with_header(definition, record_header);
                record.computed_timestamp = reference_timestamp;
                if let Some(timestamp) = record.parse_data(&mut reader)? {
                    reference_timestamp = Some(timestamp);
                }
                records.push(record);
            }
        }

        reader.set_byte_order(ByteOrder::LittleEndian);
        let declared = reader.read_u16()?;
        let computed = compute_crc(0, &bytes[header_size..body_end]);
        if declared != computed {
            return Err(FitError::BodyChecksumMismatch {
                expected: computed,
                got: declared,
            });
        }

        Ok(FitFile {
            header,
            records,
            can_generate: false,
        })
    }

    /// Serialize an output-mode file: definitions interleaved with their
    /// data records, header data size finalized, trailing CRC over the body
    pub fn generate(&self) -> Result<Vec<u8>, FitError> {
        if !self.can_generate {
            return Err(FitError::GenerateNotSupported);
        }

        let mut body = ByteWriter::with_byte_order(ByteOrder::LittleEndian);
        let mut previous: Option<&Arc<RecordDefinition>> = None;
        for record in &self.records {
            let definition = record.definition();
            if !previous.is_some_and(|prev| Arc::ptr_eq(prev, definition)) {
                definition.generate(&mut body);
                previous = Some(definition);
            }
            record.generate(&mut body);
        }

        let mut header = self.header;
        header.data_size = body.len() as u32;

        let mut writer = ByteWriter::with_byte_order(ByteOrder::LittleEndian);
        header.generate(&mut writer);
        writer.write_bytes(body.bytes());
        let crc = compute_crc(0, body.bytes());
        writer.write_u16(crc);
        Ok(writer.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::base_type::Value;
    use crate::fit::profile;

    fn header_with_crc(mut bytes: Vec<u8>) -> Vec<u8> {
        let crc = compute_crc(0, &bytes[..12]);
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    #[test]
    fn test_parse_example_header() {
        let bytes = header_with_crc(vec![
            0x0E, 0x10, 0x15, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2E, 0x46, 0x49, 0x54,
        ]);
        let header = FitFileHeader::parse(&bytes).unwrap();
        assert_eq!(header.header_size(), 14);
        assert_eq!(header.protocol_version, 16);
        assert_eq!(header.profile_version, 21);
        assert!(header.has_crc);
        assert_eq!(header.data_size, 0);
    }

    #[test]
    fn test_parse_header_zero_crc_accepted() {
        let mut bytes = vec![
            0x0E, 0x10, 0x15, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2E, 0x46, 0x49, 0x54,
        ];
        bytes.extend_from_slice(&[0x00, 0x00]);
        assert!(FitFileHeader::parse(&bytes).is_ok());
    }

    #[test]
    fn test_parse_header_bad_magic() {
        let bytes = header_with_crc(vec![
            0x0E, 0x10, 0x15, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2E, 0x46, 0x49, 0x2E,
        ]);
        assert!(matches!(
            FitFileHeader::parse(&bytes),
            Err(FitError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_parse_header_too_short() {
        let bytes = [0x0B, 0x10, 0x15, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2E, 0x46, 0x49, 0x54];
        assert!(matches!(
            FitFileHeader::parse(&bytes),
            Err(FitError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_parse_header_crc_mismatch() {
        let mut bytes = vec![
            0x0E, 0x10, 0x15, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2E, 0x46, 0x49, 0x54,
        ];
        bytes.extend_from_slice(&[0x34, 0x12]);
        assert!(matches!(
            FitFileHeader::parse(&bytes),
            Err(FitError::HeaderChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_twelve_byte_header() {
        let bytes = [0x0C, 0x10, 0x15, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2E, 0x46, 0x49, 0x54];
        let header = FitFileHeader::parse(&bytes).unwrap();
        assert!(!header.has_crc);
        assert_eq!(header.header_size(), 12);
    }

    fn weather_file() -> FitFile {
        let definition = Arc::new(
            RecordDefinition::new(0, profile::WEATHER, &[253, 1, 2, 7, 8]).unwrap(),
        );
        let mut first = RecordData::new(definition.clone());
        first
            .set_field_by_name("timestamp", Value::Int(1_700_000_000))
            .unwrap();
        first.set_field_by_name("temperature", Value::Int(-4)).unwrap();
        first.set_field_by_name("condition", Value::Int(4)).unwrap();
        first
            .set_field_by_name("relative_humidity", Value::Int(81))
            .unwrap();
        first
            .set_field_by_name("location", Value::Text("Fort William".into()))
            .unwrap();
        let mut second = RecordData::new(definition);
        second
            .set_field_by_name("timestamp", Value::Int(1_700_003_600))
            .unwrap();
        second.set_field_by_name("temperature", Value::Int(-2)).unwrap();
        FitFile::new(vec![first, second])
    }

    #[test]
    fn test_generate_parse_roundtrip() {
        let bytes = weather_file().generate().unwrap();
        let parsed = FitFile::parse(&bytes).unwrap();
        assert_eq!(parsed.records().len(), 2);

        let first = &parsed.records()[0];
        assert_eq!(first.global_message_number(), profile::WEATHER);
        assert_eq!(
            first.get_field_by_name("timestamp"),
            Some(Value::Int(1_700_000_000))
        );
        assert_eq!(first.get_field_by_name("temperature"), Some(Value::Int(-4)));
        assert_eq!(
            first.get_field_by_name("location"),
            Some(Value::Text("Fort William".into()))
        );
        assert_eq!(first.computed_timestamp, Some(1_700_000_000));

        let second = &parsed.records()[1];
        assert_eq!(second.get_field_by_name("temperature"), Some(Value::Int(-2)));
        // location was never set on the second record
        assert_eq!(second.get_field_by_name("location"), None);
        assert_eq!(second.computed_timestamp, Some(1_700_003_600));
    }

    #[test]
    fn test_generate_emits_single_definition_per_run() {
        let bytes = weather_file().generate().unwrap();
        let parsed = FitFile::parse(&bytes).unwrap();
        // both records decoded against one shared definition
        assert!(Arc::ptr_eq(
            parsed.records()[0].definition(),
            parsed.records()[1].definition()
        ));
    }

    #[test]
    fn test_parsed_file_cannot_generate() {
        let bytes = weather_file().generate().unwrap();
        let parsed = FitFile::parse(&bytes).unwrap();
        assert_eq!(parsed.generate(), Err(FitError::GenerateNotSupported));
    }

    #[test]
    fn test_body_crc_mismatch() {
        let mut bytes = weather_file().generate().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            FitFile::parse(&bytes),
            Err(FitError::BodyChecksumMismatch { .. })
        ));
    }

    fn raw_file(body: &[u8]) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        let mut header = FitFileHeader::new(true, 16, 21);
        header.data_size = body.len() as u32;
        header.generate(&mut writer);
        writer.write_bytes(body);
        writer.write_u16(compute_crc(0, body));
        writer.into_bytes()
    }

    #[test]
    fn test_redefinition_last_writer_wins() {
        // same local message type defined twice: FILE_ID then SLEEP_STAGE
        let mut body = ByteWriter::new();
        let file_id = RecordDefinition::new(0, profile::FILE_ID, &[0]).unwrap();
        file_id.generate(&mut body);
        let mut record = RecordData::new(Arc::new(file_id));
        record.set_field_by_number(0, Value::Int(4)).unwrap();
        record.generate(&mut body);

        let sleep = RecordDefinition::new(0, profile::SLEEP_STAGE, &[253, 0]).unwrap();
        sleep.generate(&mut body);
        let mut record = RecordData::new(Arc::new(sleep));
        record.set_field_by_number(253, Value::Int(1_700_000_000)).unwrap();
        record.set_field_by_number(0, Value::Int(3)).unwrap();
        record.generate(&mut body);

        let parsed = FitFile::parse(&raw_file(body.bytes())).unwrap();
        assert_eq!(parsed.records().len(), 2);
        assert_eq!(parsed.records()[0].global_message_number(), profile::FILE_ID);
        assert_eq!(
            parsed.records()[1].global_message_number(),
            profile::SLEEP_STAGE
        );
        assert_eq!(
            parsed.records()[1].get_field_by_name("sleep_stage"),
            Some(Value::Int(3))
        );
    }

    #[test]
    fn test_data_record_without_definition() {
        let body = [0x00u8]; // data record for never-defined local type 0
        assert!(matches!(
            FitFile::parse(&raw_file(&body)),
            Err(FitError::UndefinedLocalMessageType(0))
        ));
    }

    #[test]
    fn test_compressed_timestamps_accumulate() {
        let base = crate::fit::field::GARMIN_EPOCH_OFFSET + 1000;

        let mut body = ByteWriter::new();
        let with_ts = RecordDefinition::new(0, profile::MONITORING, &[253, 27]).unwrap();
        with_ts.generate(&mut body);
        let plain = Arc::new(RecordDefinition::new(1, profile::MONITORING, &[27]).unwrap());
        plain.generate(&mut body);

        let mut reference = RecordData::new(Arc::new(with_ts));
        reference.set_field_by_number(253, Value::Int(base)).unwrap();
        reference.set_field_by_number(27, Value::Int(70)).unwrap();
        reference.generate(&mut body);

        // base % 32 == 8; offset 10 rolls forward within the window
        let header = RecordHeader::from_byte(0x80 | (1 << 5) | 10);
        let mut compressed = RecordData::with_header(plain.clone(), header);
        compressed.set_field_by_number(27, Value::Int(71)).unwrap();
        compressed.generate(&mut body);

        // reference % 32 is now 10; offset 5 wraps into the next window
        let header = RecordHeader::from_byte(0x80 | (1 << 5) | 5);
        let mut wrapped = RecordData::with_header(plain, header);
        wrapped.set_field_by_number(27, Value::Int(72)).unwrap();
        wrapped.generate(&mut body);

        let parsed = FitFile::parse(&raw_file(body.bytes())).unwrap();
        assert_eq!(parsed.records().len(), 3);
        assert_eq!(parsed.records()[0].computed_timestamp, Some(base));
        assert_eq!(parsed.records()[1].computed_timestamp, Some(base + 2));
        assert_eq!(parsed.records()[2].computed_timestamp, Some(base + 29));
    }

    #[test]
    fn test_compressed_timestamp_without_reference() {
        let mut body = ByteWriter::new();
        let plain = RecordDefinition::new(1, profile::MONITORING, &[27]).unwrap();
        plain.generate(&mut body);
        let header = RecordHeader::from_byte(0x80 | (1 << 5) | 3);
        let record = RecordData::with_header(Arc::new(plain), header);
        record.generate(&mut body);

        assert_eq!(
            FitFile::parse(&raw_file(body.bytes())).unwrap_err(),
            FitError::CompressedTimestampWithoutReference
        );
    }

    #[test]
    fn test_developer_fields_harvested_from_description() {
        let mut body = ByteWriter::new();

        let desc_def = RecordDefinition::new(0, profile::FIELD_DESCRIPTION, &[0, 1, 2, 3]).unwrap();
        desc_def.generate(&mut body);
        let mut description = RecordData::new(Arc::new(desc_def));
        description.set_field_by_number(0, Value::Int(0)).unwrap();
        description.set_field_by_number(1, Value::Int(5)).unwrap();
        description
            .set_field_by_number(2, Value::Int(crate::fit::BaseType::Uint8.identifier() as i64))
            .unwrap();
        description
            .set_field_by_number(3, Value::Text("stride_len".into()))
            .unwrap();
        description.generate(&mut body);

        let mut dev_def = RecordDefinition::new(1, profile::RECORD, &[3]).unwrap();
        dev_def.header = RecordHeader::definition(1, true);
        dev_def.dev_field_definitions.push(
            crate::fit::DevFieldDefinition {
                field_number: 5,
                size: 1,
                developer_data_index: 0,
                base_type: crate::fit::BaseType::Uint8,
                name: "dev_0_5".into(),
            },
        );
        dev_def.generate(&mut body);
        let mut record = RecordData::new(Arc::new(dev_def));
        record.set_field_by_number(3, Value::Int(140)).unwrap();
        record.set_field_by_number(5, Value::Int(97)).unwrap();
        record.generate(&mut body);

        let parsed = FitFile::parse(&raw_file(body.bytes())).unwrap();
        let last = parsed.records().last().unwrap();
        assert_eq!(last.get_field_by_name("stride_len"), Some(Value::Int(97)));
        assert_eq!(last.get_field_by_name("heart_rate"), Some(Value::Int(140)));
    }
}
