//! FIT binary codec: base types, field and record definitions, whole files
//!
//! A FIT file is a 12- or 14-byte header followed by a stream of definition
//! and data records and a trailing CRC-16. Definition records establish the
//! schema (byte order, global message number, ordered field list) for a local
//! message type; data records are fixed-size byte blocks decoded against the
//! definition currently bound to their local message type. Semantic field
//! names and value mappings come from the global-message registry in
//! [`profile`].

pub mod base_type;
pub mod field;
pub mod file;
pub mod profile;
pub mod record;

pub use base_type::{BaseType, Value};
pub use field::{FieldDefinition, FieldKind, GARMIN_EPOCH_OFFSET};
pub use file::{FitFile, FitFileHeader};
pub use profile::{global_definition, FieldSpec, GlobalDefinition};
pub use record::{DevFieldDefinition, RecordData, RecordDefinition, RecordHeader};

use thiserror::Error;

use crate::reader::EndOfData;

/// Errors raised by the FIT codec.
///
/// Header and checksum failures are fatal to the current parse and are never
/// retried; the remaining variants indicate misuse of the API (unknown field
/// names, generating a parsed file) rather than malformed input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Malformed FIT header: {0}")]
    MalformedHeader(String),

    #[error("FIT header checksum mismatch: expected {expected:#06x}, got {got:#06x}")]
    HeaderChecksumMismatch { expected: u16, got: u16 },

    #[error("FIT file checksum mismatch: expected {expected:#06x}, got {got:#06x}")]
    BodyChecksumMismatch { expected: u16, got: u16 },

    #[error("Compressed timestamp before any reference timestamp")]
    CompressedTimestampWithoutReference,

    #[error("Data record for undefined local message type {0}")]
    UndefinedLocalMessageType(u8),

    #[error("Malformed record definition: {0}")]
    MalformedDefinition(String),

    #[error("Unexpected end of data")]
    UnexpectedEndOfData,

    #[error("Generation of a previously parsed FIT file is not supported")]
    GenerateNotSupported,

    #[error("Unknown field name {0}")]
    UnknownFieldName(String),

    #[error("Unknown field number {0}")]
    UnknownFieldNumber(u8),

    #[error("Value does not fit field {0}")]
    ValueMismatch(String),

    #[error("Too many elements for field {0}")]
    TooManyElements(String),
}

impl From<EndOfData> for FitError {
    fn from(_: EndOfData) -> Self {
        FitError::UnexpectedEndOfData
    }
}
