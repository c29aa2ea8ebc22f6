//! Garmin GFDI wire protocol
//!
//! This library implements the phone side of the GFDI protocol spoken by
//! Garmin wearables: framed messages with CRC-16 checksums, the FIT file
//! codec with its dynamic record schemas, file download and upload state
//! machines, notification forwarding, and the chunked protobuf transport
//! with its Smart service envelope.
//!
//! # Modules
//!
//! - `checksum`: the CRC-16 used by both the packet framing and FIT files
//! - `reader`: endian-aware byte cursor and builder
//! - `fit`: FIT file header, record and field codec plus the message profile
//! - `messages`: GFDI packet parsing and generation
//! - `file_transfer`: directory listing, downloads and uploads
//! - `notifications`: bounded notification queue and attribute upload
//! - `protobuf`: fragment reassembly and Smart service routing
//! - `device`: per-connection orchestration and the transport seams

pub mod checksum;
pub mod device;
pub mod file_transfer;
pub mod fit;
pub mod messages;
pub mod notifications;
pub mod protobuf;
pub mod reader;
pub mod types;

pub use checksum::compute_crc;
pub use device::{
    DeviceSession, EventSink, FileStore, HandlerOutcome, MessageHandler, PhoneIdentity, Transport,
    WeatherReport,
};
pub use file_transfer::{
    parse_directory, DirectoryEntry, FileTransferHandler, FileType, MIN_BLOCK_SIZE,
};
pub use fit::{
    BaseType, FieldDefinition, FitError, FitFile, FitFileHeader, RecordData, RecordDefinition,
    Value, GARMIN_EPOCH_OFFSET,
};
pub use messages::{
    GfdiMessage, MessageGenerator, MessageId, MessageParser, NotificationAttribute, Status,
    SystemEventType, GFDI_DEFAULT_PACKET_SIZE,
};
pub use notifications::{
    Notification, NotificationAction, NotificationKind, NotificationsHandler,
    MAX_QUEUED_NOTIFICATIONS,
};
pub use protobuf::{CalendarEvent, CalendarProvider, ProtobufHandler, PROTOBUF_CHUNK_SIZE};
pub use reader::{ByteOrder, ByteReader, ByteWriter};
pub use types::{DeviceEvent, GarminError, Result};
