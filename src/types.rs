//! Common types, events, and error definitions for the GFDI protocol stack

use thiserror::Error;

use crate::file_transfer::{DirectoryEntry, FileType};
use crate::fit::FitError;
use crate::reader::EndOfData;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, GarminError>;

/// Error types for GFDI communication and transfers
#[derive(Error, Debug)]
pub enum GarminError {
    #[error(transparent)]
    EndOfData(#[from] EndOfData),

    #[error("Packet too short: {0} bytes")]
    PacketTooShort(usize),

    #[error("Packet length field says {declared}, got {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Packet checksum mismatch: expected {expected:#06x}, got {got:#06x}")]
    ChecksumMismatch { expected: u16, got: u16 },

    #[error("No file transfer in progress")]
    UnexpectedFileTransfer,

    #[error("Transfer offset mismatch: expected {expected}, got {got}")]
    OffsetMismatch { expected: u32, got: u32 },

    #[error("Chunk checksum mismatch: expected {expected:#06x}, got {got:#06x}")]
    ChunkChecksumMismatch { expected: u16, got: u16 },

    #[error("Directory payload length {0} is not a multiple of 16")]
    InvalidDirectoryLength(usize),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("FIT error: {0}")]
    Fit(#[from] FitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Device-facing events surfaced by the protocol handlers.
///
/// The orchestrator consumes some of these itself (directory listings feed
/// the download queue) and forwards the rest to the external event sink.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Battery state reported through the device-status protobuf service
    BatteryLevel { percent: u8, charging: bool },
    /// The watch asked for a weather update for a location
    WeatherRequest {
        latitude: f64,
        longitude: f64,
        hours: u8,
    },
    /// The watch asked the phone to make itself findable (or stop)
    FindPhone { start: bool },
    /// The watch toggled its interest in app notifications
    NotificationSubscription { enabled: bool },
    /// The user triggered a notification action on the watch
    NotificationAction {
        notification_id: i32,
        action_id: u8,
        reply: Option<String>,
    },
    /// The directory file finished downloading and was parsed
    DirectoryEntries(Vec<DirectoryEntry>),
    /// A device file finished downloading and was persisted
    FileDownloaded { path: String, file_type: FileType },
    /// A download was abandoned mid-flight; the reason is the rendered error
    DownloadFailed { file_index: u16, reason: String },
    /// The watch reported which file types it can exchange
    SupportedFileTypes(Vec<FileType>),
    /// An upload finished and the device confirmed the sync
    SyncComplete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GarminError::OffsetMismatch {
            expected: 500,
            got: 0,
        };
        assert_eq!(
            err.to_string(),
            "Transfer offset mismatch: expected 500, got 0"
        );

        let err = GarminError::InvalidDirectoryLength(17);
        assert_eq!(
            err.to_string(),
            "Directory payload length 17 is not a multiple of 16"
        );
    }

    #[test]
    fn test_end_of_data_conversion() {
        let err: GarminError = EndOfData {
            wanted: 4,
            remaining: 1,
        }
        .into();
        assert!(matches!(err, GarminError::EndOfData(_)));
    }
}
