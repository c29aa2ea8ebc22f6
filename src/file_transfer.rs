//! File download and upload over GFDI
//!
//! Downloads are phone-initiated: a `DownloadRequest` is answered with a
//! status carrying the file size, then the device pushes `FileTransferData`
//! chunks which we acknowledge one by one. Uploads run the other way:
//! `CreateFile`, then `UploadRequest`, then we push chunks and advance on
//! each transfer-data status. Both directions are single-flight and carry a
//! running CRC across chunks.

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::checksum::compute_crc;
use crate::device::{FileStore, HandlerOutcome, MessageHandler};
use crate::fit::GARMIN_EPOCH_OFFSET;
use crate::messages::{GfdiMessage, MessageGenerator, Status, SystemEventType};
use crate::reader::ByteReader;
use crate::types::{DeviceEvent, GarminError, Result};

/// Smallest chunk ceiling used regardless of the negotiated packet size
pub const MIN_BLOCK_SIZE: usize = 500;

const DIRECTORY_ENTRY_SIZE: usize = 16;

const TRANSFER_OK: u8 = 0;
const TRANSFER_ABORT: u8 = 2;
const TRANSFER_CRC_MISMATCH: u8 = 3;
const TRANSFER_OFFSET_MISMATCH: u8 = 4;

/// File kinds addressed by (data type, sub type) pairs on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Directory,
    Settings,
    Sport,
    Activity,
    Monitor,
    Changelog,
    Metrics,
    Sleep,
    SkinTemp,
}

impl FileType {
    pub fn from_data_type_sub_type(data_type: u8, sub_type: u8) -> Option<Self> {
        match (data_type, sub_type) {
            (0, 0) => Some(FileType::Directory),
            (128, 2) => Some(FileType::Settings),
            (128, 3) => Some(FileType::Sport),
            (128, 4) => Some(FileType::Activity),
            (128, 32) => Some(FileType::Monitor),
            (128, 41) => Some(FileType::Changelog),
            (128, 44) => Some(FileType::Metrics),
            (128, 49) => Some(FileType::Sleep),
            (128, 73) => Some(FileType::SkinTemp),
            _ => None,
        }
    }

    pub fn data_type(self) -> u8 {
        match self {
            FileType::Directory => 0,
            _ => 128,
        }
    }

    pub fn sub_type(self) -> u8 {
        match self {
            FileType::Directory => 0,
            FileType::Settings => 2,
            FileType::Sport => 3,
            FileType::Activity => 4,
            FileType::Monitor => 32,
            FileType::Changelog => 41,
            FileType::Metrics => 44,
            FileType::Sleep => 49,
            FileType::SkinTemp => 73,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FileType::Directory => "DIRECTORY",
            FileType::Settings => "SETTINGS",
            FileType::Sport => "SPORT",
            FileType::Activity => "ACTIVITY",
            FileType::Monitor => "MONITOR",
            FileType::Changelog => "CHANGELOG",
            FileType::Metrics => "METRICS",
            FileType::Sleep => "SLEEP",
            FileType::SkinTemp => "SKIN_TEMP",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One 16-byte row of the device's file directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub file_index: u16,
    pub file_type: FileType,
    pub file_number: u16,
    pub specific_flags: u8,
    pub file_flags: u8,
    pub file_size: u32,
    /// Unix seconds
    pub file_date: i64,
}

/// Parse a downloaded directory file into its entries.
///
/// Row zero describes the directory itself and is skipped, as are rows
/// whose file type this stack does not know.
pub fn parse_directory(data: &[u8]) -> Result<Vec<DirectoryEntry>> {
    if data.len() % DIRECTORY_ENTRY_SIZE != 0 {
        return Err(GarminError::InvalidDirectoryLength(data.len()));
    }

    let mut reader = ByteReader::new(data);
    let mut entries = Vec::with_capacity(data.len() / DIRECTORY_ENTRY_SIZE);
    while !reader.is_empty() {
        let file_index = reader.read_u16()?;
        let data_type = reader.read_u8()?;
        let sub_type = reader.read_u8()?;
        let file_number = reader.read_u16()?;
        let specific_flags = reader.read_u8()?;
        let file_flags = reader.read_u8()?;
        let file_size = reader.read_u32()?;
        let file_date = reader.read_u32()? as i64 + GARMIN_EPOCH_OFFSET;

        if file_index == 0 {
            continue;
        }
        let Some(file_type) = FileType::from_data_type_sub_type(data_type, sub_type) else {
            debug!("Skipping directory entry {file_index} of unknown type {data_type}/{sub_type}");
            continue;
        };
        entries.push(DirectoryEntry {
            file_index,
            file_type,
            file_number,
            specific_flags,
            file_flags,
            file_size,
            file_date,
        });
    }
    Ok(entries)
}

#[derive(Debug)]
struct FileDownload {
    file_index: u16,
    file_type: FileType,
    /// Unix seconds from the directory row, applied to the saved file
    file_date: i64,
    expected_size: usize,
    data: Vec<u8>,
    running_crc: u16,
}

#[derive(Debug)]
enum UploadState {
    /// CreateFile sent, waiting for the assigned file index
    PendingCreate,
    /// UploadRequest sent, waiting for the go-ahead
    PendingRequest { file_index: u16 },
    /// Pushing chunks
    InProgress {
        file_index: u16,
        offset: usize,
        running_crc: u16,
    },
}

#[derive(Debug)]
struct FileUpload {
    state: UploadState,
    data: Vec<u8>,
}

/// Single-flight download/upload state machine
pub struct FileTransferHandler {
    store: Arc<dyn FileStore>,
    block_size: usize,
    download: Option<FileDownload>,
    upload: Option<FileUpload>,
}

impl FileTransferHandler {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        FileTransferHandler {
            store,
            block_size: MIN_BLOCK_SIZE,
            download: None,
            upload: None,
        }
    }

    /// Adopt the packet size the device reported; the chunk ceiling never
    /// drops below [`MIN_BLOCK_SIZE`]
    pub fn set_packet_size(&mut self, packet_size: usize) {
        self.block_size = packet_size.max(MIN_BLOCK_SIZE);
    }

    pub fn is_busy(&self) -> bool {
        self.download.is_some() || self.upload.is_some()
    }

    /// Start downloading a file; the returned packet is the DownloadRequest
    pub fn begin_download(
        &mut self,
        file_index: u16,
        file_type: FileType,
        file_date: i64,
    ) -> Result<Vec<u8>> {
        if self.download.is_some() {
            return Err(GarminError::UnexpectedFileTransfer);
        }
        info!("Requesting download of {file_type} file {file_index}");
        self.download = Some(FileDownload {
            file_index,
            file_type,
            file_date,
            expected_size: 0,
            data: Vec::new(),
            running_crc: 0,
        });
        Ok(MessageGenerator::download_request(file_index, 0, false, 0))
    }

    /// Start downloading the device's file directory
    pub fn begin_directory_download(&mut self) -> Result<Vec<u8>> {
        self.begin_download(0, FileType::Directory, 0)
    }

    /// Start uploading a file; the returned packet is the CreateFile request
    pub fn begin_upload(&mut self, file_type: FileType, data: Vec<u8>) -> Result<Vec<u8>> {
        if self.upload.is_some() {
            return Err(GarminError::UnexpectedFileTransfer);
        }
        info!("Requesting upload of {} byte {file_type} file", data.len());
        let request = MessageGenerator::create_file(
            data.len() as u32,
            file_type.data_type(),
            file_type.sub_type(),
            0,
        );
        self.upload = Some(FileUpload {
            state: UploadState::PendingCreate,
            data,
        });
        Ok(request)
    }

    fn handle_download_status(&mut self, status: Status, response: u8, max_file_size: u32) -> HandlerOutcome {
        let Some(download) = self.download.as_mut() else {
            warn!("Download status with no download in flight");
            return HandlerOutcome::default();
        };
        if status != Status::Ack || response != TRANSFER_OK {
            warn!(
                "Device refused download of file {} ({status}, response {response})",
                download.file_index
            );
            self.download = None;
            return HandlerOutcome::default();
        }
        download.expected_size = max_file_size as usize;
        debug!(
            "Download of file {} accepted, {} bytes",
            download.file_index, download.expected_size
        );
        HandlerOutcome::default()
    }

    fn handle_transfer_data(&mut self, crc: u16, offset: u32, data: &[u8]) -> HandlerOutcome {
        let Some(download) = self.download.as_mut() else {
            warn!("File transfer data with no download in flight");
            return HandlerOutcome::reply(MessageGenerator::file_transfer_data_status(
                Status::Ack,
                TRANSFER_ABORT,
                0,
            ));
        };

        if offset as usize != download.data.len() {
            let err = GarminError::OffsetMismatch {
                expected: download.data.len() as u32,
                got: offset,
            };
            warn!("Abandoning file {}: {err}", download.file_index);
            let file_index = download.file_index;
            self.download = None;
            let mut outcome = HandlerOutcome::reply(MessageGenerator::file_transfer_data_status(
                Status::Ack,
                TRANSFER_OFFSET_MISMATCH,
                0,
            ));
            outcome.events.push(DeviceEvent::DownloadFailed {
                file_index,
                reason: err.to_string(),
            });
            return outcome;
        }

        let expected_crc = compute_crc(download.running_crc, data);
        if expected_crc != crc {
            let err = GarminError::ChunkChecksumMismatch {
                expected: expected_crc,
                got: crc,
            };
            warn!(
                "Abandoning file {} at offset {offset}: {err}",
                download.file_index
            );
            let file_index = download.file_index;
            self.download = None;
            let mut outcome = HandlerOutcome::reply(MessageGenerator::file_transfer_data_status(
                Status::Ack,
                TRANSFER_CRC_MISMATCH,
                0,
            ));
            outcome.events.push(DeviceEvent::DownloadFailed {
                file_index,
                reason: err.to_string(),
            });
            return outcome;
        }

        download.running_crc = expected_crc;
        download.data.extend_from_slice(data);
        let next_offset = download.data.len() as u32;
        let mut outcome = HandlerOutcome::reply(MessageGenerator::file_transfer_data_status(
            Status::Ack,
            TRANSFER_OK,
            next_offset,
        ));

        if download.data.len() >= download.expected_size {
            if let Some(finished) = self.download.take() {
                outcome.events.extend(self.finish_download(finished));
            }
        }
        outcome
    }

    fn finish_download(&self, download: FileDownload) -> Vec<DeviceEvent> {
        info!(
            "Download of {} file {} complete, {} bytes",
            download.file_type,
            download.file_index,
            download.data.len()
        );
        if download.file_type == FileType::Directory {
            return match parse_directory(&download.data) {
                Ok(entries) => vec![DeviceEvent::DirectoryEntries(entries)],
                Err(err) => {
                    warn!("Discarding malformed directory: {err}");
                    Vec::new()
                }
            };
        }

        let name = format!("{}_{}.fit", download.file_type, download.file_index);
        match self
            .store
            .save_file(&name, &download.data, download.file_date)
        {
            Ok(path) => vec![DeviceEvent::FileDownloaded {
                path,
                file_type: download.file_type,
            }],
            Err(err) => {
                warn!("Failed to save {name}: {err}");
                Vec::new()
            }
        }
    }

    fn handle_create_status(&mut self, status: Status, response: u8, file_index: u16) -> HandlerOutcome {
        let Some(upload) = self.upload.as_mut() else {
            warn!("Create file status with no upload in flight");
            return HandlerOutcome::default();
        };
        if !matches!(upload.state, UploadState::PendingCreate) {
            warn!("Create file status in unexpected upload state");
            return HandlerOutcome::default();
        }
        if status != Status::Ack || response != TRANSFER_OK {
            warn!("Device refused file creation ({status}, response {response})");
            self.upload = None;
            return HandlerOutcome::default();
        }
        upload.state = UploadState::PendingRequest { file_index };
        let size = upload.data.len() as u32;
        debug!("File {file_index} created on device, requesting upload");
        HandlerOutcome::reply(MessageGenerator::upload_request(file_index, size, 0, 0))
    }

    fn handle_upload_status(
        &mut self,
        status: Status,
        response: u8,
        data_offset: u32,
        crc_seed: u16,
    ) -> HandlerOutcome {
        let Some(upload) = self.upload.as_mut() else {
            warn!("Upload status with no upload in flight");
            return HandlerOutcome::default();
        };
        let UploadState::PendingRequest { file_index } = upload.state else {
            warn!("Upload status in unexpected upload state");
            return HandlerOutcome::default();
        };
        if status != Status::Ack || response != TRANSFER_OK {
            warn!("Device refused upload of file {file_index} ({status}, response {response})");
            self.upload = None;
            return HandlerOutcome::default();
        }
        upload.state = UploadState::InProgress {
            file_index,
            offset: data_offset as usize,
            running_crc: crc_seed,
        };
        self.send_next_chunk()
    }

    fn handle_chunk_status(&mut self, status: Status, response: u8, next_offset: u32) -> HandlerOutcome {
        let Some(upload) = self.upload.as_mut() else {
            warn!("Transfer data status with no upload in flight");
            return HandlerOutcome::default();
        };
        let UploadState::InProgress { file_index, ref mut offset, .. } = upload.state else {
            warn!("Transfer data status in unexpected upload state");
            return HandlerOutcome::default();
        };
        if status != Status::Ack || response != TRANSFER_OK {
            warn!("Device aborted upload of file {file_index} ({status}, response {response})");
            self.upload = None;
            return HandlerOutcome::default();
        }
        let sent_to = (*offset + self.block_size).min(upload.data.len());
        if next_offset as usize != sent_to {
            let err = GarminError::OffsetMismatch {
                expected: sent_to as u32,
                got: next_offset,
            };
            warn!("Abandoning upload of file {file_index}: {err}");
            self.upload = None;
            return HandlerOutcome::default();
        }
        *offset = sent_to;
        if *offset >= upload.data.len() {
            info!("Upload of file {file_index} complete, {} bytes", upload.data.len());
            self.upload = None;
            let mut outcome =
                HandlerOutcome::reply(MessageGenerator::system_event(SystemEventType::SyncComplete, 0));
            outcome.events.push(DeviceEvent::SyncComplete);
            return outcome;
        }
        self.send_next_chunk()
    }

    fn send_next_chunk(&mut self) -> HandlerOutcome {
        let Some(upload) = self.upload.as_mut() else {
            return HandlerOutcome::default();
        };
        let UploadState::InProgress { ref mut running_crc, offset, .. } = upload.state else {
            return HandlerOutcome::default();
        };
        let end = (offset + self.block_size).min(upload.data.len());
        let chunk = &upload.data[offset..end];
        *running_crc = compute_crc(*running_crc, chunk);
        debug!("Sending upload chunk at offset {offset}, {} bytes", chunk.len());
        HandlerOutcome::reply(MessageGenerator::file_transfer_data(
            0,
            *running_crc,
            offset as u32,
            chunk,
        ))
    }
}

impl MessageHandler for FileTransferHandler {
    fn handle_message(&mut self, message: &GfdiMessage) -> Option<HandlerOutcome> {
        match message {
            GfdiMessage::DownloadRequestStatus {
                status,
                response,
                max_file_size,
            } => Some(self.handle_download_status(*status, *response, *max_file_size)),
            GfdiMessage::FileTransferData {
                crc, offset, data, ..
            } => Some(self.handle_transfer_data(*crc, *offset, data)),
            GfdiMessage::CreateFileStatus {
                status,
                response,
                file_index,
                ..
            } => Some(self.handle_create_status(*status, *response, *file_index)),
            GfdiMessage::UploadRequestStatus {
                status,
                response,
                data_offset,
                crc_seed,
                ..
            } => Some(self.handle_upload_status(*status, *response, *data_offset, *crc_seed)),
            GfdiMessage::FileTransferDataStatus {
                status,
                response,
                next_offset,
            } => Some(self.handle_chunk_status(*status, *response, *next_offset)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageParser;
    use crate::reader::ByteWriter;
    use std::sync::Mutex;

    struct MemoryStore {
        files: Mutex<Vec<(String, Vec<u8>, i64)>>,
    }

    impl MemoryStore {
        fn new() -> Arc<Self> {
            Arc::new(MemoryStore {
                files: Mutex::new(Vec::new()),
            })
        }
    }

    impl FileStore for MemoryStore {
        fn save_file(&self, name: &str, data: &[u8], modified: i64) -> Result<String> {
            let mut files = self.files.lock().unwrap();
            files.push((name.to_string(), data.to_vec(), modified));
            Ok(format!("/tmp/{name}"))
        }

        fn file_exists(&self, name: &str) -> bool {
            self.files.lock().unwrap().iter().any(|(n, _, _)| n == name)
        }
    }

    fn directory_row(
        writer: &mut ByteWriter,
        index: u16,
        data_type: u8,
        sub_type: u8,
        number: u16,
        size: u32,
    ) {
        writer.write_u16(index);
        writer.write_u8(data_type);
        writer.write_u8(sub_type);
        writer.write_u16(number);
        writer.write_u8(0);
        writer.write_u8(0x80);
        writer.write_u32(size);
        writer.write_u32(1_000_000);
    }

    #[test]
    fn test_parse_directory() {
        let mut writer = ByteWriter::new();
        directory_row(&mut writer, 0, 0, 0, 0, 64);
        directory_row(&mut writer, 2, 128, 4, 1, 4096);
        directory_row(&mut writer, 3, 128, 32, 7, 512);
        directory_row(&mut writer, 4, 99, 99, 0, 16);

        let entries = parse_directory(writer.bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file_index, 2);
        assert_eq!(entries[0].file_type, FileType::Activity);
        assert_eq!(entries[0].file_size, 4096);
        assert_eq!(entries[0].file_date, 1_000_000 + GARMIN_EPOCH_OFFSET);
        assert_eq!(entries[1].file_type, FileType::Monitor);
    }

    #[test]
    fn test_parse_directory_rejects_partial_row() {
        let result = parse_directory(&[0u8; 17]);
        assert!(matches!(
            result,
            Err(GarminError::InvalidDirectoryLength(17))
        ));
    }

    fn ack_chunk(packet: &[u8]) -> (Status, u8, u32) {
        match MessageParser::parse(packet).unwrap() {
            GfdiMessage::FileTransferDataStatus {
                status,
                response,
                next_offset,
            } => (status, response, next_offset),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_download_happy_path() {
        let store = MemoryStore::new();
        let mut handler = FileTransferHandler::new(store.clone());

        let request = handler
            .begin_download(2, FileType::Activity, 1_700_000_000)
            .unwrap();
        assert!(MessageParser::parse(&request).is_ok());
        assert!(handler.is_busy());

        handler
            .handle_message(&GfdiMessage::DownloadRequestStatus {
                status: Status::Ack,
                response: 0,
                max_file_size: 6,
            })
            .unwrap();

        let first = vec![1u8, 2, 3];
        let crc1 = compute_crc(0, &first);
        let outcome = handler
            .handle_message(&GfdiMessage::FileTransferData {
                flags: 0,
                crc: crc1,
                offset: 0,
                data: first.clone(),
            })
            .unwrap();
        let (status, response, next) = ack_chunk(&outcome.follow_ups[0]);
        assert_eq!((status, response, next), (Status::Ack, TRANSFER_OK, 3));
        assert!(outcome.events.is_empty());

        let second = vec![4u8, 5, 6];
        let crc2 = compute_crc(crc1, &second);
        let outcome = handler
            .handle_message(&GfdiMessage::FileTransferData {
                flags: 0,
                crc: crc2,
                offset: 3,
                data: second,
            })
            .unwrap();
        let (_, response, next) = ack_chunk(&outcome.follow_ups[0]);
        assert_eq!((response, next), (TRANSFER_OK, 6));
        assert!(matches!(
            outcome.events[0],
            DeviceEvent::FileDownloaded { ref path, file_type: FileType::Activity }
                if path == "/tmp/ACTIVITY_2.fit"
        ));
        assert!(!handler.is_busy());

        let files = store.files.lock().unwrap();
        // the directory row's timestamp travels down to the store
        assert_eq!(
            files[0],
            (
                "ACTIVITY_2.fit".to_string(),
                vec![1, 2, 3, 4, 5, 6],
                1_700_000_000
            )
        );
    }

    #[test]
    fn test_download_crc_mismatch_abandons() {
        let store = MemoryStore::new();
        let mut handler = FileTransferHandler::new(store.clone());
        handler.begin_download(2, FileType::Activity, 0).unwrap();
        handler
            .handle_message(&GfdiMessage::DownloadRequestStatus {
                status: Status::Ack,
                response: 0,
                max_file_size: 100,
            })
            .unwrap();

        let outcome = handler
            .handle_message(&GfdiMessage::FileTransferData {
                flags: 0,
                crc: 0xFFFF,
                offset: 0,
                data: vec![1, 2, 3],
            })
            .unwrap();
        let (_, response, next) = ack_chunk(&outcome.follow_ups[0]);
        assert_eq!((response, next), (TRANSFER_CRC_MISMATCH, 0));
        // a corrupt transfer is dropped, not retried
        assert!(!handler.is_busy());
        assert!(matches!(
            outcome.events[0],
            DeviceEvent::DownloadFailed { file_index: 2, .. }
        ));
        assert!(store.files.lock().unwrap().is_empty());
    }

    #[test]
    fn test_download_offset_mismatch_abandons() {
        let store = MemoryStore::new();
        let mut handler = FileTransferHandler::new(store);
        handler.begin_download(2, FileType::Activity, 0).unwrap();
        handler
            .handle_message(&GfdiMessage::DownloadRequestStatus {
                status: Status::Ack,
                response: 0,
                max_file_size: 100,
            })
            .unwrap();

        let data = vec![1u8, 2, 3];
        let crc = compute_crc(0, &data);
        let outcome = handler
            .handle_message(&GfdiMessage::FileTransferData {
                flags: 0,
                crc,
                offset: 10,
                data,
            })
            .unwrap();
        let (_, response, _) = ack_chunk(&outcome.follow_ups[0]);
        assert_eq!(response, TRANSFER_OFFSET_MISMATCH);
        assert!(!handler.is_busy());
        assert!(matches!(
            outcome.events[0],
            DeviceEvent::DownloadFailed { file_index: 2, .. }
        ));
    }

    #[test]
    fn test_download_refused_returns_to_idle() {
        let store = MemoryStore::new();
        let mut handler = FileTransferHandler::new(store);
        handler.begin_download(2, FileType::Activity, 0).unwrap();
        handler
            .handle_message(&GfdiMessage::DownloadRequestStatus {
                status: Status::Ack,
                response: TRANSFER_ABORT,
                max_file_size: 0,
            })
            .unwrap();
        assert!(!handler.is_busy());
    }

    #[test]
    fn test_unexpected_chunk_answered_with_abort() {
        let store = MemoryStore::new();
        let mut handler = FileTransferHandler::new(store);
        let outcome = handler
            .handle_message(&GfdiMessage::FileTransferData {
                flags: 0,
                crc: 0,
                offset: 0,
                data: vec![1],
            })
            .unwrap();
        let (_, response, _) = ack_chunk(&outcome.follow_ups[0]);
        assert_eq!(response, TRANSFER_ABORT);
    }

    #[test]
    fn test_single_flight_download() {
        let store = MemoryStore::new();
        let mut handler = FileTransferHandler::new(store);
        handler.begin_download(2, FileType::Activity, 0).unwrap();
        assert!(matches!(
            handler.begin_download(3, FileType::Monitor, 0),
            Err(GarminError::UnexpectedFileTransfer)
        ));
    }

    #[test]
    fn test_directory_download_emits_entries() {
        let store = MemoryStore::new();
        let mut handler = FileTransferHandler::new(store.clone());
        handler.begin_directory_download().unwrap();

        let mut writer = ByteWriter::new();
        directory_row(&mut writer, 0, 0, 0, 0, 32);
        directory_row(&mut writer, 5, 128, 49, 1, 2048);
        let data = writer.into_bytes();

        handler
            .handle_message(&GfdiMessage::DownloadRequestStatus {
                status: Status::Ack,
                response: 0,
                max_file_size: data.len() as u32,
            })
            .unwrap();
        let crc = compute_crc(0, &data);
        let outcome = handler
            .handle_message(&GfdiMessage::FileTransferData {
                flags: 0,
                crc,
                offset: 0,
                data,
            })
            .unwrap();
        match &outcome.events[0] {
            DeviceEvent::DirectoryEntries(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].file_type, FileType::Sleep);
            }
            other => panic!("unexpected {other:?}"),
        }
        // directories are not persisted
        assert!(store.files.lock().unwrap().is_empty());
    }

    #[test]
    fn test_upload_chunks_and_completes() {
        let store = MemoryStore::new();
        let mut handler = FileTransferHandler::new(store);

        // 1200 bytes at the default 500-byte ceiling takes three chunks
        let payload: Vec<u8> = (0..1200u32).map(|i| i as u8).collect();
        let request = handler.begin_upload(FileType::Sport, payload.clone()).unwrap();
        assert!(MessageParser::parse(&request).is_ok());

        let outcome = handler
            .handle_message(&GfdiMessage::CreateFileStatus {
                status: Status::Ack,
                response: 0,
                file_index: 9,
                data_type: 128,
                sub_type: 3,
                file_number: 0,
            })
            .unwrap();
        assert!(matches!(
            MessageParser::parse(&outcome.follow_ups[0]),
            // our own upload request echoed back would be a device-side parse
            Ok(GfdiMessage::Unknown { message_id: 5003, .. })
        ));

        let outcome = handler
            .handle_message(&GfdiMessage::UploadRequestStatus {
                status: Status::Ack,
                response: 0,
                data_offset: 0,
                max_file_size: 10_000,
                crc_seed: 0,
            })
            .unwrap();

        let mut offsets = Vec::new();
        let mut running_crc = 0u16;
        let mut next = outcome.follow_ups[0].clone();
        loop {
            let (crc, offset, chunk) = match MessageParser::parse(&next).unwrap() {
                GfdiMessage::FileTransferData {
                    crc, offset, data, ..
                } => (crc, offset, data),
                GfdiMessage::Unknown { message_id: 5030, .. } => break,
                other => panic!("unexpected {other:?}"),
            };
            running_crc = compute_crc(running_crc, &chunk);
            assert_eq!(crc, running_crc);
            assert_eq!(&payload[offset as usize..offset as usize + chunk.len()], &chunk[..]);
            offsets.push(offset);

            let outcome = handler
                .handle_message(&GfdiMessage::FileTransferDataStatus {
                    status: Status::Ack,
                    response: 0,
                    next_offset: offset + chunk.len() as u32,
                })
                .unwrap();
            next = outcome.follow_ups[0].clone();
            if !outcome.events.is_empty() {
                assert!(matches!(outcome.events[0], DeviceEvent::SyncComplete));
            }
        }

        assert_eq!(offsets, vec![0, 500, 1000]);
        assert!(!handler.is_busy());
    }

    #[test]
    fn test_upload_unexpected_ack_offset_abandons() {
        let store = MemoryStore::new();
        let mut handler = FileTransferHandler::new(store);

        let payload: Vec<u8> = (0..1200u32).map(|i| i as u8).collect();
        handler.begin_upload(FileType::Sport, payload).unwrap();
        handler
            .handle_message(&GfdiMessage::CreateFileStatus {
                status: Status::Ack,
                response: 0,
                file_index: 9,
                data_type: 128,
                sub_type: 3,
                file_number: 0,
            })
            .unwrap();
        handler
            .handle_message(&GfdiMessage::UploadRequestStatus {
                status: Status::Ack,
                response: 0,
                data_offset: 0,
                max_file_size: 10_000,
                crc_seed: 0,
            })
            .unwrap();

        // the first chunk ran to offset 500; an ack for anything else
        // means the two sides disagree on what was written
        let outcome = handler
            .handle_message(&GfdiMessage::FileTransferDataStatus {
                status: Status::Ack,
                response: 0,
                next_offset: 123,
            })
            .unwrap();
        assert!(outcome.follow_ups.is_empty());
        assert!(outcome.events.is_empty());
        assert!(!handler.is_busy());
    }
}
