//! Session orchestration for one connected watch
//!
//! [`DeviceSession`] sits between a byte transport and the protocol
//! handlers. Every inbound packet is parsed once, acknowledged if the
//! device expects it, answered directly when the session itself owns the
//! reply (device information, time, configuration), and otherwise offered
//! to the file-transfer, protobuf and notification handlers in that order;
//! the first handler that claims a message decides the follow-up, later
//! handlers are not consulted.
//!
//! The session also runs the sync workflow: a directory download feeds a
//! single-flight queue of file downloads, files already in the store are
//! skipped, and a SYNC_COMPLETE system event closes the round when the
//! queue drains.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{Local, Offset, Utc};
use log::{debug, info, warn};

use crate::file_transfer::{DirectoryEntry, FileTransferHandler, FileType};
use crate::fit::{profile, RecordData, RecordDefinition, Value, GARMIN_EPOCH_OFFSET};
use crate::messages::{
    DeviceSetting, GfdiMessage, MessageGenerator, MessageId, MessageParser, SettingValue, Status,
    SystemEventType, GFDI_DEFAULT_PACKET_SIZE,
};
use crate::notifications::{Notification, NotificationsHandler};
use crate::protobuf::{CalendarProvider, ProtobufHandler};
use crate::types::{DeviceEvent, GarminError, Result};

/// Archive bit in a directory entry's file flags
const FILE_FLAG_ARCHIVED: u8 = 0x20;

const SEMICIRCLES_PER_DEGREE: f64 = (1u64 << 31) as f64 / 180.0;

/// Byte sink towards the device
pub trait Transport: Send + Sync {
    fn send_bytes(&self, data: &[u8]) -> Result<()>;
}

/// Persistence for downloaded device files
pub trait FileStore: Send + Sync {
    /// Persist a file and return the path it landed at. `modified` is the
    /// file's timestamp from the device directory, in Unix seconds, for
    /// stores that keep mtimes.
    fn save_file(&self, name: &str, data: &[u8], modified: i64) -> Result<String>;
    fn file_exists(&self, name: &str) -> bool;
}

/// Receiver for everything the protocol surfaces to the application
pub trait EventSink: Send + Sync {
    fn handle_event(&self, event: &DeviceEvent);
}

/// What one handler wants done after claiming a message
#[derive(Debug, Default)]
pub struct HandlerOutcome {
    /// Packets to send, in order
    pub follow_ups: Vec<Vec<u8>>,
    pub events: Vec<DeviceEvent>,
}

impl HandlerOutcome {
    pub fn reply(packet: Vec<u8>) -> Self {
        HandlerOutcome {
            follow_ups: vec![packet],
            events: Vec::new(),
        }
    }
}

/// A protocol handler claiming some subset of inbound messages.
///
/// Returning `None` passes the message on to the next handler.
pub trait MessageHandler {
    fn handle_message(&mut self, message: &GfdiMessage) -> Option<HandlerOutcome>;
}

/// How the phone introduces itself in the device-information exchange
#[derive(Debug, Clone)]
pub struct PhoneIdentity {
    pub protocol_version: u16,
    pub product_number: u16,
    pub unit_number: u32,
    pub software_version: u16,
    pub friendly_name: String,
    pub device_name: String,
    pub device_model: String,
}

impl Default for PhoneIdentity {
    fn default() -> Self {
        PhoneIdentity {
            protocol_version: 150,
            product_number: 0xFFFF,
            unit_number: 0,
            software_version: 100,
            friendly_name: "gfdi".to_string(),
            device_name: "gfdi".to_string(),
            device_model: "linux".to_string(),
        }
    }
}

/// A weather observation pushed to the watch as a FIT weather record
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    /// Unix seconds
    pub timestamp: i64,
    /// Degrees Celsius
    pub temperature: i64,
    pub feels_like: i64,
    pub condition: u8,
    pub relative_humidity: u8,
    /// Metres per second
    pub wind_speed: f64,
    /// Degrees
    pub wind_direction: u16,
    pub location: String,
}

/// One connected watch: parsing, dispatch, sync workflow
pub struct DeviceSession {
    transport: Arc<dyn Transport>,
    store: Arc<dyn FileStore>,
    sink: Arc<dyn EventSink>,
    identity: PhoneIdentity,
    /// Archive device files after a successful download
    pub archive_after_download: bool,
    file_transfer: FileTransferHandler,
    protobuf: ProtobufHandler,
    notifications: NotificationsHandler,
    download_queue: VecDeque<DirectoryEntry>,
    current_download: Option<DirectoryEntry>,
    syncing: bool,
    capabilities: Vec<u8>,
}

impl DeviceSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn FileStore>,
        sink: Arc<dyn EventSink>,
        calendar: Option<Arc<dyn CalendarProvider>>,
    ) -> Self {
        DeviceSession {
            transport,
            store: store.clone(),
            sink,
            identity: PhoneIdentity::default(),
            archive_after_download: false,
            file_transfer: FileTransferHandler::new(store),
            protobuf: ProtobufHandler::new(calendar),
            notifications: NotificationsHandler::new(),
            download_queue: VecDeque::new(),
            current_download: None,
            syncing: false,
            capabilities: Vec::new(),
        }
    }

    pub fn set_identity(&mut self, identity: PhoneIdentity) {
        self.identity = identity;
    }

    /// Whether a sync round is currently running
    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    pub fn capabilities(&self) -> &[u8] {
        &self.capabilities
    }

    /// Feed one complete inbound packet through the stack
    pub fn handle_incoming(&mut self, data: &[u8]) -> Result<()> {
        let message = match MessageParser::parse(data) {
            Ok(message) => message,
            Err(err) => {
                if let Some(reply) = parse_failure_status(data, &err) {
                    self.transport.send_bytes(&reply)?;
                }
                return Err(err);
            }
        };

        if let GfdiMessage::Unknown { message_id, .. } = &message {
            warn!("Refusing unknown message {message_id}");
            return self
                .transport
                .send_bytes(&MessageGenerator::unsupported(*message_id));
        }

        if message.needs_ack() {
            if let Some(id) = message.ack_message_id() {
                self.transport
                    .send_bytes(&MessageGenerator::status_response(id, Status::Ack))?;
            }
        }

        match &message {
            GfdiMessage::DeviceInformation {
                protocol_version,
                max_packet_size,
                device_name,
                ..
            } => {
                info!("Connected to {device_name} (protocol {protocol_version})");
                self.file_transfer.set_packet_size(*max_packet_size as usize);
                let identity = &self.identity;
                self.transport
                    .send_bytes(&MessageGenerator::device_information_response(
                        identity.protocol_version,
                        identity.product_number,
                        identity.unit_number,
                        identity.software_version,
                        GFDI_DEFAULT_PACKET_SIZE as u16,
                        &identity.friendly_name,
                        &identity.device_name,
                        &identity.device_model,
                    ))?;
                Ok(())
            }
            GfdiMessage::CurrentTimeRequest { reference_id } => {
                let now = Utc::now().timestamp();
                let garmin_timestamp = (now - GARMIN_EPOCH_OFFSET) as u32;
                let timezone_offset = Local::now().offset().fix().local_minus_utc();
                self.transport
                    .send_bytes(&MessageGenerator::current_time_response(
                        *reference_id,
                        garmin_timestamp,
                        timezone_offset,
                    ))?;
                Ok(())
            }
            GfdiMessage::Configuration { capabilities } => {
                debug!("Device capabilities: {capabilities:02X?}");
                self.capabilities = capabilities.clone();
                self.transport
                    .send_bytes(&MessageGenerator::configuration_response(capabilities))?;
                self.complete_initialization()
            }
            GfdiMessage::WeatherRequest {
                latitude,
                longitude,
                hours,
                ..
            } => {
                self.sink.handle_event(&DeviceEvent::WeatherRequest {
                    latitude: f64::from(*latitude) / SEMICIRCLES_PER_DEGREE,
                    longitude: f64::from(*longitude) / SEMICIRCLES_PER_DEGREE,
                    hours: *hours,
                });
                Ok(())
            }
            GfdiMessage::FindMyPhoneStart { duration } => {
                info!("Watch asked to find this phone for {duration} seconds");
                self.sink
                    .handle_event(&DeviceEvent::FindPhone { start: true });
                Ok(())
            }
            GfdiMessage::FindMyPhoneCancel => {
                self.sink
                    .handle_event(&DeviceEvent::FindPhone { start: false });
                Ok(())
            }
            GfdiMessage::SupportedFileTypesResponse { types, .. } => {
                let known: Vec<FileType> = types
                    .iter()
                    .filter_map(|t| {
                        FileType::from_data_type_sub_type(t.file_data_type, t.file_sub_type)
                    })
                    .collect();
                self.sink
                    .handle_event(&DeviceEvent::SupportedFileTypes(known));
                Ok(())
            }
            GfdiMessage::Synchronization { .. } => {
                info!("Device requested a sync");
                self.start_sync()
            }
            _ => self.dispatch(&message),
        }
    }

    fn dispatch(&mut self, message: &GfdiMessage) -> Result<()> {
        let mut claimed = None;
        let handlers: [&mut dyn MessageHandler; 3] = [
            &mut self.file_transfer,
            &mut self.protobuf,
            &mut self.notifications,
        ];
        for handler in handlers {
            if let Some(outcome) = handler.handle_message(message) {
                claimed = Some(outcome);
                break;
            }
        }
        match claimed {
            Some(outcome) => self.process_outcome(outcome),
            None => {
                debug!("No handler claimed {message:?}");
                Ok(())
            }
        }
    }

    fn process_outcome(&mut self, outcome: HandlerOutcome) -> Result<()> {
        for packet in &outcome.follow_ups {
            self.transport.send_bytes(packet)?;
        }
        for event in outcome.events {
            match &event {
                DeviceEvent::DirectoryEntries(entries) => {
                    self.queue_downloads(entries);
                }
                DeviceEvent::FileDownloaded { .. } => {
                    if let Some(entry) = self.current_download.take() {
                        if self.archive_after_download {
                            self.transport.send_bytes(&MessageGenerator::set_file_flags(
                                entry.file_index,
                                entry.file_flags | FILE_FLAG_ARCHIVED,
                            ))?;
                        }
                    }
                }
                DeviceEvent::DownloadFailed { file_index, reason } => {
                    warn!("Download of file {file_index} failed: {reason}");
                    // the sync moves on to the remaining files
                    self.current_download = None;
                }
                _ => {}
            }
            self.sink.handle_event(&event);
        }
        self.pump_download_queue()
    }

    fn queue_downloads(&mut self, entries: &[DirectoryEntry]) {
        self.current_download = None;
        for entry in entries {
            let name = format!("{}_{}.fit", entry.file_type, entry.file_index);
            if entry.file_size == 0 {
                continue;
            }
            if self.store.file_exists(&name) {
                debug!("Skipping {name}, already downloaded");
                continue;
            }
            self.download_queue.push_back(entry.clone());
        }
        info!("Queued {} file downloads", self.download_queue.len());
    }

    fn pump_download_queue(&mut self) -> Result<()> {
        if self.current_download.is_some() || self.file_transfer.is_busy() {
            return Ok(());
        }
        match self.download_queue.pop_front() {
            Some(entry) => {
                let request = self.file_transfer.begin_download(
                    entry.file_index,
                    entry.file_type,
                    entry.file_date,
                )?;
                self.current_download = Some(entry);
                self.transport.send_bytes(&request)
            }
            None => {
                if self.syncing {
                    self.syncing = false;
                    info!("Sync round complete");
                    self.transport
                        .send_bytes(&MessageGenerator::system_event(
                            SystemEventType::SyncComplete,
                            0,
                        ))?;
                    self.sink.handle_event(&DeviceEvent::SyncComplete);
                }
                Ok(())
            }
        }
    }

    /// Start a sync round by fetching the device's file directory
    pub fn start_sync(&mut self) -> Result<()> {
        if self.syncing {
            warn!("Sync already running");
            return Ok(());
        }
        self.syncing = true;
        let request = self.file_transfer.begin_directory_download()?;
        self.transport.send_bytes(&request)
    }

    /// Initial housekeeping once the device reports its configuration:
    /// time sync, weather enablement, sync readiness, battery and
    /// supported-types queries
    fn complete_initialization(&mut self) -> Result<()> {
        let now = Utc::now().timestamp();
        let timezone_offset = Local::now().offset().fix().local_minus_utc();
        self.transport
            .send_bytes(&MessageGenerator::set_device_settings(&[
                (
                    DeviceSetting::CurrentTime,
                    SettingValue::U32((now - GARMIN_EPOCH_OFFSET) as u32),
                ),
                (
                    DeviceSetting::TimeZoneOffset,
                    SettingValue::I32(timezone_offset),
                ),
                (DeviceSetting::DaylightSavingsOffset, SettingValue::I32(0)),
            ]))?;
        self.transport
            .send_bytes(&MessageGenerator::set_device_settings(&[
                (
                    DeviceSetting::WeatherConditionsEnabled,
                    SettingValue::Bool(true),
                ),
                (
                    DeviceSetting::WeatherAlertsEnabled,
                    SettingValue::Bool(true),
                ),
            ]))?;
        self.transport
            .send_bytes(&MessageGenerator::system_event(
                SystemEventType::SyncReady,
                0,
            ))?;
        let battery = self.protobuf.battery_status_request();
        self.transport.send_bytes(&battery)?;
        self.transport
            .send_bytes(&MessageGenerator::supported_file_types_request())
    }

    /// Forward a phone notification to the watch
    pub fn notify(&mut self, notification: Notification) -> Result<()> {
        if let Some(packet) = self.notifications.post(notification) {
            self.transport.send_bytes(&packet)?;
        }
        Ok(())
    }

    /// Remove a notification from the watch
    pub fn dismiss_notification(&mut self, notification_id: i32) -> Result<()> {
        if let Some(packet) = self.notifications.dismiss(notification_id) {
            self.transport.send_bytes(&packet)?;
        }
        Ok(())
    }

    /// Mirror the phone call state on the watch
    pub fn set_call_state(
        &mut self,
        ringing: bool,
        caller: Option<&str>,
        number: Option<&str>,
    ) -> Result<()> {
        for packet in self.notifications.set_call_state(ringing, caller, number) {
            self.transport.send_bytes(&packet)?;
        }
        Ok(())
    }

    /// Push a file to the device
    pub fn upload_file(&mut self, file_type: FileType, data: Vec<u8>) -> Result<()> {
        let request = self.file_transfer.begin_upload(file_type, data)?;
        self.transport.send_bytes(&request)
    }

    /// Query the watch battery over the device-status service
    pub fn request_battery_status(&mut self) -> Result<()> {
        let packet = self.protobuf.battery_status_request();
        self.transport.send_bytes(&packet)
    }

    /// Make the watch beep, or stop it again
    pub fn find_my_watch(&mut self, start: bool, duration_seconds: u32) -> Result<()> {
        let packet = self.protobuf.find_my_watch(start, duration_seconds);
        self.transport.send_bytes(&packet)
    }

    /// Push a weather observation as an inline FIT weather record
    pub fn send_weather(&mut self, report: &WeatherReport) -> Result<()> {
        let definition = Arc::new(RecordDefinition::new(
            0,
            profile::WEATHER,
            &[253, 0, 1, 2, 3, 4, 6, 7, 8],
        )?);
        let mut record = RecordData::new(definition.clone());
        record.set_field_by_number(253, Value::Int(report.timestamp))?;
        record.set_field_by_name("weather_report", Value::Int(0))?;
        record.set_field_by_name("temperature", Value::Int(report.temperature))?;
        record.set_field_by_name("condition", Value::Int(i64::from(report.condition)))?;
        record.set_field_by_name("wind_direction", Value::Int(i64::from(report.wind_direction)))?;
        record.set_field_by_name("wind_speed", Value::Float(report.wind_speed))?;
        record.set_field_by_name("temperature_feels_like", Value::Int(report.feels_like))?;
        record.set_field_by_name(
            "relative_humidity",
            Value::Int(i64::from(report.relative_humidity)),
        )?;
        record.set_field_by_name("location", Value::Text(report.location.clone()))?;

        self.transport
            .send_bytes(&MessageGenerator::fit_definition(&[definition]))?;
        self.transport
            .send_bytes(&MessageGenerator::fit_data(&[record]))
    }
}

/// Build the error status for a packet that failed framing checks, when
/// enough of it survives to name the message being answered
fn parse_failure_status(data: &[u8], err: &GarminError) -> Option<Vec<u8>> {
    if data.len() < 4 {
        return None;
    }
    let message_id = u16::from_le_bytes([data[2], data[3]]);
    let status = match err {
        GarminError::ChecksumMismatch { .. } => Status::CrcMismatch,
        GarminError::LengthMismatch { .. } | GarminError::PacketTooShort(_) => Status::LengthError,
        _ => Status::DecodeError,
    };
    let mut payload = Vec::with_capacity(3);
    payload.extend_from_slice(&message_id.to_le_bytes());
    payload.push(status.to_u8());
    Some(MessageGenerator::frame(
        MessageId::Response.to_u16(),
        &payload,
    ))
}
