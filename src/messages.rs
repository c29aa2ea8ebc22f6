//! GFDI message envelope: framing, parsing and generation
//!
//! Every GFDI packet is `[u16 size][u16 message id][payload][u16 crc]`, all
//! little endian; the size counts the whole packet including the CRC, and
//! the CRC covers everything before it. Device-initiated messages are
//! answered with a `Response` (5000) packet echoing the original message id
//! and a status code, optionally followed by a response payload.

use std::fmt;
use std::sync::Arc;

use log::warn;

use crate::checksum::compute_crc;
use crate::fit::{RecordData, RecordDefinition};
use crate::reader::{ByteReader, ByteWriter};
use crate::types::{GarminError, Result};

/// Max packet size assumed before the device reports its own
pub const GFDI_DEFAULT_PACKET_SIZE: usize = 375;

/// GFDI message identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageId {
    Response = 5000,
    DownloadRequest = 5002,
    UploadRequest = 5003,
    FileTransferData = 5004,
    CreateFile = 5005,
    SetFileFlags = 5008,
    FitDefinition = 5011,
    FitData = 5012,
    WeatherRequest = 5014,
    DeviceInformation = 5024,
    DeviceSettings = 5026,
    SystemEvent = 5030,
    SupportedFileTypes = 5031,
    NotificationUpdate = 5033,
    NotificationControl = 5034,
    NotificationData = 5035,
    NotificationSubscription = 5036,
    Synchronization = 5037,
    FindMyPhoneStart = 5039,
    FindMyPhoneCancel = 5040,
    ProtobufRequest = 5043,
    ProtobufResponse = 5044,
    Configuration = 5050,
    CurrentTimeRequest = 5052,
}

impl MessageId {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            5000 => Some(MessageId::Response),
            5002 => Some(MessageId::DownloadRequest),
            5003 => Some(MessageId::UploadRequest),
            5004 => Some(MessageId::FileTransferData),
            5005 => Some(MessageId::CreateFile),
            5008 => Some(MessageId::SetFileFlags),
            5011 => Some(MessageId::FitDefinition),
            5012 => Some(MessageId::FitData),
            5014 => Some(MessageId::WeatherRequest),
            5024 => Some(MessageId::DeviceInformation),
            5026 => Some(MessageId::DeviceSettings),
            5030 => Some(MessageId::SystemEvent),
            5031 => Some(MessageId::SupportedFileTypes),
            5033 => Some(MessageId::NotificationUpdate),
            5034 => Some(MessageId::NotificationControl),
            5035 => Some(MessageId::NotificationData),
            5036 => Some(MessageId::NotificationSubscription),
            5037 => Some(MessageId::Synchronization),
            5039 => Some(MessageId::FindMyPhoneStart),
            5040 => Some(MessageId::FindMyPhoneCancel),
            5043 => Some(MessageId::ProtobufRequest),
            5044 => Some(MessageId::ProtobufResponse),
            5050 => Some(MessageId::Configuration),
            5052 => Some(MessageId::CurrentTimeRequest),
            _ => None,
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageId::Response => "RESPONSE",
            MessageId::DownloadRequest => "DOWNLOAD_REQUEST",
            MessageId::UploadRequest => "UPLOAD_REQUEST",
            MessageId::FileTransferData => "FILE_TRANSFER_DATA",
            MessageId::CreateFile => "CREATE_FILE",
            MessageId::SetFileFlags => "SET_FILE_FLAGS",
            MessageId::FitDefinition => "FIT_DEFINITION",
            MessageId::FitData => "FIT_DATA",
            MessageId::WeatherRequest => "WEATHER_REQUEST",
            MessageId::DeviceInformation => "DEVICE_INFORMATION",
            MessageId::DeviceSettings => "DEVICE_SETTINGS",
            MessageId::SystemEvent => "SYSTEM_EVENT",
            MessageId::SupportedFileTypes => "SUPPORTED_FILE_TYPES",
            MessageId::NotificationUpdate => "NOTIFICATION_UPDATE",
            MessageId::NotificationControl => "NOTIFICATION_CONTROL",
            MessageId::NotificationData => "NOTIFICATION_DATA",
            MessageId::NotificationSubscription => "NOTIFICATION_SUBSCRIPTION",
            MessageId::Synchronization => "SYNCHRONIZATION",
            MessageId::FindMyPhoneStart => "FIND_MY_PHONE_START",
            MessageId::FindMyPhoneCancel => "FIND_MY_PHONE_CANCEL",
            MessageId::ProtobufRequest => "PROTOBUF_REQUEST",
            MessageId::ProtobufResponse => "PROTOBUF_RESPONSE",
            MessageId::Configuration => "CONFIGURATION",
            MessageId::CurrentTimeRequest => "CURRENT_TIME_REQUEST",
        };
        write!(f, "{name}")
    }
}

/// Status codes carried in `Response` packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ack = 0,
    Nak = 1,
    UnsupportedMessage = 2,
    DecodeError = 3,
    CrcMismatch = 4,
    LengthError = 5,
}

impl Status {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Status::Ack),
            1 => Some(Status::Nak),
            2 => Some(Status::UnsupportedMessage),
            3 => Some(Status::DecodeError),
            4 => Some(Status::CrcMismatch),
            5 => Some(Status::LengthError),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ack => "ACK",
            Status::Nak => "NAK",
            Status::UnsupportedMessage => "UNSUPPORTED_MESSAGE",
            Status::DecodeError => "DECODE_ERROR",
            Status::CrcMismatch => "CRC_MISMATCH",
            Status::LengthError => "LENGTH_ERROR",
        };
        write!(f, "{name}")
    }
}

/// System event types announced to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SystemEventType {
    SyncComplete = 0,
    SyncReady = 1,
    NewDownloadAvailable = 2,
    DeviceSoftwareUpdate = 3,
    DeviceDisconnect = 4,
    TutorialComplete = 5,
    SetupComplete = 6,
    TimeUpdated = 7,
}

/// Notification update kinds pushed to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NotificationUpdateType {
    Add = 0,
    Modify = 1,
    Remove = 2,
}

/// Attribute codes used by the notification mini-protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NotificationAttribute {
    AppIdentifier = 0,
    Title = 1,
    Subtitle = 2,
    Message = 3,
    MessageSize = 4,
    Date = 5,
    PositiveActionLabel = 6,
    NegativeActionLabel = 7,
    Actions = 127,
}

impl NotificationAttribute {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(NotificationAttribute::AppIdentifier),
            1 => Some(NotificationAttribute::Title),
            2 => Some(NotificationAttribute::Subtitle),
            3 => Some(NotificationAttribute::Message),
            4 => Some(NotificationAttribute::MessageSize),
            5 => Some(NotificationAttribute::Date),
            6 => Some(NotificationAttribute::PositiveActionLabel),
            7 => Some(NotificationAttribute::NegativeActionLabel),
            127 => Some(NotificationAttribute::Actions),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether a requested attribute carries a 2-byte max length on the wire
    pub fn has_max_length(self) -> bool {
        matches!(
            self,
            NotificationAttribute::Title
                | NotificationAttribute::Subtitle
                | NotificationAttribute::Message
        )
    }
}

/// One requested attribute of a GET_NOTIFICATION_ATTRIBUTES command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeRequest {
    pub attribute: NotificationAttribute,
    pub max_length: Option<u16>,
}

/// Commands carried by a NotificationControl message
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationControlCommand {
    GetAttributes {
        notification_id: i32,
        attributes: Vec<AttributeRequest>,
    },
    PerformAction {
        notification_id: i32,
        action_id: u8,
        reply: Option<String>,
    },
}

const NOTIFICATION_COMMAND_GET_ATTRIBUTES: u8 = 0;
const NOTIFICATION_COMMAND_PERFORM_ACTION: u8 = 2;

/// One row of a supported-file-types response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedFileTypeEntry {
    pub file_data_type: u8,
    pub file_sub_type: u8,
    pub garmin_type: u16,
}

/// A decoded inbound GFDI message
#[derive(Debug, Clone, PartialEq)]
pub enum GfdiMessage {
    DownloadRequestStatus {
        status: Status,
        response: u8,
        max_file_size: u32,
    },
    UploadRequestStatus {
        status: Status,
        response: u8,
        data_offset: u32,
        max_file_size: u32,
        crc_seed: u16,
    },
    CreateFileStatus {
        status: Status,
        response: u8,
        file_index: u16,
        data_type: u8,
        sub_type: u8,
        file_number: u16,
    },
    FileTransferDataStatus {
        status: Status,
        response: u8,
        next_offset: u32,
    },
    FileTransferData {
        flags: u8,
        crc: u16,
        offset: u32,
        data: Vec<u8>,
    },
    NotificationDataStatus {
        status: Status,
        transfer_status: u8,
    },
    NotificationControl(NotificationControlCommand),
    NotificationSubscription {
        enabled: bool,
    },
    Protobuf {
        message_id: MessageId,
        request_id: u16,
        data_offset: u32,
        total_length: u32,
        payload: Vec<u8>,
    },
    ProtobufStatus {
        message_id: MessageId,
        status: Status,
        request_id: u16,
        data_offset: u32,
        chunk_status: u8,
        error_code: u8,
    },
    Configuration {
        capabilities: Vec<u8>,
    },
    DeviceInformation {
        protocol_version: u16,
        product_number: u16,
        unit_number: u32,
        software_version: u16,
        max_packet_size: u16,
        bluetooth_friendly_name: String,
        device_name: String,
        device_model: String,
    },
    CurrentTimeRequest {
        reference_id: u32,
    },
    Synchronization {
        options: Vec<u8>,
    },
    WeatherRequest {
        format: u8,
        latitude: i32,
        longitude: i32,
        hours: u8,
    },
    FindMyPhoneStart {
        duration: u8,
    },
    FindMyPhoneCancel,
    SupportedFileTypesResponse {
        status: Status,
        types: Vec<SupportedFileTypeEntry>,
    },
    GenericStatus {
        message_id: u16,
        status: Status,
    },
    Unknown {
        message_id: u16,
        payload: Vec<u8>,
    },
}

impl GfdiMessage {
    /// Whether the orchestrator should echo a generic ACK for this message.
    ///
    /// Statuses never get one (the device is not waiting on us), and neither
    /// do messages whose reply or handler follow-up is itself the
    /// acknowledgement (transfer chunks, protobuf chunks, information and
    /// time requests).
    pub fn needs_ack(&self) -> bool {
        matches!(
            self,
            GfdiMessage::NotificationControl(_)
                | GfdiMessage::NotificationSubscription { .. }
                | GfdiMessage::Configuration { .. }
                | GfdiMessage::Synchronization { .. }
                | GfdiMessage::WeatherRequest { .. }
                | GfdiMessage::FindMyPhoneStart { .. }
                | GfdiMessage::FindMyPhoneCancel
        )
    }

    /// The message id to echo in a generic ACK
    pub fn ack_message_id(&self) -> Option<MessageId> {
        match self {
            GfdiMessage::NotificationControl(_) => Some(MessageId::NotificationControl),
            GfdiMessage::NotificationSubscription { .. } => {
                Some(MessageId::NotificationSubscription)
            }
            GfdiMessage::Configuration { .. } => Some(MessageId::Configuration),
            GfdiMessage::Synchronization { .. } => Some(MessageId::Synchronization),
            GfdiMessage::WeatherRequest { .. } => Some(MessageId::WeatherRequest),
            GfdiMessage::FindMyPhoneStart { .. } => Some(MessageId::FindMyPhoneStart),
            GfdiMessage::FindMyPhoneCancel => Some(MessageId::FindMyPhoneCancel),
            _ => None,
        }
    }
}

/// Parser for inbound GFDI packets
pub struct MessageParser;

impl MessageParser {
    /// Verify framing and CRC, then decode the payload by message id
    pub fn parse(data: &[u8]) -> Result<GfdiMessage> {
        if data.len() < 6 {
            return Err(GarminError::PacketTooShort(data.len()));
        }
        let mut reader = ByteReader::new(data);
        let declared = reader.read_u16()? as usize;
        if declared != data.len() {
            return Err(GarminError::LengthMismatch {
                declared,
                actual: data.len(),
            });
        }
        let crc_declared = u16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]]);
        let crc_computed = compute_crc(0, &data[..data.len() - 2]);
        if crc_declared != crc_computed {
            return Err(GarminError::ChecksumMismatch {
                expected: crc_computed,
                got: crc_declared,
            });
        }

        let raw_id = reader.read_u16()?;
        let payload = &data[4..data.len() - 2];
        let Some(message_id) = MessageId::from_u16(raw_id) else {
            warn!("Unknown GFDI message id {raw_id}, {} byte payload", payload.len());
            return Ok(GfdiMessage::Unknown {
                message_id: raw_id,
                payload: payload.to_vec(),
            });
        };

        let mut reader = ByteReader::new(payload);
        match message_id {
            MessageId::Response => Self::parse_response(&mut reader),
            MessageId::FileTransferData => {
                let flags = reader.read_u8()?;
                let crc = reader.read_u16()?;
                let offset = reader.read_u32()?;
                let data = reader.read_bytes(reader.remaining())?.to_vec();
                Ok(GfdiMessage::FileTransferData {
                    flags,
                    crc,
                    offset,
                    data,
                })
            }
            MessageId::NotificationControl => Self::parse_notification_control(&mut reader),
            MessageId::NotificationSubscription => {
                let enabled = reader.read_u8()? != 0;
                Ok(GfdiMessage::NotificationSubscription { enabled })
            }
            MessageId::ProtobufRequest | MessageId::ProtobufResponse => {
                let request_id = reader.read_u16()?;
                let data_offset = reader.read_u32()?;
                let total_length = reader.read_u32()?;
                let chunk_length = reader.read_u32()? as usize;
                let payload = reader.read_bytes(chunk_length)?.to_vec();
                Ok(GfdiMessage::Protobuf {
                    message_id,
                    request_id,
                    data_offset,
                    total_length,
                    payload,
                })
            }
            MessageId::Configuration => {
                let count = reader.read_u8()? as usize;
                let capabilities = reader.read_bytes(count)?.to_vec();
                Ok(GfdiMessage::Configuration { capabilities })
            }
            MessageId::DeviceInformation => {
                let protocol_version = reader.read_u16()?;
                let product_number = reader.read_u16()?;
                let unit_number = reader.read_u32()?;
                let software_version = reader.read_u16()?;
                let max_packet_size = reader.read_u16()?;
                let bluetooth_friendly_name = reader.read_string_null_terminated();
                let device_name = reader.read_string_null_terminated();
                let device_model = reader.read_string_null_terminated();
                Ok(GfdiMessage::DeviceInformation {
                    protocol_version,
                    product_number,
                    unit_number,
                    software_version,
                    max_packet_size,
                    bluetooth_friendly_name,
                    device_name,
                    device_model,
                })
            }
            MessageId::CurrentTimeRequest => {
                let reference_id = if reader.remaining() >= 4 {
                    reader.read_u32()?
                } else {
                    0
                };
                Ok(GfdiMessage::CurrentTimeRequest { reference_id })
            }
            MessageId::Synchronization => Ok(GfdiMessage::Synchronization {
                options: payload.to_vec(),
            }),
            MessageId::WeatherRequest => {
                let format = reader.read_u8()?;
                let latitude = reader.read_i32()?;
                let longitude = reader.read_i32()?;
                let hours = reader.read_u8()?;
                Ok(GfdiMessage::WeatherRequest {
                    format,
                    latitude,
                    longitude,
                    hours,
                })
            }
            MessageId::FindMyPhoneStart => {
                let duration = reader.read_u8()?;
                Ok(GfdiMessage::FindMyPhoneStart { duration })
            }
            MessageId::FindMyPhoneCancel => Ok(GfdiMessage::FindMyPhoneCancel),
            _ => {
                warn!("Device sent unexpected {message_id}, treating as opaque");
                Ok(GfdiMessage::Unknown {
                    message_id: raw_id,
                    payload: payload.to_vec(),
                })
            }
        }
    }

    fn parse_response(reader: &mut ByteReader) -> Result<GfdiMessage> {
        let original_id = reader.read_u16()?;
        let raw_status = reader.read_u8()?;
        let status = Status::from_u8(raw_status)
            .ok_or_else(|| GarminError::InvalidMessage(format!("status code {raw_status}")))?;

        match MessageId::from_u16(original_id) {
            Some(MessageId::DownloadRequest) => {
                let response = reader.read_u8()?;
                let max_file_size = reader.read_u32()?;
                Ok(GfdiMessage::DownloadRequestStatus {
                    status,
                    response,
                    max_file_size,
                })
            }
            Some(MessageId::UploadRequest) => {
                let response = reader.read_u8()?;
                let data_offset = reader.read_u32()?;
                let max_file_size = reader.read_u32()?;
                let crc_seed = reader.read_u16()?;
                Ok(GfdiMessage::UploadRequestStatus {
                    status,
                    response,
                    data_offset,
                    max_file_size,
                    crc_seed,
                })
            }
            Some(MessageId::CreateFile) => {
                let response = reader.read_u8()?;
                let file_index = reader.read_u16()?;
                let data_type = reader.read_u8()?;
                let sub_type = reader.read_u8()?;
                let file_number = reader.read_u16()?;
                Ok(GfdiMessage::CreateFileStatus {
                    status,
                    response,
                    file_index,
                    data_type,
                    sub_type,
                    file_number,
                })
            }
            Some(MessageId::FileTransferData) => {
                let response = reader.read_u8()?;
                let next_offset = reader.read_u32()?;
                Ok(GfdiMessage::FileTransferDataStatus {
                    status,
                    response,
                    next_offset,
                })
            }
            Some(MessageId::NotificationData) => {
                let transfer_status = reader.read_u8()?;
                Ok(GfdiMessage::NotificationDataStatus {
                    status,
                    transfer_status,
                })
            }
            Some(message_id @ (MessageId::ProtobufRequest | MessageId::ProtobufResponse)) => {
                let request_id = reader.read_u16()?;
                let data_offset = reader.read_u32()?;
                let chunk_status = reader.read_u8()?;
                let error_code = reader.read_u8()?;
                Ok(GfdiMessage::ProtobufStatus {
                    message_id,
                    status,
                    request_id,
                    data_offset,
                    chunk_status,
                    error_code,
                })
            }
            Some(MessageId::SupportedFileTypes) => {
                let count = reader.read_u8()? as usize;
                let mut types = Vec::with_capacity(count);
                for _ in 0..count {
                    let file_data_type = reader.read_u8()?;
                    let file_sub_type = reader.read_u8()?;
                    let garmin_type = reader.read_u16()?;
                    types.push(SupportedFileTypeEntry {
                        file_data_type,
                        file_sub_type,
                        garmin_type,
                    });
                }
                Ok(GfdiMessage::SupportedFileTypesResponse { status, types })
            }
            _ => Ok(GfdiMessage::GenericStatus {
                message_id: original_id,
                status,
            }),
        }
    }

    fn parse_notification_control(reader: &mut ByteReader) -> Result<GfdiMessage> {
        let command = reader.read_u8()?;
        let notification_id = reader.read_i32()?;
        match command {
            NOTIFICATION_COMMAND_GET_ATTRIBUTES => {
                let mut attributes = Vec::new();
                while !reader.is_empty() {
                    let code = reader.read_u8()?;
                    let Some(attribute) = NotificationAttribute::from_code(code) else {
                        warn!("Unknown notification attribute code {code}, skipping rest");
                        break;
                    };
                    let max_length = if attribute.has_max_length() {
                        Some(reader.read_u16()?)
                    } else {
                        None
                    };
                    attributes.push(AttributeRequest {
                        attribute,
                        max_length,
                    });
                }
                Ok(GfdiMessage::NotificationControl(
                    NotificationControlCommand::GetAttributes {
                        notification_id,
                        attributes,
                    },
                ))
            }
            NOTIFICATION_COMMAND_PERFORM_ACTION => {
                let action_id = reader.read_u8()?;
                let reply = if reader.is_empty() {
                    None
                } else {
                    Some(reader.read_string_null_terminated())
                };
                Ok(GfdiMessage::NotificationControl(
                    NotificationControlCommand::PerformAction {
                        notification_id,
                        action_id,
                        reply,
                    },
                ))
            }
            other => Err(GarminError::InvalidMessage(format!(
                "notification control command {other}"
            ))),
        }
    }
}

/// Device settings pushed with a DeviceSettings message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceSetting {
    DeviceName = 0,
    CurrentTime = 1,
    DaylightSavingsOffset = 2,
    TimeZoneOffset = 3,
    AutoUploadEnabled = 4,
    WeatherConditionsEnabled = 5,
    WeatherAlertsEnabled = 6,
}

/// Value for one device setting
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    U32(u32),
    I32(i32),
    Text(String),
}

/// Builders for outbound GFDI packets
pub struct MessageGenerator;

impl MessageGenerator {
    /// Frame a payload: size, id, payload, CRC
    pub fn frame(message_id: u16, payload: &[u8]) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write_u16((payload.len() + 6) as u16);
        writer.write_u16(message_id);
        writer.write_bytes(payload);
        let crc = compute_crc(0, writer.bytes());
        writer.write_u16(crc);
        writer.into_bytes()
    }

    /// Generic status echo for a device-initiated message
    pub fn status_response(original: MessageId, status: Status) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u16(original.to_u16());
        payload.write_u8(status.to_u8());
        Self::frame(MessageId::Response.to_u16(), payload.bytes())
    }

    /// Status echo for a message id this stack does not know
    pub fn unsupported(original_raw_id: u16) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u16(original_raw_id);
        payload.write_u8(Status::UnsupportedMessage.to_u8());
        Self::frame(MessageId::Response.to_u16(), payload.bytes())
    }

    pub fn download_request(
        file_index: u16,
        data_offset: u32,
        resume: bool,
        crc_seed: u16,
    ) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u16(file_index);
        payload.write_u32(data_offset);
        payload.write_u8(resume as u8);
        payload.write_u16(crc_seed);
        Self::frame(MessageId::DownloadRequest.to_u16(), payload.bytes())
    }

    pub fn upload_request(
        file_index: u16,
        total_size: u32,
        data_offset: u32,
        crc_seed: u16,
    ) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u16(file_index);
        payload.write_u32(total_size);
        payload.write_u32(data_offset);
        payload.write_u16(crc_seed);
        Self::frame(MessageId::UploadRequest.to_u16(), payload.bytes())
    }

    pub fn create_file(file_size: u32, data_type: u8, sub_type: u8, file_number: u16) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u32(file_size);
        payload.write_u8(data_type);
        payload.write_u8(sub_type);
        payload.write_u16(file_number);
        payload.write_u8(0); // reserved
        Self::frame(MessageId::CreateFile.to_u16(), payload.bytes())
    }

    pub fn file_transfer_data(flags: u8, crc: u16, data_offset: u32, data: &[u8]) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u8(flags);
        payload.write_u16(crc);
        payload.write_u32(data_offset);
        payload.write_bytes(data);
        Self::frame(MessageId::FileTransferData.to_u16(), payload.bytes())
    }

    pub fn file_transfer_data_status(status: Status, response: u8, next_offset: u32) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u16(MessageId::FileTransferData.to_u16());
        payload.write_u8(status.to_u8());
        payload.write_u8(response);
        payload.write_u32(next_offset);
        Self::frame(MessageId::Response.to_u16(), payload.bytes())
    }

    pub fn set_file_flags(file_index: u16, flags: u8) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u16(file_index);
        payload.write_u8(flags);
        Self::frame(MessageId::SetFileFlags.to_u16(), payload.bytes())
    }

    pub fn system_event(event: SystemEventType, value: u8) -> Vec<u8> {
        let payload = [event as u8, value];
        Self::frame(MessageId::SystemEvent.to_u16(), &payload)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn device_information_response(
        protocol_version: u16,
        product_number: u16,
        unit_number: u32,
        software_version: u16,
        max_packet_size: u16,
        friendly_name: &str,
        device_name: &str,
        device_model: &str,
    ) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u16(MessageId::DeviceInformation.to_u16());
        payload.write_u8(Status::Ack.to_u8());
        payload.write_u16(protocol_version);
        payload.write_u16(product_number);
        payload.write_u32(unit_number);
        payload.write_u16(software_version);
        payload.write_u16(max_packet_size);
        for text in [friendly_name, device_name, device_model] {
            payload.write_bytes(text.as_bytes());
            payload.write_u8(0);
        }
        Self::frame(MessageId::Response.to_u16(), payload.bytes())
    }

    pub fn current_time_response(
        reference_id: u32,
        garmin_timestamp: u32,
        timezone_offset_seconds: i32,
    ) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u16(MessageId::CurrentTimeRequest.to_u16());
        payload.write_u8(Status::Ack.to_u8());
        payload.write_u32(reference_id);
        payload.write_u32(garmin_timestamp);
        payload.write_i32(timezone_offset_seconds);
        Self::frame(MessageId::Response.to_u16(), payload.bytes())
    }

    pub fn configuration_response(capabilities: &[u8]) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u16(MessageId::Configuration.to_u16());
        payload.write_u8(Status::Ack.to_u8());
        payload.write_u8(capabilities.len() as u8);
        payload.write_bytes(capabilities);
        Self::frame(MessageId::Response.to_u16(), payload.bytes())
    }

    pub fn supported_file_types_request() -> Vec<u8> {
        Self::frame(MessageId::SupportedFileTypes.to_u16(), &[])
    }

    pub fn set_device_settings(settings: &[(DeviceSetting, SettingValue)]) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u8(settings.len() as u8);
        for (setting, value) in settings {
            payload.write_u8(*setting as u8);
            match value {
                SettingValue::Bool(v) => {
                    payload.write_u8(1);
                    payload.write_u8(*v as u8);
                }
                SettingValue::U32(v) => {
                    payload.write_u8(4);
                    payload.write_u32(*v);
                }
                SettingValue::I32(v) => {
                    payload.write_u8(4);
                    payload.write_i32(*v);
                }
                SettingValue::Text(v) => {
                    payload.write_u8(v.len() as u8);
                    payload.write_bytes(v.as_bytes());
                }
            }
        }
        Self::frame(MessageId::DeviceSettings.to_u16(), payload.bytes())
    }

    pub fn notification_update(
        update: NotificationUpdateType,
        category: u8,
        count: u8,
        notification_id: i32,
    ) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u8(update as u8);
        payload.write_u8(category);
        payload.write_u8(count);
        payload.write_i32(notification_id);
        Self::frame(MessageId::NotificationUpdate.to_u16(), payload.bytes())
    }

    pub fn notification_data(
        total_size: u16,
        crc: u16,
        data_offset: u16,
        chunk: &[u8],
    ) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u16(total_size);
        payload.write_u16(crc);
        payload.write_u16(data_offset);
        payload.write_bytes(chunk);
        Self::frame(MessageId::NotificationData.to_u16(), payload.bytes())
    }

    pub fn notification_data_status(status: Status, transfer_status: u8) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u16(MessageId::NotificationData.to_u16());
        payload.write_u8(status.to_u8());
        payload.write_u8(transfer_status);
        Self::frame(MessageId::Response.to_u16(), payload.bytes())
    }

    pub fn protobuf(
        message_id: MessageId,
        request_id: u16,
        data_offset: u32,
        total_length: u32,
        chunk: &[u8],
    ) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u16(request_id);
        payload.write_u32(data_offset);
        payload.write_u32(total_length);
        payload.write_u32(chunk.len() as u32);
        payload.write_bytes(chunk);
        Self::frame(message_id.to_u16(), payload.bytes())
    }

    pub fn protobuf_status(
        message_id: MessageId,
        request_id: u16,
        data_offset: u32,
        chunk_status: u8,
        error_code: u8,
    ) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        payload.write_u16(message_id.to_u16());
        payload.write_u8(Status::Ack.to_u8());
        payload.write_u16(request_id);
        payload.write_u32(data_offset);
        payload.write_u8(chunk_status);
        payload.write_u8(error_code);
        Self::frame(MessageId::Response.to_u16(), payload.bytes())
    }

    /// Push FIT record definitions ahead of their data records
    pub fn fit_definition(definitions: &[Arc<RecordDefinition>]) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        for definition in definitions {
            definition.generate(&mut payload);
        }
        Self::frame(MessageId::FitDefinition.to_u16(), payload.bytes())
    }

    /// Push FIT data records whose definitions were already announced
    pub fn fit_data(records: &[RecordData]) -> Vec<u8> {
        let mut payload = ByteWriter::new();
        for record in records {
            record.generate(&mut payload);
        }
        Self::frame(MessageId::FitData.to_u16(), payload.bytes())
    }
}
