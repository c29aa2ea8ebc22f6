//! Protobuf request/response transport and the Smart service envelope
//!
//! Large protobuf payloads travel in `ProtobufRequest`/`ProtobufResponse`
//! packets of at most [`PROTOBUF_CHUNK_SIZE`] bytes, each carrying a request
//! id, an offset and the total length. This module reassembles inbound
//! fragments, drives outbound chunking off the per-chunk statuses, and
//! routes complete payloads by their Smart envelope field: calendar requests
//! are answered synchronously, device-status responses surface as events,
//! and core-service messages are one-way.
//!
//! Encoding and decoding is done with small hand-rolled wire helpers rather
//! than generated code; the handful of messages involved does not justify a
//! schema toolchain.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::device::{HandlerOutcome, MessageHandler};
use crate::messages::{GfdiMessage, MessageGenerator, MessageId, Status};
use crate::types::DeviceEvent;

/// Largest protobuf fragment sent in one GFDI packet
pub const PROTOBUF_CHUNK_SIZE: usize = 375;

const WIRE_VARINT: u8 = 0;
const WIRE_LENGTH_DELIMITED: u8 = 2;

// Smart envelope fields
const SMART_CALENDAR_SERVICE: u32 = 1;
const SMART_DEVICE_STATUS_SERVICE: u32 = 8;
const SMART_FIND_MY_WATCH_SERVICE: u32 = 9;
const SMART_CORE_SERVICE: u32 = 13;

const CHUNK_OK: u8 = 0;
const CHUNK_DISCARDED: u8 = 1;
const ERROR_NONE: u8 = 0;
const ERROR_OFFSET_MISMATCH: u8 = 2;

/// Encode a varint into `buf`
pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a varint, returning the value and the bytes consumed
pub(crate) fn decode_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().take(10).enumerate() {
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
    None
}

/// Encode a field key (field number plus wire type)
pub(crate) fn encode_field_key(buf: &mut Vec<u8>, field: u32, wire_type: u8) {
    encode_varint(buf, (u64::from(field) << 3) | u64::from(wire_type));
}

/// Encode a nested message or byte field
pub(crate) fn encode_length_delimited(buf: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    encode_field_key(buf, field, WIRE_LENGTH_DELIMITED);
    encode_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Encode a varint field
pub(crate) fn encode_varint_field(buf: &mut Vec<u8>, field: u32, value: u64) {
    encode_field_key(buf, field, WIRE_VARINT);
    encode_varint(buf, value);
}

/// Parse one field, returning (field number, wire type, value bytes, bytes consumed).
///
/// For varint fields the value bytes are the raw varint; for
/// length-delimited fields they are the contained bytes.
pub(crate) fn parse_field(data: &[u8]) -> Option<(u32, u8, &[u8], usize)> {
    let (key, key_len) = decode_varint(data)?;
    let field = (key >> 3) as u32;
    let wire_type = (key & 0x07) as u8;
    let mut cursor = key_len;

    match wire_type {
        WIRE_VARINT => {
            let (_, value_len) = decode_varint(&data[cursor..])?;
            let value = &data[cursor..cursor + value_len];
            cursor += value_len;
            Some((field, wire_type, value, cursor))
        }
        WIRE_LENGTH_DELIMITED => {
            let (length, len_len) = decode_varint(&data[cursor..])?;
            cursor += len_len;
            let end = cursor.checked_add(length as usize)?;
            if end > data.len() {
                warn!(
                    "Length-delimited field {field} claims {length} bytes but {} remain",
                    data.len() - cursor
                );
                return None;
            }
            let value = &data[cursor..end];
            Some((field, wire_type, value, end))
        }
        other => {
            warn!("Unsupported wire type {other} for field {field}");
            None
        }
    }
}

/// A calendar event served to the watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub title: String,
    pub location: Option<String>,
    pub description: Option<String>,
    /// Unix seconds
    pub start: i64,
    /// Unix seconds
    pub end: i64,
    pub all_day: bool,
}

/// Source of calendar events for watch-side agenda queries
pub trait CalendarProvider: Send + Sync {
    fn events_between(&self, start: i64, end: i64, max_events: usize) -> Vec<CalendarEvent>;
}

/// The time range and limits of a watch calendar query
#[derive(Debug, Clone, PartialEq, Eq)]
struct CalendarRequest {
    start_date: u64,
    end_date: u64,
    max_title_length: usize,
    max_location_length: usize,
    max_events: usize,
}

impl Default for CalendarRequest {
    fn default() -> Self {
        CalendarRequest {
            start_date: 0,
            end_date: 0,
            max_title_length: 0,
            max_location_length: 0,
            max_events: 100,
        }
    }
}

struct InboundFragment {
    message_id: MessageId,
    total_length: usize,
    data: Vec<u8>,
}

struct OutboundTransfer {
    message_id: MessageId,
    data: Vec<u8>,
    offset: usize,
}

/// Fragment reassembly plus Smart envelope routing
pub struct ProtobufHandler {
    calendar: Option<Arc<dyn CalendarProvider>>,
    inbound: HashMap<u16, InboundFragment>,
    outbound: HashMap<u16, OutboundTransfer>,
    next_request_id: u16,
}

impl ProtobufHandler {
    pub fn new(calendar: Option<Arc<dyn CalendarProvider>>) -> Self {
        ProtobufHandler {
            calendar,
            inbound: HashMap::new(),
            outbound: HashMap::new(),
            next_request_id: 0,
        }
    }

    fn next_request_id(&mut self) -> u16 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    /// Start sending a protobuf payload; returns the first chunk packet.
    ///
    /// Later chunks go out as the device acknowledges each one.
    fn send_payload(&mut self, message_id: MessageId, request_id: u16, payload: Vec<u8>) -> Vec<u8> {
        let total = payload.len();
        let first_len = total.min(PROTOBUF_CHUNK_SIZE);
        let packet = MessageGenerator::protobuf(
            message_id,
            request_id,
            0,
            total as u32,
            &payload[..first_len],
        );
        if first_len < total {
            self.outbound.insert(
                request_id,
                OutboundTransfer {
                    message_id,
                    data: payload,
                    offset: first_len,
                },
            );
        }
        packet
    }

    /// Ask the device for its battery status
    pub fn battery_status_request(&mut self) -> Vec<u8> {
        let mut request = Vec::new();
        // DeviceStatusService { remote_device_battery_status_request {} }
        let mut service = Vec::new();
        encode_length_delimited(&mut service, 1, &[]);
        encode_length_delimited(&mut request, SMART_DEVICE_STATUS_SERVICE, &service);

        let request_id = self.next_request_id();
        debug!("Requesting battery status (request {request_id})");
        self.send_payload(MessageId::ProtobufRequest, request_id, request)
    }

    /// Make the watch beep so the wearer can find it, or stop it again
    pub fn find_my_watch(&mut self, start: bool, duration_seconds: u32) -> Vec<u8> {
        let mut service = Vec::new();
        if start {
            let mut inner = Vec::new();
            encode_varint_field(&mut inner, 1, u64::from(duration_seconds));
            encode_length_delimited(&mut service, 1, &inner);
        } else {
            encode_length_delimited(&mut service, 2, &[]);
        }
        let mut request = Vec::new();
        encode_length_delimited(&mut request, SMART_FIND_MY_WATCH_SERVICE, &service);

        let request_id = self.next_request_id();
        self.send_payload(MessageId::ProtobufRequest, request_id, request)
    }

    fn handle_chunk(
        &mut self,
        message_id: MessageId,
        request_id: u16,
        data_offset: u32,
        total_length: u32,
        payload: &[u8],
    ) -> HandlerOutcome {
        let offset = data_offset as usize;
        let total = total_length as usize;

        if offset == 0 {
            if self.inbound.remove(&request_id).is_some() {
                warn!("Request {request_id} restarted at offset zero, dropping old fragment");
            }
            self.inbound.insert(
                request_id,
                InboundFragment {
                    message_id,
                    total_length: total,
                    data: payload.to_vec(),
                },
            );
        } else {
            let Some(fragment) = self.inbound.get_mut(&request_id) else {
                warn!("Chunk at offset {offset} for unknown request {request_id}");
                return HandlerOutcome::reply(MessageGenerator::protobuf_status(
                    message_id,
                    request_id,
                    data_offset,
                    CHUNK_DISCARDED,
                    ERROR_OFFSET_MISMATCH,
                ));
            };
            if offset != fragment.data.len() {
                warn!(
                    "Chunk at offset {offset} does not extend request {request_id} at {}",
                    fragment.data.len()
                );
                self.inbound.remove(&request_id);
                return HandlerOutcome::reply(MessageGenerator::protobuf_status(
                    message_id,
                    request_id,
                    data_offset,
                    CHUNK_DISCARDED,
                    ERROR_OFFSET_MISMATCH,
                ));
            }
            fragment.data.extend_from_slice(payload);
        }

        let mut outcome = HandlerOutcome::reply(MessageGenerator::protobuf_status(
            message_id,
            request_id,
            data_offset,
            CHUNK_OK,
            ERROR_NONE,
        ));

        let complete = self
            .inbound
            .get(&request_id)
            .is_some_and(|f| f.data.len() >= f.total_length);
        if complete {
            if let Some(fragment) = self.inbound.remove(&request_id) {
                let routed = self.route_smart(request_id, &fragment);
                outcome.follow_ups.extend(routed.follow_ups);
                outcome.events.extend(routed.events);
            }
        }
        outcome
    }

    fn handle_status(&mut self, status: Status, request_id: u16, chunk_status: u8) -> HandlerOutcome {
        if status != Status::Ack || chunk_status != CHUNK_OK {
            if self.outbound.remove(&request_id).is_some() {
                warn!("Device rejected protobuf chunk of request {request_id}, aborting");
            }
            return HandlerOutcome::default();
        }
        let Some(transfer) = self.outbound.get_mut(&request_id) else {
            return HandlerOutcome::default();
        };
        let end = (transfer.offset + PROTOBUF_CHUNK_SIZE).min(transfer.data.len());
        let packet = MessageGenerator::protobuf(
            transfer.message_id,
            request_id,
            transfer.offset as u32,
            transfer.data.len() as u32,
            &transfer.data[transfer.offset..end],
        );
        transfer.offset = end;
        if transfer.offset >= transfer.data.len() {
            self.outbound.remove(&request_id);
        }
        HandlerOutcome::reply(packet)
    }

    fn route_smart(&mut self, request_id: u16, fragment: &InboundFragment) -> HandlerOutcome {
        let mut outcome = HandlerOutcome::default();
        let mut cursor = 0;
        while cursor < fragment.data.len() {
            let Some((field, _, value, consumed)) = parse_field(&fragment.data[cursor..]) else {
                warn!("Malformed Smart envelope in request {request_id}");
                break;
            };
            match field {
                SMART_CALENDAR_SERVICE => {
                    outcome
                        .follow_ups
                        .extend(self.answer_calendar_request(request_id, value));
                }
                SMART_DEVICE_STATUS_SERVICE => {
                    if let Some(event) = parse_battery_status(value) {
                        outcome.events.push(event);
                    }
                }
                SMART_FIND_MY_WATCH_SERVICE => {
                    debug!("Find-my-watch service message ({} bytes)", value.len());
                }
                SMART_CORE_SERVICE => {
                    // one-way, nothing to answer
                    debug!("Core service message ({} bytes)", value.len());
                }
                other => {
                    warn!("Unhandled Smart service field {other} in request {request_id}");
                }
            }
            cursor += consumed;
        }
        outcome
    }

    fn answer_calendar_request(&mut self, request_id: u16, service: &[u8]) -> Option<Vec<u8>> {
        let request = parse_calendar_request(service)?;
        info!(
            "Calendar query from {} to {}, at most {} events",
            request.start_date, request.end_date, request.max_events
        );
        let events = match &self.calendar {
            Some(provider) => provider.events_between(
                request.start_date as i64,
                request.end_date as i64,
                request.max_events,
            ),
            None => Vec::new(),
        };
        let payload = encode_calendar_response(&request, &events);
        Some(self.send_payload(MessageId::ProtobufResponse, request_id, payload))
    }
}

impl MessageHandler for ProtobufHandler {
    fn handle_message(&mut self, message: &GfdiMessage) -> Option<HandlerOutcome> {
        match message {
            GfdiMessage::Protobuf {
                message_id,
                request_id,
                data_offset,
                total_length,
                payload,
            } => Some(self.handle_chunk(
                *message_id,
                *request_id,
                *data_offset,
                *total_length,
                payload,
            )),
            GfdiMessage::ProtobufStatus {
                status,
                request_id,
                chunk_status,
                ..
            } => Some(self.handle_status(*status, *request_id, *chunk_status)),
            _ => None,
        }
    }
}

/// CalendarService { calendar_events_request { ... } }
fn parse_calendar_request(service: &[u8]) -> Option<CalendarRequest> {
    let mut cursor = 0;
    let mut request_bytes = None;
    while cursor < service.len() {
        let (field, _, value, consumed) = parse_field(&service[cursor..])?;
        if field == 1 {
            request_bytes = Some(value);
            break;
        }
        cursor += consumed;
    }
    let request_bytes = request_bytes?;

    let mut request = CalendarRequest::default();
    let mut cursor = 0;
    while cursor < request_bytes.len() {
        let (field, _, value, consumed) = parse_field(&request_bytes[cursor..])?;
        let varint = decode_varint(value).map(|(v, _)| v);
        match field {
            1 => request.start_date = varint?,
            2 => request.end_date = varint?,
            11 => request.max_title_length = varint? as usize,
            12 => request.max_location_length = varint? as usize,
            14 => request.max_events = varint? as usize,
            _ => {}
        }
        cursor += consumed;
    }
    Some(request)
}

fn truncated(text: &str, max: usize) -> String {
    if max == 0 {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

/// Smart { calendar_service { calendar_events_response { status, events } } }
fn encode_calendar_response(request: &CalendarRequest, events: &[CalendarEvent]) -> Vec<u8> {
    let mut response = Vec::new();
    // status = OK
    encode_varint_field(&mut response, 1, 1);
    for event in events.iter().take(request.max_events) {
        let mut event_buf = Vec::new();
        encode_length_delimited(
            &mut event_buf,
            2,
            truncated(&event.title, request.max_title_length).as_bytes(),
        );
        if let Some(location) = &event.location {
            encode_length_delimited(
                &mut event_buf,
                3,
                truncated(location, request.max_location_length).as_bytes(),
            );
        }
        if let Some(description) = &event.description {
            encode_length_delimited(&mut event_buf, 4, description.as_bytes());
        }
        encode_varint_field(&mut event_buf, 5, event.start as u64);
        encode_varint_field(&mut event_buf, 6, event.end as u64);
        encode_varint_field(&mut event_buf, 7, u64::from(event.all_day));
        encode_length_delimited(&mut response, 2, &event_buf);
    }

    let mut service = Vec::new();
    encode_length_delimited(&mut service, 2, &response);
    let mut smart = Vec::new();
    encode_length_delimited(&mut smart, SMART_CALENDAR_SERVICE, &service);
    smart
}

/// DeviceStatusService { remote_device_battery_status_response { level, charging } }
fn parse_battery_status(service: &[u8]) -> Option<DeviceEvent> {
    let mut cursor = 0;
    while cursor < service.len() {
        let (field, _, value, consumed) = parse_field(&service[cursor..])?;
        if field == 2 {
            let mut percent = 0u8;
            let mut charging = false;
            let mut inner_cursor = 0;
            while inner_cursor < value.len() {
                let (inner_field, _, inner_value, inner_consumed) =
                    parse_field(&value[inner_cursor..])?;
                let varint = decode_varint(inner_value).map(|(v, _)| v)?;
                match inner_field {
                    1 => percent = varint.min(100) as u8,
                    2 => charging = varint != 0,
                    _ => {}
                }
                inner_cursor += inner_consumed;
            }
            return Some(DeviceEvent::BatteryLevel { percent, charging });
        }
        cursor += consumed;
    }
    None
}
