//! Notification forwarding over GFDI
//!
//! The phone announces notifications with `NotificationUpdate` packets; the
//! device pulls the details it wants with a GET_NOTIFICATION_ATTRIBUTES
//! control command, and the attribute data is pushed back in chunked
//! `NotificationData` packets. At most [`MAX_QUEUED_NOTIFICATIONS`] are kept
//! live on the device; posting beyond that silently drops the oldest on our
//! side without a remove, so the device keeps showing it until it ages out.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use chrono::{TimeZone, Utc};
use log::{debug, info, warn};

use crate::checksum::compute_crc;
use crate::device::{HandlerOutcome, MessageHandler};
use crate::fit::field::truncate_utf8;
use crate::messages::{
    AttributeRequest, GfdiMessage, MessageGenerator, NotificationAttribute,
    NotificationControlCommand, NotificationUpdateType, Status,
};
use crate::reader::ByteWriter;
use crate::types::DeviceEvent;

/// Upper bound on notifications tracked on the device at once
pub const MAX_QUEUED_NOTIFICATIONS: usize = 10;

const NOTIFICATION_CHUNK_SIZE: usize = 300;
const GET_NOTIFICATION_ATTRIBUTES: u8 = 0;
const TRANSFER_STATUS_OK: u8 = 0;

const ACTION_FLAG_REPLY: u8 = 0x01;

/// Notification categories as the device understands them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NotificationKind {
    Other = 0,
    IncomingCall = 1,
    MissedCall = 2,
    Voicemail = 3,
    Social = 4,
    Schedule = 5,
    Email = 6,
    News = 7,
    HealthAndFitness = 8,
    BusinessAndFinance = 9,
    Location = 10,
    Entertainment = 11,
}

/// An action the wearer can trigger from the watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    pub id: u8,
    pub label: String,
    pub takes_reply: bool,
}

/// A phone-side notification forwarded to the device
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: i32,
    pub kind: NotificationKind,
    pub app_identifier: String,
    pub title: String,
    pub subtitle: String,
    pub body: String,
    /// Unix seconds
    pub timestamp: i64,
    pub actions: Vec<NotificationAction>,
}

struct NotificationUpload {
    data: Vec<u8>,
    offset: usize,
    running_crc: u16,
}

/// Bounded notification queue plus the attribute upload state machine
pub struct NotificationsHandler {
    enabled: bool,
    queue: VecDeque<Notification>,
    upload: Option<NotificationUpload>,
    current_call: Option<i32>,
}

impl Default for NotificationsHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationsHandler {
    pub fn new() -> Self {
        NotificationsHandler {
            enabled: false,
            queue: VecDeque::with_capacity(MAX_QUEUED_NOTIFICATIONS),
            upload: None,
            current_call: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn category_count(&self, kind: NotificationKind) -> u8 {
        self.queue.iter().filter(|n| n.kind == kind).count() as u8
    }

    /// Queue a notification and build its announcement packet.
    ///
    /// Posting an id that is already queued replaces it and announces a
    /// modification. Returns `None` while the device has not subscribed.
    pub fn post(&mut self, notification: Notification) -> Option<Vec<u8>> {
        let kind = notification.kind;
        let id = notification.id;

        let update = if let Some(existing) =
            self.queue.iter_mut().find(|n| n.id == notification.id)
        {
            *existing = notification;
            NotificationUpdateType::Modify
        } else {
            if self.queue.len() >= MAX_QUEUED_NOTIFICATIONS {
                // Dropped locally only; the device was never told to remove it
                if let Some(evicted) = self.queue.pop_front() {
                    debug!("Notification queue full, dropping {}", evicted.id);
                }
            }
            self.queue.push_back(notification);
            NotificationUpdateType::Add
        };

        if !self.enabled {
            return None;
        }
        info!("Announcing notification {id} ({update:?})");
        Some(MessageGenerator::notification_update(
            update,
            kind as u8,
            self.category_count(kind),
            id,
        ))
    }

    /// Drop a notification and build the removal announcement
    pub fn dismiss(&mut self, notification_id: i32) -> Option<Vec<u8>> {
        let position = self.queue.iter().position(|n| n.id == notification_id)?;
        let removed = self.queue.remove(position)?;
        if !self.enabled {
            return None;
        }
        Some(MessageGenerator::notification_update(
            NotificationUpdateType::Remove,
            removed.kind as u8,
            self.category_count(removed.kind),
            removed.id,
        ))
    }

    /// Reflect the phone's call state as a synthetic notification.
    ///
    /// A ringing call posts an incoming-call notification keyed by the
    /// number; any other state tears it down again.
    pub fn set_call_state(
        &mut self,
        ringing: bool,
        caller: Option<&str>,
        number: Option<&str>,
    ) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        if let Some(id) = self.current_call.take() {
            packets.extend(self.dismiss(id));
        }
        if !ringing {
            return packets;
        }

        let number = number.unwrap_or("");
        let mut hasher = DefaultHasher::new();
        number.hash(&mut hasher);
        let id = hasher.finish() as i32;

        let notification = Notification {
            id,
            kind: NotificationKind::IncomingCall,
            app_identifier: "call".to_string(),
            title: caller.unwrap_or(number).to_string(),
            subtitle: String::new(),
            body: number.to_string(),
            timestamp: Utc::now().timestamp(),
            actions: vec![
                NotificationAction {
                    id: 0,
                    label: "Answer".to_string(),
                    takes_reply: false,
                },
                NotificationAction {
                    id: 1,
                    label: "Reject".to_string(),
                    takes_reply: false,
                },
            ],
        };
        self.current_call = Some(id);
        packets.extend(self.post(notification));
        packets
    }

    fn attribute_value(notification: &Notification, request: &AttributeRequest) -> Vec<u8> {
        let max = request.max_length.map(|m| m as usize).unwrap_or(usize::MAX);
        let text = match request.attribute {
            NotificationAttribute::AppIdentifier => notification.app_identifier.clone(),
            NotificationAttribute::Title => truncate_utf8(&notification.title, max).to_string(),
            NotificationAttribute::Subtitle => {
                truncate_utf8(&notification.subtitle, max).to_string()
            }
            NotificationAttribute::Message => truncate_utf8(&notification.body, max).to_string(),
            NotificationAttribute::MessageSize => notification.body.len().to_string(),
            NotificationAttribute::Date => {
                let date = Utc
                    .timestamp_opt(notification.timestamp, 0)
                    .single()
                    .unwrap_or_default();
                date.format("%Y%m%dT%H%M%S").to_string()
            }
            NotificationAttribute::PositiveActionLabel => notification
                .actions
                .first()
                .map(|a| a.label.clone())
                .unwrap_or_default(),
            NotificationAttribute::NegativeActionLabel => notification
                .actions
                .get(1)
                .map(|a| a.label.clone())
                .unwrap_or_default(),
            NotificationAttribute::Actions => {
                let mut writer = ByteWriter::new();
                writer.write_u8(notification.actions.len() as u8);
                for action in &notification.actions {
                    writer.write_u8(action.id);
                    writer.write_u8(if action.takes_reply { ACTION_FLAG_REPLY } else { 0 });
                    writer.write_bytes(action.label.as_bytes());
                    writer.write_u8(0);
                }
                return writer.into_bytes();
            }
        };
        text.into_bytes()
    }

    /// Build the attribute response payload for one GET request.
    ///
    /// Attributes go out in request order except MESSAGE_SIZE, which always
    /// comes last so the device can size its buffer after the fact.
    fn build_attribute_payload(
        notification: &Notification,
        notification_id: i32,
        attributes: &[AttributeRequest],
    ) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write_u8(GET_NOTIFICATION_ATTRIBUTES);
        writer.write_i32(notification_id);

        let (sizes, others): (Vec<_>, Vec<_>) = attributes
            .iter()
            .partition(|r| r.attribute == NotificationAttribute::MessageSize);
        for request in others.iter().chain(sizes.iter()) {
            let value = Self::attribute_value(notification, request);
            writer.write_u8(request.attribute.code());
            writer.write_u16(value.len() as u16);
            writer.write_bytes(&value);
        }
        writer.into_bytes()
    }

    fn next_chunk(&mut self) -> Option<Vec<u8>> {
        let upload = self.upload.as_mut()?;
        let end = (upload.offset + NOTIFICATION_CHUNK_SIZE).min(upload.data.len());
        let chunk = &upload.data[upload.offset..end];
        // the CRC runs over everything sent so far, this chunk included
        upload.running_crc = compute_crc(upload.running_crc, chunk);
        let packet = MessageGenerator::notification_data(
            upload.data.len() as u16,
            upload.running_crc,
            upload.offset as u16,
            chunk,
        );
        upload.offset = end;
        Some(packet)
    }

    fn handle_get_attributes(
        &mut self,
        notification_id: i32,
        attributes: &[AttributeRequest],
    ) -> HandlerOutcome {
        let Some(notification) = self.queue.iter().find(|n| n.id == notification_id) else {
            warn!("Device asked for unknown notification {notification_id}");
            return HandlerOutcome::default();
        };
        debug!(
            "Sending {} attributes for notification {notification_id}",
            attributes.len()
        );
        let payload = Self::build_attribute_payload(notification, notification_id, attributes);
        self.upload = Some(NotificationUpload {
            data: payload,
            offset: 0,
            running_crc: 0,
        });
        match self.next_chunk() {
            Some(packet) => HandlerOutcome::reply(packet),
            None => HandlerOutcome::default(),
        }
    }

    fn handle_data_status(&mut self, status: Status, transfer_status: u8) -> HandlerOutcome {
        if status != Status::Ack || transfer_status != TRANSFER_STATUS_OK {
            warn!("Device aborted notification upload ({status}, transfer status {transfer_status})");
            self.upload = None;
            return HandlerOutcome::default();
        }
        // the upload lives until the device acks the last chunk; completion
        // is confirmed back with an OK transfer status
        let done = self
            .upload
            .as_ref()
            .is_some_and(|u| u.offset >= u.data.len());
        if done {
            self.upload = None;
            return HandlerOutcome::reply(MessageGenerator::notification_data_status(
                Status::Ack,
                TRANSFER_STATUS_OK,
            ));
        }
        match self.next_chunk() {
            Some(packet) => HandlerOutcome::reply(packet),
            None => HandlerOutcome::default(),
        }
    }
}

impl MessageHandler for NotificationsHandler {
    fn handle_message(&mut self, message: &GfdiMessage) -> Option<HandlerOutcome> {
        match message {
            GfdiMessage::NotificationSubscription { enabled } => {
                info!("Notification subscription {}", if *enabled { "enabled" } else { "disabled" });
                self.enabled = *enabled;
                let mut outcome = HandlerOutcome::default();
                outcome
                    .events
                    .push(DeviceEvent::NotificationSubscription { enabled: *enabled });
                Some(outcome)
            }
            GfdiMessage::NotificationControl(NotificationControlCommand::GetAttributes {
                notification_id,
                attributes,
            }) => Some(self.handle_get_attributes(*notification_id, attributes)),
            GfdiMessage::NotificationControl(NotificationControlCommand::PerformAction {
                notification_id,
                action_id,
                reply,
            }) => {
                let mut outcome = HandlerOutcome::default();
                outcome.events.push(DeviceEvent::NotificationAction {
                    notification_id: *notification_id,
                    action_id: *action_id,
                    reply: reply.clone(),
                });
                Some(outcome)
            }
            GfdiMessage::NotificationDataStatus {
                status,
                transfer_status,
            } => Some(self.handle_data_status(*status, *transfer_status)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageParser;
    use crate::reader::ByteReader;

    fn notification(id: i32, kind: NotificationKind) -> Notification {
        Notification {
            id,
            kind,
            app_identifier: "com.example.app".to_string(),
            title: format!("Title {id}"),
            subtitle: String::new(),
            body: format!("Body of {id}"),
            timestamp: 1_700_000_000,
            actions: Vec::new(),
        }
    }

    fn enabled_handler() -> NotificationsHandler {
        let mut handler = NotificationsHandler::new();
        handler.handle_message(&GfdiMessage::NotificationSubscription { enabled: true });
        handler
    }

    fn parse_update(packet: &[u8]) -> (u8, u8, u8, i32) {
        let mut reader = ByteReader::new(&packet[4..packet.len() - 2]);
        (
            reader.read_u8().unwrap(),
            reader.read_u8().unwrap(),
            reader.read_u8().unwrap(),
            reader.read_i32().unwrap(),
        )
    }

    #[test]
    fn test_post_announces_add_then_modify() {
        let mut handler = enabled_handler();
        let packet = handler.post(notification(1, NotificationKind::Email)).unwrap();
        let (update, category, count, id) = parse_update(&packet);
        assert_eq!(update, NotificationUpdateType::Add as u8);
        assert_eq!(category, NotificationKind::Email as u8);
        assert_eq!(count, 1);
        assert_eq!(id, 1);

        let packet = handler.post(notification(1, NotificationKind::Email)).unwrap();
        let (update, _, count, _) = parse_update(&packet);
        assert_eq!(update, NotificationUpdateType::Modify as u8);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_post_before_subscription_is_silent() {
        let mut handler = NotificationsHandler::new();
        assert!(handler.post(notification(1, NotificationKind::Email)).is_none());
        assert_eq!(handler.queue.len(), 1);
    }

    #[test]
    fn eviction_sends_no_device_delete() {
        let mut handler = enabled_handler();
        for id in 0..11 {
            let packet = handler
                .post(notification(id, NotificationKind::Social))
                .unwrap();
            // every announcement is an add or modify, never a remove
            let (update, _, _, _) = parse_update(&packet);
            assert_ne!(update, NotificationUpdateType::Remove as u8);
        }
        assert_eq!(handler.queue.len(), MAX_QUEUED_NOTIFICATIONS);
        // the oldest is gone locally, so its attributes can no longer be served
        assert!(handler.queue.iter().all(|n| n.id != 0));
        assert!(handler.queue.iter().any(|n| n.id == 10));
    }

    #[test]
    fn test_dismiss_announces_remove() {
        let mut handler = enabled_handler();
        handler.post(notification(5, NotificationKind::Social)).unwrap();
        let packet = handler.dismiss(5).unwrap();
        let (update, _, count, id) = parse_update(&packet);
        assert_eq!(update, NotificationUpdateType::Remove as u8);
        assert_eq!(count, 0);
        assert_eq!(id, 5);
        assert!(handler.dismiss(5).is_none());
    }

    #[test]
    fn test_attribute_upload_chunks() {
        let mut handler = enabled_handler();
        let mut big = notification(7, NotificationKind::Email);
        big.body = "x".repeat(700);
        handler.post(big).unwrap();

        let request = GfdiMessage::NotificationControl(NotificationControlCommand::GetAttributes {
            notification_id: 7,
            attributes: vec![
                AttributeRequest {
                    attribute: NotificationAttribute::MessageSize,
                    max_length: None,
                },
                AttributeRequest {
                    attribute: NotificationAttribute::Title,
                    max_length: Some(20),
                },
                AttributeRequest {
                    attribute: NotificationAttribute::Message,
                    max_length: Some(1000),
                },
            ],
        });
        let outcome = handler.handle_message(&request).unwrap();
        let mut collected = Vec::new();
        let mut total_size = 0u16;
        let mut packet = outcome.follow_ups[0].clone();
        let terminal = loop {
            if u16::from_le_bytes([packet[2], packet[3]]) != 5035 {
                break packet;
            }
            let body = &packet[4..packet.len() - 2];
            let mut reader = ByteReader::new(body);
            total_size = reader.read_u16().unwrap();
            let declared_crc = reader.read_u16().unwrap();
            let offset = reader.read_u16().unwrap() as usize;
            assert_eq!(offset, collected.len());
            let chunk = reader.read_bytes(reader.remaining()).unwrap();
            assert!(chunk.len() <= NOTIFICATION_CHUNK_SIZE);
            collected.extend_from_slice(chunk);
            // every chunk carries the CRC over all bytes sent so far,
            // including the very first one of a multi-chunk upload
            assert_eq!(declared_crc, compute_crc(0, &collected));

            let followup = handler
                .handle_message(&GfdiMessage::NotificationDataStatus {
                    status: Status::Ack,
                    transfer_status: TRANSFER_STATUS_OK,
                })
                .unwrap();
            packet = followup.follow_ups[0].clone();
        };

        assert_eq!(collected.len(), total_size as usize);
        // the final ack is answered with an OK transfer status
        match MessageParser::parse(&terminal).unwrap() {
            GfdiMessage::NotificationDataStatus {
                status,
                transfer_status,
            } => {
                assert_eq!(status, Status::Ack);
                assert_eq!(transfer_status, TRANSFER_STATUS_OK);
            }
            other => panic!("unexpected {other:?}"),
        }
        // and the upload is finished, nothing more goes out
        assert!(handler
            .handle_message(&GfdiMessage::NotificationDataStatus {
                status: Status::Ack,
                transfer_status: TRANSFER_STATUS_OK,
            })
            .unwrap()
            .follow_ups
            .is_empty());

        // header: command byte plus notification id
        let mut reader = ByteReader::new(&collected);
        assert_eq!(reader.read_u8().unwrap(), GET_NOTIFICATION_ATTRIBUTES);
        assert_eq!(reader.read_i32().unwrap(), 7);

        // TLVs: title and message first, message size reordered to the end
        let mut codes = Vec::new();
        while !reader.is_empty() {
            let code = reader.read_u8().unwrap();
            let len = reader.read_u16().unwrap() as usize;
            let value = reader.read_bytes(len).unwrap().to_vec();
            codes.push((code, value));
        }
        assert_eq!(codes[0].0, NotificationAttribute::Title.code());
        assert_eq!(codes[1].0, NotificationAttribute::Message.code());
        assert_eq!(codes[1].1.len(), 700);
        assert_eq!(codes[2].0, NotificationAttribute::MessageSize.code());
        assert_eq!(codes[2].1, b"700".to_vec());
    }

    #[test]
    fn test_attribute_date_format() {
        let spec = notification(1, NotificationKind::Email);
        let value = NotificationsHandler::attribute_value(
            &spec,
            &AttributeRequest {
                attribute: NotificationAttribute::Date,
                max_length: None,
            },
        );
        // 1700000000 = 2023-11-14 22:13:20 UTC
        assert_eq!(value, b"20231114T221320".to_vec());
    }

    #[test]
    fn test_title_truncation_is_utf8_safe() {
        let mut spec = notification(1, NotificationKind::Email);
        spec.title = "åäö".to_string();
        let value = NotificationsHandler::attribute_value(
            &spec,
            &AttributeRequest {
                attribute: NotificationAttribute::Title,
                max_length: Some(3),
            },
        );
        assert_eq!(value, "å".as_bytes().to_vec());
    }

    #[test]
    fn test_perform_action_surfaces_event() {
        let mut handler = enabled_handler();
        let outcome = handler
            .handle_message(&GfdiMessage::NotificationControl(
                NotificationControlCommand::PerformAction {
                    notification_id: 3,
                    action_id: 1,
                    reply: Some("ok".to_string()),
                },
            ))
            .unwrap();
        assert!(matches!(
            outcome.events[0],
            DeviceEvent::NotificationAction {
                notification_id: 3,
                action_id: 1,
                ref reply,
            } if reply.as_deref() == Some("ok")
        ));
    }

    #[test]
    fn test_call_state_posts_and_dismisses() {
        let mut handler = enabled_handler();
        let packets = handler.set_call_state(true, Some("Alice"), Some("+4670123456"));
        assert_eq!(packets.len(), 1);
        let (update, category, _, id) = parse_update(&packets[0]);
        assert_eq!(update, NotificationUpdateType::Add as u8);
        assert_eq!(category, NotificationKind::IncomingCall as u8);

        let packets = handler.set_call_state(false, None, None);
        assert_eq!(packets.len(), 1);
        let (update, _, _, removed_id) = parse_update(&packets[0]);
        assert_eq!(update, NotificationUpdateType::Remove as u8);
        assert_eq!(removed_id, id);
        assert!(handler.set_call_state(false, None, None).is_empty());
    }

    #[test]
    fn test_unrelated_message_not_claimed() {
        let mut handler = enabled_handler();
        assert!(handler
            .handle_message(&GfdiMessage::FindMyPhoneCancel)
            .is_none());
        // parser integration: a subscription packet round-trips into a claim
        let packet = MessageGenerator::frame(5036, &[1]);
        let message = MessageParser::parse(&packet).unwrap();
        assert!(handler.handle_message(&message).is_some());
    }
}
