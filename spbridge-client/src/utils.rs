use crate::{DeviceMessage, Event, Message, MessageError, MessageKind, NodeMessage};

use prost::Message as ProstMessage;
use spbridge_types::{constants::SPBV01, payload::Payload};

enum MessageProducer {
    Device,
    Node,
}

fn process_topic_message(
    message_part: &[u8],
    payload: &[u8],
) -> Result<(MessageProducer, Message), MessageError> {
    if message_part.len() < 2 {
        return Err(MessageError::InvalidSparkplugTopic);
    }
    let producer = match message_part[0] {
        b'N' => MessageProducer::Node,
        b'D' => MessageProducer::Device,
        _ => return Err(MessageError::InvalidSparkplugTopic),
    };

    let payload = Payload::decode(payload).map_err(MessageError::DecodePayloadError)?;

    let kind = match &message_part[1..] {
        b"BIRTH" => MessageKind::Birth,
        b"DEATH" => MessageKind::Death,
        b"DATA" => MessageKind::Data,
        b"CMD" => MessageKind::Cmd,
        other => MessageKind::Other(String::from_utf8(other.into())?),
    };
    Ok((producer, Message { payload, kind }))
}

fn parse(topic: &[u8], payload: &[u8]) -> Result<Event, MessageError> {
    let mut iter = topic.split(|c| *c == b'/');

    match iter.next() {
        Some(namespace) if namespace == SPBV01.as_bytes() => (),
        _ => return Err(MessageError::InvalidSparkplugTopic),
    }

    let group_id = match iter.next() {
        Some(val) => String::from_utf8(val.to_vec())?,
        None => return Err(MessageError::InvalidSparkplugTopic),
    };

    let (message_producer, message) = match iter.next() {
        Some(val) => process_topic_message(val, payload)?,
        None => return Err(MessageError::InvalidSparkplugTopic),
    };

    let node_id = match iter.next() {
        Some(val) => String::from_utf8(val.to_vec())?,
        None => return Err(MessageError::InvalidSparkplugTopic),
    };

    let event = match message_producer {
        MessageProducer::Node => {
            if iter.next().is_some() {
                return Err(MessageError::InvalidSparkplugTopic);
            }
            Event::Node(NodeMessage {
                group_id,
                node_id,
                message,
            })
        }
        MessageProducer::Device => {
            let device_id = match iter.next() {
                Some(val) => String::from_utf8(val.to_vec())?,
                None => return Err(MessageError::InvalidSparkplugTopic),
            };
            if iter.next().is_some() {
                return Err(MessageError::InvalidSparkplugTopic);
            }
            Event::Device(DeviceMessage {
                group_id,
                node_id,
                device_id,
                message,
            })
        }
    };
    Ok(event)
}

/// Convert a raw publish into an [Event].
///
/// Publishes that are not valid Sparkplug messages are reported as [Event::InvalidPublish].
pub fn topic_and_payload_to_event(topic: &[u8], payload: &[u8]) -> Event {
    match parse(topic, payload) {
        Ok(event) => event,
        Err(reason) => Event::InvalidPublish {
            reason,
            topic: topic.to_vec(),
            payload: payload.to_vec(),
        },
    }
}
