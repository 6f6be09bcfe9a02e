use std::string::FromUtf8Error;

use prost::DecodeError;
use spbridge_types::{
    payload::Payload,
    topic::{NodeMessage as NodeMessageType, NodeTopic, QoS},
};
use thiserror::Error;

/// Error types for message processing operations.
///
/// This enum represents the various error conditions that can occur
/// when decoding sparkplug protobuf payloads or validating topics.
#[derive(Error, Debug, PartialEq)]
pub enum MessageError {
    #[error("There was an error decoding the payload: {0}")]
    DecodePayloadError(DecodeError),
    #[error("The topic was invalid")]
    InvalidSparkplugTopic,
    #[error("Topic parts utf8 decode error: {0}")]
    TopicUtf8Error(FromUtf8Error),
}

impl From<FromUtf8Error> for MessageError {
    fn from(e: FromUtf8Error) -> Self {
        MessageError::TopicUtf8Error(e)
    }
}

/// Errors reported by a [Connector](crate::Connector) attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    #[error("connection attempt timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Failed(String),
    #[error("transport closed")]
    Closed,
}

/// An enum representing the different type of message.
#[derive(Debug, PartialEq)]
pub enum MessageKind {
    Birth,
    Death,
    Cmd,
    Data,
    Other(String),
}

/// A Message structure containing payload and the type of topic it was received on
#[derive(Debug, PartialEq)]
pub struct Message {
    pub payload: Payload,
    pub kind: MessageKind,
}

/// Represents a message from a Node.
#[derive(Debug, PartialEq)]
pub struct NodeMessage {
    /// The group the node belongs to.
    pub group_id: String,
    /// The nodes unique identifier.
    pub node_id: String,
    /// The message.
    pub message: Message,
}

/// Represents a message from a Device.
#[derive(Debug, PartialEq)]
pub struct DeviceMessage {
    /// The group the node belongs to.
    pub group_id: String,
    /// The nodes unique identifier.
    pub node_id: String,
    /// The devices unique identifier.
    pub device_id: String,
    /// The message.
    pub message: Message,
}

/// An enum that represents the different types of events an [EventLoop](crate::EventLoop) implementation can produce.
#[derive(Debug, PartialEq)]
pub enum Event {
    Offline,
    Online,
    Node(NodeMessage),
    Device(DeviceMessage),
    InvalidPublish {
        reason: MessageError,
        topic: Vec<u8>,
        payload: Vec<u8>,
    },
}

/// Structure representing the last will of a Node
#[derive(Debug, Clone, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub retain: bool,
    pub qos: QoS,
    pub payload: Vec<u8>,
}

impl LastWill {
    pub fn new_node(group: &str, node_id: &str, payload: Payload) -> Self {
        let topic = NodeTopic::new(group, NodeMessageType::NDeath, node_id);
        let (qos, retain) = topic.get_publish_quality_retain();
        Self {
            retain,
            qos,
            payload: payload.into(),
            topic: topic.topic,
        }
    }
}
