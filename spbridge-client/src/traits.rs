use std::sync::Arc;

use async_trait::async_trait;
use spbridge_types::{
    payload::Payload,
    topic::{DeviceTopic, NodeTopic, TopicFilter},
};

use crate::{ConnectError, Event, LastWill};

#[async_trait]
pub trait Client {
    /// Disconnects the client.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the disconnection was successful
    /// - `Err(())` if the disconnection failed
    async fn disconnect(&self) -> Result<(), ()>;

    /// Publishes a message to a node-specific topic.
    ///
    /// This method will yield to the async runtime until the message is accepted by the client
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the message was successfully published
    /// - `Err(())` if the publication failed
    async fn publish_node_message(&self, topic: NodeTopic, payload: Payload) -> Result<(), ()>;

    /// Attempts to publish a message to a node-specific topic.
    ///
    /// Unlike `publish_node_message`, this method may return early if the client cannot process the message
    /// e.g the message queue is full.
    async fn try_publish_node_message(&self, topic: NodeTopic, payload: Payload) -> Result<(), ()>;

    /// Publishes a message to a device-specific topic.
    ///
    /// This method will yield to the async runtime until the message is accepted by the client
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the message was successfully published
    /// - `Err(())` if the publication failed
    async fn publish_device_message(&self, topic: DeviceTopic, payload: Payload) -> Result<(), ()>;

    /// Attempts to publish a message to a device-specific topic.
    ///
    /// Unlike `publish_device_message`, this method may return early if the client cannot process the message
    /// e.g the message queue is full.
    async fn try_publish_device_message(
        &self,
        topic: DeviceTopic,
        payload: Payload,
    ) -> Result<(), ()>;

    /// Subscribes to a single topic.
    ///
    /// This is a convenience method that calls `subscribe_many` with a single topic.
    async fn subscribe(&self, topic: TopicFilter) -> Result<(), ()> {
        self.subscribe_many(vec![topic]).await
    }

    /// Subscribes to multiple topics in a single operation.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if all subscriptions were successful
    /// - `Err(())` if any subscription failed
    async fn subscribe_many(&self, topics: Vec<TopicFilter>) -> Result<(), ()>;
}

pub type DynClient = dyn Client + Send + Sync;

/// A single connection attempt for a long lived transport.
///
/// Implementations perform one attempt and report the outcome; scheduling further attempts is
/// the job of a [RetryController](crate::RetryController).
#[async_trait]
pub trait Connector {
    async fn connect(&self) -> Result<(), ConnectError>;
}

pub type DynConnector = dyn Connector + Send + Sync;

#[async_trait]
pub trait EventLoop {
    /// Wait for the next event from the transport.
    async fn poll(&mut self) -> Event;

    /// Set the last will the transport registers with the broker on its next connection.
    fn set_last_will(&mut self, will: LastWill);

    /// The connector that asks this event loop to establish a broker connection.
    fn connector(&self) -> Arc<DynConnector>;
}

pub type DynEventLoop = dyn EventLoop + Send;
