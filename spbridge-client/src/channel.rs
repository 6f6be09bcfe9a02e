use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{ConnectError, DynConnector, Event, LastWill};
use async_trait::async_trait;
use spbridge_types::{
    payload::Payload,
    topic::{DeviceTopic, NodeTopic, TopicFilter},
};
use tokio::sync::mpsc;

#[derive(Default)]
struct PublishBudget(Mutex<Option<usize>>);

impl PublishBudget {
    fn take(&self) -> bool {
        let mut budget = self.0.lock().unwrap();
        match budget.as_mut() {
            None => true,
            Some(0) => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }
}

/// A [Client](crate::Client) implementation that uses channels for message passing.
///
/// # Examples
///
/// See [ChannelEventLoop]
#[derive(Clone)]
pub struct ChannelClient {
    tx: mpsc::UnboundedSender<OutboundMessage>,
    budget: Arc<PublishBudget>,
    delay: Arc<Mutex<Duration>>,
}

impl ChannelClient {
    async fn send_publish(&self, message: OutboundMessage) -> Result<(), ()> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !self.budget.take() {
            return Err(());
        }
        self.tx.send(message).map_err(|_| ())
    }
}

#[async_trait]
impl crate::Client for ChannelClient {
    async fn disconnect(&self) -> Result<(), ()> {
        match self.tx.send(OutboundMessage::Disconnect) {
            Ok(_) => Ok(()),
            Err(_) => Err(()),
        }
    }

    async fn publish_node_message(&self, topic: NodeTopic, payload: Payload) -> Result<(), ()> {
        self.send_publish(OutboundMessage::NodeMessage { topic, payload })
            .await
    }

    async fn try_publish_node_message(&self, topic: NodeTopic, payload: Payload) -> Result<(), ()> {
        self.publish_node_message(topic, payload).await
    }

    async fn publish_device_message(&self, topic: DeviceTopic, payload: Payload) -> Result<(), ()> {
        self.send_publish(OutboundMessage::DeviceMessage { topic, payload })
            .await
    }

    async fn try_publish_device_message(
        &self,
        topic: DeviceTopic,
        payload: Payload,
    ) -> Result<(), ()> {
        self.publish_device_message(topic, payload).await
    }

    async fn subscribe_many(&self, topics: Vec<TopicFilter>) -> Result<(), ()> {
        match self.tx.send(OutboundMessage::Subscribe(topics)) {
            Ok(_) => Ok(()),
            Err(_) => Err(()),
        }
    }
}

/// A [Connector](crate::Connector) that reports every connection attempt to the [ChannelBroker].
#[derive(Clone)]
pub struct ChannelConnector {
    tx: mpsc::UnboundedSender<()>,
    failures: Arc<AtomicU32>,
}

#[async_trait]
impl crate::Connector for ChannelConnector {
    async fn connect(&self) -> Result<(), ConnectError> {
        self.tx.send(()).map_err(|_| ConnectError::Closed)?;
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ConnectError::Failed("connection refused".into()));
        }
        Ok(())
    }
}

/// An Enum representing different messages and requests a [ChannelClient] can send to the [ChannelBroker]
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundMessage {
    Disconnect,
    NodeMessage {
        topic: NodeTopic,
        payload: Payload,
    },
    DeviceMessage {
        topic: DeviceTopic,
        payload: Payload,
    },
    Subscribe(Vec<TopicFilter>),
}

/// A "broker" that manages the communication between a [ChannelClient] and an [ChannelEventLoop].
///
/// Used to send messages to the eventloop, inspect messages/requests produced by the client and
/// inject publish or connection failures.
///
/// # Examples
///
/// ```no_run
/// use spbridge_client::{Event, channel::{ChannelEventLoop, ChannelClient}};
/// use tokio::runtime::Runtime;
///
/// let rt = Runtime::new().unwrap();
/// rt.block_on(async {
///     let (mut eventloop, client, mut broker) = ChannelEventLoop::new();
///
///     //create a bridge that uses the EventLoop and client
///
///     //Send an event to the EventLoop
///     broker.tx_event.send(Event::Online).unwrap();
///
///     //Receive a message or request from the Client
///     let message = broker.rx_outbound.recv().await.unwrap();
/// });
/// ```
pub struct ChannelBroker {
    pub rx_outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    pub tx_event: mpsc::UnboundedSender<Event>,
    /// Receives one value per connection attempt made through the [ChannelConnector]
    pub rx_connect: mpsc::UnboundedReceiver<()>,
    last_will: Arc<Mutex<Option<LastWill>>>,
    budget: Arc<PublishBudget>,
    delay: Arc<Mutex<Duration>>,
    connect_failures: Arc<AtomicU32>,
}

impl ChannelBroker {
    /// Retrieves the current last will message set by the EventLoop, if set.
    pub fn last_will(&self) -> Option<LastWill> {
        self.last_will.lock().unwrap().clone()
    }

    /// Accept `count` more publishes, then reject every publish until [ChannelBroker::restore_publishes] is called.
    pub fn fail_publishes_after(&self, count: usize) {
        *self.budget.0.lock().unwrap() = Some(count);
    }

    /// Accept every publish again.
    pub fn restore_publishes(&self) {
        *self.budget.0.lock().unwrap() = None;
    }

    /// Hold every publish for `delay` before it is accepted or rejected.
    pub fn delay_publishes(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }
}

/// An [EventLoop](crate::EventLoop) implementation that uses channels
///
/// # Examples
///
/// See [ChannelBroker]
pub struct ChannelEventLoop {
    rx: mpsc::UnboundedReceiver<Event>,
    last_will: Arc<Mutex<Option<LastWill>>>,
    connector: ChannelConnector,
}

impl ChannelEventLoop {
    /// Creates a new event loop along with the corresponding client and broker.
    pub fn new() -> (Self, ChannelClient, ChannelBroker) {
        let (tx_event, rx_event) = mpsc::unbounded_channel();
        let (tx_outbound, rx_outbound) = mpsc::unbounded_channel();
        let (tx_connect, rx_connect) = mpsc::unbounded_channel();
        let last_will = Arc::new(Mutex::new(None));
        let budget = Arc::new(PublishBudget::default());
        let delay = Arc::new(Mutex::new(Duration::ZERO));
        let connect_failures = Arc::new(AtomicU32::new(0));
        let el = Self {
            rx: rx_event,
            last_will: last_will.clone(),
            connector: ChannelConnector {
                tx: tx_connect,
                failures: connect_failures.clone(),
            },
        };
        (
            el,
            ChannelClient {
                tx: tx_outbound,
                budget: budget.clone(),
                delay: delay.clone(),
            },
            ChannelBroker {
                rx_outbound,
                tx_event,
                rx_connect,
                last_will,
                budget,
                delay,
                connect_failures,
            },
        )
    }
}

#[async_trait]
impl crate::EventLoop for ChannelEventLoop {
    async fn poll(&mut self) -> Event {
        match self.rx.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    fn set_last_will(&mut self, will: LastWill) {
        let mut lw = self.last_will.lock().unwrap();
        *lw = Some(will)
    }

    fn connector(&self) -> Arc<DynConnector> {
        Arc::new(self.connector.clone())
    }
}
