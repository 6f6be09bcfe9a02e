use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, trace, warn};
use rumqttc::{
    v5::{
        mqttbytes::{
            v5::{Filter, Packet},
            QoS,
        },
        AsyncClient as RuClient, EventLoop as RuEventLoop,
    },
    Outgoing,
};
use spbridge_types::{
    payload::{Message, Payload},
    topic::{DeviceTopic, NodeTopic, TopicFilter},
};
use tokio::sync::{mpsc, oneshot};

use spbridge_client::{topic_and_payload_to_event, ConnectError, DynConnector, Event, LastWill};

use crate::MqttOptions;

fn qos_to_mqtt_qos(qos: spbridge_types::topic::QoS) -> QoS {
    match qos {
        spbridge_types::topic::QoS::AtMostOnce => QoS::AtMostOnce,
        spbridge_types::topic::QoS::AtLeastOnce => QoS::AtLeastOnce,
    }
}

fn topic_filter_to_mqtt_filter(topic_filter: TopicFilter) -> Filter {
    Filter::new(topic_filter.topic, qos_to_mqtt_qos(topic_filter.qos))
}

/// A [spbridge_client::Client] implementation using [rumqttc]
#[derive(Clone)]
pub struct Client {
    client: RuClient,
}

impl Client {
    async fn publish(
        &self,
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ()> {
        match self.client.publish(topic, qos, retain, payload).await {
            Ok(_) => Ok(()),
            Err(_) => Err(()),
        }
    }

    fn try_publish(&self, topic: String, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<(), ()> {
        match self.client.try_publish(topic, qos, retain, payload) {
            Ok(_) => Ok(()),
            Err(_) => Err(()),
        }
    }
}

#[async_trait]
impl spbridge_client::Client for Client {
    async fn disconnect(&self) -> Result<(), ()> {
        match self.client.disconnect().await {
            Ok(_) => Ok(()),
            Err(_) => Err(()),
        }
    }

    async fn publish_node_message(&self, topic: NodeTopic, payload: Payload) -> Result<(), ()> {
        let (qos, retain) = topic.get_publish_quality_retain();
        self.publish(topic.topic, qos_to_mqtt_qos(qos), retain, payload.encode_to_vec())
            .await
    }

    async fn try_publish_node_message(&self, topic: NodeTopic, payload: Payload) -> Result<(), ()> {
        let (qos, retain) = topic.get_publish_quality_retain();
        self.try_publish(topic.topic, qos_to_mqtt_qos(qos), retain, payload.encode_to_vec())
    }

    async fn publish_device_message(&self, topic: DeviceTopic, payload: Payload) -> Result<(), ()> {
        let (qos, retain) = topic.get_publish_quality_retain();
        self.publish(topic.topic, qos_to_mqtt_qos(qos), retain, payload.encode_to_vec())
            .await
    }

    async fn try_publish_device_message(
        &self,
        topic: DeviceTopic,
        payload: Payload,
    ) -> Result<(), ()> {
        let (qos, retain) = topic.get_publish_quality_retain();
        self.try_publish(topic.topic, qos_to_mqtt_qos(qos), retain, payload.encode_to_vec())
    }

    async fn subscribe_many(&self, topics: Vec<TopicFilter>) -> Result<(), ()> {
        let filters: Vec<Filter> = topics.into_iter().map(topic_filter_to_mqtt_filter).collect();
        match self.client.subscribe_many(filters).await {
            Ok(_) => Ok(()),
            Err(_) => Err(()),
        }
    }
}

type ConnectRequest = oneshot::Sender<Result<(), ConnectError>>;

/// A [spbridge_client::Connector] that asks the [EventLoop] to establish a broker connection.
///
/// Each call resolves once the broker acknowledges the connection or the attempt fails.
#[derive(Clone)]
pub struct Connector {
    tx: mpsc::Sender<ConnectRequest>,
}

#[async_trait]
impl spbridge_client::Connector for Connector {
    async fn connect(&self) -> Result<(), ConnectError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(tx).await.map_err(|_| ConnectError::Closed)?;
        rx.await.map_err(|_| ConnectError::Closed)?
    }
}

enum ConnectionState {
    Disconnected,
    ManualDisconnected,
    Connected,
}

/// An [spbridge_client::EventLoop] implementation using [rumqttc]
pub struct EventLoop {
    state: ConnectionState,
    el: RuEventLoop,
    connector: Connector,
    connect_rx: mpsc::Receiver<ConnectRequest>,
    pending: Option<ConnectRequest>,
}

impl EventLoop {
    /// Create a new `Eventloop`.
    ///
    /// `cap` specifies the capacity of the bounded async channel for the client handle.
    pub fn new(options: MqttOptions, cap: usize) -> (Self, Client) {
        let (client, eventloop) = RuClient::new(options.into_rumqtt(), cap);
        let (tx, connect_rx) = mpsc::channel(1);
        (
            EventLoop {
                el: eventloop,
                state: ConnectionState::Disconnected,
                connector: Connector { tx },
                connect_rx,
                pending: None,
            },
            Client { client },
        )
    }

    fn resolve_pending(&mut self, result: Result<(), ConnectError>) {
        if let Some(request) = self.pending.take() {
            _ = request.send(result);
        }
    }

    async fn poll_rumqtt(&mut self) -> Option<Event> {
        if !matches!(self.state, ConnectionState::Connected) && self.pending.is_none() {
            let request = self.connect_rx.recv().await?;
            debug!("Connecting to broker");
            self.pending = Some(request);
        }

        let event = self.el.poll().await;
        match event {
            Ok(event) => {
                trace!("{event:?}");
                match event {
                    rumqttc::v5::Event::Incoming(Packet::ConnAck(_)) => {
                        self.state = ConnectionState::Connected;
                        self.resolve_pending(Ok(()));
                        Some(Event::Online)
                    }
                    rumqttc::v5::Event::Incoming(Packet::Disconnect(_)) => {
                        warn!("Broker sent disconnect");
                        self.state = ConnectionState::Disconnected;
                        Some(Event::Offline)
                    }
                    rumqttc::v5::Event::Incoming(Packet::Publish(publish)) => {
                        Some(topic_and_payload_to_event(&publish.topic, &publish.payload))
                    }
                    rumqttc::v5::Event::Outgoing(Outgoing::Disconnect) => {
                        self.state = ConnectionState::ManualDisconnected;
                        Some(Event::Offline)
                    }
                    _ => None,
                }
            }
            Err(e) => match self.state {
                ConnectionState::Connected => {
                    error!("Client error: {e}");
                    self.state = ConnectionState::Disconnected;
                    Some(Event::Offline)
                }
                ConnectionState::Disconnected | ConnectionState::ManualDisconnected => {
                    self.resolve_pending(Err(ConnectError::Failed(e.to_string())));
                    None
                }
            },
        }
    }
}

#[async_trait]
impl spbridge_client::EventLoop for EventLoop {
    async fn poll(&mut self) -> Event {
        loop {
            if let Some(event) = self.poll_rumqtt().await {
                return event;
            }
        }
    }

    fn set_last_will(&mut self, will: LastWill) {
        let qos = qos_to_mqtt_qos(will.qos);
        let mqtt_will =
            rumqttc::v5::mqttbytes::v5::LastWill::new(will.topic, will.payload, qos, will.retain, None);
        self.el.options.set_last_will(mqtt_will);
    }

    fn connector(&self) -> Arc<DynConnector> {
        Arc::new(self.connector.clone())
    }
}
