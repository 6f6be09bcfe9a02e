use std::time::Duration;

use spbridge_client::{
    channel::{ChannelBroker, ChannelEventLoop, OutboundMessage},
    Event, NodeMessage as NodeEvent,
};
use spbridge_node::{BridgeBuilder, BridgeHandle, MemoryStore};
use spbridge_types::{
    constants::{BDSEQ, NODE_CONTROL_REBIRTH},
    payload::{metric, DataType, Message, Payload},
    topic::{DeviceMessage, DeviceTopic, NodeMessage, NodeTopic, QoS, Topic, TopicFilter},
};
use tokio::{task::JoinHandle, time::timeout};

pub const GROUP: &str = "plant";
pub const NODE: &str = "gw1";

pub struct TestBridge {
    pub handle: BridgeHandle,
    pub broker: ChannelBroker,
    pub store: MemoryStore,
    pub run: JoinHandle<()>,
}

pub async fn start_bridge_with(configure: impl FnOnce(BridgeBuilder) -> BridgeBuilder) -> TestBridge {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let store = MemoryStore::new();
    let builder = BridgeBuilder::new(eventloop, client)
        .with_group_id(GROUP)
        .with_node_id(NODE)
        .with_store(store.clone());
    let (bridge, handle) = configure(builder).build().unwrap();
    let run = tokio::spawn(bridge.run());

    /* the first connection attempt is made as soon as the bridge runs */
    timeout(Duration::from_secs(1), broker.rx_connect.recv())
        .await
        .unwrap()
        .unwrap();

    TestBridge {
        handle,
        broker,
        store,
        run,
    }
}

pub async fn start_bridge() -> TestBridge {
    start_bridge_with(|builder| builder).await
}

pub async fn recv(broker: &mut ChannelBroker) -> OutboundMessage {
    timeout(Duration::from_secs(1), broker.rx_outbound.recv())
        .await
        .expect("timed out waiting for an outbound message")
        .unwrap()
}

/// Everything published so far without waiting.
pub fn drain(broker: &mut ChannelBroker) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = broker.rx_outbound.try_recv() {
        messages.push(message);
    }
    messages
}

pub fn assert_quiet(broker: &mut ChannelBroker) {
    let messages = drain(broker);
    assert!(messages.is_empty(), "unexpected messages {messages:?}");
}

pub fn expected_filters() -> Vec<TopicFilter> {
    vec![
        TopicFilter::new_with_qos(
            Topic::NodeTopic(NodeTopic::new(GROUP, NodeMessage::NCmd, NODE)),
            QoS::AtLeastOnce,
        ),
        TopicFilter::new_with_qos(
            Topic::DeviceTopic(DeviceTopic::new(GROUP, DeviceMessage::DCmd, NODE, "+")),
            QoS::AtLeastOnce,
        ),
    ]
}

pub fn verify_nbirth_payload(payload: Payload, expected_bdseq: u64) {
    assert_eq!(payload.seq, Some(0));
    assert_ne!(payload.timestamp, None);

    let mut contains_node_control = false;
    let mut contains_bdseq = false;
    for metric in payload.metrics {
        let metric_name = metric.name.expect("Metric name is required in birth payload");
        if metric_name == NODE_CONTROL_REBIRTH {
            contains_node_control = true;
            assert_eq!(metric.datatype, Some(DataType::Boolean as u32));
            assert_eq!(metric.value, Some(metric::Value::BooleanValue(false)));
        }
        if metric_name == BDSEQ {
            contains_bdseq = true;
            assert_eq!(metric.datatype, Some(DataType::Int64 as u32));
            assert_eq!(metric.value, Some(metric::Value::LongValue(expected_bdseq)));
        }
    }
    assert!(contains_node_control);
    assert!(contains_bdseq);
}

pub fn verify_ndeath_payload(payload: &Payload, expected_bdseq: u64) {
    assert_eq!(payload.seq, None);
    assert_eq!(payload.metrics.len(), 1);
    assert_eq!(payload.metrics[0].name.as_deref(), Some(BDSEQ));
    assert_eq!(
        payload.metrics[0].value,
        Some(metric::Value::LongValue(expected_bdseq))
    );
}

/// Bring the broker session up and verify the subscriptions and node birth.
pub async fn go_online(broker: &mut ChannelBroker, expected_bdseq: u64) {
    broker.tx_event.send(Event::Online).unwrap();
    expect_session(broker, expected_bdseq).await;
}

/// Receive the command subscriptions followed by the node birth.
pub async fn expect_session(broker: &mut ChannelBroker, expected_bdseq: u64) {
    match recv(broker).await {
        OutboundMessage::Subscribe(filters) => assert_eq!(filters, expected_filters()),
        message => panic!("expected subscription, got {message:?}"),
    }
    match recv(broker).await {
        OutboundMessage::NodeMessage { topic, payload } => {
            assert_eq!(topic, NodeTopic::new(GROUP, NodeMessage::NBirth, NODE));
            verify_nbirth_payload(payload, expected_bdseq);
        }
        message => panic!("expected NBIRTH, got {message:?}"),
    }
}

/// Drop the broker session and wait for the bridge to ask for a new connection.
pub async fn go_offline(broker: &mut ChannelBroker) {
    broker.tx_event.send(Event::Offline).unwrap();
    timeout(Duration::from_secs(1), broker.rx_connect.recv())
        .await
        .expect("bridge did not reconnect")
        .unwrap();
}

pub fn device_message(message: OutboundMessage) -> (DeviceTopic, Payload) {
    match message {
        OutboundMessage::DeviceMessage { topic, payload } => (topic, payload),
        message => panic!("expected device message, got {message:?}"),
    }
}

/// Receive the next message, asserting it is of `kind` for `device`.
pub async fn expect_device(
    broker: &mut ChannelBroker,
    kind: DeviceMessage,
    device: &str,
) -> Payload {
    let (topic, payload) = device_message(recv(broker).await);
    assert_eq!(topic, DeviceTopic::new(GROUP, kind, NODE, device));
    payload
}

pub fn value_of(payload: &Payload, name: &str) -> Option<f64> {
    payload
        .metrics
        .iter()
        .find(|m| m.name.as_deref() == Some(name))
        .and_then(|m| match m.value {
            Some(metric::Value::DoubleValue(v)) => Some(v),
            _ => None,
        })
}

pub fn command_payload(name: &str, value: bool) -> Payload {
    let mut metric = spbridge_types::payload::Metric::new();
    metric
        .set_name(name.to_string())
        .set_datatype(DataType::Boolean)
        .set_value(metric::Value::BooleanValue(value));
    Payload {
        timestamp: Some(0),
        metrics: vec![metric],
        seq: None,
        uuid: None,
        body: None,
    }
}

pub fn node_command(payload: Payload) -> Event {
    Event::Node(NodeEvent {
        group_id: GROUP.into(),
        node_id: NODE.into(),
        message: spbridge_client::Message {
            payload,
            kind: spbridge_client::MessageKind::Cmd,
        },
    })
}

pub fn device_command(device: &str, payload: Payload) -> Event {
    Event::Device(spbridge_client::DeviceMessage {
        group_id: GROUP.into(),
        node_id: NODE.into(),
        device_id: device.into(),
        message: spbridge_client::Message {
            payload,
            kind: spbridge_client::MessageKind::Cmd,
        },
    })
}

pub fn decode_last_will(broker: &ChannelBroker) -> Payload {
    let will = broker.last_will().expect("last will should be set");
    assert_eq!(will.topic, NodeTopic::new(GROUP, NodeMessage::NDeath, NODE).topic);
    Payload::decode(will.payload.as_slice()).unwrap()
}
