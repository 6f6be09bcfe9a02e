use std::time::Duration;

use spbridge::{
    adapters::{modbus::ModbusAdapter, simulator::SimulatorAdapter},
    client::{
        channel::{ChannelBroker, ChannelEventLoop, OutboundMessage},
        Event, RetryConfig,
    },
    config::{ModbusConfig, ModbusTag, RegisterKind, SimulatedTag, SimulatorConfig},
    node::{BridgeBuilder, BridgeHandle, DeviceStatus},
    types::{
        payload::metric::Value,
        topic::{DeviceMessage, NodeMessage},
    },
};
use tokio::time::timeout;

async fn recv(broker: &mut ChannelBroker) -> OutboundMessage {
    timeout(Duration::from_secs(5), broker.rx_outbound.recv())
        .await
        .expect("timed out waiting for an outbound message")
        .unwrap()
}

async fn online_bridge() -> (BridgeHandle, ChannelBroker) {
    let (eventloop, client, mut broker) = ChannelEventLoop::new();
    let (bridge, handle) = BridgeBuilder::new(eventloop, client)
        .with_group_id("plant")
        .with_node_id("gw1")
        .build()
        .unwrap();
    tokio::spawn(bridge.run());
    broker.rx_connect.recv().await.unwrap();
    broker.tx_event.send(Event::Online).unwrap();
    assert!(matches!(recv(&mut broker).await, OutboundMessage::Subscribe(_)));
    match recv(&mut broker).await {
        OutboundMessage::NodeMessage { topic, .. } => {
            assert_eq!(topic.message_type, NodeMessage::NBirth)
        }
        message => panic!("expected NBIRTH, got {message:?}"),
    }
    (handle, broker)
}

fn simulated(name: &str, min: f64, max: f64, interval_ms: u64) -> SimulatedTag {
    SimulatedTag {
        name: name.into(),
        min,
        max,
        decimals: 1,
        interval_ms,
        delta: None,
    }
}

#[tokio::test(start_paused = true)]
async fn simulator_births_device_with_every_tag() {
    let (handle, mut broker) = online_bridge().await;
    let config = SimulatorConfig {
        enabled: true,
        device_name: None,
        tags: vec![
            simulated("temperature", 20.0, 25.0, 1000),
            simulated("pressure", 1.0, 2.0, 500),
        ],
    };
    let device_id = handle.generate_device_name("simulator");
    assert_eq!(device_id, "device-simulator-1");
    let adapter = SimulatorAdapter::new(device_id.as_str(), config, handle.clone())
        .start()
        .unwrap();

    let (topic, payload) = match recv(&mut broker).await {
        OutboundMessage::DeviceMessage { topic, payload } => (topic, payload),
        message => panic!("expected DBIRTH, got {message:?}"),
    };
    assert_eq!(topic.message_type, DeviceMessage::DBirth);
    assert_eq!(topic.device_id(), device_id);
    assert_eq!(payload.metrics.len(), 2);
    for metric in &payload.metrics {
        let value = match metric.value {
            Some(Value::DoubleValue(v)) => v,
            ref other => panic!("unexpected value {other:?}"),
        };
        match metric.name.as_deref() {
            Some("temperature") => assert!((20.0..=25.0).contains(&value)),
            Some("pressure") => assert!((1.0..=2.0).contains(&value)),
            name => panic!("unexpected metric {name:?}"),
        }
    }

    tokio::time::sleep(Duration::from_secs(3)).await;
    let metrics = handle.device_metrics(device_id.as_str()).await.unwrap().unwrap();
    assert_eq!(metrics.len(), 2);
    assert!(metrics.iter().all(|m| m.since_published.is_some()));

    timeout(Duration::from_secs(1), adapter.stop()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn steady_values_keep_device_alive() {
    let (handle, mut broker) = online_bridge().await;
    let tag = |name: &str| SimulatedTag {
        delta: Some(5.0),
        ..simulated(name, 20.0, 20.5, 1000)
    };
    let config = SimulatorConfig {
        enabled: true,
        device_name: None,
        tags: vec![tag("temperature"), tag("humidity")],
    };
    let adapter = SimulatorAdapter::new("steady", config, handle.clone())
        .start()
        .unwrap();

    /* past two default inactivity sweeps */
    tokio::time::sleep(Duration::from_secs(11 * 60)).await;

    let mut births = 0;
    while let Ok(message) = broker.rx_outbound.try_recv() {
        if let OutboundMessage::DeviceMessage { topic, .. } = message {
            assert_ne!(topic.message_type, DeviceMessage::DDeath);
            if topic.message_type == DeviceMessage::DBirth {
                births += 1;
            }
        }
    }
    assert_eq!(births, 1);
    assert_eq!(handle.registered_devices().await.unwrap(), vec!["steady"]);
    let status = handle.device_status("steady").await.unwrap().unwrap();
    assert_eq!(status.expected_tags, Some(2));
    assert_eq!(status.metric_count, 2);

    /* the first accepted sample is held for the whole run */
    let metrics = handle.device_metrics("steady").await.unwrap().unwrap();
    assert!(metrics
        .iter()
        .all(|m| m.since_updated >= Duration::from_secs(10 * 60)));

    timeout(Duration::from_secs(1), adapter.stop()).await.unwrap();
}

#[tokio::test]
async fn modbus_registers_device_before_connecting() {
    let (eventloop, client, _broker) = ChannelEventLoop::new();
    let (_bridge, handle) = BridgeBuilder::new(eventloop, client)
        .with_group_id("plant")
        .with_node_id("gw1")
        .build()
        .unwrap();

    let tag = |name: &str, register, kind| ModbusTag {
        name: name.into(),
        register,
        kind,
        interval_ms: 100,
        delta: None,
    };
    let config = ModbusConfig {
        enabled: true,
        device_name: Some("boiler".into()),
        /* nothing listens on the discard port of the loopback interface */
        host: "127.0.0.1".into(),
        port: 9,
        unit_id: 1,
        tags: vec![
            tag("temperature", 1, RegisterKind::Holding),
            tag("flow", 3, RegisterKind::Input),
            tag("pump", 1, RegisterKind::Coil),
        ],
    };
    let retry = RetryConfig {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        max_attempts: None,
    };
    let adapter = ModbusAdapter::new("boiler", config, retry, handle.clone())
        .start()
        .unwrap();

    assert_eq!(
        handle.device_status("boiler").await.unwrap(),
        Some(DeviceStatus {
            birth_sent: false,
            birth_pending: false,
            expected_tags: Some(3),
            metric_count: 0,
        })
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    timeout(Duration::from_secs(6), adapter.stop())
        .await
        .expect("adapter did not stop");
    assert_eq!(handle.total_metrics_count().await.unwrap(), 0);
}
