use std::{
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, info, warn};
use spbridge_client::{
    DynClient, DynEventLoop, Event, LastWill, MessageKind, RetryController, RetryPhase,
};
use spbridge_types::{
    constants,
    payload::{metric::Value, DataType, Metric, Payload},
    topic::{
        DeviceMessage as DeviceMessageType, DeviceTopic, NodeMessage as NodeMessageType, NodeTopic,
        QoS, Topic, TopicFilter,
    },
};
use tokio::{select, sync::mpsc, time::timeout};

use crate::{
    builder::BridgeConfig,
    engine::Engine,
    offline::{DynMessageStore, OfflineLog},
    BridgeHandle,
};

/// State shared between the [Bridge], its engine task and every [BridgeHandle].
pub(crate) struct BridgeState {
    pub running: AtomicBool,
    pub bdseq: AtomicU8,
    pub group_id: String,
    pub node_id: String,
}

impl BridgeState {
    pub fn bdseq_metric(&self) -> Metric {
        let mut metric = Metric::new();
        metric
            .set_name(constants::BDSEQ.to_string())
            .set_datatype(DataType::Int64)
            .set_value(Value::LongValue(self.bdseq.load(Ordering::SeqCst) as u64));
        metric
    }

    pub fn death_payload(&self) -> Payload {
        Payload {
            seq: None,
            metrics: vec![self.bdseq_metric()],
            uuid: None,
            timestamp: None,
            body: None,
        }
    }

    pub fn create_last_will(&self) -> LastWill {
        LastWill::new_node(&self.group_id, &self.node_id, self.death_payload())
    }

    pub fn node_topic(&self, message_type: NodeMessageType) -> NodeTopic {
        NodeTopic::new(&self.group_id, message_type, &self.node_id)
    }

    pub fn device_topic(&self, message_type: DeviceMessageType, device_id: &str) -> DeviceTopic {
        DeviceTopic::new(&self.group_id, message_type, &self.node_id, device_id)
    }

    pub fn sub_topics(&self) -> Vec<TopicFilter> {
        vec![
            TopicFilter::new_with_qos(
                Topic::NodeTopic(self.node_topic(NodeMessageType::NCmd)),
                QoS::AtLeastOnce,
            ),
            TopicFilter::new_with_qos(
                Topic::DeviceTopic(self.device_topic(DeviceMessageType::DCmd, "+")),
                QoS::AtLeastOnce,
            ),
        ]
    }

    fn addressed_to_us(&self, group_id: &str, node_id: &str) -> bool {
        self.group_id == group_id && self.node_id == node_id
    }
}

/// Broker session transitions and commands forwarded to the engine.
pub(crate) enum SessionEvent {
    Online,
    Offline,
    NodeCommand(Payload),
    DeviceCommand { device_id: String, payload: Payload },
    Stopped,
}

#[derive(Debug)]
pub(crate) struct BridgeShutdown;

/// A Sparkplug B edge node bridging field device values to a broker.
///
/// See [BridgeBuilder](crate::BridgeBuilder) on how to create a [Bridge] instance.
pub struct Bridge {
    eventloop: Box<DynEventLoop>,
    state: Arc<BridgeState>,
    retry: RetryController,
    stop_rx: mpsc::Receiver<BridgeShutdown>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    online: bool,
}

impl Bridge {
    pub(crate) fn new(
        group_id: String,
        node_id: String,
        eventloop: Box<DynEventLoop>,
        client: Arc<DynClient>,
        store: Arc<DynMessageStore>,
        config: BridgeConfig,
    ) -> (Self, BridgeHandle) {
        let state = Arc::new(BridgeState {
            running: AtomicBool::new(false),
            bdseq: AtomicU8::new(0),
            group_id,
            node_id,
        });
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let retry = RetryController::new(
            format!("broker node={}", state.node_id),
            config.retry.clone(),
            eventloop.connector(),
        );

        let engine = Engine::new(
            state.clone(),
            config,
            client.clone(),
            OfflineLog::new(store),
            session_rx,
            command_rx,
        );
        tokio::spawn(engine.run());

        let handle = BridgeHandle::new(state.clone(), client, command_tx, stop_tx);
        let bridge = Self {
            eventloop,
            state,
            retry,
            stop_rx,
            session_tx,
            online: false,
        };
        (bridge, handle)
    }

    fn forward(&self, event: SessionEvent) {
        _ = self.session_tx.send(event);
    }

    /// Returns `false` if the bridge was already offline.
    fn go_offline(&mut self) -> bool {
        if !self.online {
            return false;
        }
        self.online = false;
        self.state.bdseq.fetch_add(1, Ordering::SeqCst);
        self.eventloop.set_last_will(self.state.create_last_will());
        self.forward(SessionEvent::Offline);
        true
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Online => {
                self.online = true;
                self.forward(SessionEvent::Online);
            }
            Event::Offline => {
                if self.go_offline() {
                    info!("Broker connection lost. node={}", self.state.node_id);
                }
                if self.retry.state().phase != RetryPhase::GaveUp {
                    self.retry.start();
                }
            }
            Event::Node(message) => {
                if message.message.kind != MessageKind::Cmd
                    || !self
                        .state
                        .addressed_to_us(&message.group_id, &message.node_id)
                {
                    return;
                }
                self.forward(SessionEvent::NodeCommand(message.message.payload));
            }
            Event::Device(message) => {
                if message.message.kind != MessageKind::Cmd
                    || !self
                        .state
                        .addressed_to_us(&message.group_id, &message.node_id)
                {
                    return;
                }
                self.forward(SessionEvent::DeviceCommand {
                    device_id: message.device_id,
                    payload: message.message.payload,
                });
            }
            Event::InvalidPublish { reason, topic, .. } => {
                debug!(
                    "Ignoring invalid publish. topic={} reason={reason}",
                    String::from_utf8_lossy(&topic)
                );
            }
        }
    }

    async fn poll_until_offline(&mut self) {
        while self.online {
            if Event::Offline == self.eventloop.poll().await {
                break;
            }
        }
    }

    /// Run the bridge.
    ///
    /// Connects to the broker and runs until [BridgeHandle::cancel()] is called.
    pub async fn run(mut self) {
        info!(
            "Bridge running. group={} node={}",
            self.state.group_id, self.state.node_id
        );
        self.state.running.store(true, Ordering::SeqCst);
        self.eventloop.set_last_will(self.state.create_last_will());
        self.retry.start();

        loop {
            select! {
                event = self.eventloop.poll() => self.handle_event(event),
                Some(_) = self.stop_rx.recv() => break,
            }
        }

        self.retry.stop();
        if timeout(Duration::from_secs(1), self.poll_until_offline())
            .await
            .is_err()
        {
            warn!("Timed out waiting for the broker connection to close");
        }
        self.go_offline();
        self.forward(SessionEvent::Stopped);
        info!("Bridge stopped. node={}", self.state.node_id);
    }
}
