use std::{sync::atomic::Ordering, sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use spbridge_client::DynClient;
use spbridge_types::{
    constants::{DEVICE_CONTROL_REBIRTH, NODE_CONTROL_REBIRTH},
    payload::{metric::Value, DataType, Message, Metric, Payload},
    topic::{DeviceMessage as DeviceMessageType, DeviceTopic, NodeMessage as NodeMessageType},
    utils::timestamp,
};
use tokio::{
    select,
    sync::mpsc,
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};

use crate::{
    bridge::{BridgeState, SessionEvent},
    builder::BridgeConfig,
    handle::Command,
    offline::OfflineLog,
    registry::{DeviceRegistry, MetricUpdate},
};

const SESSION_RETRY: Duration = Duration::from_secs(1);

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Returns whether a command payload requests a rebirth through the `control` metric.
fn rebirth_requested(payload: &Payload, control: &str, target: &str) -> bool {
    let mut rebirth = false;
    for metric in &payload.metrics {
        let name = match &metric.name {
            Some(name) => name,
            None => continue,
        };
        if name != control {
            info!("Ignoring unsupported command metric {name} for {target}");
            continue;
        }
        match &metric.value {
            Some(Value::BooleanValue(true)) => rebirth = true,
            _ => warn!("Received invalid {control} command for {target} - ignoring request"),
        }
    }
    rebirth
}

/// Owns the device registry and the broker session. Runs as a single task so every
/// state transition is serialised.
pub(crate) struct Engine {
    state: Arc<BridgeState>,
    config: BridgeConfig,
    client: Arc<DynClient>,
    registry: DeviceRegistry,
    offline: OfflineLog,
    online: bool,
    node_birthed: bool,
    seq: u8,
    last_node_rebirth: Option<Instant>,
    last_session_attempt: Option<Instant>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    command_rx: mpsc::UnboundedReceiver<Command>,
}

impl Engine {
    pub fn new(
        state: Arc<BridgeState>,
        config: BridgeConfig,
        client: Arc<DynClient>,
        offline: OfflineLog,
        session_rx: mpsc::UnboundedReceiver<SessionEvent>,
        command_rx: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            state,
            config,
            client,
            registry: DeviceRegistry::new(),
            offline,
            online: false,
            node_birthed: false,
            seq: 0,
            last_node_rebirth: None,
            last_session_attempt: None,
            session_rx,
            command_rx,
        }
    }

    fn running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Connected, node born and not cancelled.
    fn session_live(&self) -> bool {
        self.online && self.node_birthed && self.running()
    }

    fn next_seq(&mut self) -> u64 {
        self.seq = self.seq.wrapping_add(1);
        self.seq as u64
    }

    /// Publish the NBIRTH. Every device born before it owes a new birth afterwards.
    async fn node_birth(&mut self) -> bool {
        /* NBIRTH always carries seq 0 */
        self.node_birthed = false;
        self.seq = 0;
        for device in self.registry.devices_mut() {
            if device.birth_sent {
                device.birth_pending = true;
            }
        }
        let timestamp = timestamp();

        let mut rebirth = Metric::new();
        rebirth
            .set_name(NODE_CONTROL_REBIRTH.to_string())
            .set_datatype(DataType::Boolean)
            .set_timestamp(timestamp)
            .set_value(Value::BooleanValue(false));

        let payload = Payload {
            seq: Some(0),
            timestamp: Some(timestamp),
            metrics: vec![self.state.bdseq_metric(), rebirth],
            uuid: None,
            body: None,
        };
        let topic = self.state.node_topic(NodeMessageType::NBirth);
        match self.client.publish_node_message(topic, payload).await {
            Ok(_) => {
                self.node_birthed = true;
                info!(
                    "Node birth sent. node={} bdSeq={}",
                    self.state.node_id,
                    self.state.bdseq.load(Ordering::SeqCst)
                );
                true
            }
            Err(_) => {
                error!(
                    "Publishing node birth message failed. node={}",
                    self.state.node_id
                );
                false
            }
        }
    }

    /// Publish a DBIRTH with every known metric. Does not consult the expected tag count.
    async fn send_birth(&mut self, device_id: &str) -> bool {
        if !self.session_live() {
            debug!("Not connected, device birth postponed. device={device_id}");
            return false;
        }
        let timestamp = timestamp();
        let metrics = match self.registry.get(device_id) {
            Some(device) if !device.metrics.is_empty() => device.birth_metrics(timestamp),
            Some(_) => {
                debug!("Device has no metrics, birth postponed. device={device_id}");
                return false;
            }
            None => return false,
        };
        let metric_count = metrics.len();
        let payload = Payload {
            timestamp: Some(timestamp),
            metrics,
            seq: Some(self.next_seq()),
            uuid: None,
            body: None,
        };
        let topic = self.state.device_topic(DeviceMessageType::DBirth, device_id);
        match self.client.publish_device_message(topic, payload).await {
            Ok(_) => {
                if let Some(device) = self.registry.get_mut(device_id) {
                    device.birth_sent = true;
                    device.birth_pending = false;
                }
                info!("Device birth sent. device={device_id} metrics={metric_count}");
                self.replay().await;
                true
            }
            Err(_) => {
                error!("Publishing device birth failed. device={device_id}");
                false
            }
        }
    }

    /// Birth the device if it owes a birth and is ready for one.
    async fn evaluate_birth(&mut self, device_id: &str) {
        let live = self.session_live();
        let device = match self.registry.get_mut(device_id) {
            Some(device) => device,
            None => return,
        };
        if !device.needs_birth() || !live || device.metrics.is_empty() {
            return;
        }
        if !device.tags_complete() {
            if !device.birth_pending {
                info!(
                    "Deferring device birth, {} of {} expected tags reported. device={device_id}",
                    device.metrics.len(),
                    device.expected_tags.unwrap_or_default()
                );
                device.birth_pending = true;
            }
            return;
        }
        self.send_birth(device_id).await;
    }

    async fn evaluate_all_births(&mut self) {
        for device_id in self.registry.device_ids() {
            self.evaluate_birth(&device_id).await;
        }
    }

    async fn send_death(&mut self, device_id: &str) {
        let payload = Payload {
            timestamp: Some(timestamp()),
            metrics: Vec::new(),
            seq: Some(self.next_seq()),
            uuid: None,
            body: None,
        };
        let topic = self.state.device_topic(DeviceMessageType::DDeath, device_id);
        match self.client.try_publish_device_message(topic, payload).await {
            Ok(_) => info!("Device death sent. device={device_id}"),
            Err(_) => warn!("Publishing device death failed. device={device_id}"),
        }
    }

    /// Publish a single metric as DDATA, buffering it if there is no session or the publish fails.
    async fn publish_data(&mut self, device_id: &str, metric: Metric) {
        let timestamp = timestamp();
        let topic = self.state.device_topic(DeviceMessageType::DData, device_id);
        let mut payload = Payload {
            timestamp: Some(timestamp),
            metrics: vec![metric],
            seq: None,
            uuid: None,
            body: None,
        };
        if self.session_live() {
            payload.seq = Some(self.next_seq());
            match self
                .client
                .try_publish_device_message(topic.clone(), payload.clone())
                .await
            {
                Ok(_) => return,
                Err(_) => warn!("Publishing device data failed, buffering. device={device_id}"),
            }
        }
        self.offline.append(&topic.topic, &payload, timestamp).await;
    }

    /// Deliver buffered messages for devices born in the current session.
    ///
    /// Messages of devices that are not born yet stay buffered for the replay that follows their
    /// birth. Replay stops at the first failed publish so each device's messages keep their order.
    async fn replay(&mut self) {
        let messages = self.offline.drain_in_order().await;
        if messages.is_empty() {
            return;
        }

        let mut delivered = Vec::new();
        let mut held = 0;
        for stored in messages {
            if !self.session_live() {
                info!("Replay interrupted, remaining messages stay buffered");
                break;
            }
            let topic = match DeviceTopic::parse(&stored.message.topic) {
                Some(topic) => topic,
                None => {
                    warn!(
                        "Discarding buffered message with invalid topic {}",
                        stored.message.topic
                    );
                    delivered.push(stored.id);
                    continue;
                }
            };
            let born = self
                .registry
                .get(topic.device_id())
                .is_some_and(|device| device.publishable(true));
            if !born {
                held += 1;
                continue;
            }
            let mut payload = match Payload::decode(stored.message.payload.as_slice()) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Discarding undecodable buffered message id={}: {e}", stored.id);
                    delivered.push(stored.id);
                    continue;
                }
            };
            payload.mark_historical();
            payload.seq = Some(self.next_seq());
            if self
                .client
                .publish_device_message(topic, payload)
                .await
                .is_err()
            {
                warn!(
                    "Replay stopped at message id={}, remaining messages stay buffered",
                    stored.id
                );
                break;
            }
            delivered.push(stored.id);
        }
        if delivered.is_empty() {
            return;
        }
        self.offline.delete(&delivered).await;
        info!(
            "Replayed {} buffered messages, {held} held until their device is born",
            delivered.len()
        );
    }

    /// Subscribe to the command topics and birth the node followed by its devices.
    async fn establish_session(&mut self) -> bool {
        self.last_session_attempt = Some(Instant::now());
        if self
            .client
            .subscribe_many(self.state.sub_topics())
            .await
            .is_err()
        {
            error!("Subscribing to command topics failed. node={}", self.state.node_id);
            return false;
        }
        if !self.node_birth().await {
            return false;
        }
        self.evaluate_all_births().await;
        true
    }

    async fn on_online(&mut self) {
        if self.online {
            return;
        }
        self.online = true;
        info!("Bridge online. node={}", self.state.node_id);
        self.establish_session().await;
    }

    fn on_offline(&mut self) {
        if !self.online {
            return;
        }
        self.online = false;
        self.node_birthed = false;
        for device in self.registry.devices_mut() {
            if device.birth_sent {
                device.birth_pending = true;
            }
        }
        info!(
            "Bridge offline, buffering device data. node={}",
            self.state.node_id
        );
    }

    async fn rebirth(&mut self) {
        if !self.session_live() {
            return;
        }
        if !self.node_birth().await {
            return;
        }
        self.evaluate_all_births().await;
    }

    async fn on_node_command(&mut self, payload: Payload) {
        let target = format!("node={}", self.state.node_id);
        if !rebirth_requested(&payload, NODE_CONTROL_REBIRTH, &target) {
            return;
        }
        let now = Instant::now();
        if let Some(last) = self.last_node_rebirth {
            if now.duration_since(last) < self.config.node_rebirth_cooldown {
                info!("Got Rebirth CMD but cooldown time not expired. Ignoring");
                return;
            }
        }
        info!("Got Rebirth CMD - Rebirthing Node");
        self.rebirth().await;
        self.last_node_rebirth = Some(now);
    }

    async fn on_device_command(&mut self, device_id: String, payload: Payload) {
        if !self.registry.contains(&device_id) {
            warn!("Received command for unknown device. device={device_id}");
            return;
        }
        let target = format!("device={device_id}");
        if rebirth_requested(&payload, DEVICE_CONTROL_REBIRTH, &target) {
            info!("Got Rebirth CMD - Rebirthing device. device={device_id}");
            self.send_birth(&device_id).await;
        }
    }

    async fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Online => self.on_online().await,
            SessionEvent::Offline => self.on_offline(),
            SessionEvent::NodeCommand(payload) => self.on_node_command(payload).await,
            SessionEvent::DeviceCommand { device_id, payload } => {
                self.on_device_command(device_id, payload).await
            }
            SessionEvent::Stopped => (),
        }
    }

    fn register_device(&mut self, device_id: &str) {
        if self.registry.register(device_id, Instant::now()) {
            info!("Device registered. device={device_id}");
        } else {
            debug!("Device already registered. device={device_id}");
        }
    }

    async fn set_expected_tags(&mut self, device_id: &str, count: usize) {
        match self.registry.get_mut(device_id) {
            Some(device) => device.expected_tags = Some(count),
            None => {
                debug!("Expected tags set for unknown device, ignoring. device={device_id}");
                return;
            }
        }
        self.evaluate_birth(device_id).await;
    }

    async fn update_metric(&mut self, device_id: &str, name: &str, value: f64, interval: Duration) {
        let now = Instant::now();
        if self.registry.register(device_id, now) {
            info!("Device registered on first metric. device={device_id}");
        }
        if self.registry.update_metric(device_id, name, value, interval, now)
            != Some(MetricUpdate::New)
        {
            return;
        }
        debug!("New metric {name}. device={device_id}");
        self.evaluate_birth(device_id).await;

        let live = self.session_live();
        if let Some(metric) =
            self.registry
                .take_for_publish(device_id, name, live, now, timestamp())
        {
            self.publish_data(device_id, metric).await;
        }
    }

    async fn remove_device(&mut self, device_id: &str) -> bool {
        let live = self.session_live();
        let born = match self.registry.get(device_id) {
            Some(device) => device.publishable(true),
            None => return false,
        };
        if born && live {
            self.send_death(device_id).await;
        }
        self.registry.remove(device_id);
        info!("Device removed. device={device_id}");
        true
    }

    async fn remove_inactive(&mut self, max_inactive: Duration) -> usize {
        let inactive = self.registry.inactive(max_inactive, Instant::now());
        for device_id in &inactive {
            info!("Removing inactive device. device={device_id}");
            self.remove_device(device_id).await;
        }
        inactive.len()
    }

    /// Whether a failed subscription or node birth should be attempted again.
    fn session_retry_due(&self, now: Instant) -> bool {
        self.online
            && !self.node_birthed
            && self.running()
            && self
                .last_session_attempt
                .map_or(true, |at| now.duration_since(at) >= SESSION_RETRY)
    }

    async fn on_publish_tick(&mut self) {
        if self.session_retry_due(Instant::now()) {
            info!("Retrying node birth. node={}", self.state.node_id);
            self.establish_session().await;
        }
        let live = self.session_live();
        let due = self.registry.take_due(live, Instant::now(), timestamp());
        for (device_id, metric) in due {
            self.publish_data(&device_id, metric).await;
        }
    }

    fn log_status(&self) {
        let summaries = self
            .registry
            .summaries(self.config.active_window, Instant::now());
        if summaries.is_empty() {
            info!("Device status: No devices registered");
            return;
        }
        let active = summaries.iter().filter(|s| s.active).count();
        info!(
            "Device status: {} devices, {active} active",
            summaries.len()
        );
        for summary in summaries {
            info!(
                "  {} {}: {} metrics, uptime {}s",
                if summary.active { "ACTIVE" } else { "INACTIVE" },
                summary.device_id,
                summary.metric_count,
                summary.uptime.as_secs()
            );
        }
    }

    async fn on_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::RegisterDevice(device_id) => self.register_device(&device_id),
            Command::SetExpectedTags { device_id, count } => {
                self.set_expected_tags(&device_id, count).await
            }
            Command::UpdateMetric {
                device_id,
                name,
                value,
                interval,
            } => self.update_metric(&device_id, &name, value, interval).await,
            Command::RemoveDevice { device_id, reply } => {
                let removed = self.remove_device(&device_id).await;
                _ = reply.send(removed);
            }
            Command::CheckDeviceHealth {
                max_inactive,
                reply,
            } => _ = reply.send(self.registry.inactive(max_inactive, now)),
            Command::RemoveInactiveDevices {
                max_inactive,
                reply,
            } => {
                let removed = self.remove_inactive(max_inactive).await;
                _ = reply.send(removed);
            }
            Command::RegisteredDevices(reply) => _ = reply.send(self.registry.device_ids()),
            Command::DeviceMetrics { device_id, reply } => {
                _ = reply.send(self.registry.metrics(&device_id, now))
            }
            Command::DevicesSummary(reply) => {
                _ = reply.send(self.registry.summaries(self.config.active_window, now))
            }
            Command::DeviceStatus { device_id, reply } => {
                _ = reply.send(self.registry.status(&device_id))
            }
            Command::TotalMetricsCount(reply) => _ = reply.send(self.registry.total_metrics()),
            Command::ActiveDevicesCount(reply) => {
                _ = reply.send(self.registry.active_count(self.config.active_window, now))
            }
            Command::OfflineQueueLen(reply) => _ = reply.send(self.offline.len().await),
        }
    }

    pub async fn run(mut self) {
        let mut publish = ticker(self.config.publish_tick);
        let mut sweep = ticker(self.config.sweep_interval);
        let mut status = ticker(self.config.status_interval);
        loop {
            select! {
                biased;
                maybe_event = self.session_rx.recv() => match maybe_event {
                    Some(SessionEvent::Stopped) | None => break,
                    Some(event) => self.on_session_event(event).await,
                },
                Some(command) = self.command_rx.recv() => self.on_command(command).await,
                _ = publish.tick() => self.on_publish_tick().await,
                _ = sweep.tick() => {
                    let removed = self.remove_inactive(self.config.inactivity_threshold).await;
                    if removed > 0 {
                        info!("Inactivity sweep removed {removed} devices");
                    }
                },
                _ = status.tick() => self.log_status(),
            }
        }
        debug!("Bridge engine stopped. node={}", self.state.node_id);
    }
}
