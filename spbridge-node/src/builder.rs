use std::{sync::Arc, time::Duration};

use spbridge_client::{Client, DynClient, DynEventLoop, EventLoop, RetryConfig};

use crate::{
    error::BuildError,
    offline::{DynMessageStore, MemoryStore, MessageStore},
    Bridge, BridgeHandle,
};

/// Timing configuration for a [Bridge].
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Cadence of the publish scheduler.
    pub publish_tick: Duration,
    /// How often inactive devices are swept.
    pub sweep_interval: Duration,
    /// Devices untouched for longer than this are removed by the sweep.
    pub inactivity_threshold: Duration,
    /// Devices touched within this window are reported as active.
    pub active_window: Duration,
    pub status_interval: Duration,
    pub node_rebirth_cooldown: Duration,
    pub retry: RetryConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            publish_tick: Duration::from_millis(100),
            sweep_interval: Duration::from_secs(5 * 60),
            inactivity_threshold: Duration::from_secs(5 * 60),
            active_window: Duration::from_secs(30),
            status_interval: Duration::from_secs(10 * 60),
            node_rebirth_cooldown: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }
}

impl BridgeConfig {
    fn validate(&self) -> Result<(), BuildError> {
        for (name, value) in [
            ("publish tick", self.publish_tick),
            ("sweep interval", self.sweep_interval),
            ("inactivity threshold", self.inactivity_threshold),
            ("status interval", self.status_interval),
            ("retry initial delay", self.retry.initial_delay),
        ] {
            if value.is_zero() {
                return Err(BuildError::ZeroDuration(name));
            }
        }
        Ok(())
    }
}

/// A builder for creating and configuring [Bridge] instances.
pub struct BridgeBuilder {
    pub(crate) group_id: Option<String>,
    pub(crate) node_id: Option<String>,
    pub(crate) eventloop_client: (Box<DynEventLoop>, Arc<DynClient>),
    pub(crate) store: Option<Arc<DynMessageStore>>,
    pub(crate) config: BridgeConfig,
}

impl BridgeBuilder {
    /// Creates a new builder with the specified event loop and client.
    ///
    /// Buffered messages are kept in memory unless a store is provided.
    pub fn new<E: EventLoop + Send + 'static, C: Client + Send + Sync + 'static>(
        eventloop: E,
        client: C,
    ) -> Self {
        Self {
            group_id: None,
            node_id: None,
            eventloop_client: (Box::new(eventloop), Arc::new(client)),
            store: None,
            config: BridgeConfig::default(),
        }
    }

    /// Sets the Sparkplug group the edge node belongs to.
    pub fn with_group_id<S: Into<String>>(mut self, group_id: S) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Sets the edge node id.
    pub fn with_node_id<S: Into<String>>(mut self, node_id: S) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Sets the store undeliverable messages are buffered in.
    pub fn with_store<S: MessageStore + Send + Sync + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn with_shared_store(mut self, store: Arc<DynMessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_publish_tick(mut self, tick: Duration) -> Self {
        self.config.publish_tick = tick;
        self
    }

    /// Sets how often the inactivity sweep runs and how long a device may stay untouched.
    pub fn with_inactivity_sweep(mut self, interval: Duration, threshold: Duration) -> Self {
        self.config.sweep_interval = interval;
        self.config.inactivity_threshold = threshold;
        self
    }

    pub fn with_active_window(mut self, window: Duration) -> Self {
        self.config.active_window = window;
        self
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.config.status_interval = interval;
        self
    }

    /// Sets the minimum time between honoured node rebirth commands.
    pub fn with_node_rebirth_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.node_rebirth_cooldown = cooldown;
        self
    }

    /// Sets the backoff used when connecting to the broker.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Builds the bridge.
    ///
    /// Must be called from within a tokio runtime. Returns an error if the group or node id is
    /// missing or invalid, or a configured interval is zero.
    pub fn build(self) -> Result<(Bridge, BridgeHandle), BuildError> {
        let group_id = self.group_id.ok_or(BuildError::MissingGroupId)?;
        let node_id = self.node_id.ok_or(BuildError::MissingNodeId)?;
        spbridge_types::utils::validate_name(&group_id).map_err(BuildError::InvalidName)?;
        spbridge_types::utils::validate_name(&node_id).map_err(BuildError::InvalidName)?;
        self.config.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let (eventloop, client) = self.eventloop_client;
        Ok(Bridge::new(
            group_id,
            node_id,
            eventloop,
            client,
            store,
            self.config,
        ))
    }
}
