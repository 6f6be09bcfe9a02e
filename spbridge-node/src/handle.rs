use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use log::{debug, info};
use spbridge_client::DynClient;
use spbridge_types::topic::NodeMessage as NodeMessageType;
use tokio::sync::{mpsc, oneshot};

use crate::{
    bridge::{BridgeShutdown, BridgeState},
    error::HandleError,
    registry::{DeviceStatus, DeviceSummary, MetricSnapshot, NameGenerator},
};

pub(crate) enum Command {
    RegisterDevice(String),
    SetExpectedTags {
        device_id: String,
        count: usize,
    },
    UpdateMetric {
        device_id: String,
        name: String,
        value: f64,
        interval: Duration,
    },
    RemoveDevice {
        device_id: String,
        reply: oneshot::Sender<bool>,
    },
    CheckDeviceHealth {
        max_inactive: Duration,
        reply: oneshot::Sender<Vec<String>>,
    },
    RemoveInactiveDevices {
        max_inactive: Duration,
        reply: oneshot::Sender<usize>,
    },
    RegisteredDevices(oneshot::Sender<Vec<String>>),
    DeviceMetrics {
        device_id: String,
        reply: oneshot::Sender<Option<Vec<MetricSnapshot>>>,
    },
    DevicesSummary(oneshot::Sender<Vec<DeviceSummary>>),
    DeviceStatus {
        device_id: String,
        reply: oneshot::Sender<Option<DeviceStatus>>,
    },
    TotalMetricsCount(oneshot::Sender<usize>),
    ActiveDevicesCount(oneshot::Sender<usize>),
    OfflineQueueLen(oneshot::Sender<usize>),
}

/// A handle for interacting with a [Bridge](crate::Bridge).
///
/// Adapters report values through the handle and operators query device state with it. Requests
/// are processed in the order they are made. Cloning the handle is cheap.
#[derive(Clone)]
pub struct BridgeHandle {
    state: Arc<BridgeState>,
    client: Arc<DynClient>,
    command_tx: mpsc::UnboundedSender<Command>,
    stop_tx: mpsc::Sender<BridgeShutdown>,
    names: NameGenerator,
}

impl BridgeHandle {
    pub(crate) fn new(
        state: Arc<BridgeState>,
        client: Arc<DynClient>,
        command_tx: mpsc::UnboundedSender<Command>,
        stop_tx: mpsc::Sender<BridgeShutdown>,
    ) -> Self {
        Self {
            state,
            client,
            command_tx,
            stop_tx,
            names: NameGenerator::default(),
        }
    }

    fn send(&self, command: Command) -> Result<(), HandleError> {
        self.command_tx
            .send(command)
            .map_err(|_| HandleError::Stopped)
    }

    async fn query<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HandleError> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| HandleError::Stopped)
    }

    /// Stop all operations, sending a node death certificate and disconnecting from the broker.
    ///
    /// This will cancel [Bridge::run()](crate::Bridge::run) and interrupt any replay in progress.
    pub async fn cancel(&self) {
        if !self.state.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Bridge stopping. node={}", self.state.node_id);
        let topic = self.state.node_topic(NodeMessageType::NDeath);
        let payload = self.state.death_payload();
        if self
            .client
            .try_publish_node_message(topic, payload)
            .await
            .is_err()
        {
            debug!("Unable to publish node death certificate on exit");
        }
        _ = self.stop_tx.send(BridgeShutdown).await;
        _ = self.client.disconnect().await;
    }

    /// Register a device. Registering a device that already exists does nothing.
    pub fn register_device<S: Into<String>>(&self, device_id: S) -> Result<(), HandleError> {
        let device_id = device_id.into();
        spbridge_types::utils::validate_name(&device_id).map_err(HandleError::InvalidName)?;
        self.send(Command::RegisterDevice(device_id))
    }

    /// Record how many tags the device's adapter will report.
    ///
    /// The device is not born until that many metrics exist. Unknown devices are ignored.
    pub fn set_expected_tags<S: Into<String>>(
        &self,
        device_id: S,
        count: usize,
    ) -> Result<(), HandleError> {
        self.send(Command::SetExpectedTags {
            device_id: device_id.into(),
            count,
        })
    }

    /// Report a sampled value for a device tag, registering the device if needed.
    ///
    /// `interval` is the minimum time between publishes of this metric. Reporting an unchanged
    /// value only refreshes the device's activity.
    pub fn update_metric<S: Into<String>, S1: Into<String>>(
        &self,
        device_id: S,
        name: S1,
        value: f64,
        interval: Duration,
    ) -> Result<(), HandleError> {
        let device_id = device_id.into();
        spbridge_types::utils::validate_name(&device_id).map_err(HandleError::InvalidName)?;
        self.send(Command::UpdateMetric {
            device_id,
            name: name.into(),
            value,
            interval,
        })
    }

    /// Remove a device, publishing its death certificate first if it was born.
    ///
    /// Returns `false` if the device was not registered.
    pub async fn remove_device<S: Into<String>>(&self, device_id: S) -> Result<bool, HandleError> {
        let device_id = device_id.into();
        self.query(|reply| Command::RemoveDevice { device_id, reply })
            .await
    }

    /// Ids of devices untouched for longer than `max_inactive`.
    pub async fn check_device_health(
        &self,
        max_inactive: Duration,
    ) -> Result<Vec<String>, HandleError> {
        self.query(|reply| Command::CheckDeviceHealth {
            max_inactive,
            reply,
        })
        .await
    }

    /// Remove every device untouched for longer than `max_inactive`, returning how many were removed.
    pub async fn remove_inactive_devices(
        &self,
        max_inactive: Duration,
    ) -> Result<usize, HandleError> {
        self.query(|reply| Command::RemoveInactiveDevices {
            max_inactive,
            reply,
        })
        .await
    }

    /// Generate a device name of the form `device-<protocol>-<n>`.
    ///
    /// Counters are kept per protocol and start at 1.
    pub fn generate_device_name(&self, protocol: &str) -> String {
        self.names.generate(protocol)
    }

    pub async fn registered_devices(&self) -> Result<Vec<String>, HandleError> {
        self.query(Command::RegisteredDevices).await
    }

    /// Metrics of a device, `None` if the device is unknown.
    pub async fn device_metrics<S: Into<String>>(
        &self,
        device_id: S,
    ) -> Result<Option<Vec<MetricSnapshot>>, HandleError> {
        let device_id = device_id.into();
        self.query(|reply| Command::DeviceMetrics { device_id, reply })
            .await
    }

    pub async fn devices_summary(&self) -> Result<Vec<DeviceSummary>, HandleError> {
        self.query(Command::DevicesSummary).await
    }

    pub async fn device_status<S: Into<String>>(
        &self,
        device_id: S,
    ) -> Result<Option<DeviceStatus>, HandleError> {
        let device_id = device_id.into();
        self.query(|reply| Command::DeviceStatus { device_id, reply })
            .await
    }

    pub async fn total_metrics_count(&self) -> Result<usize, HandleError> {
        self.query(Command::TotalMetricsCount).await
    }

    pub async fn active_devices_count(&self) -> Result<usize, HandleError> {
        self.query(Command::ActiveDevicesCount).await
    }

    /// Number of messages waiting in the offline log.
    pub async fn offline_queue_len(&self) -> Result<usize, HandleError> {
        self.query(Command::OfflineQueueLen).await
    }
}
