//! Wires the configuration, the offline store, the bridge and the adapters together and runs them
//! until the process is asked to stop.

use std::{future::Future, sync::Arc, time::Duration};

use futures::future::join_all;
use log::{error, info, warn};
use spbridge_client_rumqtt as rumqtt;
use spbridge_node::{
    Bridge, BridgeBuilder, BridgeHandle, BuildError, DynMessageStore, MemoryStore, RedbStore,
    StoreError,
};
use thiserror::Error;
use tokio::time::timeout;

use crate::{
    adapters::{modbus::ModbusAdapter, simulator::SimulatorAdapter, RunningAdapter},
    config::Config,
};

const MQTT_CHANNEL_CAPACITY: usize = 1000;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("unable to open offline store: {0}")]
    Store(#[from] StoreError),
    #[error("unable to create bridge: {0}")]
    Build(#[from] BuildError),
    #[error("unable to install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

pub fn open_store(config: &Config) -> Result<Arc<DynMessageStore>, StoreError> {
    if config.storage.memory {
        info!("Buffering offline messages in memory");
        return Ok(Arc::new(MemoryStore::new()));
    }
    info!(
        "Buffering offline messages in {}",
        config.storage.path.display()
    );
    Ok(Arc::new(RedbStore::open(&config.storage.path)?))
}

/// Create and start every enabled adapter.
///
/// Adapters that fail to start are logged and skipped.
pub fn start_adapters(config: &Config, handle: &BridgeHandle) -> Vec<RunningAdapter> {
    let mut started = Vec::new();
    let mut failed = Vec::new();

    for (i, modbus) in config.modbus.iter().enumerate() {
        if !modbus.enabled {
            warn!("Modbus service {} disabled", i + 1);
            continue;
        }
        let device_id = modbus
            .device_name
            .clone()
            .unwrap_or_else(|| handle.generate_device_name("modbus"));
        let adapter = ModbusAdapter::new(
            device_id,
            modbus.clone(),
            config.retry.retry_config(),
            handle.clone(),
        );
        let name = format!("Modbus-{} ({})", i + 1, adapter.device_id());
        match adapter.start() {
            Ok(adapter) => started.push(adapter),
            Err(e) => {
                error!("Failed to start {name} service: {e}");
                failed.push(name);
            }
        }
    }

    for (i, simulator) in config.simulator.iter().enumerate() {
        if !simulator.enabled {
            warn!("Simulator service {} disabled", i + 1);
            continue;
        }
        let device_id = simulator
            .device_name
            .clone()
            .unwrap_or_else(|| handle.generate_device_name("simulator"));
        let adapter = SimulatorAdapter::new(device_id, simulator.clone(), handle.clone());
        let name = format!("Simulator-{} ({})", i + 1, adapter.device_id());
        match adapter.start() {
            Ok(adapter) => started.push(adapter),
            Err(e) => {
                error!("Failed to start {name} service: {e}");
                failed.push(name);
            }
        }
    }

    if !started.is_empty() {
        let names: Vec<&str> = started.iter().map(|a| a.name()).collect();
        info!("Services started: {}", names.join(", "));
    }
    if !failed.is_empty() {
        warn!("Failed services: {}", failed.join(", "));
    }
    started
}

/// Stop the adapters first so no values arrive after the node death certificate, then the bridge.
pub async fn shutdown(adapters: Vec<RunningAdapter>, handle: &BridgeHandle, bridge: impl Future) {
    info!("Stopping services...");
    join_all(adapters.into_iter().map(RunningAdapter::stop)).await;
    handle.cancel().await;
    if timeout(SHUTDOWN_TIMEOUT, bridge).await.is_err() {
        warn!("Bridge did not stop within {}s", SHUTDOWN_TIMEOUT.as_secs());
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<(), std::io::Error> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<(), std::io::Error> {
    tokio::signal::ctrl_c().await
}

fn log_summary(config: &Config) {
    let modbus_enabled = config.modbus.iter().filter(|m| m.enabled).count();
    let simulator_enabled = config.simulator.iter().filter(|s| s.enabled).count();
    info!("Configuration Summary:");
    info!(
        "- Sparkplug: group={} edge node={} broker={}:{}",
        config.mqtt.sparkplug.group_id,
        config.mqtt.sparkplug.edge_node,
        config.mqtt.host,
        config.mqtt.port
    );
    info!(
        "- Modbus Services: {} configured, {modbus_enabled} enabled",
        config.modbus.len()
    );
    info!(
        "- Simulator Services: {} configured, {simulator_enabled} enabled",
        config.simulator.len()
    );
    info!(
        "- Total Services to Start: {}",
        1 + modbus_enabled + simulator_enabled
    );
}

fn build_bridge(
    config: &Config,
    store: Arc<DynMessageStore>,
) -> Result<(Bridge, BridgeHandle), BuildError> {
    let (eventloop, client) = rumqtt::EventLoop::new(config.mqtt_options(), MQTT_CHANNEL_CAPACITY);
    BridgeBuilder::new(eventloop, client)
        .with_group_id(config.mqtt.sparkplug.group_id.as_str())
        .with_node_id(config.mqtt.sparkplug.edge_node.as_str())
        .with_shared_store(store)
        .with_config(config.bridge_config())
        .build()
}

/// Run the gateway until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<(), SupervisorError> {
    log_summary(&config);
    let store = open_store(&config)?;
    let (bridge, handle) = build_bridge(&config, store)?;
    let bridge = tokio::spawn(bridge.run());

    let adapters = start_adapters(&config, &handle);
    let signal = shutdown_signal().await;
    shutdown(adapters, &handle, bridge).await;
    signal?;
    info!("Shutdown complete");
    Ok(())
}
