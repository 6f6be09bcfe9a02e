//! Modbus TCP poller.

use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{info, warn};
use spbridge_client::{ConnectError, Connector, RetryConfig, RetryController};
use spbridge_node::BridgeHandle;
use tokio::{
    net::lookup_host,
    select,
    sync::{mpsc, oneshot},
    time::{sleep_until, timeout, Instant},
};
use tokio_modbus::{client::Context, prelude::*};

use super::{announce, report, AdapterError, DeltaFilter, RunningAdapter, Schedule};
use crate::config::{ModbusConfig, ModbusTag, RegisterKind};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens the TCP connection and hands the resulting context to the polling task.
struct ModbusConnector {
    host: String,
    port: u16,
    slave: Slave,
    ctx_tx: mpsc::UnboundedSender<Context>,
}

#[async_trait]
impl Connector for ModbusConnector {
    async fn connect(&self) -> Result<(), ConnectError> {
        let attempt = async {
            let addr = lookup_host((self.host.as_str(), self.port))
                .await?
                .next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address for host"))?;
            let ctx = tcp::connect_slave(addr, self.slave).await?;
            Ok::<_, io::Error>(ctx)
        };
        let ctx = match timeout(CONNECT_TIMEOUT, attempt).await {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(e)) => return Err(ConnectError::Failed(e.to_string())),
            Err(_) => return Err(ConnectError::Timeout),
        };
        self.ctx_tx.send(ctx).map_err(|_| ConnectError::Closed)
    }
}

async fn read_tag(ctx: &mut Context, tag: &ModbusTag) -> Result<f64, AdapterError> {
    /* configured registers are 1-based, the protocol is 0-based */
    let address = tag.register - 1;
    let read = async {
        let value = match tag.kind {
            RegisterKind::Holding => ctx
                .read_holding_registers(address, 1)
                .await??
                .first()
                .map(|v| f64::from(*v)),
            RegisterKind::Input => ctx
                .read_input_registers(address, 1)
                .await??
                .first()
                .map(|v| f64::from(*v)),
            RegisterKind::Coil => ctx
                .read_coils(address, 1)
                .await??
                .first()
                .map(|c| if *c { 1.0 } else { 0.0 }),
        };
        value.ok_or(AdapterError::EmptyResponse)
    };
    timeout(REQUEST_TIMEOUT, read)
        .await
        .map_err(|_| AdapterError::Timeout)?
}

/// Polls the tags of one Modbus TCP device and reports them to the bridge.
///
/// The connection is owned by a [RetryController]. A transport error or timeout drops the
/// connection and restarts the controller. Modbus exceptions only affect the tag being read.
pub struct ModbusAdapter {
    device_id: String,
    config: ModbusConfig,
    retry: RetryConfig,
    bridge: BridgeHandle,
}

impl ModbusAdapter {
    pub fn new<S: Into<String>>(
        device_id: S,
        config: ModbusConfig,
        retry: RetryConfig,
        bridge: BridgeHandle,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            config,
            retry,
            bridge,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Register the device with the bridge and start polling.
    pub fn start(self) -> Result<RunningAdapter, AdapterError> {
        announce(&self.bridge, &self.device_id, self.config.tags.len())?;
        let (stop_tx, stop_rx) = oneshot::channel();
        let name = format!("Modbus ({})", self.device_id);
        let task = tokio::spawn(self.run(stop_rx));
        Ok(RunningAdapter::new(name, stop_tx, task))
    }

    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let device_id = self.device_id.as_str();
        let tags = &self.config.tags;
        let (ctx_tx, mut ctx_rx) = mpsc::unbounded_channel();
        let retry = RetryController::new(
            format!("modbus device={device_id}"),
            self.retry.clone(),
            Arc::new(ModbusConnector {
                host: self.config.host.clone(),
                port: self.config.port,
                slave: Slave(self.config.unit_id),
                ctx_tx,
            }),
        );
        let mut filters: Vec<DeltaFilter> = tags.iter().map(|t| DeltaFilter::new(t.delta)).collect();
        let mut schedule = Schedule::new(
            tags.iter()
                .map(|t| Duration::from_millis(t.interval_ms))
                .collect(),
            Instant::now(),
        );
        let mut context: Option<Context> = None;

        retry.start();
        loop {
            let Some(ctx) = context.as_mut() else {
                select! {
                    _ = &mut stop_rx => break,
                    Some(ctx) = ctx_rx.recv() => {
                        info!(
                            "Connected to Modbus device {}:{}. device={device_id}",
                            self.config.host, self.config.port
                        );
                        /* the device may have been swept while the connection was down */
                        if let Err(e) = announce(&self.bridge, device_id, tags.len()) {
                            warn!("Unable to register device with the bridge: {e}. device={device_id}");
                        }
                        schedule.reset(Instant::now());
                        context = Some(ctx);
                    }
                }
                continue;
            };

            let Some((index, due)) = schedule.next_due() else {
                _ = (&mut stop_rx).await;
                break;
            };
            select! {
                _ = &mut stop_rx => break,
                _ = sleep_until(due) => (),
            }

            let tag = &tags[index];
            schedule.advance(index, Instant::now());
            let interval = Duration::from_millis(tag.interval_ms);
            match read_tag(ctx, tag).await {
                Ok(value) => report(
                    &self.bridge,
                    device_id,
                    &tag.name,
                    &mut filters[index],
                    value,
                    interval,
                ),
                Err(e @ (AdapterError::Exception(_) | AdapterError::EmptyResponse)) => {
                    warn!("Error reading tag {}: {e}. device={device_id}", tag.name)
                }
                Err(e) => {
                    warn!("Modbus connection lost, attempting to reconnect: {e}. device={device_id}");
                    context = None;
                    retry.start();
                }
            }
        }

        retry.stop();
        if let Some(mut ctx) = context {
            _ = ctx.disconnect().await;
        }
        info!("Modbus adapter stopped. device={device_id}");
    }
}
