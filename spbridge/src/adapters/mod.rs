//! Field protocol adapters.
//!
//! An adapter registers its device with the bridge, declares how many tags it will report and then
//! samples each tag on the tag's own interval, reporting values through
//! [BridgeHandle::update_metric](spbridge_node::BridgeHandle::update_metric).

use std::time::Duration;

use log::debug;
use spbridge_node::{BridgeHandle, HandleError};
use thiserror::Error;
use tokio::{sync::oneshot, task::JoinHandle, time::Instant};

pub mod modbus;
pub mod simulator;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("modbus transport error: {0}")]
    Transport(#[from] tokio_modbus::Error),
    #[error("modbus exception: {0:?}")]
    Exception(tokio_modbus::ExceptionCode),
    #[error("request timed out")]
    Timeout,
    #[error("empty response")]
    EmptyResponse,
    #[error("bridge unavailable: {0}")]
    Bridge(#[from] HandleError),
}

impl From<tokio_modbus::ExceptionCode> for AdapterError {
    fn from(code: tokio_modbus::ExceptionCode) -> Self {
        AdapterError::Exception(code)
    }
}

/// Holds a tag at its last accepted value until a sample moves at least `delta` away from it.
///
/// Without a delta every value passes; unchanged values are filtered by the bridge itself.
#[derive(Debug, Clone)]
pub struct DeltaFilter {
    delta: Option<f64>,
    last: Option<f64>,
}

impl DeltaFilter {
    pub fn new(delta: Option<f64>) -> Self {
        Self { delta, last: None }
    }

    /// The value to report for a sample: the sample itself if accepted, otherwise the last
    /// accepted value.
    pub fn apply(&mut self, value: f64) -> f64 {
        match (self.delta, self.last) {
            (Some(delta), Some(last)) if (value - last).abs() < delta => last,
            _ => {
                self.last = Some(value);
                value
            }
        }
    }
}

/// Per tag sampling deadlines.
pub(crate) struct Schedule {
    periods: Vec<Duration>,
    next: Vec<Instant>,
}

impl Schedule {
    /// Every tag is due immediately.
    pub fn new(periods: Vec<Duration>, now: Instant) -> Self {
        let next = vec![now; periods.len()];
        Self { periods, next }
    }

    pub fn reset(&mut self, now: Instant) {
        self.next.iter_mut().for_each(|n| *n = now);
    }

    /// The earliest deadline and its tag index.
    pub fn next_due(&self) -> Option<(usize, Instant)> {
        self.next
            .iter()
            .copied()
            .enumerate()
            .min_by_key(|(_, at)| *at)
    }

    /// Move the tag's deadline one period on. Missed periods are skipped rather than caught up.
    pub fn advance(&mut self, index: usize, now: Instant) {
        let period = self.periods[index];
        let mut next = self.next[index] + period;
        if next <= now {
            next = now + period;
        }
        self.next[index] = next;
    }
}

/// Register the device and declare how many tags it reports. Repeating this is harmless.
pub(crate) fn announce(
    bridge: &BridgeHandle,
    device_id: &str,
    tag_count: usize,
) -> Result<(), HandleError> {
    bridge.register_device(device_id)?;
    bridge.set_expected_tags(device_id, tag_count)
}

/// Forward a sample to the bridge through the tag's delta filter.
///
/// Every sample is reported so the device stays active while its values hold steady.
pub(crate) fn report(
    bridge: &BridgeHandle,
    device_id: &str,
    tag: &str,
    filter: &mut DeltaFilter,
    value: f64,
    interval: Duration,
) {
    let value = filter.apply(value);
    match bridge.update_metric(device_id, tag, value, interval) {
        Ok(()) => debug!("Tag value updated: {tag} = {value}. device={device_id}"),
        Err(e) => debug!("Dropping value for {tag}: {e}. device={device_id}"),
    }
}

/// A started adapter task.
pub struct RunningAdapter {
    name: String,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RunningAdapter {
    pub(crate) fn new(name: String, stop_tx: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            name,
            stop_tx,
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the adapter to stop and wait for it to release its resources.
    pub async fn stop(self) {
        _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            debug!("Adapter {} task ended abnormally: {e}", self.name);
        }
    }
}
