//! Random value generator for commissioning without field hardware.

use std::time::Duration;

use log::info;
use rand::Rng;
use spbridge_node::BridgeHandle;
use tokio::{
    select,
    sync::oneshot,
    time::{sleep_until, Instant},
};

use super::{announce, report, AdapterError, DeltaFilter, RunningAdapter, Schedule};
use crate::config::{SimulatedTag, SimulatorConfig};

fn round(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// A uniformly distributed value in `[min, max]` rounded to the tag's decimals.
pub fn sample(tag: &SimulatedTag) -> f64 {
    let value = rand::rng().random_range(tag.min..=tag.max);
    round(value, tag.decimals).clamp(tag.min, tag.max)
}

pub struct SimulatorAdapter {
    device_id: String,
    config: SimulatorConfig,
    bridge: BridgeHandle,
}

impl SimulatorAdapter {
    pub fn new<S: Into<String>>(device_id: S, config: SimulatorConfig, bridge: BridgeHandle) -> Self {
        Self {
            device_id: device_id.into(),
            config,
            bridge,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn start(self) -> Result<RunningAdapter, AdapterError> {
        announce(&self.bridge, &self.device_id, self.config.tags.len())?;
        let (stop_tx, stop_rx) = oneshot::channel();
        let name = format!("Simulator ({})", self.device_id);
        let task = tokio::spawn(self.run(stop_rx));
        Ok(RunningAdapter::new(name, stop_tx, task))
    }

    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let device_id = self.device_id.as_str();
        let tags = &self.config.tags;
        let mut filters: Vec<DeltaFilter> = tags.iter().map(|t| DeltaFilter::new(t.delta)).collect();
        let mut schedule = Schedule::new(
            tags.iter()
                .map(|t| Duration::from_millis(t.interval_ms))
                .collect(),
            Instant::now(),
        );
        info!("Simulating {} tags. device={device_id}", tags.len());

        while let Some((index, due)) = schedule.next_due() {
            select! {
                _ = &mut stop_rx => break,
                _ = sleep_until(due) => (),
            }
            schedule.advance(index, Instant::now());
            let tag = &tags[index];
            report(
                &self.bridge,
                device_id,
                &tag.name,
                &mut filters[index],
                sample(tag),
                Duration::from_millis(tag.interval_ms),
            );
        }
        info!("Simulator stopped. device={device_id}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_are_bounded_and_rounded() {
        let tag = SimulatedTag {
            name: "t".into(),
            min: -5.0,
            max: 5.0,
            decimals: 1,
            interval_ms: 100,
            delta: None,
        };
        for _ in 0..1000 {
            let value = sample(&tag);
            assert!((-5.0..=5.0).contains(&value));
            assert!(((value * 10.0).round() - value * 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn rounding() {
        assert_eq!(round(1.23456, 2), 1.23);
        assert_eq!(round(1.235001, 2), 1.24);
        assert_eq!(round(7.9, 0), 8.0);
    }
}
