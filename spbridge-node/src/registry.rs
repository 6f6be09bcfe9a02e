use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use spbridge_types::payload::Metric;
use tokio::time::Instant;

pub(crate) struct MetricRecord {
    pub value: f64,
    pub interval: Duration,
    /// `None` until the metric is first published.
    pub last_published: Option<Instant>,
    pub last_updated: Instant,
}

impl MetricRecord {
    fn due(&self, now: Instant) -> bool {
        match self.last_published {
            Some(at) => now.duration_since(at) >= self.interval,
            None => true,
        }
    }
}

pub(crate) struct Device {
    pub registered_at: Instant,
    pub last_activity: Instant,
    pub birth_sent: bool,
    /// Set when a birth is owed but could not be sent yet.
    pub birth_pending: bool,
    pub expected_tags: Option<usize>,
    pub metrics: HashMap<String, MetricRecord>,
}

impl Device {
    fn new(now: Instant) -> Self {
        Self {
            registered_at: now,
            last_activity: now,
            birth_sent: false,
            birth_pending: false,
            expected_tags: None,
            metrics: HashMap::new(),
        }
    }

    pub fn needs_birth(&self) -> bool {
        !self.birth_sent || self.birth_pending
    }

    /// At least one metric and, when an expected tag count is set, at least that many.
    pub fn tags_complete(&self) -> bool {
        !self.metrics.is_empty()
            && self
                .expected_tags
                .map_or(true, |expected| self.metrics.len() >= expected)
    }

    /// Whether data for this device may be produced.
    ///
    /// While the session is live only devices born in that session qualify. Without a session,
    /// data for any previously born device is produced so it can be buffered.
    pub fn publishable(&self, session_live: bool) -> bool {
        self.birth_sent && (!session_live || !self.birth_pending)
    }

    pub fn birth_metrics(&self, timestamp: u64) -> Vec<Metric> {
        let mut names: Vec<&String> = self.metrics.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| Metric::double(name.as_str(), self.metrics[name].value, timestamp))
            .collect()
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum MetricUpdate {
    New,
    Changed,
    Unchanged,
}

/// Point in time view of a metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub name: String,
    pub value: f64,
    pub interval: Duration,
    /// Time since the metric was last published, `None` if it never was.
    pub since_published: Option<Duration>,
    pub since_updated: Duration,
}

/// Per device overview used for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSummary {
    pub device_id: String,
    pub metric_count: usize,
    pub since_activity: Duration,
    pub uptime: Duration,
    /// Touched within the active window.
    pub active: bool,
}

/// Lifecycle state of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub birth_sent: bool,
    pub birth_pending: bool,
    pub expected_tags: Option<usize>,
    pub metric_count: usize,
}

#[derive(Default)]
pub(crate) struct DeviceRegistry {
    devices: HashMap<String, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the device was created.
    pub fn register(&mut self, device_id: &str, now: Instant) -> bool {
        if self.devices.contains_key(device_id) {
            return false;
        }
        self.devices.insert(device_id.to_string(), Device::new(now));
        true
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    pub fn get_mut(&mut self, device_id: &str) -> Option<&mut Device> {
        self.devices.get_mut(device_id)
    }

    pub fn remove(&mut self, device_id: &str) -> Option<Device> {
        self.devices.remove(device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Sorted device ids.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn devices_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.values_mut()
    }

    /// Record a sampled value. The device must already be registered.
    pub fn update_metric(
        &mut self,
        device_id: &str,
        name: &str,
        value: f64,
        interval: Duration,
        now: Instant,
    ) -> Option<MetricUpdate> {
        let device = self.devices.get_mut(device_id)?;
        device.last_activity = now;
        let update = match device.metrics.get_mut(name) {
            None => {
                device.metrics.insert(
                    name.to_string(),
                    MetricRecord {
                        value,
                        interval,
                        last_published: None,
                        last_updated: now,
                    },
                );
                MetricUpdate::New
            }
            Some(metric) if metric.value != value => {
                metric.value = value;
                metric.last_updated = now;
                MetricUpdate::Changed
            }
            Some(_) => MetricUpdate::Unchanged,
        };
        Some(update)
    }

    /// Mark a single metric published now and return it, if the device may publish.
    pub fn take_for_publish(
        &mut self,
        device_id: &str,
        name: &str,
        session_live: bool,
        now: Instant,
        timestamp: u64,
    ) -> Option<Metric> {
        let device = self.devices.get_mut(device_id)?;
        if !device.publishable(session_live) {
            return None;
        }
        let metric = device.metrics.get_mut(name)?;
        metric.last_published = Some(now);
        Some(Metric::double(name, metric.value, timestamp))
    }

    /// Collect every metric whose publish interval has elapsed, marking each published.
    pub fn take_due(
        &mut self,
        session_live: bool,
        now: Instant,
        timestamp: u64,
    ) -> Vec<(String, Metric)> {
        let mut due = Vec::new();
        for (device_id, device) in self.devices.iter_mut() {
            if !device.publishable(session_live) {
                continue;
            }
            for (name, metric) in device.metrics.iter_mut() {
                if !metric.due(now) {
                    continue;
                }
                metric.last_published = Some(now);
                due.push((
                    device_id.clone(),
                    Metric::double(name.as_str(), metric.value, timestamp),
                ));
            }
        }
        due.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));
        due
    }

    /// Devices untouched for longer than `max_inactive`, sorted.
    pub fn inactive(&self, max_inactive: Duration, now: Instant) -> Vec<String> {
        let mut ids: Vec<String> = self
            .devices
            .iter()
            .filter(|(_, device)| now.duration_since(device.last_activity) > max_inactive)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn metrics(&self, device_id: &str, now: Instant) -> Option<Vec<MetricSnapshot>> {
        let device = self.devices.get(device_id)?;
        let mut metrics: Vec<MetricSnapshot> = device
            .metrics
            .iter()
            .map(|(name, metric)| MetricSnapshot {
                name: name.clone(),
                value: metric.value,
                interval: metric.interval,
                since_published: metric.last_published.map(|at| now.duration_since(at)),
                since_updated: now.duration_since(metric.last_updated),
            })
            .collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        Some(metrics)
    }

    pub fn summaries(&self, active_window: Duration, now: Instant) -> Vec<DeviceSummary> {
        let mut summaries: Vec<DeviceSummary> = self
            .devices
            .iter()
            .map(|(id, device)| {
                let since_activity = now.duration_since(device.last_activity);
                DeviceSummary {
                    device_id: id.clone(),
                    metric_count: device.metrics.len(),
                    since_activity,
                    uptime: now.duration_since(device.registered_at),
                    active: since_activity <= active_window,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        summaries
    }

    pub fn status(&self, device_id: &str) -> Option<DeviceStatus> {
        self.devices.get(device_id).map(|device| DeviceStatus {
            birth_sent: device.birth_sent,
            birth_pending: device.birth_pending,
            expected_tags: device.expected_tags,
            metric_count: device.metrics.len(),
        })
    }

    pub fn total_metrics(&self) -> usize {
        self.devices.values().map(|d| d.metrics.len()).sum()
    }

    pub fn active_count(&self, active_window: Duration, now: Instant) -> usize {
        self.devices
            .values()
            .filter(|d| now.duration_since(d.last_activity) <= active_window)
            .count()
    }
}

/// Generates `device-<protocol>-<n>` names, counting per protocol from 1.
#[derive(Clone, Default)]
pub(crate) struct NameGenerator {
    counters: Arc<Mutex<HashMap<String, u32>>>,
}

impl NameGenerator {
    pub fn generate(&self, protocol: &str) -> String {
        let mut counters = self.counters.lock().unwrap();
        let counter = counters.entry(protocol.to_string()).or_insert(0);
        *counter += 1;
        format!("device-{protocol}-{counter}")
    }
}
