use chrono::{DateTime, Duration, Utc};
use costmon_common::types::MetricSample;
use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;

/// Capacity-bounded, time-ordered buffer of collected samples.
///
/// Appends evict from the front once `capacity` is reached, and
/// [`MetricHistory::evict`] drops samples older than the retention horizon.
/// Readers always get a copy, so evaluation never observes a half-applied
/// tick.
pub struct MetricHistory {
    capacity: usize,
    retention: Duration,
    data: RwLock<VecDeque<MetricSample>>,
}

impl MetricHistory {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            retention,
            data: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends a tick's samples, returning how many old samples were
    /// pushed out by the capacity bound.
    pub fn append(&self, samples: Vec<MetricSample>) -> usize {
        let mut data = self
            .data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut evicted = 0;
        for sample in samples {
            if data.len() >= self.capacity {
                data.pop_front();
                evicted += 1;
            }
            data.push_back(sample);
        }
        evicted
    }

    /// Drops samples older than the retention horizon.
    pub fn evict(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut data = self
            .data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = data.len();
        while let Some(front) = data.front() {
            if front.timestamp < cutoff {
                data.pop_front();
            } else {
                break;
            }
        }
        before - data.len()
    }

    pub fn snapshot(&self) -> Vec<MetricSample> {
        let data = self
            .data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        data.iter().cloned().collect()
    }

    /// Latest sample of every target, keyed by target id.
    pub fn latest_per_target(&self) -> BTreeMap<String, MetricSample> {
        let data = self
            .data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut latest: BTreeMap<String, MetricSample> = BTreeMap::new();
        for sample in data.iter() {
            match latest.get(&sample.target_id) {
                Some(existing) if existing.timestamp > sample.timestamp => {}
                _ => {
                    latest.insert(sample.target_id.clone(), sample.clone());
                }
            }
        }
        latest
    }

    pub fn len(&self) -> usize {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
