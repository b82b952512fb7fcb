// SPDX-License-Identifier: Apache-2.0

//! Shared keyword counters.
//!
//! Matchers add to entries keyed by (target, rule); the push scheduler gap-fills missing series
//! and drains everything once per interval. Both operations take the same lock, so a drain
//! observes every increment that completed before it and none that follow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::receivers::file::target::{KeywordRule, TargetId, TargetRegistry, WatchTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CounterType {
    #[serde(rename = "GAUGE")]
    Gauge,
}

/// One series sample as it is pushed to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterEntry {
    pub metric: String,
    pub endpoint: String,
    pub timestamp: i64,
    pub value: f64,
    pub step: u64,
    pub counter_type: CounterType,
    pub tags: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterKey {
    pub target: TargetId,
    pub rule: String,
}

impl CounterKey {
    pub fn new(target: &WatchTarget, rule: &KeywordRule) -> Self {
        Self {
            target: target.id(),
            rule: rule.key(),
        }
    }
}

/// Settings shared by every series of one configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSettings {
    pub metric: String,
    pub endpoint: String,
    /// Push interval in seconds
    pub step: u64,
}

impl MetricSettings {
    fn entry(&self, target: &WatchTarget, rule: &KeywordRule, value: f64) -> CounterEntry {
        CounterEntry {
            metric: self.metric.clone(),
            endpoint: self.endpoint.clone(),
            timestamp: unix_now(),
            value,
            step: self.step,
            counter_type: CounterType::Gauge,
            tags: target.tags_for(rule),
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    counters: Arc<Mutex<HashMap<CounterKey, CounterEntry>>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    // Counter state stays consistent even if a holder panicked, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, HashMap<CounterKey, CounterEntry>> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `value` to the series of (`target`, `rule`), creating it on first use.
    ///
    /// An existing entry keeps its timestamp and tags.
    pub fn record(
        &self,
        settings: &MetricSettings,
        target: &WatchTarget,
        rule: &KeywordRule,
        value: f64,
    ) {
        let key = CounterKey::new(target, rule);
        let mut counters = self.lock();
        match counters.get_mut(&key) {
            Some(entry) => entry.value += value,
            None => {
                counters.insert(key, settings.entry(target, rule, value));
            }
        }
    }

    /// Insert a zero sample for every configured series that has none. Returns the number of
    /// series added.
    pub fn gap_fill(&self, registry: &TargetRegistry, settings: &MetricSettings) -> usize {
        let mut counters = self.lock();
        let mut filled = 0;
        for target in registry.targets() {
            for rule in target.rules() {
                let key = CounterKey::new(target, rule);
                if counters.contains_key(&key) {
                    continue;
                }
                counters.insert(key, settings.entry(target, rule, 0.0));
                filled += 1;
            }
        }
        filled
    }

    /// Remove and return every entry, ordered by target and rule key.
    pub fn drain(&self) -> Vec<CounterEntry> {
        let counters = std::mem::take(&mut *self.lock());
        let mut entries: Vec<_> = counters.into_iter().collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries.into_iter().map(|(_, entry)| entry).collect()
    }

    #[cfg(test)]
    pub fn get(&self, key: &CounterKey) -> Option<CounterEntry> {
        self.lock().get(key).cloned()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
