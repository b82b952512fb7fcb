// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tracing::trace;

use crate::aggregator::{Aggregator, MetricSettings};
use crate::receivers::file::target::WatchTarget;

/// Evaluates the rules of one target against each line and records the result.
#[derive(Clone)]
pub struct KeywordMatcher {
    target: Arc<WatchTarget>,
    settings: Arc<MetricSettings>,
    aggregator: Aggregator,
}

impl KeywordMatcher {
    pub fn new(
        target: Arc<WatchTarget>,
        settings: Arc<MetricSettings>,
        aggregator: Aggregator,
    ) -> Self {
        Self {
            target,
            settings,
            aggregator,
        }
    }

    pub fn process_line(&self, line: &str) {
        for rule in self.target.rules() {
            let value = rule.evaluate(line);
            if value > 0.0 {
                trace!(target_id = %self.target.id(), rule = %rule.key(), "Line matched");
            }
            self.aggregator
                .record(&self.settings, &self.target, rule, value);
        }
    }
}
