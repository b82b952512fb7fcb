// SPDX-License-Identifier: Apache-2.0

//! Interval-driven flushing of the aggregator.
//!
//! Every interval the scheduler gap-fills the configured series, drains the aggregator and
//! hands the batch to a push task. A semaphore bounds the number of pushes in flight; when it is
//! exhausted the scheduler waits for a permit before draining, so counters keep accumulating
//! instead of being dropped.

use std::sync::Arc;
use std::time::Duration;

use http::Uri;
use tokio::select;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use crate::aggregator::{Aggregator, MetricSettings};
use crate::exporters::falcon::pusher::MetricsPusher;
use crate::receivers::file::TargetRegistry;

/// What one configuration snapshot tells the scheduler.
#[derive(Debug, Clone)]
pub struct FlushConfig {
    pub settings: Arc<MetricSettings>,
    pub registry: Arc<TargetRegistry>,
    pub agent: Uri,
    pub interval: Duration,
}

pub fn default_max_in_flight() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(2)
}

pub struct PushScheduler {
    aggregator: Aggregator,
    snapshots: watch::Receiver<Arc<FlushConfig>>,
    permits: Arc<Semaphore>,
    push_timeout: Duration,
    in_flight: JoinSet<()>,
}

impl PushScheduler {
    pub fn new(
        aggregator: Aggregator,
        snapshots: watch::Receiver<Arc<FlushConfig>>,
        max_in_flight: usize,
        push_timeout: Duration,
    ) -> Self {
        Self {
            aggregator,
            snapshots,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            push_timeout,
            in_flight: JoinSet::new(),
        }
    }

    /// Flush on every tick until cancelled, then flush once more and wait for in-flight pushes.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BoxError> {
        let mut current = self.snapshots.borrow_and_update().clone();
        let mut pusher = MetricsPusher::new(current.agent.clone(), self.push_timeout)?;
        let mut ticker = flush_interval(current.interval);
        let mut snapshots_open = true;

        info!(
            agent = %current.agent,
            interval = ?current.interval,
            max_in_flight = self.permits.available_permits(),
            "Starting push scheduler"
        );

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Push scheduler cancelled");
                    break;
                }

                changed = self.snapshots.changed(), if snapshots_open => {
                    if changed.is_err() {
                        snapshots_open = false;
                        continue;
                    }
                    let next = self.snapshots.borrow_and_update().clone();
                    if next.agent != current.agent {
                        pusher = MetricsPusher::new(next.agent.clone(), self.push_timeout)?;
                    }
                    if next.interval != current.interval {
                        ticker = flush_interval(next.interval);
                    }
                    info!(
                        agent = %next.agent,
                        interval = ?next.interval,
                        targets = next.registry.len(),
                        "Push settings updated"
                    );
                    current = next;
                }

                Some(result) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = result {
                        error!(error = %e, "Push task failed");
                    }
                }

                _ = ticker.tick() => {
                    self.flush(&current, &pusher).await;
                }
            }
        }

        self.flush(&current, &pusher).await;
        self.wait_in_flight().await;
        info!("Push scheduler stopped");
        Ok(())
    }

    /// Gap-fill, drain and dispatch one batch. Waits for a push permit before draining.
    async fn flush(&mut self, config: &FlushConfig, pusher: &MetricsPusher) {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let filled = self.aggregator.gap_fill(&config.registry, &config.settings);
        let batch = self.aggregator.drain();
        if batch.is_empty() {
            debug!("Nothing to push");
            return;
        }
        debug!(records = batch.len(), gap_filled = filled, "Flushing counters");

        let pusher = pusher.clone();
        self.in_flight.spawn(async move {
            let _permit = permit;
            let records = batch.len();
            match pusher.push(&batch).await {
                Ok(()) => info!(records, endpoint = %pusher.endpoint(), "Pushed metrics"),
                Err(e) => error!(
                    records,
                    endpoint = %pusher.endpoint(),
                    error = %e,
                    "Failed to push metrics, dropping batch"
                ),
            }
        });
    }

    async fn wait_in_flight(&mut self) {
        let deadline = Instant::now() + self.push_timeout + Duration::from_secs(1);
        while !self.in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, self.in_flight.join_next()).await {
                Ok(Some(Err(e))) => error!(error = %e, "Push task failed"),
                Ok(_) => {}
                Err(_) => {
                    warn!(
                        pending = self.in_flight.len(),
                        "Timed out waiting for pushes, aborting"
                    );
                    self.in_flight.abort_all();
                    break;
                }
            }
        }
    }
}

fn flush_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::init_crypto_provider;
    use crate::receivers::file::{KeywordRule, WatchTarget};
    use httpmock::prelude::*;
    use std::path::PathBuf;

    fn flush_config(server: &MockServer, interval: Duration) -> FlushConfig {
        flush_config_with_rules(server, interval, &[("ERROR", "err"), ("WARN", "warn")])
    }

    fn flush_config_with_rules(
        server: &MockServer,
        interval: Duration,
        rules: &[(&str, &str)],
    ) -> FlushConfig {
        let target = WatchTarget::new(
            PathBuf::from("/var/log/app"),
            "app.".to_string(),
            ".log".to_string(),
            false,
            rules
                .iter()
                .map(|(exp, tag)| KeywordRule::new(exp, tag).unwrap())
                .collect(),
        );
        FlushConfig {
            settings: Arc::new(MetricSettings {
                metric: "log.console".to_string(),
                endpoint: "host-a".to_string(),
                step: 30,
            }),
            registry: Arc::new(TargetRegistry::new(vec![target])),
            agent: server.url("/v1/push").parse().unwrap(),
            interval,
        }
    }

    fn record_error_line(aggregator: &Aggregator, config: &FlushConfig) {
        let target = &config.registry.targets()[0];
        for rule in target.rules() {
            let value = rule.evaluate("14:46:49 ERROR something failed");
            aggregator.record(&config.settings, target, rule, value);
        }
    }

    fn scheduler(aggregator: &Aggregator, config: FlushConfig) -> PushScheduler {
        let (_tx, rx) = watch::channel(Arc::new(config));
        PushScheduler::new(aggregator.clone(), rx, 2, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_flush_pushes_matched_and_gap_filled_series() {
        init_crypto_provider().unwrap();
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/push")
                .header("content-type", "plain/text")
                .body_contains(r#""value":1.0,"step":30,"counterType":"GAUGE","tags":"prefix=app.,suffix=.log,err=ERROR""#)
                .body_contains(r#""value":0.0,"step":30,"counterType":"GAUGE","tags":"prefix=app.,suffix=.log,warn=WARN""#);
            then.status(200).body("success");
        });

        let aggregator = Aggregator::new();
        let config = flush_config(&server, Duration::from_secs(60));
        record_error_line(&aggregator, &config);

        let pusher = MetricsPusher::new(config.agent.clone(), Duration::from_secs(5)).unwrap();
        let mut scheduler = scheduler(&aggregator, config.clone());
        scheduler.flush(&config, &pusher).await;
        assert!(aggregator.is_empty());
        scheduler.wait_in_flight().await;

        mock.assert();
    }

    #[tokio::test]
    async fn test_failed_push_is_dropped_and_next_interval_starts_empty() {
        init_crypto_provider().unwrap();
        let server = MockServer::start();
        let failing = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/push")
                .body_contains(r#""value":1.0"#);
            then.status(500).body("boom");
        });
        let zeros = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/push")
                .body_contains(r#""value":0.0"#);
            then.status(200);
        });

        let aggregator = Aggregator::new();
        let config = flush_config_with_rules(&server, Duration::from_secs(60), &[("ERROR", "err")]);
        record_error_line(&aggregator, &config);

        let pusher = MetricsPusher::new(config.agent.clone(), Duration::from_secs(5)).unwrap();
        let mut scheduler = scheduler(&aggregator, config.clone());

        scheduler.flush(&config, &pusher).await;
        scheduler.wait_in_flight().await;
        assert!(aggregator.is_empty());
        assert_eq!(failing.hits(), 1);

        // Nothing was requeued: the next batch only carries gap-filled zeros.
        scheduler.flush(&config, &pusher).await;
        scheduler.wait_in_flight().await;
        assert_eq!(failing.hits(), 1);
        assert_eq!(zeros.hits(), 1);
    }

    #[tokio::test]
    async fn test_empty_registry_pushes_nothing() {
        init_crypto_provider().unwrap();
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/push");
            then.status(200);
        });

        let aggregator = Aggregator::new();
        let mut config = flush_config(&server, Duration::from_secs(60));
        config.registry = Arc::new(TargetRegistry::new(vec![]));

        let pusher = MetricsPusher::new(config.agent.clone(), Duration::from_secs(5)).unwrap();
        let mut scheduler = scheduler(&aggregator, config.clone());
        scheduler.flush(&config, &pusher).await;
        scheduler.wait_in_flight().await;

        assert_eq!(mock.hits(), 0);
    }

    #[tokio::test]
    async fn test_run_flushes_on_interval_and_on_shutdown() {
        init_crypto_provider().unwrap();
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/push");
            then.status(200);
        });

        let aggregator = Aggregator::new();
        let config = flush_config(&server, Duration::from_millis(100));
        record_error_line(&aggregator, &config);

        let (tx, rx) = watch::channel(Arc::new(config));
        let scheduler = PushScheduler::new(aggregator.clone(), rx, 2, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        for _ in 0..100 {
            if mock.hits() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let hits_before_shutdown = mock.hits();
        assert!(hits_before_shutdown >= 2);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert!(mock.hits() > hits_before_shutdown);
        drop(tx);
    }

    #[tokio::test]
    async fn test_run_follows_new_snapshot() {
        init_crypto_provider().unwrap();
        let first = MockServer::start();
        let second = MockServer::start();
        let first_mock = first.mock(|when, then| {
            when.method(POST).path("/v1/push");
            then.status(200);
        });
        let second_mock = second.mock(|when, then| {
            when.method(POST).path("/v1/push");
            then.status(200);
        });

        let aggregator = Aggregator::new();
        let (tx, rx) = watch::channel(Arc::new(flush_config(&first, Duration::from_secs(60))));
        let scheduler = PushScheduler::new(aggregator.clone(), rx, 2, Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        tx.send(Arc::new(flush_config(&second, Duration::from_millis(50))))
            .unwrap();

        for _ in 0..100 {
            if second_mock.hits() >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(second_mock.hits() >= 1);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(first_mock.hits(), 0);
    }

    #[test]
    fn test_default_max_in_flight_is_positive() {
        assert!(default_max_in_flight() >= 2);
    }
}
