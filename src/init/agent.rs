// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::crypto::init_crypto_provider;
use crate::exporters::falcon::PushScheduler;
use crate::init::args::AgentRun;
use crate::init::config::AgentConfig;
use crate::init::reload::ConfigReloader;
use crate::init::wait;
use crate::receivers::file::{FileReceiver, TailConfig};

/// How long target watchers get to stop their tails when a snapshot is replaced or the agent
/// shuts down.
const TARGETS_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Agent {
    args: AgentRun,
}

impl Agent {
    pub fn new(args: AgentRun) -> Self {
        Self { args }
    }

    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        init_crypto_provider()?;

        let tail_config = self.args.tail_config();
        tail_config.validate()?;

        let config = AgentConfig::load(&self.args.config)?;
        info!(
            config = %self.args.config.display(),
            metric = %config.settings.metric,
            endpoint = %config.settings.endpoint,
            agent = %config.agent,
            interval = ?config.interval,
            targets = config.registry.len(),
            "Starting agent"
        );

        let aggregator = Aggregator::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(config.flush_config()));

        let mut scheduler_task_set = JoinSet::new();
        let scheduler_cancel = CancellationToken::new();
        let scheduler = PushScheduler::new(
            aggregator.clone(),
            snapshot_rx,
            self.args.max_in_flight(),
            self.args.push_timeout(),
        );
        scheduler_task_set.spawn(scheduler.run(scheduler_cancel.clone()));

        let mut reloader = if self.args.watch_config {
            match ConfigReloader::new(&self.args.config, config.source.clone()) {
                Ok(reloader) => Some(reloader),
                Err(e) => {
                    warn!(error = %e, "Unable to watch configuration, hot reload disabled");
                    None
                }
            }
        } else {
            None
        };

        let mut targets = RunningTargets::start(&config, &aggregator, &tail_config)?;

        let result = loop {
            select! {
                _ = agent_cancel.cancelled() => {
                    info!("Agent cancelled, shutting down");
                    break Ok(());
                }

                e = wait::wait_for_any_task(&mut scheduler_task_set) => {
                    match e {
                        Ok(()) => {
                            warn!("Unexpected early exit of push scheduler");
                            break Ok(());
                        }
                        Err(e) => break Err(e),
                    }
                }

                next = next_config(&mut reloader) => {
                    match next {
                        Some(next) => {
                            info!(targets = next.registry.len(), "Applying new configuration");
                            if let Err(e) = targets.stop().await {
                                warn!(error = %e, "Target watchers did not stop cleanly");
                            }
                            snapshot_tx.send_replace(Arc::new(next.flush_config()));
                            targets = RunningTargets::start(&next, &aggregator, &tail_config)?;
                        }
                        None => reloader = None,
                    }
                }
            }
        };

        // Stop reading before the final flush so it carries every counted line.
        if let Err(e) = targets.stop().await {
            warn!(error = %e, "Target watchers did not stop cleanly");
        }
        scheduler_cancel.cancel();
        if let Err(e) = wait::wait_for_tasks_with_timeout(
            &mut scheduler_task_set,
            self.args.push_timeout() + Duration::from_secs(2),
        )
        .await
        {
            error!(error = %e, "Push scheduler did not stop cleanly");
        }

        result
    }
}

async fn next_config(reloader: &mut Option<ConfigReloader>) -> Option<AgentConfig> {
    match reloader {
        Some(reloader) => reloader.next().await,
        None => std::future::pending().await,
    }
}

/// The target watchers of one configuration snapshot.
struct RunningTargets {
    cancel: CancellationToken,
    tasks: JoinSet<Result<(), BoxError>>,
}

impl RunningTargets {
    fn start(
        config: &AgentConfig,
        aggregator: &Aggregator,
        tail_config: &TailConfig,
    ) -> Result<Self, BoxError> {
        let receiver = FileReceiver::new(
            config.registry.clone(),
            config.settings.clone(),
            aggregator.clone(),
            tail_config.clone(),
        )?;

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        receiver.start(&mut tasks, &cancel);
        Ok(Self { cancel, tasks })
    }

    async fn stop(&mut self) -> Result<(), BoxError> {
        self.cancel.cancel();
        wait::wait_for_tasks_with_timeout(&mut self.tasks, TARGETS_STOP_TIMEOUT).await
    }
}
