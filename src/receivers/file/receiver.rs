// SPDX-License-Identifier: Apache-2.0

//! File receiver implementation.
//!
//! Architecture:
//! - One async task per watch target runs its rotation state machine
//! - Each tracked file is read by a tail loop on the blocking pool
//! - Lines are matched on the tail thread and recorded straight into the shared aggregator

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{error, info};

use crate::aggregator::{Aggregator, MetricSettings};
use crate::receivers::file::input::TailConfig;
use crate::receivers::file::rotation::TargetWatcher;
use crate::receivers::file::target::TargetRegistry;

pub struct FileReceiver {
    registry: Arc<TargetRegistry>,
    settings: Arc<MetricSettings>,
    aggregator: Aggregator,
    tail_config: TailConfig,
}

impl FileReceiver {
    pub fn new(
        registry: Arc<TargetRegistry>,
        settings: Arc<MetricSettings>,
        aggregator: Aggregator,
        tail_config: TailConfig,
    ) -> Result<Self, BoxError> {
        tail_config.validate()?;
        Ok(Self {
            registry,
            settings,
            aggregator,
            tail_config,
        })
    }

    /// Spawn one watcher task per target. A target whose setup fails is logged and disabled;
    /// its task completes successfully so the other targets keep running.
    pub fn start(
        self,
        task_set: &mut JoinSet<Result<(), BoxError>>,
        receivers_cancel: &CancellationToken,
    ) {
        info!(targets = self.registry.len(), "Starting file receiver");

        for target in self.registry.targets() {
            let watcher = TargetWatcher::new(
                target.clone(),
                self.settings.clone(),
                self.aggregator.clone(),
                self.tail_config.clone(),
            );
            let target = target.clone();
            let cancel = receivers_cancel.clone();

            task_set.spawn(async move {
                if let Err(e) = watcher.run(cancel).await {
                    error!(
                        target_id = %target.id(),
                        path = %target.path().display(),
                        error = %e,
                        "Target disabled"
                    );
                }
                Ok(())
            });
        }
    }
}
