// SPDX-License-Identifier: Apache-2.0

//! Configuration hot reload.
//!
//! The directory holding the configuration file is watched (editors and deploy tools usually
//! replace the file instead of rewriting it in place). Every burst of events naming the file
//! triggers one load; only valid snapshots that differ from the running one are returned.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::init::config::{AgentConfig, ConfigFile};
use crate::receivers::file::watcher::{
    FileEvent, FileEventKind, FileWatcher, NativeWatcher, WatcherError, watch_directory,
};

/// Quiet period after the first event of a burst before the file is read.
const SETTLE_DELAY: Duration = Duration::from_millis(200);

pub struct ConfigReloader {
    path: PathBuf,
    watcher: NativeWatcher,
    current: ConfigFile,
}

impl ConfigReloader {
    /// Watch `path` for changes. `current` is the configuration already running.
    pub fn new(path: &Path, current: ConfigFile) -> Result<Self, WatcherError> {
        let path = std::path::absolute(path)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let watcher = watch_directory(&dir)?;
        info!(path = %path.display(), "Watching configuration for changes");

        Ok(Self {
            path,
            watcher,
            current,
        })
    }

    /// Wait for the next valid configuration change. Returns `None` once the watch is lost.
    pub async fn next(&mut self) -> Option<AgentConfig> {
        loop {
            let events = match self.watcher.recv().await {
                Ok(events) => events,
                Err(e) => {
                    error!(error = %e, "Configuration watch lost, hot reload disabled");
                    return None;
                }
            };
            if !events.iter().any(|e| self.touches_config(e)) {
                continue;
            }

            tokio::time::sleep(SETTLE_DELAY).await;
            if let Err(e) = self.watcher.try_recv() {
                error!(error = %e, "Configuration watch lost, hot reload disabled");
                return None;
            }

            match ConfigFile::load(&self.path) {
                Ok(file) if file == self.current => {
                    debug!(path = %self.path.display(), "Configuration unchanged");
                }
                Ok(file) => match AgentConfig::from_config_file(file.clone()) {
                    Ok(config) => {
                        info!(path = %self.path.display(), "Loaded new configuration");
                        self.current = file;
                        return Some(config);
                    }
                    Err(e) => {
                        error!(error = %e, "Invalid configuration, keeping the running one");
                    }
                },
                Err(e) => {
                    error!(error = %e, "Unable to load configuration, keeping the running one");
                }
            }
        }
    }

    fn touches_config(&self, event: &FileEvent) -> bool {
        match event.kind {
            FileEventKind::Create
            | FileEventKind::MovedIn
            | FileEventKind::Modify
            | FileEventKind::Rename => {
                event.paths.iter().any(|p| p == &self.path)
            }
            FileEventKind::Remove | FileEventKind::Other => false,
        }
    }
}
