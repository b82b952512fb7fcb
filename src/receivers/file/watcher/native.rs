// SPDX-License-Identifier: Apache-2.0

//! Native file system watcher using the `notify` crate.
//!
//! Uses OS-level file system notifications:
//! - Linux: inotify
//! - macOS: FSEvents
//! - Windows: ReadDirectoryChangesW
//!
//! Events are bridged from notify's callback thread through a bounded channel, so the same
//! watcher can be drained from a blocking thread (`recv_timeout`) or from a task (`recv`).

use std::path::Path;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::traits::{FileEvent, FileEventKind, FileWatcher, WatcherError};
use crate::bounded_channel::{self, BoundedReceiver, RecvTimeout};

const EVENT_QUEUE_SIZE: usize = 1024;

/// Native file system watcher using OS-level notifications.
pub struct NativeWatcher {
    watcher: RecommendedWatcher,
    receiver: BoundedReceiver<Result<Event, notify::Error>>,
}

impl NativeWatcher {
    pub fn new() -> Result<Self, WatcherError> {
        let (tx, rx) = bounded_channel::bounded(EVENT_QUEUE_SIZE);

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send_blocking(res);
            },
            Config::default(),
        )
        .map_err(|e| WatcherError::Init(e.to_string()))?;

        Ok(Self {
            watcher,
            receiver: rx,
        })
    }

    /// Wait for the next batch of events. Returns an error once the watcher is gone.
    pub async fn recv(&mut self) -> Result<Vec<FileEvent>, WatcherError> {
        let mut events = Vec::new();

        match self.receiver.next().await {
            Some(res) => Self::push_event(&mut events, res),
            None => return Err(WatcherError::Channel("watcher channel disconnected".into())),
        }

        events.extend(self.try_recv()?);
        Ok(events)
    }

    fn push_event(events: &mut Vec<FileEvent>, res: Result<Event, notify::Error>) {
        match res {
            Ok(event) => {
                if let Some(file_event) = Self::convert_event(event) {
                    events.push(file_event);
                }
            }
            Err(e) => {
                tracing::warn!("File watcher error: {}", e);
            }
        }
    }

    /// Convert a notify event to our FileEvent type
    fn convert_event(event: Event) -> Option<FileEvent> {
        if event.paths.is_empty() {
            return None;
        }

        let kind = match event.kind {
            EventKind::Create(_) => FileEventKind::Create,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FileEventKind::MovedIn,
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FileEventKind::Rename,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => FileEventKind::Rename,
            EventKind::Modify(ModifyKind::Name(_)) => {
                // Direction unknown (FSEvents): decide by whether the path still exists.
                if event.paths[0].exists() {
                    FileEventKind::MovedIn
                } else {
                    FileEventKind::Rename
                }
            }
            EventKind::Modify(_) => FileEventKind::Modify,
            EventKind::Remove(_) => FileEventKind::Remove,
            EventKind::Access(_) => return None,
            EventKind::Other => FileEventKind::Other,
            EventKind::Any => FileEventKind::Other,
        };

        Some(FileEvent::new(kind, event.paths))
    }
}

impl FileWatcher for NativeWatcher {
    fn watch(&mut self, path: &Path) -> Result<(), WatcherError> {
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| WatcherError::Watch(format!("{}: {}", path.display(), e)))
    }

    fn try_recv(&mut self) -> Result<Vec<FileEvent>, WatcherError> {
        let mut events = Vec::new();

        loop {
            match self.receiver.try_recv() {
                Ok(Some(res)) => Self::push_event(&mut events, res),
                Ok(None) => break,
                Err(_) => {
                    return Err(WatcherError::Channel("watcher channel disconnected".into()));
                }
            }
        }

        Ok(events)
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<FileEvent>, WatcherError> {
        let mut events = Vec::new();

        // First wait for at least one event with timeout
        match self.receiver.recv_timeout(timeout) {
            RecvTimeout::Item(res) => Self::push_event(&mut events, res),
            RecvTimeout::Timeout => return Ok(events),
            RecvTimeout::Disconnected => {
                return Err(WatcherError::Channel("watcher channel disconnected".into()));
            }
        }

        // Then drain any additional pending events
        events.extend(self.try_recv()?);

        Ok(events)
    }

    fn backend_name(&self) -> &'static str {
        #[cfg(target_os = "linux")]
        {
            "inotify"
        }
        #[cfg(target_os = "macos")]
        {
            "FSEvents"
        }
        #[cfg(target_os = "windows")]
        {
            "ReadDirectoryChangesW"
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            "native"
        }
    }
}
