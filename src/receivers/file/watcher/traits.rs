// SPDX-License-Identifier: Apache-2.0

//! Traits and types for file system watchers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for watcher operations
#[derive(Debug)]
pub enum WatcherError {
    /// Failed to initialize the watcher
    Init(String),
    /// Failed to watch a path
    Watch(String),
    /// IO error
    Io(std::io::Error),
    /// Channel error
    Channel(String),
}

impl fmt::Display for WatcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatcherError::Init(msg) => write!(f, "watcher initialization failed: {}", msg),
            WatcherError::Watch(msg) => write!(f, "watch failed: {}", msg),
            WatcherError::Io(e) => write!(f, "IO error: {}", e),
            WatcherError::Channel(msg) => write!(f, "channel error: {}", msg),
        }
    }
}

impl std::error::Error for WatcherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatcherError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WatcherError {
    fn from(e: std::io::Error) -> Self {
        WatcherError::Io(e)
    }
}

/// Kind of file event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File was created
    Create,
    /// A file was renamed onto this path. This is not a create: the content predates it
    MovedIn,
    /// File content or metadata changed
    Modify,
    /// File was removed/deleted
    Remove,
    /// File was renamed. Paths are `[from]` or `[from, to]`
    Rename,
    /// Catch-all for other events
    Other,
}

/// A file system event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// The kind of event
    pub kind: FileEventKind,
    /// The path(s) affected by the event
    pub paths: Vec<PathBuf>,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, paths: Vec<PathBuf>) -> Self {
        Self { kind, paths }
    }

    pub fn create(path: PathBuf) -> Self {
        Self::new(FileEventKind::Create, vec![path])
    }

    pub fn modify(path: PathBuf) -> Self {
        Self::new(FileEventKind::Modify, vec![path])
    }

    pub fn remove(path: PathBuf) -> Self {
        Self::new(FileEventKind::Remove, vec![path])
    }

    pub fn moved_in(path: PathBuf) -> Self {
        Self::new(FileEventKind::MovedIn, vec![path])
    }

    pub fn rename(from: PathBuf, to: PathBuf) -> Self {
        Self::new(FileEventKind::Rename, vec![from, to])
    }

    /// True when this event removes `path` from its current name.
    pub fn moves_away(&self, path: &Path) -> bool {
        match self.kind {
            FileEventKind::Remove => self.paths.iter().any(|p| p == path),
            FileEventKind::Rename => self.paths.first().is_some_and(|p| p == path),
            _ => false,
        }
    }
}

/// Trait for file system watchers.
pub trait FileWatcher {
    /// Add a path to watch. Directories are watched non-recursively.
    fn watch(&mut self, path: &Path) -> Result<(), WatcherError>;

    /// Return any pending events without blocking.
    fn try_recv(&mut self) -> Result<Vec<FileEvent>, WatcherError>;

    /// Receive events with a timeout.
    ///
    /// Blocks until events are available or the timeout expires.
    /// Returns an empty vector if the timeout expires with no events.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<FileEvent>, WatcherError>;

    /// Get the name of the watcher backend for logging.
    fn backend_name(&self) -> &'static str;
}
