// SPDX-License-Identifier: Apache-2.0

//! File system watcher abstractions for the file receiver.
//!
//! Only native OS notifications are used (inotify on Linux, FSEvents on macOS,
//! ReadDirectoryChangesW on Windows). Rotation is detected from directory-level
//! create/remove/rename events rather than by rescanning directories.

mod native;
mod traits;

pub use native::NativeWatcher;
pub use traits::{FileEvent, FileEventKind, FileWatcher, WatcherError};

use std::path::Path;

/// Create a native watcher already subscribed to `directory`.
pub fn watch_directory(directory: &Path) -> Result<NativeWatcher, WatcherError> {
    let mut watcher = NativeWatcher::new()?;
    watcher.watch(directory)?;
    tracing::debug!(
        backend = watcher.backend_name(),
        directory = %directory.display(),
        "Watching directory"
    );
    Ok(watcher)
}
