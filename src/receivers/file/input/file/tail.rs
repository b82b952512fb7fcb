// SPDX-License-Identifier: Apache-2.0

//! Cancellable tail streams.
//!
//! A [`TailHandle`] owns one blocking read loop. The loop waits on a native notification
//! watch of the file (with a periodic fallback), reads appended lines with a [`TailReader`]
//! and hands each line to a caller-provided function on the same thread, so once
//! [`TailHandle::stop`] returns no further line of that file is processed.

use std::path::{Path, PathBuf};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::{StartAt, TailConfig};
use super::reader::TailReader;
use crate::receivers::file::error::Result;
use crate::receivers::file::watcher::{FileWatcher, NativeWatcher};

/// Why a tail loop ended on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailEnd {
    /// Stopped by its owner
    Stopped,
    /// The file was removed or renamed away and fully drained
    FileGone,
    /// Reading failed
    Failed,
}

pub struct TailHandle {
    path: PathBuf,
    cancel: CancellationToken,
    done: CancellationToken,
    task: JoinHandle<TailEnd>,
}

impl TailHandle {
    /// Open `path` and start following it. Opening errors are returned to the caller; errors
    /// after that end the stream and are logged.
    pub fn start<F>(path: &Path, start_at: StartAt, config: &TailConfig, on_line: F) -> Result<Self>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let reader = TailReader::open(path, start_at, config.max_line_size)?;

        let watcher = match NativeWatcher::new().and_then(|mut w| w.watch(path).map(|_| w)) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Unable to watch file, relying on periodic reads"
                );
                None
            }
        };

        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let tail_loop = TailLoop {
            reader,
            watcher,
            config: config.clone(),
            cancel: cancel.clone(),
            on_line,
        };
        let done_guard = done.clone().drop_guard();
        let task = tokio::task::spawn_blocking(move || {
            let _done = done_guard;
            tail_loop.run()
        });

        info!(path = %path.display(), start_at = ?start_at, "Started tailing file");

        Ok(Self {
            path: path.to_path_buf(),
            cancel,
            done,
            task,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Token cancelled once the read loop has exited, for whatever reason.
    pub fn finished(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Stop the stream and wait until the read loop has fully terminated.
    pub async fn stop(self) -> TailEnd {
        self.cancel.cancel();
        match self.task.await {
            Ok(end) => {
                debug!(path = %self.path.display(), end = ?end, "Stopped tailing file");
                end
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Tail task failed");
                TailEnd::Failed
            }
        }
    }
}

struct TailLoop<F> {
    reader: TailReader,
    watcher: Option<NativeWatcher>,
    config: TailConfig,
    cancel: CancellationToken,
    on_line: F,
}

impl<F> TailLoop<F>
where
    F: FnMut(&str),
{
    fn run(mut self) -> TailEnd {
        loop {
            if self.cancel.is_cancelled() {
                return TailEnd::Stopped;
            }

            if let Err(e) = self.drain() {
                warn!(path = %self.reader.path().display(), error = %e, "Failed reading file");
                return TailEnd::Failed;
            }

            if self.wait_for_change() {
                // The name is gone; whatever was appended before that is still readable.
                if self.cancel.is_cancelled() {
                    return TailEnd::Stopped;
                }
                return match self.drain() {
                    Ok(()) => {
                        info!(path = %self.reader.path().display(), "File removed, tail ended");
                        TailEnd::FileGone
                    }
                    Err(e) => {
                        warn!(path = %self.reader.path().display(), error = %e, "Failed reading file");
                        TailEnd::Failed
                    }
                };
            }
        }
    }

    fn drain(&mut self) -> std::io::Result<()> {
        let cancel = &self.cancel;
        let on_line = &mut self.on_line;
        self.reader.read_lines_into(|line| {
            if cancel.is_cancelled() {
                return false;
            }
            on_line(line);
            true
        })?;
        Ok(())
    }

    /// Block until the file changes or the poll interval passes. Returns true when the file
    /// was removed or renamed away.
    fn wait_for_change(&mut self) -> bool {
        let path = self.reader.path().to_path_buf();
        let moved = match self.watcher.as_mut() {
            Some(watcher) => match watcher.recv_timeout(self.config.poll_interval) {
                Ok(events) => events.iter().any(|e| e.moves_away(&path)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "File watch lost, relying on periodic reads");
                    self.watcher = None;
                    false
                }
            },
            None => {
                std::thread::sleep(self.config.poll_interval);
                false
            }
        };
        // An unlinked file that is still open only reports an attribute change.
        moved || !path.exists()
    }
}
