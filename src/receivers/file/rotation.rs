// SPDX-License-Identifier: Apache-2.0

//! Per-target rotation tracking.
//!
//! A [`TargetWatcher`] follows directory-level notifications for one target and decides which
//! physical file is tailed:
//!
//! - `NoFile -> Tailing(file)` when a qualifying file is found or appears
//! - `Tailing(a) -> Tailing(b)` when a qualifying `b` appears; `a` is stopped before `b` starts
//! - `Tailing(file) -> NoFile` when the tracked file is removed or renamed away, or its tail
//!   ends on its own
//!
//! Renames never count as creates. A file renamed onto the name being followed replaces it
//! and is read from its end; every other rename destination is ignored.
//!
//! The directory is never rescanned after startup; a target in `NoFile` waits for the next
//! qualifying create event.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::{Aggregator, MetricSettings};
use crate::receivers::file::error::Result;
use crate::receivers::file::input::{FileFinder, StartAt, TailConfig, TailHandle};
use crate::receivers::file::matcher::KeywordMatcher;
use crate::receivers::file::target::{TrackedFile, WatchTarget};
use crate::receivers::file::watcher::{FileEvent, FileEventKind, watch_directory};

enum TargetState {
    NoFile,
    Tailing(TailHandle),
}

pub struct TargetWatcher {
    target: Arc<WatchTarget>,
    matcher: KeywordMatcher,
    tail_config: TailConfig,
    state: TargetState,
    /// Name of the most recently attached file
    last_path: Option<PathBuf>,
}

impl TargetWatcher {
    pub fn new(
        target: Arc<WatchTarget>,
        settings: Arc<MetricSettings>,
        aggregator: Aggregator,
        tail_config: TailConfig,
    ) -> Self {
        let matcher = KeywordMatcher::new(target.clone(), settings, aggregator);
        Self {
            target,
            matcher,
            tail_config,
            state: TargetState::NoFile,
            last_path: None,
        }
    }

    /// Watch the target until `cancel` fires. Errors are returned only for setup failures;
    /// the tail handle is always stopped before returning.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut watcher = watch_directory(self.target.watch_dir())?;

        match FileFinder::for_target(&self.target).find_newest()? {
            Some(file) => {
                if let Err(e) = self.attach(&file.path, StartAt::End).await {
                    warn!(
                        target_id = %self.target.id(),
                        path = %file.path.display(),
                        error = %e,
                        "Unable to tail file, waiting for the next qualifying file"
                    );
                }
            }
            None => {
                info!(
                    target_id = %self.target.id(),
                    path = %self.target.path().display(),
                    prefix = self.target.prefix(),
                    suffix = self.target.suffix(),
                    "No qualifying file yet"
                );
            }
        }

        let result = loop {
            let tail_finished = self.tail_finished();
            select! {
                _ = cancel.cancelled() => {
                    debug!(target_id = %self.target.id(), "Target watcher cancelled");
                    break Ok(());
                }

                events = watcher.recv() => {
                    match events {
                        Ok(events) => {
                            for event in events {
                                if let Err(e) = self.handle_event(&event).await {
                                    warn!(
                                        target_id = %self.target.id(),
                                        event = ?event,
                                        error = %e,
                                        "Failed to process file event"
                                    );
                                }
                            }
                        }
                        Err(e) => {
                            error!(target_id = %self.target.id(), error = %e, "Directory watch failed");
                            break Err(e.into());
                        }
                    }
                }

                _ = wait_finished(tail_finished) => {
                    self.detach().await;
                }
            }
        };

        self.detach().await;
        result
    }

    async fn handle_event(&mut self, event: &FileEvent) -> Result<()> {
        match event.kind {
            FileEventKind::Create => {
                for path in &event.paths {
                    if self.target.qualifies(path) {
                        self.attach(path, StartAt::Beginning).await?;
                    }
                }
            }
            FileEventKind::MovedIn => {
                for path in &event.paths {
                    if self.replaces_followed(path) {
                        info!(
                            target_id = %self.target.id(),
                            path = %path.display(),
                            "Followed file replaced by rename"
                        );
                        self.attach(path, StartAt::End).await?;
                    }
                }
            }
            FileEventKind::Remove | FileEventKind::Rename => {
                if let Some(tracked) = self.tracked_path() {
                    if event.moves_away(&tracked) {
                        info!(
                            target_id = %self.target.id(),
                            path = %tracked.display(),
                            "Tracked file moved away"
                        );
                        self.detach().await;
                    }
                }
            }
            FileEventKind::Modify | FileEventKind::Other => {}
        }
        Ok(())
    }

    /// A renamed-in file is only followed when it takes the place of the file this target
    /// follows; any other destination, such as a dated archive, is ignored.
    fn replaces_followed(&self, path: &Path) -> bool {
        if !self.target.qualifies(path) {
            return false;
        }
        self.target.path_is_file() || self.last_path.as_deref() == Some(path)
    }

    /// Switch to `path`, stopping the current tail first.
    async fn attach(&mut self, path: &Path, start_at: StartAt) -> Result<()> {
        let metadata = fs::metadata(path)?;
        if metadata.is_dir() {
            return Ok(());
        }

        self.detach().await;

        let matcher = self.matcher.clone();
        let handle = TailHandle::start(path, start_at, &self.tail_config, move |line| {
            matcher.process_line(line)
        })?;

        let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
        self.target
            .set_current_file(Some(TrackedFile::new(path.to_path_buf(), modified)));
        self.state = TargetState::Tailing(handle);
        self.last_path = Some(path.to_path_buf());

        info!(
            target_id = %self.target.id(),
            path = %path.display(),
            start_at = ?start_at,
            "Tracking file"
        );
        Ok(())
    }

    async fn detach(&mut self) {
        if let TargetState::Tailing(handle) = std::mem::replace(&mut self.state, TargetState::NoFile)
        {
            let path = handle.path().to_path_buf();
            let end = handle.stop().await;
            self.target.set_current_file(None);
            debug!(
                target_id = %self.target.id(),
                path = %path.display(),
                end = ?end,
                "Stopped tracking file"
            );
        }
    }

    fn tracked_path(&self) -> Option<PathBuf> {
        match &self.state {
            TargetState::Tailing(handle) => Some(handle.path().to_path_buf()),
            TargetState::NoFile => None,
        }
    }

    fn tail_finished(&self) -> Option<CancellationToken> {
        match &self.state {
            TargetState::Tailing(handle) => Some(handle.finished()),
            TargetState::NoFile => None,
        }
    }
}

async fn wait_finished(token: Option<CancellationToken>) {
    match token {
        Some(token) => token.cancelled_owned().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::CounterKey;
    use crate::receivers::file::target::KeywordRule;
    use std::fs::{File, OpenOptions};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::task::JoinHandle;

    struct Harness {
        target: Arc<WatchTarget>,
        aggregator: Aggregator,
        cancel: CancellationToken,
        task: JoinHandle<Result<()>>,
    }

    impl Harness {
        fn start(path: PathBuf, path_is_file: bool) -> Self {
            let target = Arc::new(WatchTarget::new(
                path,
                "app.".to_string(),
                ".log".to_string(),
                path_is_file,
                vec![KeywordRule::new("ERROR", "err").unwrap()],
            ));
            let settings = Arc::new(MetricSettings {
                metric: "log.console".to_string(),
                endpoint: "host-a".to_string(),
                step: 30,
            });
            let aggregator = Aggregator::new();
            let tail_config = TailConfig {
                poll_interval: Duration::from_millis(20),
                ..Default::default()
            };
            let cancel = CancellationToken::new();
            let watcher =
                TargetWatcher::new(target.clone(), settings, aggregator.clone(), tail_config);
            let task = tokio::spawn(watcher.run(cancel.clone()));
            Self {
                target,
                aggregator,
                cancel,
                task,
            }
        }

        fn errors(&self) -> f64 {
            let key = CounterKey::new(&self.target, &self.target.rules()[0]);
            self.aggregator.get(&key).map(|e| e.value).unwrap_or(0.0)
        }

        fn current(&self) -> Option<PathBuf> {
            self.target.current_file().map(|f| f.path)
        }

        async fn wait_until<F: Fn(&Self) -> bool>(&self, what: &str, cond: F) {
            for _ in 0..250 {
                if cond(self) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            panic!("timed out waiting for {}", what);
        }

        async fn stop(self) -> Result<()> {
            self.cancel.cancel();
            self.task.await.unwrap()
        }
    }

    fn append(path: &Path, content: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    #[tokio::test]
    async fn test_attaches_newest_file_at_end() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("app.1.log");
        let newest = dir.path().join("app.2.log");
        append(&old, "ERROR old\n");
        append(&newest, "ERROR history\n");
        File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();

        let harness = Harness::start(dir.path().to_path_buf(), false);
        harness
            .wait_until("initial attach", |h| h.current() == Some(newest.clone()))
            .await;

        append(&newest, "ERROR fresh\nINFO fine\n");
        harness.wait_until("fresh line", |h| h.errors() == 1.0).await;

        assert!(harness.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_rotates_to_created_file_and_ignores_old_one() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("app.2023-01-01.log");
        let new = dir.path().join("app.2023-01-02.log");
        append(&old, "");

        let harness = Harness::start(dir.path().to_path_buf(), false);
        harness
            .wait_until("initial attach", |h| h.current() == Some(old.clone()))
            .await;

        append(&new, "ERROR first line of new file\n");
        harness
            .wait_until("rotation", |h| h.current() == Some(new.clone()))
            .await;
        harness.wait_until("new file line", |h| h.errors() == 1.0).await;

        append(&old, "ERROR late write to rotated file\n");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(harness.errors(), 1.0);

        assert!(harness.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_ignores_non_qualifying_files() {
        let dir = TempDir::new().unwrap();
        let tracked = dir.path().join("app.log");
        append(&tracked, "");

        let harness = Harness::start(dir.path().to_path_buf(), false);
        harness
            .wait_until("initial attach", |h| h.current() == Some(tracked.clone()))
            .await;

        append(&dir.path().join("db.log"), "ERROR elsewhere\n");
        append(&dir.path().join("app.txt"), "ERROR elsewhere\n");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(harness.current(), Some(tracked));
        assert_eq!(harness.errors(), 0.0);
        assert!(harness.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_file_target_reattaches_after_recreate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("service.out");
        append(&path, "");

        let harness = Harness::start(path.clone(), true);
        harness
            .wait_until("initial attach", |h| h.current() == Some(path.clone()))
            .await;

        fs::remove_file(&path).unwrap();
        harness.wait_until("detach", |h| h.current().is_none()).await;

        append(&path, "ERROR after recreate\n");
        harness
            .wait_until("reattach", |h| h.current() == Some(path.clone()))
            .await;
        harness.wait_until("recreated line", |h| h.errors() == 1.0).await;

        assert!(harness.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_rename_away_moves_to_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let harness = Harness::start(dir.path().to_path_buf(), false);
        harness
            .wait_until("initial attach", |h| h.current() == Some(path.clone()))
            .await;

        fs::rename(&path, dir.path().join("archived.old")).unwrap();
        harness.wait_until("detach", |h| h.current().is_none()).await;

        assert!(harness.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_rename_to_qualifying_archive_is_not_recounted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let archive = dir.path().join("app.2023-01-01.log");
        append(&path, "");

        let harness = Harness::start(dir.path().to_path_buf(), false);
        harness
            .wait_until("initial attach", |h| h.current() == Some(path.clone()))
            .await;

        append(&path, "ERROR a\nERROR b\n");
        harness.wait_until("two lines", |h| h.errors() == 2.0).await;

        fs::rename(&path, &archive).unwrap();
        harness.wait_until("detach", |h| h.current().is_none()).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(harness.errors(), 2.0);
        assert!(harness.current().is_none());

        append(&archive, "ERROR late write to archive\n");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(harness.errors(), 2.0);

        append(&path, "ERROR first line of new file\n");
        harness
            .wait_until("attach to new file", |h| h.current() == Some(path.clone()))
            .await;
        harness.wait_until("new file line", |h| h.errors() == 3.0).await;

        assert!(harness.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_rename_onto_tracked_file_reads_replacement_from_end() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let staged = dir.path().join("staged.tmp");
        append(&path, "");

        let harness = Harness::start(dir.path().to_path_buf(), false);
        harness
            .wait_until("initial attach", |h| h.current() == Some(path.clone()))
            .await;

        let mut replaced = OpenOptions::new().append(true).open(&path).unwrap();
        append(&staged, "ERROR staged history\n");
        fs::rename(&staged, &path).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        append(&path, "ERROR fresh\n");
        harness.wait_until("fresh line", |h| h.errors() == 1.0).await;

        replaced.write_all(b"ERROR write to replaced inode\n").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(harness.errors(), 1.0);
        assert_eq!(harness.current(), Some(path));

        assert!(harness.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_file_moved_into_directory_is_ignored() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let tracked = dir.path().join("app.1.log");
        append(&tracked, "");

        let harness = Harness::start(dir.path().to_path_buf(), false);
        harness
            .wait_until("initial attach", |h| h.current() == Some(tracked.clone()))
            .await;

        let source = outside.path().join("app.2.log");
        append(&source, "ERROR moved history\n");
        fs::rename(&source, dir.path().join("app.2.log")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(harness.current(), Some(tracked.clone()));
        assert_eq!(harness.errors(), 0.0);

        append(&tracked, "ERROR still tracked\n");
        harness.wait_until("tracked line", |h| h.errors() == 1.0).await;

        assert!(harness.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_copied_in_file_is_counted_once() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let old = dir.path().join("app.1.log");
        let copied = dir.path().join("app.2.log");
        append(&old, "");

        let harness = Harness::start(dir.path().to_path_buf(), false);
        harness
            .wait_until("initial attach", |h| h.current() == Some(old.clone()))
            .await;

        let source = outside.path().join("app.2.log");
        append(&source, "ERROR one\nINFO two\nERROR three\n");
        fs::copy(&source, &copied).unwrap();

        harness
            .wait_until("rotation", |h| h.current() == Some(copied.clone()))
            .await;
        harness.wait_until("copied lines", |h| h.errors() == 2.0).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(harness.errors(), 2.0);

        append(&old, "ERROR late write to old file\n");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(harness.errors(), 2.0);

        assert!(harness.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_file_target_follows_rename_into_place_from_end() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("service.out");
        let staged = dir.path().join("service.out.tmp");

        let harness = Harness::start(path.clone(), true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(harness.current().is_none());

        append(&staged, "ERROR staged history\n");
        fs::rename(&staged, &path).unwrap();
        harness
            .wait_until("attach", |h| h.current() == Some(path.clone()))
            .await;

        append(&path, "ERROR after rename\n");
        harness.wait_until("appended line", |h| h.errors() == 1.0).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(harness.errors(), 1.0);

        assert!(harness.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_directory_waits_for_create() {
        let dir = TempDir::new().unwrap();

        let harness = Harness::start(dir.path().to_path_buf(), false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(harness.current().is_none());

        let path = dir.path().join("app.log");
        append(&path, "ERROR on create\n");
        harness
            .wait_until("attach", |h| h.current() == Some(path.clone()))
            .await;
        harness.wait_until("line", |h| h.errors() == 1.0).await;

        assert!(harness.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_directory_is_fatal() {
        let dir = TempDir::new().unwrap();
        let harness = Harness::start(dir.path().join("missing"), false);

        let result = tokio::time::timeout(Duration::from_secs(5), harness.task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
    }
}
