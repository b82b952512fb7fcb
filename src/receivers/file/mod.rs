// SPDX-License-Identifier: Apache-2.0

//! File receiver for counting keyword matches in rotating log files.
//!
//! Each configured target follows one physical file at a time: the newest file in a directory
//! whose name matches a prefix and suffix, or a single configured file. Lines appended to it
//! are matched against the target's keyword rules and counted in the shared aggregator.
//!
//! Features:
//! - Event-driven rotation tracking from directory notifications
//! - Copy-truncate detection in the tail reader
//! - Match-all line counting and regex keyword rules

pub mod error;
pub mod input;
pub mod matcher;
pub mod receiver;
pub mod rotation;
pub mod target;
pub mod watcher;

pub use error::{Error, Result};
pub use input::{FileFinder, StartAt, TailConfig, TailHandle};
pub use matcher::KeywordMatcher;
pub use receiver::FileReceiver;
pub use rotation::TargetWatcher;
pub use target::{KeywordRule, TargetId, TargetRegistry, TrackedFile, WatchTarget};
pub use watcher::{FileEvent, FileEventKind, FileWatcher, NativeWatcher};
