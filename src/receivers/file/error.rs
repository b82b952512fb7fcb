// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

use crate::receivers::file::watcher::WatcherError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("Cannot read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid keyword pattern '{pattern}': {source}")]
    Regex {
        pattern: String,
        source: regex::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
