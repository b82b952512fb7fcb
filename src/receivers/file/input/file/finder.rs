// SPDX-License-Identifier: Apache-2.0

use std::cmp::Ordering;
use std::fs;
use std::time::SystemTime;

use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::target::{TrackedFile, WatchTarget};

/// FileFinder resolves which file a target should currently follow.
///
/// Directory targets scan their direct children only and keep the entries the target
/// [qualifies](WatchTarget::qualifies). The most recently modified wins; equal modification
/// times are broken by the lexicographically greatest file name.
#[derive(Debug, Clone, Copy)]
pub struct FileFinder<'a> {
    target: &'a WatchTarget,
}

impl<'a> FileFinder<'a> {
    pub fn for_target(target: &'a WatchTarget) -> Self {
        Self { target }
    }

    /// All qualifying files, in no particular order.
    pub fn find_files(&self) -> Result<Vec<TrackedFile>> {
        let path = self.target.path();
        if self.target.path_is_file() {
            return match TrackedFile::from_path(path) {
                Ok(file) => Ok(vec![file]),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(vec![]),
                Err(e) => Err(e.into()),
            };
        }

        let entries = fs::read_dir(path).map_err(|source| Error::ReadDir {
            path: path.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            // Entries can vanish between listing and stat; skip them.
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if !self.target.qualifies(&path) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.is_dir() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push(TrackedFile::new(path, modified));
        }

        Ok(files)
    }

    /// The file to follow, or `None` when nothing qualifies yet.
    pub fn find_newest(&self) -> Result<Option<TrackedFile>> {
        let files = self.find_files()?;
        Ok(files.into_iter().max_by(newest_first))
    }
}

fn newest_first(a: &TrackedFile, b: &TrackedFile) -> Ordering {
    a.modified
        .cmp(&b.modified)
        .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
}
