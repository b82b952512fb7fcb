// SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::info;

use super::config::StartAt;

/// TailReader reads the lines appended to a single open file.
///
/// Only newline-terminated lines are delivered. A trailing partial line stays unread until the
/// writer completes it, unless it already exceeds the maximum line size: then its first
/// `max_line_size` bytes are delivered once and the rest of it is skipped up to the newline.
pub struct TailReader {
    /// Path the file was opened from
    path: PathBuf,
    /// Buffered reader over the open handle (kept open across renames)
    reader: BufReader<File>,
    /// Offset just past the last delivered line
    offset: u64,
    /// Maximum size of a single line in bytes
    max_line_size: usize,
    /// Inside an overlong line whose prefix was already delivered
    skipping: bool,
}

impl TailReader {
    pub fn open(path: impl AsRef<Path>, start_at: StartAt, max_line_size: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let offset = match start_at {
            StartAt::Beginning => 0,
            StartAt::End => file.metadata()?.len(),
        };

        Ok(Self {
            path,
            reader: BufReader::new(file),
            offset,
            max_line_size,
            skipping: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Deliver every complete line appended since the last call, in file order.
    ///
    /// `handle` returns `false` to stop early; undelivered lines are read on the next call.
    /// Returns the number of lines delivered.
    pub fn read_lines_into<F>(&mut self, mut handle: F) -> io::Result<usize>
    where
        F: FnMut(&str) -> bool,
    {
        let len = self.reader.get_ref().metadata()?.len();
        if len < self.offset {
            info!(
                path = %self.path.display(),
                previous_offset = self.offset,
                size = len,
                "File truncated, reading from the start"
            );
            self.offset = 0;
            self.skipping = false;
        }
        if len == self.offset {
            return Ok(0);
        }

        self.reader.seek(SeekFrom::Start(self.offset))?;

        let limit = self.max_line_size as u64 + 1;
        let mut delivered = 0;
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            let read = (&mut self.reader).take(limit).read_until(b'\n', &mut buf)?;
            if read == 0 {
                break;
            }
            let complete = buf.last() == Some(&b'\n');

            if self.skipping {
                self.offset += read as u64;
                self.skipping = !complete;
                continue;
            }
            if !complete && buf.len() <= self.max_line_size {
                break;
            }

            self.offset += read as u64;
            self.skipping = !complete;
            delivered += 1;

            let line = trim_line_ending(&buf);
            let line = &line[..line.len().min(self.max_line_size)];
            if !handle(&String::from_utf8_lossy(line)) {
                break;
            }
        }

        Ok(delivered)
    }
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}
