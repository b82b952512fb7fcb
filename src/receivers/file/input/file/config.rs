// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Where to start reading when a file is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartAt {
    /// Start reading from the beginning of the file
    Beginning,
    /// Start reading from the end of the file (only new content)
    #[default]
    End,
}

/// Configuration for tail streams
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// How long a tail stream waits for a change notification before checking the file anyway
    pub poll_interval: Duration,
    /// Maximum size of a single line in bytes, longer lines are truncated
    pub max_line_size: usize,
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_max_line_size() -> usize {
    1024 * 1024 // 1MB
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_line_size: default_max_line_size(),
        }
    }
}

impl TailConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval.is_zero() {
            return Err("tail poll interval must be positive".to_string());
        }

        if self.max_line_size == 0 {
            return Err("max_line_size must be positive".to_string());
        }

        Ok(())
    }
}
