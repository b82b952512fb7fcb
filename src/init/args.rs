// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::exporters::falcon::default_max_in_flight;
use crate::receivers::file::TailConfig;

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Configuration file
    #[arg(long, env = "LOGDOG_CONFIG", default_value = "cfg.json")]
    pub config: PathBuf,

    /// Reload the configuration when the file changes
    #[arg(long, env = "LOGDOG_WATCH_CONFIG", default_value = "true", action = ArgAction::Set)]
    pub watch_config: bool,

    /// How long a tail stream waits for a change notification before reading anyway
    #[arg(long, env = "LOGDOG_TAIL_POLL_INTERVAL_MS", default_value = "250")]
    pub tail_poll_interval_ms: u64,

    /// Maximum line size in bytes, longer lines are truncated before matching
    #[arg(long, env = "LOGDOG_MAX_LINE_SIZE", default_value = "1048576")]
    pub max_line_size: usize,

    /// Maximum concurrent pushes to the agent (default: twice the available parallelism)
    #[arg(long, env = "LOGDOG_MAX_IN_FLIGHT_PUSHES")]
    pub max_in_flight_pushes: Option<usize>,

    /// Push request timeout
    #[arg(long, env = "LOGDOG_PUSH_TIMEOUT_MS", default_value = "10000")]
    pub push_timeout_ms: u64,
}

impl AgentRun {
    pub fn tail_config(&self) -> TailConfig {
        TailConfig {
            poll_interval: Duration::from_millis(self.tail_poll_interval_ms),
            max_line_size: self.max_line_size,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight_pushes
            .unwrap_or_else(default_max_in_flight)
            .max(1)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}

impl Default for AgentRun {
    fn default() -> Self {
        AgentRun {
            config: PathBuf::from("cfg.json"),
            watch_config: true,
            tail_poll_interval_ms: 250,
            max_line_size: 1024 * 1024,
            max_in_flight_pushes: None,
            push_timeout_ms: 10_000,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

/// Map a level name to a filter. Besides the tracing names this accepts the names used by
/// older deployments (`FINEST`, `FINE`, `WARNING`, `FATAL`, `CRITICAL`); unknown names fall
/// back to info.
pub fn parse_log_level(level: &str) -> LevelFilter {
    match level.trim().to_ascii_uppercase().as_str() {
        "FINEST" | "FINE" | "TRACE" => LevelFilter::TRACE,
        "DEBUG" => LevelFilter::DEBUG,
        "INFO" => LevelFilter::INFO,
        "WARN" | "WARNING" => LevelFilter::WARN,
        "ERROR" | "FATAL" | "CRITICAL" => LevelFilter::ERROR,
        "OFF" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}
