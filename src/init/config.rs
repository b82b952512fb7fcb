// SPDX-License-Identifier: Apache-2.0

//! Configuration snapshots.
//!
//! The JSON configuration file is merged with `LOGDOG_*` environment overrides through figment,
//! validated, and turned into an immutable [`AgentConfig`]. A reload builds a new snapshot from
//! scratch; running snapshots are never modified.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Json};
use gethostname::gethostname;
use http::Uri;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::aggregator::MetricSettings;
use crate::exporters::falcon::FlushConfig;
use crate::receivers::file::{self, KeywordRule, TargetRegistry, WatchTarget};

pub const DEFAULT_SUFFIX: &str = ".log";

const ENV_PREFIX: &str = "LOGDOG_";

/// Scalar settings that `LOGDOG_<NAME>` environment variables may override.
const ENV_OVERRIDES: [&str; 4] = ["metric", "host", "timer", "agent"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file {} not found", .0.display())]
    Missing(PathBuf),

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid keyword for {path}: {source}")]
    Rule {
        path: String,
        #[source]
        source: file::Error,
    },

    #[error("unable to resolve path {path}: {source}")]
    Path {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration file as written by operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub metric: String,
    /// Push interval in seconds
    #[serde(default)]
    pub timer: u64,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub files: Vec<FileConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default)]
    pub keywords: Vec<KeywordConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeywordConfig {
    #[serde(default)]
    pub exp: String,
    #[serde(default)]
    pub tag: String,
}

impl ConfigFile {
    /// Read `path` and apply `LOGDOG_*` environment overrides. A missing file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env_prefix(path, ENV_PREFIX)
    }

    fn load_with_env_prefix(path: &Path, env_prefix: &str) -> Result<Self, ConfigError> {
        match fs::metadata(path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ConfigError::Path {
                    path: path.display().to_string(),
                    source,
                });
            }
        }

        Figment::new()
            .merge(Json::file(path))
            .merge(Env::prefixed(env_prefix).only(&ENV_OVERRIDES))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }
}

/// A validated configuration snapshot.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub source: ConfigFile,
    pub agent: Uri,
    pub interval: Duration,
    pub settings: Arc<MetricSettings>,
    pub registry: Arc<TargetRegistry>,
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_config_file(ConfigFile::load(path)?)
    }

    pub fn from_config_file(source: ConfigFile) -> Result<Self, ConfigError> {
        let metric = source.metric.trim().to_string();
        if metric.is_empty() {
            return Err(ConfigError::Invalid("metric must not be empty".to_string()));
        }
        if source.timer == 0 {
            return Err(ConfigError::Invalid(
                "timer must be a positive number of seconds".to_string(),
            ));
        }

        let agent = parse_agent_uri(&source.agent)?;

        let mut host = source.host.trim().to_string();
        if host.is_empty() {
            host = gethostname().into_string().map_err(|_| {
                ConfigError::Invalid("host is empty and the hostname is not valid UTF-8".into())
            })?;
            info!(host = %host, "No host configured, using the system hostname");
        }

        if source.files.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one file entry is required".to_string(),
            ));
        }

        let mut targets = Vec::with_capacity(source.files.len());
        for (idx, file) in source.files.iter().enumerate() {
            if let Some(target) = build_target(idx, file)? {
                targets.push(target);
            }
        }

        let settings = MetricSettings {
            metric,
            endpoint: host,
            step: source.timer,
        };

        Ok(Self {
            agent,
            interval: Duration::from_secs(source.timer),
            settings: Arc::new(settings),
            registry: Arc::new(TargetRegistry::new(targets)),
            source,
        })
    }

    pub fn flush_config(&self) -> FlushConfig {
        FlushConfig {
            settings: self.settings.clone(),
            registry: self.registry.clone(),
            agent: self.agent.clone(),
            interval: self.interval,
        }
    }
}

fn parse_agent_uri(agent: &str) -> Result<Uri, ConfigError> {
    let uri: Uri = agent
        .trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("agent \"{}\" is not a valid URL: {}", agent, e)))?;

    match uri.scheme_str() {
        Some("http") | Some("https") if uri.authority().is_some() => Ok(uri),
        _ => Err(ConfigError::Invalid(format!(
            "agent \"{}\" must be an absolute http or https URL",
            agent
        ))),
    }
}

/// Build the target for one file entry. Returns `None` when the path cannot be stat'ed; that
/// target is disabled and the rest of the configuration still loads.
fn build_target(idx: usize, file: &FileConfig) -> Result<Option<WatchTarget>, ConfigError> {
    let raw_path = file.path.trim();
    if raw_path.is_empty() {
        return Err(ConfigError::Invalid(format!("files[{}] has no path", idx)));
    }

    let prefix = file.prefix.trim().to_string();
    let mut suffix = file.suffix.trim().to_string();
    if suffix.is_empty() {
        info!(path = raw_path, suffix = DEFAULT_SUFFIX, "No suffix configured, using default");
        suffix = DEFAULT_SUFFIX.to_string();
    }

    if file.keywords.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "files[{}] ({}) has no keywords",
            idx, raw_path
        )));
    }

    let mut rules = Vec::with_capacity(file.keywords.len());
    let mut keys = HashSet::new();
    for keyword in &file.keywords {
        let exp = keyword.exp.trim();
        let tag = keyword.tag.trim();
        if exp.is_empty() || tag.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "files[{}] ({}) has a keyword without exp or tag",
                idx, raw_path
            )));
        }
        let rule = KeywordRule::new(exp, tag).map_err(|source| ConfigError::Rule {
            path: raw_path.to_string(),
            source,
        })?;
        if !keys.insert(rule.key()) {
            return Err(ConfigError::Invalid(format!(
                "files[{}] ({}) has duplicate keyword {}",
                idx,
                raw_path,
                rule.key()
            )));
        }
        rules.push(rule);
    }

    let path = std::path::absolute(raw_path).map_err(|source| ConfigError::Path {
        path: raw_path.to_string(),
        source,
    })?;

    let metadata = match fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(e) => {
            error!(
                path = %path.display(),
                error = %e,
                "Unable to stat configured path, target disabled"
            );
            return Ok(None);
        }
    };

    Ok(Some(WatchTarget::new(
        path,
        prefix,
        suffix,
        !metadata.is_dir(),
        rules,
    )))
}
