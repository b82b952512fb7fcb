// SPDX-License-Identifier: Apache-2.0

//! Watch targets and their keyword rules.
//!
//! A [`WatchTarget`] is immutable once built, except for the pointer to the file
//! currently being tailed, which the rotation state machine updates.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::SystemTime;

use regex::Regex;

use crate::receivers::file::error::{Error, Result};

/// Keyword expression that counts every line.
pub const MATCH_ALL_EXP: &str = "*";

const MATCH_ALL_KEY: &str = "all";

static NON_WORD_RUNS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\W+").unwrap()
});

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a target. Never reused, including across config reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    fn next() -> Self {
        Self(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target-{}", self.0)
    }
}

#[derive(Debug, Clone)]
enum Pattern {
    MatchAll,
    Regex(Regex),
}

/// One keyword rule: a pattern and the tag its counter is reported under.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pattern: Pattern,
    tag: String,
    normalized: String,
}

impl KeywordRule {
    pub fn new(exp: &str, tag: &str) -> Result<Self> {
        let pattern = if exp == MATCH_ALL_EXP {
            Pattern::MatchAll
        } else {
            let regex = Regex::new(exp).map_err(|source| Error::Regex {
                pattern: exp.to_string(),
                source,
            })?;
            Pattern::Regex(regex)
        };

        Ok(Self {
            pattern,
            tag: tag.to_string(),
            normalized: normalize_pattern(exp),
        })
    }

    /// Stable identity of the rule within its target, also its segment of the tag string.
    pub fn key(&self) -> String {
        format!("{}={}", self.tag, self.normalized)
    }

    /// 1.0 when the line counts as a hit, otherwise 0.0. A line hits at most once.
    pub fn evaluate(&self, line: &str) -> f64 {
        match &self.pattern {
            Pattern::MatchAll => 1.0,
            Pattern::Regex(regex) if regex.is_match(line) => 1.0,
            Pattern::Regex(_) => 0.0,
        }
    }
}

/// Collapses every run of non-word characters into a single `.`.
pub fn normalize_pattern(exp: &str) -> String {
    if exp == MATCH_ALL_EXP {
        return MATCH_ALL_KEY.to_string();
    }
    NON_WORD_RUNS.replace_all(exp, ".").into_owned()
}

/// The physical file a target currently follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl TrackedFile {
    pub fn new(path: PathBuf, modified: SystemTime) -> Self {
        Self { path, modified }
    }

    /// Stat `path`, falling back to "now" when the platform has no modification time.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
        Ok(Self::new(path.to_path_buf(), modified))
    }
}

#[derive(Debug)]
pub struct WatchTarget {
    id: TargetId,
    path: PathBuf,
    prefix: String,
    suffix: String,
    path_is_file: bool,
    rules: Vec<KeywordRule>,
    current: Mutex<Option<TrackedFile>>,
}

impl WatchTarget {
    pub fn new(
        path: PathBuf,
        prefix: String,
        suffix: String,
        path_is_file: bool,
        rules: Vec<KeywordRule>,
    ) -> Self {
        Self {
            id: TargetId::next(),
            path,
            prefix,
            suffix,
            path_is_file,
            rules,
            current: Mutex::new(None),
        }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn path_is_file(&self) -> bool {
        self.path_is_file
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    /// Directory whose change notifications drive this target.
    pub fn watch_dir(&self) -> &Path {
        if !self.path_is_file {
            return &self.path;
        }
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Whether `path` names a file this target would follow.
    ///
    /// For file targets that is the configured path itself. For directory targets it is any
    /// direct child whose base name starts with the prefix and whose path ends with the suffix.
    pub fn qualifies(&self, path: &Path) -> bool {
        if self.path_is_file {
            return path == self.path;
        }
        if path.parent() != Some(self.path.as_path()) {
            return false;
        }
        self.name_matches(path)
    }

    fn name_matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.starts_with(&self.prefix) && path.to_string_lossy().ends_with(&self.suffix)
    }

    /// Tag string reported with a rule's counter.
    pub fn tags_for(&self, rule: &KeywordRule) -> String {
        format!(
            "prefix={},suffix={},{}",
            self.prefix,
            self.suffix,
            rule.key()
        )
    }

    pub fn current_file(&self) -> Option<TrackedFile> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_current_file(&self, file: Option<TrackedFile>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = file;
    }
}

/// All targets of one configuration snapshot.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: Vec<Arc<WatchTarget>>,
}

impl TargetRegistry {
    pub fn new(targets: Vec<WatchTarget>) -> Self {
        Self {
            targets: targets.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn targets(&self) -> &[Arc<WatchTarget>] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_target(rules: Vec<KeywordRule>) -> WatchTarget {
        WatchTarget::new(
            PathBuf::from("/var/log/app"),
            "app.".to_string(),
            ".log".to_string(),
            false,
            rules,
        )
    }

    #[test]
    fn test_rule_evaluates_line_level_hit() {
        let rule = KeywordRule::new("ERROR", "err").unwrap();

        assert_eq!(rule.evaluate("14:46:49 ERROR something failed"), 1.0);
        assert_eq!(rule.evaluate("14:46:49 INFO ok"), 0.0);
        // Several occurrences on one line still count once.
        assert_eq!(rule.evaluate("ERROR ERROR ERROR"), 1.0);
    }

    #[test]
    fn test_match_all_counts_every_line() {
        let rule = KeywordRule::new(MATCH_ALL_EXP, "lines").unwrap();

        assert!(matches!(rule.pattern, Pattern::MatchAll));
        assert_eq!(rule.evaluate(""), 1.0);
        assert_eq!(rule.evaluate("anything at all"), 1.0);
        assert_eq!(rule.key(), "lines=all");
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let err = KeywordRule::new("(unclosed", "bad").unwrap_err();
        assert!(matches!(err, Error::Regex { .. }));
    }

    #[test]
    fn test_normalize_pattern() {
        assert_eq!(normalize_pattern("ERROR"), "ERROR");
        assert_eq!(normalize_pattern("error|fail"), "error.fail");
        assert_eq!(normalize_pattern("Exception: [a-z]+ (.*)"), "Exception.a.z.");
        assert_eq!(normalize_pattern("\\d{3} ms"), ".d.3.ms");
    }

    #[test]
    fn test_tags_for_rule() {
        let rule = KeywordRule::new("ERROR|FATAL", "err").unwrap();
        let target = dir_target(vec![rule.clone()]);

        assert_eq!(
            target.tags_for(&rule),
            "prefix=app.,suffix=.log,err=ERROR.FATAL"
        );
    }

    #[test]
    fn test_directory_target_qualifies_children_only() {
        let target = dir_target(vec![]);

        assert!(target.qualifies(Path::new("/var/log/app/app.2023-01-02.log")));
        assert!(!target.qualifies(Path::new("/var/log/app/other.log")));
        assert!(!target.qualifies(Path::new("/var/log/app/app.2023-01-02.log.gz")));
        assert!(!target.qualifies(Path::new("/var/log/app/nested/app.1.log")));
        assert!(!target.qualifies(Path::new("/var/log/other/app.1.log")));
    }

    #[test]
    fn test_file_target_qualifies_exact_path() {
        let target = WatchTarget::new(
            PathBuf::from("/var/log/app.log"),
            String::new(),
            ".log".to_string(),
            true,
            vec![],
        );

        assert_eq!(target.watch_dir(), Path::new("/var/log"));
        assert!(target.qualifies(Path::new("/var/log/app.log")));
        assert!(!target.qualifies(Path::new("/var/log/app.log.1")));
        assert!(!target.qualifies(Path::new("/var/log/db.log")));
    }

    #[test]
    fn test_target_ids_are_unique() {
        let a = dir_target(vec![]);
        let b = dir_target(vec![]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_current_file_pointer() {
        let target = dir_target(vec![]);
        assert!(target.current_file().is_none());

        let file = TrackedFile::new(
            PathBuf::from("/var/log/app/app.1.log"),
            SystemTime::UNIX_EPOCH,
        );
        target.set_current_file(Some(file.clone()));
        assert_eq!(target.current_file(), Some(file));

        target.set_current_file(None);
        assert!(target.current_file().is_none());
    }

    #[test]
    fn test_registry_assigns_distinct_ids() {
        let registry = TargetRegistry::new(vec![dir_target(vec![]), dir_target(vec![])]);

        assert_eq!(registry.len(), 2);
        assert!(registry.targets()[0].id() < registry.targets()[1].id());
    }
}
