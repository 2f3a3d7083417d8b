// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use usertally_core::store::NodePath;

/// Tracker settings.
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration:
///
/// ```
/// use usertally::TrackerConfig;
///
/// let config = TrackerConfig::from_toml_str("scheduler_interval_minutes = 5").unwrap();
/// assert_eq!(config.scheduler_interval_minutes, 5);
/// assert!(config.enabled);
/// assert_eq!(config.root_path, "/var/analytics/user-tracking");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Minutes between rollup ticks
    pub scheduler_interval_minutes: u32,
    /// When false, [`Tracker::start`](crate::Tracker::start) schedules nothing
    pub enabled: bool,
    /// Window tree path holding the `instances` and `cluster` scopes
    pub root_path: String,
    /// Upper bound on any single window store operation, in seconds
    pub store_timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            scheduler_interval_minutes: 1,
            enabled: true,
            root_path: "/var/analytics/user-tracking".to_owned(),
            store_timeout_secs: 30,
        }
    }
}

impl TrackerConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks the values serde cannot: a non-zero interval and timeout and an
    /// absolute root path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler_interval_minutes == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.store_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        self.root()?;
        Ok(())
    }

    /// The parsed root path
    pub fn root(&self) -> Result<NodePath, ConfigError> {
        NodePath::parse(&self.root_path)
            .map_err(|_| ConfigError::InvalidRootPath(self.root_path.clone()))
    }

    /// [`TrackerConfig::scheduler_interval_minutes`] as a duration
    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.scheduler_interval_minutes) * 60)
    }

    /// [`TrackerConfig::store_timeout_secs`] as a duration
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

/// Why a configuration was rejected.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read
    Io(io::Error),
    /// The document is not valid TOML or has unknown or mistyped keys
    Parse(toml::de::Error),
    /// `scheduler_interval_minutes` is zero
    ZeroInterval,
    /// `store_timeout_secs` is zero
    ZeroTimeout,
    /// `root_path` is not an absolute path
    InvalidRootPath(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "reading configuration: {err}"),
            Self::Parse(err) => write!(f, "parsing configuration: {err}"),
            Self::ZeroInterval => f.write_str("scheduler_interval_minutes must be at least 1"),
            Self::ZeroTimeout => f.write_str("store_timeout_secs must be at least 1"),
            Self::InvalidRootPath(path) => write!(f, "root_path `{path}` is not an absolute path"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert2::check;
    use rstest::rstest;

    use super::{ConfigError, TrackerConfig};

    #[test]
    fn empty_document_is_the_default() {
        let config = TrackerConfig::from_toml_str("").unwrap();
        check!(config == TrackerConfig::default());
        check!(config.scheduler_interval() == Duration::from_secs(60));
        check!(config.store_timeout() == Duration::from_secs(30));
    }

    #[test]
    fn every_field_can_be_set() {
        let config = TrackerConfig::from_toml_str(
            r#"
            scheduler_interval_minutes = 15
            enabled = false
            root_path = "/tmp/tracking"
            store_timeout_secs = 5
            "#,
        )
        .unwrap();
        check!(config.scheduler_interval_minutes == 15);
        check!(!config.enabled);
        check!(config.root().unwrap().as_str() == "/tmp/tracking");
        check!(config.store_timeout() == Duration::from_secs(5));
    }

    #[rstest]
    #[case::zero_interval("scheduler_interval_minutes = 0")]
    #[case::zero_timeout("store_timeout_secs = 0")]
    #[case::relative_root(r#"root_path = "var/tracking""#)]
    #[case::empty_root(r#"root_path = """#)]
    #[case::unknown_key("interval = 1")]
    #[case::wrong_type(r#"enabled = "yes""#)]
    fn rejected(#[case] toml: &str) {
        check!(TrackerConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn unknown_keys_are_parse_errors() {
        let err = TrackerConfig::from_toml_str("cron = \"0 0/1 * * * ?\"").unwrap_err();
        check!(let ConfigError::Parse(_) = err);
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tracker.toml");
        std::fs::write(&file, "scheduler_interval_minutes = 2\n").unwrap();
        check!(TrackerConfig::from_file(&file).unwrap().scheduler_interval_minutes == 2);

        let missing = TrackerConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
        check!(let ConfigError::Io(_) = missing);
    }
}
