//! krane.toml daemon settings.
//!
//! Every field has a default, so an empty file (or no file) is valid.
//! Environment variables override the file:
//!
//! | Variable                  | Field                |
//! |---------------------------|----------------------|
//! | `KRANE_DATA_DIR`          | `data_dir`           |
//! | `DEPLOYMENT_RETRY_POLICY` | `jobs.retry_policy`  |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// File name of the state store inside `data_dir`.
pub const STORE_FILE: &str = "krane.redb";

pub const DATA_DIR_ENV: &str = "KRANE_DATA_DIR";
pub const RETRY_POLICY_ENV: &str = "DEPLOYMENT_RETRY_POLICY";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KraneSettings {
    pub data_dir: PathBuf,
    pub store_open_timeout_secs: u64,
    pub jobs: JobSettings,
    pub runtime: RuntimeSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Retries after the first attempt. Zero means run once.
    pub retry_policy: u32,
    pub retry_delay_ms: u64,
    pub max_workers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Bridge network every deployment container joins.
    pub network: String,
    pub stop_grace_secs: u64,
    pub call_timeout_secs: u64,
    pub pull_images: bool,
}

impl Default for KraneSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/krane"),
            store_open_timeout_secs: 30,
            jobs: JobSettings::default(),
            runtime: RuntimeSettings::default(),
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            retry_policy: 0,
            retry_delay_ms: 1000,
            max_workers: 8,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            network: "krane".to_string(),
            stop_grace_secs: 60,
            call_timeout_secs: 120,
            pull_images: true,
        }
    }
}

impl KraneSettings {
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load from `path` if given, apply process environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Apply overrides from an environment lookup.
    ///
    /// An unparsable retry policy is ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(RETRY_POLICY_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(retries) => self.jobs.retry_policy = retries,
                Err(_) => warn!(value = %raw, "ignoring invalid {RETRY_POLICY_ENV}"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(SettingsError::Invalid {
                field: "data_dir",
                reason: "must not be empty".into(),
            });
        }
        if self.jobs.max_workers == 0 {
            return Err(SettingsError::Invalid {
                field: "jobs.max_workers",
                reason: "must be at least 1".into(),
            });
        }
        if self.runtime.network.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "runtime.network",
                reason: "must not be empty".into(),
            });
        }
        if self.runtime.call_timeout_secs == 0 {
            return Err(SettingsError::Invalid {
                field: "runtime.call_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Path of the state store file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let settings = KraneSettings::from_toml("").unwrap();
        assert_eq!(settings, KraneSettings::default());
        assert_eq!(settings.db_path(), PathBuf::from("/var/lib/krane/krane.redb"));
        assert_eq!(settings.jobs.retry_policy, 0);
        assert_eq!(settings.runtime.stop_grace_secs, 60);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let settings = KraneSettings::from_toml(
            r#"
data_dir = "/tmp/krane"

[jobs]
retry_policy = 3

[runtime]
network = "edge"
"#,
        )
        .unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/krane"));
        assert_eq!(settings.jobs.retry_policy, 3);
        assert_eq!(settings.jobs.max_workers, 8);
        assert_eq!(settings.runtime.network, "edge");
        assert!(settings.runtime.pull_images);
    }

    #[test]
    fn env_overrides_file() {
        let mut settings = KraneSettings::default();
        settings.apply_env(env(&[
            ("KRANE_DATA_DIR", "/srv/krane"),
            ("DEPLOYMENT_RETRY_POLICY", "5"),
        ]));
        assert_eq!(settings.data_dir, PathBuf::from("/srv/krane"));
        assert_eq!(settings.jobs.retry_policy, 5);
    }

    #[test]
    fn invalid_retry_policy_is_ignored() {
        let mut settings = KraneSettings::default();
        settings.jobs.retry_policy = 2;
        settings.apply_env(env(&[("DEPLOYMENT_RETRY_POLICY", "lots")]));
        assert_eq!(settings.jobs.retry_policy, 2);
    }

    #[test]
    fn zero_workers_rejected() {
        let mut settings = KraneSettings::default();
        settings.jobs.max_workers = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid {
                field: "jobs.max_workers",
                ..
            })
        ));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("krane.toml");
        std::fs::write(&path, "[jobs]\nmax_workers = 2\n").unwrap();

        let settings = KraneSettings::from_file(&path).unwrap();
        assert_eq!(settings.jobs.max_workers, 2);

        let missing = KraneSettings::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(SettingsError::Read { .. })));
    }
}
