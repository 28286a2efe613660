//! Project configuration.
//!
//! A [`ProjectConfig`] is immutable and fully resolved before it reaches the
//! orchestrator: there is no ambient project state. Validation happens up
//! front and fails before any release state is created.

use crate::adapter::{AppStoreConfig, PlayStoreConfig, ReleaseTarget};
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on the retry limit, mirroring how fast backoff grows
const MAX_RETRY_LIMIT: u32 = 10;

fn default_to_ref() -> String {
    "HEAD".to_string()
}

fn default_retry_limit() -> u32 {
    3
}

fn default_per_step_timeout_ms() -> u64 {
    600_000
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".appship/releases")
}

/// Fully-resolved configuration for one project, loaded from `appship.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name, used as the release id prefix
    pub name: String,

    /// Current released version as a semver string
    pub current_version: String,

    /// Stores this release deploys to
    pub targets: BTreeSet<ReleaseTarget>,

    /// Lower commit-range boundary (usually the last release tag)
    #[serde(default)]
    pub from_ref: Option<String>,

    /// Upper commit-range boundary
    #[serde(default = "default_to_ref")]
    pub to_ref: String,

    /// Max re-attempts of a transient target failure
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Deadline for each adapter step in milliseconds
    #[serde(default = "default_per_step_timeout_ms")]
    pub per_step_timeout_ms: u64,

    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Fail changelog synthesis when the commit range is empty
    #[serde(default)]
    pub require_changelog_entries: bool,

    /// Directory release records are persisted into
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// App Store pipeline settings
    #[serde(default)]
    pub app_store: Option<AppStoreConfig>,

    /// Play Store pipeline settings
    #[serde(default)]
    pub play_store: Option<PlayStoreConfig>,
}

impl ProjectConfig {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: ProjectConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration without touching any state
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets.into());
        }

        for target in &self.targets {
            match target {
                ReleaseTarget::AppStore if self.app_store.is_none() => {
                    return Err(ConfigError::MissingTargetSection {
                        target: target.to_string(),
                        section: "app_store".to_string(),
                    }
                    .into());
                }
                ReleaseTarget::PlayStore if self.play_store.is_none() => {
                    return Err(ConfigError::MissingTargetSection {
                        target: target.to_string(),
                        section: "play_store".to_string(),
                    }
                    .into());
                }
                _ => {}
            }
        }

        if self.retry_limit > MAX_RETRY_LIMIT {
            return Err(ConfigError::InvalidValue {
                field: "retry_limit".to_string(),
                reason: format!("{} exceeds maximum of {}", self.retry_limit, MAX_RETRY_LIMIT),
            }
            .into());
        }

        if self.per_step_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "per_step_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }

        if let Some(play) = &self.play_store {
            play.validate()?;
        }

        Ok(())
    }

    /// Orchestrator knobs derived from this project
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            retry_limit: self.retry_limit,
            per_step_timeout: Duration::from_millis(self.per_step_timeout_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            require_changelog_entries: self.require_changelog_entries,
        }
    }
}

/// Runtime knobs for the release orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Max re-attempts of a transient target failure
    pub retry_limit: u32,
    /// Deadline for each adapter step
    pub per_step_timeout: Duration,
    /// Base delay for exponential backoff
    pub backoff_base: Duration,
    /// Fail changelog synthesis when the commit range is empty
    pub require_changelog_entries: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            per_step_timeout: Duration::from_millis(default_per_step_timeout_ms()),
            backoff_base: Duration::from_millis(default_backoff_base_ms()),
            require_changelog_entries: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReleaseError;

    fn base_toml() -> String {
        r#"
            name = "demo"
            current_version = "1.4.2"
            targets = ["play-store"]

            [play_store]
            project_dir = "."
            package_name = "com.example.demo"
            access_token = "token"
        "#
        .to_string()
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: ProjectConfig = toml::from_str(&base_toml()).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.to_ref, "HEAD");
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.per_step_timeout_ms, 600_000);
        assert!(!config.require_changelog_entries);
    }

    #[test]
    fn rejects_empty_targets() {
        let toml = r#"
            name = "demo"
            current_version = "1.0.0"
            targets = []
        "#;
        let config: ProjectConfig = toml::from_str(toml).expect("parse");
        let err = config.validate().expect_err("invalid");
        assert!(matches!(
            err,
            ReleaseError::Config(ConfigError::NoTargets)
        ));
    }

    #[test]
    fn rejects_target_without_section() {
        let toml = r#"
            name = "demo"
            current_version = "1.0.0"
            targets = ["app-store"]
        "#;
        let config: ProjectConfig = toml::from_str(toml).expect("parse");
        let err = config.validate().expect_err("invalid");
        assert!(matches!(
            err,
            ReleaseError::Config(ConfigError::MissingTargetSection { .. })
        ));
    }

    #[test]
    fn rejects_excessive_retry_limit() {
        let mut config: ProjectConfig = toml::from_str(&base_toml()).expect("parse");
        config.retry_limit = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn orchestrator_config_derived() {
        let config: ProjectConfig = toml::from_str(&base_toml()).expect("parse");
        let orch = config.orchestrator_config();
        assert_eq!(orch.retry_limit, 3);
        assert_eq!(orch.per_step_timeout, Duration::from_secs(600));
        assert_eq!(orch.backoff_base, Duration::from_secs(1));
    }
}
