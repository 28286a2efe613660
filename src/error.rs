//! Error types for appship release operations.
//!
//! This module defines all error types with actionable error messages and recovery suggestions.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for appship operations
pub type Result<T> = std::result::Result<T, ReleaseError>;

/// Main error type for all appship operations
#[derive(Error, Debug)]
pub enum ReleaseError {
    /// Configuration errors (fail before any state change)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Version resolution errors
    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    /// Changelog synthesis errors
    #[error("Changelog error: {0}")]
    Changelog(#[from] ChangelogError),

    /// Deployment target errors
    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    /// Release record persistence errors
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Version control errors
    #[error("VCS error: {0}")]
    Vcs(#[from] VcsError),

    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors, raised during validation before any state change
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config at {path}: {reason}")]
    ReadFailed {
        /// Path to the configuration file
        path: PathBuf,
        /// Reason for the error
        reason: String,
    },

    /// Configuration file could not be parsed
    #[error("Failed to parse config at {path}: {reason}")]
    ParseFailed {
        /// Path to the configuration file
        path: PathBuf,
        /// Reason for the error
        reason: String,
    },

    /// No deployment targets selected
    #[error("No deployment targets configured. Enable at least one of: app-store, play-store")]
    NoTargets,

    /// A selected target has no store section configured
    #[error("Target '{target}' is selected but has no [{section}] section in the config")]
    MissingTargetSection {
        /// Target name
        target: String,
        /// Expected config section
        section: String,
    },

    /// Unknown deployment target name
    #[error("Unknown deployment target '{name}'. Valid targets: app-store, play-store")]
    UnknownTarget {
        /// Target name as given
        name: String,
    },

    /// A configuration value is out of range or malformed
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for the error
        reason: String,
    },
}

/// Version resolution errors
#[derive(Error, Debug)]
pub enum VersionError {
    /// Current version string is not a valid semantic version
    #[error("Invalid version format '{version}': {source}")]
    InvalidFormat {
        /// Version string
        version: String,
        /// Parsing error
        #[source]
        source: semver::Error,
    },

    /// Bump policy name is not recognized
    #[error("Unsupported bump policy '{policy}'. Valid policies: major, minor, patch, prerelease")]
    UnsupportedPolicy {
        /// Policy name as given
        policy: String,
    },

    /// Prerelease component could not be constructed
    #[error("Invalid prerelease component '{component}': {reason}")]
    InvalidPrerelease {
        /// Prerelease component
        component: String,
        /// Reason for the error
        reason: String,
    },
}

/// Changelog synthesis errors
#[derive(Error, Debug)]
pub enum ChangelogError {
    /// Commit range produced no entries and the config requires at least one
    #[error("Commit range {from}..{to} contains no commits and require_entries is set")]
    EmptyRange {
        /// Start of the range
        from: String,
        /// End of the range
        to: String,
    },
}

/// Deployment target errors, captured per-target during the deploy phase
#[derive(Error, Debug)]
pub enum TargetError {
    /// Build step failed
    #[error("Build failed: {reason}")]
    BuildFailed {
        /// Reason for the error
        reason: String,
    },

    /// Signing step failed
    #[error("Signing failed: {reason}")]
    SigningFailed {
        /// Reason for the error
        reason: String,
    },

    /// Store rejected the uploaded artifact
    #[error("Upload rejected: {reason}")]
    UploadRejected {
        /// Rejection reason from the store
        reason: String,
    },

    /// Transient network failure; retried with backoff
    #[error("Transient network error: {reason}")]
    TransientNetwork {
        /// Reason for the error
        reason: String,
    },

    /// Store quota exhausted; not retryable within the same release attempt
    #[error("Store quota exceeded: {reason}")]
    QuotaExceeded {
        /// Reason for the error
        reason: String,
    },

    /// Step exceeded its deadline; classified transient since the engine
    /// cannot confirm whether the backend committed the action
    #[error("Step '{step}' timed out after {seconds}s")]
    StepTimeout {
        /// Step name
        step: String,
        /// Deadline in seconds
        seconds: u64,
    },

    /// Required platform tool is not installed
    #[error("Required tool '{tool}' not found on PATH")]
    ToolMissing {
        /// Tool name
        tool: String,
    },

    /// Deployment aborted by the caller before this step started
    #[error("Aborted by caller before step '{step}'")]
    Aborted {
        /// Step that was about to run
        step: String,
    },
}

impl TargetError {
    /// Whether this failure may be retried within the same release attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TargetError::TransientNetwork { .. } | TargetError::StepTimeout { .. }
        )
    }
}

/// Release record persistence errors
#[derive(Error, Debug)]
pub enum StateError {
    /// No record exists for the given release id
    #[error("No release record found for id '{id}'")]
    NotFound {
        /// Release id
        id: String,
    },

    /// Record file exists but cannot be deserialized
    #[error("Release record corrupted: {reason}")]
    Corrupted {
        /// Reason for the error
        reason: String,
    },

    /// Record format version does not match this binary
    #[error("Record format version mismatch: expected {expected}, found {found}")]
    FormatMismatch {
        /// Expected format version
        expected: u32,
        /// Found format version
        found: u32,
    },

    /// Failed to persist a record
    #[error("Failed to save release record: {reason}")]
    SaveFailed {
        /// Reason for the error
        reason: String,
    },

    /// Failed to load a record
    #[error("Failed to load release record: {reason}")]
    LoadFailed {
        /// Reason for the error
        reason: String,
    },

    /// Record is not in a resumable state
    #[error("Release '{id}' cannot be resumed: {reason}")]
    NotResumable {
        /// Release id
        id: String,
        /// Reason for the error
        reason: String,
    },
}

/// Version control errors
#[derive(Error, Debug)]
pub enum VcsError {
    /// No git repository at the given path
    #[error("No git repository found at {path}")]
    RepositoryNotFound {
        /// Path that was searched
        path: PathBuf,
    },

    /// A commit range boundary could not be resolved
    #[error("Reference '{reference}' not found in repository")]
    ReferenceNotFound {
        /// Reference name
        reference: String,
    },

    /// History walk failed
    #[error("Failed to walk commit history: {reason}")]
    WalkFailed {
        /// Reason for the error
        reason: String,
    },
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },

    /// Command execution failed
    #[error("Command execution failed: {command} - {reason}")]
    ExecutionFailed {
        /// Command that failed
        command: String,
        /// Reason for the error
        reason: String,
    },
}

impl ReleaseError {
    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ReleaseError::Config(ConfigError::NoTargets) => vec![
                "Add at least one target to the 'targets' list in appship.toml".to_string(),
            ],
            ReleaseError::Config(ConfigError::MissingTargetSection { target, section }) => vec![
                format!("Add a [{}] section for target '{}'", section, target),
                format!("Or remove '{}' from the 'targets' list", target),
            ],
            ReleaseError::Target(TargetError::ToolMissing { tool }) => {
                vec![format!("Install '{}' and ensure it is on PATH", tool)]
            }
            ReleaseError::Target(TargetError::QuotaExceeded { .. }) => vec![
                "Wait for the store quota window to reset, then resume the release".to_string(),
                "Check the store console for quota details".to_string(),
            ],
            ReleaseError::State(StateError::NotFound { id }) => {
                vec![format!("Check the release id '{}' with 'appship list'", id)]
            }
            ReleaseError::Vcs(VcsError::ReferenceNotFound { reference }) => vec![format!(
                "Verify that '{}' exists: git rev-parse {}",
                reference, reference
            )],
            _ => vec!["Check the error message above for specific details".to_string()],
        }
    }

    /// Check if this error is recoverable by retrying
    pub fn is_recoverable(&self) -> bool {
        match self {
            ReleaseError::Target(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TargetError::TransientNetwork {
            reason: "connection reset".to_string()
        }
        .is_transient());
        assert!(TargetError::StepTimeout {
            step: "upload".to_string(),
            seconds: 30
        }
        .is_transient());
        assert!(!TargetError::QuotaExceeded {
            reason: "daily limit".to_string()
        }
        .is_transient());
        assert!(!TargetError::BuildFailed {
            reason: "compile error".to_string()
        }
        .is_transient());
        assert!(!TargetError::UploadRejected {
            reason: "invalid bundle".to_string()
        }
        .is_transient());
    }

    #[test]
    fn recoverable_follows_transience() {
        let transient = ReleaseError::Target(TargetError::TransientNetwork {
            reason: "timeout".to_string(),
        });
        assert!(transient.is_recoverable());

        let terminal = ReleaseError::Config(ConfigError::NoTargets);
        assert!(!terminal.is_recoverable());
    }
}
