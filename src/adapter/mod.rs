//! Deployment target adapters.
//!
//! A [`TargetAdapter`] wraps one store's build/sign/upload pipeline behind a
//! uniform capability interface. Adapters never share mutable state with each
//! other and each instance is single-use per release attempt; the
//! orchestrator obtains fresh instances through an [`AdapterProvider`].

pub mod app_store;
pub mod play_store;

pub use app_store::{AppStoreAdapter, AppStoreConfig, AppStoreProvider};
pub use play_store::{PlayStoreAdapter, PlayStoreConfig, PlayStoreProvider, ReleaseTrack};

use crate::changelog::Changelog;
use crate::error::{ConfigError, TargetError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A store a release is deployed to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseTarget {
    /// Apple App Store
    AppStore,
    /// Google Play Store
    PlayStore,
}

impl fmt::Display for ReleaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseTarget::AppStore => write!(f, "app-store"),
            ReleaseTarget::PlayStore => write!(f, "play-store"),
        }
    }
}

impl FromStr for ReleaseTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "app-store" | "appstore" | "ios" => Ok(ReleaseTarget::AppStore),
            "play-store" | "playstore" | "android" => Ok(ReleaseTarget::PlayStore),
            other => Err(ConfigError::UnknownTarget {
                name: other.to_string(),
            }),
        }
    }
}

/// Kind of build artifact a target produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// iOS application archive
    Ipa,
    /// Android app bundle
    Aab,
}

/// Reference to a built artifact on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Path to the artifact
    pub path: PathBuf,
    /// Artifact kind
    pub kind: ArtifactKind,
}

/// Reference to a signed artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedArtifactRef {
    /// The underlying artifact
    pub artifact: ArtifactRef,
    /// Identity or mechanism that produced the signature
    pub signature_id: String,
}

/// Receipt returned by a store after a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Target that accepted the upload
    pub target: ReleaseTarget,
    /// Store-side reference (version code, delivery id)
    pub reference: String,
    /// When the upload was accepted
    pub uploaded_at: DateTime<Utc>,
}

/// Uniform capability interface over a store-specific release pipeline.
///
/// Each step may fail independently with a typed [`TargetError`]; the
/// orchestrator decides what is retried based on
/// [`TargetError::is_transient`].
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    /// The store this adapter deploys to
    fn target(&self) -> ReleaseTarget;

    /// Produce a build artifact
    async fn build(&self) -> Result<ArtifactRef, TargetError>;

    /// Sign the artifact via platform tooling
    async fn sign(&self, artifact: ArtifactRef) -> Result<SignedArtifactRef, TargetError>;

    /// Upload the signed artifact with its release notes
    async fn upload(
        &self,
        artifact: SignedArtifactRef,
        changelog: &Changelog,
    ) -> Result<UploadReceipt, TargetError>;
}

/// Creates single-use adapter instances, one per target per release attempt
pub trait AdapterProvider: Send + Sync {
    /// The store this provider builds adapters for
    fn target(&self) -> ReleaseTarget;

    /// Create a fresh adapter instance
    fn adapter(&self) -> Box<dyn TargetAdapter>;
}

/// Locate a tool on PATH, then run it and capture its output.
///
/// Spawn failures and lookup failures map to [`TargetError::ToolMissing`];
/// callers interpret exit status and stderr themselves.
pub(crate) async fn run_tool(
    tool: &str,
    args: &[&str],
    cwd: &Path,
) -> Result<std::process::Output, TargetError> {
    let program = which::which(tool).map_err(|_| TargetError::ToolMissing {
        tool: tool.to_string(),
    })?;

    log::debug!("running {} {:?} in {}", tool, args, cwd.display());

    tokio::process::Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| TargetError::ToolMissing {
            tool: format!("{} ({})", tool, e),
        })
}

/// Find the most recently modified file with the given extension under a
/// directory. Mirrors how build output is discovered after a mobile build:
/// the toolchain writes one artifact per build, newest wins.
pub(crate) fn newest_artifact(dir: &Path, extension: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .flatten()
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
        .max_by_key(|e| {
            e.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        })
        .map(|e| e.path())
}
