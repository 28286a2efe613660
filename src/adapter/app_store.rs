//! App Store deployment pipeline.
//!
//! Builds the iOS archive with the Flutter toolchain, delegates signing to
//! `codesign`, and uploads through `xcrun altool`. Cryptographic signing
//! internals and store authentication both stay inside the platform tools;
//! this adapter only sequences them and classifies their failures.

use super::{
    newest_artifact, run_tool, AdapterProvider, ArtifactKind, ArtifactRef, ReleaseTarget,
    SignedArtifactRef, TargetAdapter, UploadReceipt,
};
use crate::changelog::Changelog;
use crate::error::TargetError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_scheme() -> String {
    "Runner".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("build/ios/ipa")
}

/// Settings for the App Store pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStoreConfig {
    /// Project root the build runs in
    pub project_dir: PathBuf,
    /// Application bundle identifier
    pub bundle_id: String,
    /// App Store Connect API key id
    pub api_key_id: String,
    /// App Store Connect API issuer id
    pub api_issuer: String,
    /// Xcode scheme to build
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Signing identity for re-signing; omitted means Xcode-managed signing
    #[serde(default)]
    pub signing_identity: Option<String>,
    /// Directory the build writes the archive into, relative to `project_dir`
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Adapter driving build/sign/upload against the App Store
#[derive(Debug)]
pub struct AppStoreAdapter {
    config: AppStoreConfig,
}

impl AppStoreAdapter {
    /// Create an adapter for one release attempt
    pub fn new(config: AppStoreConfig) -> Self {
        Self { config }
    }
}

/// Provider handing out fresh App Store adapters, one per attempt
#[derive(Debug, Clone)]
pub struct AppStoreProvider {
    config: AppStoreConfig,
}

impl AppStoreProvider {
    /// Create a provider over the given settings
    pub fn new(config: AppStoreConfig) -> Self {
        Self { config }
    }
}

impl AdapterProvider for AppStoreProvider {
    fn target(&self) -> ReleaseTarget {
        ReleaseTarget::AppStore
    }

    fn adapter(&self) -> Box<dyn TargetAdapter> {
        Box::new(AppStoreAdapter::new(self.config.clone()))
    }
}

#[async_trait]
impl TargetAdapter for AppStoreAdapter {
    fn target(&self) -> ReleaseTarget {
        ReleaseTarget::AppStore
    }

    async fn build(&self) -> Result<ArtifactRef, TargetError> {
        let output = run_tool(
            "flutter",
            &["build", "ipa", "--release"],
            &self.config.project_dir,
        )
        .await?;

        if !output.status.success() {
            return Err(TargetError::BuildFailed {
                reason: stderr_tail(&output.stderr),
            });
        }

        let output_dir = self.config.project_dir.join(&self.config.output_dir);
        let path = newest_artifact(&output_dir, "ipa").ok_or_else(|| TargetError::BuildFailed {
            reason: format!("no .ipa produced under {}", output_dir.display()),
        })?;

        Ok(ArtifactRef {
            path,
            kind: ArtifactKind::Ipa,
        })
    }

    async fn sign(&self, artifact: ArtifactRef) -> Result<SignedArtifactRef, TargetError> {
        let signature_id = match &self.config.signing_identity {
            Some(identity) => {
                let path = artifact.path.to_string_lossy().into_owned();
                let output = run_tool(
                    "codesign",
                    &["--force", "--sign", identity, &path],
                    &self.config.project_dir,
                )
                .await?;

                if !output.status.success() {
                    return Err(TargetError::SigningFailed {
                        reason: stderr_tail(&output.stderr),
                    });
                }
                identity.clone()
            }
            // Xcode signs during the archive export; nothing to re-sign.
            None => "xcode-managed".to_string(),
        };

        Ok(SignedArtifactRef {
            artifact,
            signature_id,
        })
    }

    async fn upload(
        &self,
        artifact: SignedArtifactRef,
        changelog: &Changelog,
    ) -> Result<UploadReceipt, TargetError> {
        // altool carries no release notes; they are staged next to the
        // artifact for the App Store Connect metadata step.
        let notes_path = artifact
            .artifact
            .path
            .with_file_name("ReleaseNotes.md");
        if let Err(e) = std::fs::write(&notes_path, changelog.render()) {
            log::warn!("failed to stage release notes at {}: {}", notes_path.display(), e);
        }

        let path = artifact.artifact.path.to_string_lossy().into_owned();
        let output = run_tool(
            "xcrun",
            &[
                "altool",
                "--upload-app",
                "-f",
                &path,
                "-t",
                "ios",
                "--apiKey",
                &self.config.api_key_id,
                "--apiIssuer",
                &self.config.api_issuer,
            ],
            &self.config.project_dir,
        )
        .await?;

        if !output.status.success() {
            return Err(classify_upload_failure(&stderr_tail(&output.stderr)));
        }

        Ok(UploadReceipt {
            target: ReleaseTarget::AppStore,
            reference: format!("{}@{}", self.config.bundle_id, changelog.version),
            uploaded_at: Utc::now(),
        })
    }
}

/// Map an upload tool failure onto the target error taxonomy.
///
/// Delivery tooling reports everything on stderr; network-shaped messages
/// are retryable, throttling is terminal for this attempt, anything else is
/// a store rejection.
fn classify_upload_failure(stderr: &str) -> TargetError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("network")
        || lower.contains("connection")
        || lower.contains("could not connect")
    {
        TargetError::TransientNetwork {
            reason: stderr.to_string(),
        }
    } else if lower.contains("too many") || lower.contains("quota") || lower.contains("rate limit")
    {
        TargetError::QuotaExceeded {
            reason: stderr.to_string(),
        }
    } else {
        TargetError::UploadRejected {
            reason: stderr.to_string(),
        }
    }
}

/// Last few lines of a tool's stderr, enough to diagnose without flooding
/// the release record
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join("\n")
}
