//! Play Store deployment pipeline.
//!
//! Builds the Android app bundle with the Flutter toolchain, signs it with
//! `jarsigner` when a keystore is configured, and publishes through the
//! Android Publisher edits API. An edit is a transaction: create, upload the
//! bundle, assign it to a track, then commit. Nothing is visible in the
//! store until the commit succeeds.

use super::{
    newest_artifact, run_tool, AdapterProvider, ArtifactKind, ArtifactRef, ReleaseTarget,
    SignedArtifactRef, TargetAdapter, UploadReceipt,
};
use crate::changelog::Changelog;
use crate::error::{ConfigError, TargetError};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use tokio_util::io::ReaderStream;

fn default_api_base() -> String {
    "https://androidpublisher.googleapis.com/androidpublisher/v3".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("build/app/outputs/bundle/release")
}

/// Play release track a build is published to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseTrack {
    /// Internal testing track
    #[default]
    Internal,
    /// Closed alpha track
    Alpha,
    /// Open beta track
    Beta,
    /// Production track
    Production,
}

impl std::str::FromStr for ReleaseTrack {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "internal" => Ok(ReleaseTrack::Internal),
            "alpha" => Ok(ReleaseTrack::Alpha),
            "beta" => Ok(ReleaseTrack::Beta),
            "production" | "prod" => Ok(ReleaseTrack::Production),
            other => Err(ConfigError::InvalidValue {
                field: "track".to_string(),
                reason: format!(
                    "'{}' is not a release track (internal, alpha, beta, production)",
                    other
                ),
            }),
        }
    }
}

impl fmt::Display for ReleaseTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReleaseTrack::Internal => "internal",
            ReleaseTrack::Alpha => "alpha",
            ReleaseTrack::Beta => "beta",
            ReleaseTrack::Production => "production",
        };
        write!(f, "{}", name)
    }
}

/// Settings for the Play Store pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayStoreConfig {
    /// Project root the build runs in
    pub project_dir: PathBuf,
    /// Android application id
    pub package_name: String,
    /// OAuth2 access token for the publisher API
    pub access_token: String,
    /// Track the release goes to
    #[serde(default)]
    pub track: ReleaseTrack,
    /// Staged rollout percentage; omitted means full rollout
    #[serde(default)]
    pub rollout_percent: Option<f64>,
    /// Create the release as a draft instead of rolling it out
    #[serde(default)]
    pub draft: bool,
    /// Keystore for re-signing; omitted means the build embeds its signature
    #[serde(default)]
    pub keystore: Option<PathBuf>,
    /// Key alias within the keystore
    #[serde(default)]
    pub key_alias: Option<String>,
    /// Publisher API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Directory the build writes the bundle into, relative to `project_dir`
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl PlayStoreConfig {
    /// Check settings that the edits API would only reject at commit time
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(percent) = self.rollout_percent {
            if !(0.0..100.0).contains(&percent) || percent <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "play_store.rollout_percent".to_string(),
                    reason: format!("{} is outside the (0, 100) staged rollout range", percent),
                });
            }
            if self.draft {
                return Err(ConfigError::InvalidValue {
                    field: "play_store.rollout_percent".to_string(),
                    reason: "draft releases cannot carry a staged rollout".to_string(),
                });
            }
        }

        if self.keystore.is_some() && self.key_alias.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "play_store.key_alias".to_string(),
                reason: "required when a keystore is configured".to_string(),
            });
        }

        Ok(())
    }
}

/// Adapter driving build/sign/upload against the Play Store
#[derive(Debug)]
pub struct PlayStoreAdapter {
    config: PlayStoreConfig,
    client: reqwest::Client,
}

impl PlayStoreAdapter {
    /// Create an adapter for one release attempt
    pub fn new(config: PlayStoreConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn edits_url(&self, suffix: &str) -> String {
        format!(
            "{}/applications/{}/edits{}",
            self.config.api_base, self.config.package_name, suffix
        )
    }

    async fn open_edit(&self) -> Result<String, TargetError> {
        let response = self
            .client
            .post(self.edits_url(""))
            .bearer_auth(&self.config.access_token)
            .json(&json!({}))
            .send()
            .await
            .map_err(classify_request_error)?;

        let response = check_status(response).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TargetError::UploadRejected {
                reason: format!("Malformed edit response: {}", e),
            })?;

        body.get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| TargetError::UploadRejected {
                reason: "Edit response carried no id".to_string(),
            })
    }

    async fn upload_bundle(
        &self,
        edit_id: &str,
        artifact: &SignedArtifactRef,
    ) -> Result<i64, TargetError> {
        let file = tokio::fs::File::open(&artifact.artifact.path)
            .await
            .map_err(|e| TargetError::UploadRejected {
                reason: format!(
                    "Cannot open bundle {}: {}",
                    artifact.artifact.path.display(),
                    e
                ),
            })?;

        let url = format!(
            "{}/applications/{}/edits/{}/bundles?uploadType=media",
            self.config.api_base, self.config.package_name, edit_id
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.access_token)
            .header("Content-Type", "application/octet-stream")
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(classify_request_error)?;

        let response = check_status(response).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TargetError::UploadRejected {
                reason: format!("Malformed bundle response: {}", e),
            })?;

        body.get("versionCode")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| TargetError::UploadRejected {
                reason: "Bundle response carried no versionCode".to_string(),
            })
    }

    async fn assign_track(
        &self,
        edit_id: &str,
        version_code: i64,
        changelog: &Changelog,
    ) -> Result<(), TargetError> {
        let url = self.edits_url(&format!("/{}/tracks/{}", edit_id, self.config.track));
        let body = track_body(&self.config, version_code, changelog);

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(classify_request_error)?;

        check_status(response).await?;
        Ok(())
    }

    async fn commit_edit(&self, edit_id: &str) -> Result<(), TargetError> {
        let url = self.edits_url(&format!("/{}:commit", edit_id));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(classify_request_error)?;

        check_status(response).await?;
        Ok(())
    }
}

/// Provider handing out fresh Play Store adapters, one per attempt
#[derive(Debug, Clone)]
pub struct PlayStoreProvider {
    config: PlayStoreConfig,
}

impl PlayStoreProvider {
    /// Create a provider over the given settings
    pub fn new(config: PlayStoreConfig) -> Self {
        Self { config }
    }
}

impl AdapterProvider for PlayStoreProvider {
    fn target(&self) -> ReleaseTarget {
        ReleaseTarget::PlayStore
    }

    fn adapter(&self) -> Box<dyn TargetAdapter> {
        Box::new(PlayStoreAdapter::new(self.config.clone()))
    }
}

#[async_trait]
impl TargetAdapter for PlayStoreAdapter {
    fn target(&self) -> ReleaseTarget {
        ReleaseTarget::PlayStore
    }

    async fn build(&self) -> Result<ArtifactRef, TargetError> {
        let output = run_tool(
            "flutter",
            &["build", "appbundle", "--release"],
            &self.config.project_dir,
        )
        .await?;

        if !output.status.success() {
            return Err(TargetError::BuildFailed {
                reason: String::from_utf8_lossy(&output.stderr)
                    .lines()
                    .last()
                    .unwrap_or("flutter build appbundle failed")
                    .to_string(),
            });
        }

        let output_dir = self.config.project_dir.join(&self.config.output_dir);
        let path = newest_artifact(&output_dir, "aab").ok_or_else(|| TargetError::BuildFailed {
            reason: format!("no .aab produced under {}", output_dir.display()),
        })?;

        Ok(ArtifactRef {
            path,
            kind: ArtifactKind::Aab,
        })
    }

    async fn sign(&self, artifact: ArtifactRef) -> Result<SignedArtifactRef, TargetError> {
        let signature_id = match (&self.config.keystore, &self.config.key_alias) {
            (Some(keystore), Some(alias)) => {
                let keystore_arg = keystore.to_string_lossy().into_owned();
                let bundle_arg = artifact.path.to_string_lossy().into_owned();
                let output = run_tool(
                    "jarsigner",
                    &["-keystore", &keystore_arg, &bundle_arg, alias],
                    &self.config.project_dir,
                )
                .await?;

                if !output.status.success() {
                    return Err(TargetError::SigningFailed {
                        reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    });
                }
                alias.clone()
            }
            // Gradle signed the bundle during the build.
            _ => "embedded".to_string(),
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
        let edit_id = self.open_edit().await?;
        log::debug!("opened play edit {}", edit_id);

        let version_code = self.upload_bundle(&edit_id, &artifact).await?;
        self.assign_track(&edit_id, version_code, changelog).await?;
        self.commit_edit(&edit_id).await?;

        log::info!(
            "committed play edit {} with version code {} on track {}",
            edit_id,
            version_code,
            self.config.track
        );

        Ok(UploadReceipt {
            target: ReleaseTarget::PlayStore,
            reference: format!("{}:{}", self.config.package_name, version_code),
            uploaded_at: Utc::now(),
        })
    }
}

/// Track payload for the edits API.
///
/// A draft release stays invisible until promoted; a staged rollout goes out
/// `inProgress` with a user fraction; otherwise the release is `completed`.
fn track_body(config: &PlayStoreConfig, version_code: i64, changelog: &Changelog) -> serde_json::Value {
    let mut release = json!({
        "name": changelog.version.to_string(),
        "versionCodes": [version_code.to_string()],
        "releaseNotes": [{
            "language": "en-US",
            "text": changelog.render(),
        }],
    });

    if config.draft {
        release["status"] = json!("draft");
    } else if let Some(percent) = config.rollout_percent {
        release["status"] = json!("inProgress");
        release["userFraction"] = json!(percent / 100.0);
    } else {
        release["status"] = json!("completed");
    }

    json!({
        "track": config.track.to_string(),
        "releases": [release],
    })
}

/// Classify a transport-level failure; timeouts and connection errors are
/// worth retrying, anything else is a rejection.
fn classify_request_error(err: reqwest::Error) -> TargetError {
    if err.is_timeout() || err.is_connect() {
        TargetError::TransientNetwork {
            reason: err.to_string(),
        }
    } else {
        TargetError::UploadRejected {
            reason: err.to_string(),
        }
    }
}

/// Classify an API status code.
///
/// 429 and 5xx are retryable; 403 means the daily publishing quota is spent
/// and retrying within this release would not help; other 4xx are
/// rejections of the upload itself.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TargetError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let detail = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    let reason = format!("HTTP {}: {}", status.as_u16(), truncate(&detail, 400));

    if status.as_u16() == 429 || status.is_server_error() {
        Err(TargetError::TransientNetwork { reason })
    } else if status.as_u16() == 403 {
        Err(TargetError::QuotaExceeded { reason })
    } else {
        Err(TargetError::UploadRejected { reason })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::{synthesize, CommitEntry, SynthesizeOptions};
    use semver::Version;

    fn config() -> PlayStoreConfig {
        PlayStoreConfig {
            project_dir: PathBuf::from("."),
            package_name: "com.example.demo".to_string(),
            access_token: "token".to_string(),
            track: ReleaseTrack::Internal,
            rollout_percent: None,
            draft: false,
            keystore: None,
            key_alias: None,
            api_base: default_api_base(),
            output_dir: default_output_dir(),
        }
    }

    fn changelog() -> Changelog {
        let commits = vec![CommitEntry::new(
            "a".repeat(40),
            "feat: add onboarding",
            Utc::now(),
        )];
        synthesize(
            Some(&Version::new(1, 4, 2)),
            &Version::new(1, 5, 0),
            &commits,
            &SynthesizeOptions::default(),
        )
        .expect("changelog")
    }

    #[test]
    fn full_rollout_is_completed() {
        let body = track_body(&config(), 42, &changelog());
        assert_eq!(body["track"], "internal");
        let release = &body["releases"][0];
        assert_eq!(release["status"], "completed");
        assert_eq!(release["versionCodes"][0], "42");
        assert_eq!(release["releaseNotes"][0]["language"], "en-US");
        assert!(release.get("userFraction").is_none());
    }

    #[test]
    fn staged_rollout_sets_user_fraction() {
        let mut cfg = config();
        cfg.rollout_percent = Some(25.0);
        cfg.track = ReleaseTrack::Production;

        let body = track_body(&cfg, 7, &changelog());
        assert_eq!(body["track"], "production");
        let release = &body["releases"][0];
        assert_eq!(release["status"], "inProgress");
        assert_eq!(release["userFraction"], 0.25);
    }

    #[test]
    fn draft_release_has_draft_status() {
        let mut cfg = config();
        cfg.draft = true;

        let body = track_body(&cfg, 7, &changelog());
        assert_eq!(body["releases"][0]["status"], "draft");
    }

    #[test]
    fn release_notes_carry_rendered_changelog() {
        let log = changelog();
        let body = track_body(&config(), 7, &log);
        let text = body["releases"][0]["releaseNotes"][0]["text"]
            .as_str()
            .expect("notes");
        assert!(text.contains("add onboarding"));
        assert_eq!(text, log.render());
    }

    #[test]
    fn validate_rejects_out_of_range_rollout() {
        let mut cfg = config();
        cfg.rollout_percent = Some(150.0);
        assert!(cfg.validate().is_err());

        cfg.rollout_percent = Some(0.0);
        assert!(cfg.validate().is_err());

        cfg.rollout_percent = Some(50.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_draft_with_rollout() {
        let mut cfg = config();
        cfg.draft = true;
        cfg.rollout_percent = Some(10.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_requires_key_alias_with_keystore() {
        let mut cfg = config();
        cfg.keystore = Some(PathBuf::from("release.jks"));
        assert!(cfg.validate().is_err());

        cfg.key_alias = Some("upload".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn track_names_match_api_identifiers() {
        assert_eq!(ReleaseTrack::Internal.to_string(), "internal");
        assert_eq!(ReleaseTrack::Alpha.to_string(), "alpha");
        assert_eq!(ReleaseTrack::Beta.to_string(), "beta");
        assert_eq!(ReleaseTrack::Production.to_string(), "production");
    }
}
