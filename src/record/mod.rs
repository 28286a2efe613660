//! Release record tracking and serialization.
//!
//! A [`ReleaseRecord`] is the durable unit of state for one release attempt
//! across all targets. It is created `Pending`, mutated only by the
//! orchestrator as phases advance, and finalized as `Completed` or
//! `PartiallyFailed` once every target has reported.

use crate::adapter::{ReleaseTarget, UploadReceipt};
use crate::changelog::Changelog;
use crate::error::StateError;
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Current version of the record format
pub const RECORD_FORMAT_VERSION: u32 = 1;

/// Phase of a release record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReleasePhase {
    /// Record created, nothing resolved yet
    Pending,
    /// Computing the next version
    ResolvingVersion,
    /// Synthesizing the changelog
    GeneratingChangelog,
    /// Per-target deployment in flight
    Deploying,
    /// Every target succeeded
    Completed,
    /// At least one target failed after exhausting retries
    PartiallyFailed,
    /// Version or changelog phase failed; no target was touched
    AbortedBeforeDeploy,
}

impl fmt::Display for ReleasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleasePhase::Pending => write!(f, "pending"),
            ReleasePhase::ResolvingVersion => write!(f, "resolving version"),
            ReleasePhase::GeneratingChangelog => write!(f, "generating changelog"),
            ReleasePhase::Deploying => write!(f, "deploying"),
            ReleasePhase::Completed => write!(f, "completed"),
            ReleasePhase::PartiallyFailed => write!(f, "partially failed"),
            ReleasePhase::AbortedBeforeDeploy => write!(f, "aborted before deploy"),
        }
    }
}

/// Sub-state of one target inside the deploy phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetState {
    /// Waiting for a worker
    Queued,
    /// Build step running
    Building,
    /// Sign step running
    Signing,
    /// Upload step running
    Uploading,
    /// Upload accepted by the store
    Succeeded,
    /// Terminal failure for this attempt
    Failed,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Queued => write!(f, "queued"),
            TargetState::Building => write!(f, "building"),
            TargetState::Signing => write!(f, "signing"),
            TargetState::Uploading => write!(f, "uploading"),
            TargetState::Succeeded => write!(f, "succeeded"),
            TargetState::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one target within a release attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOutcome {
    /// The target
    pub target: ReleaseTarget,
    /// Current sub-state
    pub state: TargetState,
    /// Error detail once the target fails
    pub error_detail: Option<String>,
    /// Number of adapter step invocations, retries included
    pub attempts: u32,
    /// Receipt from the store once the upload succeeds
    pub receipt: Option<UploadReceipt>,
}

impl TargetOutcome {
    fn new(target: ReleaseTarget) -> Self {
        Self {
            target,
            state: TargetState::Queued,
            error_detail: None,
            attempts: 0,
            receipt: None,
        }
    }
}

/// Durable state for one release attempt across all targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    /// Version of the record format
    pub format_version: u32,
    /// Unique id for this release
    pub id: String,
    /// Resolved next version, set once version resolution succeeds
    pub version: Option<Version>,
    /// Synthesized changelog, set once and reused verbatim on resume
    pub changelog: Option<Changelog>,
    /// Current phase
    pub phase: ReleasePhase,
    /// Per-target status map
    pub targets: BTreeMap<ReleaseTarget, TargetOutcome>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
    /// Set once all targets have reported; cleared while a resume is in flight
    pub finalized_at: Option<DateTime<Utc>>,
    /// Number of times this record was resumed
    pub resume_count: u32,
}

impl ReleaseRecord {
    /// Create a new pending record for the given target set
    pub fn new(id: impl Into<String>, targets: &BTreeSet<ReleaseTarget>) -> Self {
        let now = Utc::now();
        Self {
            format_version: RECORD_FORMAT_VERSION,
            id: id.into(),
            version: None,
            changelog: None,
            phase: ReleasePhase::Pending,
            targets: targets
                .iter()
                .map(|&t| (t, TargetOutcome::new(t)))
                .collect(),
            created_at: now,
            updated_at: now,
            finalized_at: None,
            resume_count: 0,
        }
    }

    /// Advance to a new phase
    pub fn set_phase(&mut self, phase: ReleasePhase) {
        log::debug!("release {}: phase {} -> {}", self.id, self.phase, phase);
        self.phase = phase;
        self.touch();
    }

    /// Record the resolved version
    pub fn set_version(&mut self, version: Version) {
        self.version = Some(version);
        self.touch();
    }

    /// Record the synthesized changelog
    pub fn set_changelog(&mut self, changelog: Changelog) {
        self.changelog = Some(changelog);
        self.touch();
    }

    /// Mutable access to one target's outcome
    pub fn outcome_mut(&mut self, target: ReleaseTarget) -> Option<&mut TargetOutcome> {
        self.touch();
        self.targets.get_mut(&target)
    }

    /// Move a target into a new sub-state, counting the step attempt
    pub fn begin_step(&mut self, target: ReleaseTarget, state: TargetState) {
        if let Some(outcome) = self.targets.get_mut(&target) {
            outcome.state = state;
            outcome.attempts += 1;
        }
        self.touch();
    }

    /// Mark a target as succeeded with its upload receipt
    pub fn mark_succeeded(&mut self, target: ReleaseTarget, receipt: UploadReceipt) {
        if let Some(outcome) = self.targets.get_mut(&target) {
            outcome.state = TargetState::Succeeded;
            outcome.error_detail = None;
            outcome.receipt = Some(receipt);
        }
        self.touch();
    }

    /// Mark a target as terminally failed for this attempt
    pub fn mark_failed(&mut self, target: ReleaseTarget, detail: String) {
        if let Some(outcome) = self.targets.get_mut(&target) {
            outcome.state = TargetState::Failed;
            outcome.error_detail = Some(detail);
        }
        self.touch();
    }

    /// Targets that have not yet succeeded
    pub fn pending_targets(&self) -> Vec<ReleaseTarget> {
        self.targets
            .values()
            .filter(|o| o.state != TargetState::Succeeded)
            .map(|o| o.target)
            .collect()
    }

    /// Whether every target reached `Succeeded`
    pub fn all_succeeded(&self) -> bool {
        self.targets
            .values()
            .all(|o| o.state == TargetState::Succeeded)
    }

    /// Finalize the record once all targets have reported
    pub fn finalize(&mut self) {
        let phase = if self.all_succeeded() {
            ReleasePhase::Completed
        } else {
            ReleasePhase::PartiallyFailed
        };
        self.phase = phase;
        self.finalized_at = Some(Utc::now());
        self.touch();
    }

    /// Whether the record has reached a terminal phase
    pub fn is_finalized(&self) -> bool {
        matches!(
            self.phase,
            ReleasePhase::Completed
                | ReleasePhase::PartiallyFailed
                | ReleasePhase::AbortedBeforeDeploy
        )
    }

    /// Prepare a `PartiallyFailed` record for a resumed attempt.
    ///
    /// Succeeded outcomes are preserved verbatim; failed targets are reset
    /// to `Queued`. The stored version and changelog are reused as-is, which
    /// is what makes resume idempotent.
    pub fn prepare_resume(&mut self) -> Result<(), StateError> {
        match self.phase {
            ReleasePhase::PartiallyFailed => {}
            // A crash mid-deploy leaves the record in Deploying; that is
            // resumable too since succeeded targets carry receipts.
            ReleasePhase::Deploying => {}
            ReleasePhase::Completed => {
                return Err(StateError::NotResumable {
                    id: self.id.clone(),
                    reason: "release already completed".to_string(),
                });
            }
            other => {
                return Err(StateError::NotResumable {
                    id: self.id.clone(),
                    reason: format!("release is in phase '{}'", other),
                });
            }
        }

        if self.version.is_none() || self.changelog.is_none() {
            return Err(StateError::NotResumable {
                id: self.id.clone(),
                reason: "record has no resolved version or changelog".to_string(),
            });
        }

        for outcome in self.targets.values_mut() {
            if outcome.state != TargetState::Succeeded {
                outcome.state = TargetState::Queued;
                outcome.error_detail = None;
            }
        }
        self.resume_count += 1;
        self.finalized_at = None;
        self.phase = ReleasePhase::Deploying;
        self.touch();
        Ok(())
    }

    /// Validate record consistency after load
    pub fn validate(&self) -> Result<(), StateError> {
        if self.format_version != RECORD_FORMAT_VERSION {
            return Err(StateError::FormatMismatch {
                expected: RECORD_FORMAT_VERSION,
                found: self.format_version,
            });
        }
        Ok(())
    }

    /// One-line human summary of the record
    pub fn summary(&self) -> String {
        let version = self
            .version
            .as_ref()
            .map(|v| format!("v{}", v))
            .unwrap_or_else(|| "unresolved".to_string());
        let succeeded = self
            .targets
            .values()
            .filter(|o| o.state == TargetState::Succeeded)
            .count();
        format!(
            "Release {} ({}) - {} - {}/{} targets succeeded",
            self.id,
            version,
            self.phase,
            succeeded,
            self.targets.len()
        )
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
