//! Release orchestration engine.
//!
//! Drives one release attempt end to end: resolve the next version,
//! synthesize the changelog, then deploy to every configured target
//! concurrently while persisting a durable [`ReleaseRecord`] after each
//! state change. A failure before any target is touched aborts the release;
//! a failure of one target never rolls back another.

mod deploy;

use crate::adapter::{AdapterProvider, ReleaseTarget};
use crate::changelog::{synthesize, SynthesizeOptions};
use crate::config::{OrchestratorConfig, ProjectConfig};
use crate::error::{ConfigError, ReleaseError, Result};
use crate::record::{ReleasePhase, ReleaseRecord};
use crate::store::RecordStore;
use crate::vcs::CommitSource;
use crate::version::{parse_version, resolve, BumpKind};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Coordinates version resolution, changelog synthesis, and concurrent
/// deployment for one project.
///
/// The orchestrator owns no target-specific logic; everything store-shaped
/// lives behind [`AdapterProvider`]s. It is cheap to clone the handles in
/// and safe to drop after a release: all progress lives in the record store.
pub struct ReleaseOrchestrator {
    store: Arc<dyn RecordStore>,
    commits: Arc<dyn CommitSource>,
    providers: BTreeMap<ReleaseTarget, Arc<dyn AdapterProvider>>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl ReleaseOrchestrator {
    /// Create an orchestrator over the given store, commit source, and
    /// target providers
    pub fn new(
        store: Arc<dyn RecordStore>,
        commits: Arc<dyn CommitSource>,
        providers: BTreeMap<ReleaseTarget, Arc<dyn AdapterProvider>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            commits,
            providers,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts in-flight deployments when cancelled.
    ///
    /// Cancellation is observed at sub-state boundaries; a step that already
    /// started is allowed to finish so the record never lies about what
    /// reached the store.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a full release: resolve, synthesize, deploy, finalize.
    ///
    /// Returns the finalized record; the phase tells the caller whether all
    /// targets made it (`Completed`) or some are left for a resume
    /// (`PartiallyFailed`).
    pub async fn start_release(
        &self,
        project: &ProjectConfig,
        bump: BumpKind,
    ) -> Result<ReleaseRecord> {
        project.validate()?;
        self.check_providers(project)?;

        let id = self.unique_release_id(&project.name).await?;
        log::info!("starting release {} with {} bump", id, bump);

        let mut record = ReleaseRecord::new(id.clone(), &project.targets);
        self.store.put(&record).await?;

        record.set_phase(ReleasePhase::ResolvingVersion);
        self.store.put(&record).await?;

        let current = match parse_version(&project.current_version) {
            Ok(v) => v,
            Err(e) => return self.abort(record, e.into()).await,
        };
        let next = match resolve(&current, bump) {
            Ok(v) => v,
            Err(e) => return self.abort(record, e.into()).await,
        };
        log::info!("release {}: {} -> {}", id, current, next);
        record.set_version(next.clone());
        self.store.put(&record).await?;

        record.set_phase(ReleasePhase::GeneratingChangelog);
        self.store.put(&record).await?;

        let commits = match self
            .commits
            .commits_between(project.from_ref.as_deref(), &project.to_ref)
            .await
        {
            Ok(commits) => commits,
            Err(e) => return self.abort(record, e).await,
        };

        let options = SynthesizeOptions {
            require_entries: self.config.require_changelog_entries,
        };
        let changelog = match synthesize(Some(&current), &next, &commits, &options) {
            Ok(changelog) => changelog,
            Err(e) => return self.abort(record, e.into()).await,
        };
        log::info!(
            "release {}: changelog has {} entries",
            id,
            changelog.total_entries()
        );
        record.set_changelog(changelog);
        self.store.put(&record).await?;

        self.deploy(record).await
    }

    /// Resume a partially failed release under its original id.
    ///
    /// The stored version and changelog are reused verbatim; only targets
    /// that have not succeeded are deployed again. Receipts from earlier
    /// attempts are never touched.
    pub async fn resume_release(&self, id: &str) -> Result<ReleaseRecord> {
        let mut record = self.store.get(id).await?;
        record.prepare_resume().map_err(ReleaseError::from)?;
        log::info!(
            "resuming release {} (attempt {}): {} target(s) pending",
            id,
            record.resume_count + 1,
            record.pending_targets().len()
        );
        self.store.put(&record).await?;
        self.deploy(record).await
    }

    /// Load the current record for a release id
    pub async fn get_status(&self, id: &str) -> Result<ReleaseRecord> {
        self.store.get(id).await
    }

    /// All known release ids
    pub async fn list_releases(&self) -> Result<Vec<String>> {
        self.store.list().await
    }

    async fn deploy(&self, record: ReleaseRecord) -> Result<ReleaseRecord> {
        deploy::deploy_all(
            Arc::clone(&self.store),
            &self.providers,
            &self.config,
            self.cancel.clone(),
            record,
        )
        .await
    }

    /// Persist the aborted phase, then surface the underlying error.
    ///
    /// Reached only before any target has started, so no store-side state
    /// exists to clean up.
    async fn abort(&self, mut record: ReleaseRecord, cause: ReleaseError) -> Result<ReleaseRecord> {
        log::error!("release {} aborted before deploy: {}", record.id, cause);
        record.set_phase(ReleasePhase::AbortedBeforeDeploy);
        self.store.put(&record).await?;
        Err(cause)
    }

    /// Timestamped release id, disambiguated against the store.
    ///
    /// Two releases started within the same second would otherwise share an
    /// id and the second would silently overwrite the first record.
    async fn unique_release_id(&self, project_name: &str) -> Result<String> {
        let base = format!("{}-{}", project_name, Utc::now().format("%Y%m%d-%H%M%S"));
        if !self.store.exists(&base).await? {
            return Ok(base);
        }
        let mut n = 2u32;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !self.store.exists(&candidate).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    fn check_providers(&self, project: &ProjectConfig) -> Result<()> {
        for target in &project.targets {
            if !self.providers.contains_key(target) {
                return Err(ConfigError::MissingTargetSection {
                    target: target.to_string(),
                    section: match target {
                        ReleaseTarget::AppStore => "app_store".to_string(),
                        ReleaseTarget::PlayStore => "play_store".to_string(),
                    },
                }
                .into());
            }
        }
        Ok(())
    }
}
