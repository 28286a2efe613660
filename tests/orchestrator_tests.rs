//! End-to-end orchestrator tests over mock target adapters.
//!
//! The mocks script per-target outcomes so every phase transition and
//! retry/resume path can be exercised without touching real build tools or
//! store APIs. Persistence goes through the real JSON file store.

use appship::adapter::{
    AdapterProvider, ArtifactKind, ArtifactRef, ReleaseTarget, SignedArtifactRef, TargetAdapter,
    UploadReceipt,
};
use appship::changelog::CommitEntry;
use appship::config::{OrchestratorConfig, ProjectConfig};
use appship::error::{ReleaseError, TargetError};
use appship::record::{ReleasePhase, TargetState};
use appship::store::{JsonFileStore, RecordStore};
use appship::vcs::CommitSource;
use appship::version::BumpKind;
use appship::{Changelog, ReleaseOrchestrator, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Scripted outcome for a mock target's upload step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadScript {
    Succeed,
    /// Fail with a transient network error this many times, then succeed
    TransientThenSucceed(u32),
    /// Fail terminally with a quota error on every attempt
    Quota,
    /// Fail terminally with a store rejection on every attempt
    Rejected,
}

/// Shared state between a provider and the adapters it hands out
#[derive(Debug)]
struct MockState {
    target: ReleaseTarget,
    script: Mutex<UploadScript>,
    transient_remaining: AtomicU32,
    build_calls: AtomicU32,
    sign_delay: Mutex<Duration>,
    sign_finished: AtomicU32,
    upload_calls: AtomicU32,
}

#[derive(Debug, Clone)]
struct MockProvider {
    state: Arc<MockState>,
}

impl MockProvider {
    fn new(target: ReleaseTarget, script: UploadScript) -> Self {
        let transient = match script {
            UploadScript::TransientThenSucceed(n) => n,
            _ => 0,
        };
        Self {
            state: Arc::new(MockState {
                target,
                script: Mutex::new(script),
                transient_remaining: AtomicU32::new(transient),
                build_calls: AtomicU32::new(0),
                sign_delay: Mutex::new(Duration::ZERO),
                sign_finished: AtomicU32::new(0),
                upload_calls: AtomicU32::new(0),
            }),
        }
    }

    fn set_script(&self, script: UploadScript) {
        *self.state.script.lock().unwrap() = script;
    }

    fn build_calls(&self) -> u32 {
        self.state.build_calls.load(Ordering::SeqCst)
    }

    fn set_sign_delay(&self, delay: Duration) {
        *self.state.sign_delay.lock().unwrap() = delay;
    }

    fn signs_finished(&self) -> u32 {
        self.state.sign_finished.load(Ordering::SeqCst)
    }

    fn upload_calls(&self) -> u32 {
        self.state.upload_calls.load(Ordering::SeqCst)
    }
}

impl AdapterProvider for MockProvider {
    fn target(&self) -> ReleaseTarget {
        self.state.target
    }

    fn adapter(&self) -> Box<dyn TargetAdapter> {
        Box::new(MockAdapter {
            state: Arc::clone(&self.state),
        })
    }
}

struct MockAdapter {
    state: Arc<MockState>,
}

#[async_trait]
impl TargetAdapter for MockAdapter {
    fn target(&self) -> ReleaseTarget {
        self.state.target
    }

    async fn build(&self) -> std::result::Result<ArtifactRef, TargetError> {
        self.state.build_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ArtifactRef {
            path: PathBuf::from(format!("/tmp/{}.artifact", self.state.target)),
            kind: match self.state.target {
                ReleaseTarget::AppStore => ArtifactKind::Ipa,
                ReleaseTarget::PlayStore => ArtifactKind::Aab,
            },
        })
    }

    async fn sign(
        &self,
        artifact: ArtifactRef,
    ) -> std::result::Result<SignedArtifactRef, TargetError> {
        let delay = *self.state.sign_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.sign_finished.fetch_add(1, Ordering::SeqCst);
        Ok(SignedArtifactRef {
            artifact,
            signature_id: "mock".to_string(),
        })
    }

    async fn upload(
        &self,
        _artifact: SignedArtifactRef,
        changelog: &Changelog,
    ) -> std::result::Result<UploadReceipt, TargetError> {
        let call = self.state.upload_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let script = *self.state.script.lock().unwrap();
        match script {
            UploadScript::Quota => Err(TargetError::QuotaExceeded {
                reason: "daily upload limit reached".to_string(),
            }),
            UploadScript::Rejected => Err(TargetError::UploadRejected {
                reason: "invalid bundle".to_string(),
            }),
            UploadScript::TransientThenSucceed(_)
                if self
                    .state
                    .transient_remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok() =>
            {
                Err(TargetError::TransientNetwork {
                    reason: "connection reset".to_string(),
                })
            }
            _ => Ok(UploadReceipt {
                target: self.state.target,
                reference: format!("{}-v{}-upload-{}", self.state.target, changelog.version, call),
                uploaded_at: Utc::now(),
            }),
        }
    }
}

/// Commit source returning a fixed set of entries
struct FixedCommits {
    entries: Vec<CommitEntry>,
}

#[async_trait]
impl CommitSource for FixedCommits {
    async fn commits_between(
        &self,
        _from_ref: Option<&str>,
        _to_ref: &str,
    ) -> Result<Vec<CommitEntry>> {
        Ok(self.entries.clone())
    }
}

fn commits() -> Vec<CommitEntry> {
    vec![
        CommitEntry::new("a".repeat(40), "fix: crash on launch", Utc::now()),
        CommitEntry::new("b".repeat(40), "feat: dark mode", Utc::now()),
    ]
}

fn project_config() -> ProjectConfig {
    toml::from_str(
        r#"
            name = "demo"
            current_version = "1.4.2"
            targets = ["app-store", "play-store"]

            [app_store]
            project_dir = "."
            bundle_id = "com.example.demo"
            api_key_id = "KEY"
            api_issuer = "ISSUER"

            [play_store]
            project_dir = "."
            package_name = "com.example.demo"
            access_token = "token"
        "#,
    )
    .expect("test config")
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry_limit: 3,
        per_step_timeout: Duration::from_secs(5),
        backoff_base: Duration::from_millis(1),
        require_changelog_entries: false,
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<JsonFileStore>,
    app: MockProvider,
    play: MockProvider,
    orchestrator: Arc<ReleaseOrchestrator>,
}

impl Harness {
    /// A new orchestrator over the same store and providers, the way a
    /// separate process invocation would build one.
    fn fresh_orchestrator(&self) -> ReleaseOrchestrator {
        let mut providers: BTreeMap<ReleaseTarget, Arc<dyn AdapterProvider>> = BTreeMap::new();
        providers.insert(ReleaseTarget::AppStore, Arc::new(self.app.clone()));
        providers.insert(ReleaseTarget::PlayStore, Arc::new(self.play.clone()));
        ReleaseOrchestrator::new(
            self.store.clone(),
            Arc::new(FixedCommits { entries: commits() }),
            providers,
            fast_config(),
        )
    }
}

fn harness(app_script: UploadScript, play_script: UploadScript) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(JsonFileStore::new(dir.path()).expect("store"));

    let app = MockProvider::new(ReleaseTarget::AppStore, app_script);
    let play = MockProvider::new(ReleaseTarget::PlayStore, play_script);

    let mut providers: BTreeMap<ReleaseTarget, Arc<dyn AdapterProvider>> = BTreeMap::new();
    providers.insert(ReleaseTarget::AppStore, Arc::new(app.clone()));
    providers.insert(ReleaseTarget::PlayStore, Arc::new(play.clone()));

    let orchestrator = ReleaseOrchestrator::new(
        store.clone(),
        Arc::new(FixedCommits { entries: commits() }),
        providers,
        fast_config(),
    );

    Harness {
        _dir: dir,
        store,
        app,
        play,
        orchestrator: Arc::new(orchestrator),
    }
}

#[tokio::test]
async fn happy_path_completes_all_targets() {
    let h = harness(UploadScript::Succeed, UploadScript::Succeed);
    let record = h
        .orchestrator
        .start_release(&project_config(), BumpKind::Minor)
        .await
        .expect("release");

    assert_eq!(record.phase, ReleasePhase::Completed);
    assert_eq!(record.version.as_ref().map(|v| v.to_string()).as_deref(), Some("1.5.0"));
    assert!(record.finalized_at.is_some());
    for outcome in record.targets.values() {
        assert_eq!(outcome.state, TargetState::Succeeded);
        assert!(outcome.receipt.is_some());
    }

    // The changelog carries every commit.
    let changelog = record.changelog.as_ref().expect("changelog");
    assert_eq!(changelog.total_entries(), 2);

    // The persisted record matches what the orchestrator returned.
    let persisted = h.store.get(&record.id).await.expect("persisted");
    assert_eq!(persisted, record);
}

#[tokio::test]
async fn quota_failure_does_not_disturb_other_target() {
    let h = harness(UploadScript::Succeed, UploadScript::Quota);
    let record = h
        .orchestrator
        .start_release(&project_config(), BumpKind::Patch)
        .await
        .expect("release runs to finalization");

    assert_eq!(record.phase, ReleasePhase::PartiallyFailed);

    let app = &record.targets[&ReleaseTarget::AppStore];
    assert_eq!(app.state, TargetState::Succeeded);
    assert!(app.receipt.is_some());

    let play = &record.targets[&ReleaseTarget::PlayStore];
    assert_eq!(play.state, TargetState::Failed);
    assert!(play
        .error_detail
        .as_deref()
        .expect("detail")
        .contains("quota"));

    // Quota is terminal for the attempt, so no retries happened.
    assert_eq!(h.play.upload_calls(), 1);
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let h = harness(
        UploadScript::Succeed,
        UploadScript::TransientThenSucceed(2),
    );
    let record = h
        .orchestrator
        .start_release(&project_config(), BumpKind::Minor)
        .await
        .expect("release");

    assert_eq!(record.phase, ReleasePhase::Completed);
    assert_eq!(h.play.upload_calls(), 3);

    // Only the failed step is re-attempted; the artifact built once is kept.
    assert_eq!(h.play.build_calls(), 1);
    assert_eq!(h.play.signs_finished(), 1);

    let play = &record.targets[&ReleaseTarget::PlayStore];
    assert_eq!(play.state, TargetState::Succeeded);
    // One build, one sign, and three upload attempts.
    assert_eq!(play.attempts, 5);
}

#[tokio::test]
async fn transient_failures_beyond_retry_limit_fail_the_target() {
    let h = harness(
        UploadScript::Succeed,
        UploadScript::TransientThenSucceed(10),
    );
    let record = h
        .orchestrator
        .start_release(&project_config(), BumpKind::Minor)
        .await
        .expect("release runs to finalization");

    assert_eq!(record.phase, ReleasePhase::PartiallyFailed);
    // retry_limit of 3 means 1 initial attempt + 3 retries.
    assert_eq!(h.play.upload_calls(), 4);
    // Exhausting upload retries never rebuilds.
    assert_eq!(h.play.build_calls(), 1);
}

#[tokio::test]
async fn resume_redeploys_only_failed_targets() {
    let h = harness(UploadScript::Succeed, UploadScript::Rejected);
    let first = h
        .orchestrator
        .start_release(&project_config(), BumpKind::Minor)
        .await
        .expect("first attempt");
    assert_eq!(first.phase, ReleasePhase::PartiallyFailed);
    assert_eq!(h.app.upload_calls(), 1);

    let app_receipt = first.targets[&ReleaseTarget::AppStore]
        .receipt
        .clone()
        .expect("receipt");
    let changelog = first.changelog.clone().expect("changelog");

    h.play.set_script(UploadScript::Succeed);
    let resumed = h
        .orchestrator
        .resume_release(&first.id)
        .await
        .expect("resume");

    assert_eq!(resumed.phase, ReleasePhase::Completed);
    assert_eq!(resumed.id, first.id);
    assert_eq!(resumed.resume_count, 1);
    assert_eq!(resumed.version, first.version);

    // The changelog was reused verbatim, not re-synthesized.
    assert_eq!(resumed.changelog.as_ref(), Some(&changelog));

    // The succeeded target was not deployed again.
    assert_eq!(h.app.upload_calls(), 1);
    assert_eq!(h.app.build_calls(), 1);
    assert_eq!(
        resumed.targets[&ReleaseTarget::AppStore].receipt.as_ref(),
        Some(&app_receipt)
    );

    // The failed target went through a full second pass.
    assert_eq!(h.play.upload_calls(), 2);
    assert_eq!(
        resumed.targets[&ReleaseTarget::PlayStore].state,
        TargetState::Succeeded
    );
}

#[tokio::test]
async fn completed_release_cannot_be_resumed() {
    let h = harness(UploadScript::Succeed, UploadScript::Succeed);
    let record = h
        .orchestrator
        .start_release(&project_config(), BumpKind::Minor)
        .await
        .expect("release");
    assert_eq!(record.phase, ReleasePhase::Completed);

    let err = h
        .orchestrator
        .resume_release(&record.id)
        .await
        .expect_err("not resumable");
    assert!(matches!(err, ReleaseError::State(_)));
}

#[tokio::test]
async fn invalid_version_aborts_before_any_deploy() {
    let h = harness(UploadScript::Succeed, UploadScript::Succeed);
    let mut config = project_config();
    config.current_version = "not-a-version".to_string();

    let err = h
        .orchestrator
        .start_release(&config, BumpKind::Minor)
        .await
        .expect_err("abort");
    assert!(matches!(err, ReleaseError::Version(_)));

    // No adapter was ever invoked.
    assert_eq!(h.app.build_calls(), 0);
    assert_eq!(h.play.build_calls(), 0);

    // The aborted record is persisted for inspection.
    let ids = h.store.list().await.expect("list");
    assert_eq!(ids.len(), 1);
    let record = h.store.get(&ids[0]).await.expect("record");
    assert_eq!(record.phase, ReleasePhase::AbortedBeforeDeploy);
    assert!(record.targets.values().all(|o| o.state == TargetState::Queued));
}

#[tokio::test]
async fn empty_target_set_is_rejected_before_any_state_exists() {
    let h = harness(UploadScript::Succeed, UploadScript::Succeed);
    let mut config = project_config();
    config.targets.clear();

    let err = h
        .orchestrator
        .start_release(&config, BumpKind::Minor)
        .await
        .expect_err("invalid config");
    assert!(matches!(err, ReleaseError::Config(_)));

    // Validation failures leave no record behind.
    assert!(h.store.list().await.expect("list").is_empty());
}

#[tokio::test]
async fn cancellation_is_honored_at_step_boundaries_only() {
    let h = harness(UploadScript::Succeed, UploadScript::Succeed);
    h.app.set_sign_delay(Duration::from_millis(300));
    h.play.set_sign_delay(Duration::from_millis(300));

    let cancel = h.orchestrator.cancel_token();
    let task = tokio::spawn({
        let orchestrator = Arc::clone(&h.orchestrator);
        async move {
            orchestrator
                .start_release(&project_config(), BumpKind::Minor)
                .await
        }
    });

    // Cancel while both targets are mid-sign.
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let record = task
        .await
        .expect("join")
        .expect("release runs to finalization");

    // The in-flight sign step ran to completion; the next step never started.
    assert_eq!(h.app.signs_finished(), 1);
    assert_eq!(h.play.signs_finished(), 1);
    assert_eq!(h.app.upload_calls(), 0);
    assert_eq!(h.play.upload_calls(), 0);

    assert_eq!(record.phase, ReleasePhase::PartiallyFailed);
    for outcome in record.targets.values() {
        assert_eq!(outcome.state, TargetState::Failed);
        assert!(outcome
            .error_detail
            .as_deref()
            .expect("detail")
            .contains("upload"));
    }

    // The aborted release is resumable from a fresh invocation.
    let resumed = h
        .fresh_orchestrator()
        .resume_release(&record.id)
        .await
        .expect("resume");
    assert_eq!(resumed.phase, ReleasePhase::Completed);
    assert_eq!(h.app.upload_calls(), 1);
    assert_eq!(h.play.upload_calls(), 1);
}

#[tokio::test]
async fn releases_started_within_one_second_get_distinct_ids() {
    let h = harness(UploadScript::Succeed, UploadScript::Succeed);
    let config = project_config();

    let first = h
        .orchestrator
        .start_release(&config, BumpKind::Minor)
        .await
        .expect("first release");
    let second = h
        .orchestrator
        .start_release(&config, BumpKind::Minor)
        .await
        .expect("second release");

    assert_ne!(first.id, second.id);

    // Neither record overwrote the other.
    let ids = h.store.list().await.expect("list");
    assert_eq!(ids.len(), 2);
    assert_eq!(h.store.get(&first.id).await.expect("first").id, first.id);
    assert_eq!(h.store.get(&second.id).await.expect("second").id, second.id);
}

#[tokio::test]
async fn status_reflects_persisted_record() {
    let h = harness(UploadScript::Succeed, UploadScript::Succeed);
    let record = h
        .orchestrator
        .start_release(&project_config(), BumpKind::Prerelease)
        .await
        .expect("release");

    let status = h.orchestrator.get_status(&record.id).await.expect("status");
    assert_eq!(status, record);
    assert_eq!(
        status.version.map(|v| v.to_string()).as_deref(),
        Some("1.4.3-rc.1")
    );
}
