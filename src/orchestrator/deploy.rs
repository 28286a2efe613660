//! Concurrent per-target deployment.
//!
//! Each pending target gets its own task and a single adapter for the pass.
//! Transient failures retry only the step that failed, with capped
//! exponential backoff; terminal failures are recorded without disturbing
//! other targets. The shared record is persisted after every sub-state
//! change so a crash at any point leaves a resumable trail.

use crate::adapter::{AdapterProvider, ReleaseTarget, UploadReceipt};
use crate::changelog::Changelog;
use crate::config::OrchestratorConfig;
use crate::error::{ReleaseError, Result, StateError, TargetError};
use crate::record::{ReleaseRecord, TargetState};
use crate::store::RecordStore;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Upper bound on a single backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Deploy every pending target concurrently, then finalize the record.
///
/// Individual target failures land in the record as `Failed` outcomes;
/// only infrastructure failures (persistence, task panics) propagate as
/// errors, since the record could no longer be trusted afterwards.
pub(super) async fn deploy_all(
    store: Arc<dyn RecordStore>,
    providers: &BTreeMap<ReleaseTarget, Arc<dyn AdapterProvider>>,
    config: &OrchestratorConfig,
    cancel: CancellationToken,
    mut record: ReleaseRecord,
) -> Result<ReleaseRecord> {
    record.set_phase(crate::record::ReleasePhase::Deploying);
    store.put(&record).await?;

    let pending = record.pending_targets();
    let changelog = record
        .changelog
        .clone()
        .ok_or_else(|| StateError::Corrupted {
            reason: format!("release '{}' is deploying without a changelog", record.id),
        })?;

    let shared = Arc::new(Mutex::new(record));
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    for target in pending {
        let provider = match providers.get(&target) {
            Some(provider) => Arc::clone(provider),
            None => {
                // Providers were checked before the release started; a gap
                // here means the record named a target this binary cannot
                // serve, which must not silently succeed.
                let mut rec = shared.lock().await;
                rec.mark_failed(target, format!("no adapter available for {}", target));
                store.put(&rec).await?;
                continue;
            }
        };

        let shared = Arc::clone(&shared);
        let store = Arc::clone(&store);
        let config = config.clone();
        let cancel = cancel.clone();
        let changelog = changelog.clone();

        tasks.spawn(async move {
            run_target(target, provider, shared, store, config, cancel, changelog).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let task_result = joined.map_err(|e| StateError::SaveFailed {
            reason: format!("deploy task panicked: {}", e),
        })?;
        task_result?;
    }

    let mut record = shared.lock().await;
    record.finalize();
    store.put(&record).await?;
    log::info!("{}", record.summary());
    Ok(record.clone())
}

/// Drive one target to a terminal outcome and record it.
///
/// Store failures are recorded; persistence failures propagate.
async fn run_target(
    target: ReleaseTarget,
    provider: Arc<dyn AdapterProvider>,
    shared: Arc<Mutex<ReleaseRecord>>,
    store: Arc<dyn RecordStore>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
    changelog: Changelog,
) -> Result<()> {
    let result = deploy_target(
        target, &provider, &shared, &store, &config, &cancel, &changelog,
    )
    .await;

    let mut record = shared.lock().await;
    match result {
        Ok(receipt) => {
            log::info!("target {}: upload accepted as {}", target, receipt.reference);
            record.mark_succeeded(target, receipt);
        }
        Err(ReleaseError::Target(e)) => {
            log::error!("target {}: failed: {}", target, e);
            record.mark_failed(target, e.to_string());
        }
        Err(fatal) => return Err(fatal),
    }
    store.put(&record).await
}

/// One build/sign/upload pass with a single adapter for the whole pass.
///
/// A transient failure retries only the step that failed; artifacts from
/// steps that already succeeded are kept, so a flaky upload never rebuilds.
async fn deploy_target(
    target: ReleaseTarget,
    provider: &Arc<dyn AdapterProvider>,
    shared: &Arc<Mutex<ReleaseRecord>>,
    store: &Arc<dyn RecordStore>,
    config: &OrchestratorConfig,
    cancel: &CancellationToken,
    changelog: &Changelog,
) -> Result<UploadReceipt> {
    let adapter = provider.adapter();

    let artifact = run_step(
        target,
        shared,
        store,
        config,
        cancel,
        TargetState::Building,
        "build",
        || adapter.build(),
    )
    .await?;

    let signed = run_step(
        target,
        shared,
        store,
        config,
        cancel,
        TargetState::Signing,
        "sign",
        || adapter.sign(artifact.clone()),
    )
    .await?;

    let receipt = run_step(
        target,
        shared,
        store,
        config,
        cancel,
        TargetState::Uploading,
        "upload",
        || adapter.upload(signed.clone(), changelog),
    )
    .await?;

    Ok(receipt)
}

/// Drive one sub-state to completion, retrying transient failures in place.
///
/// Cancellation is checked before each attempt and during backoff; the
/// per-step deadline turns a hung tool into a transient timeout. Every
/// attempt re-records the sub-state so the attempt count in the record
/// reflects what actually ran.
#[allow(clippy::too_many_arguments)]
async fn run_step<T, F, Fut>(
    target: ReleaseTarget,
    shared: &Arc<Mutex<ReleaseRecord>>,
    store: &Arc<dyn RecordStore>,
    config: &OrchestratorConfig,
    cancel: &CancellationToken,
    state: TargetState,
    step: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, TargetError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        check_cancelled(cancel, step)?;
        persist_step(shared, store, target, state).await?;

        match timed(step, config.per_step_timeout, op()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_recoverable() && attempt <= config.retry_limit => {
                let delay = backoff_delay(config.backoff_base, attempt);
                log::warn!(
                    "target {}: {} attempt {} failed transiently ({}), retrying in {:?}",
                    target,
                    step,
                    attempt,
                    e,
                    delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(TargetError::Aborted {
                            step: "retry backoff".to_string(),
                        }
                        .into());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn check_cancelled(cancel: &CancellationToken, step: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(TargetError::Aborted {
            step: step.to_string(),
        }
        .into());
    }
    Ok(())
}

async fn persist_step(
    shared: &Arc<Mutex<ReleaseRecord>>,
    store: &Arc<dyn RecordStore>,
    target: ReleaseTarget,
    state: TargetState,
) -> Result<()> {
    let mut record = shared.lock().await;
    record.begin_step(target, state);
    store.put(&record).await
}

async fn timed<T, F>(step: &str, deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, TargetError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(ReleaseError::from),
        Err(_) => Err(TargetError::StepTimeout {
            step: step.to_string(),
            seconds: deadline.as_secs(),
        }
        .into()),
    }
}

/// Exponential backoff doubling per attempt, capped at [`MAX_BACKOFF`]
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}
