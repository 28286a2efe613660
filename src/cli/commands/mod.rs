//! Command execution.
//!
//! Each command builds its collaborators from the project configuration:
//! the JSON record store, the git commit source, and one adapter provider
//! per configured target.

mod release;
mod resume;
mod status;

use super::args::{Args, Command};
use super::output::OutputManager;
use crate::adapter::{AdapterProvider, AppStoreProvider, PlayStoreProvider, ReleaseTarget};
use crate::config::ProjectConfig;
use crate::error::{ConfigError, Result};
use crate::orchestrator::ReleaseOrchestrator;
use crate::record::{ReleasePhase, ReleaseRecord, TargetState};
use crate::store::JsonFileStore;
use crate::vcs::GixCommitSource;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Execute the parsed command, returning the process exit code
pub async fn execute_command(args: Args) -> Result<i32> {
    let output = OutputManager::new(args.verbose, args.quiet);

    match args.command {
        Command::Release {
            bump,
            targets,
            track,
            rollout,
            draft,
        } => {
            release::execute(
                &args.config,
                &bump,
                &targets,
                track.as_deref(),
                rollout,
                draft,
                &output,
            )
            .await
        }
        Command::Resume { id } => resume::execute(&args.config, &id, &output).await,
        Command::Status { id } => status::execute(&args.config, &id, &output).await,
        Command::List => status::execute_list(&args.config, &output).await,
    }
}

/// Build an orchestrator from a validated project configuration
fn build_orchestrator(config: &ProjectConfig) -> Result<ReleaseOrchestrator> {
    let store = Arc::new(JsonFileStore::new(&config.state_dir)?);
    let commits = Arc::new(GixCommitSource::new("."));

    let mut providers: BTreeMap<ReleaseTarget, Arc<dyn AdapterProvider>> = BTreeMap::new();
    for target in &config.targets {
        match target {
            ReleaseTarget::AppStore => {
                let section = config.app_store.clone().ok_or_else(|| {
                    ConfigError::MissingTargetSection {
                        target: target.to_string(),
                        section: "app_store".to_string(),
                    }
                })?;
                providers.insert(*target, Arc::new(AppStoreProvider::new(section)));
            }
            ReleaseTarget::PlayStore => {
                let section = config.play_store.clone().ok_or_else(|| {
                    ConfigError::MissingTargetSection {
                        target: target.to_string(),
                        section: "play_store".to_string(),
                    }
                })?;
                providers.insert(*target, Arc::new(PlayStoreProvider::new(section)));
            }
        }
    }

    Ok(ReleaseOrchestrator::new(
        store,
        commits,
        providers,
        config.orchestrator_config(),
    ))
}

/// Cancel in-flight deployments on Ctrl-C
fn install_cancel_handler(orchestrator: &ReleaseOrchestrator) {
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, aborting at the next step boundary");
            cancel.cancel();
        }
    });
}

/// Print the final state of a release record
fn print_record(record: &ReleaseRecord, output: &OutputManager) {
    let _ = output.section(&format!("Release {}", record.id));
    if let Some(version) = &record.version {
        let _ = output.println(&format!("Version:  {}", version));
    }
    let _ = output.println(&format!("Phase:    {}", record.phase));
    if record.resume_count > 0 {
        let _ = output.println(&format!("Resumes:  {}", record.resume_count));
    }

    for outcome in record.targets.values() {
        match outcome.state {
            TargetState::Succeeded => {
                let reference = outcome
                    .receipt
                    .as_ref()
                    .map(|r| r.reference.as_str())
                    .unwrap_or("-");
                let _ = output.success(&format!("{}: succeeded ({})", outcome.target, reference));
            }
            TargetState::Failed => {
                let detail = outcome.error_detail.as_deref().unwrap_or("unknown failure");
                output.error(&format!(
                    "{}: failed after {} step attempt(s): {}",
                    outcome.target, outcome.attempts, detail
                ));
            }
            other => {
                let _ = output.println(&format!("{}: {}", outcome.target, other));
            }
        }
    }
}

/// Map a finalized record to the process exit code
fn exit_code(record: &ReleaseRecord) -> i32 {
    match record.phase {
        ReleasePhase::Completed => 0,
        _ => 1,
    }
}
