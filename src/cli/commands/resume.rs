//! The `resume` command: pick up a partially failed release.

use super::{build_orchestrator, exit_code, install_cancel_handler, print_record};
use crate::cli::output::OutputManager;
use crate::config::ProjectConfig;
use crate::error::Result;
use crate::record::ReleasePhase;
use std::path::Path;

/// Resume the release with the given id, deploying only pending targets
pub async fn execute(config_path: &Path, id: &str, output: &OutputManager) -> Result<i32> {
    let config = ProjectConfig::load(config_path)?;
    let _ = output.verbose(&format!(
        "loaded configuration from {}",
        config_path.display()
    ));

    let _ = output.info(&format!("resuming release {}", id));

    let orchestrator = build_orchestrator(&config)?;
    install_cancel_handler(&orchestrator);

    let record = orchestrator.resume_release(id).await?;

    print_record(&record, output);
    if record.phase == ReleasePhase::PartiallyFailed {
        let _ = output.warn(&format!(
            "some targets still failing; resume again with: appship resume {}",
            record.id
        ));
    }
    Ok(exit_code(&record))
}
