//! The `status` and `list` commands: inspect persisted release records.

use super::print_record;
use crate::cli::output::OutputManager;
use crate::config::ProjectConfig;
use crate::error::Result;
use crate::store::{JsonFileStore, RecordStore};
use std::path::Path;

/// Show the current state of one release
pub async fn execute(config_path: &Path, id: &str, output: &OutputManager) -> Result<i32> {
    let config = ProjectConfig::load(config_path)?;
    let store = JsonFileStore::new(&config.state_dir)?;

    let record = store.get(id).await?;
    print_record(&record, output);

    if let Some(changelog) = &record.changelog {
        if output.is_verbose() {
            let _ = output.section("Changelog");
            let _ = output.println(&changelog.render());
        }
    }

    Ok(0)
}

/// List all known releases with a one-line summary each
pub async fn execute_list(config_path: &Path, output: &OutputManager) -> Result<i32> {
    let config = ProjectConfig::load(config_path)?;
    let store = JsonFileStore::new(&config.state_dir)?;

    let ids = store.list().await?;
    if ids.is_empty() {
        let _ = output.println("No releases recorded.");
        return Ok(0);
    }

    for id in ids {
        match store.get(&id).await {
            Ok(record) => {
                let _ = output.println(&record.summary());
            }
            Err(e) => {
                let _ = output.warn(&format!("{}: unreadable record ({})", id, e));
            }
        }
    }

    Ok(0)
}
