//! The `release` command: start a new release end to end.

use super::{build_orchestrator, exit_code, install_cancel_handler, print_record};
use crate::cli::output::OutputManager;
use crate::config::ProjectConfig;
use crate::error::Result;
use crate::record::ReleasePhase;
use crate::version::BumpKind;
use std::collections::BTreeSet;
use std::path::Path;

/// Run a full release with the given bump policy and overrides
#[allow(clippy::too_many_arguments)]
pub async fn execute(
    config_path: &Path,
    bump: &str,
    targets: &[String],
    track: Option<&str>,
    rollout: Option<f64>,
    draft: bool,
    output: &OutputManager,
) -> Result<i32> {
    let bump: BumpKind = bump.parse().map_err(crate::error::ReleaseError::from)?;

    let mut config = ProjectConfig::load(config_path)?;
    let _ = output.verbose(&format!(
        "loaded configuration from {}",
        config_path.display()
    ));
    apply_overrides(&mut config, targets, track, rollout, draft)?;
    config.validate()?;

    let _ = output.info(&format!(
        "releasing '{}' from {} with a {} bump to {} target(s)",
        config.name,
        config.current_version,
        bump,
        config.targets.len()
    ));

    let orchestrator = build_orchestrator(&config)?;
    install_cancel_handler(&orchestrator);

    let record = orchestrator.start_release(&config, bump).await?;

    print_record(&record, output);
    if record.phase == ReleasePhase::PartiallyFailed {
        let _ = output.warn(&format!(
            "some targets failed; resume with: appship resume {}",
            record.id
        ));
    }
    Ok(exit_code(&record))
}

/// Fold CLI overrides into the loaded configuration.
///
/// `--target` replaces the configured target set; `--track`, `--rollout`,
/// and `--draft` only make sense when a Play section exists and are ignored
/// with a warning otherwise.
fn apply_overrides(
    config: &mut ProjectConfig,
    targets: &[String],
    track: Option<&str>,
    rollout: Option<f64>,
    draft: bool,
) -> Result<()> {
    if !targets.is_empty() {
        let parsed: BTreeSet<_> = targets
            .iter()
            .map(|t| t.parse())
            .collect::<std::result::Result<_, _>>()?;
        config.targets = parsed;
    }

    let play_overrides = track.is_some() || rollout.is_some() || draft;
    match config.play_store.as_mut() {
        Some(play) => {
            if let Some(track) = track {
                play.track = track.parse()?;
            }
            if let Some(percent) = rollout {
                play.rollout_percent = Some(percent);
            }
            if draft {
                play.draft = true;
            }
        }
        None if play_overrides => {
            log::warn!("play track overrides given but no [play_store] section is configured");
        }
        None => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ReleaseTarget, ReleaseTrack};

    fn config_with_play() -> ProjectConfig {
        toml::from_str(
            r#"
                name = "demo"
                current_version = "1.0.0"
                targets = ["app-store", "play-store"]

                [play_store]
                project_dir = "."
                package_name = "com.example.demo"
                access_token = "token"
            "#,
        )
        .expect("config")
    }

    #[test]
    fn target_override_replaces_set() {
        let mut config = config_with_play();
        apply_overrides(
            &mut config,
            &["play-store".to_string()],
            None,
            None,
            false,
        )
        .expect("overrides");
        assert_eq!(config.targets.len(), 1);
        assert!(config.targets.contains(&ReleaseTarget::PlayStore));
    }

    #[test]
    fn track_and_rollout_overrides_land_in_play_section() {
        let mut config = config_with_play();
        apply_overrides(&mut config, &[], Some("beta"), Some(25.0), false).expect("overrides");

        let play = config.play_store.as_ref().expect("play section");
        assert_eq!(play.track, ReleaseTrack::Beta);
        assert_eq!(play.rollout_percent, Some(25.0));
    }

    #[test]
    fn unknown_target_override_rejected() {
        let mut config = config_with_play();
        let result = apply_overrides(
            &mut config,
            &["windows-store".to_string()],
            None,
            None,
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn unknown_track_override_rejected() {
        let mut config = config_with_play();
        let result = apply_overrides(&mut config, &[], Some("canary"), None, false);
        assert!(result.is_err());
    }
}
