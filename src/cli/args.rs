//! Command line argument parsing and validation.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Release orchestration for mobile app stores
#[derive(Parser, Debug)]
#[command(
    name = "appship",
    version,
    about = "Release orchestration for mobile app stores",
    long_about = "Resolve the next version, synthesize a changelog from commit \
history, and deploy to the App Store and Play Store with durable, resumable \
release state.

Usage:
  appship release minor
  appship release patch --target play-store --track beta
  appship resume demo-20260830-120000
  appship status demo-20260830-120000"
)]
pub struct Args {
    /// Path to the project configuration file
    #[arg(short, long, global = true, default_value = "appship.toml")]
    pub config: PathBuf,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a new release with the given bump policy
    Release {
        /// Bump policy: major, minor, patch, or prerelease
        #[arg(value_name = "BUMP")]
        bump: String,

        /// Deploy only to these targets instead of the configured set
        #[arg(long = "target", value_name = "TARGET")]
        targets: Vec<String>,

        /// Play track override: internal, alpha, beta, or production
        #[arg(long, value_name = "TRACK")]
        track: Option<String>,

        /// Play staged rollout percentage override
        #[arg(long, value_name = "PERCENT")]
        rollout: Option<f64>,

        /// Create the Play release as a draft
        #[arg(long)]
        draft: bool,
    },

    /// Resume a partially failed release under its original id
    Resume {
        /// Release id to resume
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Show the current state of a release
    Status {
        /// Release id to inspect
        #[arg(value_name = "ID")]
        id: String,
    },

    /// List all known releases
    List,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
