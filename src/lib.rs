//! # Appship
//!
//! Release orchestration for mobile app stores.
//!
//! This crate drives one release attempt end to end: resolve the next
//! version from a bump policy, synthesize a changelog from commit history,
//! and deploy to the App Store and Play Store concurrently while persisting
//! a durable release record after every state change.
//!
//! ## Features
//!
//! - **Deterministic versioning**: pure semver bump policies that never
//!   double-bump on retry
//! - **Changelog synthesis**: conventional-commit grouping, byte-identical
//!   output for identical inputs
//! - **Concurrent deployment**: one task per store, no shared mutable state
//!   between adapters
//! - **Durable records**: every state change hits disk before the next step
//! - **Resume capability**: partially failed releases pick up under the
//!   same id without re-uploading what already succeeded
//! - **Git integration**: pure Rust history walking using gix
//!
//! ## Usage
//!
//! ```bash
//! appship release minor                          # Version bump and deploy
//! appship release patch --target play-store      # Single-target deploy
//! appship resume demo-20260830-120000            # Retry failed targets
//! appship status demo-20260830-120000            # Inspect a release
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Core modules
pub mod adapter;
pub mod changelog;
pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod record;
pub mod store;
pub mod vcs;
pub mod version;

// Re-export main types for public API
pub use adapter::{AdapterProvider, ReleaseTarget, TargetAdapter, UploadReceipt};
pub use changelog::{Changelog, CommitCategory, CommitEntry};
pub use config::{OrchestratorConfig, ProjectConfig};
pub use error::{ReleaseError, Result, TargetError};
pub use orchestrator::ReleaseOrchestrator;
pub use record::{ReleasePhase, ReleaseRecord, TargetState};
pub use store::{JsonFileStore, RecordStore};
pub use vcs::{CommitSource, GixCommitSource};
pub use version::BumpKind;
