//! Read-only access to commit history.
//!
//! The orchestrator treats version control as an external collaborator that
//! supplies the commits between two release boundaries. [`GixCommitSource`]
//! is the production implementation, walking history with pure-Rust git.

use crate::changelog::CommitEntry;
use crate::error::{Result, VcsError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Supplies the commits between two refs, oldest first
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Commits reachable from `to_ref` but not from `from_ref`.
    ///
    /// `from_ref` of `None` means the walk covers all of `to_ref`'s history
    /// (first release). Entries are returned in chronological order and are
    /// already classified.
    async fn commits_between(
        &self,
        from_ref: Option<&str>,
        to_ref: &str,
    ) -> Result<Vec<CommitEntry>>;
}

/// Commit source backed by a local git repository
#[derive(Debug, Clone)]
pub struct GixCommitSource {
    repo_path: PathBuf,
}

impl GixCommitSource {
    /// Create a source for the repository at (or above) the given path
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Self {
        Self {
            repo_path: repo_path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl CommitSource for GixCommitSource {
    async fn commits_between(
        &self,
        from_ref: Option<&str>,
        to_ref: &str,
    ) -> Result<Vec<CommitEntry>> {
        let repo_path = self.repo_path.clone();
        let from_ref = from_ref.map(String::from);
        let to_ref = to_ref.to_string();

        let entries = tokio::task::spawn_blocking(move || {
            walk_range(&repo_path, from_ref.as_deref(), &to_ref)
        })
        .await
        .map_err(|e| VcsError::WalkFailed {
            reason: format!("Task join error: {}", e),
        })??;

        Ok(entries)
    }
}

fn walk_range(
    repo_path: &Path,
    from_ref: Option<&str>,
    to_ref: &str,
) -> std::result::Result<Vec<CommitEntry>, VcsError> {
    let repo = gix::discover(repo_path).map_err(|_| VcsError::RepositoryNotFound {
        path: repo_path.to_path_buf(),
    })?;

    let to_id = repo
        .rev_parse_single(to_ref)
        .map_err(|_| VcsError::ReferenceNotFound {
            reference: to_ref.to_string(),
        })?;

    let from_oid = match from_ref {
        Some(reference) => Some(
            repo.rev_parse_single(reference)
                .map_err(|_| VcsError::ReferenceNotFound {
                    reference: reference.to_string(),
                })?
                .detach(),
        ),
        None => None,
    };

    // Hiding the lower boundary excludes everything reachable from it, so
    // merged side branches that were already released never reappear.
    let mut platform = to_id.ancestors();
    if let Some(from_oid) = from_oid {
        platform = platform.with_hidden(Some(from_oid));
    }
    let walker = platform.all().map_err(|e| VcsError::WalkFailed {
        reason: format!("Failed to create commit walker: {}", e),
    })?;

    let mut entries = Vec::new();
    for commit_result in walker {
        let commit_info = commit_result.map_err(|e| VcsError::WalkFailed {
            reason: format!("Failed to advance commit walk: {}", e),
        })?;

        let commit = repo
            .find_commit(commit_info.id())
            .map_err(|e| VcsError::WalkFailed {
                reason: format!("Failed to find commit: {}", e),
            })?;

        let hash = commit.id().to_string();
        let message = commit.message_raw_sloppy().to_string();
        let seconds = commit
            .time()
            .map_err(|e| VcsError::WalkFailed {
                reason: format!("Failed to read commit time: {}", e),
            })?
            .seconds;
        let timestamp =
            chrono::DateTime::from_timestamp(seconds, 0).unwrap_or_else(chrono::Utc::now);

        entries.push(CommitEntry::new(hash, &message, timestamp));
    }

    // The walk yields newest-first; the changelog wants chronological order.
    entries.reverse();
    Ok(entries)
}
