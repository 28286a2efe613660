//! Changelog synthesis from commit history.
//!
//! Groups commits by conventional-commit category between two version
//! boundaries. Synthesis is idempotent: the same commit range and version
//! always render to byte-identical output, which is what makes release
//! retries and resumes safe.

use crate::error::ChangelogError;
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Commit category derived from the conventional-commit message prefix
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CommitCategory {
    /// Breaking change (`feat!:` / `fix!:` prefix or `BREAKING CHANGE` trailer)
    Breaking,
    /// New feature (`feat:` prefix)
    Feature,
    /// Bug fix (`fix:` prefix)
    Fix,
    /// Catch-all for everything else; commits are never dropped
    Chore,
}

impl CommitCategory {
    /// Section heading used when rendering
    pub fn heading(&self) -> &'static str {
        match self {
            CommitCategory::Breaking => "Breaking Changes",
            CommitCategory::Feature => "Features",
            CommitCategory::Fix => "Bug Fixes",
            CommitCategory::Chore => "Other Changes",
        }
    }

    /// Fixed rendering order of sections
    pub const ORDERED: [CommitCategory; 4] = [
        CommitCategory::Breaking,
        CommitCategory::Feature,
        CommitCategory::Fix,
        CommitCategory::Chore,
    ];
}

impl fmt::Display for CommitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitCategory::Breaking => write!(f, "breaking"),
            CommitCategory::Feature => write!(f, "feature"),
            CommitCategory::Fix => write!(f, "fix"),
            CommitCategory::Chore => write!(f, "chore"),
        }
    }
}

/// Classify a commit message using the conventional-commit prefix rule.
///
/// A `!` before the colon (`feat!:`) or a `BREAKING CHANGE` trailer anywhere
/// in the message marks a breaking change regardless of type.
pub fn classify(message: &str) -> CommitCategory {
    if message.contains("BREAKING CHANGE") || message.contains("BREAKING-CHANGE") {
        return CommitCategory::Breaking;
    }

    let summary = message.lines().next().unwrap_or("");
    let prefix = match summary.split_once(':') {
        Some((prefix, _)) => prefix.trim(),
        None => return CommitCategory::Chore,
    };

    if prefix.ends_with('!') {
        return CommitCategory::Breaking;
    }

    // Strip an optional scope: "feat(ios)" -> "feat"
    let kind = prefix.split('(').next().unwrap_or(prefix);
    match kind {
        "feat" | "feature" => CommitCategory::Feature,
        "fix" | "bugfix" => CommitCategory::Fix,
        _ => CommitCategory::Chore,
    }
}

/// A single commit sourced from history between two version boundaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    /// Full commit hash
    pub hash: String,
    /// First line of the commit message
    pub message: String,
    /// Category derived from the message
    pub category: CommitCategory,
    /// Author timestamp
    pub timestamp: DateTime<Utc>,
}

impl CommitEntry {
    /// Create an entry, classifying it from the full commit message.
    ///
    /// Only the summary line is stored; the full message is consulted for
    /// the `BREAKING CHANGE` trailer before being discarded.
    pub fn new(hash: impl Into<String>, message: &str, timestamp: DateTime<Utc>) -> Self {
        let category = classify(message);
        let summary = message.lines().next().unwrap_or("").trim().to_string();
        Self {
            hash: hash.into(),
            message: summary,
            category,
            timestamp,
        }
    }
}

/// A group of commits sharing one category, in chronological order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogSection {
    /// Category of every entry in this section
    pub category: CommitCategory,
    /// Entries in chronological commit order
    pub entries: Vec<CommitEntry>,
}

/// Ordered grouping of commits associated with exactly one version.
///
/// Append-only once finalized: the orchestrator stores the synthesized
/// changelog in the release record and reuses it verbatim on resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changelog {
    /// Version this changelog belongs to
    pub version: Version,
    /// Previous version boundary, if any
    pub from_version: Option<Version>,
    /// Non-empty sections in fixed category order
    pub sections: Vec<ChangelogSection>,
}

/// Options controlling synthesis behavior
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SynthesizeOptions {
    /// Fail with `EmptyRange` when the commit range has no entries
    pub require_entries: bool,
}

/// Derive a structured changelog from a commit range.
///
/// Every commit lands in exactly one section; unmatched messages fall into
/// the `chore` catch-all. Ordering within a section preserves the input
/// (chronological) order.
pub fn synthesize(
    from_version: Option<&Version>,
    to_version: &Version,
    commits: &[CommitEntry],
    options: &SynthesizeOptions,
) -> Result<Changelog, ChangelogError> {
    if commits.is_empty() && options.require_entries {
        return Err(ChangelogError::EmptyRange {
            from: from_version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "start".to_string()),
            to: to_version.to_string(),
        });
    }

    let mut sections = Vec::new();
    for category in CommitCategory::ORDERED {
        let entries: Vec<CommitEntry> = commits
            .iter()
            .filter(|c| c.category == category)
            .cloned()
            .collect();
        if !entries.is_empty() {
            sections.push(ChangelogSection { category, entries });
        }
    }

    Ok(Changelog {
        version: to_version.clone(),
        from_version: from_version.cloned(),
        sections,
    })
}

impl Changelog {
    /// Total number of entries across all sections
    pub fn total_entries(&self) -> usize {
        self.sections.iter().map(|s| s.entries.len()).sum()
    }

    /// Entries for one category, if the section exists
    pub fn section(&self, category: CommitCategory) -> Option<&ChangelogSection> {
        self.sections.iter().find(|s| s.category == category)
    }

    /// Render the changelog as markdown.
    ///
    /// Output is deterministic: identical inputs produce byte-identical text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("## {}\n", self.version));
        if let Some(from) = &self.from_version {
            out.push_str(&format!("\nChanges since {}.\n", from));
        }

        if self.sections.is_empty() {
            out.push_str("\nNo changes recorded.\n");
            return out;
        }

        for section in &self.sections {
            out.push_str(&format!("\n### {}\n\n", section.category.heading()));
            for entry in &section.entries {
                let short = if entry.hash.len() >= 7 {
                    &entry.hash[..7]
                } else {
                    entry.hash.as_str()
                };
                out.push_str(&format!("- {} ({})\n", entry.message, short));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("test timestamp")
    }

    fn v(s: &str) -> Version {
        Version::parse(s).expect("test version")
    }

    #[test]
    fn classification_rules() {
        assert_eq!(classify("feat: dark mode"), CommitCategory::Feature);
        assert_eq!(classify("feat(ios): widgets"), CommitCategory::Feature);
        assert_eq!(classify("fix: crash on launch"), CommitCategory::Fix);
        assert_eq!(classify("feat!: new storage format"), CommitCategory::Breaking);
        assert_eq!(
            classify("refactor: move code\n\nBREAKING CHANGE: api removed"),
            CommitCategory::Breaking
        );
        assert_eq!(classify("docs: update readme"), CommitCategory::Chore);
        assert_eq!(classify("no prefix at all"), CommitCategory::Chore);
    }

    #[test]
    fn spec_example_groups_fix_and_feature() {
        let commits = vec![
            CommitEntry::new("a1b2c3d4e5", "fix: crash on launch", ts(0)),
            CommitEntry::new("f6e5d4c3b2", "feat: dark mode", ts(1)),
        ];
        let log = synthesize(None, &v("1.5.0"), &commits, &SynthesizeOptions::default())
            .expect("synthesize");

        let fixes = log.section(CommitCategory::Fix).expect("fix section");
        let features = log.section(CommitCategory::Feature).expect("feature section");
        assert_eq!(fixes.entries.len(), 1);
        assert_eq!(features.entries.len(), 1);
        assert_eq!(fixes.entries[0].message, "fix: crash on launch");
        assert_eq!(features.entries[0].message, "feat: dark mode");
    }

    #[test]
    fn no_commit_is_dropped() {
        let commits: Vec<CommitEntry> = [
            "feat: one",
            "fix: two",
            "chore: three",
            "something unclassifiable",
            "feat!: five",
            "docs: six",
        ]
        .iter()
        .enumerate()
        .map(|(i, m)| CommitEntry::new(format!("hash{}", i), m, ts(i as i64)))
        .collect();

        let log = synthesize(None, &v("2.0.0"), &commits, &SynthesizeOptions::default())
            .expect("synthesize");
        assert_eq!(log.total_entries(), commits.len());
    }

    #[test]
    fn chronological_order_preserved_within_category() {
        let commits = vec![
            CommitEntry::new("h1", "fix: first", ts(0)),
            CommitEntry::new("h2", "feat: middle", ts(1)),
            CommitEntry::new("h3", "fix: second", ts(2)),
        ];
        let log = synthesize(None, &v("1.0.1"), &commits, &SynthesizeOptions::default())
            .expect("synthesize");
        let fixes = log.section(CommitCategory::Fix).expect("fix section");
        assert_eq!(fixes.entries[0].hash, "h1");
        assert_eq!(fixes.entries[1].hash, "h3");
    }

    #[test]
    fn synthesis_is_idempotent() {
        let commits = vec![
            CommitEntry::new("aaaaaaaaaa", "feat: thing", ts(0)),
            CommitEntry::new("bbbbbbbbbb", "fix: other thing", ts(1)),
        ];
        let opts = SynthesizeOptions::default();
        let a = synthesize(Some(&v("1.4.2")), &v("1.5.0"), &commits, &opts).expect("synthesize");
        let b = synthesize(Some(&v("1.4.2")), &v("1.5.0"), &commits, &opts).expect("synthesize");
        assert_eq!(a, b);
        assert_eq!(a.render(), b.render());
    }

    #[test]
    fn empty_range_valid_by_default() {
        let log = synthesize(None, &v("1.0.1"), &[], &SynthesizeOptions::default())
            .expect("synthesize");
        assert_eq!(log.total_entries(), 0);
        assert!(log.render().contains("No changes recorded"));
    }

    #[test]
    fn empty_range_rejected_when_required() {
        let opts = SynthesizeOptions {
            require_entries: true,
        };
        let err = synthesize(Some(&v("1.0.0")), &v("1.0.1"), &[], &opts).expect_err("should fail");
        assert!(matches!(err, ChangelogError::EmptyRange { .. }));
    }

    #[test]
    fn render_uses_short_hashes() {
        let commits = vec![CommitEntry::new(
            "0123456789abcdef",
            "fix: crash on launch",
            ts(0),
        )];
        let log = synthesize(None, &v("1.0.1"), &commits, &SynthesizeOptions::default())
            .expect("synthesize");
        assert!(log.render().contains("(0123456)"));
    }
}
