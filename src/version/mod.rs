//! Version resolution.
//!
//! Parses the current project version and applies a bump policy to produce
//! the next one. `resolve` is pure and deterministic: retrying a failed
//! release with the same inputs never double-bumps.

use crate::error::VersionError;
use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default prerelease tag used when the current version has none
const DEFAULT_PRERELEASE_TAG: &str = "rc";

/// Bump policy selecting which version component increments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpKind {
    /// Increment major, zero minor/patch, clear prerelease
    Major,
    /// Increment minor, zero patch
    Minor,
    /// Increment patch only
    Patch,
    /// Increment the prerelease counter; on a non-prerelease version this
    /// bumps patch and starts a fresh counter
    Prerelease,
}

impl FromStr for BumpKind {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "major" => Ok(BumpKind::Major),
            "minor" => Ok(BumpKind::Minor),
            "patch" => Ok(BumpKind::Patch),
            "prerelease" | "pre" => Ok(BumpKind::Prerelease),
            other => Err(VersionError::UnsupportedPolicy {
                policy: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for BumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BumpKind::Major => write!(f, "major"),
            BumpKind::Minor => write!(f, "minor"),
            BumpKind::Patch => write!(f, "patch"),
            BumpKind::Prerelease => write!(f, "prerelease"),
        }
    }
}

/// Parse a version string into a semantic version
pub fn parse_version(version: &str) -> Result<Version, VersionError> {
    Version::parse(version.trim()).map_err(|source| VersionError::InvalidFormat {
        version: version.to_string(),
        source,
    })
}

/// Apply a bump policy to the current version, producing the next one.
///
/// The result is always strictly greater than the input under semver
/// ordering. Build metadata is dropped on every bump since it does not
/// participate in ordering.
pub fn resolve(current: &Version, policy: BumpKind) -> Result<Version, VersionError> {
    let mut next = current.clone();
    next.build = BuildMetadata::EMPTY;

    match policy {
        BumpKind::Major => {
            next.major += 1;
            next.minor = 0;
            next.patch = 0;
            next.pre = Prerelease::EMPTY;
        }
        BumpKind::Minor => {
            next.minor += 1;
            next.patch = 0;
        }
        BumpKind::Patch => {
            next.patch += 1;
        }
        BumpKind::Prerelease => {
            // A prerelease sorts below its release, so starting a counter on
            // a non-prerelease version must also move patch forward.
            if current.pre.is_empty() {
                next.patch += 1;
            }
            next.pre = bump_prerelease(&current.pre)?;
        }
    }

    Ok(next)
}

/// Increment the trailing numeric segment of a prerelease component, or
/// start a fresh counter when there is none.
///
/// `1.2.3-rc.1` -> `rc.2`, `1.2.3-beta` -> `beta.1`, empty -> `rc.1`.
fn bump_prerelease(pre: &Prerelease) -> Result<Prerelease, VersionError> {
    let next = if pre.is_empty() {
        format!("{}.1", DEFAULT_PRERELEASE_TAG)
    } else {
        let mut segments: Vec<String> = pre.as_str().split('.').map(String::from).collect();
        match segments.last().and_then(|s| s.parse::<u64>().ok()) {
            Some(counter) => {
                let last = segments.len() - 1;
                segments[last] = (counter + 1).to_string();
                segments.join(".")
            }
            None => {
                segments.push("1".to_string());
                segments.join(".")
            }
        }
    };

    Prerelease::new(&next).map_err(|e| VersionError::InvalidPrerelease {
        component: next.clone(),
        reason: e.to_string(),
    })
}
