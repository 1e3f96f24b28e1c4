//! Lenient package version parsing.
//!
//! Package versions in the wild are often not strict semver: "2.1",
//! "6.0.0.1" and "v1.2.3" all appear in project files. They are
//! normalised into a semver core plus an optional fourth revision number.
use std::{cmp::Ordering, fmt};

use crate::error::Result;

/// Comparable package version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageVersion {
    version: semver::Version,
    revision: u64,
}

impl PackageVersion {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
        let (core, suffix) = trimmed.split_at(split_at);

        let parts: Vec<&str> = core.split('.').collect();
        let numbers: Option<Vec<u64>> =
            parts.iter().map(|p| p.parse::<u64>().ok()).collect();

        let (normalized, revision) = match numbers {
            Some(n) if (1..=4).contains(&n.len()) => {
                let get = |i: usize| n.get(i).copied().unwrap_or(0);
                (format!("{}.{}.{}{suffix}", get(0), get(1), get(2)), get(3))
            }
            // let semver produce the error for anything else
            _ => (trimmed.to_string(), 0),
        };

        Ok(Self {
            version: semver::Version::parse(&normalized)?,
            revision,
        })
    }

    pub fn is_prerelease(&self) -> bool {
        !self.version.pre.is_empty()
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = &self.version;
        let rhs = &other.version;
        (lhs.major, lhs.minor, lhs.patch, self.revision)
            .cmp(&(rhs.major, rhs.minor, rhs.patch, other.revision))
            .then_with(|| lhs.pre.cmp(&rhs.pre))
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = &self.version;
        write!(f, "{}.{}.{}", v.major, v.minor, v.patch)?;
        if self.revision > 0 {
            write!(f, ".{}", self.revision)?;
        }
        if !v.pre.is_empty() {
            write!(f, "-{}", v.pre)?;
        }
        Ok(())
    }
}

/// Compares two raw version strings, None when either does not parse.
pub fn compare(lhs: &str, rhs: &str) -> Option<Ordering> {
    let lhs = PackageVersion::parse(lhs).ok()?;
    let rhs = PackageVersion::parse(rhs).ok()?;
    Some(lhs.cmp(&rhs))
}
