use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::FleetbumpError;

/// A package to update in every processed repository.
///
/// ```toml
/// [[packages]]
/// name = "Newtonsoft.Json"
/// target_version = "13.0.3"
/// migration_rule_id = "newtonsoft-13"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageUpdateSpec {
    /// Package identifier, matched case-insensitively.
    pub name: String,
    /// Version every reference should end up at.
    #[serde(alias = "version")]
    pub target_version: String,
    /// Explicit migration configuration to run when this package changes.
    #[serde(default)]
    pub migration_rule_id: Option<String>,
}

impl PackageUpdateSpec {
    pub fn new(name: impl Into<String>, target_version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_version: target_version.into(),
            migration_rule_id: None,
        }
    }
}

/// Parses the command line form `NAME@VERSION` or `NAME@VERSION:RULE_ID`.
impl FromStr for PackageUpdateSpec {
    type Err = FleetbumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = s.split_once('@').ok_or_else(|| {
            FleetbumpError::InvalidArgs(format!(
                "package must be given as NAME@VERSION[:RULE_ID], got '{s}'"
            ))
        })?;

        let (version, rule) = match rest.split_once(':') {
            Some((version, rule)) => (version, Some(rule)),
            None => (rest, None),
        };

        let name = name.trim();
        let version = version.trim();
        if name.is_empty() || version.is_empty() {
            return Err(FleetbumpError::InvalidArgs(format!(
                "package name and version must not be empty: '{s}'"
            )));
        }

        Ok(Self {
            name: name.into(),
            target_version: version.into(),
            migration_rule_id: rule
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from),
        })
    }
}
