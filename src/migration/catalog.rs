//! Catalog of migration configurations keyed by package and version
//! change.
use log::*;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fs, path::Path};

use crate::{
    error::{FleetbumpError, Result},
    migration::rules::MigrationRule,
    version::PackageVersion,
};

/// Upper bound used by range conditions without `max_version`.
pub const DEFAULT_RANGE_MAX: &str = "999.999.999";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Target version equals `version`.
    Exact,
    /// Crosses `version` upwards: old <= version < new.
    GreaterThan,
    /// Reaches `version`: old < version <= new.
    GreaterThanOrEqual,
    /// Target version within `version..=max_version`.
    Range,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<String>,
}

impl VersionCondition {
    fn matches(&self, old: &PackageVersion, new: &PackageVersion) -> Result<bool> {
        let bound = PackageVersion::parse(&self.version)?;
        Ok(match self.kind {
            ConditionKind::Exact => new.cmp(&bound) == Ordering::Equal,
            ConditionKind::GreaterThan => new > &bound && old <= &bound,
            ConditionKind::GreaterThanOrEqual => new >= &bound && old < &bound,
            ConditionKind::Range => {
                let max = PackageVersion::parse(
                    self.max_version.as_deref().unwrap_or(DEFAULT_RANGE_MAX),
                )?;
                &bound <= new && new <= &max
            }
            ConditionKind::Unknown => false,
        })
    }
}

/// Rules to run when a package moves across certain versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfiguration {
    pub id: String,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version_conditions: Vec<VersionCondition>,
    #[serde(default)]
    pub rules: Vec<MigrationRule>,
}

impl MigrationConfiguration {
    /// Whether this configuration applies to moving from `old_version` to
    /// `new_version`. Unparsable versions never match.
    pub fn is_applicable(&self, old_version: &str, new_version: &str) -> bool {
        let versions = PackageVersion::parse(old_version)
            .and_then(|old| Ok((old, PackageVersion::parse(new_version)?)));

        let (old, new) = match versions {
            Ok(versions) => versions,
            Err(err) => {
                warn!(
                    "migration {}: cannot compare {old_version} -> {new_version}: {err}",
                    self.id
                );
                return false;
            }
        };

        self.version_conditions.iter().any(|condition| {
            condition.matches(&old, &new).unwrap_or_else(|err| {
                warn!("migration {}: invalid condition: {err}", self.id);
                false
            })
        })
    }

    fn is_for_package(&self, package_name: &str) -> bool {
        self.package_name.eq_ignore_ascii_case(package_name)
    }
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    migrations: Vec<MigrationConfiguration>,
}

/// Every known migration configuration, in file order.
#[derive(Debug, Clone, Default)]
pub struct MigrationCatalog {
    migrations: Vec<MigrationConfiguration>,
}

impl MigrationCatalog {
    pub fn new(migrations: Vec<MigrationConfiguration>) -> Self {
        Self { migrations }
    }

    /// Loads a catalog from a `.json` or `.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            FleetbumpError::invalid_config(format!(
                "failed to read migration config {}: {err}",
                path.display()
            ))
        })?;

        let file: CatalogFile =
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                _ => serde_json::from_str(&content)?,
            };

        info!(
            "loaded {} migration configurations from {}",
            file.migrations.len(),
            path.display()
        );

        Ok(Self::new(file.migrations))
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn get_by_id(&self, id: &str) -> Option<&MigrationConfiguration> {
        self.migrations.iter().find(|m| m.id == id)
    }

    /// Configurations for `package_name` whose version conditions match.
    pub fn get_applicable_migrations(
        &self,
        package_name: &str,
        old_version: &str,
        new_version: &str,
    ) -> Vec<&MigrationConfiguration> {
        self.migrations
            .iter()
            .filter(|m| m.is_for_package(package_name))
            .filter(|m| m.is_applicable(old_version, new_version))
            .collect()
    }

    /// Configurations for `package_name` with the given id, regardless of
    /// version conditions.
    pub fn get_migrations_by_package_and_rule_id(
        &self,
        package_name: &str,
        rule_id: &str,
    ) -> Vec<&MigrationConfiguration> {
        self.migrations
            .iter()
            .filter(|m| m.is_for_package(package_name) && m.id == rule_id)
            .collect()
    }

    /// Every problem found in the catalog; empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = vec![];

        for migration in &self.migrations {
            let id = &migration.id;

            if migration.package_name.trim().is_empty() {
                problems.push(format!("migration {id}: package_name is required"));
            }
            if migration.version_conditions.is_empty() {
                problems
                    .push(format!("migration {id}: version_conditions is required"));
            }
            if migration.rules.is_empty() {
                problems.push(format!("migration {id}: rules is required"));
            }

            for condition in &migration.version_conditions {
                if condition.kind == ConditionKind::Unknown {
                    problems.push(format!(
                        "migration {id}: unknown version condition type"
                    ));
                }
                let versions = std::iter::once(condition.version.as_str())
                    .chain(condition.max_version.as_deref());
                for version in versions {
                    if PackageVersion::parse(version).is_err() {
                        problems.push(format!(
                            "migration {id}: invalid version format: {version}"
                        ));
                    }
                }
            }

            for (i, rule) in migration.rules.iter().enumerate() {
                if rule.name.trim().is_empty() {
                    problems.push(format!("migration {id}, rule {i}: name is required"));
                }
                if rule.target_nodes.is_empty() {
                    problems.push(format!(
                        "migration {id}, rule {i}: target_nodes is required"
                    ));
                }
                if rule.action.action_type.trim().is_empty() {
                    problems.push(format!(
                        "migration {id}, rule {i}: action.type is required"
                    ));
                }
            }
        }

        problems
    }
}
