use derive_builder::Builder;

use crate::{
    config::{MigrationSettings, package::PackageUpdateSpec},
    error::{FleetbumpError, Result},
    updater::csproj::CSPROJ_EXTENSION,
};

#[derive(Debug, Builder)]
#[builder(setter(into), build_fn(private, name = "_build"))]
pub struct OrchestratorConfigParams {
    pub packages: Vec<PackageUpdateSpec>,
    #[builder(default)]
    pub allow_downgrade: bool,
    #[builder(default)]
    pub migrations: MigrationSettings,
}

impl OrchestratorConfigParamsBuilder {
    pub fn build(&self) -> Result<OrchestratorConfig> {
        let params = self._build().map_err(|e| {
            FleetbumpError::invalid_config(format!(
                "Failed to build orchestrator config: {}",
                e
            ))
        })?;
        OrchestratorConfig::new(params)
    }
}

/// Settings shared by every repository processed in a run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Packages applied to every repository, in order.
    pub packages: Vec<PackageUpdateSpec>,
    pub allow_downgrade: bool,
    /// Extension of the files holding package references.
    pub target_extension: String,
    pub migrations_enabled: bool,
    /// A failed migration rolls the whole repository back.
    pub strict_migrations: bool,
    /// Extension of the source files handed to the migration tool.
    pub migration_source_extension: String,
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigParamsBuilder {
        OrchestratorConfigParamsBuilder::default()
    }

    pub fn new(params: OrchestratorConfigParams) -> Result<Self> {
        if params.packages.is_empty() {
            return Err(FleetbumpError::invalid_config(
                "at least one package must be configured",
            ));
        }

        let source_extension = params
            .migrations
            .source_extension
            .trim_start_matches('.')
            .to_string();

        Ok(Self {
            packages: params.packages,
            allow_downgrade: params.allow_downgrade,
            target_extension: CSPROJ_EXTENSION.into(),
            migrations_enabled: params.migrations.enabled,
            strict_migrations: params.migrations.strict,
            migration_source_extension: source_extension,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_packages() {
        let result = OrchestratorConfig::builder()
            .packages(Vec::<PackageUpdateSpec>::new())
            .build();
        assert!(matches!(result, Err(FleetbumpError::InvalidConfig(_))));

        let result = OrchestratorConfig::builder().build();
        assert!(matches!(result, Err(FleetbumpError::InvalidConfig(_))));
    }

    #[test]
    fn normalizes_source_extension() {
        let config = OrchestratorConfig::builder()
            .packages(vec![PackageUpdateSpec::new("Serilog", "3.1.1")])
            .migrations(MigrationSettings {
                enabled: true,
                source_extension: ".cs".into(),
                ..Default::default()
            })
            .build()
            .unwrap();

        assert!(config.migrations_enabled);
        assert!(!config.strict_migrations);
        assert_eq!(config.migration_source_extension, "cs");
        assert_eq!(config.target_extension, "csproj");
    }
}
