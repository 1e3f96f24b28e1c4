//! CLI argument parsing and configuration overrides.
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::{
    config::{Config, DEFAULT_CONFIG_FILE, package::PackageUpdateSpec},
    error::Result,
    strategy::StrategyKind,
};

/// Global CLI arguments shared by every subcommand.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(long, global = true)]
    /// Path to the configuration file. Defaults to fleetbump.toml.
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "", global = true)]
    /// GitLab access token. Falls back to the configured env var.
    pub token: String,

    #[arg(long, default_value_t = false, global = true)]
    /// Log every change instead of performing it.
    pub dry_run: bool,

    #[arg(long, default_value_t = false, global = true)]
    /// Enable debug logging.
    pub debug: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Update packages across repositories and open merge requests.
    Update(UpdateArgs),

    /// Refresh the state of every tracked merge request.
    Status,
}

#[derive(clap::Args, Debug, Default)]
pub struct UpdateArgs {
    #[arg(long = "package", value_name = "NAME@VERSION[:RULE_ID]")]
    /// Package to update; repeat for several. Replaces configured packages.
    pub packages: Vec<PackageUpdateSpec>,

    #[arg(long = "repository", value_name = "ID_OR_PATH")]
    /// Repository to process; repeat for several.
    pub repositories: Vec<String>,

    #[arg(long)]
    /// Process every project of this group.
    pub group: Option<String>,

    #[arg(long)]
    /// Process at most this many repositories.
    pub max_repositories: Option<usize>,

    #[arg(long, value_parser = parse_strategy)]
    /// Backend for repository changes: "api" or "local".
    pub strategy: Option<StrategyKind>,

    #[arg(long, default_value_t = false)]
    /// Run code migrations for updated packages.
    pub enable_migrations: bool,

    #[arg(long, default_value_t = false)]
    /// Roll back a repository when its migrations fail.
    pub strict_migrations: bool,

    #[arg(long, default_value_t = false)]
    /// Allow moving packages to a lower version.
    pub allow_downgrade: bool,

    #[arg(long)]
    /// Where to write the Markdown report.
    pub report_file: Option<PathBuf>,
}

fn parse_strategy(value: &str) -> std::result::Result<StrategyKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "api" => Ok(StrategyKind::Api),
        "local" => Ok(StrategyKind::Local),
        other => Err(format!("unknown strategy '{other}', use api or local")),
    }
}

impl Args {
    /// Loads the configuration file and applies command line overrides.
    pub fn load_config(&self) -> Result<Config> {
        let (path, required) = match &self.config {
            Some(path) => (path.as_path(), true),
            None => (Path::new(DEFAULT_CONFIG_FILE), false),
        };

        let mut config = Config::load(path, required)?;
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut Config) {
        config.dry_run |= self.dry_run;

        let Command::Update(update) = &self.command else {
            return;
        };

        if !update.packages.is_empty() {
            config.packages = update.packages.clone();
        }
        if !update.repositories.is_empty() {
            config.repositories = update.repositories.clone();
        }
        if update.group.is_some() {
            config.group = update.group.clone();
        }
        if update.max_repositories.is_some() {
            config.max_repositories = update.max_repositories;
        }
        if let Some(strategy) = update.strategy {
            config.strategy = strategy;
        }
        if let Some(report_file) = &update.report_file {
            config.report_file = report_file.clone();
        }
        config.migrations.enabled |= update.enable_migrations;
        config.migrations.strict |= update.strict_migrations;
        config.allow_downgrade |= update.allow_downgrade;
    }

    /// Token given on the command line, if any.
    pub fn token(&self) -> Option<&str> {
        Some(self.token.as_str()).filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_update_arguments() {
        let args = Args::try_parse_from([
            "fleetbump",
            "--dry-run",
            "update",
            "--package",
            "Newtonsoft.Json@13.0.3:newtonsoft-13",
            "--package",
            "Serilog@3.1.1",
            "--repository",
            "platform/orders-service",
            "--strategy",
            "local",
            "--enable-migrations",
        ])
        .unwrap();

        assert!(args.dry_run);
        let Command::Update(update) = &args.command else {
            panic!("expected update command");
        };
        assert_eq!(update.packages.len(), 2);
        assert_eq!(
            update.packages[0].migration_rule_id.as_deref(),
            Some("newtonsoft-13")
        );
        assert_eq!(update.strategy, Some(StrategyKind::Local));
        assert!(update.enable_migrations);
        assert!(!update.strict_migrations);
    }

    #[test]
    fn rejects_malformed_package() {
        assert!(
            Args::try_parse_from(["fleetbump", "update", "--package", "Serilog"])
                .is_err()
        );
        assert!(
            Args::try_parse_from(["fleetbump", "update", "--strategy", "ssh"])
                .is_err()
        );
    }

    #[test]
    fn overrides_config_values() {
        let args = Args::try_parse_from([
            "fleetbump",
            "update",
            "--package",
            "Serilog@3.1.1",
            "--group",
            "platform",
            "--strict-migrations",
            "--max-repositories",
            "3",
        ])
        .unwrap();

        let mut config = Config {
            packages: vec![PackageUpdateSpec::new("Polly", "8.2.0")],
            repositories: vec!["kept/when-not-overridden".into()],
            ..Default::default()
        };
        args.apply_overrides(&mut config);

        assert_eq!(config.packages, vec![PackageUpdateSpec::new("Serilog", "3.1.1")]);
        assert_eq!(config.repositories, vec!["kept/when-not-overridden"]);
        assert_eq!(config.group.as_deref(), Some("platform"));
        assert_eq!(config.max_repositories, Some(3));
        assert!(config.migrations.strict);
        assert!(!config.migrations.enabled);
        assert!(!config.dry_run);
    }

    #[test]
    fn status_keeps_config_packages() {
        let args = Args::try_parse_from(["fleetbump", "--dry-run", "status"]).unwrap();
        let mut config = Config {
            packages: vec![PackageUpdateSpec::new("Polly", "8.2.0")],
            ..Default::default()
        };
        args.apply_overrides(&mut config);

        assert!(config.dry_run);
        assert_eq!(config.packages.len(), 1);
        assert_eq!(args.token(), None);
    }
}
