//! Configuration loading and parsing for `fleetbump.toml` files.
//!
//! Every table is optional; missing values fall back to defaults and the
//! command line overrides a few of them.
use secrecy::SecretString;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

use crate::{
    error::{FleetbumpError, Result},
    forge::config::{
        DEFAULT_BURST_LIMIT, DEFAULT_REQUEST_TIMEOUT_SECS,
        DEFAULT_REQUESTS_PER_MINUTE, RateLimitConfig, RemoteConfig,
        RetryConfig,
    },
    migration::gateway::ToolSettings,
    strategy::StrategyKind,
};

pub mod package;

use package::PackageUpdateSpec;

/// Default configuration filename.
pub const DEFAULT_CONFIG_FILE: &str = "fleetbump.toml";
/// Environment variable holding the access token unless configured.
pub const DEFAULT_TOKEN_ENV: &str = "GITLAB_TOKEN";
pub const DEFAULT_REPORT_FILE: &str = "fleetbump-report.md";
pub const DEFAULT_TRACKING_FILE: &str = "fleetbump-tracking.json";

/// `[remote]`: where the GitLab instance is and how hard to hit it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Base url of the instance.
    pub url: String,
    /// Environment variable the access token is read from.
    pub token_env: String,
    pub request_timeout_secs: u64,
    pub requests_per_minute: u32,
    pub burst_limit: u32,
    pub verify_ssl: bool,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            url: "https://gitlab.com".into(),
            token_env: DEFAULT_TOKEN_ENV.into(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            burst_limit: DEFAULT_BURST_LIMIT,
            verify_ssl: true,
        }
    }
}

/// `[retry]`: backoff policy for failed requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Waits longer than this ask for confirmation first.
    pub confirm_threshold_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            max_retries: retry.max_retries,
            base_delay_secs: retry.base_delay.as_secs(),
            max_delay_secs: retry.max_delay.as_secs(),
            confirm_threshold_secs: retry.confirm_threshold.as_secs(),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_secs(settings.base_delay_secs),
            max_delay: Duration::from_secs(settings.max_delay_secs),
            confirm_threshold: Duration::from_secs(
                settings.confirm_threshold_secs,
            ),
        }
    }
}

/// `[migrations]`: whether and how code migrations follow package
/// updates.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    pub enabled: bool,
    /// Roll the repository back when migrations fail.
    pub strict: bool,
    /// Catalog of migration configurations (`.toml` or `.json`).
    pub config_file: Option<PathBuf>,
    /// Extension of the source files handed to the tool.
    pub source_extension: String,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            strict: false,
            config_file: None,
            source_extension: "cs".into(),
        }
    }
}

/// Root configuration structure for `fleetbump.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteSettings,
    pub retry: RetrySettings,
    /// Backend performing repository changes.
    pub strategy: StrategyKind,
    pub allow_downgrade: bool,
    /// Log mutations instead of performing them.
    pub dry_run: bool,
    /// Packages to update in every repository.
    pub packages: Vec<PackageUpdateSpec>,
    /// Project ids or paths to process. Takes precedence over `group`.
    pub repositories: Vec<String>,
    /// Group whose projects are processed when no repository is listed.
    pub group: Option<String>,
    pub max_repositories: Option<usize>,
    pub migrations: MigrationSettings,
    pub tool: ToolSettings,
    /// Markdown run report.
    pub report_file: PathBuf,
    /// JSON file tracking every opened merge request.
    pub tracking_file: PathBuf,
    /// Parent directory for clones of the local strategy.
    pub work_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: RemoteSettings::default(),
            retry: RetrySettings::default(),
            strategy: StrategyKind::default(),
            allow_downgrade: false,
            dry_run: false,
            packages: vec![],
            repositories: vec![],
            group: None,
            max_repositories: None,
            migrations: MigrationSettings::default(),
            tool: ToolSettings::default(),
            report_file: PathBuf::from(DEFAULT_REPORT_FILE),
            tracking_file: PathBuf::from(DEFAULT_TRACKING_FILE),
            work_dir: None,
        }
    }
}

impl Config {
    /// Parses `path`. A missing file is only an error when `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        if !path.exists() {
            if required {
                return Err(FleetbumpError::invalid_config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            log::debug!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Token from the command line, else from the configured environment
    /// variable.
    pub fn token(&self, cli_token: Option<&str>) -> Result<SecretString> {
        let token = match cli_token.filter(|t| !t.is_empty()) {
            Some(token) => token.to_string(),
            None => env::var(&self.remote.token_env).unwrap_or_default(),
        };

        if token.is_empty() {
            return Err(FleetbumpError::invalid_config(format!(
                "must set a gitlab token with --token or {}",
                self.remote.token_env
            )));
        }

        Ok(SecretString::from(token))
    }

    pub fn remote_config(&self, token: SecretString) -> Result<RemoteConfig> {
        let base_url = Url::parse(&self.remote.url)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(FleetbumpError::invalid_config(
                "only http and https remote urls are supported",
            ));
        }

        Ok(RemoteConfig {
            base_url,
            token,
            dry_run: self.dry_run,
            request_timeout: Duration::from_secs(
                self.remote.request_timeout_secs,
            ),
            verify_ssl: self.remote.verify_ssl,
            rate_limit: RateLimitConfig {
                requests_per_minute: self.remote.requests_per_minute,
                burst_limit: self.remote.burst_limit,
            },
            retry: RetryConfig::from(&self.retry),
        })
    }
}
