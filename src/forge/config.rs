//! Configuration for the remote GitLab connection.
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Default page size for paginated queries.
pub const DEFAULT_PAGE_SIZE: u8 = 100;
/// Default request budget per minute.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 600;
/// Default number of closely spaced requests allowed before a cooldown.
pub const DEFAULT_BURST_LIMIT: u32 = 10;
/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Username used for token authenticated git operations.
pub const TOKEN_USER: &str = "oauth2";

/// Rate limiter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            burst_limit: DEFAULT_BURST_LIMIT,
        }
    }
}

/// Retry handler settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for every later one.
    pub base_delay: Duration,
    /// Upper bound for computed backoff delays.
    pub max_delay: Duration,
    /// Waits longer than this need confirmation.
    pub confirm_threshold: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            confirm_threshold: Duration::from_secs(60),
        }
    }
}

/// Remote connection configuration for authenticating and interacting
/// with the GitLab API.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base url of the instance (e.g. "https://gitlab.com").
    pub base_url: Url,
    /// Access token for authentication.
    pub token: SecretString,
    /// Log mutations instead of performing them.
    pub dry_run: bool,
    /// Timeout applied to every HTTP request.
    pub request_timeout: Duration,
    /// Verify TLS certificates.
    pub verify_ssl: bool,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
}

impl RemoteConfig {
    /// Root of the v4 REST API.
    pub fn api_url(&self) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["api", "v4"]);
        }
        url
    }
}
