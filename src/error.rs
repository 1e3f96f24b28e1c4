//! Error types for fleetbump.
//!
//! The first group of variants is the failure taxonomy the orchestrator
//! branches on: preparation faults abort a repository without rollback,
//! mutation faults roll back everything registered so far.

use thiserror::Error;

/// Main error type for fleetbump operations.
#[derive(Error, Debug)]
pub enum FleetbumpError {
    // Cli args errors
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Per-repository workflow taxonomy
    #[error("Repository preparation failed: {0}")]
    Preparation(String),

    #[error("Repository mutation failed: {0}")]
    Mutation(String),

    #[error("Migration tool unavailable: {0}")]
    MigrationToolUnavailable(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("API rate limit exhausted: {0}")]
    RateLimitExhausted(String),

    // Network/API errors
    #[error("Remote request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network request failed: {0}")]
    Network(String),

    #[error("API authentication failed: {0}")]
    Authentication(String),

    // Subprocess errors
    #[error("Process '{program}' timed out after {seconds}s")]
    ProcessTimeout { program: String, seconds: u64 },

    #[error("Git operation failed: {0}")]
    GitError(#[from] git2::Error),

    #[error("Invalid version format: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("Template rendering failed: {0}")]
    TemplateError(#[from] tera::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Regular expression error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),

    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] log::SetLoggerError),

    // Generic wrapper for other errors
    #[error(transparent)]
    Other(#[from] color_eyre::Report),
}

/// Result type alias using FleetbumpError
pub type Result<T> = std::result::Result<T, FleetbumpError>;

impl FleetbumpError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a preparation fault
    pub fn preparation(msg: impl Into<String>) -> Self {
        Self::Preparation(msg.into())
    }

    /// Create a mutation fault
    pub fn mutation(msg: impl Into<String>) -> Self {
        Self::Mutation(msg.into())
    }

    /// Create an http status error
    pub fn http(status: u16, msg: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: msg.into(),
        }
    }

    /// Whether the error came from a 404 response.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404, .. })
    }
}

// Implement From for std::io::Error - wraps in Other variant for generic I/O errors
impl From<std::io::Error> for FleetbumpError {
    fn from(err: std::io::Error) -> Self {
        Self::Other(color_eyre::Report::from(err))
    }
}

// Implement From for reqwest errors (network/API)
impl From<reqwest::Error> for FleetbumpError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                Self::Authentication(err.to_string())
            }
            Some(status) if status.as_u16() == 429 => {
                Self::RateLimitExhausted(err.to_string())
            }
            Some(status) => Self::http(status.as_u16(), err.to_string()),
            None => Self::Network(err.to_string()),
        }
    }
}

// Implement From for reqwest header errors (needs custom message)
impl From<reqwest::header::InvalidHeaderValue> for FleetbumpError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Self::Authentication(format!("Invalid header value: {}", err))
    }
}
