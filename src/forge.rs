//! Access to the remote GitLab host.
//!
//! Every call goes through a rate limiter and a retry handler, and
//! mutations can be turned into logged no-ops for dry runs.

/// Connection, rate limit and retry configuration.
pub mod config;

/// Builds a ready to use [`manager::ForgeManager`].
pub mod factory;

/// GitLab REST API client implementation.
pub mod gitlab;

/// Dry run aware wrapper used by the rest of the crate.
pub mod manager;

/// Request and response types.
pub mod request;

/// Common trait for the remote host.
pub mod traits;

/// Rate limiting and retrying.
pub mod transport;
