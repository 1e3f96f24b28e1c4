//! Source migrations performed by an external transformation tool after a
//! package version bump.

/// Migration configurations and version condition matching.
pub mod catalog;

/// Discovery and staleness of the tool binary.
pub mod executable;

/// Resolution, verification, batching and aggregation.
pub mod gateway;

/// Narrowing of candidate files before invoking the tool.
pub mod prefilter;

/// Subprocess execution.
pub mod process;

/// Aggregated tool results.
pub mod result;

/// Rules file format.
pub mod rules;
