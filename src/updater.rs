//! Package file updating.
//!
//! Updaters are pure: they take file content and the packages to apply and
//! return the new content. Writing and committing is up to the caller.
use serde::Serialize;

pub mod csproj;

/// A package version changed in a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageChange {
    pub name: String,
    /// Version found in the file before the update.
    pub previous_version: String,
    pub new_version: String,
}

/// Result of applying package updates to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
    /// File content after the update; identical to the input when
    /// `modified` is false.
    pub content: String,
    pub modified: bool,
    pub changes: Vec<PackageChange>,
}
