//! Execution backends for repository mutations.
//!
//! The orchestrator drives one [`RepositoryStrategy`] through the update
//! workflow. [`remote::RemoteApiStrategy`] performs every change through
//! the remote's REST API; [`local::LocalCheckoutStrategy`] clones the
//! repository, commits locally and pushes. Both register a compensating
//! action on the [`Transaction`] for each mutation they perform.
#[cfg(test)]
use mockall::automock;

use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, path::PathBuf, rc::Rc};

use crate::{
    error::Result,
    forge::{
        manager::ForgeManager,
        request::{CreateMergeRequest, MergeRequest, Project},
    },
    migration::{gateway::MigrationGateway, result::MigrationResult},
    transaction::Transaction,
};

pub mod local;
pub mod remote;

/// Repository being processed, as resolved from the remote.
pub type RepositoryInfo = Project;

/// Which backend performs repository mutations.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Commit through the remote API, no local clone.
    #[default]
    Api,
    /// Clone, commit locally and push.
    Local,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Api => write!(f, "api"),
            StrategyKind::Local => write!(f, "local"),
        }
    }
}

/// Operations the update workflow needs from a repository backend.
///
/// Expected outcomes such as a missing file or an absent branch are
/// returned as values. Only transport, I/O and git faults are errors.
#[cfg_attr(test, automock)]
pub trait RepositoryStrategy {
    fn kind(&self) -> StrategyKind;

    /// Makes the repository ready for the other operations.
    fn prepare_repository(&self, repo: &RepositoryInfo) -> Result<()>;

    /// Open merge request with exactly `title` targeting `target_branch`.
    fn find_existing_merge_request(
        &self,
        repo: &RepositoryInfo,
        title: &str,
        target_branch: &str,
    ) -> Result<Option<MergeRequest>>;

    /// Repository relative paths of every file ending in `.extension`.
    fn find_target_files(
        &self,
        repo: &RepositoryInfo,
        extension: &str,
        git_ref: &str,
    ) -> Result<Vec<String>>;

    fn get_file_content(
        &self,
        repo: &RepositoryInfo,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>>;

    /// Creates `branch` from `base`, replacing a leftover branch of the
    /// same name. Registers its deletion.
    fn create_branch(
        &self,
        tx: &mut Transaction,
        repo: &RepositoryInfo,
        branch: &str,
        base: &str,
    ) -> Result<bool>;

    /// Replaces the whole content of `path` on `branch`. Registers the
    /// restoration of the previous content.
    fn update_file(
        &self,
        tx: &mut Transaction,
        repo: &RepositoryInfo,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
    ) -> Result<bool>;

    /// Commits the package updates written by [`Self::update_file`].
    fn commit_changes(
        &self,
        tx: &mut Transaction,
        repo: &RepositoryInfo,
        files: &[String],
        message: &str,
        branch: &str,
    ) -> Result<bool>;

    /// Runs the migration tool over `target_files` as they are on
    /// `branch`.
    fn execute_migration_tool(
        &self,
        repo: &RepositoryInfo,
        rules_file: &Path,
        target_files: &[String],
        branch: &str,
    ) -> Result<MigrationResult>;

    /// Lands the files changed by the migration tool, separately from the
    /// package update commit.
    fn create_second_commit(
        &self,
        tx: &mut Transaction,
        repo: &RepositoryInfo,
        files: &[String],
        message: &str,
        branch: &str,
    ) -> Result<bool>;

    /// Publishes `branch` to the remote when commits were made locally.
    fn push_branch(
        &self,
        tx: &mut Transaction,
        repo: &RepositoryInfo,
        branch: &str,
    ) -> Result<()>;

    /// Opens the merge request. Registers closing it.
    fn create_merge_request(
        &self,
        tx: &mut Transaction,
        repo: &RepositoryInfo,
        request: CreateMergeRequest,
    ) -> Result<MergeRequest>;

    /// Deletes `branch` if it exists.
    fn cleanup_branch(
        &self,
        repo: &RepositoryInfo,
        branch: &str,
        base: &str,
    ) -> Result<()>;

    /// Releases working directories held for `repo`.
    fn cleanup_repository(&self, repo: &RepositoryInfo) -> Result<()>;
}

/// Builds the strategy selected by `kind`.
pub fn create_strategy(
    kind: StrategyKind,
    forge: Rc<ForgeManager>,
    gateway: Rc<MigrationGateway>,
    work_dir: Option<PathBuf>,
) -> Box<dyn RepositoryStrategy> {
    match kind {
        StrategyKind::Api => {
            Box::new(remote::RemoteApiStrategy::new(forge, gateway))
        }
        StrategyKind::Local => Box::new(local::LocalCheckoutStrategy::new(
            forge, gateway, work_dir,
        )),
    }
}

/// Whether `path` ends with `.extension`, ignoring case.
pub fn has_extension(path: &str, extension: &str) -> bool {
    let extension = extension.trim_start_matches('.');
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strategy_kind() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: StrategyKind,
        }
        let parsed: Wrapper = toml::from_str("strategy = \"local\"").unwrap();
        assert_eq!(parsed.strategy, StrategyKind::Local);
        assert_eq!(StrategyKind::default().to_string(), "api");
    }

    #[test]
    fn matches_extension_case_insensitively() {
        assert!(has_extension("src/App.csproj", "csproj"));
        assert!(has_extension("src/App.CSPROJ", ".csproj"));
        assert!(!has_extension("src/App.csproj.user", "csproj"));
        assert!(!has_extension("csproj", "csproj"));
    }
}
