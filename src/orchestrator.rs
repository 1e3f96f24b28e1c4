//! Per-repository update workflow.
//!
//! [`UpdateOrchestrator::process_repository`] drives a
//! [`RepositoryStrategy`] through the workflow: look for an existing merge
//! request, plan every file update in memory, create the branch, write the
//! package updates, optionally run code migrations, push and open the merge
//! request. Every mutation is registered on a [`Transaction`] so any
//! failure after the branch exists is rolled back.
use derive_builder::Builder;
use log::*;
use serde::Serialize;
use std::rc::Rc;

use crate::{
    error::{FleetbumpError, Result},
    forge::request::{CreateMergeRequest, MergeRequest},
    migration::{
        catalog::{MigrationCatalog, MigrationConfiguration},
        result::MigrationResult,
        rules::{MigrationRule, RulesFile},
    },
    orchestrator::config::OrchestratorConfig,
    strategy::{RepositoryInfo, RepositoryStrategy},
    transaction::{RollbackResult, Transaction},
    updater::{PackageChange, csproj::CsprojUpdater},
};

pub mod config;
pub mod naming;

/// Migration summary when the tool's edits produced no commit.
pub const NO_MIGRATION_COMMIT: &str =
    "Migration tool ran but no migrated changes were committed";

/// Merge request opened by a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedChange {
    pub merge_request: MergeRequest,
    pub branch: String,
    /// Packages that changed at least one file, with the version found
    /// before the update.
    pub updated_packages: Vec<PackageChange>,
    /// Package files written by the update commit(s).
    pub modified_files: Vec<String>,
    /// Present when migrations ran, successfully or not.
    pub migration: Option<MigrationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SuccessKind {
    Created(CreatedChange),
    /// An open merge request with the same title already exists.
    Existing(MergeRequest),
    /// No package file references an outdated version.
    NoChanges,
}

/// Final state of one repository attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UpdateOutcome {
    Success(SuccessKind),
    /// Failed before anything was changed on the repository.
    FailedNoRollbackNeeded { error: String },
    /// Failed after mutations; every registered action was rolled back.
    FailedRolledBack {
        error: String,
        rollback: RollbackResult,
    },
}

impl UpdateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UpdateOutcome::Success(_))
    }

    /// Merge request created by or found during the run.
    pub fn merge_request(&self) -> Option<&MergeRequest> {
        match self {
            UpdateOutcome::Success(SuccessKind::Created(change)) => {
                Some(&change.merge_request)
            }
            UpdateOutcome::Success(SuccessKind::Existing(mr)) => Some(mr),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UpdateOutcome::Success(SuccessKind::Created(_)) => "created",
            UpdateOutcome::Success(SuccessKind::Existing(_)) => "existing",
            UpdateOutcome::Success(SuccessKind::NoChanges) => "no changes",
            UpdateOutcome::FailedNoRollbackNeeded { .. } => "failed",
            UpdateOutcome::FailedRolledBack { .. } => "rolled back",
        }
    }

    fn failed(error: impl ToString) -> Self {
        UpdateOutcome::FailedNoRollbackNeeded {
            error: error.to_string(),
        }
    }
}

/// New content for one package file, computed before any mutation.
#[derive(Debug, Clone)]
struct PlannedUpdate {
    path: String,
    content: String,
    changes: Vec<PackageChange>,
}

#[derive(Builder)]
#[builder(setter(into), build_fn(private, name = "_build"))]
pub struct OrchestratorParams {
    pub config: Rc<OrchestratorConfig>,
    pub strategy: Rc<dyn RepositoryStrategy>,
    pub catalog: Rc<MigrationCatalog>,
}

impl OrchestratorParamsBuilder {
    pub fn build(&self) -> Result<UpdateOrchestrator> {
        let params = self._build().map_err(|e| {
            FleetbumpError::invalid_config(format!(
                "Failed to build update orchestrator: {}",
                e
            ))
        })?;
        UpdateOrchestrator::new(params)
    }
}

pub struct UpdateOrchestrator {
    config: Rc<OrchestratorConfig>,
    strategy: Rc<dyn RepositoryStrategy>,
    catalog: Rc<MigrationCatalog>,
    updater: CsprojUpdater,
}

impl UpdateOrchestrator {
    pub fn builder() -> OrchestratorParamsBuilder {
        OrchestratorParamsBuilder::default()
    }

    pub fn new(params: OrchestratorParams) -> Result<Self> {
        let updater = CsprojUpdater::new(params.config.allow_downgrade)?;
        Ok(Self {
            config: params.config,
            strategy: params.strategy,
            catalog: params.catalog,
            updater,
        })
    }

    /// Runs the whole workflow against `repo`. Never panics on repository
    /// faults; they are reported through the outcome.
    pub fn process_repository(&self, repo: &RepositoryInfo) -> UpdateOutcome {
        info!(
            "processing {} with {} strategy",
            repo.path_with_namespace,
            self.strategy.kind()
        );

        let outcome = self.run(repo);

        if let Err(err) = self.strategy.cleanup_repository(repo) {
            warn!(
                "failed to clean up working files for {}: {err}",
                repo.path_with_namespace
            );
        }

        match &outcome {
            UpdateOutcome::Success(_) => {
                info!("{}: {}", repo.path_with_namespace, outcome.label())
            }
            UpdateOutcome::FailedNoRollbackNeeded { error } => {
                error!("{}: {error}", repo.path_with_namespace)
            }
            UpdateOutcome::FailedRolledBack { error, rollback } => {
                error!(
                    "{}: {error}\n{}",
                    repo.path_with_namespace,
                    rollback.report()
                )
            }
        }

        outcome
    }

    fn run(&self, repo: &RepositoryInfo) -> UpdateOutcome {
        let title = naming::merge_request_title(&self.config.packages);
        let branch = naming::branch_name(&self.config.packages);

        match self.strategy.find_existing_merge_request(
            repo,
            &title,
            &repo.default_branch,
        ) {
            Ok(Some(mr)) => {
                info!(
                    "{}: merge request !{} already open: {}",
                    repo.path_with_namespace, mr.iid, mr.web_url
                );
                return UpdateOutcome::Success(SuccessKind::Existing(mr));
            }
            Ok(None) => {}
            Err(err) => return UpdateOutcome::failed(err),
        }

        let plan = match self.plan_updates(repo) {
            Ok(plan) => plan,
            Err(err) => return UpdateOutcome::failed(err),
        };

        if plan.is_empty() {
            return UpdateOutcome::Success(SuccessKind::NoChanges);
        }

        let mut tx =
            Transaction::new(&repo.path_with_namespace, self.strategy.kind());

        match self.apply(&mut tx, repo, &plan, &branch, &title) {
            Ok(change) => {
                tx.clear_rollback_actions();
                UpdateOutcome::Success(SuccessKind::Created(change))
            }
            Err(err) if tx.pending_actions() == 0 => UpdateOutcome::failed(err),
            Err(err) => {
                warn!(
                    "{}: rolling back {} change(s) after error: {err}",
                    repo.path_with_namespace,
                    tx.pending_actions()
                );
                let rollback = tx.execute_rollback();
                UpdateOutcome::FailedRolledBack {
                    error: err.to_string(),
                    rollback,
                }
            }
        }
    }

    /// Prepares the repository and computes the new content of every
    /// package file that references an outdated version.
    fn plan_updates(&self, repo: &RepositoryInfo) -> Result<Vec<PlannedUpdate>> {
        self.strategy.prepare_repository(repo)?;

        let files = self.strategy.find_target_files(
            repo,
            &self.config.target_extension,
            &repo.default_branch,
        )?;

        debug!(
            "{}: found {} .{} files",
            repo.path_with_namespace,
            files.len(),
            self.config.target_extension
        );

        let mut plan = vec![];

        for path in files {
            let Some(content) = self.strategy.get_file_content(
                repo,
                &path,
                &repo.default_branch,
            )?
            else {
                warn!("{}: {path} disappeared, skipping", repo.path_with_namespace);
                continue;
            };

            let update = self.updater.update(&content, &self.config.packages);
            if update.modified {
                plan.push(PlannedUpdate {
                    path,
                    content: update.content,
                    changes: update.changes,
                });
            }
        }

        Ok(plan)
    }

    fn apply(
        &self,
        tx: &mut Transaction,
        repo: &RepositoryInfo,
        plan: &[PlannedUpdate],
        branch: &str,
        title: &str,
    ) -> Result<CreatedChange> {
        let base = repo.default_branch.as_str();

        if !self.strategy.create_branch(tx, repo, branch, base)? {
            return Err(FleetbumpError::mutation(format!(
                "failed to create branch {branch}"
            )));
        }

        let mut modified_files = vec![];
        let mut updated_packages: Vec<PackageChange> = vec![];

        for update in plan {
            let message = naming::file_commit_message(&update.changes, &update.path);
            if !self.strategy.update_file(
                tx,
                repo,
                &update.path,
                &update.content,
                &message,
                branch,
            )? {
                debug!("{}: {} already up to date", branch, update.path);
                continue;
            }

            modified_files.push(update.path.clone());
            for change in &update.changes {
                if !updated_packages.iter().any(|c| c.name == change.name) {
                    updated_packages.push(change.clone());
                }
            }
        }

        if modified_files.is_empty() {
            return Err(FleetbumpError::mutation(format!(
                "no package file could be updated on {branch}"
            )));
        }

        let message = naming::package_commit_message(&updated_packages);
        if !self.strategy.commit_changes(
            tx,
            repo,
            &modified_files,
            &message,
            branch,
        )? {
            warn!("{branch}: package update commit had nothing to commit");
        }

        let migration = self.run_migrations(tx, repo, &updated_packages, branch)?;

        self.strategy.push_branch(tx, repo, branch)?;

        let description = naming::merge_request_description(
            &updated_packages,
            &modified_files,
            migration.as_ref(),
            base,
        )?;

        let merge_request = self.strategy.create_merge_request(
            tx,
            repo,
            CreateMergeRequest {
                source_branch: branch.to_string(),
                target_branch: base.to_string(),
                title: title.to_string(),
                description,
                remove_source_branch: true,
            },
        )?;

        info!(
            "{}: opened merge request !{}: {}",
            repo.path_with_namespace, merge_request.iid, merge_request.web_url
        );

        Ok(CreatedChange {
            merge_request,
            branch: branch.to_string(),
            updated_packages,
            modified_files,
            migration,
        })
    }

    /// Runs migrations for the updated packages and lands their changes as
    /// a second commit. `None` when no migration applies.
    fn run_migrations(
        &self,
        tx: &mut Transaction,
        repo: &RepositoryInfo,
        updated_packages: &[PackageChange],
        branch: &str,
    ) -> Result<Option<MigrationResult>> {
        if !self.config.migrations_enabled {
            return Ok(None);
        }

        let rules = self.applicable_rules(updated_packages);
        if rules.is_empty() {
            debug!("{}: no applicable migrations", repo.path_with_namespace);
            return Ok(None);
        }

        info!(
            "{}: applying {} migration rule(s)",
            repo.path_with_namespace,
            rules.len()
        );

        let rules_file = RulesFile::new(rules).write_temp()?;

        let sources = self.strategy.find_target_files(
            repo,
            &self.config.migration_source_extension,
            &repo.default_branch,
        )?;

        let result = self.strategy.execute_migration_tool(
            repo,
            rules_file.path(),
            &sources,
            branch,
        )?;

        if !result.success {
            let errors = result.errors.join("; ");
            if self.config.strict_migrations {
                return Err(if result.is_tool_unavailable() {
                    FleetbumpError::MigrationToolUnavailable(errors)
                } else {
                    FleetbumpError::MigrationFailed(errors)
                });
            }

            warn!(
                "{}: migrations failed, continuing with package updates only: {errors}",
                repo.path_with_namespace
            );
            return Ok(Some(result));
        }

        let mut result = result;
        if !result.modified_files.is_empty() {
            let message = naming::migration_commit_message(&result);
            let committed = self.strategy.create_second_commit(
                tx,
                repo,
                &result.modified_files,
                &message,
                branch,
            )?;

            if !committed {
                warn!(
                    "{}: migration commit on {branch} contained no changes",
                    repo.path_with_namespace
                );
                result.modified_files.clear();
                result.summary = NO_MIGRATION_COMMIT.into();
            }
        }

        Ok(Some(result))
    }

    /// Rules of every configuration matching an updated package. A package
    /// pinned to a rule id uses that configuration regardless of versions.
    fn applicable_rules(
        &self,
        updated_packages: &[PackageChange],
    ) -> Vec<MigrationRule> {
        let mut configurations: Vec<&MigrationConfiguration> = vec![];

        for change in updated_packages {
            let rule_id = self
                .config
                .packages
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(&change.name))
                .and_then(|p| p.migration_rule_id.as_deref());

            let found = match rule_id {
                Some(rule_id) => self
                    .catalog
                    .get_migrations_by_package_and_rule_id(&change.name, rule_id),
                None => self.catalog.get_applicable_migrations(
                    &change.name,
                    &change.previous_version,
                    &change.new_version,
                ),
            };

            for configuration in found {
                if !configurations.iter().any(|c| c.id == configuration.id) {
                    debug!(
                        "migration {} applies to {} {} -> {}",
                        configuration.id,
                        change.name,
                        change.previous_version,
                        change.new_version
                    );
                    configurations.push(configuration);
                }
            }
        }

        configurations
            .into_iter()
            .flat_map(|c| c.rules.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests;
