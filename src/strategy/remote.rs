//! Strategy that performs every change through the remote REST API.
use log::*;
use std::{cell::RefCell, fs, path::Path, rc::Rc};
use tempfile::TempDir;

use crate::{
    error::{FleetbumpError, Result},
    forge::{
        manager::ForgeManager,
        request::{
            CreateBranchRequest, CreateMergeRequest, FindMergeRequest,
            GetFileContentRequest, ListTreeRequest, MergeRequest,
            UpdateFileRequest,
        },
    },
    migration::{gateway::MigrationGateway, result::MigrationResult},
    strategy::{RepositoryInfo, RepositoryStrategy, StrategyKind, has_extension},
    transaction::Transaction,
};

/// No clone is made: each file update is its own server side commit.
/// Migrations run against copies downloaded into a scratch directory that
/// is kept until [`RepositoryStrategy::cleanup_repository`].
pub struct RemoteApiStrategy {
    forge: Rc<ForgeManager>,
    gateway: Rc<MigrationGateway>,
    scratch: RefCell<Option<TempDir>>,
}

impl RemoteApiStrategy {
    pub fn new(forge: Rc<ForgeManager>, gateway: Rc<MigrationGateway>) -> Self {
        Self {
            forge,
            gateway,
            scratch: RefCell::new(None),
        }
    }

    /// Dry runs never create the branch, so reads fall back to the base.
    fn read_ref(&self, repo: &RepositoryInfo, branch: &str) -> String {
        if self.forge.dry_run() {
            repo.default_branch.clone()
        } else {
            branch.to_string()
        }
    }

    fn download(
        &self,
        repo: &RepositoryInfo,
        target_files: &[String],
        git_ref: &str,
        scratch: &Path,
    ) -> Result<Vec<String>> {
        let mut downloaded = vec![];

        for path in target_files {
            let content =
                self.forge.get_file_content(GetFileContentRequest {
                    project_id: repo.id,
                    path: path.clone(),
                    git_ref: git_ref.to_string(),
                })?;

            let Some(content) = content else {
                warn!("{path} not found on {git_ref}, skipping");
                continue;
            };

            let local = scratch.join(path);
            if let Some(parent) = local.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&local, content)?;
            downloaded.push(path.clone());
        }

        Ok(downloaded)
    }
}

impl RepositoryStrategy for RemoteApiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Api
    }

    fn prepare_repository(&self, repo: &RepositoryInfo) -> Result<()> {
        debug!("{}: nothing to prepare", repo.path_with_namespace);
        Ok(())
    }

    fn find_existing_merge_request(
        &self,
        repo: &RepositoryInfo,
        title: &str,
        target_branch: &str,
    ) -> Result<Option<MergeRequest>> {
        self.forge.find_open_merge_request(FindMergeRequest {
            project_id: repo.id,
            title: title.to_string(),
            target_branch: target_branch.to_string(),
        })
    }

    fn find_target_files(
        &self,
        repo: &RepositoryInfo,
        extension: &str,
        git_ref: &str,
    ) -> Result<Vec<String>> {
        let tree = self.forge.list_tree(ListTreeRequest {
            project_id: repo.id,
            git_ref: git_ref.to_string(),
        })?;

        let files = tree
            .into_iter()
            .filter(|item| item.is_blob() && has_extension(&item.path, extension))
            .map(|item| item.path)
            .collect::<Vec<_>>();

        info!(
            "{}: found {} .{extension} files",
            repo.path_with_namespace,
            files.len()
        );

        Ok(files)
    }

    fn get_file_content(
        &self,
        repo: &RepositoryInfo,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>> {
        self.forge.get_file_content(GetFileContentRequest {
            project_id: repo.id,
            path: path.to_string(),
            git_ref: git_ref.to_string(),
        })
    }

    fn create_branch(
        &self,
        tx: &mut Transaction,
        repo: &RepositoryInfo,
        branch: &str,
        base: &str,
    ) -> Result<bool> {
        if self.forge.branch_exists(repo.id, branch)? {
            info!("branch {branch} already exists, deleting it first");
            self.forge.delete_branch(repo.id, branch)?;
        }

        self.forge.create_branch(CreateBranchRequest {
            project_id: repo.id,
            branch: branch.to_string(),
            git_ref: base.to_string(),
        })?;

        let forge = Rc::clone(&self.forge);
        let project_id = repo.id;
        let name = branch.to_string();
        tx.add_rollback_action(
            move || {
                forge.delete_branch(project_id, &name)?;
                Ok(())
            },
            format!("delete remote branch {branch}"),
        );
        tx.set_created_branch(branch);

        Ok(true)
    }

    fn update_file(
        &self,
        tx: &mut Transaction,
        repo: &RepositoryInfo,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
    ) -> Result<bool> {
        let previous = self.forge.get_file_content(GetFileContentRequest {
            project_id: repo.id,
            path: path.to_string(),
            git_ref: self.read_ref(repo, branch),
        })?;

        if previous.as_deref() == Some(content) {
            debug!("{path} is unchanged, skipping commit");
            return Ok(false);
        }

        self.forge.update_file(UpdateFileRequest {
            project_id: repo.id,
            path: path.to_string(),
            content: content.to_string(),
            branch: branch.to_string(),
            commit_message: message.to_string(),
            create: previous.is_none(),
        })?;

        let forge = Rc::clone(&self.forge);
        let project_id = repo.id;
        let path_owned = path.to_string();
        let branch_owned = branch.to_string();

        match previous {
            Some(original) => tx.add_rollback_action(
                move || {
                    forge.update_file(UpdateFileRequest {
                        project_id,
                        commit_message: format!("Revert {path_owned}"),
                        path: path_owned,
                        content: original,
                        branch: branch_owned,
                        create: false,
                    })
                },
                format!("revert file {path}"),
            ),
            None => tx.add_rollback_action(
                move || {
                    forge.delete_file(
                        project_id,
                        &path_owned,
                        &branch_owned,
                        &format!("Remove {path_owned}"),
                    )
                },
                format!("delete created file {path}"),
            ),
        }

        Ok(true)
    }

    fn commit_changes(
        &self,
        _tx: &mut Transaction,
        _repo: &RepositoryInfo,
        files: &[String],
        _message: &str,
        branch: &str,
    ) -> Result<bool> {
        debug!(
            "{} files already committed individually to {branch}",
            files.len()
        );
        Ok(!files.is_empty())
    }

    fn execute_migration_tool(
        &self,
        repo: &RepositoryInfo,
        rules_file: &Path,
        target_files: &[String],
        branch: &str,
    ) -> Result<MigrationResult> {
        let scratch = tempfile::Builder::new()
            .prefix("fleetbump-migration-")
            .tempdir()?;

        let git_ref = self.read_ref(repo, branch);
        let downloaded =
            self.download(repo, target_files, &git_ref, scratch.path())?;

        info!(
            "{}: downloaded {} files for migration",
            repo.path_with_namespace,
            downloaded.len()
        );

        let result = self.gateway.execute(rules_file, &downloaded, scratch.path());

        // replacing drops (and removes) any scratch dir from an earlier run
        self.scratch.replace(Some(scratch));

        Ok(result)
    }

    fn create_second_commit(
        &self,
        tx: &mut Transaction,
        repo: &RepositoryInfo,
        files: &[String],
        message: &str,
        branch: &str,
    ) -> Result<bool> {
        let scratch = self.scratch.borrow();
        let Some(dir) = scratch.as_ref() else {
            return Err(FleetbumpError::mutation(
                "no migrated files available to commit",
            ));
        };

        let mut committed = false;
        for file in files {
            let content = fs::read_to_string(dir.path().join(file))?;
            committed |=
                self.update_file(tx, repo, file, &content, message, branch)?;
        }

        info!(
            "{}: committed {} migrated files to {branch}",
            repo.path_with_namespace,
            files.len()
        );

        Ok(committed)
    }

    fn push_branch(
        &self,
        _tx: &mut Transaction,
        _repo: &RepositoryInfo,
        branch: &str,
    ) -> Result<()> {
        debug!("{branch} already lives on the remote");
        Ok(())
    }

    fn create_merge_request(
        &self,
        tx: &mut Transaction,
        repo: &RepositoryInfo,
        request: CreateMergeRequest,
    ) -> Result<MergeRequest> {
        let merge_request = self.forge.create_merge_request(repo.id, request)?;

        let forge = Rc::clone(&self.forge);
        let project_id = repo.id;
        let iid = merge_request.iid;
        tx.add_rollback_action(
            move || forge.close_merge_request(project_id, iid),
            format!("close merge request !{iid}"),
        );

        Ok(merge_request)
    }

    fn cleanup_branch(
        &self,
        repo: &RepositoryInfo,
        branch: &str,
        _base: &str,
    ) -> Result<()> {
        if self.forge.branch_exists(repo.id, branch)? {
            self.forge.delete_branch(repo.id, branch)?;
        } else {
            debug!("branch {branch} does not exist, nothing to clean up");
        }
        Ok(())
    }

    fn cleanup_repository(&self, _repo: &RepositoryInfo) -> Result<()> {
        if let Some(dir) = self.scratch.take() {
            dir.close()?;
        }
        Ok(())
    }
}
