//! Manager that wraps forge implementations
use log::*;

use crate::{
    error::Result,
    forge::{
        config::RemoteConfig,
        request::{
            CreateBranchRequest, CreateMergeRequest, FindMergeRequest,
            GetFileContentRequest, ListTreeRequest, MergeRequest, Project,
            TreeItem, UpdateFileRequest,
        },
        traits::Forge,
    },
};

/// Front door to the remote. Reads always go through; mutations are
/// logged and skipped when the remote config is in dry run mode.
pub struct ForgeManager {
    forge: Box<dyn Forge>,
    remote_config: RemoteConfig,
}

impl ForgeManager {
    pub fn new(forge: Box<dyn Forge>) -> Self {
        let remote_config = forge.remote_config();
        Self {
            forge,
            remote_config,
        }
    }

    pub fn remote_config(&self) -> RemoteConfig {
        self.remote_config.clone()
    }

    pub fn dry_run(&self) -> bool {
        self.remote_config.dry_run
    }

    pub fn get_project(&self, id_or_path: &str) -> Result<Project> {
        self.forge.get_project(id_or_path)
    }

    pub fn list_projects(&self, group: Option<String>) -> Result<Vec<Project>> {
        debug!("listing projects for group: {:?}", group);
        self.forge.list_projects(group)
    }

    pub fn list_tree(&self, req: ListTreeRequest) -> Result<Vec<TreeItem>> {
        self.forge.list_tree(req)
    }

    pub fn get_file_content(
        &self,
        req: GetFileContentRequest,
    ) -> Result<Option<String>> {
        self.forge.get_file_content(req)
    }

    pub fn update_file(&self, req: UpdateFileRequest) -> Result<()> {
        if self.dry_run() {
            warn!(
                "dry_run: would commit file {} to {}: {}",
                req.path, req.branch, req.commit_message
            );
            return Ok(());
        }
        self.forge.update_file(req)
    }

    pub fn delete_file(
        &self,
        project_id: u64,
        path: &str,
        branch: &str,
        commit_message: &str,
    ) -> Result<()> {
        if self.dry_run() {
            warn!("dry_run: would delete file {path} from {branch}");
            return Ok(());
        }
        self.forge.delete_file(
            project_id,
            path.into(),
            branch.into(),
            commit_message.into(),
        )
    }

    pub fn create_branch(&self, req: CreateBranchRequest) -> Result<()> {
        if self.dry_run() {
            warn!(
                "dry_run: would create branch {} from {}",
                req.branch, req.git_ref
            );
            return Ok(());
        }
        self.forge.create_branch(req)
    }

    pub fn delete_branch(&self, project_id: u64, branch: &str) -> Result<bool> {
        if self.dry_run() {
            warn!("dry_run: would delete branch {branch}");
            return Ok(true);
        }
        self.forge.delete_branch(project_id, branch.into())
    }

    pub fn branch_exists(&self, project_id: u64, branch: &str) -> Result<bool> {
        self.forge.branch_exists(project_id, branch.into())
    }

    pub fn create_merge_request(
        &self,
        project_id: u64,
        req: CreateMergeRequest,
    ) -> Result<MergeRequest> {
        if self.dry_run() {
            warn!("dry_run: would create merge request: {:#?}", req);
            return Ok(MergeRequest {
                iid: 0,
                title: req.title,
                web_url: "dry-run".into(),
                state: "opened".into(),
                source_branch: req.source_branch,
                target_branch: req.target_branch,
            });
        }
        self.forge.create_merge_request(project_id, req)
    }

    pub fn find_open_merge_request(
        &self,
        req: FindMergeRequest,
    ) -> Result<Option<MergeRequest>> {
        self.forge.find_open_merge_request(req)
    }

    pub fn get_merge_request_state(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<Option<String>> {
        self.forge.get_merge_request_state(project_id, iid)
    }

    pub fn close_merge_request(&self, project_id: u64, iid: u64) -> Result<()> {
        if self.dry_run() {
            warn!("dry_run: would close merge request !{iid}");
            return Ok(());
        }
        self.forge.close_merge_request(project_id, iid)
    }
}
