//! Traits related to the remote git host.
#[cfg(test)]
use mockall::automock;

use crate::{
    error::Result,
    forge::{
        config::RemoteConfig,
        request::{
            CreateBranchRequest, CreateMergeRequest, FindMergeRequest,
            GetFileContentRequest, ListTreeRequest, MergeRequest, Project,
            TreeItem, UpdateFileRequest,
        },
    },
};

/// Operations the update engine needs from the remote host.
///
/// Expected outcomes such as a missing file or an absent branch are
/// returned as values; only transport and server faults are errors.
#[cfg_attr(test, automock)]
pub trait Forge {
    fn remote_config(&self) -> RemoteConfig;
    /// Look up a project by numeric id or full path.
    fn get_project(&self, id_or_path: &str) -> Result<Project>;
    /// List projects, optionally restricted to a group and its subgroups.
    fn list_projects(&self, group: Option<String>) -> Result<Vec<Project>>;
    fn list_tree(&self, req: ListTreeRequest) -> Result<Vec<TreeItem>>;
    fn get_file_content(
        &self,
        req: GetFileContentRequest,
    ) -> Result<Option<String>>;
    /// Commit a whole file to a branch in one server side commit.
    fn update_file(&self, req: UpdateFileRequest) -> Result<()>;
    /// Remove a file from a branch.
    fn delete_file(
        &self,
        project_id: u64,
        path: String,
        branch: String,
        commit_message: String,
    ) -> Result<()>;
    fn create_branch(&self, req: CreateBranchRequest) -> Result<()>;
    /// Delete a branch; returns false when it did not exist.
    fn delete_branch(&self, project_id: u64, branch: String) -> Result<bool>;
    fn branch_exists(&self, project_id: u64, branch: String) -> Result<bool>;
    fn create_merge_request(
        &self,
        project_id: u64,
        req: CreateMergeRequest,
    ) -> Result<MergeRequest>;
    fn find_open_merge_request(
        &self,
        req: FindMergeRequest,
    ) -> Result<Option<MergeRequest>>;
    /// Current state of a merge request, None when it no longer exists.
    fn get_merge_request_state(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<Option<String>>;
    fn close_merge_request(&self, project_id: u64, iid: u64) -> Result<()>;
}
