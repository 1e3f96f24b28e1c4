//! Request and response types for remote operations.
use serde::{Deserialize, Serialize};

/// Repository hosted on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Numeric project id.
    pub id: u64,
    /// Short project name.
    pub name: String,
    /// Full path including the namespace (e.g. "group/service").
    pub path_with_namespace: String,
    /// Branch change requests target.
    #[serde(default = "default_branch_name")]
    pub default_branch: String,
    /// HTTPS clone url.
    #[serde(default)]
    pub http_url_to_repo: String,
    /// Browser url of the project.
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub archived: bool,
}

fn default_branch_name() -> String {
    "main".into()
}

/// Entry of a recursive repository tree listing.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeItem {
    pub path: String,
    /// "blob" for files, "tree" for directories.
    #[serde(rename = "type")]
    pub kind: String,
}

impl TreeItem {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

/// Request to list every file on a ref.
#[derive(Debug, Clone)]
pub struct ListTreeRequest {
    pub project_id: u64,
    pub git_ref: String,
}

/// Request to read a single file.
#[derive(Debug, Clone)]
pub struct GetFileContentRequest {
    pub project_id: u64,
    pub path: String,
    pub git_ref: String,
}

/// Request to commit a full file replacement to a branch.
#[derive(Debug, Clone)]
pub struct UpdateFileRequest {
    pub project_id: u64,
    pub path: String,
    pub content: String,
    pub branch: String,
    pub commit_message: String,
    /// Create the file instead of updating it.
    pub create: bool,
}

/// Request to create a branch from a ref.
#[derive(Debug, Clone)]
pub struct CreateBranchRequest {
    pub project_id: u64,
    pub branch: String,
    pub git_ref: String,
}

/// Request to open a merge request.
#[derive(Debug, Clone, Serialize)]
pub struct CreateMergeRequest {
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub description: String,
    /// Delete the source branch once merged.
    pub remove_source_branch: bool,
}

/// Merge request as returned by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub iid: u64,
    pub title: String,
    pub web_url: String,
    /// "opened", "closed", "merged" or "locked".
    pub state: String,
    pub source_branch: String,
    pub target_branch: String,
}

/// Lookup of an open merge request by exact title.
#[derive(Debug, Clone)]
pub struct FindMergeRequest {
    pub project_id: u64,
    pub title: String,
    pub target_branch: String,
}
