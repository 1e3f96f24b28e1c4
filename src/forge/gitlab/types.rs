use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct GitlabFile {
    pub content: String,
    #[serde(default)]
    pub encoding: String,
}

#[derive(Debug, Serialize)]
pub struct CommitFileBody {
    pub branch: String,
    pub content: String,
    pub encoding: &'static str,
    pub commit_message: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteFileBody {
    pub branch: String,
    pub commit_message: String,
}

#[derive(Debug, Serialize)]
pub struct StateEventBody {
    pub state_event: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct MergeRequestState {
    pub state: String,
}
