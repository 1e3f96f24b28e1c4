//! Persistent record of the merge requests opened across runs.
//!
//! The file is a JSON document `{ "metadata": {...}, "merge_requests":
//! [...] }`. Entries are rewritten sorted by url then status.
use chrono::{DateTime, Utc};
use log::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

use crate::{
    error::Result,
    forge::manager::ForgeManager,
    orchestrator::{SuccessKind, UpdateOutcome},
    strategy::RepositoryInfo,
};

/// Status of an entry that could not be refreshed yet.
pub const UNKNOWN_STATUS: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingMetadata {
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// One package update carried by one merge request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedMergeRequest {
    pub repository_id: u64,
    pub repository_name: String,
    pub package_name: String,
    pub new_version: String,
    pub merge_request_url: String,
    pub merge_request_iid: u64,
    pub target_branch: String,
    pub source_branch: String,
    /// The merge request was already open when the run found it.
    #[serde(default)]
    pub existed: bool,
    #[serde(default = "unknown_status")]
    pub status: String,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

fn unknown_status() -> String {
    UNKNOWN_STATUS.into()
}

impl TrackedMergeRequest {
    fn same_entry(&self, other: &Self) -> bool {
        self.repository_id == other.repository_id
            && self.merge_request_iid == other.merge_request_iid
            && self.package_name.eq_ignore_ascii_case(&other.package_name)
    }

    /// Entries for the merge request an outcome created or found. Dry-run
    /// merge requests are never tracked.
    pub fn from_outcome(
        repo: &RepositoryInfo,
        outcome: &UpdateOutcome,
        packages: &[(String, String)],
    ) -> Vec<Self> {
        let (merge_request, existed, packages): (_, _, Vec<(String, String)>) =
            match outcome {
                UpdateOutcome::Success(SuccessKind::Created(change)) => (
                    &change.merge_request,
                    false,
                    change
                        .updated_packages
                        .iter()
                        .map(|p| (p.name.clone(), p.new_version.clone()))
                        .collect(),
                ),
                UpdateOutcome::Success(SuccessKind::Existing(mr)) => {
                    (mr, true, packages.to_vec())
                }
                _ => return vec![],
            };

        if merge_request.iid == 0 {
            return vec![];
        }

        packages
            .into_iter()
            .map(|(package_name, new_version)| Self {
                repository_id: repo.id,
                repository_name: repo.name.clone(),
                package_name,
                new_version,
                merge_request_url: merge_request.web_url.clone(),
                merge_request_iid: merge_request.iid,
                target_branch: merge_request.target_branch.clone(),
                source_branch: merge_request.source_branch.clone(),
                existed,
                status: merge_request.state.clone(),
                last_checked: Some(Utc::now()),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingState {
    #[serde(default)]
    pub metadata: TrackingMetadata,
    #[serde(default)]
    pub merge_requests: Vec<TrackedMergeRequest>,
}

impl TrackingState {
    /// Reads `path`; a missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Sorts the entries and writes the state to `path`.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        let now = Utc::now();
        self.metadata.created_at.get_or_insert(now);
        self.metadata.last_updated = Some(now);
        self.sort();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(
            "saved {} tracked merge requests to {}",
            self.merge_requests.len(),
            path.display()
        );
        Ok(())
    }

    /// Replaces the entry for the same repository, merge request and
    /// package, or appends a new one.
    pub fn upsert(&mut self, entry: TrackedMergeRequest) {
        match self.merge_requests.iter_mut().find(|e| e.same_entry(&entry)) {
            Some(existing) => *existing = entry,
            None => self.merge_requests.push(entry),
        }
    }

    fn sort(&mut self) {
        self.merge_requests.sort_by(|a, b| {
            a.merge_request_url
                .cmp(&b.merge_request_url)
                .then_with(|| a.status.cmp(&b.status))
        });
    }

    /// Asks the remote for the current state of every entry. Returns how
    /// many entries changed status; failures leave the entry untouched.
    pub fn refresh(&mut self, forge: &ForgeManager) -> usize {
        let mut changed = 0;

        for entry in self.merge_requests.iter_mut() {
            match forge
                .get_merge_request_state(entry.repository_id, entry.merge_request_iid)
            {
                Ok(Some(state)) => {
                    if state != entry.status {
                        info!(
                            "{} !{}: {} -> {state}",
                            entry.repository_name,
                            entry.merge_request_iid,
                            entry.status
                        );
                        entry.status = state;
                        changed += 1;
                    }
                    entry.last_checked = Some(Utc::now());
                }
                Ok(None) => warn!(
                    "{} !{} no longer exists",
                    entry.repository_name, entry.merge_request_iid
                ),
                Err(err) => error!(
                    "failed to refresh {} !{}: {err}",
                    entry.repository_name, entry.merge_request_iid
                ),
            }
        }

        changed
    }

    /// Number of entries per status.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.merge_requests {
            *counts.entry(entry.status.clone()).or_insert(0) += 1;
        }
        counts
    }
}
