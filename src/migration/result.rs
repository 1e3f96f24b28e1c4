use serde::{Deserialize, Serialize};
use std::path::Path;

/// Error recorded when no usable tool executable could be found.
pub const TOOL_UNAVAILABLE: &str = "tool unavailable";

/// Aggregated outcome of running the migration tool over a set of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub success: bool,
    /// Changed files, relative to the working directory, `/` separated.
    pub modified_files: Vec<String>,
    pub applied_rules: Vec<String>,
    pub errors: Vec<String>,
    pub summary: String,
}

impl MigrationResult {
    /// Successful run that had nothing to do.
    pub fn empty(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            modified_files: vec![],
            applied_rules: vec![],
            errors: vec![],
            summary: summary.into(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            success: false,
            modified_files: vec![],
            applied_rules: vec![],
            errors: vec![TOOL_UNAVAILABLE.into()],
            summary: "migration tool unavailable".into(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            modified_files: vec![],
            applied_rules: vec![],
            summary: error.clone(),
            errors: vec![error],
        }
    }

    pub fn is_tool_unavailable(&self) -> bool {
        self.errors.iter().any(|e| e == TOOL_UNAVAILABLE)
    }

    /// Folds a batch result into this one: files and rules are unioned,
    /// errors appended, and any failed batch fails the whole.
    pub fn merge(&mut self, batch: MigrationResult) {
        self.success &= batch.success;
        for file in batch.modified_files {
            if !self.modified_files.contains(&file) {
                self.modified_files.push(file);
            }
        }
        for rule in batch.applied_rules {
            if !self.applied_rules.contains(&rule) {
                self.applied_rules.push(rule);
            }
        }
        self.errors.extend(batch.errors);
    }

    /// Rewrites tool reported paths relative to `root`.
    pub fn relativize(&mut self, root: &Path) {
        for file in self.modified_files.iter_mut() {
            *file = relative_path(file, root);
        }
    }
}

/// `path` relative to `root` with `/` separators; paths outside `root`
/// are returned unchanged.
pub fn relative_path(path: &str, root: &Path) -> String {
    let candidate = Path::new(path);
    if candidate.is_absolute() && !candidate.starts_with(root) {
        return path.to_string();
    }
    let relative = candidate.strip_prefix(root).unwrap_or(candidate);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// JSON document printed by the tool on stdout.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    #[serde(default)]
    pub modified_files: Vec<String>,
    #[serde(default)]
    pub applied_rules: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl ToolOutput {
    /// Finds the JSON object in `stdout`, tolerating log lines printed
    /// before it.
    pub fn parse(stdout: &str) -> Option<Self> {
        let trimmed = stdout.trim();
        if let Ok(output) = serde_json::from_str(trimmed) {
            return Some(output);
        }
        let start = trimmed.find('{')?;
        let end = trimmed.rfind('}')?;
        if end < start {
            return None;
        }
        serde_json::from_str(&trimmed[start..=end]).ok()
    }
}

impl From<ToolOutput> for MigrationResult {
    fn from(output: ToolOutput) -> Self {
        let summary = output.summary.unwrap_or_else(|| {
            format!(
                "{} files modified, {} rules applied",
                output.modified_files.len(),
                output.applied_rules.len()
            )
        });
        Self {
            success: output.success,
            modified_files: output.modified_files,
            applied_rules: output.applied_rules,
            errors: output.errors,
            summary,
        }
    }
}
