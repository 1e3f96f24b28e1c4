//! Narrows candidate files to those that can possibly match a rule set.
//!
//! Literal identifiers are pulled from the rules' target nodes and searched
//! for with `rg`, then `grep`, then an in-process scan. Every method yields
//! the same set: the input files containing at least one term, in input
//! order.
use log::*;
use std::{collections::HashSet, fs, path::Path, time::Duration};

use crate::migration::{
    process::{CommandSpec, ProcessRunner},
    rules::MigrationRule,
};

/// Selector keys whose values are literal identifiers in source text.
pub const TERM_KEYS: [&str; 8] = [
    "method_name",
    "containing_type",
    "containing_namespace",
    "type_name",
    "attribute_name",
    "identifier",
    "property_name",
    "class_name",
];

pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Files passed to one `rg`/`grep` invocation.
pub const DEFAULT_SEARCH_CHUNK: usize = 200;

/// Distinct search terms across all target nodes, in first-seen order.
pub fn extract_terms(rules: &[MigrationRule]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = vec![];

    for node in rules.iter().flat_map(|r| r.target_nodes.iter()) {
        for key in TERM_KEYS {
            if let Some(value) = node.selector(key) {
                let value = value.trim();
                if !value.is_empty() && seen.insert(value.to_string()) {
                    terms.push(value.to_string());
                }
            }
        }
    }

    terms
}

/// How the eligible set was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
    Ripgrep,
    Grep,
    InProcess,
    /// No terms were extracted, nothing was filtered.
    Unfiltered,
}

pub struct Prefilter<'a> {
    runner: &'a dyn ProcessRunner,
    chunk_size: usize,
}

impl<'a> Prefilter<'a> {
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        Self {
            runner,
            chunk_size: DEFAULT_SEARCH_CHUNK,
        }
    }

    /// Caps the number of files on one search command line.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Files in `files` (relative to `working_dir`) that contain at least
    /// one of `terms`.
    pub fn filter(
        &self,
        working_dir: &Path,
        files: &[String],
        terms: &[String],
    ) -> (Vec<String>, SearchMethod) {
        if terms.is_empty() {
            return (files.to_vec(), SearchMethod::Unfiltered);
        }
        if files.is_empty() {
            return (vec![], SearchMethod::InProcess);
        }

        if let Some(matched) = self.search_with("rg", working_dir, files, terms)
        {
            return (order_like(files, matched), SearchMethod::Ripgrep);
        }

        if let Some(matched) =
            self.search_with("grep", working_dir, files, terms)
        {
            return (order_like(files, matched), SearchMethod::Grep);
        }

        (scan_in_process(working_dir, files, terms), SearchMethod::InProcess)
    }

    /// Runs an external search tool over `files` in chunks. None means the
    /// tool could not give a usable answer for some chunk and the next
    /// method should be tried.
    fn search_with(
        &self,
        program: &str,
        working_dir: &Path,
        files: &[String],
        terms: &[String],
    ) -> Option<HashSet<String>> {
        if !self.runner.program_exists(program) {
            debug!("{program} not found on PATH");
            return None;
        }

        let mut matched = HashSet::new();
        for chunk in files.chunks(self.chunk_size) {
            matched.extend(self.search_chunk(program, working_dir, chunk, terms)?);
        }
        Some(matched)
    }

    fn search_chunk(
        &self,
        program: &str,
        working_dir: &Path,
        files: &[String],
        terms: &[String],
    ) -> Option<HashSet<String>> {
        let mut command = CommandSpec::new(program).arg("-l").arg("-F");
        if program == "rg" {
            command = command.arg("--no-messages");
        }
        for term in terms {
            command = command.arg("-e").arg(term.as_str());
        }
        let command = command
            .arg("--")
            .args(files.iter().cloned())
            .cwd(working_dir);

        let output = match self.runner.run(&command, SEARCH_TIMEOUT) {
            Ok(output) => output,
            Err(err) => {
                warn!("{program} search failed: {err}");
                return None;
            }
        };

        match output.code {
            Some(0) => Some(
                output
                    .stdout
                    .lines()
                    .map(normalize)
                    .filter(|l| !l.is_empty())
                    .collect(),
            ),
            // exit code 1 is "no matches" for both tools
            Some(1) => Some(HashSet::new()),
            code => {
                warn!(
                    "{program} exited with {code:?}: {}",
                    output.stderr.trim()
                );
                None
            }
        }
    }
}

fn normalize(line: &str) -> String {
    let line = line.trim().replace('\\', "/");
    line.strip_prefix("./").map(str::to_string).unwrap_or(line)
}

fn order_like(files: &[String], matched: HashSet<String>) -> Vec<String> {
    files
        .iter()
        .filter(|f| matched.contains(&normalize(f)))
        .cloned()
        .collect()
}

/// Substring scan of every file. Unreadable files are kept so the tool
/// can report on them itself.
pub fn scan_in_process(
    working_dir: &Path,
    files: &[String],
    terms: &[String],
) -> Vec<String> {
    files
        .iter()
        .filter(|file| match fs::read(working_dir.join(file.as_str())) {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                terms.iter().any(|t| content.contains(t.as_str()))
            }
            Err(err) => {
                warn!("unable to read {file} for prefiltering: {err}");
                true
            }
        })
        .cloned()
        .collect()
}
