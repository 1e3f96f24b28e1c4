//! Gateway to the external migration tool.
//!
//! Resolves a trustworthy executable (discovering, rebuilding and verifying
//! it as needed), narrows the candidate files, runs the tool in batches and
//! folds the batch outputs into a single [`MigrationResult`].
use log::*;
use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    rc::Rc,
    time::{Duration, SystemTime},
};

use crate::{
    error::Result,
    migration::{
        executable::{self, ToolExecutable},
        prefilter::{self, Prefilter},
        process::{CommandSpec, ProcessRunner},
        result::{MigrationResult, ToolOutput},
        rules::RulesFile,
    },
};

pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(30);
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(300);
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(600);

/// Files per tool invocation. Windows command lines are much shorter.
pub const DEFAULT_BATCH_SIZE: usize = if cfg!(windows) { 50 } else { 200 };

pub const DEFAULT_TOOL_NAME: &str = "CSharpMigrationTool";

/// Where the tool lives and how to build and recognise it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Root of the tool's source tree; build output is under `bin/`.
    pub source_dir: PathBuf,
    /// Assembly / binary name without extension.
    pub name: String,
    /// Explicit executable, skips discovery and rebuilds.
    pub executable: Option<PathBuf>,
    /// Host used to run `<name>.dll`.
    pub launcher: String,
    /// Text that must appear in the `--help` output.
    pub banner: String,
    pub build_command: Vec<String>,
    /// Source file extensions checked for staleness.
    pub source_extensions: Vec<String>,
    pub batch_size: Option<usize>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from(DEFAULT_TOOL_NAME),
            name: DEFAULT_TOOL_NAME.into(),
            executable: None,
            launcher: "dotnet".into(),
            banner: "--rules-file".into(),
            build_command: vec![
                "dotnet".into(),
                "build".into(),
                "-c".into(),
                "Release".into(),
            ],
            source_extensions: vec!["cs".into(), "csproj".into(), "json".into()],
            batch_size: None,
        }
    }
}

/// Last executable trusted by the gateway.
#[derive(Debug, Clone)]
struct CachedExecutable {
    executable: ToolExecutable,
    modified: SystemTime,
}

pub struct MigrationGateway {
    settings: ToolSettings,
    runner: Rc<dyn ProcessRunner>,
    cached: RefCell<Option<CachedExecutable>>,
}

impl MigrationGateway {
    pub fn new(settings: ToolSettings, runner: Rc<dyn ProcessRunner>) -> Self {
        Self {
            settings,
            runner,
            cached: RefCell::new(None),
        }
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    pub fn batch_size(&self) -> usize {
        self.settings.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1)
    }

    /// Runs `command --help` and checks for a zero exit and the banner.
    pub fn verify(&self, executable: &ToolExecutable) -> bool {
        let command = executable.command().arg("--help");
        match self.runner.run(&command, VERIFY_TIMEOUT) {
            Ok(output) if output.success() => {
                let found = output.stdout.contains(&self.settings.banner)
                    || output.stderr.contains(&self.settings.banner);
                if !found {
                    warn!(
                        "{} did not print the expected banner",
                        executable.path.display()
                    );
                }
                found
            }
            Ok(output) => {
                warn!(
                    "{} --help exited with {:?}",
                    executable.path.display(),
                    output.code
                );
                false
            }
            Err(err) => {
                warn!("unable to verify {}: {err}", executable.path.display());
                false
            }
        }
    }

    fn is_stale(&self, executable: &ToolExecutable) -> bool {
        executable::is_stale(
            &executable.path,
            &self.settings.source_dir,
            &self.settings.source_extensions,
        )
    }

    fn trust(&self, executable: ToolExecutable) -> Option<ToolExecutable> {
        let modified = executable.modified()?;
        self.cached.replace(Some(CachedExecutable {
            executable: executable.clone(),
            modified,
        }));
        Some(executable)
    }

    /// Rebuilds the tool from source. False when no toolchain is available
    /// or the build failed.
    fn rebuild(&self) -> bool {
        let Some((program, args)) = self.settings.build_command.split_first()
        else {
            return false;
        };

        if !self.runner.program_exists(program) {
            warn!("{program} not found: unable to rebuild the migration tool");
            return false;
        }

        let command = CommandSpec::new(program.as_str())
            .args(args.iter().cloned())
            .cwd(&self.settings.source_dir);

        info!("rebuilding migration tool: {}", command.display());

        match self.runner.run(&command, BUILD_TIMEOUT) {
            Ok(output) if output.success() => true,
            Ok(output) => {
                error!(
                    "migration tool build failed with {:?}: {}",
                    output.code,
                    output.stderr.trim()
                );
                false
            }
            Err(err) => {
                error!("migration tool build failed: {err}");
                false
            }
        }
    }

    fn candidates(&self) -> Vec<ToolExecutable> {
        executable::find_candidates(
            &self.settings.source_dir,
            &self.settings.name,
            &self.settings.launcher,
        )
    }

    fn from_override(&self, path: &Path) -> Option<ToolExecutable> {
        if !path.is_file() {
            error!("configured executable {} does not exist", path.display());
            return None;
        }

        let is_managed = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("dll"))
            .unwrap_or(false);

        let executable = if is_managed {
            ToolExecutable::managed(path, self.settings.launcher.as_str())
        } else {
            ToolExecutable::native(path)
        };

        self.verify(&executable).then_some(executable)
    }

    /// A verified, up to date executable, or None when the tool is
    /// unavailable.
    ///
    /// A cached executable is only reused when it still exists, has the
    /// same modification time, is not older than its sources and passes
    /// verification again.
    pub fn resolve_executable(&self) -> Option<ToolExecutable> {
        if let Some(path) = &self.settings.executable {
            return self.from_override(path);
        }

        let cached = self.cached.borrow().clone();
        if let Some(cached) = cached {
            let unchanged = cached.executable.modified() == Some(cached.modified);
            if unchanged
                && !self.is_stale(&cached.executable)
                && self.verify(&cached.executable)
            {
                debug!(
                    "using cached migration tool {}",
                    cached.executable.path.display()
                );
                return Some(cached.executable);
            }
            debug!("cached migration tool is no longer valid");
            self.cached.replace(None);
        }

        if let Some(best) = self.candidates().into_iter().next()
            && !self.is_stale(&best)
            && self.verify(&best)
        {
            return self.trust(best);
        }

        if self.rebuild() {
            for candidate in self.candidates() {
                if self.verify(&candidate) {
                    return self.trust(candidate);
                }
            }
            warn!("no verified executable found after rebuilding");
        }

        for candidate in self.candidates() {
            if self.verify(&candidate) {
                warn!(
                    "using possibly stale migration tool {}",
                    candidate.path.display()
                );
                return self.trust(candidate);
            }
        }

        error!(
            "migration tool {} is unavailable under {}",
            self.settings.name,
            self.settings.source_dir.display()
        );
        None
    }

    /// Writes `rules` to a temporary file and runs them over `target_files`.
    pub fn execute_rules(
        &self,
        rules: &RulesFile,
        target_files: &[String],
        working_dir: &Path,
    ) -> Result<MigrationResult> {
        let rules_file = rules.write_temp()?;
        Ok(self.execute(rules_file.path(), target_files, working_dir))
    }

    /// Runs the rules in `rules_file` over `target_files`, which are
    /// relative to `working_dir`.
    pub fn execute(
        &self,
        rules_file: &Path,
        target_files: &[String],
        working_dir: &Path,
    ) -> MigrationResult {
        if target_files.is_empty() {
            return MigrationResult::empty("No target files to process");
        }

        let rules = match RulesFile::load(rules_file) {
            Ok(rules) => rules,
            Err(err) => {
                return MigrationResult::failed(format!(
                    "unable to read rules file {}: {err}",
                    rules_file.display()
                ));
            }
        };

        if rules.rules.is_empty() {
            return MigrationResult::empty("No migration rules to apply");
        }

        let Some(executable) = self.resolve_executable() else {
            return MigrationResult::unavailable();
        };

        let terms = prefilter::extract_terms(&rules.rules);
        let (eligible, method) = Prefilter::new(self.runner.as_ref())
            .with_chunk_size(self.batch_size())
            .filter(working_dir, target_files, &terms);

        info!(
            "{} of {} files eligible for migration ({method:?})",
            eligible.len(),
            target_files.len()
        );

        if eligible.is_empty() {
            return MigrationResult::empty(
                "No files reference the migrated APIs",
            );
        }

        let batches = eligible.chunks(self.batch_size()).collect::<Vec<_>>();
        let total = batches.len();
        let mut result = MigrationResult::empty("");

        for (index, batch) in batches.into_iter().enumerate() {
            info!(
                "running migration batch {}/{total} ({} files)",
                index + 1,
                batch.len()
            );
            let batch_result = self.run_batch(
                &executable,
                rules_file,
                batch,
                working_dir,
                index + 1,
                total,
            );
            result.merge(batch_result);
        }

        result.relativize(working_dir);
        result.summary = format!(
            "{} files modified, {} rules applied across {total} batch(es)",
            result.modified_files.len(),
            result.applied_rules.len()
        );
        if !result.errors.is_empty() {
            result.summary.push_str(&format!(
                ", {} error(s)",
                result.errors.len()
            ));
        }

        result
    }

    fn run_batch(
        &self,
        executable: &ToolExecutable,
        rules_file: &Path,
        files: &[String],
        working_dir: &Path,
        index: usize,
        total: usize,
    ) -> MigrationResult {
        let mut command = executable
            .command()
            .arg("--rules-file")
            .arg(rules_file.to_string_lossy().to_string());

        for file in files {
            command = command.arg("--target-file").arg(file.as_str());
        }

        let command = command
            .arg("--working-directory")
            .arg(working_dir.to_string_lossy().to_string())
            .cwd(working_dir);

        let output = match self.runner.run(&command, BATCH_TIMEOUT) {
            Ok(output) => output,
            Err(err) => {
                error!("migration batch {index}/{total} failed: {err}");
                return MigrationResult::failed(format!(
                    "batch {index}/{total}: {err}"
                ));
            }
        };

        match ToolOutput::parse(&output.stdout) {
            Some(parsed) => {
                if !output.success() {
                    warn!(
                        "migration batch {index}/{total} exited with {:?} but reported success={}",
                        output.code, parsed.success
                    );
                }
                parsed.into()
            }
            None if output.success() => {
                error!("migration batch {index}/{total} printed no result");
                MigrationResult::failed(format!(
                    "batch {index}/{total}: unable to parse tool output"
                ))
            }
            None => {
                error!(
                    "migration batch {index}/{total} exited with {:?}: {}",
                    output.code,
                    output.stderr.trim()
                );
                MigrationResult::failed(format!(
                    "batch {index}/{total}: tool exited with {:?}: {}",
                    output.code,
                    output.stderr.trim()
                ))
            }
        }
    }
}
