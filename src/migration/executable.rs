//! Locates the migration tool binary inside its source tree and decides
//! whether it is older than the sources it was built from.
use log::*;
use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};
use walkdir::WalkDir;

use crate::migration::process::CommandSpec;

/// Build configurations searched, in preference order.
pub const BUILD_CONFIGURATIONS: [&str; 2] = ["Release", "Debug"];

/// Directories never scanned for source changes.
pub const SKIPPED_DIRECTORIES: [&str; 5] =
    ["bin", "obj", ".git", ".vs", "node_modules"];

/// A runnable tool binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolExecutable {
    pub path: PathBuf,
    /// Runtime host used to start managed assemblies (e.g. `dotnet`).
    pub launcher: Option<String>,
}

impl ToolExecutable {
    pub fn native(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            launcher: None,
        }
    }

    pub fn managed(path: impl Into<PathBuf>, launcher: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            launcher: Some(launcher.into()),
        }
    }

    /// Base command that starts the tool, ready for tool arguments.
    pub fn command(&self) -> CommandSpec {
        let path = self.path.to_string_lossy().to_string();
        match &self.launcher {
            Some(launcher) => CommandSpec::new(launcher.as_str()).arg(path),
            None => CommandSpec::new(path),
        }
    }

    pub fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }
}

/// File name of the native binary on this platform.
pub fn native_file_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Numeric version of a target framework directory such as `net8.0` or
/// `netcoreapp3.1`. Non-framework directories yield None.
pub fn runtime_version(dir_name: &str) -> Option<Vec<u32>> {
    let lower = dir_name.to_ascii_lowercase();
    if !lower.starts_with("net") {
        return None;
    }
    let digits_at = lower.find(|c: char| c.is_ascii_digit())?;
    let (prefix, numbers) = lower.split_at(digits_at);
    if !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    // platform suffixes like net8.0-windows are ignored
    let numbers = numbers.split('-').next().unwrap_or(numbers);
    numbers
        .split('.')
        .map(|part| part.parse::<u32>().ok())
        .collect()
}

/// Runtime directories under `dir`, newest first.
fn runtime_directories(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return vec![];
    };

    let mut runtimes = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            runtime_version(&name).map(|version| (version, e.path()))
        })
        .collect::<Vec<_>>();

    runtimes.sort_by(|a, b| b.0.cmp(&a.0));
    runtimes.into_iter().map(|(_, path)| path).collect()
}

/// Every existing tool binary under `source_dir/bin`, best candidate first.
///
/// Newer runtime directories win over older ones regardless of build
/// configuration; Release wins over Debug for the same runtime. Within a
/// directory the native binary is preferred over the managed assembly.
pub fn find_candidates(
    source_dir: &Path,
    name: &str,
    launcher: &str,
) -> Vec<ToolExecutable> {
    let mut found: Vec<(Vec<u32>, usize, ToolExecutable)> = vec![];

    for (rank, configuration) in BUILD_CONFIGURATIONS.iter().enumerate() {
        let config_dir = source_dir.join("bin").join(configuration);
        for runtime_dir in runtime_directories(&config_dir) {
            let version = runtime_dir
                .file_name()
                .and_then(|n| runtime_version(&n.to_string_lossy()))
                .unwrap_or_default();

            let native = runtime_dir.join(native_file_name(name));
            if native.is_file() {
                found.push((
                    version.clone(),
                    rank,
                    ToolExecutable::native(native),
                ));
            }

            let managed = runtime_dir.join(format!("{name}.dll"));
            if managed.is_file() {
                found.push((
                    version,
                    rank,
                    ToolExecutable::managed(managed, launcher),
                ));
            }
        }
    }

    // stable sort keeps native before managed within a directory
    found.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    found.into_iter().map(|(_, _, exe)| exe).collect()
}

/// Most recent modification time of any source file under `source_dir`
/// with one of `extensions`.
pub fn newest_source_modification(
    source_dir: &Path,
    extensions: &[String],
) -> Option<SystemTime> {
    WalkDir::new(source_dir)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !SKIPPED_DIRECTORIES
                    .contains(&entry.file_name().to_string_lossy().as_ref())
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy();
                    extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(&ext))
                })
                .unwrap_or(false)
        })
        .filter_map(|e| e.metadata().ok().and_then(|m| m.modified().ok()))
        .max()
}

/// Whether `binary` is missing or older than any tracked source file.
pub fn is_stale(binary: &Path, source_dir: &Path, extensions: &[String]) -> bool {
    let Some(built) = fs::metadata(binary).and_then(|m| m.modified()).ok() else {
        return true;
    };

    match newest_source_modification(source_dir, extensions) {
        Some(newest) if newest > built => {
            debug!(
                "{} is older than its sources",
                binary.display()
            );
            true
        }
        _ => false,
    }
}
