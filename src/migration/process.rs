//! Subprocess execution with caller supplied timeouts.
#[cfg(test)]
use mockall::automock;

use log::*;
use std::{
    io::Read,
    path::PathBuf,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use crate::error::{FleetbumpError, Result};

/// Poll interval while waiting for a child to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A command line to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Program and arguments joined for logging.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, None when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external programs.
#[cfg_attr(test, automock)]
pub trait ProcessRunner {
    /// Runs `command` to completion, killing it once `timeout` elapses.
    fn run(&self, command: &CommandSpec, timeout: Duration) -> Result<ProcessOutput>;
    /// Whether `program` can be found on the PATH.
    fn program_exists(&self, program: &str) -> bool;
}

/// Runs programs with `std::process`.
pub struct SystemProcessRunner;

fn drain<R: Read + Send + 'static>(source: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, command: &CommandSpec, timeout: Duration) -> Result<ProcessOutput> {
        debug!("running: {}", command.display());

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn()?;

        // drain pipes on threads so a chatty child cannot block on a full pipe
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let start = Instant::now();
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if start.elapsed() >= timeout => {
                    warn!(
                        "killing '{}' after {}s",
                        command.program,
                        timeout.as_secs()
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(FleetbumpError::ProcessTimeout {
                        program: command.program.clone(),
                        seconds: timeout.as_secs(),
                    });
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        Ok(ProcessOutput {
            code: status.code(),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        })
    }

    fn program_exists(&self, program: &str) -> bool {
        let finder = if cfg!(windows) { "where" } else { "which" };
        Command::new(finder)
            .arg(program)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_output_and_exit_code() {
        let output = SystemProcessRunner
            .run(
                &CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]),
                Duration::from_secs(10),
            )
            .unwrap();

        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[test]
    fn kills_process_after_timeout() {
        let result = SystemProcessRunner.run(
            &CommandSpec::new("sleep").arg("5"),
            Duration::from_millis(200),
        );
        assert!(matches!(
            result,
            Err(FleetbumpError::ProcessTimeout { .. })
        ));
    }

    #[test]
    fn runs_in_working_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = SystemProcessRunner
            .run(&CommandSpec::new("pwd").cwd(dir.path()), Duration::from_secs(10))
            .unwrap();
        let reported = std::fs::canonicalize(output.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn finds_programs_on_path() {
        assert!(SystemProcessRunner.program_exists("sh"));
        assert!(!SystemProcessRunner.program_exists("definitely-not-a-real-program-xyz"));
    }

    #[test]
    fn display_joins_arguments() {
        let spec = CommandSpec::new("dotnet").args(["build", "-c", "Release"]);
        assert_eq!(spec.display(), "dotnet build -c Release");
    }
}
