//! Common test helper functions shared across test modules.
//!
//! This module provides reusable fixtures for remote configuration,
//! projects, mocked remotes and migration tool trees.
use secrecy::SecretString;
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    rc::Rc,
    time::{Duration, SystemTime},
};
use tempfile::TempDir;
use url::Url;

use crate::{
    forge::{
        config::{RateLimitConfig, RemoteConfig, RetryConfig},
        manager::ForgeManager,
        request::{MergeRequest, Project},
        traits::MockForge,
    },
    migration::{
        gateway::ToolSettings,
        process::{CommandSpec, ProcessOutput},
    },
};

/// Creates a test RemoteConfig pointing at gitlab.com.
///
/// # Example
/// ```ignore
/// let config = create_test_remote_config();
/// ```
pub fn create_test_remote_config() -> RemoteConfig {
    RemoteConfig {
        base_url: Url::parse("https://gitlab.com").unwrap(),
        token: SecretString::from("test-token".to_string()),
        dry_run: false,
        request_timeout: Duration::from_secs(30),
        verify_ssl: true,
        rate_limit: RateLimitConfig::default(),
        retry: RetryConfig::default(),
    }
}

/// Creates a test project with id 42 on the `main` branch.
pub fn create_test_project() -> Project {
    Project {
        id: 42,
        name: "orders-service".into(),
        path_with_namespace: "platform/orders-service".into(),
        default_branch: "main".into(),
        http_url_to_repo: "https://gitlab.com/platform/orders-service.git"
            .into(),
        web_url: "https://gitlab.com/platform/orders-service".into(),
        archived: false,
    }
}

pub fn create_test_merge_request(iid: u64, title: &str) -> MergeRequest {
    MergeRequest {
        iid,
        title: title.into(),
        web_url: format!(
            "https://gitlab.com/platform/orders-service/-/merge_requests/{iid}"
        ),
        state: "opened".into(),
        source_branch: "update-newtonsoft-json-to-13_0_3".into(),
        target_branch: "main".into(),
    }
}

/// A MockForge that already answers `remote_config`, which
/// `ForgeManager::new` always calls.
pub fn create_mock_forge(dry_run: bool) -> MockForge {
    let mut mock = MockForge::new();
    mock.expect_remote_config().returning(move || {
        let mut config = create_test_remote_config();
        config.dry_run = dry_run;
        config
    });
    mock
}

pub fn create_forge_manager(mock: MockForge) -> Rc<ForgeManager> {
    Rc::new(ForgeManager::new(Box::new(mock)))
}

/// Creates `path` (and its parents) and sets its modification time.
pub fn touch(path: &Path, modified: SystemTime) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let file = File::options()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .unwrap();
    file.set_modified(modified).unwrap();
}

pub const TEST_TOOL_NAME: &str = "Tool";
pub const TEST_TOOL_BANNER: &str = "Tool usage: --rules-file <path>";

pub fn tool_binary(root: &Path) -> PathBuf {
    root.join("bin/Release/net8.0")
        .join(format!("{TEST_TOOL_NAME}.dll"))
}

/// Tool source tree whose binary was built after its sources.
pub fn create_fresh_tool() -> TempDir {
    let dir = TempDir::new().unwrap();
    let now = SystemTime::now();
    touch(&dir.path().join("Program.cs"), now - Duration::from_secs(120));
    touch(&tool_binary(dir.path()), now - Duration::from_secs(60));
    dir
}

/// Tool source tree with a source file edited after the last build.
pub fn create_stale_tool() -> TempDir {
    let dir = TempDir::new().unwrap();
    let now = SystemTime::now();
    touch(&tool_binary(dir.path()), now - Duration::from_secs(120));
    touch(
        &dir.path().join("Rewriters/Rename.cs"),
        now - Duration::from_secs(60),
    );
    dir
}

pub fn create_tool_settings(root: &Path) -> ToolSettings {
    ToolSettings {
        source_dir: root.to_path_buf(),
        name: TEST_TOOL_NAME.into(),
        banner: "Tool usage".into(),
        ..Default::default()
    }
}

pub fn help_output() -> ProcessOutput {
    ProcessOutput {
        code: Some(0),
        stdout: TEST_TOOL_BANNER.into(),
        stderr: "".into(),
    }
}

pub fn is_help_command(command: &CommandSpec) -> bool {
    command.args.last().map(String::as_str) == Some("--help")
}

/// Values passed with `--target-file` to a tool invocation.
pub fn tool_target_files(command: &CommandSpec) -> Vec<String> {
    command
        .args
        .windows(2)
        .filter(|w| w[0] == "--target-file")
        .map(|w| w[1].clone())
        .collect()
}

/// Writes a single rule matching `SerializeObject` calls.
pub fn write_test_rules(dir: &Path) -> PathBuf {
    let path = dir.join("rules.json");
    fs::write(
        &path,
        r#"{"rules": [{"name": "r1", "target_nodes": [
            {"type": "InvocationExpression", "method_name": "SerializeObject"}
        ], "action": {"type": "rename_method", "new_name": "Serialize"}}]}"#,
    )
    .unwrap();
    path
}
