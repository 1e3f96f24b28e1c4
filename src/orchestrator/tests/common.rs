//! Common test utilities for orchestrator tests.

use std::{
    rc::Rc,
    sync::{Arc, Mutex},
};

use crate::{
    config::{MigrationSettings, package::PackageUpdateSpec},
    forge::request::MergeRequest,
    migration::catalog::{MigrationCatalog, MigrationConfiguration},
    orchestrator::{UpdateOrchestrator, config::OrchestratorConfig},
    strategy::{MockRepositoryStrategy, RepositoryStrategy, StrategyKind},
};

pub use crate::test_helpers::{create_test_merge_request, create_test_project};

pub const APP_CSPROJ: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
  <ItemGroup>
    <PackageReference Include="Newtonsoft.Json" Version="12.0.1" />
    <PackageReference Include="Serilog" Version="2.10.0" />
  </ItemGroup>
</Project>
"#;

pub const UP_TO_DATE_CSPROJ: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
  <ItemGroup>
    <PackageReference Include="Newtonsoft.Json" Version="13.0.3" />
  </ItemGroup>
</Project>
"#;

/// Ordered log of strategy calls, shared with mock closures.
pub type Calls = Arc<Mutex<Vec<String>>>;

pub fn calls() -> Calls {
    Arc::new(Mutex::new(vec![]))
}

pub fn record(calls: &Calls, entry: impl Into<String>) {
    calls.lock().unwrap().push(entry.into());
}

pub fn recorded(calls: &Calls) -> Vec<String> {
    calls.lock().unwrap().clone()
}

pub fn newtonsoft(version: &str) -> PackageUpdateSpec {
    PackageUpdateSpec::new("Newtonsoft.Json", version)
}

pub fn serilog(version: &str) -> PackageUpdateSpec {
    PackageUpdateSpec::new("Serilog", version)
}

pub fn migrations(enabled: bool, strict: bool) -> MigrationSettings {
    MigrationSettings {
        enabled,
        strict,
        ..Default::default()
    }
}

pub fn create_config(
    packages: Vec<PackageUpdateSpec>,
    migrations: MigrationSettings,
) -> OrchestratorConfig {
    OrchestratorConfig::builder()
        .packages(packages)
        .migrations(migrations)
        .build()
        .unwrap()
}

/// Catalog with one Newtonsoft.Json configuration for moving to 13.x.
pub fn create_catalog() -> MigrationCatalog {
    let configuration: MigrationConfiguration =
        serde_json::from_value(serde_json::json!({
            "id": "newtonsoft-13",
            "package_name": "Newtonsoft.Json",
            "description": "Serializer API changes in 13.0",
            "version_conditions": [
                { "type": "greater_than_or_equal", "version": "13.0.0" }
            ],
            "rules": [{
                "name": "rename-serialize",
                "target_nodes": [{
                    "type": "InvocationExpression",
                    "method_name": "SerializeObject",
                    "containing_type": "JsonConvert"
                }],
                "action": { "type": "rename_method", "new_name": "Serialize" }
            }]
        }))
        .unwrap();

    MigrationCatalog::new(vec![configuration])
}

pub fn create_orchestrator(
    strategy: MockRepositoryStrategy,
    config: OrchestratorConfig,
    catalog: MigrationCatalog,
) -> UpdateOrchestrator {
    let strategy: Rc<dyn RepositoryStrategy> = Rc::new(strategy);
    UpdateOrchestrator::builder()
        .config(Rc::new(config))
        .strategy(strategy)
        .catalog(Rc::new(catalog))
        .build()
        .unwrap()
}

/// Strategy answering the calls every run makes: no existing merge
/// request, a prepared repository and the given package files.
pub fn create_strategy(
    calls: &Calls,
    files: Vec<(&'static str, &'static str)>,
) -> MockRepositoryStrategy {
    let mut mock = MockRepositoryStrategy::new();
    mock.expect_kind().return_const(StrategyKind::Api);

    let log = Arc::clone(calls);
    mock.expect_find_existing_merge_request()
        .returning(move |_, _, _| {
            record(&log, "find_existing_merge_request");
            Ok(None)
        });

    let log = Arc::clone(calls);
    mock.expect_prepare_repository().returning(move |_| {
        record(&log, "prepare_repository");
        Ok(())
    });

    let paths: Vec<String> = files.iter().map(|(p, _)| p.to_string()).collect();
    mock.expect_find_target_files()
        .withf(|_, extension, git_ref| extension == "csproj" && git_ref == "main")
        .returning(move |_, _, _| Ok(paths.clone()));

    mock.expect_get_file_content()
        .returning(move |_, path, _| {
            Ok(files
                .iter()
                .find(|(p, _)| *p == path)
                .map(|(_, content)| content.to_string()))
        });

    let log = Arc::clone(calls);
    mock.expect_cleanup_repository().returning(move |_| {
        record(&log, "cleanup_repository");
        Ok(())
    });

    mock
}

/// Expects every mutation up to and including the merge request to
/// succeed, registering a recorded rollback action for each.
pub fn expect_mutations(mock: &mut MockRepositoryStrategy, calls: &Calls) {
    let log = Arc::clone(calls);
    mock.expect_create_branch()
        .returning(move |tx, _, branch, base| {
            record(&log, format!("create_branch {branch} from {base}"));
            let undo = Arc::clone(&log);
            let name = branch.to_string();
            tx.add_rollback_action(
                move || {
                    record(&undo, format!("rollback delete branch {name}"));
                    Ok(())
                },
                format!("delete branch {branch}"),
            );
            tx.set_created_branch(branch);
            Ok(true)
        });

    let log = Arc::clone(calls);
    mock.expect_update_file()
        .returning(move |tx, _, path, _, _, _| {
            record(&log, format!("update_file {path}"));
            let undo = Arc::clone(&log);
            let file = path.to_string();
            tx.add_rollback_action(
                move || {
                    record(&undo, format!("rollback revert file {file}"));
                    Ok(())
                },
                format!("revert file {path}"),
            );
            Ok(true)
        });

    let log = Arc::clone(calls);
    mock.expect_commit_changes()
        .returning(move |_, _, files, _, _| {
            record(&log, format!("commit_changes {}", files.join(",")));
            Ok(true)
        });

    let log = Arc::clone(calls);
    mock.expect_push_branch().returning(move |_, _, branch| {
        record(&log, format!("push_branch {branch}"));
        Ok(())
    });

    expect_merge_request(mock, calls);
}

pub fn expect_merge_request(mock: &mut MockRepositoryStrategy, calls: &Calls) {
    let log = Arc::clone(calls);
    mock.expect_create_merge_request()
        .returning(move |_, _, request| {
            record(&log, "create_merge_request");
            Ok(MergeRequest {
                source_branch: request.source_branch.clone(),
                ..create_test_merge_request(7, &request.title)
            })
        });
}
