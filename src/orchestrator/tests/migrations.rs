use std::{
    fs,
    sync::{Arc, Mutex},
};

use super::common::*;
use crate::{
    config::package::PackageUpdateSpec,
    migration::result::MigrationResult,
    orchestrator::{NO_MIGRATION_COMMIT, SuccessKind, UpdateOutcome},
    strategy::MockRepositoryStrategy,
};

fn expect_sources(mock: &mut MockRepositoryStrategy) {
    mock.expect_find_target_files()
        .withf(|_, extension, git_ref| extension == "cs" && git_ref == "main")
        .returning(|_, _, _| {
            Ok(vec!["src/Serializer.cs".into(), "src/Program.cs".into()])
        });
}

fn migrated() -> MigrationResult {
    MigrationResult {
        success: true,
        modified_files: vec!["src/Serializer.cs".into()],
        applied_rules: vec!["rename-serialize".into()],
        errors: vec![],
        summary: "1 files modified, 1 rules applied across 1 batch(es)".into(),
    }
}

fn created(outcome: UpdateOutcome) -> crate::orchestrator::CreatedChange {
    match outcome {
        UpdateOutcome::Success(SuccessKind::Created(change)) => change,
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test_log::test]
fn successful_migration_lands_second_commit() {
    let calls = calls();
    let mut mock = create_strategy(&calls, vec![("src/App.csproj", APP_CSPROJ)]);
    expect_mutations(&mut mock, &calls);
    expect_sources(&mut mock);

    let rules = Arc::new(Mutex::new(String::new()));
    let captured = Arc::clone(&rules);
    let log = Arc::clone(&calls);
    mock.expect_execute_migration_tool()
        .withf(|_, _, files, branch| {
            files.len() == 2 && branch == "update-newtonsoft-json-to-13_0_3"
        })
        .times(1)
        .returning(move |_, rules_file, _, _| {
            record(&log, "execute_migration_tool");
            *captured.lock().unwrap() = fs::read_to_string(rules_file).unwrap();
            Ok(migrated())
        });

    let log = Arc::clone(&calls);
    mock.expect_create_second_commit()
        .withf(|_, _, files, message, _| {
            files == ["src/Serializer.cs".to_string()]
                && message == "Apply code migrations: rename-serialize"
        })
        .times(1)
        .returning(move |_, _, _, _, _| {
            record(&log, "create_second_commit");
            Ok(true)
        });

    let orchestrator = create_orchestrator(
        mock,
        create_config(vec![newtonsoft("13.0.3")], migrations(true, true)),
        create_catalog(),
    );

    let change = created(orchestrator.process_repository(&create_test_project()));

    assert_eq!(change.migration, Some(migrated()));
    assert!(rules.lock().unwrap().contains("rename-serialize"));

    let calls = recorded(&calls);
    let position =
        |entry: &str| calls.iter().position(|c| c.starts_with(entry)).unwrap();
    assert!(position("commit_changes") < position("execute_migration_tool"));
    assert!(position("create_second_commit") < position("push_branch"));
}

#[test_log::test]
fn strict_migration_failure_rolls_back_package_update() {
    let calls = calls();
    let mut mock = create_strategy(&calls, vec![("src/App.csproj", APP_CSPROJ)]);
    expect_sources(&mut mock);
    let log = Arc::clone(&calls);
    mock.expect_create_branch().returning(move |tx, _, branch, _| {
        let undo = Arc::clone(&log);
        tx.add_rollback_action(
            move || {
                record(&undo, "rollback branch");
                Ok(())
            },
            format!("delete branch {branch}"),
        );
        Ok(true)
    });
    mock.expect_update_file().returning(|_, _, _, _, _, _| Ok(true));
    mock.expect_commit_changes().returning(|_, _, _, _, _| Ok(true));
    mock.expect_execute_migration_tool()
        .returning(|_, _, _, _| {
            Ok(MigrationResult::failed("batch 1/1: tool exited with Some(1)"))
        });
    mock.expect_create_second_commit().times(0);
    mock.expect_push_branch().times(0);
    mock.expect_create_merge_request().times(0);

    let orchestrator = create_orchestrator(
        mock,
        create_config(vec![newtonsoft("13.0.3")], migrations(true, true)),
        create_catalog(),
    );

    match orchestrator.process_repository(&create_test_project()) {
        UpdateOutcome::FailedRolledBack { error, rollback } => {
            assert!(error.starts_with("Migration failed"));
            assert!(rollback.success);
            assert_eq!(
                rollback.completed_actions,
                vec!["delete branch update-newtonsoft-json-to-13_0_3"]
            );
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(recorded(&calls).contains(&"rollback branch".to_string()));
}

#[test]
fn strict_mode_reports_unavailable_tool() {
    let calls = calls();
    let mut mock = create_strategy(&calls, vec![("src/App.csproj", APP_CSPROJ)]);
    expect_mutations(&mut mock, &calls);
    expect_sources(&mut mock);
    mock.expect_execute_migration_tool()
        .returning(|_, _, _, _| Ok(MigrationResult::unavailable()));

    let orchestrator = create_orchestrator(
        mock,
        create_config(vec![newtonsoft("13.0.3")], migrations(true, true)),
        create_catalog(),
    );

    match orchestrator.process_repository(&create_test_project()) {
        UpdateOutcome::FailedRolledBack { error, .. } => {
            assert!(error.starts_with("Migration tool unavailable"))
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test_log::test]
fn empty_migration_commit_is_not_reported_as_migrated() {
    let calls = calls();
    let mut mock = create_strategy(&calls, vec![("src/App.csproj", APP_CSPROJ)]);
    expect_sources(&mut mock);
    mock.expect_create_branch().returning(|_, _, _, _| Ok(true));
    mock.expect_update_file().returning(|_, _, _, _, _, _| Ok(true));
    mock.expect_commit_changes().returning(|_, _, _, _, _| Ok(true));
    mock.expect_push_branch().returning(|_, _, _| Ok(()));
    mock.expect_execute_migration_tool()
        .returning(|_, _, _, _| Ok(migrated()));
    mock.expect_create_second_commit()
        .times(1)
        .returning(|_, _, _, _, _| Ok(false));

    let descriptions = Arc::new(Mutex::new(vec![]));
    let captured = Arc::clone(&descriptions);
    mock.expect_create_merge_request()
        .times(1)
        .returning(move |_, _, request| {
            captured.lock().unwrap().push(request.description.clone());
            Ok(create_test_merge_request(9, &request.title))
        });

    let orchestrator = create_orchestrator(
        mock,
        create_config(vec![newtonsoft("13.0.3")], migrations(true, true)),
        create_catalog(),
    );

    let change = created(orchestrator.process_repository(&create_test_project()));

    let migration = change.migration.unwrap();
    assert!(migration.success);
    assert!(migration.modified_files.is_empty());
    assert_eq!(migration.summary, NO_MIGRATION_COMMIT);

    let description = &descriptions.lock().unwrap()[0];
    assert!(description.contains(NO_MIGRATION_COMMIT));
    assert!(!description.contains("`src/Serializer.cs`"));
}

#[test_log::test]
fn lenient_migration_failure_opens_package_only_merge_request() {
    let calls = calls();
    let mut mock = create_strategy(&calls, vec![("src/App.csproj", APP_CSPROJ)]);
    expect_sources(&mut mock);
    let log = Arc::clone(&calls);
    mock.expect_create_branch().returning(move |_, _, _, _| {
        record(&log, "create_branch");
        Ok(true)
    });
    mock.expect_update_file().returning(|_, _, _, _, _, _| Ok(true));
    mock.expect_commit_changes().returning(|_, _, _, _, _| Ok(true));
    mock.expect_push_branch().returning(|_, _, _| Ok(()));
    mock.expect_execute_migration_tool()
        .returning(|_, _, _, _| Ok(MigrationResult::unavailable()));
    mock.expect_create_second_commit().times(0);

    let descriptions = Arc::new(Mutex::new(vec![]));
    let captured = Arc::clone(&descriptions);
    mock.expect_create_merge_request()
        .times(1)
        .returning(move |_, _, request| {
            captured.lock().unwrap().push(request.description.clone());
            Ok(create_test_merge_request(9, &request.title))
        });

    let orchestrator = create_orchestrator(
        mock,
        create_config(vec![newtonsoft("13.0.3")], migrations(true, false)),
        create_catalog(),
    );

    let change = created(orchestrator.process_repository(&create_test_project()));

    let migration = change.migration.unwrap();
    assert!(!migration.success);
    assert!(migration.is_tool_unavailable());
    assert!(
        descriptions.lock().unwrap()[0]
            .contains("Migrations did not complete")
    );
}

#[test]
fn disabled_migrations_never_run_the_tool() {
    let calls = calls();
    let mut mock = create_strategy(&calls, vec![("src/App.csproj", APP_CSPROJ)]);
    expect_mutations(&mut mock, &calls);
    mock.expect_execute_migration_tool().times(0);
    mock.expect_create_second_commit().times(0);

    let orchestrator = create_orchestrator(
        mock,
        create_config(vec![newtonsoft("13.0.3")], migrations(false, true)),
        create_catalog(),
    );

    let change = created(orchestrator.process_repository(&create_test_project()));
    assert!(change.migration.is_none());
}

#[test]
fn packages_without_applicable_configuration_skip_the_tool() {
    let calls = calls();
    let mut mock = create_strategy(&calls, vec![("src/App.csproj", APP_CSPROJ)]);
    expect_mutations(&mut mock, &calls);
    mock.expect_execute_migration_tool().times(0);

    let orchestrator = create_orchestrator(
        mock,
        create_config(vec![serilog("3.1.1")], migrations(true, true)),
        create_catalog(),
    );

    let change = created(orchestrator.process_repository(&create_test_project()));
    assert!(change.migration.is_none());
}

#[test]
fn version_conditions_gate_migrations() {
    let calls = calls();
    let mut mock = create_strategy(&calls, vec![("src/App.csproj", APP_CSPROJ)]);
    expect_mutations(&mut mock, &calls);
    mock.expect_execute_migration_tool().times(0);

    let orchestrator = create_orchestrator(
        mock,
        create_config(vec![newtonsoft("12.0.3")], migrations(true, true)),
        create_catalog(),
    );

    let change = created(orchestrator.process_repository(&create_test_project()));
    assert!(change.migration.is_none());
}

#[test]
fn explicit_rule_id_ignores_version_conditions() {
    let calls = calls();
    let mut mock = create_strategy(&calls, vec![("src/App.csproj", APP_CSPROJ)]);
    expect_mutations(&mut mock, &calls);
    expect_sources(&mut mock);
    mock.expect_execute_migration_tool()
        .times(1)
        .returning(|_, _, _, _| Ok(MigrationResult::empty("No files reference the migrated APIs")));
    mock.expect_create_second_commit().times(0);

    let package = PackageUpdateSpec {
        migration_rule_id: Some("newtonsoft-13".into()),
        ..newtonsoft("12.0.3")
    };

    let orchestrator = create_orchestrator(
        mock,
        create_config(vec![package], migrations(true, true)),
        create_catalog(),
    );

    let change = created(orchestrator.process_repository(&create_test_project()));
    assert_eq!(
        change.migration.map(|m| m.summary),
        Some("No files reference the migrated APIs".to_string())
    );
}
