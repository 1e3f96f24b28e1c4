//! Strategy that clones the repository, commits locally and pushes.
use log::*;
use std::{
    cell::RefCell,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    rc::Rc,
};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::{
    error::{FleetbumpError, Result},
    forge::{
        manager::ForgeManager,
        request::{CreateMergeRequest, FindMergeRequest, MergeRequest},
    },
    migration::{gateway::MigrationGateway, result::MigrationResult},
    repo::LocalRepository,
    strategy::{RepositoryInfo, RepositoryStrategy, StrategyKind, has_extension},
    transaction::Transaction,
};

/// A clone and the temporary directory that owns it.
struct Checkout {
    repo: Rc<LocalRepository>,
    dir: TempDir,
}

pub struct LocalCheckoutStrategy {
    forge: Rc<ForgeManager>,
    gateway: Rc<MigrationGateway>,
    /// Parent of the per repository clone directories; system temp when
    /// unset.
    work_root: Option<PathBuf>,
    checkout: RefCell<Option<Checkout>>,
}

impl LocalCheckoutStrategy {
    pub fn new(
        forge: Rc<ForgeManager>,
        gateway: Rc<MigrationGateway>,
        work_root: Option<PathBuf>,
    ) -> Self {
        Self {
            forge,
            gateway,
            work_root,
            checkout: RefCell::new(None),
        }
    }

    fn local(&self) -> Result<Rc<LocalRepository>> {
        self.checkout
            .borrow()
            .as_ref()
            .map(|c| Rc::clone(&c.repo))
            .ok_or_else(|| {
                FleetbumpError::preparation("repository has not been cloned")
            })
    }

    fn clone_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("fleetbump-clone-");
        let dir = match &self.work_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// Leaves `branch` for `base` so `branch` can be deleted.
    fn leave_branch(local: &LocalRepository, branch: &str, base: &str) -> Result<()> {
        if local.current_branch()? == branch {
            local.switch_branch(base)?;
        }
        Ok(())
    }

    fn commit_paths(
        &self,
        repo: &RepositoryInfo,
        files: &[String],
        message: &str,
    ) -> Result<bool> {
        if files.is_empty() {
            return Ok(false);
        }

        let local = self.local()?;
        local.add_paths(files)?;

        if !local.has_staged_changes()? {
            info!("{}: nothing staged, skipping commit", repo.path_with_namespace);
            return Ok(false);
        }

        let id = local.commit(message)?;
        info!(
            "{}: committed {} files as {id}",
            repo.path_with_namespace,
            files.len()
        );
        Ok(true)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

impl RepositoryStrategy for LocalCheckoutStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Local
    }

    fn prepare_repository(&self, repo: &RepositoryInfo) -> Result<()> {
        self.cleanup_repository(repo)?;

        if repo.http_url_to_repo.is_empty() {
            return Err(FleetbumpError::preparation(format!(
                "{} has no clone url",
                repo.path_with_namespace
            )));
        }

        let dir = self.clone_dir()?;
        let token = self.forge.remote_config().token;
        let local = LocalRepository::clone(
            &repo.http_url_to_repo,
            &dir.path().join(&repo.name),
            token,
        )
        .map_err(|err| {
            FleetbumpError::preparation(format!(
                "failed to clone {}: {err}",
                repo.path_with_namespace
            ))
        })?;

        let default_branch = &repo.default_branch;
        if local.current_branch()? != *default_branch {
            if !local.branch_exists(default_branch)? {
                local.create_branch(default_branch, default_branch)?;
            }
            local.switch_branch(default_branch)?;
        }

        self.checkout.replace(Some(Checkout {
            repo: Rc::new(local),
            dir,
        }));

        Ok(())
    }

    fn find_existing_merge_request(
        &self,
        repo: &RepositoryInfo,
        title: &str,
        target_branch: &str,
    ) -> Result<Option<MergeRequest>> {
        self.forge.find_open_merge_request(FindMergeRequest {
            project_id: repo.id,
            title: title.to_string(),
            target_branch: target_branch.to_string(),
        })
    }

    /// Walks the working tree, which is on `git_ref` after preparation.
    fn find_target_files(
        &self,
        repo: &RepositoryInfo,
        extension: &str,
        _git_ref: &str,
    ) -> Result<Vec<String>> {
        let local = self.local()?;
        let root = local.workdir();

        let files = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let relative = e.path().strip_prefix(root).ok()?;
                let relative = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                has_extension(&relative, extension).then_some(relative)
            })
            .collect::<Vec<_>>();

        info!(
            "{}: found {} .{extension} files",
            repo.path_with_namespace,
            files.len()
        );

        Ok(files)
    }

    fn get_file_content(
        &self,
        _repo: &RepositoryInfo,
        path: &str,
        _git_ref: &str,
    ) -> Result<Option<String>> {
        let local = self.local()?;
        read_optional(&local.workdir().join(path))
    }

    fn create_branch(
        &self,
        tx: &mut Transaction,
        _repo: &RepositoryInfo,
        branch: &str,
        base: &str,
    ) -> Result<bool> {
        let local = self.local()?;

        if local.branch_exists(branch)? {
            info!("branch {branch} already exists locally, recreating it");
            Self::leave_branch(&local, branch, base)?;
            local.delete_branch(branch)?;
        }

        local.create_branch(branch, base)?;
        local.switch_branch(branch)?;

        let name = branch.to_string();
        let base = base.to_string();
        let rollback_repo = Rc::clone(&local);
        tx.add_rollback_action(
            move || {
                Self::leave_branch(&rollback_repo, &name, &base)?;
                rollback_repo.delete_branch(&name)?;
                Ok(())
            },
            format!("delete local branch {branch}"),
        );
        tx.set_created_branch(branch);

        Ok(true)
    }

    fn update_file(
        &self,
        tx: &mut Transaction,
        _repo: &RepositoryInfo,
        path: &str,
        content: &str,
        _message: &str,
        _branch: &str,
    ) -> Result<bool> {
        let local = self.local()?;
        let full_path = local.workdir().join(path);
        let previous = read_optional(&full_path)?;

        if previous.as_deref() == Some(content) {
            debug!("{path} is unchanged");
            return Ok(false);
        }

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full_path, content)?;

        match previous {
            Some(original) => {
                let target = full_path.clone();
                tx.add_rollback_action(
                    move || Ok(fs::write(&target, original)?),
                    format!("restore file {path}"),
                );
            }
            None => {
                let target = full_path.clone();
                tx.add_rollback_action(
                    move || match fs::remove_file(&target) {
                        Err(err) if err.kind() != ErrorKind::NotFound => {
                            Err(err.into())
                        }
                        _ => Ok(()),
                    },
                    format!("delete created file {path}"),
                );
            }
        }

        Ok(true)
    }

    fn commit_changes(
        &self,
        _tx: &mut Transaction,
        repo: &RepositoryInfo,
        files: &[String],
        message: &str,
        _branch: &str,
    ) -> Result<bool> {
        self.commit_paths(repo, files, message)
    }

    fn execute_migration_tool(
        &self,
        _repo: &RepositoryInfo,
        rules_file: &Path,
        target_files: &[String],
        _branch: &str,
    ) -> Result<MigrationResult> {
        let local = self.local()?;
        Ok(self
            .gateway
            .execute(rules_file, target_files, local.workdir()))
    }

    fn create_second_commit(
        &self,
        _tx: &mut Transaction,
        repo: &RepositoryInfo,
        files: &[String],
        message: &str,
        _branch: &str,
    ) -> Result<bool> {
        self.commit_paths(repo, files, message)
    }

    fn push_branch(
        &self,
        tx: &mut Transaction,
        _repo: &RepositoryInfo,
        branch: &str,
    ) -> Result<()> {
        if self.forge.dry_run() {
            warn!("dry_run: would push branch {branch}");
            return Ok(());
        }

        let local = self.local()?;
        local.push_branch(branch)?;

        let name = branch.to_string();
        tx.add_rollback_action(
            move || local.delete_remote_branch(&name),
            format!("delete remote branch {branch}"),
        );

        Ok(())
    }

    fn create_merge_request(
        &self,
        tx: &mut Transaction,
        repo: &RepositoryInfo,
        request: CreateMergeRequest,
    ) -> Result<MergeRequest> {
        let merge_request = self.forge.create_merge_request(repo.id, request)?;

        let forge = Rc::clone(&self.forge);
        let project_id = repo.id;
        let iid = merge_request.iid;
        tx.add_rollback_action(
            move || forge.close_merge_request(project_id, iid),
            format!("close merge request !{iid}"),
        );

        Ok(merge_request)
    }

    fn cleanup_branch(
        &self,
        repo: &RepositoryInfo,
        branch: &str,
        base: &str,
    ) -> Result<()> {
        if let Ok(local) = self.local()
            && local.branch_exists(branch)?
        {
            Self::leave_branch(&local, branch, base)?;
            local.delete_branch(branch)?;
        }

        if self.forge.branch_exists(repo.id, branch)? {
            self.forge.delete_branch(repo.id, branch)?;
        }

        Ok(())
    }

    fn cleanup_repository(&self, repo: &RepositoryInfo) -> Result<()> {
        if let Some(checkout) = self.checkout.take() {
            debug!(
                "{}: removing clone at {}",
                repo.path_with_namespace,
                checkout.dir.path().display()
            );
            drop(checkout.repo);
            checkout.dir.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        migration::{gateway::ToolSettings, process::MockProcessRunner},
        test_helpers::*,
    };

    const PROJECT_FILE: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
  <ItemGroup>
    <PackageReference Include="Newtonsoft.Json" Version="12.0.1" />
  </ItemGroup>
</Project>
"#;

    /// Bare repository with `src/App.csproj` committed on `main`.
    fn create_origin() -> TempDir {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init_bare(dir.path()).unwrap();
        let blob = repo.blob(PROJECT_FILE.as_bytes()).unwrap();

        let mut src = repo.treebuilder(None).unwrap();
        src.insert("App.csproj", blob, 0o100644).unwrap();
        let src_tree = src.write().unwrap();

        let mut root = repo.treebuilder(None).unwrap();
        root.insert("src", src_tree, 0o040000).unwrap();
        let tree_id = root.write().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();

        let sig =
            git2::Signature::now("Test User", "test@example.com").unwrap();
        repo.commit(Some("refs/heads/main"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
        repo.set_head("refs/heads/main").unwrap();
        dir
    }

    fn project_for(origin: &TempDir) -> RepositoryInfo {
        RepositoryInfo {
            http_url_to_repo: origin.path().to_string_lossy().to_string(),
            ..create_test_project()
        }
    }

    fn strategy(mock: crate::forge::traits::MockForge, work: &TempDir) -> LocalCheckoutStrategy {
        LocalCheckoutStrategy::new(
            create_forge_manager(mock),
            Rc::new(MigrationGateway::new(
                ToolSettings::default(),
                Rc::new(MockProcessRunner::new()),
            )),
            Some(work.path().to_path_buf()),
        )
    }

    fn remote_branch_exists(origin: &TempDir, branch: &str) -> bool {
        let repo = git2::Repository::open_bare(origin.path()).unwrap();
        repo.find_reference(&format!("refs/heads/{branch}")).is_ok()
    }

    #[test_log::test]
    fn full_workflow_rolls_back_every_step() {
        let origin = create_origin();
        let work = TempDir::new().unwrap();
        let strategy = strategy(create_mock_forge(false), &work);
        let repo = project_for(&origin);
        let mut tx = Transaction::new("platform/orders-service", StrategyKind::Local);

        strategy.prepare_repository(&repo).unwrap();

        let files = strategy.find_target_files(&repo, "csproj", "main").unwrap();
        assert_eq!(files, vec!["src/App.csproj"]);

        assert!(strategy.create_branch(&mut tx, &repo, "update-x", "main").unwrap());
        let updated = PROJECT_FILE.replace("12.0.1", "13.0.3");
        assert!(
            strategy
                .update_file(&mut tx, &repo, "src/App.csproj", &updated, "bump", "update-x")
                .unwrap()
        );
        assert!(
            strategy
                .commit_changes(&mut tx, &repo, &files, "Update Newtonsoft.Json", "update-x")
                .unwrap()
        );
        strategy.push_branch(&mut tx, &repo, "update-x").unwrap();
        assert!(remote_branch_exists(&origin, "update-x"));

        let result = tx.execute_rollback();

        assert!(result.success, "{}", result.report());
        assert_eq!(
            result.completed_actions,
            vec![
                "delete remote branch update-x",
                "restore file src/App.csproj",
                "delete local branch update-x",
            ]
        );
        assert!(!remote_branch_exists(&origin, "update-x"));

        let local = strategy.local().unwrap();
        assert_eq!(local.current_branch().unwrap(), "main");
        assert!(!local.branch_exists("update-x").unwrap());
        assert_eq!(
            strategy.get_file_content(&repo, "src/App.csproj", "main").unwrap(),
            Some(PROJECT_FILE.to_string())
        );

        strategy.cleanup_repository(&repo).unwrap();
        assert!(strategy.local().is_err());
    }

    #[test]
    fn second_commit_only_stages_given_files() {
        let origin = create_origin();
        let work = TempDir::new().unwrap();
        let strategy = strategy(create_mock_forge(false), &work);
        let repo = project_for(&origin);
        let mut tx = Transaction::new("platform/orders-service", StrategyKind::Local);

        strategy.prepare_repository(&repo).unwrap();
        strategy.create_branch(&mut tx, &repo, "update-x", "main").unwrap();
        strategy
            .update_file(&mut tx, &repo, "src/Migrated.cs", "class A {}", "", "update-x")
            .unwrap();
        strategy
            .update_file(&mut tx, &repo, "src/Unrelated.cs", "class B {}", "", "update-x")
            .unwrap();

        let committed = strategy
            .create_second_commit(
                &mut tx,
                &repo,
                &["src/Migrated.cs".to_string()],
                "Apply code migrations",
                "update-x",
            )
            .unwrap();
        assert!(committed);

        let workdir = strategy.local().unwrap().workdir().to_path_buf();
        let git = git2::Repository::open(&workdir).unwrap();
        let head = git.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.message(), Some("Apply code migrations"));
        let tree = head.tree().unwrap();
        assert!(tree.get_path(Path::new("src/Migrated.cs")).is_ok());
        assert!(tree.get_path(Path::new("src/Unrelated.cs")).is_err());

        let nothing = strategy
            .create_second_commit(&mut tx, &repo, &[], "empty", "update-x")
            .unwrap();
        assert!(!nothing);

        tx.clear_rollback_actions();
    }

    #[test]
    fn dry_run_skips_push() {
        let origin = create_origin();
        let work = TempDir::new().unwrap();
        let strategy = strategy(create_mock_forge(true), &work);
        let repo = project_for(&origin);
        let mut tx = Transaction::new("platform/orders-service", StrategyKind::Local);

        strategy.prepare_repository(&repo).unwrap();
        strategy.create_branch(&mut tx, &repo, "update-x", "main").unwrap();
        strategy.push_branch(&mut tx, &repo, "update-x").unwrap();

        assert!(!remote_branch_exists(&origin, "update-x"));
        assert_eq!(tx.pending_actions(), 1);
        tx.clear_rollback_actions();
    }

    #[test]
    fn operations_before_prepare_are_preparation_faults() {
        let work = TempDir::new().unwrap();
        let strategy = strategy(create_mock_forge(false), &work);
        let result =
            strategy.find_target_files(&create_test_project(), "csproj", "main");
        assert!(matches!(result, Err(FleetbumpError::Preparation(_))));
    }

    #[test]
    fn clone_failure_is_a_preparation_fault() {
        let work = TempDir::new().unwrap();
        let strategy = strategy(create_mock_forge(false), &work);
        let repo = RepositoryInfo {
            http_url_to_repo: work.path().join("missing").to_string_lossy().to_string(),
            ..create_test_project()
        };
        let result = strategy.prepare_repository(&repo);
        assert!(matches!(result, Err(FleetbumpError::Preparation(_))));
    }

    #[test]
    fn cleanup_branch_ignores_absent_branches() {
        let origin = create_origin();
        let work = TempDir::new().unwrap();
        let mut mock = create_mock_forge(false);
        mock.expect_branch_exists().returning(|_, _| Ok(false));
        mock.expect_delete_branch().never();
        let strategy = strategy(mock, &work);
        let repo = project_for(&origin);

        strategy.prepare_repository(&repo).unwrap();
        strategy.cleanup_branch(&repo, "update-x", "main").unwrap();
    }
}
