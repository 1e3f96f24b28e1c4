//! Local git checkout operations.
//!
//! Wraps `git2::Repository` with the handful of operations the
//! local-checkout strategy needs: clone, branch management, staging
//! explicit paths, committing and pushing with token authentication.
use git2::{BranchType, ErrorCode, RemoteCallbacks, build::CheckoutBuilder};
use log::*;
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};

use crate::{error::Result, forge::config::TOKEN_USER};

/// Name of the remote created by cloning.
const DEFAULT_REMOTE: &str = "origin";
/// Committer identity used when the checkout has none configured.
const FALLBACK_USER: &str = "fleetbump";
const FALLBACK_EMAIL: &str = "fleetbump@localhost";

/// Create Git authentication callbacks for username/token authentication.
fn get_auth_callbacks<'r>(user: String, token: String) -> RemoteCallbacks<'r> {
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username, _allowed| {
        git2::Cred::userpass_plaintext(&user, &token)
    });
    callbacks
}

/// A working copy on local disk.
pub struct LocalRepository {
    repo: git2::Repository,
    token: SecretString,
    workdir: PathBuf,
}

impl LocalRepository {
    /// Clone `url` into `local_path` and check out the remote's default
    /// branch.
    pub fn clone(url: &str, local_path: &Path, token: SecretString) -> Result<Self> {
        info!("cloning {url} into {}", local_path.display());

        let callbacks = get_auth_callbacks(
            TOKEN_USER.into(),
            token.expose_secret().to_string(),
        );
        let mut fetch_options = git2::FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);

        let repo = git2::build::RepoBuilder::new()
            .fetch_options(fetch_options)
            .clone(url, local_path)?;

        Self::from_git2(repo, token)
    }

    /// Open an existing working copy.
    pub fn open(path: &Path, token: SecretString) -> Result<Self> {
        let repo = git2::Repository::open(path)?;
        Self::from_git2(repo, token)
    }

    fn from_git2(repo: git2::Repository, token: SecretString) -> Result<Self> {
        let workdir = repo
            .workdir()
            .ok_or_else(|| {
                git2::Error::from_str("bare repositories are not supported")
            })?
            .to_path_buf();
        Ok(Self {
            repo,
            token,
            workdir,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn current_branch(&self) -> Result<String> {
        let head = self.repo.head()?;
        Ok(head.shorthand().unwrap_or_default().to_string())
    }

    fn resolve_base(&self, base: &str) -> Result<git2::Commit<'_>> {
        let local = format!("refs/heads/{base}");
        let remote = format!("refs/remotes/{DEFAULT_REMOTE}/{base}");
        let reference = match self.repo.find_reference(&local) {
            Ok(reference) => reference,
            Err(err) if err.code() == ErrorCode::NotFound => {
                self.repo.find_reference(&remote)?
            }
            Err(err) => return Err(err.into()),
        };
        Ok(reference.peel_to_commit()?)
    }

    /// Create `branch` pointing at the tip of `base`.
    pub fn create_branch(&self, branch: &str, base: &str) -> Result<()> {
        info!("creating branch {branch} from {base}");
        let commit = self.resolve_base(base)?;
        self.repo.branch(branch, &commit, false)?;
        Ok(())
    }

    /// Check out `branch`, discarding uncommitted changes.
    pub fn switch_branch(&self, branch: &str) -> Result<()> {
        info!("switching to branch: {branch}");
        let ref_name = format!("refs/heads/{}", branch);
        let target_obj = self.repo.revparse_single(&ref_name)?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repo.checkout_tree(&target_obj, Some(&mut checkout))?;
        self.repo.set_head(&ref_name)?;
        Ok(())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        match self.repo.find_branch(branch, BranchType::Local) {
            Ok(_) => Ok(true),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete a local branch; returns false when it did not exist.
    pub fn delete_branch(&self, branch: &str) -> Result<bool> {
        match self.repo.find_branch(branch, BranchType::Local) {
            Ok(mut found) => {
                debug!("deleting local branch {branch}");
                found.delete()?;
                Ok(true)
            }
            Err(err) if err.code() == ErrorCode::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Stage exactly `paths` (relative to the working directory). Paths
    /// that no longer exist are removed from the index.
    pub fn add_paths(&self, paths: &[String]) -> Result<()> {
        debug!("staging {} paths", paths.len());
        let mut index = self.repo.index()?;
        for path in paths {
            let relative = Path::new(path);
            if self.workdir.join(relative).exists() {
                index.add_path(relative)?;
            } else {
                index.remove_path(relative)?;
            }
        }
        index.write()?;
        Ok(())
    }

    /// Whether the index differs from HEAD.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let head_tree = self.repo.head()?.peel_to_tree()?;
        let index = self.repo.index()?;
        let diff =
            self.repo
                .diff_tree_to_index(Some(&head_tree), Some(&index), None)?;
        Ok(diff.deltas().len() > 0)
    }

    fn signature(&self) -> Result<git2::Signature<'static>> {
        let config = self.repo.config()?.snapshot()?;
        let user = config
            .get_string("user.name")
            .unwrap_or_else(|_| FALLBACK_USER.into());
        let email = config
            .get_string("user.email")
            .unwrap_or_else(|_| FALLBACK_EMAIL.into());
        debug!("using committer: user: {user}, email: {email}");
        Ok(git2::Signature::now(&user, &email)?)
    }

    /// Commit the current index on HEAD and return the new commit id.
    pub fn commit(&self, msg: &str) -> Result<String> {
        debug!("committing changes with msg: {msg}");
        let mut index = self.repo.index()?;
        let oid = index.write_tree()?;
        let tree = self.repo.find_tree(oid)?;
        let parent_commit = self.repo.head()?.peel_to_commit()?;
        let committer = self.signature()?;
        let commit = self.repo.commit(
            Some("HEAD"),
            &committer,
            &committer,
            msg,
            &tree,
            &[&parent_commit],
        )?;
        Ok(commit.to_string())
    }

    fn push_refspec(&self, refspec: &str) -> Result<()> {
        let callbacks = get_auth_callbacks(
            TOKEN_USER.into(),
            self.token.expose_secret().to_string(),
        );
        let mut push_opts = git2::PushOptions::default();
        push_opts.remote_callbacks(callbacks);

        let mut remote = self.repo.find_remote(DEFAULT_REMOTE)?;
        remote.push(&[refspec], Some(&mut push_opts))?;
        Ok(())
    }

    pub fn push_branch(&self, branch: &str) -> Result<()> {
        info!("pushing branch {branch}");
        self.push_refspec(&format!("refs/heads/{branch}:refs/heads/{branch}"))
    }

    pub fn delete_remote_branch(&self, branch: &str) -> Result<()> {
        info!("deleting remote branch {branch}");
        self.push_refspec(&format!(":refs/heads/{branch}"))
    }
}
