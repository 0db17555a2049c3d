//! Versioned branch synchronization
//!
//! Drives the git side of an export or import: clone into an ephemeral
//! workspace, check out the base ref, then either stage a version branch for
//! a fresh snapshot (export) or check one out read-only (import).

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::config::RepositoryConfig;
use crate::error::XrError;
use crate::git::{ResetMode, VersionControl};

/// Remote version branches are published to
pub const REMOTE: &str = "origin";

/// Progress of a run through the branch state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Cloned,
    BaseChecked,
    BranchCreated,
    VersionBranchReady,
    Written,
    Committed,
    Pushed,
    ReadOnly,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Temporary directory holding the clone for a single run
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    preserve: bool,
}

impl Workspace {
    /// Create a fresh, empty workspace directory
    pub fn create(preserve: bool) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("xrgit")
            .tempdir()
            .context("Error creating temporary directory for git operations")?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
            preserve,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if self.preserve {
                #[allow(deprecated)]
                let kept = dir.into_path();
                warn!("The working git directory will not be removed: {}", kept.display());
            }
        }
    }
}

/// The git state machine for one export or import run
pub struct VersionedRepoSync {
    git: Arc<dyn VersionControl>,
    workspace: Workspace,
    uri: String,
    base_ref: String,
    context_dir: PathBuf,
    state: SyncState,
    branch: Option<String>,
    previous_head: Option<String>,
}

impl VersionedRepoSync {
    pub fn new(git: Arc<dyn VersionControl>, config: &RepositoryConfig, workspace: Workspace) -> Result<Self> {
        Ok(Self {
            git,
            workspace,
            uri: config.spec.git.uri.clone(),
            base_ref: config.base_ref().to_string(),
            context_dir: config.context_dir()?,
            state: SyncState::Uninitialized,
            branch: None,
            previous_head: None,
        })
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Root of the cloned working tree
    pub fn repo_dir(&self) -> &Path {
        self.workspace.path()
    }

    /// Directory object files live in (the repository root or its context dir)
    pub fn object_dir(&self) -> PathBuf {
        self.repo_dir().join(&self.context_dir)
    }

    /// Version branch selected by this run, once known
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Head of the version branch before it was staged, if it already existed
    pub fn previous_head(&self) -> Option<&str> {
        self.previous_head.as_deref()
    }

    fn expect_state(&self, expected: SyncState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(anyhow!(
                "Cannot {} while the repository is {} (expected {})",
                operation,
                self.state,
                expected
            ));
        }
        Ok(())
    }

    fn current_branch(&self) -> Result<String> {
        self.branch
            .clone()
            .ok_or_else(|| anyhow!("No version branch has been selected"))
    }

    /// Clone the configured repository into the workspace
    pub async fn clone_repo(&mut self) -> Result<()> {
        self.expect_state(SyncState::Uninitialized, "clone")?;

        info!("Cloning {}", self.uri);
        self.git
            .clone_repo(&self.uri, self.workspace.path())
            .await
            .context("Error cloning git repository")?;

        self.state = SyncState::Cloned;
        Ok(())
    }

    /// Check out the base ref and make sure the object directory exists
    pub async fn checkout_base(&mut self) -> Result<()> {
        self.expect_state(SyncState::Cloned, "check out the base ref")?;

        self.git
            .checkout(self.repo_dir(), &self.base_ref)
            .await
            .with_context(|| {
                format!(
                    "Error setting up git repository; does not contain baseRef ({})",
                    self.base_ref
                )
            })?;

        let object_dir = self.object_dir();
        tokio::fs::create_dir_all(&object_dir)
            .await
            .with_context(|| format!("Error creating context directory {}", object_dir.display()))?;

        self.state = SyncState::BaseChecked;
        Ok(())
    }

    /// Clone and check out the base ref
    pub async fn prepare(&mut self) -> Result<()> {
        self.clone_repo().await?;
        self.checkout_base().await
    }

    /// Create the branch for `version` from the base ref.
    ///
    /// An existing branch is only reused when `overwrite` is set.
    pub async fn create_version_branch(&mut self, branch: &str, overwrite: bool) -> Result<()> {
        self.expect_state(SyncState::BaseChecked, "create a version branch")?;

        let exists = self.git.checkout(self.repo_dir(), branch).await.is_ok();
        if exists && !overwrite {
            return Err(XrError::policy(format!(
                "Branch already exists and --overwrite was not specified ({})",
                branch
            ))
            .into());
        }

        if let Err(e) = self
            .git
            .create_branch(self.repo_dir(), branch, &self.base_ref)
            .await
        {
            if exists {
                info!("Reusing existing branch {}", branch);
            } else {
                warn!("Error while creating branch ({}): {:#}", branch, e);
            }
        }

        self.branch = Some(branch.to_string());
        self.state = SyncState::BranchCreated;
        Ok(())
    }

    /// Replace the branch's content with the base ref while keeping its history.
    ///
    /// After staging, the working tree and index match the base ref and the
    /// branch still points at its previous head, so the next commit records
    /// the difference between the last snapshot and the new one.
    pub async fn stage_version_branch(&mut self) -> Result<()> {
        self.expect_state(SyncState::BranchCreated, "stage the version branch")?;
        let branch = self.current_branch()?;
        let dir = self.repo_dir().to_path_buf();

        self.git
            .checkout(&dir, &branch)
            .await
            .with_context(|| format!("Error checking out git branch ({})", branch))?;

        let head = self
            .git
            .rev_parse(&dir, "HEAD")
            .await
            .with_context(|| format!("Unable to determine HEAD commit id for branch ({})", branch))?;

        self.git
            .reset(&dir, ResetMode::Hard, &self.base_ref)
            .await
            .with_context(|| {
                format!("Error hard resetting git branch ({}) to ({})", branch, self.base_ref)
            })?;

        self.git
            .reset(&dir, ResetMode::Soft, &head)
            .await
            .with_context(|| format!("Error soft resetting git branch ({}) to ({})", branch, head))?;

        // reset --hard leaves the context dir missing when the base ref lacks it
        let object_dir = self.object_dir();
        tokio::fs::create_dir_all(&object_dir)
            .await
            .with_context(|| format!("Error creating context directory {}", object_dir.display()))?;

        self.previous_head = Some(head);
        self.state = SyncState::VersionBranchReady;
        Ok(())
    }

    /// Record that the working tree now holds the new snapshot
    pub fn mark_written(&mut self) -> Result<()> {
        self.expect_state(SyncState::VersionBranchReady, "write objects")?;
        self.state = SyncState::Written;
        Ok(())
    }

    /// Stage everything and commit
    pub async fn commit(&mut self, message: &str) -> Result<()> {
        self.expect_state(SyncState::Written, "commit")?;
        let branch = self.current_branch()?;

        self.git
            .add(self.repo_dir(), ".")
            .await
            .with_context(|| format!("Error adding tracked files to git branch ({})", branch))?;

        self.git
            .commit(self.repo_dir(), message)
            .await
            .with_context(|| format!("Error committing files to git branch ({})", branch))?;

        self.state = SyncState::Committed;
        Ok(())
    }

    /// Publish the version branch with upstream tracking
    pub async fn push(&mut self) -> Result<()> {
        self.expect_state(SyncState::Committed, "push")?;
        let branch = self.current_branch()?;

        self.git
            .push(self.repo_dir(), REMOTE, &branch)
            .await
            .with_context(|| format!("Error pushing git branch ({})", branch))?;

        info!("Published branch {}", branch);
        self.state = SyncState::Pushed;
        Ok(())
    }

    /// Check out an existing version branch for reading
    pub async fn checkout_version(&mut self, branch: &str) -> Result<()> {
        self.expect_state(SyncState::BaseChecked, "check out a version branch")?;

        self.git
            .checkout(self.repo_dir(), branch)
            .await
            .with_context(|| format!("Error checking out git branch ({})", branch))?;

        self.branch = Some(branch.to_string());
        self.state = SyncState::ReadOnly;
        Ok(())
    }
}
