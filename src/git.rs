use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::exec;

/// How `git reset` treats the index and working tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Move the branch pointer only
    Soft,
    /// Move the branch pointer and overwrite index and working tree
    Hard,
}

impl fmt::Display for ResetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetMode::Soft => write!(f, "--soft"),
            ResetMode::Hard => write!(f, "--hard"),
        }
    }
}

/// Version-control operations needed to publish and read version branches.
///
/// Every operation except `clone_repo` runs inside the working tree `dir`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Clone `uri` into the (empty) directory `dir`
    async fn clone_repo(&self, uri: &str, dir: &Path) -> Result<()>;

    async fn checkout(&self, dir: &Path, reference: &str) -> Result<()>;

    /// Create branch `name` pointing at `from`
    async fn create_branch(&self, dir: &Path, name: &str, from: &str) -> Result<()>;

    /// Resolve `reference` to a commit id
    async fn rev_parse(&self, dir: &Path, reference: &str) -> Result<String>;

    async fn reset(&self, dir: &Path, mode: ResetMode, target: &str) -> Result<()>;

    /// Stage `pathspec`
    async fn add(&self, dir: &Path, pathspec: &str) -> Result<()>;

    async fn commit(&self, dir: &Path, message: &str) -> Result<()>;

    /// Publish `branch` to `remote` with upstream tracking
    async fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<()>;
}

/// [`VersionControl`] backed by the `git` command line client
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = exec::run("git", args, Some(dir)).await?;
        if !output.stderr.is_empty() {
            debug!("git {}: {}", args.first().copied().unwrap_or_default(), output.stderr);
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn clone_repo(&self, uri: &str, dir: &Path) -> Result<()> {
        let target = dir.to_string_lossy();
        exec::run("git", &["clone", "--", uri, &target], None).await?;
        Ok(())
    }

    async fn checkout(&self, dir: &Path, reference: &str) -> Result<()> {
        self.git(dir, &["checkout", reference]).await?;
        Ok(())
    }

    async fn create_branch(&self, dir: &Path, name: &str, from: &str) -> Result<()> {
        self.git(dir, &["branch", name, from]).await?;
        Ok(())
    }

    async fn rev_parse(&self, dir: &Path, reference: &str) -> Result<String> {
        self.git(dir, &["rev-parse", reference]).await
    }

    async fn reset(&self, dir: &Path, mode: ResetMode, target: &str) -> Result<()> {
        let mode = mode.to_string();
        self.git(dir, &["reset", &mode, target]).await?;
        Ok(())
    }

    async fn add(&self, dir: &Path, pathspec: &str) -> Result<()> {
        self.git(dir, &["add", pathspec]).await?;
        Ok(())
    }

    async fn commit(&self, dir: &Path, message: &str) -> Result<()> {
        self.git(dir, &["commit", "-m", message]).await?;
        Ok(())
    }

    async fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<()> {
        self.git(dir, &["push", "--set-upstream", remote, branch]).await?;
        Ok(())
    }
}
