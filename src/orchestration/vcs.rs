//! Version-control collaborator used for rollback and commit identifiers.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::VcsError;

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Revert tracked files to the last commit.
    async fn reset_hard(&self) -> Result<(), VcsError>;

    /// Remove untracked files and directories.
    async fn clean_untracked(&self) -> Result<(), VcsError>;

    /// Short hash of `HEAD`, or `None` outside a repository or before the
    /// first commit.
    async fn head_commit(&self) -> Option<String>;
}

/// Shells out to `git` in the project root.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn git(&self, args: &[&str]) -> Result<String, VcsError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(VcsError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn reset_hard(&self) -> Result<(), VcsError> {
        self.git(&["reset", "--hard", "HEAD"]).await.map(|_| ())
    }

    async fn clean_untracked(&self) -> Result<(), VcsError> {
        self.git(&["clean", "-fd"]).await.map(|_| ())
    }

    async fn head_commit(&self) -> Option<String> {
        match self.git(&["rev-parse", "HEAD"]).await {
            Ok(out) => {
                let hash: String = out.trim().chars().take(8).collect();
                (!hash.is_empty()).then_some(hash)
            }
            Err(e) => {
                tracing::debug!("No head commit: {e}");
                None
            }
        }
    }
}
