//! Publishing applied fixes to version control.
//!
//! [`GitPublisher`] is the only place the crate spawns processes. It stages,
//! commits with a fixed bot identity, and optionally pushes. A clean index
//! is reported as [`PublishOutcome::NothingToCommit`], which is not an error.

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::PublishConfig;

/// What to stage before committing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishScope {
    /// Every pending change in the working tree (`git add -A`).
    AllChanges,
    /// Only these paths.
    Paths(Vec<PathBuf>),
}

/// Successful publish outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Committed and pushed to the remote.
    Pushed,
    /// Committed locally; pushing is disabled.
    Committed,
    /// The index had no changes to record.
    NothingToCommit,
}

/// Transport failure while publishing.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The `git` binary could not be started.
    #[error("failed to run git {command}: {source}")]
    Spawn {
        /// Subcommand that was attempted.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A git command exited unsuccessfully.
    #[error("git {command} failed: {stderr}")]
    Git {
        /// Subcommand that failed.
        command: String,
        /// Captured stderr.
        stderr: String,
    },
}

/// Records and propagates working-tree changes.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Stage `scope`, record it as one unit with `message`, and make it
    /// visible downstream.
    async fn publish(
        &self,
        message: &str,
        scope: &PublishScope,
    ) -> Result<PublishOutcome, PublishError>;
}

/// Git-backed [`Publisher`].
#[derive(Debug, Clone)]
pub struct GitPublisher {
    repo_dir: PathBuf,
    user_name: String,
    user_email: String,
    push: bool,
    remote: Option<String>,
    branch: Option<String>,
}

impl GitPublisher {
    /// Create a publisher for the repository at `repo_dir`.
    pub fn new(repo_dir: impl Into<PathBuf>, config: &PublishConfig) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            user_name: config.user_name.clone(),
            user_email: config.user_email.clone(),
            push: config.push,
            remote: config.remote.clone(),
            branch: config.branch.clone(),
        }
    }

    /// Override whether commits are pushed.
    #[must_use]
    pub fn with_push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    /// Run git with `args` in the repository, returning its output whatever
    /// the exit status.
    async fn git(&self, args: Vec<String>) -> Result<Output, PublishError> {
        let spawn_command = args.first().cloned().unwrap_or_default();
        let repo = self.repo_dir.clone();
        debug!(args = ?args, "running git");

        tokio::task::spawn_blocking(move || {
            // Clear GIT_DIR and friends so hooks of a parent git process do
            // not redirect us to another repository.
            std::process::Command::new("git")
                .env_remove("GIT_DIR")
                .env_remove("GIT_WORK_TREE")
                .env_remove("GIT_INDEX_FILE")
                .arg("-C")
                .arg(&repo)
                .args(&args)
                .output()
        })
        .await
        .map_err(|e| PublishError::Spawn {
            command: spawn_command.clone(),
            source: std::io::Error::other(format!("git task panicked: {e}")),
        })?
        .map_err(|source| PublishError::Spawn {
            command: spawn_command,
            source,
        })
    }

    /// Run git and fail unless it exits successfully.
    async fn git_checked(&self, args: Vec<String>) -> Result<Output, PublishError> {
        let command = args.first().cloned().unwrap_or_default();
        let output = self.git(args).await?;
        if !output.status.success() {
            return Err(PublishError::Git {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(output)
    }

    /// Whether the index holds staged changes.
    async fn has_staged_changes(&self) -> Result<bool, PublishError> {
        let output = self
            .git(args(&["diff", "--cached", "--quiet"]))
            .await?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(PublishError::Git {
                command: "diff".to_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            }),
        }
    }
}

#[async_trait]
impl Publisher for GitPublisher {
    async fn publish(
        &self,
        message: &str,
        scope: &PublishScope,
    ) -> Result<PublishOutcome, PublishError> {
        let mut add = args(&["add"]);
        match scope {
            PublishScope::AllChanges => add.push("-A".to_owned()),
            PublishScope::Paths(paths) => {
                add.push("--".to_owned());
                add.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
            }
        }
        self.git_checked(add).await?;

        if !self.has_staged_changes().await? {
            info!("nothing to commit");
            return Ok(PublishOutcome::NothingToCommit);
        }

        let commit = vec![
            "-c".to_owned(),
            format!("user.name={}", self.user_name),
            "-c".to_owned(),
            format!("user.email={}", self.user_email),
            "commit".to_owned(),
            "-m".to_owned(),
            message.to_owned(),
        ];
        // `-c` options precede the subcommand, so name the failure explicitly.
        let output = self.git(commit).await?;
        if !output.status.success() {
            return Err(PublishError::Git {
                command: "commit".to_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        info!(message = %message, "committed changes");

        if !self.push {
            return Ok(PublishOutcome::Committed);
        }

        let mut push = args(&["push"]);
        if let Some(remote) = &self.remote {
            push.push(remote.clone());
            if let Some(branch) = &self.branch {
                push.push(branch.clone());
            }
        }
        self.git_checked(push).await?;
        info!("pushed changes");

        Ok(PublishOutcome::Pushed)
    }
}

/// Build an owned argument vector.
fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_owned()).collect()
}
