//! Per-operation context
//!
//! Bundles the command runner with the repository handle so each manager
//! runs `git` inside the mirror with the right timeout.

use std::time::Duration;

use super::{GitOutput, GitRunner, RepositoryHandle};
use crate::error::Result;

/// Borrowed for the duration of one locked operation
#[derive(Clone, Copy)]
pub struct RepoContext<'a> {
    git: &'a dyn GitRunner,
    repo: &'a RepositoryHandle,
}

impl<'a> RepoContext<'a> {
    pub fn new(git: &'a dyn GitRunner, repo: &'a RepositoryHandle) -> Self {
        Self { git, repo }
    }

    pub fn repo(&self) -> &'a RepositoryHandle {
        self.repo
    }

    /// Run a local command, output returned whatever the exit status
    pub async fn run(&self, args: &[&str]) -> Result<GitOutput> {
        self.git
            .run(self.repo.path(), args, self.repo.command_timeout())
            .await
    }

    /// Run a local command that must succeed, returning stdout
    pub async fn run_checked(&self, args: &[&str]) -> Result<String> {
        self.git
            .run_checked(self.repo.path(), args, self.repo.command_timeout())
            .await
    }

    /// Run a command that talks to the remote
    pub async fn run_network(&self, args: &[&str], limit: Option<Duration>) -> Result<String> {
        let limit = limit.unwrap_or_else(|| self.repo.network_timeout());
        self.git.run_checked(self.repo.path(), args, limit).await
    }

    /// Like [`Self::run_network`], output returned whatever the exit status
    pub async fn run_network_output(
        &self,
        args: &[&str],
        limit: Option<Duration>,
    ) -> Result<GitOutput> {
        let limit = limit.unwrap_or_else(|| self.repo.network_timeout());
        self.git.run(self.repo.path(), args, limit).await
    }

    /// Point the remote at the URL carrying the current credential
    pub async fn bind_remote(&self) -> Result<()> {
        let url = self.repo.authenticated_url();
        self.run_checked(&["remote", "set-url", self.repo.remote_name(), url.as_str()])
            .await
            .map(|_| ())
    }
}
