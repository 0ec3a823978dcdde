//! The sync engine
//!
//! Owns the single [`RepositoryHandle`] behind a read/write lock. Mutating
//! operations take the write half, queries share the read half. Input is
//! validated before the repository is touched, so a rejected request never
//! clones, locks or runs `git`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OnceCell, RwLock};
use tracing::{info, instrument};

use crate::config::{HistoryConfig, RepoSettings};
use crate::error::{ConfigError, Error, Result, ValidationError};
use crate::git::{
    BranchManager, BranchRecord, CommitDetails, CommitOutcome, CommitRecord, Divergence,
    GitExecutor, GitRunner, HistoryReader, PullOutcome, PushOutcome, RepoContext,
    RepositoryHandle, StageManager, StatusSnapshot, SyncManager, ensure_ready, resolve_in_repo,
    validate_branch_name, validate_commit_id, validate_commit_message,
};

/// Entry point for every repository operation
pub struct GitEngine {
    settings: RepoSettings,
    history: HistoryConfig,
    git: Arc<dyn GitRunner>,
    repo: OnceCell<RwLock<RepositoryHandle>>,
}

impl GitEngine {
    /// Create an engine that runs the system `git`
    pub fn new(settings: RepoSettings, history: HistoryConfig) -> Self {
        Self::with_runner(settings, history, Arc::new(GitExecutor::new()))
    }

    /// Create an engine with a custom command runner
    pub fn with_runner(
        settings: RepoSettings,
        history: HistoryConfig,
        git: Arc<dyn GitRunner>,
    ) -> Self {
        Self {
            settings,
            history,
            git,
            repo: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &RepoSettings {
        &self.settings
    }

    /// Make sure the mirror exists, cloning it on first use
    ///
    /// Concurrent first callers wait for the same initialisation, so the
    /// remote is cloned at most once per engine.
    pub async fn ensure_ready(&self) -> Result<&RwLock<RepositoryHandle>> {
        self.repo
            .get_or_try_init(|| async {
                let handle = ensure_ready(self.git.as_ref(), &self.settings).await?;
                Ok::<_, Error>(RwLock::new(handle))
            })
            .await
    }

    fn context<'a>(&'a self, repo: &'a RepositoryHandle) -> RepoContext<'a> {
        RepoContext::new(self.git.as_ref(), repo)
    }

    fn check_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Err(ValidationError::NoFiles.into());
        }
        for path in paths {
            resolve_in_repo(&self.settings.path, path)?;
        }
        Ok(())
    }

    /// Working tree status, recomputed on every call
    pub async fn status(&self) -> Result<StatusSnapshot> {
        let repo = self.ensure_ready().await?.read().await;
        StageManager::new(self.context(&repo)).status().await
    }

    #[instrument(skip(self))]
    pub async fn stage(&self, paths: &[String]) -> Result<()> {
        self.check_paths(paths)?;
        let repo = self.ensure_ready().await?.write().await;
        StageManager::new(self.context(&repo)).stage(paths).await
    }

    #[instrument(skip(self))]
    pub async fn stage_all(&self) -> Result<()> {
        let repo = self.ensure_ready().await?.write().await;
        StageManager::new(self.context(&repo)).stage_all().await
    }

    #[instrument(skip(self))]
    pub async fn unstage(&self, paths: &[String]) -> Result<()> {
        self.check_paths(paths)?;
        let repo = self.ensure_ready().await?.write().await;
        StageManager::new(self.context(&repo)).unstage(paths).await
    }

    /// Commit what is staged, staging `files` first when given
    #[instrument(skip(self))]
    pub async fn commit(&self, message: &str, files: Option<&[String]>) -> Result<CommitOutcome> {
        validate_commit_message(message)?;
        if let Some(files) = files.filter(|f| !f.is_empty()) {
            self.check_paths(files)?;
        }
        let repo = self.ensure_ready().await?.write().await;
        StageManager::new(self.context(&repo))
            .commit(message, files)
            .await
    }

    /// Fetch and merge from the remote
    #[instrument(skip(self))]
    pub async fn pull(&self, limit: Option<Duration>) -> Result<PullOutcome> {
        let repo = self.ensure_ready().await?.write().await;
        SyncManager::new(self.context(&repo)).pull(limit).await
    }

    /// Push the current branch
    #[instrument(skip(self))]
    pub async fn push(&self, limit: Option<Duration>) -> Result<PushOutcome> {
        let repo = self.ensure_ready().await?.write().await;
        SyncManager::new(self.context(&repo)).push(limit).await
    }

    /// Refresh remote-tracking refs, returning the new divergence
    #[instrument(skip(self))]
    pub async fn fetch(&self, limit: Option<Duration>) -> Result<Divergence> {
        let repo = self.ensure_ready().await?.write().await;
        SyncManager::new(self.context(&repo)).fetch(limit).await
    }

    /// Recent commits, newest first; the limit is clamped to the configured bounds
    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<CommitRecord>> {
        let limit = self.history.clamp(limit);
        let repo = self.ensure_ready().await?.read().await;
        HistoryReader::new(self.context(&repo)).history(limit).await
    }

    pub async fn commit_details(&self, id: &str) -> Result<CommitDetails> {
        validate_commit_id(id)?;
        let repo = self.ensure_ready().await?.read().await;
        HistoryReader::new(self.context(&repo))
            .commit_details(id)
            .await
    }

    pub async fn list_branches(&self) -> Result<Vec<BranchRecord>> {
        let repo = self.ensure_ready().await?.read().await;
        BranchManager::new(self.context(&repo)).list().await
    }

    /// Create a branch and switch to it, returning its head commit
    #[instrument(skip(self))]
    pub async fn create_branch(&self, name: &str, from: Option<&str>) -> Result<String> {
        validate_branch_name(name)?;
        if let Some(from) = from {
            validate_branch_name(from)?;
        }
        let repo = self.ensure_ready().await?.write().await;
        BranchManager::new(self.context(&repo))
            .create(name, from)
            .await
    }

    #[instrument(skip(self))]
    pub async fn checkout(&self, name: &str) -> Result<()> {
        validate_branch_name(name)?;
        let repo = self.ensure_ready().await?.write().await;
        BranchManager::new(self.context(&repo)).checkout(name).await
    }

    #[instrument(skip(self))]
    pub async fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        validate_branch_name(name)?;
        let repo = self.ensure_ready().await?.write().await;
        BranchManager::new(self.context(&repo))
            .delete(name, force)
            .await
    }

    /// Swap the credential used for later remote operations
    #[instrument(skip_all)]
    pub async fn rotate_token(&self, token: String) -> Result<()> {
        if token.trim().is_empty() {
            return Err(ConfigError::Missing("repository.token").into());
        }
        let mut repo = self.ensure_ready().await?.write().await;
        repo.set_token(token);
        info!("Credential rotated");
        Ok(())
    }
}

// Connection tasks share one engine
fn _assert_send_sync()
where
    GitEngine: Send + Sync,
{
}
