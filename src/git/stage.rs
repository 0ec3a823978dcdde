//! Staging and committing
//!
//! Paths are checked lexically against the repository root before `git`
//! sees them, and commit messages are bounded. A commit is only created when
//! the index holds changes.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument};

use super::{RepoContext, StatusSnapshot, parse_status};
use crate::error::{GitError, Result, ValidationError};

/// Shortest accepted commit message, after trimming
pub const MIN_COMMIT_MESSAGE_LEN: usize = 3;
/// Longest accepted commit message, after trimming
pub const MAX_COMMIT_MESSAGE_LEN: usize = 500;

/// Check a commit message and return its trimmed form
pub fn validate_commit_message(message: &str) -> std::result::Result<&str, ValidationError> {
    let trimmed = message.trim();
    let len = trimmed.chars().count();
    if len < MIN_COMMIT_MESSAGE_LEN {
        return Err(ValidationError::InvalidCommitMessage(
            "must be at least 3 characters",
        ));
    }
    if len > MAX_COMMIT_MESSAGE_LEN {
        return Err(ValidationError::InvalidCommitMessage(
            "must be at most 500 characters",
        ));
    }
    Ok(trimmed)
}

/// Resolve `path` against `root` without touching the filesystem
///
/// Returns the repo-relative path with `/` separators, or an error when the
/// path leaves the root.
pub fn resolve_in_repo(root: &Path, path: &str) -> std::result::Result<String, ValidationError> {
    let outside = || ValidationError::PathOutsideRepository(PathBuf::from(path));

    let candidate = Path::new(path);
    let relative = if candidate.is_absolute() {
        candidate.strip_prefix(root).map_err(|_| outside())?
    } else {
        candidate
    };

    let mut parts: Vec<String> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop().ok_or_else(outside)?;
            }
            Component::RootDir | Component::Prefix(_) => return Err(outside()),
        }
    }

    if parts.first().is_some_and(|p| p == ".git") {
        return Err(outside());
    }

    if parts.is_empty() {
        Ok(".".to_string())
    } else {
        Ok(parts.join("/"))
    }
}

/// Outcome of a commit request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed { id: String },
    NothingToCommit,
}

/// Stage, unstage and commit
pub struct StageManager<'a> {
    ctx: RepoContext<'a>,
}

impl<'a> StageManager<'a> {
    pub fn new(ctx: RepoContext<'a>) -> Self {
        Self { ctx }
    }

    /// Current working tree status
    pub async fn status(&self) -> Result<StatusSnapshot> {
        let output = self
            .ctx
            .run_checked(&["status", "--porcelain=v1", "--branch", "-z"])
            .await?;
        parse_status(&output)
    }

    fn resolve_all(&self, paths: &[String]) -> Result<Vec<String>> {
        if paths.is_empty() {
            return Err(ValidationError::NoFiles.into());
        }
        let root = self.ctx.repo().path();
        paths
            .iter()
            .map(|p| resolve_in_repo(root, p).map_err(Into::into))
            .collect()
    }

    /// Stage the given paths
    #[instrument(skip(self))]
    pub async fn stage(&self, paths: &[String]) -> Result<()> {
        let resolved = self.resolve_all(paths)?;

        let mut args = vec!["add", "--"];
        args.extend(resolved.iter().map(String::as_str));
        self.ctx.run_checked(&args).await?;

        debug!("Staged {} path(s)", resolved.len());
        Ok(())
    }

    /// Stage every change, including deletions and untracked files
    #[instrument(skip(self))]
    pub async fn stage_all(&self) -> Result<()> {
        self.ctx.run_checked(&["add", "--all"]).await?;
        Ok(())
    }

    /// Remove the given paths from the index, keeping working copy changes
    #[instrument(skip(self))]
    pub async fn unstage(&self, paths: &[String]) -> Result<()> {
        let resolved = self.resolve_all(paths)?;

        let has_head = self.ctx.repo().backend().head_commit_id()?.is_some();
        let mut args = if has_head {
            vec!["reset", "--quiet", "HEAD", "--"]
        } else {
            // Nothing to reset to before the first commit
            vec!["rm", "--cached", "--quiet", "-r", "--"]
        };
        args.extend(resolved.iter().map(String::as_str));
        self.ctx.run_checked(&args).await?;

        debug!("Unstaged {} path(s)", resolved.len());
        Ok(())
    }

    /// Commit staged changes, staging `files` first if given
    #[instrument(skip(self, message))]
    pub async fn commit(&self, message: &str, files: Option<&[String]>) -> Result<CommitOutcome> {
        let message = validate_commit_message(message)?;

        if let Some(files) = files.filter(|f| !f.is_empty()) {
            self.stage(files).await?;
        }

        if !self.status().await?.has_staged() {
            info!("Nothing staged, skipping commit");
            return Ok(CommitOutcome::NothingToCommit);
        }

        self.ctx
            .run_checked(&["commit", "--quiet", "-m", message])
            .await?;

        let id = self
            .ctx
            .repo()
            .backend()
            .head_commit_id()?
            .ok_or_else(|| GitError::InvalidRef("HEAD missing after commit".to_string()))?;

        info!("Created commit {}", id);
        Ok(CommitOutcome::Committed { id })
    }
}
