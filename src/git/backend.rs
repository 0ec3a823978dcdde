//! Read-side repository access through gitoxide
//!
//! Answers HEAD questions (current branch, head commit) without spawning
//! `git`. Mutations always go through the CLI executor.

use std::path::{Path, PathBuf};

use gix::ThreadSafeRepository;
use tracing::{debug, instrument};

use crate::error::{GitError, Result};

/// What HEAD currently points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadState {
    /// On a branch with at least one commit
    Branch { name: String, commit: String },
    /// On a branch that has no commits yet
    Unborn { name: String },
    /// Detached at a commit
    Detached { commit: String },
}

impl HeadState {
    pub fn branch(&self) -> Option<&str> {
        match self {
            Self::Branch { name, .. } | Self::Unborn { name } => Some(name),
            Self::Detached { .. } => None,
        }
    }

    pub fn commit(&self) -> Option<&str> {
        match self {
            Self::Branch { commit, .. } | Self::Detached { commit } => Some(commit),
            Self::Unborn { .. } => None,
        }
    }
}

/// Git backend using gitoxide
///
/// Holds the thread-safe handle so it can live behind the engine's lock and
/// be shared across tasks; each query takes a thread-local view.
pub struct GitBackend {
    /// The gitoxide repository handle
    repo: ThreadSafeRepository,
    /// Path to the working copy
    path: PathBuf,
}

impl GitBackend {
    /// Open an existing repository
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let repo = gix::open(&path).map_err(|e| {
            if e.to_string().contains("not a git repository") {
                GitError::NotARepository(path.clone())
            } else {
                GitError::Gix(e.to_string())
            }
        })?;

        debug!("Opened repository at {:?}", path);

        Ok(Self {
            repo: repo.into_sync(),
            path,
        })
    }

    /// A directory counts as a repository when it holds a `.git` entry
    pub fn is_repository(path: &Path) -> bool {
        path.is_dir() && path.join(".git").exists()
    }

    /// Get the repository path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve HEAD
    pub fn head(&self) -> Result<HeadState> {
        let repo = self.repo.to_thread_local();
        let head = repo.head().map_err(|e| GitError::Gix(e.to_string()))?;
        let commit = head.id().map(|id| id.to_string());

        match head.kind {
            gix::head::Kind::Symbolic(reference) => {
                let name = reference.name.shorten().to_string();
                match commit {
                    Some(commit) => Ok(HeadState::Branch { name, commit }),
                    None => Ok(HeadState::Unborn { name }),
                }
            }
            gix::head::Kind::Detached { .. } => commit
                .map(|commit| HeadState::Detached { commit })
                .ok_or_else(|| GitError::InvalidRef("detached HEAD without a commit".to_string()).into()),
            gix::head::Kind::Unborn(full_name) => Ok(HeadState::Unborn {
                name: full_name.shorten().to_string(),
            }),
        }
    }

    /// Get the current branch name, `None` when HEAD is detached
    pub fn current_branch(&self) -> Result<Option<String>> {
        Ok(self.head()?.branch().map(str::to_string))
    }

    /// Get the HEAD commit ID, `None` before the first commit
    pub fn head_commit_id(&self) -> Result<Option<String>> {
        Ok(self.head()?.commit().map(str::to_string))
    }

    /// Get the repository name (directory name)
    pub fn repo_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string()
    }
}
