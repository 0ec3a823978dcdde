//! Error types for mirror-sync
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `Display` and `Error` impls.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for mirror-sync
#[derive(Error, Debug)]
pub enum Error {
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Push failed: {0}")]
    Push(#[from] PushError),

    #[error("Repository lifecycle error: {0}")]
    Lifecycle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Configuration and lifecycle errors need operator intervention
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Lifecycle(_))
    }

    /// Stable machine-readable kind used in response envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            // A timed-out command is treated like an unreachable remote
            Self::Git(GitError::Timeout(_)) => "network",
            Self::Git(GitError::CommitNotFound(_)) | Self::Git(GitError::NoParent(_)) => {
                "not_found"
            }
            Self::Git(_) => "operation",
            Self::Config(_) => "configuration",
            Self::Validation(_) => "validation",
            Self::Push(e) => e.kind.as_str(),
            Self::Lifecycle(_) => "lifecycle",
            Self::Io(_) => "io",
        }
    }
}

/// Failures reported by the underlying `git` tool
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("Git command failed: {command} - {stderr}")]
    CommandFailed {
        command: String,
        stderr: String,
        code: Option<i32>,
    },

    #[error("Failed to run git: {0}")]
    Spawn(String),

    #[error("Git command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Gitoxide error: {0}")]
    Gix(String),

    #[error("Invalid reference: {0}")]
    InvalidRef(String),

    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    #[error("Commit {0} has no parent to diff against")]
    NoParent(String),

    #[error("Failed to parse git output: {0}")]
    ParseError(String),
}

impl GitError {
    /// Raw text the tool produced, used for failure classification
    pub fn detail(&self) -> String {
        match self {
            Self::CommandFailed { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Missing required configuration value '{0}'")]
    Missing(&'static str),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to create config directory: {0}")]
    DirectoryCreationFailed(PathBuf),
}

/// Input rejected locally, before `git` is invoked
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid branch name '{name}': {reason}")]
    InvalidBranchName { name: String, reason: &'static str },

    #[error("Invalid commit message: {0}")]
    InvalidCommitMessage(&'static str),

    #[error("Path escapes the repository root: {0}")]
    PathOutsideRepository(PathBuf),

    #[error("Cannot delete the currently checked-out branch '{0}'")]
    CurrentBranch(String),

    #[error("No files given")]
    NoFiles,

    #[error("Invalid commit id '{0}'")]
    InvalidCommitId(String),
}

/// Category of a failed push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushFailureKind {
    Authentication,
    Conflict,
    Network,
    Unknown,
}

impl PushFailureKind {
    /// Classify free-form tool output. Earlier rules win.
    pub fn classify(message: &str) -> Self {
        if message.contains("Authentication failed") || message.contains("401") {
            Self::Authentication
        } else if message.contains("rejected") || message.contains("non-fast-forward") {
            Self::Conflict
        } else if message.contains("network")
            || message.contains("timeout")
            || message.contains("ENOTFOUND")
        {
            Self::Network
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Conflict => "conflict",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PushFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified push failure
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct PushError {
    pub kind: PushFailureKind,
    pub message: String,
}

impl PushError {
    /// Classify a git failure, preferring structured signals over text
    pub fn from_git(err: &GitError) -> Self {
        let kind = match err {
            GitError::Timeout(_) => PushFailureKind::Network,
            other => PushFailureKind::classify(&other.detail()),
        };
        Self {
            kind,
            message: err.detail().trim().to_string(),
        }
    }
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;
