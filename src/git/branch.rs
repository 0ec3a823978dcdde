//! Branch management
//!
//! Names are validated locally before any mutating `git` call. The branch
//! currently checked out can never be deleted.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{info, instrument};

use super::RepoContext;
use crate::error::{GitError, Result, ValidationError};

/// Longest accepted branch name
pub const MAX_BRANCH_NAME_LEN: usize = 255;

static BRANCH_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9/_-]+$").unwrap());

/// Check a branch name against the accepted grammar
pub fn validate_branch_name(name: &str) -> std::result::Result<(), ValidationError> {
    let reject = |reason| {
        Err(ValidationError::InvalidBranchName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return reject("must not be empty");
    }
    if name.len() > MAX_BRANCH_NAME_LEN {
        return reject("must be at most 255 characters");
    }
    if name.starts_with('-') {
        return reject("must not start with '-'");
    }
    if name.contains("..") {
        return reject("must not contain '..'");
    }
    if name.ends_with(".lock") {
        return reject("must not end with '.lock'");
    }
    if !BRANCH_NAME.is_match(name) {
        return reject("may only contain letters, digits, '/', '_' and '-'");
    }
    Ok(())
}

/// A local branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchRecord {
    pub name: String,
    pub is_current: bool,
    pub head_commit: String,
}

impl BranchRecord {
    pub fn new(name: impl Into<String>, is_current: bool, head_commit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_current,
            head_commit: head_commit.into(),
        }
    }
}

/// `for-each-ref` format: HEAD marker, short name, object id
const BRANCH_FORMAT: &str = "--format=%(HEAD)%09%(refname:short)%09%(objectname)";

/// Parse the tab-separated `for-each-ref` listing
pub fn parse_branch_list(output: &str) -> Result<Vec<BranchRecord>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut parts = line.splitn(3, '\t');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(marker), Some(name), Some(id)) if !name.is_empty() => {
                    Ok(BranchRecord::new(name, marker.trim() == "*", id.trim()))
                }
                _ => Err(GitError::ParseError(format!("unexpected branch line: {:?}", line)).into()),
            }
        })
        .collect()
}

/// Create, switch, delete and list branches
pub struct BranchManager<'a> {
    ctx: RepoContext<'a>,
}

impl<'a> BranchManager<'a> {
    pub fn new(ctx: RepoContext<'a>) -> Self {
        Self { ctx }
    }

    /// All local branches
    pub async fn list(&self) -> Result<Vec<BranchRecord>> {
        let output = self
            .ctx
            .run_checked(&["for-each-ref", BRANCH_FORMAT, "refs/heads/"])
            .await?;
        parse_branch_list(&output)
    }

    /// Create `name` (optionally from `from`) and switch to it, returning the new head
    #[instrument(skip(self))]
    pub async fn create(&self, name: &str, from: Option<&str>) -> Result<String> {
        validate_branch_name(name)?;
        if let Some(from) = from {
            validate_branch_name(from)?;
        }

        let mut args = vec!["checkout", "--quiet", "-b", name];
        if let Some(from) = from {
            args.push(from);
        }
        self.ctx.run_checked(&args).await?;

        let head = self
            .ctx
            .repo()
            .backend()
            .head_commit_id()?
            .ok_or_else(|| GitError::InvalidRef(format!("branch '{}' has no commits", name)))?;

        info!("Created branch {} at {}", name, head);
        Ok(head)
    }

    /// Switch the working copy to an existing branch
    #[instrument(skip(self))]
    pub async fn checkout(&self, name: &str) -> Result<()> {
        validate_branch_name(name)?;
        self.ctx.run_checked(&["checkout", "--quiet", name]).await?;
        info!("Checked out {}", name);
        Ok(())
    }

    /// Delete a branch other than the current one
    ///
    /// `force` deletes even when the branch is not fully merged.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str, force: bool) -> Result<()> {
        validate_branch_name(name)?;

        let current = self.ctx.repo().backend().current_branch()?;
        if current.as_deref() == Some(name) {
            return Err(ValidationError::CurrentBranch(name.to_string()).into());
        }

        let flag = if force { "-D" } else { "-d" };
        self.ctx.run_checked(&["branch", flag, name]).await?;
        info!("Deleted branch {}", name);
        Ok(())
    }
}
