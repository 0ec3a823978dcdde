//! Remote synchronisation
//!
//! Pull, push and fetch against the configured remote. The credential is
//! re-bound into the remote URL before each network call so a rotated token
//! takes effect immediately. Push failures are classified; nothing is
//! retried.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use super::{DiffStat, RepoContext, parse_shortstat};
use crate::error::{Error, GitError, PushError, PushFailureKind, Result};

/// Object id of the empty tree, the diff base for a previously unborn branch
const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Result of a pull
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullOutcome {
    /// Whether HEAD moved
    pub changed: bool,
    pub summary: DiffStat,
    pub message: String,
}

/// Result of a successful push
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushOutcome {
    /// False when there was nothing to push
    pub pushed: bool,
    pub branch: Option<String>,
    /// Commits that were ahead of the remote before pushing
    pub commits: usize,
    pub message: String,
}

/// Divergence from the upstream branch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Divergence {
    pub ahead: usize,
    pub behind: usize,
}

/// Parse `git rev-list --left-right --count A...B`
pub fn parse_left_right(output: &str) -> Option<Divergence> {
    let mut counts = output.split_whitespace().map(|n| n.parse::<usize>());
    match (counts.next(), counts.next()) {
        (Some(Ok(ahead)), Some(Ok(behind))) => Some(Divergence { ahead, behind }),
        _ => None,
    }
}

/// Classify the `!` status lines of `git push --porcelain`
///
/// `None` when no ref line explains the failure.
pub fn porcelain_rejection(stdout: &str) -> Option<PushFailureKind> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix("!\t"))
        .find_map(|line| {
            let summary = line.splitn(2, '\t').nth(1)?;
            summary
                .starts_with("[rejected]")
                .then_some(PushFailureKind::Conflict)
        })
}

/// Pull, push and fetch
pub struct SyncManager<'a> {
    ctx: RepoContext<'a>,
}

impl<'a> SyncManager<'a> {
    pub fn new(ctx: RepoContext<'a>) -> Self {
        Self { ctx }
    }

    /// Ahead/behind relative to the upstream of the current branch
    ///
    /// Without an upstream, every local commit not on the remote counts as
    /// ahead.
    pub async fn divergence(&self) -> Result<Divergence> {
        if self.ctx.repo().backend().head_commit_id()?.is_none() {
            return Ok(Divergence::default());
        }

        let output = self
            .ctx
            .run(&["rev-list", "--left-right", "--count", "HEAD...@{upstream}"])
            .await?;
        if output.success() {
            if let Some(divergence) = parse_left_right(&output.stdout) {
                return Ok(divergence);
            }
        }

        let remotes = format!("--remotes={}", self.ctx.repo().remote_name());
        let count = self
            .ctx
            .run_checked(&["rev-list", "--count", "HEAD", "--not", remotes.as_str()])
            .await?;
        let ahead = count
            .trim()
            .parse()
            .map_err(|_| GitError::ParseError(format!("unexpected rev-list count: {:?}", count)))?;
        Ok(Divergence { ahead, behind: 0 })
    }

    /// Fetch and merge from the upstream
    #[instrument(skip(self))]
    pub async fn pull(&self, limit: Option<Duration>) -> Result<PullOutcome> {
        let backend = self.ctx.repo().backend();
        let before = backend.head_commit_id()?;

        self.ctx.bind_remote().await?;

        let has_upstream = self
            .ctx
            .run(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{upstream}"])
            .await?
            .success();

        let branch = backend.current_branch()?;
        let mut args = vec!["pull", "--no-rebase", "--no-edit", "--quiet"];
        if !has_upstream {
            if let Some(branch) = branch.as_deref() {
                args.push(self.ctx.repo().remote_name());
                args.push(branch);
            }
        }

        self.ctx
            .run_network(&args, limit)
            .await
            .map_err(|e| self.scrub_error(e))?;

        let after = backend.head_commit_id()?;
        if before == after {
            info!("Already up to date");
            return Ok(PullOutcome {
                changed: false,
                summary: DiffStat::default(),
                message: "Already up to date".to_string(),
            });
        }

        let base = before.as_deref().unwrap_or(EMPTY_TREE);
        let head = after.as_deref().unwrap_or("HEAD");
        let shortstat = self
            .ctx
            .run_checked(&["diff", "--shortstat", base, head])
            .await?;
        let summary = parse_shortstat(&shortstat);

        info!("Pulled changes: {}", summary.summary());
        Ok(PullOutcome {
            changed: true,
            message: summary.summary(),
            summary,
        })
    }

    /// Push the current branch if it has commits the remote lacks
    #[instrument(skip(self))]
    pub async fn push(&self, limit: Option<Duration>) -> Result<PushOutcome> {
        let branch = self.ctx.repo().backend().current_branch()?;
        let ahead = self.divergence().await?.ahead;

        if ahead == 0 {
            return Ok(PushOutcome {
                pushed: false,
                branch,
                commits: 0,
                message: "Already up to date".to_string(),
            });
        }

        let Some(name) = branch.as_deref() else {
            return Err(GitError::InvalidRef("HEAD is detached, nothing to push".to_string()).into());
        };

        self.ctx
            .bind_remote()
            .await
            .map_err(|e| self.classify_push_error(e))?;

        let output = self
            .ctx
            .run_network_output(
                &["push", "--porcelain", "-u", self.ctx.repo().remote_name(), name],
                limit,
            )
            .await
            .map_err(|e| self.classify_push_error(e))?;

        if !output.success() {
            let text = output.combined();
            let kind = porcelain_rejection(&output.stdout)
                .unwrap_or_else(|| PushFailureKind::classify(&text));
            warn!(%kind, "Push failed");
            return Err(PushError {
                kind,
                message: self.ctx.repo().scrub(&text),
            }
            .into());
        }

        info!("Pushed {} commit(s) on {}", ahead, name);
        Ok(PushOutcome {
            pushed: true,
            branch,
            commits: ahead,
            message: format!("Pushed {} commit(s)", ahead),
        })
    }

    /// Update remote-tracking refs without merging
    #[instrument(skip(self))]
    pub async fn fetch(&self, limit: Option<Duration>) -> Result<Divergence> {
        self.ctx.bind_remote().await?;
        self.ctx
            .run_network(&["fetch", "--prune", "--quiet", self.ctx.repo().remote_name()], limit)
            .await
            .map_err(|e| self.scrub_error(e))?;
        self.divergence().await
    }

    fn classify_push_error(&self, err: Error) -> Error {
        match err {
            Error::Git(git) => {
                let mut push = PushError::from_git(&git);
                push.message = self.ctx.repo().scrub(&push.message);
                warn!(kind = %push.kind, "Push failed");
                push.into()
            }
            other => other,
        }
    }

    fn scrub_error(&self, err: Error) -> Error {
        match err {
            Error::Git(GitError::CommandFailed {
                command,
                stderr,
                code,
            }) => GitError::CommandFailed {
                command,
                stderr: self.ctx.repo().scrub(&stderr),
                code,
            }
            .into(),
            other => other,
        }
    }
}
