//! Async git command executor
//!
//! Every call into the `git` binary goes through [`GitRunner`]:
//! - Timeout handling (the child is not killed, the caller just stops waiting)
//! - Non-interactive environment so credential failures fail fast
//! - Raw output capture for parsing and failure classification

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::{GitError, Result};

/// Default command timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured output of one `git` invocation
#[derive(Debug, Clone, Default)]
pub struct GitOutput {
    /// Exit code, `None` if the process was terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stderr if present, otherwise stdout; git splits messages across both
    pub fn detail(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }

    /// Stderr followed by stdout, for classifiers that must see both
    pub fn combined(&self) -> String {
        [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Seam between the engine and the `git` binary
#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Run `git <args>` in `cwd`, returning output regardless of exit status.
    /// Only spawn failures and timeouts are errors.
    async fn run(&self, cwd: &Path, args: &[&str], limit: Duration) -> Result<GitOutput>;

    /// Run and turn a non-zero exit into [`GitError::CommandFailed`]
    async fn run_checked(&self, cwd: &Path, args: &[&str], limit: Duration) -> Result<String> {
        let output = self.run(cwd, args, limit).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(GitError::CommandFailed {
                command: format!("git {}", redact_args(args).join(" ")),
                stderr: output.detail().to_string(),
                code: output.code,
            }
            .into())
        }
    }
}

/// Runs the system `git` binary
#[derive(Debug, Clone)]
pub struct GitExecutor {
    /// Program to invoke
    program: String,
}

impl GitExecutor {
    /// Create an executor for `git` on PATH
    pub fn new() -> Self {
        Self::with_program("git")
    }

    /// Create an executor for a specific git binary
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Check if git is installed and accessible
    pub async fn check_installed(&self) -> Result<()> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .await
            .map_err(|e| GitError::Spawn(e.to_string()))?;

        if output.status.success() {
            let version = String::from_utf8_lossy(&output.stdout);
            debug!("git version: {}", version.trim());
            Ok(())
        } else {
            Err(GitError::Spawn(format!("{} --version failed", self.program)).into())
        }
    }
}

impl Default for GitExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitRunner for GitExecutor {
    #[instrument(skip_all, fields(args = ?redact_args(args)))]
    async fn run(&self, cwd: &Path, args: &[&str], limit: Duration) -> Result<GitOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => {
                let output = GitOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };
                debug!(code = ?output.code, "git finished");
                Ok(output)
            }
            Ok(Err(e)) => {
                warn!("git could not be started: {}", e);
                Err(GitError::Spawn(e.to_string()).into())
            }
            Err(_) => Err(GitError::Timeout(limit).into()),
        }
    }
}

/// Hide credentials embedded in URL arguments
pub fn redact_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| redact_url(a)).collect()
}

/// Replace the userinfo part of a URL with `***`
pub fn redact_url(value: &str) -> String {
    match value.split_once("://") {
        Some((scheme, rest)) => match rest.split_once('@') {
            Some((userinfo, host)) if !userinfo.contains('/') => {
                format!("{}://***@{}", scheme, host)
            }
            _ => value.to_string(),
        },
        None => value.to_string(),
    }
}
