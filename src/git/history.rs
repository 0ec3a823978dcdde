//! Commit history and per-commit diffs

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tracing::{debug, instrument};

use super::{FileDiff, RepoContext, parse_numstat, parse_unified_diff};
use crate::error::{GitError, Result, ValidationError};

/// Field separator in formatted log output
const FIELD_SEP: char = '\x1f';
/// Record terminator in formatted log output
const RECORD_SEP: char = '\x1e';

/// id, author, email, date, refs, message
const LOG_FORMAT: &str = "--format=%H%x1f%an%x1f%ae%x1f%aI%x1f%D%x1f%B%x1e";
/// Same as [`LOG_FORMAT`] with parent ids before the message
const DETAIL_FORMAT: &str = "--format=%H%x1f%an%x1f%ae%x1f%aI%x1f%D%x1f%P%x1f%B";

/// A commit as shown in history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    pub id: String,
    pub author: String,
    pub email: String,
    pub date: DateTime<FixedOffset>,
    pub message: String,
    /// Decoration such as `HEAD -> main, origin/main`
    pub refs: Option<String>,
}

impl CommitRecord {
    /// Build a record from raw fields, rejecting malformed ids and dates
    pub fn new(
        id: &str,
        author: &str,
        email: &str,
        date: &str,
        message: &str,
        refs: &str,
    ) -> Result<Self> {
        if !is_full_hex(id) {
            return Err(GitError::ParseError(format!("invalid commit id {:?}", id)).into());
        }
        let date = DateTime::parse_from_rfc3339(date.trim())
            .map_err(|e| GitError::ParseError(format!("invalid commit date {:?}: {}", date, e)))?;
        let refs = refs.trim();

        Ok(Self {
            id: id.to_string(),
            author: author.to_string(),
            email: email.to_string(),
            date,
            message: message.trim_end().to_string(),
            refs: (!refs.is_empty()).then(|| refs.to_string()),
        })
    }

    /// First line of the message
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// A commit with its diff against the first parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitDetails {
    pub commit: CommitRecord,
    pub files: Vec<FileDiff>,
    /// Diff segments that could not be parsed
    pub dropped_segments: usize,
}

fn is_full_hex(id: &str) -> bool {
    matches!(id.len(), 40 | 64) && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Check a caller-supplied commit id: 4 to 64 hex digits
pub fn validate_commit_id(id: &str) -> std::result::Result<(), ValidationError> {
    if (4..=64).contains(&id.len()) && id.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidCommitId(id.to_string()))
    }
}

/// Parse output produced with [`LOG_FORMAT`]
pub fn parse_log(output: &str) -> Result<Vec<CommitRecord>> {
    output
        .split(RECORD_SEP)
        .map(|record| record.trim_start_matches('\n'))
        .filter(|record| !record.trim().is_empty())
        .map(|record| {
            let fields: Vec<&str> = record.splitn(6, FIELD_SEP).collect();
            match fields.as_slice() {
                [id, author, email, date, refs, message] => {
                    CommitRecord::new(id, author, email, date, message, refs)
                }
                _ => Err(GitError::ParseError(format!("unexpected log record: {:?}", record)).into()),
            }
        })
        .collect()
}

/// Parse output produced with [`DETAIL_FORMAT`] into the record and parent ids
fn parse_detail(output: &str) -> Result<(CommitRecord, Vec<String>)> {
    let fields: Vec<&str> = output.splitn(7, FIELD_SEP).collect();
    match fields.as_slice() {
        [id, author, email, date, refs, parents, message] => {
            let record = CommitRecord::new(id, author, email, date, message, refs)?;
            let parents = parents.split_whitespace().map(str::to_string).collect();
            Ok((record, parents))
        }
        _ => Err(GitError::ParseError(format!("unexpected commit record: {:?}", output)).into()),
    }
}

/// Read-only access to commits
pub struct HistoryReader<'a> {
    ctx: RepoContext<'a>,
}

impl<'a> HistoryReader<'a> {
    pub fn new(ctx: RepoContext<'a>) -> Self {
        Self { ctx }
    }

    /// Up to `limit` commits reachable from HEAD, newest first
    #[instrument(skip(self))]
    pub async fn history(&self, limit: usize) -> Result<Vec<CommitRecord>> {
        if self.ctx.repo().backend().head_commit_id()?.is_none() {
            return Ok(Vec::new());
        }

        let count = format!("--max-count={}", limit);
        let output = self
            .ctx
            .run_checked(&["log", count.as_str(), LOG_FORMAT, "HEAD"])
            .await?;
        parse_log(&output)
    }

    /// Commit metadata plus its diff against the first parent
    #[instrument(skip(self))]
    pub async fn commit_details(&self, id: &str) -> Result<CommitDetails> {
        validate_commit_id(id)?;

        let spec = format!("{}^{{commit}}", id);
        let resolved = self
            .ctx
            .run(&["rev-parse", "--verify", "--quiet", spec.as_str()])
            .await?;
        if !resolved.success() {
            return Err(GitError::CommitNotFound(id.to_string()).into());
        }
        let full_id = resolved.stdout.trim().to_string();

        let detail = self
            .ctx
            .run_checked(&["show", "-s", DETAIL_FORMAT, full_id.as_str()])
            .await?;
        let (commit, parents) = parse_detail(&detail)?;
        let Some(parent) = parents.first() else {
            return Err(GitError::NoParent(full_id).into());
        };

        let base = ["-c", "core.quotePath=false", "diff", "--no-color", "--no-ext-diff"];
        let diff_args: Vec<&str> = base
            .iter()
            .copied()
            .chain([parent.as_str(), full_id.as_str()])
            .collect();
        let numstat_args: Vec<&str> = base
            .iter()
            .copied()
            .chain(["--numstat", "-z", parent.as_str(), full_id.as_str()])
            .collect();

        let (diff, numstat) = futures::try_join!(
            self.ctx.run_checked(&diff_args),
            self.ctx.run_checked(&numstat_args)
        )?;

        let mut parsed = parse_unified_diff(&diff);
        parsed.attach_stats(&parse_numstat(&numstat));
        debug!(
            "Commit {} touches {} file(s), {} dropped segment(s)",
            full_id,
            parsed.files.len(),
            parsed.dropped_segments
        );

        Ok(CommitDetails {
            commit,
            files: parsed.files,
            dropped_segments: parsed.dropped_segments,
        })
    }
}
