//! Working tree status classification
//!
//! Turns `git status --porcelain=v1 --branch -z` output into
//! [`StatusSnapshot`]s. The category of a file is a pure function of its two
//! status codes; staged-ness is tracked separately since a file can be
//! staged and still modified in the working copy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GitError, Result};

/// Primary category of a changed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    Modified,
    Added,
    Deleted,
    Untracked,
    Staged,
}

impl ChangeCategory {
    /// Classify a (working copy, index) code pair
    ///
    /// Priority: untracked, deleted, added, staged, modified.
    pub fn classify(working: char, index: char) -> Self {
        if working == '?' || index == '?' {
            Self::Untracked
        } else if working == 'D' || index == 'D' {
            Self::Deleted
        } else if index == 'A' {
            Self::Added
        } else if index != ' ' && working == ' ' {
            Self::Staged
        } else {
            Self::Modified
        }
    }
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Modified => write!(f, "modified"),
            Self::Added => write!(f, "added"),
            Self::Deleted => write!(f, "deleted"),
            Self::Untracked => write!(f, "untracked"),
            Self::Staged => write!(f, "staged"),
        }
    }
}

/// One changed file as reported by a status fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChangeRecord {
    /// Repo-relative path
    pub path: String,
    /// Source path for renames and copies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
    pub working_code: char,
    pub index_code: char,
    pub category: ChangeCategory,
    /// The index holds changes for this file
    pub is_staged: bool,
}

impl FileChangeRecord {
    pub fn new(path: impl Into<String>, working_code: char, index_code: char) -> Self {
        Self {
            path: path.into(),
            original_path: None,
            working_code,
            index_code,
            category: ChangeCategory::classify(working_code, index_code),
            // '?' in the index column means "not in the index at all"
            is_staged: index_code != ' ' && index_code != '?',
        }
    }

    pub fn with_original_path(mut self, original: impl Into<String>) -> Self {
        self.original_path = Some(original.into());
        self
    }
}

/// Point-in-time view of the working tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Current branch, `None` when HEAD is detached
    pub branch: Option<String>,
    /// Upstream tracking branch, if configured
    pub upstream: Option<String>,
    pub ahead: usize,
    pub behind: usize,
    pub files: Vec<FileChangeRecord>,
}

impl StatusSnapshot {
    /// Files with changes in the index, regardless of primary category
    pub fn staged(&self) -> impl Iterator<Item = &FileChangeRecord> {
        self.files.iter().filter(|f| f.is_staged)
    }

    pub fn staged_paths(&self) -> Vec<&str> {
        self.staged().map(|f| f.path.as_str()).collect()
    }

    pub fn in_category(&self, category: ChangeCategory) -> impl Iterator<Item = &FileChangeRecord> {
        self.files.iter().filter(move |f| f.category == category)
    }

    pub fn has_staged(&self) -> bool {
        self.files.iter().any(|f| f.is_staged)
    }

    pub fn is_clean(&self) -> bool {
        self.files.is_empty()
    }
}

/// Parse `git status --porcelain=v1 --branch -z`
pub fn parse_status(output: &str) -> Result<StatusSnapshot> {
    let mut snapshot = StatusSnapshot::default();
    let mut fields = output.split('\0').filter(|f| !f.is_empty());

    while let Some(field) = fields.next() {
        if let Some(header) = field.strip_prefix("## ") {
            parse_branch_header(header, &mut snapshot);
            continue;
        }

        let mut chars = field.chars();
        let (Some(index), Some(working), Some(' ')) = (chars.next(), chars.next(), chars.next())
        else {
            return Err(GitError::ParseError(format!("unexpected status entry: {:?}", field)).into());
        };
        let path = chars.as_str();

        let mut record = FileChangeRecord::new(path, working, index);
        // Renames and copies are followed by their source path
        if matches!(index, 'R' | 'C') || matches!(working, 'R' | 'C') {
            if let Some(original) = fields.next() {
                record = record.with_original_path(original);
            }
        }
        snapshot.files.push(record);
    }

    Ok(snapshot)
}

/// Parse the `## ...` header: branch, upstream and divergence
fn parse_branch_header(header: &str, snapshot: &mut StatusSnapshot) {
    if header.starts_with("HEAD (no branch)") {
        return;
    }

    let header = header
        .strip_prefix("No commits yet on ")
        .or_else(|| header.strip_prefix("Initial commit on "))
        .unwrap_or(header);

    let (refs, tracking) = match header.split_once(" [") {
        Some((refs, rest)) => (refs, Some(rest.trim_end_matches(']'))),
        None => (header, None),
    };

    match refs.split_once("...") {
        Some((branch, upstream)) => {
            snapshot.branch = Some(branch.to_string());
            snapshot.upstream = Some(upstream.to_string());
        }
        None => snapshot.branch = Some(refs.trim().to_string()),
    }

    if let Some(tracking) = tracking {
        for part in tracking.split(',') {
            let part = part.trim();
            if let Some(n) = part.strip_prefix("ahead ") {
                snapshot.ahead = n.parse().unwrap_or(0);
            } else if let Some(n) = part.strip_prefix("behind ") {
                snapshot.behind = n.parse().unwrap_or(0);
            }
        }
    }
}
