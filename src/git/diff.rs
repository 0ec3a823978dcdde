//! Unified diff parsing
//!
//! Turns the text `git diff` prints into a structured model:
//! - [`FileDiff`] per file, split at `diff --git` headers
//! - [`DiffChunk`] per `@@` hunk with old/new ranges
//! - [`DiffLine`] per added, removed or context line, numbered on both sides
//!
//! Parsing is lenient: a file segment that does not follow the grammar is
//! dropped and counted rather than failing the whole diff.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

/// File header, used only when no `---`/`+++`/`rename` line names the file
static FILE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^diff --git "?a/(.+?)"? "?b/(.+?)"?$"#).unwrap());

/// Hunk header, a missing count means 1
static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap()
});

/// Kind of a diff line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffLineKind {
    Add,
    Remove,
    Context,
}

/// One line inside a hunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    /// Line text without the leading marker
    pub content: String,
    /// Absent for added lines
    pub old_line_number: Option<usize>,
    /// Absent for removed lines
    pub new_line_number: Option<usize>,
}

impl DiffLine {
    pub fn add(content: impl Into<String>, new_line: usize) -> Self {
        Self {
            kind: DiffLineKind::Add,
            content: content.into(),
            old_line_number: None,
            new_line_number: Some(new_line),
        }
    }

    pub fn remove(content: impl Into<String>, old_line: usize) -> Self {
        Self {
            kind: DiffLineKind::Remove,
            content: content.into(),
            old_line_number: Some(old_line),
            new_line_number: None,
        }
    }

    pub fn context(content: impl Into<String>, old_line: usize, new_line: usize) -> Self {
        Self {
            kind: DiffLineKind::Context,
            content: content.into(),
            old_line_number: Some(old_line),
            new_line_number: Some(new_line),
        }
    }
}

/// One `@@` hunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffChunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffChunk {
    pub fn new(old_start: usize, old_lines: usize, new_start: usize, new_lines: usize) -> Self {
        Self {
            old_start,
            old_lines,
            new_start,
            new_lines,
            lines: Vec::new(),
        }
    }

    /// Lines counted on the old side (context + removed)
    pub fn old_side_len(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.kind != DiffLineKind::Add)
            .count()
    }

    /// Lines counted on the new side (context + added)
    pub fn new_side_len(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.kind != DiffLineKind::Remove)
            .count()
    }
}

/// All hunks for one file plus its summary counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub path: String,
    pub additions: usize,
    pub deletions: usize,
    pub chunks: Vec<DiffChunk>,
}

impl FileDiff {
    pub fn new(path: impl Into<String>, chunks: Vec<DiffChunk>) -> Self {
        Self {
            path: path.into(),
            additions: 0,
            deletions: 0,
            chunks,
        }
    }
}

/// Result of parsing a multi-file diff
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedDiff {
    pub files: Vec<FileDiff>,
    /// Segments that did not parse and were left out of `files`
    pub dropped_segments: usize,
}

impl ParsedDiff {
    /// Attach per-file totals from `git diff --numstat`
    pub fn attach_stats(&mut self, stats: &HashMap<String, (usize, usize)>) {
        for file in &mut self.files {
            if let Some(&(additions, deletions)) = stats.get(&file.path) {
                file.additions = additions;
                file.deletions = deletions;
            }
        }
    }
}

/// Parse unified diff text covering one or more files
pub fn parse_unified_diff(text: &str) -> ParsedDiff {
    let mut parsed = ParsedDiff::default();
    let mut segment: Vec<&str> = Vec::new();
    let mut preamble = false;

    for line in text.lines() {
        if line.starts_with("diff --git ") {
            finish_segment(&segment, &mut parsed);
            segment.clear();
            segment.push(line);
        } else if !segment.is_empty() {
            segment.push(line);
        } else if !line.trim().is_empty() {
            preamble = true;
        }
    }
    finish_segment(&segment, &mut parsed);

    if preamble {
        warn!("Dropping diff text before the first file header");
        parsed.dropped_segments += 1;
    }

    parsed
}

fn finish_segment(segment: &[&str], parsed: &mut ParsedDiff) {
    let Some(header) = segment.first() else {
        return;
    };
    match parse_file_segment(segment) {
        Some(file) => parsed.files.push(file),
        None => {
            warn!(header = %header, "Dropping unparseable diff segment");
            parsed.dropped_segments += 1;
        }
    }
}

/// Hunk being filled, with cursors and the counts still expected
struct OpenChunk {
    chunk: DiffChunk,
    old_cursor: usize,
    new_cursor: usize,
    old_remaining: usize,
    new_remaining: usize,
}

impl OpenChunk {
    fn is_complete(&self) -> bool {
        self.old_remaining == 0 && self.new_remaining == 0
    }
}

/// Parse a single `diff --git` segment, `None` if it is malformed
fn parse_file_segment(lines: &[&str]) -> Option<FileDiff> {
    let (header, body) = lines.split_first()?;
    let path = segment_path(header, body)?;

    let mut chunks = Vec::new();
    let mut open: Option<OpenChunk> = None;

    for line in body {
        if let Some(caps) = HUNK_HEADER.captures(line) {
            if let Some(prev) = open.take() {
                if !prev.is_complete() {
                    return None;
                }
                chunks.push(prev.chunk);
            }

            let number = |i: usize| -> Option<usize> {
                match caps.get(i) {
                    Some(m) => m.as_str().parse().ok(),
                    None => Some(1),
                }
            };
            let (old_start, old_lines) = (number(1)?, number(2)?);
            let (new_start, new_lines) = (number(3)?, number(4)?);

            open = Some(OpenChunk {
                chunk: DiffChunk::new(old_start, old_lines, new_start, new_lines),
                old_cursor: old_start,
                new_cursor: new_start,
                old_remaining: old_lines,
                new_remaining: new_lines,
            });
            continue;
        }

        let Some(cur) = open.as_mut() else {
            continue;
        };
        if cur.is_complete() {
            continue;
        }

        let mut chars = line.chars();
        let content = || line.get(1..).unwrap_or("").to_string();
        match chars.next() {
            Some('+') => {
                cur.new_remaining = cur.new_remaining.checked_sub(1)?;
                cur.chunk.lines.push(DiffLine::add(content(), cur.new_cursor));
                cur.new_cursor += 1;
            }
            Some('-') => {
                cur.old_remaining = cur.old_remaining.checked_sub(1)?;
                cur.chunk.lines.push(DiffLine::remove(content(), cur.old_cursor));
                cur.old_cursor += 1;
            }
            Some(' ') => {
                cur.old_remaining = cur.old_remaining.checked_sub(1)?;
                cur.new_remaining = cur.new_remaining.checked_sub(1)?;
                cur.chunk
                    .lines
                    .push(DiffLine::context(content(), cur.old_cursor, cur.new_cursor));
                cur.old_cursor += 1;
                cur.new_cursor += 1;
            }
            // "\ No newline at end of file" and anything unrecognised
            _ => {}
        }
    }

    if let Some(last) = open {
        if !last.is_complete() {
            return None;
        }
        chunks.push(last.chunk);
    }

    Some(FileDiff::new(path, chunks))
}

/// Canonical path of a file segment
///
/// Prefers the new side: `+++ b/`, then `rename to`/`copy to`, then
/// `--- a/` for deletions, then the `diff --git` header itself.
fn segment_path(header: &str, body: &[&str]) -> Option<String> {
    let mut moved = None;
    let mut old = None;

    for line in body.iter().take_while(|line| !line.starts_with("@@ ")) {
        if let Some(raw) = line.strip_prefix("+++ ") {
            if let Some(path) = side_path(raw, "b/") {
                return Some(path);
            }
        } else if let Some(raw) = line.strip_prefix("--- ") {
            old = side_path(raw, "a/");
        } else if let Some(raw) = line
            .strip_prefix("rename to ")
            .or_else(|| line.strip_prefix("copy to "))
        {
            moved = Some(unquote_path(raw));
        }
    }

    moved.or(old).or_else(|| header_path(header))
}

/// Path from a `---`/`+++` line, `None` for `/dev/null`
fn side_path(raw: &str, prefix: &str) -> Option<String> {
    // git appends a tab after names containing spaces
    let raw = raw.strip_suffix('\t').unwrap_or(raw);
    if raw == "/dev/null" {
        return None;
    }
    let path = unquote_path(raw);
    Some(path.strip_prefix(prefix).map(str::to_string).unwrap_or(path))
}

/// New-side path from `diff --git a/<old> b/<new>`
///
/// Unquoted names are ambiguous when they contain ` b/`; the header is then
/// split at its midpoint, which is exact whenever old and new are equal.
fn header_path(header: &str) -> Option<String> {
    let rest = header.strip_prefix("diff --git ")?;

    if rest.ends_with('"') {
        let start = if rest.starts_with('"') {
            quoted_end(rest)? + 1
        } else {
            rest.rfind(" \"b/")?
        };
        let new = unquote_path(rest.get(start..)?.trim_start());
        return new.strip_prefix("b/").map(str::to_string);
    }

    if rest.starts_with('"') {
        let end = quoted_end(rest)?;
        return rest.get(end + 1..)?.strip_prefix(" b/").map(str::to_string);
    }

    if rest.len() % 2 == 1 {
        let mid = rest.len() / 2;
        if let (Some(old), Some(new)) = (rest.get(..mid), rest.get(mid + 1..)) {
            if let (Some(old), Some(new)) = (old.strip_prefix("a/"), new.strip_prefix("b/")) {
                if old == new && rest.as_bytes()[mid] == b' ' {
                    return Some(new.to_string());
                }
            }
        }
    }

    Some(FILE_HEADER.captures(header)?.get(2)?.as_str().to_string())
}

/// Byte index of the quote closing the quoted name `s` starts with
fn quoted_end(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, b) in s.bytes().enumerate().skip(1) {
        match b {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b'"' => return Some(i),
            _ => {}
        }
    }
    None
}

/// Undo git's C-style quoting of a path; unquoted input is returned as is
pub fn unquote_path(raw: &str) -> String {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return raw.to_string();
    };

    let mut bytes = Vec::with_capacity(inner.len());
    let mut iter = inner.bytes().peekable();
    while let Some(b) = iter.next() {
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        match iter.next() {
            Some(b'n') => bytes.push(b'\n'),
            Some(b't') => bytes.push(b'\t'),
            Some(b'r') => bytes.push(b'\r'),
            Some(b'a') => bytes.push(0x07),
            Some(b'b') => bytes.push(0x08),
            Some(b'f') => bytes.push(0x0c),
            Some(b'v') => bytes.push(0x0b),
            Some(d @ b'0'..=b'7') => {
                let mut value = u32::from(d - b'0');
                for _ in 0..2 {
                    match iter.peek() {
                        Some(&o @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(o - b'0');
                            iter.next();
                        }
                        _ => break,
                    }
                }
                bytes.push(value as u8);
            }
            Some(other) => bytes.push(other),
            None => bytes.push(b'\\'),
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

/// Parse `git diff --numstat -z` into path -> (additions, deletions)
///
/// Binary files report `-` and count as zero. Renames list the source and
/// destination as separate fields; the destination is used as the key.
pub fn parse_numstat(output: &str) -> HashMap<String, (usize, usize)> {
    let mut stats = HashMap::new();
    let mut fields = output.split('\0');

    while let Some(field) = fields.next() {
        let field = field.trim_start_matches('\n');
        if field.is_empty() {
            continue;
        }
        let mut parts = field.splitn(3, '\t');
        let (Some(added), Some(deleted), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };

        let path = if path.is_empty() {
            let _source = fields.next();
            match fields.next() {
                Some(dest) => dest,
                None => continue,
            }
        } else {
            path
        };

        stats.insert(
            path.to_string(),
            (added.parse().unwrap_or(0), deleted.parse().unwrap_or(0)),
        );
    }

    stats
}

/// Summary counts from `git diff --shortstat`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffStat {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

impl DiffStat {
    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.files_changed > 0 || self.insertions > 0 || self.deletions > 0
    }

    /// Get a summary string
    pub fn summary(&self) -> String {
        if !self.has_changes() {
            "No changes".to_string()
        } else {
            format!(
                "{} file(s), +{} -{} lines",
                self.files_changed, self.insertions, self.deletions
            )
        }
    }
}

/// Parse `git diff --shortstat` (or the last line of `--stat`)
pub fn parse_shortstat(output: &str) -> DiffStat {
    let mut stat = DiffStat::default();

    for line in output.lines() {
        // Look for summary line like: "3 files changed, 10 insertions(+), 5 deletions(-)"
        if line.contains("changed") {
            for part in line.split(',') {
                let part = part.trim();
                let num = || {
                    part.split_whitespace()
                        .next()
                        .and_then(|n| n.parse().ok())
                        .unwrap_or(0)
                };
                if part.contains("file") {
                    stat.files_changed = num();
                } else if part.contains("insertion") {
                    stat.insertions = num();
                } else if part.contains("deletion") {
                    stat.deletions = num();
                }
            }
            break;
        }
    }

    stat
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hunk_numbering() {
        let text = "diff --git a/notes.md b/notes.md
index 1111111..2222222 100644
--- a/notes.md
+++ b/notes.md
@@ -10,3 +10,4 @@
 ctx1
-removed
+added1
+added2
 ctx2
";
        let parsed = parse_unified_diff(text);
        assert_eq!(parsed.dropped_segments, 0);
        assert_eq!(parsed.files.len(), 1);

        let chunk = &parsed.files[0].chunks[0];
        assert_eq!(
            (chunk.old_start, chunk.old_lines, chunk.new_start, chunk.new_lines),
            (10, 3, 10, 4)
        );
        assert_eq!(
            chunk.lines,
            vec![
                DiffLine::context("ctx1", 10, 10),
                DiffLine::remove("removed", 11),
                DiffLine::add("added1", 11),
                DiffLine::add("added2", 12),
                DiffLine::context("ctx2", 12, 13),
            ]
        );
        assert_eq!(chunk.old_side_len(), chunk.old_lines);
        assert_eq!(chunk.new_side_len(), chunk.new_lines);
    }

    #[test]
    fn test_missing_counts_default_to_one() {
        let text = "diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -3 +3 @@ fn heading()
-old
+new
";
        let parsed = parse_unified_diff(text);
        let chunk = &parsed.files[0].chunks[0];
        assert_eq!((chunk.old_lines, chunk.new_lines), (1, 1));
        assert_eq!(chunk.lines[0], DiffLine::remove("old", 3));
        assert_eq!(chunk.lines[1], DiffLine::add("new", 3));
    }

    #[test]
    fn test_multiple_files_and_hunks() {
        let text = "diff --git a/one.md b/one.md
--- a/one.md
+++ b/one.md
@@ -1,2 +1,2 @@
-a
+b
 c
@@ -20,1 +20,2 @@
 x
+y
diff --git a/old name.md b/new name.md
similarity index 90%
rename from old name.md
rename to new name.md
--- a/old name.md
+++ b/new name.md
@@ -0,0 +1 @@
+fresh
";
        let parsed = parse_unified_diff(text);
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.files[0].chunks.len(), 2);
        assert_eq!(parsed.files[0].chunks[1].lines[1], DiffLine::add("y", 21));
        assert_eq!(parsed.files[1].path, "new name.md");
        assert_eq!(parsed.files[1].chunks[0].lines, vec![DiffLine::add("fresh", 1)]);
    }

    #[test]
    fn test_removed_line_that_looks_like_a_header() {
        let text = "diff --git a/list.md b/list.md
--- a/list.md
+++ b/list.md
@@ -1,2 +1,1 @@
--- not a header
 keep
";
        let parsed = parse_unified_diff(text);
        let chunk = &parsed.files[0].chunks[0];
        assert_eq!(chunk.lines[0], DiffLine::remove("-- not a header", 1));
        assert_eq!(chunk.lines[1], DiffLine::context("keep", 2, 1));
    }

    #[test]
    fn test_no_newline_marker_ignored() {
        let text = "diff --git a/a b/a
--- a/a
+++ b/a
@@ -1 +1 @@
-x
\\ No newline at end of file
+y
\\ No newline at end of file
";
        let parsed = parse_unified_diff(text);
        assert_eq!(parsed.files[0].chunks[0].lines.len(), 2);
    }

    #[test]
    fn test_binary_file_has_no_chunks() {
        let text = "diff --git a/img.png b/img.png
index 1111111..2222222 100644
Binary files a/img.png and b/img.png differ
";
        let parsed = parse_unified_diff(text);
        assert_eq!(parsed.files.len(), 1);
        assert!(parsed.files[0].chunks.is_empty());
    }

    #[test]
    fn test_malformed_segments_are_dropped() {
        let text = "garbage before
diff --git nonsense
@@ -1 +1 @@
-a
+b
diff --git a/short.md b/short.md
@@ -1,3 +1,3 @@
 only one line
diff --git a/ok.md b/ok.md
@@ -1 +1 @@
-a
+b
";
        let parsed = parse_unified_diff(text);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].path, "ok.md");
        assert_eq!(parsed.dropped_segments, 3);
    }

    #[test]
    fn test_quoted_path_is_unquoted() {
        let text = r#"diff --git "a/q\"x.md" "b/q\"x.md"
index 1111111..2222222 100644
--- "a/q\"x.md"
+++ "b/q\"x.md"
@@ -1 +1 @@
-a
+b
"#;
        let parsed = parse_unified_diff(text);
        assert_eq!(parsed.dropped_segments, 0);
        assert_eq!(parsed.files[0].path, "q\"x.md");
    }

    #[test]
    fn test_path_containing_b_slash() {
        let text = "diff --git a/x b/y b/x b/y
index 1111111..2222222 100644
--- a/x b/y\t
+++ b/x b/y\t
@@ -1 +1 @@
-a
+b
";
        let mut parsed = parse_unified_diff(text);
        assert_eq!(parsed.files[0].path, "x b/y");

        let stats = HashMap::from([("x b/y".to_string(), (1, 1))]);
        parsed.attach_stats(&stats);
        assert_eq!((parsed.files[0].additions, parsed.files[0].deletions), (1, 1));
    }

    #[test]
    fn test_header_only_segments() {
        // Binary change, no ---/+++ lines: header split at its midpoint
        let binary = "diff --git a/x b/y b/x b/y
index 1111111..2222222 100644
Binary files a/x b/y and b/x b/y differ
";
        assert_eq!(parse_unified_diff(binary).files[0].path, "x b/y");

        let renamed = "diff --git a/old name.md b/new name.md
similarity index 100%
rename from old name.md
rename to new name.md
";
        assert_eq!(parse_unified_diff(renamed).files[0].path, "new name.md");
    }

    #[test]
    fn test_deleted_file_uses_old_side() {
        let text = "diff --git a/gone.md b/gone.md
deleted file mode 100644
index 1111111..0000000
--- a/gone.md
+++ /dev/null
@@ -1,2 +0,0 @@
-one
-two
";
        let parsed = parse_unified_diff(text);
        assert_eq!(parsed.files[0].path, "gone.md");
        assert_eq!(parsed.files[0].chunks[0].lines.len(), 2);
    }

    #[test]
    fn test_unquote_path() {
        assert_eq!(unquote_path("plain.md"), "plain.md");
        assert_eq!(unquote_path(r#""tab\there""#), "tab\there");
        assert_eq!(unquote_path(r#""back\\slash""#), "back\\slash");
        assert_eq!(unquote_path(r#""caf\303\251.md""#), "caf\u{e9}.md");
    }

    #[test]
    fn test_empty_diff() {
        let parsed = parse_unified_diff("");
        assert!(parsed.files.is_empty());
        assert_eq!(parsed.dropped_segments, 0);
    }

    #[test]
    fn test_parse_numstat() {
        let output = "3\t1\tnotes.md\0-\t-\timg.png\0".to_string()
            + "2\t0\t\0old.md\0new.md\0";
        let stats = parse_numstat(&output);
        assert_eq!(stats.get("notes.md"), Some(&(3, 1)));
        assert_eq!(stats.get("img.png"), Some(&(0, 0)));
        assert_eq!(stats.get("new.md"), Some(&(2, 0)));
        assert_eq!(stats.get("old.md"), None);
    }

    #[test]
    fn test_attach_stats() {
        let mut parsed = parse_unified_diff("diff --git a/a.md b/a.md\n@@ -1 +1 @@\n-a\n+b\n");
        let stats = HashMap::from([("a.md".to_string(), (7, 2))]);
        parsed.attach_stats(&stats);
        assert_eq!((parsed.files[0].additions, parsed.files[0].deletions), (7, 2));
    }

    #[test]
    fn test_parse_shortstat() {
        let output = " src/main.rs | 10 ++++------
 src/lib.rs  |  5 +++++
 2 files changed, 9 insertions(+), 6 deletions(-)";

        let stat = parse_shortstat(output);
        assert_eq!(stat.files_changed, 2);
        assert_eq!(stat.insertions, 9);
        assert_eq!(stat.deletions, 6);
    }

    #[test]
    fn test_parse_shortstat_single_file() {
        let stat = parse_shortstat(" 1 file changed, 3 insertions(+)\n");
        assert_eq!(
            stat,
            DiffStat {
                files_changed: 1,
                insertions: 3,
                deletions: 0
            }
        );
        assert!(stat.summary().contains("+3"));
    }

    #[test]
    fn test_parse_shortstat_empty() {
        let stat = parse_shortstat("");
        assert!(!stat.has_changes());
        assert_eq!(stat.summary(), "No changes");
    }
}
