//! Integration tests for mirror-sync
//!
//! These tests drive the real `git` binary against temporary repositories:
//! a seed repository, a bare "remote" cloned from it, and the engine's
//! mirror cloned from the remote. They are skipped when git is missing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretBox;
use tempfile::TempDir;

use mirror_sync::GitEngine;
use mirror_sync::config::{HistoryConfig, RepoSettings};
use mirror_sync::error::{Error, PushFailureKind, ValidationError};
use mirror_sync::git::{ChangeCategory, CommitOutcome};

/// Helper to check if git is available
async fn git_available() -> bool {
    tokio::process::Command::new("git")
        .arg("--version")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `dir`, panicking on failure
async fn git(dir: &Path, args: &[&str]) -> String {
    let output = tokio::process::Command::new("git")
        .current_dir(dir)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .await
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

async fn configure_user(dir: &Path) {
    git(dir, &["config", "user.email", "test@test.com"]).await;
    git(dir, &["config", "user.name", "Test User"]).await;
    git(dir, &["config", "commit.gpgsign", "false"]).await;
}

/// Seed repository with two commits on `main`, plus a bare remote cloned from it
async fn create_remote(temp_dir: &TempDir) -> PathBuf {
    let seed = temp_dir.path().join("seed");
    tokio::fs::create_dir_all(&seed).await.unwrap();

    git(&seed, &["init", "--quiet"]).await;
    git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]).await;
    configure_user(&seed).await;

    tokio::fs::write(seed.join("README.md"), "# Notes\n").await.unwrap();
    git(&seed, &["add", "README.md"]).await;
    git(&seed, &["commit", "--quiet", "-m", "Initial commit"]).await;

    tokio::fs::write(seed.join("README.md"), "# Notes\n\nfirst\nsecond\n")
        .await
        .unwrap();
    git(&seed, &["commit", "--quiet", "-am", "Expand readme"]).await;

    let remote = temp_dir.path().join("remote.git");
    git(
        temp_dir.path(),
        &["clone", "--quiet", "--bare", "seed", "remote.git"],
    )
    .await;
    remote
}

fn settings(temp_dir: &TempDir, remote: &Path) -> RepoSettings {
    RepoSettings {
        path: temp_dir.path().join("mirror"),
        remote_url: remote.to_string_lossy().to_string(),
        remote_name: "origin".to_string(),
        token: SecretBox::new(Box::new("unused-token".to_string())),
        command_timeout: Duration::from_secs(30),
        network_timeout: Duration::from_secs(60),
    }
}

/// Engine with its mirror cloned and an identity configured
async fn create_engine() -> (TempDir, PathBuf, GitEngine) {
    let temp_dir = TempDir::new().unwrap();
    let remote = create_remote(&temp_dir).await;
    let engine = GitEngine::new(settings(&temp_dir, &remote), HistoryConfig::default());

    engine.ensure_ready().await.unwrap();
    configure_user(&temp_dir.path().join("mirror")).await;

    (temp_dir, remote, engine)
}

#[tokio::test]
async fn test_ensure_ready_clones_once() {
    if !git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }

    let (temp_dir, remote, engine) = create_engine().await;
    let mirror = temp_dir.path().join("mirror");
    assert!(mirror.join(".git").exists());
    assert!(mirror.join("README.md").exists());

    let first = engine.ensure_ready().await.unwrap();
    let second = engine.ensure_ready().await.unwrap();
    assert!(std::ptr::eq(first, second));

    // A marker file survives a second engine on the same path, so nothing was re-cloned
    tokio::fs::write(mirror.join("marker.txt"), "keep").await.unwrap();
    let again = GitEngine::new(settings(&temp_dir, &remote), HistoryConfig::default());
    again.ensure_ready().await.unwrap();
    assert!(mirror.join("marker.txt").exists());

    let branches = again.list_branches().await.unwrap();
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0].name, "main");
    assert!(branches[0].is_current);
}

#[tokio::test]
async fn test_non_repository_directory_is_replaced() {
    if !git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }

    let temp_dir = TempDir::new().unwrap();
    let remote = create_remote(&temp_dir).await;
    let mirror = temp_dir.path().join("mirror");
    tokio::fs::create_dir_all(&mirror).await.unwrap();
    tokio::fs::write(mirror.join("stale.txt"), "junk").await.unwrap();

    let engine = GitEngine::new(settings(&temp_dir, &remote), HistoryConfig::default());
    engine.ensure_ready().await.unwrap();

    assert!(!mirror.join("stale.txt").exists());
    assert!(mirror.join("README.md").exists());
}

#[tokio::test]
async fn test_clone_failure_is_lifecycle_error() {
    if !git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }

    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("does-not-exist.git");
    let engine = GitEngine::new(settings(&temp_dir, &missing), HistoryConfig::default());

    let err = engine.ensure_ready().await.unwrap_err();
    assert!(matches!(err, Error::Lifecycle(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_stage_commit_history() {
    if !git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }

    let (temp_dir, _remote, engine) = create_engine().await;
    let mirror = temp_dir.path().join("mirror");
    tokio::fs::write(mirror.join("a.txt"), "alpha\n").await.unwrap();
    tokio::fs::write(mirror.join("b.txt"), "beta\n").await.unwrap();

    let status = engine.status().await.unwrap();
    assert_eq!(status.branch.as_deref(), Some("main"));
    assert_eq!(status.in_category(ChangeCategory::Untracked).count(), 2);
    assert!(!status.has_staged());

    engine
        .stage(&["a.txt".to_string(), "b.txt".to_string()])
        .await
        .unwrap();
    let status = engine.status().await.unwrap();
    let mut staged = status.staged_paths();
    staged.sort();
    assert_eq!(staged, vec!["a.txt", "b.txt"]);

    let outcome = engine.commit("fix typo", None).await.unwrap();
    let CommitOutcome::Committed { id } = outcome else {
        panic!("expected a commit, got {:?}", outcome);
    };

    let status = engine.status().await.unwrap();
    assert!(!status.has_staged());
    assert!(status.is_clean());

    let history = engine.history(Some(1)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, id);
    assert_eq!(history[0].message, "fix typo");
    assert_eq!(history[0].author, "Test User");

    // Nothing left to commit
    let outcome = engine.commit("another one", None).await.unwrap();
    assert_eq!(outcome, CommitOutcome::NothingToCommit);
}

#[tokio::test]
async fn test_commit_with_files_and_unstage() {
    if !git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }

    let (temp_dir, _remote, engine) = create_engine().await;
    let mirror = temp_dir.path().join("mirror");
    tokio::fs::write(mirror.join("keep.txt"), "keep\n").await.unwrap();
    tokio::fs::write(mirror.join("later.txt"), "later\n").await.unwrap();

    engine.stage(&["later.txt".to_string()]).await.unwrap();
    engine.unstage(&["later.txt".to_string()]).await.unwrap();
    let status = engine.status().await.unwrap();
    assert!(!status.has_staged());

    let files = vec!["keep.txt".to_string()];
    let outcome = engine.commit("add keep", Some(&files)).await.unwrap();
    assert!(matches!(outcome, CommitOutcome::Committed { .. }));

    let status = engine.status().await.unwrap();
    let untracked: Vec<_> = status
        .in_category(ChangeCategory::Untracked)
        .map(|f| f.path.as_str())
        .collect();
    assert_eq!(untracked, vec!["later.txt"]);
}

#[tokio::test]
async fn test_branch_lifecycle() {
    if !git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }

    let (_temp_dir, _remote, engine) = create_engine().await;

    let head = engine.create_branch("feature/x", None).await.unwrap();
    let branches = engine.list_branches().await.unwrap();
    let current: Vec<_> = branches.iter().filter(|b| b.is_current).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].name, "feature/x");
    assert_eq!(current[0].head_commit, head);

    let err = engine.delete_branch("feature/x", false).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::CurrentBranch(_))
    ));

    engine.checkout("main").await.unwrap();
    engine.delete_branch("feature/x", false).await.unwrap();

    let names: Vec<_> = engine
        .list_branches()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names, vec!["main".to_string()]);
}

#[tokio::test]
async fn test_push_then_up_to_date() {
    if !git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }

    let (temp_dir, remote, engine) = create_engine().await;
    let mirror = temp_dir.path().join("mirror");

    let outcome = engine.push(None).await.unwrap();
    assert!(!outcome.pushed);

    tokio::fs::write(mirror.join("new.txt"), "new\n").await.unwrap();
    let files = vec!["new.txt".to_string()];
    let CommitOutcome::Committed { id } = engine.commit("add new", Some(&files)).await.unwrap()
    else {
        panic!("expected a commit");
    };

    let outcome = engine.push(None).await.unwrap();
    assert!(outcome.pushed);
    assert_eq!(outcome.commits, 1);
    assert_eq!(outcome.branch.as_deref(), Some("main"));

    let remote_head = git(&remote, &["rev-parse", "refs/heads/main"]).await;
    assert_eq!(remote_head.trim(), id);

    let outcome = engine.push(None).await.unwrap();
    assert!(!outcome.pushed);
    assert_eq!(outcome.message, "Already up to date");
}

#[tokio::test]
async fn test_push_new_branch_sets_upstream() {
    if !git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }

    let (temp_dir, remote, engine) = create_engine().await;
    let mirror = temp_dir.path().join("mirror");

    engine.create_branch("topic", None).await.unwrap();
    tokio::fs::write(mirror.join("topic.txt"), "topic\n").await.unwrap();
    let files = vec!["topic.txt".to_string()];
    engine.commit("topic work", Some(&files)).await.unwrap();

    let outcome = engine.push(None).await.unwrap();
    assert!(outcome.pushed);
    assert_eq!(outcome.branch.as_deref(), Some("topic"));

    git(&remote, &["rev-parse", "--verify", "refs/heads/topic"]).await;
    assert!(!engine.push(None).await.unwrap().pushed);
}

#[tokio::test]
async fn test_push_to_diverged_remote_is_conflict() {
    if !git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }

    let (temp_dir, _remote, engine) = create_engine().await;
    let mirror = temp_dir.path().join("mirror");

    git(
        temp_dir.path(),
        &["clone", "--quiet", "remote.git", "other"],
    )
    .await;
    let other = temp_dir.path().join("other");
    configure_user(&other).await;
    tokio::fs::write(other.join("theirs.txt"), "theirs\n").await.unwrap();
    git(&other, &["add", "theirs.txt"]).await;
    git(&other, &["commit", "--quiet", "-m", "Their change"]).await;
    git(&other, &["push", "--quiet", "origin", "main"]).await;

    // Without advice hints the rejection only shows up in the porcelain lines
    for key in ["advice.pushFetchFirst", "advice.pushNonFFCurrent", "advice.pushUpdateRejected"] {
        git(&mirror, &["config", key, "false"]).await;
    }

    tokio::fs::write(mirror.join("ours.txt"), "ours\n").await.unwrap();
    let files = vec!["ours.txt".to_string()];
    engine.commit("Our change", Some(&files)).await.unwrap();

    match engine.push(None).await {
        Err(Error::Push(err)) => {
            assert_eq!(err.kind, PushFailureKind::Conflict);
            assert!(err.message.contains("rejected"), "{}", err.message);
        }
        other => panic!("expected a push conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pull_from_updated_remote() {
    if !git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }

    let (temp_dir, _remote, engine) = create_engine().await;

    let outcome = engine.pull(None).await.unwrap();
    assert!(!outcome.changed);

    // Another clone pushes a change
    git(
        temp_dir.path(),
        &["clone", "--quiet", "remote.git", "other"],
    )
    .await;
    let other = temp_dir.path().join("other");
    configure_user(&other).await;
    tokio::fs::write(other.join("remote.txt"), "one\ntwo\nthree\n")
        .await
        .unwrap();
    git(&other, &["add", "remote.txt"]).await;
    git(&other, &["commit", "--quiet", "-m", "Remote change"]).await;
    git(&other, &["push", "--quiet", "origin", "main"]).await;

    let divergence = engine.fetch(None).await.unwrap();
    assert_eq!(divergence.behind, 1);

    let outcome = engine.pull(None).await.unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.summary.files_changed, 1);
    assert_eq!(outcome.summary.insertions, 3);
    assert!(temp_dir.path().join("mirror").join("remote.txt").exists());

    let history = engine.history(Some(1)).await.unwrap();
    assert_eq!(history[0].message, "Remote change");
}

#[tokio::test]
async fn test_commit_details() {
    if !git_available().await {
        eprintln!("Skipping test: git not available");
        return;
    }

    let (_temp_dir, _remote, engine) = create_engine().await;

    let history = engine.history(None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].message, "Expand readme");

    let details = engine.commit_details(&history[0].id).await.unwrap();
    assert_eq!(details.commit.id, history[0].id);
    assert_eq!(details.dropped_segments, 0);
    assert_eq!(details.files.len(), 1);

    let file = &details.files[0];
    assert_eq!(file.path, "README.md");
    assert_eq!(file.additions, 3);
    assert_eq!(file.deletions, 0);
    assert_eq!(file.chunks.len(), 1);
    let chunk = &file.chunks[0];
    assert_eq!(chunk.old_side_len(), chunk.old_lines);
    assert_eq!(chunk.new_side_len(), chunk.new_lines);

    // Abbreviated ids resolve too
    let short = &history[0].id[..8];
    assert_eq!(
        engine.commit_details(short).await.unwrap().commit.id,
        history[0].id
    );

    let root = engine.commit_details(&history[1].id).await.unwrap_err();
    assert_eq!(root.kind(), "not_found");

    let unknown = engine.commit_details("deadbeef").await.unwrap_err();
    assert_eq!(unknown.kind(), "not_found");
}
