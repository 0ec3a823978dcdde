//! Local mirror lifecycle
//!
//! Makes sure a working copy of the configured remote exists on disk and
//! hands out the single [`RepositoryHandle`] every operation shares.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretBox};
use tracing::{info, instrument, warn};

use super::{GitBackend, GitRunner, redact_url};
use crate::config::RepoSettings;
use crate::error::{Error, GitError, Result};

/// The engine's one handle on the local mirror
pub struct RepositoryHandle {
    path: PathBuf,
    remote_url: String,
    remote_name: String,
    token: SecretBox<String>,
    backend: GitBackend,
    command_timeout: Duration,
    network_timeout: Duration,
}

impl RepositoryHandle {
    fn new(settings: &RepoSettings, backend: GitBackend) -> Self {
        Self {
            path: settings.path.clone(),
            remote_url: settings.remote_url.clone(),
            remote_name: settings.remote_name.clone(),
            token: SecretBox::new(Box::new(settings.token.expose_secret().clone())),
            backend,
            command_timeout: settings.command_timeout,
            network_timeout: settings.network_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remote URL without credentials
    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn backend(&self) -> &GitBackend {
        &self.backend
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn network_timeout(&self) -> Duration {
        self.network_timeout
    }

    /// Remote URL with the current credential embedded
    pub fn authenticated_url(&self) -> String {
        authenticated_url(&self.remote_url, self.token.expose_secret())
    }

    /// Replace the credential used for subsequent remote operations
    pub fn set_token(&mut self, token: String) {
        self.token = SecretBox::new(Box::new(token));
    }

    /// Remove the credential from text that may echo the remote URL
    pub fn scrub(&self, text: &str) -> String {
        scrub_token(text, self.token.expose_secret())
    }
}

impl fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryHandle")
            .field("path", &self.path)
            .field("remote_url", &self.remote_url)
            .field("remote_name", &self.remote_name)
            .finish_non_exhaustive()
    }
}

/// Reuse the mirror at the configured path, or clone it there
///
/// An existing directory that is not a repository is removed first. Clone
/// failures are lifecycle errors; nothing is retried.
#[instrument(skip_all, fields(path = %settings.path.display(), remote = %redact_url(&settings.remote_url)))]
pub async fn ensure_ready(git: &dyn GitRunner, settings: &RepoSettings) -> Result<RepositoryHandle> {
    let path = &settings.path;

    if GitBackend::is_repository(path) {
        let backend = GitBackend::open(path).map_err(|e| Error::Lifecycle(e.to_string()))?;
        info!("Reusing existing repository");
        return Ok(RepositoryHandle::new(settings, backend));
    }

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    if path.is_dir() {
        warn!("Removing non-repository directory at {:?}", path);
        tokio::fs::remove_dir_all(path).await?;
    } else if path.exists() {
        warn!("Removing file occupying {:?}", path);
        tokio::fs::remove_file(path).await?;
    }

    let token = settings.token.expose_secret();
    let url = authenticated_url(&settings.remote_url, token);
    let target = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .ok_or_else(|| Error::Lifecycle(format!("invalid repository path {:?}", path)))?;

    info!("Cloning remote");
    git.run_checked(
        parent,
        &["clone", "--quiet", url.as_str(), target.as_ref()],
        settings.network_timeout,
    )
    .await
    .map_err(|e| match e {
        Error::Git(GitError::Timeout(limit)) => {
            Error::Lifecycle(format!("clone timed out after {:?}", limit))
        }
        other => Error::Lifecycle(format!("clone failed: {}", scrub_token(&other.to_string(), token))),
    })?;

    let backend = GitBackend::open(path).map_err(|e| Error::Lifecycle(e.to_string()))?;
    info!("Clone complete");

    Ok(RepositoryHandle::new(settings, backend))
}

/// Embed a credential into an http(s) URL, replacing any existing userinfo
///
/// Other URL forms (local paths, `file://`, ssh) are returned unchanged.
pub fn authenticated_url(remote_url: &str, token: &str) -> String {
    let Some((scheme, rest)) = remote_url.split_once("://") else {
        return remote_url.to_string();
    };
    if !matches!(scheme, "http" | "https") || token.is_empty() {
        return remote_url.to_string();
    }

    let host_and_path = match rest.split_once('@') {
        Some((userinfo, after)) if !userinfo.contains('/') => after,
        _ => rest,
    };
    format!("{}://{}@{}", scheme, token, host_and_path)
}

fn scrub_token(text: &str, token: &str) -> String {
    if token.is_empty() {
        text.to_string()
    } else {
        text.replace(token, "***")
    }
}
