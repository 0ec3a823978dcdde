//! Route table
//!
//! Maps `(method, path?query)` to a typed [`Route`] and dispatches it to the
//! engine. Bodies are decoded per route; every outcome becomes an
//! [`ApiResponse`] envelope.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use super::ApiResponse;
use crate::engine::GitEngine;
use crate::error::{Error, Result};
use crate::git::CommitOutcome;

/// A recognised request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Pull,
    Push,
    Fetch,
    Status,
    Stage,
    Unstage,
    Commit,
    History { limit: Option<usize> },
    CommitDetails { hash: String },
    ListBranches,
    CreateBranch,
    DeleteBranch { name: String, force: bool },
    Checkout,
}

impl Route {
    /// Match a method and request target, `None` for unknown routes
    pub fn parse(method: &str, target: &str) -> Option<Self> {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        let path = path.trim_end_matches('/');
        let rest = path.strip_prefix("/git/")?;

        let route = match (method.to_ascii_uppercase().as_str(), rest) {
            ("POST", "pull") => Self::Pull,
            ("POST", "push") => Self::Push,
            ("POST", "fetch") => Self::Fetch,
            ("GET", "status") => Self::Status,
            ("POST", "stage") => Self::Stage,
            ("POST", "unstage") => Self::Unstage,
            ("POST", "commit") => Self::Commit,
            ("GET", "history") => Self::History {
                limit: query_param(query, "limit").and_then(|v| v.parse().ok()),
            },
            ("GET", "branches") => Self::ListBranches,
            ("POST", "branches") => Self::CreateBranch,
            ("POST", "checkout") => Self::Checkout,
            ("GET", rest) => {
                let hash = rest.strip_prefix("commits/")?;
                if hash.is_empty() || hash.contains('/') {
                    return None;
                }
                Self::CommitDetails {
                    hash: percent_decode(hash)?,
                }
            }
            ("DELETE", rest) => {
                let name = percent_decode(rest.strip_prefix("branches/")?)?;
                if name.is_empty() {
                    return None;
                }
                Self::DeleteBranch {
                    name,
                    force: query_param(query, "force").is_some_and(|v| v == "true" || v == "1"),
                }
            }
            _ => return None,
        };
        Some(route)
    }
}

/// Decode `%XX` escapes in a path segment, `None` for malformed escapes
fn percent_decode(segment: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(segment.len());
    let mut iter = segment.bytes();
    while let Some(b) = iter.next() {
        if b == b'%' {
            let hi = char::from(iter.next()?).to_digit(16)?;
            let lo = char::from(iter.next()?).to_digit(16)?;
            bytes.push((hi * 16 + lo) as u8);
        } else {
            bytes.push(b);
        }
    }
    String::from_utf8(bytes).ok()
}

fn query_param<'q>(query: &'q str, key: &str) -> Option<&'q str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SyncBody {
    timeout_ms: Option<u64>,
}

impl SyncBody {
    fn limit(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StageBody {
    files: Vec<String>,
    all: bool,
}

#[derive(Debug, Deserialize)]
struct UnstageBody {
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CommitBody {
    message: String,
    #[serde(default)]
    files: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CreateBranchBody {
    name: String,
    #[serde(default)]
    from: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutBody {
    branch: String,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    token: String,
}

fn decode<T: DeserializeOwned>(body: Value) -> std::result::Result<T, ApiResponse> {
    let body = if body.is_null() { json!({}) } else { body };
    serde_json::from_value(body)
        .map_err(|e| ApiResponse::failure(format!("Invalid request body: {}", e), "validation"))
}

fn to_data<T: serde::Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

/// Which routes a caller may reach
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RouteAccess {
    /// The `/git` route table only
    #[default]
    Public,
    /// Also `POST /admin/token`
    Admin,
}

impl RouteAccess {
    pub fn from_flag(allow_token_rotation: bool) -> Self {
        if allow_token_rotation {
            Self::Admin
        } else {
            Self::Public
        }
    }
}

/// Handle one request against the engine
pub async fn dispatch(
    engine: &GitEngine,
    access: RouteAccess,
    method: &str,
    target: &str,
    body: Value,
) -> ApiResponse {
    if access == RouteAccess::Admin
        && method.eq_ignore_ascii_case("POST")
        && target == "/admin/token"
    {
        return match decode::<TokenBody>(body) {
            Ok(body) => respond(engine.rotate_token(body.token).await, |_| {
                ApiResponse::success(Some("Credential updated".to_string()), None)
            }),
            Err(response) => response,
        };
    }

    let Some(route) = Route::parse(method, target) else {
        debug!("No route for {} {}", method, target);
        return ApiResponse::failure(format!("No route for {} {}", method, target), "not_found");
    };

    match run_route(engine, route, body).await {
        Ok(response) | Err(response) => response,
    }
}

async fn run_route(
    engine: &GitEngine,
    route: Route,
    body: Value,
) -> std::result::Result<ApiResponse, ApiResponse> {
    let response = match route {
        Route::Pull => {
            let body: SyncBody = decode(body)?;
            respond(engine.pull(body.limit()).await, |outcome| {
                ApiResponse::success(Some(outcome.message.clone()), to_data(outcome))
            })
        }
        Route::Push => {
            let body: SyncBody = decode(body)?;
            respond(engine.push(body.limit()).await, |outcome| {
                ApiResponse::success(Some(outcome.message.clone()), to_data(outcome))
            })
        }
        Route::Fetch => {
            let body: SyncBody = decode(body)?;
            respond(engine.fetch(body.limit()).await, |divergence| {
                ApiResponse::success(Some("Fetched".to_string()), to_data(divergence))
            })
        }
        Route::Status => respond(engine.status().await, |status| {
            ApiResponse::success(None, to_data(status))
        }),
        Route::Stage => {
            let body: StageBody = decode(body)?;
            if body.all {
                respond(engine.stage_all().await, |_| {
                    ApiResponse::success(Some("Staged all changes".to_string()), None)
                })
            } else {
                let count = body.files.len();
                respond(engine.stage(&body.files).await, |_| {
                    ApiResponse::success(Some(format!("Staged {} file(s)", count)), None)
                })
            }
        }
        Route::Unstage => {
            let body: UnstageBody = decode(body)?;
            let count = body.files.len();
            respond(engine.unstage(&body.files).await, |_| {
                ApiResponse::success(Some(format!("Unstaged {} file(s)", count)), None)
            })
        }
        Route::Commit => {
            let body: CommitBody = decode(body)?;
            respond(
                engine.commit(&body.message, body.files.as_deref()).await,
                |outcome| {
                    let message = match outcome {
                        CommitOutcome::Committed { id } => format!("Committed {}", id),
                        CommitOutcome::NothingToCommit => "Nothing to commit".to_string(),
                    };
                    ApiResponse::success(Some(message), to_data(outcome))
                },
            )
        }
        Route::History { limit } => respond(engine.history(limit).await, |commits| {
            ApiResponse::success(None, to_data(commits))
        }),
        Route::CommitDetails { hash } => respond(engine.commit_details(&hash).await, |details| {
            ApiResponse::success(None, to_data(details))
        }),
        Route::ListBranches => respond(engine.list_branches().await, |branches| {
            ApiResponse::success(None, to_data(branches))
        }),
        Route::CreateBranch => {
            let body: CreateBranchBody = decode(body)?;
            respond(
                engine.create_branch(&body.name, body.from.as_deref()).await,
                |head| {
                    ApiResponse::success(
                        Some(format!("Created branch {}", body.name)),
                        Some(json!({ "name": body.name, "head_commit": head })),
                    )
                },
            )
        }
        Route::DeleteBranch { name, force } => {
            respond(engine.delete_branch(&name, force).await, |_| {
                ApiResponse::success(Some(format!("Deleted branch {}", name)), None)
            })
        }
        Route::Checkout => {
            let body: CheckoutBody = decode(body)?;
            respond(engine.checkout(&body.branch).await, |_| {
                ApiResponse::success(Some(format!("Switched to {}", body.branch)), None)
            })
        }
    };
    Ok(response)
}

/// Turn an engine result into an envelope, logging failures by severity
fn respond<T>(result: Result<T>, on_success: impl FnOnce(&T) -> ApiResponse) -> ApiResponse {
    match result {
        Ok(value) => on_success(&value),
        Err(err) => {
            log_failure(&err);
            ApiResponse::from_error(&err)
        }
    }
}

fn log_failure(err: &Error) {
    if err.is_fatal() {
        error!(kind = err.kind(), "{}", err);
    } else {
        warn!(kind = err.kind(), "{}", err);
    }
}
