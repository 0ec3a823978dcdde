//! mirror-sync - keeps a local git working copy in sync with a remote
//!
//! Exposes pull, push, staging, commits, branches and history of a single
//! mirrored repository through a small request layer, with structured diff
//! models for individual commits.
//!
//! # Architecture
//!
//! - **GitEngine** - Owns the repository handle behind a read/write lock
//! - **GitRunner** - Seam around the `git` CLI, swappable in tests
//! - **GitBackend** - gitoxide for HEAD queries
//! - **Server** - Newline-delimited JSON transport over the route table
//!
//! # Modules
//!
//! - [`engine`] - Validated, lock-disciplined entry point
//! - [`git`] - Git invocations and output parsers
//! - [`api`] - Route table, response envelope and TCP transport
//! - [`config`] - Layered configuration
//! - [`error`] - Error types

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod git;

pub use config::Config;
pub use engine::GitEngine;
pub use error::{Error, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
