//! Git operations on the local mirror
//!
//! Mutations and remote traffic go through the `git` CLI behind the
//! [`GitRunner`] seam, while HEAD queries use gitoxide directly:
//! - `GitBackend` - Core gitoxide operations
//! - `RepositoryHandle` - The mirror, its remote and credential
//! - `StageManager` / `BranchManager` / `SyncManager` - Mutating operations
//! - `HistoryReader` - Log and per-commit diffs
//! - `parse_status` / `parse_unified_diff` - Output parsers

mod backend;
mod branch;
mod context;
mod diff;
mod executor;
mod history;
mod repository;
mod stage;
mod status;
mod sync;

pub use backend::*;
pub use branch::*;
pub use context::*;
pub use diff::*;
pub use executor::*;
pub use history::*;
pub use repository::*;
pub use stage::*;
pub use status::*;
pub use sync::*;
