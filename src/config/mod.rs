//! Configuration module
//!
//! Handles user configuration (`~/.config/mirror-sync/config.toml`) layered
//! with `MIRROR_*` environment variables.

mod settings;

pub use settings::*;
