//! mirror-sync - git mirror synchronisation service
//!
//! Run with `mirror-sync` (serves requests) or `mirror-sync --help` for the
//! one-shot commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use mirror_sync::{
    APP_NAME, Config, GitEngine, VERSION,
    api::{RouteAccess, Server, dispatch},
    git::GitExecutor,
};

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(version = VERSION)]
#[command(about = "Keeps a local git working copy in sync with its remote")]
#[command(long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve requests over TCP (default)
    Serve,

    /// Show working tree status
    Status,

    /// Fetch and merge from the remote
    Pull {
        /// Timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Push the current branch
    Push {
        /// Timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Update remote-tracking refs
    Fetch {
        /// Timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Stage files
    Stage {
        /// Paths relative to the repository root
        paths: Vec<String>,

        /// Stage every change
        #[arg(short, long, conflicts_with = "paths")]
        all: bool,
    },

    /// Unstage files
    Unstage {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Commit staged changes
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: String,

        /// Files to stage before committing
        paths: Vec<String>,
    },

    /// Show recent commits
    Log {
        /// Number of commits
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show a commit with its diff
    Show {
        /// Commit id
        hash: String,
    },

    /// Manage branches
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Show configuration
    Config {
        /// Initialize config file with defaults
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand)]
enum BranchAction {
    /// List local branches
    List,

    /// Create a branch and switch to it
    Create {
        name: String,

        /// Start point
        #[arg(long)]
        from: Option<String>,
    },

    /// Delete a branch
    Delete {
        name: String,

        /// Delete even if not fully merged
        #[arg(short, long)]
        force: bool,
    },

    /// Switch to a branch
    Checkout { name: String },
}

impl Commands {
    /// The route a one-shot command maps to
    fn request(self) -> Option<(&'static str, String, Value)> {
        let request = match self {
            Self::Serve | Self::Config { .. } => return None,
            Self::Status => ("GET", "/git/status".to_string(), Value::Null),
            Self::Pull { timeout_ms } => post("/git/pull", json!({ "timeout_ms": timeout_ms })),
            Self::Push { timeout_ms } => post("/git/push", json!({ "timeout_ms": timeout_ms })),
            Self::Fetch { timeout_ms } => post("/git/fetch", json!({ "timeout_ms": timeout_ms })),
            Self::Stage { paths, all } => post("/git/stage", json!({ "files": paths, "all": all })),
            Self::Unstage { paths } => post("/git/unstage", json!({ "files": paths })),
            Self::Commit { message, paths } => {
                let files = (!paths.is_empty()).then_some(paths);
                post("/git/commit", json!({ "message": message, "files": files }))
            }
            Self::Log { limit } => {
                let path = match limit {
                    Some(limit) => format!("/git/history?limit={}", limit),
                    None => "/git/history".to_string(),
                };
                ("GET", path, Value::Null)
            }
            Self::Show { hash } => ("GET", format!("/git/commits/{}", hash), Value::Null),
            Self::Branch { action } => match action {
                BranchAction::List => ("GET", "/git/branches".to_string(), Value::Null),
                BranchAction::Create { name, from } => {
                    post("/git/branches", json!({ "name": name, "from": from }))
                }
                BranchAction::Delete { name, force } => (
                    "DELETE",
                    format!("/git/branches/{}?force={}", name, force),
                    Value::Null,
                ),
                BranchAction::Checkout { name } => post("/git/checkout", json!({ "branch": name })),
            },
        };
        Some(request)
    }
}

fn post(path: &str, body: Value) -> (&'static str, String, Value) {
    ("POST", path.to_string(), body)
}

fn setup_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        // Use info level for our crate, warn for dependencies
        EnvFilter::new("info")
            .add_directive("gix=warn".parse()?)
            .add_directive("tokio=warn".parse()?)
    };

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(file).with_target(false))
            .with(filter)
            .init();
    } else {
        // stdout carries the JSON envelopes of one-shot commands
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter)
            .init();
    }

    Ok(())
}

async fn serve(config: &Config, engine: Arc<GitEngine>) -> Result<()> {
    engine.ensure_ready().await?;

    let server = Server::bind(&config.server, engine).await?;
    info!("Starting {} v{} on {}", APP_NAME, VERSION, server.local_addr()?);

    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre error hooks
    color_eyre::install()?;

    let cli = Cli::parse();

    // Load configuration
    let loaded = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = loaded.unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config, using defaults: {}", e);
        Config::default()
    });

    setup_logging(cli.debug || config.debug, config.log_file.as_deref())?;

    let command = cli.command.unwrap_or(Commands::Serve);

    if let Commands::Config { init } = command {
        let path = match &cli.config {
            Some(path) => path.clone(),
            None => Config::config_file_path()?,
        };
        if init {
            Config::default().save_to(&path)?;
            println!("Configuration initialized at {:?}", path);
        } else {
            println!("Configuration:");
            println!("{}", toml::to_string_pretty(&config)?);
            println!("\nConfig file: {:?}", path);
        }
        return Ok(());
    }

    GitExecutor::new().check_installed().await?;
    let engine = Arc::new(GitEngine::new(config.repo_settings()?, config.history.clone()));

    let Some((method, target, body)) = command.request() else {
        return serve(&config, engine).await;
    };

    let response = dispatch(&engine, RouteAccess::Public, method, &target, body).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        std::process::exit(1);
    }

    Ok(())
}
