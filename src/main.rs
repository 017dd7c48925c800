//! # authrag CLI
//!
//! ## Usage
//!
//! ```bash
//! authrag --config ./config/authrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `authrag init` | Create the database, run migrations, create or load the index |
//! | `authrag serve` | Start the HTTP API server |
//! | `authrag ingest <path>...` | Ingest files or directories and register them |
//! | `authrag user add <name>` | Create a user |
//! | `authrag files` | List files and their access levels |
//! | `authrag chunks "<text>"` | Show the chunks most relevant to a text |
//!
//! ## Examples
//!
//! ```bash
//! authrag init
//! authrag user add ada --password secret --access-level 1
//! authrag ingest ./handbook --access-level 2
//! authrag chunks "vacation policy" --limit 3
//! RUST_LOG=authrag=debug authrag serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use authrag::{commands, config, server};

/// authrag: retrieval-augmented generation with per-user access levels.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/authrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "authrag",
    about = "Retrieval-augmented generation backend with per-user access levels",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/authrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and the vector index.
    ///
    /// Idempotent: an existing database and index are left as they are.
    Init,

    /// Start the HTTP API server on `[server].bind`.
    Serve,

    /// Ingest files or directories (recursively).
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Access level for the ingested files. Defaults to
        /// `[ingest].default_access_level` for new files.
        #[arg(long)]
        access_level: Option<i64>,
    },

    /// Manage users.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// List ingested files with their access levels.
    Files,

    /// Print the chunks most relevant to a text.
    Chunks {
        text: String,

        /// Maximum number of chunks. Defaults to `[retrieval].chunks_limit`.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user.
    Add {
        username: String,

        #[arg(long)]
        password: String,

        #[arg(long, default_value_t = 1)]
        access_level: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("authrag=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
        Commands::Ingest {
            paths,
            access_level,
        } => {
            commands::run_ingest(&cfg, &paths, access_level).await?;
        }
        Commands::User { action } => match action {
            UserAction::Add {
                username,
                password,
                access_level,
            } => {
                commands::run_user_add(&cfg, &username, &password, access_level).await?;
            }
        },
        Commands::Files => {
            commands::run_files(&cfg).await?;
        }
        Commands::Chunks { text, limit } => {
            commands::run_chunks(&cfg, &text, limit).await?;
        }
    }

    Ok(())
}
