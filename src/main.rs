//! # Channel Recall CLI (`recall`)
//!
//! The `recall` binary drives the retrieval engine from the command line:
//! database setup, document registration and ingestion, message import,
//! message search, and retrieval-augmented questions.
//!
//! ## Usage
//!
//! ```bash
//! recall --config ./config/recall.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recall init` | Create the SQLite database and run schema migrations |
//! | `recall register <file>` | Record a local file as an uploaded document |
//! | `recall ingest <id>` | Extract, chunk, embed and index a document |
//! | `recall import-messages <file>` | Load chat messages from JSON Lines |
//! | `recall search "<query>"` | Substring search with surrounding messages |
//! | `recall recent` | Messages from the last few hours |
//! | `recall ask "<question>"` | Retrieve grounding context, optionally answer |
//! | `recall stats` | Row counts and per-channel breakdown |
//!
//! Logs go to stderr; set `RUST_LOG` (default `info`) to adjust.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use channel_recall::{blobs, config, import, ingest, migrate, rag, search, stats};

/// Channel Recall CLI: message-history retrieval for chat platforms.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "recall",
    about = "Channel Recall: message-history retrieval for chat platforms",
    version,
    long_about = "Channel Recall answers substring searches over chat history with the \
    surrounding conversation, and retrieves embedding-ranked document chunks that ground \
    AI-composed answers."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/recall.toml`.
    #[arg(long, global = true, default_value = "./config/recall.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (channels, messages, documents, chunks). Idempotent.
    Init,

    /// Record a local file as an uploaded document and print its id.
    ///
    /// The file is copied into the configured blob directory.
    Register {
        /// Path to the file.
        file: PathBuf,

        /// Declared content type (`text/plain`, `text/markdown`,
        /// `application/pdf`). Inferred from the extension when omitted.
        #[arg(long)]
        content_type: Option<String>,

        /// Channel the document was uploaded into.
        #[arg(long)]
        channel: Option<String>,
    },

    /// Extract, chunk, embed and index a registered document.
    ///
    /// Ingestion stops at the first failing chunk; rerunning resumes it.
    Ingest {
        /// Document id printed by `register`.
        document_id: String,

        /// Index chunks under this channel instead of the document's own.
        #[arg(long)]
        channel: Option<String>,
    },

    /// Import chat messages from a JSON Lines file.
    ImportMessages {
        /// Path to the `.jsonl` file.
        file: PathBuf,
    },

    /// Search message text, newest first, with neighboring messages.
    Search {
        /// Substring to search for (case-insensitive).
        query: String,

        /// Only search this channel.
        #[arg(long)]
        channel: Option<String>,
    },

    /// List recent messages.
    Recent {
        /// Only list this channel.
        #[arg(long)]
        channel: Option<String>,

        /// Window size in hours.
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },

    /// Retrieve document context for a question.
    ///
    /// Prints the nearest chunks. With `--answer`, also runs the configured
    /// generation provider over them.
    Ask {
        /// The question.
        query: String,

        /// Only retrieve chunks indexed under this channel.
        #[arg(long)]
        channel: Option<String>,

        /// Number of chunks to retrieve (clamped to 1..=100).
        #[arg(long)]
        top_k: Option<usize>,

        /// Generate an answer from the retrieved context.
        #[arg(long, conflicts_with = "prompt")]
        answer: bool,

        /// Print the grounding prompt instead of the chunk list.
        #[arg(long)]
        prompt: bool,
    },

    /// Show database statistics.
    Stats,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Register {
            file,
            content_type,
            channel,
        } => {
            blobs::run_register(&cfg, &file, content_type.as_deref(), channel.as_deref()).await?;
        }
        Commands::Ingest {
            document_id,
            channel,
        } => {
            ingest::run_ingest(&cfg, &document_id, channel.as_deref()).await?;
        }
        Commands::ImportMessages { file } => {
            import::run_import_messages(&cfg, &file).await?;
        }
        Commands::Search { query, channel } => {
            search::run_search(&cfg, &query, channel.as_deref()).await?;
        }
        Commands::Recent { channel, hours } => {
            search::run_recent(&cfg, channel.as_deref(), hours).await?;
        }
        Commands::Ask {
            query,
            channel,
            top_k,
            answer,
            prompt,
        } => {
            if prompt {
                rag::run_prompt(&cfg, &query, channel.as_deref(), top_k).await?;
            } else {
                rag::run_ask(&cfg, &query, channel.as_deref(), top_k, answer).await?;
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
