//! # mmrag CLI
//!
//! ## Usage
//!
//! ```bash
//! mmrag --config ./config/mmrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mmrag search "<query>"` | Answer a query and show re-ranked articles and images |
//! | `mmrag evaluate --queries '<json>'` | Precision/Recall/F1@k over a batch of queries |
//! | `mmrag ingest <articles.jsonl>` | Embed and upsert articles and their media |
//!
//! Logs go to stderr and are controlled with `RUST_LOG` (default `warn`).

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mmrag::config;
use mmrag::evaluate::{self, EvaluateArgs};
use mmrag::ingest;
use mmrag::search;

const DEFAULT_CONFIG: &str = "./config/mmrag.toml";

/// Multimodal retrieval-augmented search with model re-ranking.
#[derive(Parser)]
#[command(name = "mmrag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/mmrag.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a query from retrieved articles and images.
    Search {
        query: String,

        /// Candidates retrieved per modality.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Evaluate retrieval quality over a batch of queries.
    ///
    /// The generative model judges each retrieved candidate as relevant (1)
    /// or not (0); metrics are macro-averaged per modality.
    Evaluate {
        /// JSON list of query strings, e.g. '["q1", "q2"]'.
        #[arg(long)]
        queries: String,

        /// Rank cutoff for Precision/Recall/F1.
        #[arg(long)]
        k: Option<usize>,

        /// Candidates retrieved per modality.
        #[arg(long)]
        top_k: Option<usize>,

        /// Queries evaluated in parallel.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ingest articles (JSON Lines) and their media into the index.
    Ingest {
        input: PathBuf,

        /// Points per upsert request.
        #[arg(long, default_value_t = 100)]
        batch_size: usize,

        /// First point id to assign.
        #[arg(long, default_value_t = 0)]
        start_id: u64,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> anyhow::Result<config::Config> {
    if path == Path::new(DEFAULT_CONFIG) && !path.exists() {
        tracing::debug!("no config at {}, using defaults", DEFAULT_CONFIG);
        return Ok(config::Config::minimal());
    }
    config::load_config(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Search { query, top_k } => {
            search::run_search(&cfg, &query, top_k).await?;
        }
        Commands::Evaluate {
            queries,
            k,
            top_k,
            concurrency,
            json,
        } => {
            let args = EvaluateArgs {
                k,
                top_k,
                concurrency,
                json,
            };
            evaluate::run_evaluate(&cfg, &queries, args).await?;
        }
        Commands::Ingest {
            input,
            batch_size,
            start_id,
        } => {
            ingest::run_ingest(&cfg, &input, batch_size, start_id).await?;
        }
    }

    Ok(())
}
