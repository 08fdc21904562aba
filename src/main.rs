//! # rowscout CLI
//!
//! ## Usage
//!
//! ```bash
//! rowscout --config ./config/rowscout.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rowscout index <file>` | Build (or reuse) and persist the index for a file |
//! | `rowscout header <file>` | Show the detected header row and column names |
//! | `rowscout fuzzy <file> "<query>"` | Lexical search only; no API calls |
//! | `rowscout search <file> "<query>"` | Fuzzy-first smart search |
//! | `rowscout ask <file> "<query>"` | RAG answer (flat or graph) |
//! | `rowscout quote <file> <email>` | Extract requested products from an email and match each |
//!
//! JSON results go to stdout, logs to stderr. `RUST_LOG` overrides the log
//! filter; `-v` raises the default from `info` to `debug`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rowscout::config::{self, Config};
use rowscout::search::FuzzyOptions;
use rowscout::{index_cmd, quote_cmd, search};
use rowscout_core::rag::RagMode;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "./config/rowscout.toml";

/// Best-matching row search over price lists and product catalogs.
#[derive(Parser)]
#[command(name = "rowscout", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and persist the index for a file.
    ///
    /// Reuses the stored index when the file is byte-identical to the one
    /// it was built from.
    Index {
        /// CSV or XLSX file.
        file: PathBuf,
        /// Retrieval strategy: flat or graph.
        #[arg(long, default_value = "flat")]
        mode: RagMode,
        /// Ignore any stored index and rebuild.
        #[arg(long)]
        force: bool,
    },

    /// Show the header row and the normalised column names.
    ///
    /// CSV files use their first line; XLSX files ask the completion
    /// provider once and cache the answer per file content.
    Header {
        file: PathBuf,
    },

    /// Token-sorted fuzzy search without any embedding or completion call.
    Fuzzy {
        file: PathBuf,
        query: String,
        /// Restrict matching to these columns (repeatable).
        #[arg(long = "column")]
        columns: Vec<String>,
        /// Maximum results (default: retrieval.fuzzy_limit).
        #[arg(long)]
        limit: Option<usize>,
        /// Minimum score 0-100 (default: retrieval.score_cutoff).
        #[arg(long)]
        cutoff: Option<f64>,
    },

    /// Fuzzy-first smart search.
    ///
    /// A unique exact text match returns at once; otherwise vector
    /// candidates are added and the completion provider picks the best row.
    Search {
        file: PathBuf,
        query: String,
        /// Restrict fuzzy matching to these columns (repeatable).
        #[arg(long = "column")]
        columns: Vec<String>,
    },

    /// Answer a query with the flat or graph retrieval strategy.
    Ask {
        file: PathBuf,
        query: String,
        #[arg(long, default_value = "flat")]
        mode: RagMode,
        /// Rows handed to the ranker (default: retrieval.top_k).
        #[arg(long)]
        top_k: Option<usize>,
        /// Also save `{"best_match": ...}` to this JSON file.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Extract the products requested in an enquiry email and match each.
    Quote {
        /// Catalog to match against (CSV or XLSX).
        file: PathBuf,
        /// Plain-text email body.
        email: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config; a missing file at the default location means defaults.
fn load(path: &Path) -> Result<Config> {
    if path == Path::new(DEFAULT_CONFIG) && !path.exists() {
        debug!("no config at {}; using defaults", DEFAULT_CONFIG);
        return Ok(Config::default());
    }
    config::load_config(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Index { file, mode, force } => {
            index_cmd::run_index(&cfg, &file, mode, force).await?;
        }
        Commands::Header { file } => {
            index_cmd::run_header(&cfg, &file).await?;
        }
        Commands::Fuzzy {
            file,
            query,
            columns,
            limit,
            cutoff,
        } => {
            let options = FuzzyOptions {
                columns,
                limit,
                cutoff,
            };
            search::run_fuzzy(&cfg, &file, &query, &options).await?;
        }
        Commands::Search {
            file,
            query,
            columns,
        } => {
            search::run_search(&cfg, &file, &query, &columns).await?;
        }
        Commands::Ask {
            file,
            query,
            mode,
            top_k,
            output,
        } => {
            search::run_ask(&cfg, &file, &query, mode, top_k, output.as_deref()).await?;
        }
        Commands::Quote { file, email } => {
            quote_cmd::run_quote(&cfg, &file, &email).await?;
        }
    }

    Ok(())
}
