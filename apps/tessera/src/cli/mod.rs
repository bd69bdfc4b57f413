//! # Tessera CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Write a config file and create the configured stores
//! - `status` - Show store counters
//! - `store` - Record one fact
//! - `search` - Semantic search over facts
//! - `graph` - Traverse from an entity
//! - `list` - List entities with fact counts
//! - `promote` - Move candidate facts into the global layer (dual mode)
//! - `server` - Start the HTTP server

mod commands;

use crate::config::Mode;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tessera_core::{ScopeTag, TesseraError};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Tessera - layered knowledge graph for coding agents
///
/// Facts are subject-predicate-object triples with embeddings, kept in a
/// project store and, in dual mode, a shared global store.
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Show extra detail (context, source, layer)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the TOML config file (default: $TESSERA_CONFIG or tessera.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the configured mode: "single" or "dual"
    #[arg(short, long, global = true, value_parser = parse_mode)]
    pub mode: Option<Mode>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

fn parse_mode(s: &str) -> Result<Mode, TesseraError> {
    s.parse()
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default config file and create the stores
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Show store counters
    Status,

    /// Record one fact
    Store {
        subject: String,
        predicate: String,
        object: String,

        /// Free text describing the fact (default: "<subject> <predicate> <object>")
        #[arg(long, default_value = "")]
        content: String,

        #[arg(long, default_value = "")]
        context: String,

        #[arg(long, default_value = "")]
        source: String,

        /// Explicit scope tag: global, project or none
        #[arg(long, value_parser = ScopeTag::parse)]
        scope: Option<ScopeTag>,
    },

    /// Semantic search over fact content
    Search {
        query: String,

        /// Maximum results (1-50)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Traverse the graph from an entity (fuzzy name match)
    Graph {
        entity: String,

        /// Traversal depth (1-5)
        #[arg(short, long)]
        depth: Option<usize>,
    },

    /// List entities with subject-fact counts
    List {
        /// Case-insensitive name filter
        pattern: Option<String>,
    },

    /// Promote candidate facts into the global layer
    Promote(PromoteArgs),

    /// Start HTTP server
    Server {
        /// Host to bind to (default: [server] host)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (default: [server] port)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

/// Non-interactive selection for `promote`. Without any flag the candidates
/// are listed and the operator is prompted.
#[derive(Args, Debug, Default)]
#[group(multiple = false)]
pub struct PromoteArgs {
    /// Promote every candidate
    #[arg(long)]
    pub all: bool,

    /// Promote nothing (list only)
    #[arg(long)]
    pub none: bool,

    /// Promote the given one-based candidate numbers, e.g. "1,3"
    #[arg(long)]
    pub select: Option<String>,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), TesseraError> {
    let out = Output {
        json: cli.json_mode,
        verbose: cli.verbose,
    };

    if let Some(Commands::Init { force }) = &cli.command {
        return cmd_init(cli.config.as_deref(), cli.mode, *force, out).await;
    }

    let config = load_config(cli.config.as_deref(), cli.mode)?;

    match cli.command {
        Some(Commands::Init { .. }) => Ok(()),
        Some(Commands::Status) | None => cmd_status(&config, out).await,
        Some(Commands::Store {
            subject,
            predicate,
            object,
            content,
            context,
            source,
            scope,
        }) => {
            let request = tessera_core::StoreRequest {
                subject,
                predicate,
                object,
                content,
                context,
                source,
                scope,
            };
            cmd_store(&config, request, out).await
        }
        Some(Commands::Search { query, limit }) => cmd_search(&config, &query, limit, out).await,
        Some(Commands::Graph { entity, depth }) => cmd_graph(&config, &entity, depth, out).await,
        Some(Commands::List { pattern }) => cmd_list(&config, pattern.as_deref(), out).await,
        Some(Commands::Promote(args)) => cmd_promote(&config, &args, out).await,
        Some(Commands::Server { host, port }) => cmd_server(&config, host, port).await,
    }
}
