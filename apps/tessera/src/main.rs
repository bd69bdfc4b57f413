//! # Tessera - Layered Knowledge Graph Server
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                 apps/tessera (THE BINARY)                 │
//! │                                                           │
//! │   ┌──────────┐    ┌──────────┐    ┌──────────────────┐    │
//! │   │   CLI    │    │ HTTP API │    │  HTTP embedder   │    │
//! │   │  (clap)  │    │  (axum)  │    │    (reqwest)     │    │
//! │   └────┬─────┘    └────┬─────┘    └────────┬─────────┘    │
//! │        └───────────────┼───────────────────┘              │
//! │                        ▼                                  │
//! │               ┌─────────────────┐                         │
//! │               │  tessera-core   │                         │
//! │               │  (THE LOGIC)    │                         │
//! │               └─────────────────┘                         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! tessera init --mode dual
//! tessera store api uses postgres --context "backend service"
//! tessera search "which database"
//! tessera graph api --depth 3
//! tessera promote --select 1,3
//! tessera server --port 8420
//! ```

use clap::Parser;
use tessera::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // TESSERA_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("TESSERA_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tessera=info,tessera_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!(
        r#"
  ████████╗███████╗███████╗███████╗███████╗██████╗  █████╗
  ╚══██╔══╝██╔════╝██╔════╝██╔════╝██╔════╝██╔══██╗██╔══██╗
     ██║   █████╗  ███████╗███████╗█████╗  ██████╔╝███████║
     ██║   ██╔══╝  ╚════██║╚════██║██╔══╝  ██╔══██╗██╔══██║
     ██║   ███████╗███████║███████║███████╗██║  ██║██║  ██║
     ╚═╝   ╚══════╝╚══════╝╚══════╝╚══════╝╚═╝  ╚═╝╚═╝  ╚═╝

  Layered knowledge graph v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
