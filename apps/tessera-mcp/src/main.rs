//! # Tessera MCP Server
//!
//! Bridge between an MCP client on stdio and a running `tessera server`.
//!
//! Environment:
//! - `TESSERA_URL`: Tessera server URL (default: `http://127.0.0.1:8420`)

mod client;
mod server;

use client::TesseraClient;
use rmcp::{ServiceExt, transport::stdio};
use server::TesseraMcp;

const DEFAULT_URL: &str = "http://127.0.0.1:8420";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the MCP transport.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let url = std::env::var("TESSERA_URL").unwrap_or_else(|_| DEFAULT_URL.into());
    tracing::info!("Tessera MCP server starting, target: {}", url);

    let mcp = TesseraMcp::new(TesseraClient::new(url));

    let service = mcp.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("MCP serve error: {:?}", e);
    })?;

    service.waiting().await?;
    Ok(())
}
