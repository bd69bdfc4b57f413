//! # tessera
//!
//! The Tessera binary's library half: configuration, the HTTP embedding
//! provider, the axum API and the CLI commands. `main.rs` only sets up
//! logging and dispatches to `cli::execute`.

pub mod api;
pub mod cli;
pub mod config;
pub mod embedder;
