//! # Tessera HTTP API Module
//!
//! REST surface over one `Session` (single store or both layers).
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Store counters
//! - `POST /store` - Record a fact
//! - `POST /search` - Semantic search
//! - `POST /graph` - Bounded traversal from a fuzzy entity name
//! - `GET /entities?pattern=` - Entity list with fact counts
//!
//! Promotion is operator-only and not reachable over HTTP.
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `TESSERA_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `TESSERA_RATE_LIMIT`: Requests per second (overrides `[server] rate_limit`, 0 to disable)

mod handlers;
mod middleware;
mod types;

pub use middleware::create_rate_limiter;
pub use types::{
    EntitiesQuery, EntitiesResponse, GraphRequest, GraphResponse, HealthResponse, SearchRequest,
    SearchResponse, StatusResponse, StoreResponse,
};

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tessera_core::{Session, TesseraError};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const BODY_LIMIT: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    /// `single` or `dual`, reported by `/status`.
    pub mode: Arc<str>,
}

impl AppState {
    #[must_use]
    pub fn new(session: Session, mode: &str) -> Self {
        Self {
            session: Arc::new(session),
            mode: Arc::from(mode),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// CORS from `TESSERA_CORS_ORIGINS`: `*`, a comma list, or localhost only.
fn build_cors_layer() -> CorsLayer {
    match std::env::var("TESSERA_CORS_ORIGINS").ok().as_deref() {
        Some("*") => {
            tracing::warn!("CORS: allowing ALL origins (TESSERA_CORS_ORIGINS=*)");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| match s.parse::<HeaderValue>() {
                    Ok(hv) => Some(hv),
                    Err(e) => {
                        tracing::warn!("CORS: invalid origin '{}': {}", s, e);
                        None
                    }
                })
                .collect();
            if allowed.is_empty() {
                tracing::warn!("CORS: no valid origins configured, defaulting to localhost only");
                build_localhost_cors()
            } else {
                tracing::info!(count = allowed.len(), "CORS: explicit origins");
                restrictive(allowed)
            }
        }
        None => build_localhost_cors(),
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins = [
        "http://localhost:3000",
        "http://localhost:8420",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8420",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();
    restrictive(origins)
}

fn restrictive(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Router with every endpoint and the middleware stack.
///
/// Outer to inner: tracing, CORS, body limit, rate limit.
pub fn create_router(state: AppState, rate_limit: u32) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/store", post(handlers::store_handler))
        .route("/search", post(handlers::search_handler))
        .route("/graph", post(handlers::graph_handler))
        .route("/entities", get(handlers::entities_handler));

    match create_rate_limiter(rate_limit) {
        Some(limiter) => {
            tracing::info!("rate limiting enabled: {} requests/second", rate_limit);
            router = router.layer(axum_middleware::from_fn_with_state(
                limiter,
                middleware::rate_limit_middleware,
            ));
        }
        None => tracing::info!("rate limiting disabled"),
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(BODY_LIMIT))
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve until ctrl-c, then close the stores.
pub async fn run_server(addr: &str, state: AppState, rate_limit: u32) -> Result<(), TesseraError> {
    let session = Arc::clone(&state.session);
    let router = create_router(state, rate_limit);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| TesseraError::Io(format!("bind {addr} failed: {e}")))?;

    tracing::info!("Tessera HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await
        .map_err(|e| TesseraError::Io(format!("server error: {e}")))?;

    session.close().await
}
