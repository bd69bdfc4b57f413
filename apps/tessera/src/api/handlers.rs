//! # API Endpoint Handlers

use super::{
    AppState,
    types::{
        EntitiesQuery, EntitiesResponse, GraphRequest, GraphResponse, HealthResponse,
        SearchRequest, SearchResponse, StatusResponse, StoreResponse,
    },
};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tessera_core::{StoreRequest, TesseraError};

/// HTTP status for a failed operation.
fn status_for(e: &TesseraError) -> StatusCode {
    match e {
        TesseraError::InvalidInput(_) | TesseraError::InvalidEmbedding { .. } => {
            StatusCode::BAD_REQUEST
        }
        TesseraError::Embedding(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// =============================================================================
// HEALTH / STATUS
// =============================================================================

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Store counters and the configured mode.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.stats().await {
        Ok(stats) => (StatusCode::OK, Json(StatusResponse::ok(&state.mode, stats))),
        Err(e) => {
            tracing::error!(error = %e, "status failed");
            (status_for(&e), Json(StatusResponse::error(e.to_string())))
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

pub async fn store_handler(
    State(state): State<AppState>,
    Json(request): Json<StoreRequest>,
) -> impl IntoResponse {
    match state.session.store_fact(request).await {
        Ok(stored) => (StatusCode::OK, Json(StoreResponse::success(stored))),
        Err(e) => (
            status_for(&e),
            Json(StoreResponse::error(format!("Store failed: {e}"))),
        ),
    }
}

// =============================================================================
// SEARCH
// =============================================================================

pub async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> impl IntoResponse {
    match state.session.search(&request.query, request.limit).await {
        Ok(hits) => (StatusCode::OK, Json(SearchResponse::success(hits))),
        Err(e) => (
            status_for(&e),
            Json(SearchResponse::error(format!("Search failed: {e}"))),
        ),
    }
}

// =============================================================================
// GRAPH
// =============================================================================

/// Traversal. An unmatched name is a successful response with `found: false`.
pub async fn graph_handler(
    State(state): State<AppState>,
    Json(request): Json<GraphRequest>,
) -> impl IntoResponse {
    match state.session.graph(&request.entity, request.depth).await {
        Ok(graph) => (StatusCode::OK, Json(GraphResponse::from_result(graph))),
        Err(e) => (
            status_for(&e),
            Json(GraphResponse::error(format!("Graph failed: {e}"))),
        ),
    }
}

// =============================================================================
// ENTITIES
// =============================================================================

pub async fn entities_handler(
    State(state): State<AppState>,
    Query(query): Query<EntitiesQuery>,
) -> impl IntoResponse {
    match state.session.list(query.pattern.as_deref()).await {
        Ok(entities) => (StatusCode::OK, Json(EntitiesResponse::success(entities))),
        Err(e) => (
            status_for(&e),
            Json(EntitiesResponse::error(format!("List failed: {e}"))),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use axum::body::Body;
    use axum::http::{Request, header};
    use std::sync::Arc;
    use tessera_core::{HashEmbedder, RedbStore, Session};
    use tower::ServiceExt;

    #[tokio::test]
    async fn store_failure_maps_to_json_error() {
        let temp = tempfile::tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("kg.redb"), 8).expect("open");
        let embedder = HashEmbedder::new(8).expect("embedder");
        let state = AppState::new(Session::new(Arc::new(store), Arc::new(embedder)), "single");

        let request = Request::post("/store")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"subject":"api","predicate":"","object":"db"}"#))
            .expect("request");
        let response = create_router(state, 0)
            .oneshot(request)
            .await
            .expect("infallible");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().expect("message").contains("predicate"));
    }

    #[test]
    fn caller_errors_are_bad_requests() {
        assert_eq!(
            status_for(&TesseraError::InvalidInput("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&TesseraError::Embedding("down".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&TesseraError::Storage("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
