//! # API Request/Response Types
//!
//! JSON bodies of the HTTP API. Every response that can fail carries
//! `success` and, on failure, `error`.

use serde::{Deserialize, Serialize};
use tessera_core::{EntitySummary, GraphResult, SearchHit, StoreStats, StoredFact};

// =============================================================================
// HEALTH / STATUS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub stats: Option<StoreStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn ok(mode: &str, stats: StoreStats) -> Self {
        Self {
            success: true,
            mode: Some(mode.to_string()),
            stats: Some(stats),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            mode: None,
            stats: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored: Option<StoredFact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoreResponse {
    pub fn success(stored: StoredFact) -> Self {
        Self {
            success: true,
            stored: Some(stored),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            stored: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// SEARCH
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    #[serde(default)]
    pub hits: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResponse {
    pub fn success(hits: Vec<SearchHit>) -> Self {
        Self {
            success: true,
            hits,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            hits: Vec::new(),
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// GRAPH
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRequest {
    pub entity: String,
    #[serde(default)]
    pub depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphResponse {
    pub success: bool,
    /// `false` when no entity name matched the query.
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GraphResponse {
    pub fn from_result(graph: Option<GraphResult>) -> Self {
        Self {
            success: true,
            found: graph.is_some(),
            graph,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            found: false,
            graph: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// ENTITIES
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitiesQuery {
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitiesResponse {
    pub success: bool,
    #[serde(default)]
    pub entities: Vec<EntitySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntitiesResponse {
    pub fn success(entities: Vec<EntitySummary>) -> Self {
        Self {
            success: true,
            entities,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            entities: Vec::new(),
            error: Some(msg.into()),
        }
    }
}
