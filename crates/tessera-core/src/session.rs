//! # Session Module
//!
//! The text-level tool contract on top of one `FactStore`.
//!
//! A session pairs a store (single or layered, it cannot tell) with the
//! embedder used for every write and query. It validates caller input, clamps
//! `limit` and `depth` into their allowed ranges, and turns names and content
//! into vectors before anything reaches the store.

use crate::embedding::Embedder;
use crate::primitives::{
    DEFAULT_GRAPH_DEPTH, DEFAULT_SEARCH_LIMIT, MAX_GRAPH_DEPTH, MAX_NAME_LENGTH,
    MAX_PREDICATE_LENGTH, MAX_SEARCH_LIMIT, MAX_TEXT_LENGTH,
};
use crate::store::FactStore;
use crate::{EntitySummary, GraphResult, NewFact, ScopeTag, SearchHit, StoreStats, TesseraError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Input of the `store` operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub source: String,
    /// Explicit scope tag; absent lets the store classify the predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeTag>,
}

/// Confirmation of a stored fact: the triple as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

/// Store plus embedder.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn FactStore>,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dimension", &self.embedder.dimension())
            .finish_non_exhaustive()
    }
}

impl Session {
    #[must_use]
    pub fn new(store: Arc<dyn FactStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn FactStore> {
        &self.store
    }

    /// Record one fact, creating both entities if needed.
    pub async fn store_fact(&self, request: StoreRequest) -> Result<StoredFact, TesseraError> {
        let subject = required("subject", &request.subject, MAX_NAME_LENGTH)?;
        let predicate = required("predicate", &request.predicate, MAX_PREDICATE_LENGTH)?;
        let object = required("object", &request.object, MAX_NAME_LENGTH)?;
        for (field, value) in [
            ("content", &request.content),
            ("context", &request.context),
            ("source", &request.source),
        ] {
            bounded(field, value, MAX_TEXT_LENGTH)?;
        }

        let content = if request.content.trim().is_empty() {
            format!("{subject} {predicate} {object}")
        } else {
            request.content.clone()
        };

        let (subject_vec, object_vec, content_vec) = tokio::try_join!(
            self.embed(subject),
            self.embed(object),
            self.embed(&content),
        )?;

        let subject_id = self.store.find_or_create_entity(subject, &subject_vec).await?;
        let object_id = self.store.find_or_create_entity(object, &object_vec).await?;
        self.store
            .store_fact(NewFact {
                subject: subject_id,
                predicate: predicate.to_string(),
                object: object_id,
                content,
                context: request.context,
                source: request.source,
                embedding: content_vec,
                scope: request.scope,
            })
            .await?;

        Ok(StoredFact {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
        })
    }

    /// Semantic search. `limit` defaults to 5 and is clamped to 1..=50.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>, TesseraError> {
        let query = required("query", query, MAX_TEXT_LENGTH)?;
        let limit = clamp_limit(limit);
        let vector = self.embed(query).await?;
        self.store.search_facts(&vector, limit).await
    }

    /// Bounded traversal. `depth` defaults to 2 and is clamped to 1..=5.
    pub async fn graph(
        &self,
        entity: &str,
        depth: Option<usize>,
    ) -> Result<Option<GraphResult>, TesseraError> {
        let entity = required("entity", entity, MAX_NAME_LENGTH)?;
        self.store.graph_traverse(entity, clamp_depth(depth)).await
    }

    /// Entities with subject-fact counts, optionally filtered.
    pub async fn list(&self, pattern: Option<&str>) -> Result<Vec<EntitySummary>, TesseraError> {
        let pattern = pattern.map(str::trim).filter(|p| !p.is_empty());
        if let Some(p) = pattern {
            bounded("pattern", p, MAX_NAME_LENGTH)?;
        }
        self.store.list_entities(pattern).await
    }

    pub async fn stats(&self) -> Result<StoreStats, TesseraError> {
        self.store.stats().await
    }

    pub async fn close(&self) -> Result<(), TesseraError> {
        self.store.close().await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, TesseraError> {
        let vector = self.embedder.embed(text).await?;
        crate::vector::check_dimension(&vector, self.embedder.dimension())
            .map_err(|e| TesseraError::Embedding(format!("provider returned a bad vector: {e}")))?;
        Ok(vector)
    }
}

// =============================================================================
// INPUT RULES
// =============================================================================

#[must_use]
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT)
}

#[must_use]
pub fn clamp_depth(depth: Option<usize>) -> usize {
    depth.unwrap_or(DEFAULT_GRAPH_DEPTH).clamp(1, MAX_GRAPH_DEPTH)
}

fn required<'a>(field: &str, value: &'a str, max: usize) -> Result<&'a str, TesseraError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TesseraError::InvalidInput(format!("{field} must not be empty")));
    }
    bounded(field, trimmed, max)?;
    Ok(trimmed)
}

fn bounded(field: &str, value: &str, max: usize) -> Result<(), TesseraError> {
    if value.len() > max {
        return Err(TesseraError::InvalidInput(format!(
            "{field} exceeds {max} bytes ({} given)",
            value.len()
        )));
    }
    Ok(())
}
