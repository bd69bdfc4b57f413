//! # Fact Store
//!
//! The capability set every layer implements.
//!
//! Both physical backends (`SqliteStore`, `RedbStore`) and the layered
//! coordinator (`LayeredStore`) implement `FactStore`, so callers never need
//! to know which engine, or which layer, answers a query.

use crate::{
    CandidateFact, Entity, EntityId, EntitySummary, FactId, GraphResult, NewFact, SearchHit,
    StoreStats, TesseraError,
};
use async_trait::async_trait;

// =============================================================================
// FACTSTORE TRAIT
// =============================================================================

/// One logical layer of entities and facts.
///
/// Every method that reaches a physical store is an await point. None of
/// them retry.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Return the id of the entity called `name`, creating it if absent.
    ///
    /// The entity's embedding is always replaced with `embedding`.
    async fn find_or_create_entity(
        &self,
        name: &str,
        embedding: &[f32],
    ) -> Result<EntityId, TesseraError>;

    /// Append a fact. Fails with `ReferentialIntegrity` if either entity
    /// handle is unknown to this store.
    async fn store_fact(&self, fact: NewFact) -> Result<FactId, TesseraError>;

    /// The `limit` facts most similar to `query`, most similar first.
    async fn search_facts(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, TesseraError>;

    /// Resolve `entity_query` fuzzily and expand `depth` hops in both
    /// directions. `None` when no entity name contains the query.
    async fn graph_traverse(
        &self,
        entity_query: &str,
        depth: usize,
    ) -> Result<Option<GraphResult>, TesseraError>;

    /// Entities ordered by name, with subject-side fact counts.
    async fn list_entities(
        &self,
        pattern: Option<&str>,
    ) -> Result<Vec<EntitySummary>, TesseraError>;

    /// Whether a fact with exactly this triple exists. Names are matched
    /// exactly, not fuzzily.
    async fn has_fact(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<bool, TesseraError>;

    /// Exact-name lookup, including the current embedding.
    async fn get_entity(&self, name: &str) -> Result<Option<Entity>, TesseraError>;

    /// Facts tagged as global candidates.
    ///
    /// `Ok(None)` means the backend cannot supply candidates at all.
    async fn candidate_facts(&self) -> Result<Option<Vec<CandidateFact>>, TesseraError> {
        Ok(None)
    }

    /// Set the scope tag of `fact` to `None` so it is no longer offered.
    async fn clear_scope_tag(&self, fact: FactId) -> Result<(), TesseraError>;

    /// Size counters.
    async fn stats(&self) -> Result<StoreStats, TesseraError>;

    /// Release the physical handle.
    async fn close(&self) -> Result<(), TesseraError>;
}

// =============================================================================
// SHARED MATCHING RULES
// =============================================================================

/// Case-insensitive substring containment used by `list_entities` filters
/// and fuzzy entity resolution.
#[must_use]
pub fn name_matches(name: &str, pattern: &str) -> bool {
    name.to_lowercase().contains(&pattern.to_lowercase())
}

/// Pick the entity a fuzzy query refers to.
///
/// Among names containing `query` (case-insensitively) the shortest wins,
/// so a canonical short name beats longer compound names. Equal lengths
/// keep the first candidate in iteration order.
pub fn resolve_fuzzy<'a, I>(candidates: I, query: &str) -> Option<(EntityId, &'a str)>
where
    I: IntoIterator<Item = (EntityId, &'a str)>,
{
    let needle = query.to_lowercase();
    candidates
        .into_iter()
        .filter(|(_, name)| name.to_lowercase().contains(&needle))
        .min_by_key(|(_, name)| name.chars().count())
}
