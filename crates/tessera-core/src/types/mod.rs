//! # Core Type Definitions
//!
//! This module contains the data model shared by every store:
//! - Store-local handles (`EntityId`, `FactId`)
//! - Records (`Entity`, `NewFact`, `CandidateFact`)
//! - Scope markers (`ScopeTag`, `ScopeHint`, `Layer`)
//! - Query results (`SearchHit`, `GraphResult`, `EntitySummary`, `StoreStats`)
//! - Error types (`TesseraError`)
//!
//! ## Handle Semantics
//!
//! `EntityId` and `FactId` are arena-style indices into the store that issued
//! them. An id `7` in the project layer and an id `7` in the global layer are
//! unrelated and must never be compared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

// =============================================================================
// HANDLES
// =============================================================================

/// Store-local handle of an entity. Stable for the lifetime of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Store-local handle of a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fact#{}", self.0)
    }
}

// =============================================================================
// SCOPE
// =============================================================================

/// Candidate marker stored on a fact.
///
/// Only the project layer ever stores `Global` or `Project`; facts written to
/// the global layer always carry `None`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ScopeTag {
    /// Eligible for promotion to the global layer.
    Global,
    /// Stays in the project layer.
    Project,
    /// No candidacy (global-layer facts, promoted originals, untagged writes).
    #[default]
    None,
}

impl ScopeTag {
    /// Stable lowercase name used in persisted rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project => "project",
            Self::None => "none",
        }
    }

    /// Parse a persisted tag. Unknown text is a storage corruption error.
    pub fn parse(s: &str) -> Result<Self, TesseraError> {
        match s {
            "global" => Ok(Self::Global),
            "project" => Ok(Self::Project),
            "none" => Ok(Self::None),
            other => Err(TesseraError::Serialization(format!(
                "unknown scope tag '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ScopeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the scope classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeHint {
    Global,
    Project,
}

impl From<ScopeHint> for ScopeTag {
    fn from(hint: ScopeHint) -> Self {
        match hint {
            ScopeHint::Global => Self::Global,
            ScopeHint::Project => Self::Project,
        }
    }
}

/// Which physical layer a merged result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Project,
    Global,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project => f.write_str("project"),
            Self::Global => f.write_str("global"),
        }
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// A named node of the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Unique, case-sensitive name.
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Latest embedding written by `find_or_create_entity`.
    pub embedding: Vec<f32>,
}

/// A fact to append. Both entity handles must come from the target store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFact {
    pub subject: EntityId,
    pub predicate: String,
    pub object: EntityId,
    pub content: String,
    pub context: String,
    pub source: String,
    pub embedding: Vec<f32>,
    /// Explicit scope tag. `None` lets the layer decide.
    pub scope: Option<ScopeTag>,
}

/// A project fact tagged `global`, as offered to the promotion selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFact {
    pub id: FactId,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub content: String,
    pub context: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// QUERY RESULTS
// =============================================================================

/// One scored fact from a vector search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub content: String,
    pub context: String,
    pub source: String,
    /// `1 - cosine_distance`; higher is more similar.
    pub score: f32,
    /// Origin layer, set only by the layered store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<Layer>,
}

impl SearchHit {
    /// Identity used for cross-layer deduplication.
    #[must_use]
    pub fn triple(&self) -> (&str, &str, &str) {
        (&self.subject, &self.predicate, &self.object)
    }
}

/// A fact reached by graph traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphFact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub content: String,
}

impl GraphFact {
    #[must_use]
    pub fn triple(&self) -> (&str, &str, &str) {
        (&self.subject, &self.predicate, &self.object)
    }
}

/// Result of a bounded traversal that resolved to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphResult {
    /// Name of the entity the fuzzy query resolved to.
    pub matched: String,
    /// Reachable entity names, excluding `matched`.
    pub connected: BTreeSet<String>,
    /// Facts whose subject or object is `matched` or in `connected`.
    pub facts: Vec<GraphFact>,
}

/// Row of `list_entities`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntitySummary {
    pub name: String,
    /// Facts where this entity is the subject. Object references are not counted.
    pub fact_count: u64,
}

/// Size counters of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub entity_count: u64,
    pub fact_count: u64,
    pub candidate_count: u64,
    pub dimension: usize,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in Tessera.
///
/// - No silent failures
/// - Every fallible operation returns `Result<T, TesseraError>`
/// - Engine errors keep their original message
#[derive(Debug, Error)]
pub enum TesseraError {
    /// The persisted embedding dimension differs from the configured one.
    #[error(
        "embedding dimension mismatch: store was created with dimension {stored} but dimension {configured} is configured; set the embedding dimension to {stored} or point at a fresh store"
    )]
    DimensionMismatch { stored: usize, configured: usize },

    /// A backend name in the configuration is not recognised.
    #[error("unknown storage backend '{0}' (expected 'sqlite' or 'redb')")]
    UnknownBackend(String),

    /// Any other invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An embedding does not have the store's locked length.
    #[error("invalid embedding: expected {expected} dimensions, got {actual}")]
    InvalidEmbedding { expected: usize, actual: usize },

    /// A fact referenced an entity handle that does not exist in the store.
    #[error("referential integrity violation: {0} does not exist in this store")]
    ReferentialIntegrity(EntityId),

    /// A fact handle does not exist in the store.
    #[error("fact not found: {0}")]
    FactNotFound(FactId),

    /// Caller input rejected before reaching a store.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The physical store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A persisted record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The embedding provider failed.
    #[error("embedding provider error: {0}")]
    Embedding(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// Several independent operations failed (e.g. closing both layers).
    #[error("{}", join_errors(.0))]
    Multiple(Vec<TesseraError>),
}

fn join_errors(errors: &[TesseraError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<sqlx::Error> for TesseraError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<postcard::Error> for TesseraError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for TesseraError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

impl From<std::io::Error> for TesseraError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
