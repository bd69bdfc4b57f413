//! # tessera-core
//!
//! The knowledge-graph storage core for Tessera - THE LOGIC.
//!
//! Facts are subject-predicate-object triples between named entities, each
//! carrying a vector embedding. The core answers three questions over them:
//! what is semantically close to this text, what is connected to this entity,
//! and which entities exist.
//!
//! ## Layers
//!
//! A store can be used alone or as one half of a `LayeredStore`:
//! - the **project** layer receives every write, tagged by the scope classifier
//! - the **global** layer is long-lived and only grows through `Promoter`
//!
//! Reads against a `LayeredStore` fan out to both layers and merge.
//!
//! ## Architectural Constraints
//!
//! - Everything is written against `FactStore`; backends are chosen by
//!   `BackendKind`, never hard-coded
//! - Entity and fact ids are local to the store that issued them
//! - The embedding dimension is locked when a store file is first created
//! - No network access: embedding providers plug in through `Embedder`

// =============================================================================
// MODULES
// =============================================================================

pub mod embedding;
pub mod layered;
pub mod primitives;
pub mod promotion;
pub mod scope;
pub mod session;
pub mod storage;
pub mod store;
pub mod types;
pub mod vector;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CandidateFact, Entity, EntityId, EntitySummary, FactId, GraphFact, GraphResult, Layer,
    NewFact, ScopeHint, ScopeTag, SearchHit, StoreStats, TesseraError,
};

// =============================================================================
// RE-EXPORTS: Stores and workflows
// =============================================================================

pub use embedding::{Embedder, HashEmbedder};
pub use layered::LayeredStore;
pub use promotion::{
    CandidateSelector, PromotionFailure, PromotionOutcome, PromotionReport, Promoter, Selection,
};
pub use scope::classify;
pub use session::{Session, StoreRequest, StoredFact};
pub use storage::{BackendKind, RedbStore, SqliteStore, StoreConfig, open_store};
pub use store::FactStore;
