//! # Primitives
//!
//! Fixed limits and defaults of the tool contract and the stores.
//! These are compiled in and immutable at runtime.

/// Default number of hits returned by `search`.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Largest `limit` a caller may request from `search`.
pub const MAX_SEARCH_LIMIT: usize = 50;

/// Default hop count for `graph`.
pub const DEFAULT_GRAPH_DEPTH: usize = 2;

/// Largest hop count a caller may request from `graph`.
///
/// Stores do not enforce this; it is applied at the session boundary.
pub const MAX_GRAPH_DEPTH: usize = 5;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length (bytes) of an entity name.
pub const MAX_NAME_LENGTH: usize = 512;

/// Maximum length (bytes) of a predicate.
pub const MAX_PREDICATE_LENGTH: usize = 256;

/// Maximum length (bytes) of content, context, or source text.
pub const MAX_TEXT_LENGTH: usize = 65536;

// =============================================================================
// PERSISTED METADATA
// =============================================================================

/// Metadata key holding the locked embedding dimension.
pub const DIMENSION_KEY: &str = "embedding_dimension";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_lie_inside_their_ranges() {
        assert!((1..=MAX_SEARCH_LIMIT).contains(&DEFAULT_SEARCH_LIMIT));
        assert!((1..=MAX_GRAPH_DEPTH).contains(&DEFAULT_GRAPH_DEPTH));
    }
}
