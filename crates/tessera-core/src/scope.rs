//! # Scope Classifier
//!
//! Maps a predicate onto the layer its facts belong to.
//!
//! Global predicates describe stable technical or organisational truths.
//! Project predicates describe work in progress. Unknown predicates are
//! classified `Project`: a project fact only leaves its layer through an
//! explicit promotion, and there is no demotion path out of the global layer.

use crate::ScopeHint;

/// Predicates whose facts are candidates for the global layer.
pub const GLOBAL_PREDICATES: &[&str] = &[
    "uses",
    "depends_on",
    "written_in",
    "deployed_on",
    "built_with",
    "integrates_with",
    "prefers",
    "convention",
    "has_version",
    "runs_on",
];

/// Predicates whose facts stay in the project layer.
pub const PROJECT_PREDICATES: &[&str] = &[
    "blocked_by",
    "workaround_for",
    "todo",
    "bug_in",
    "fixed_by",
    "needs_refactor",
    "has_pattern",
    "test_for",
    "config_for",
];

/// Classify a predicate. Total and pure.
#[must_use]
pub fn classify(predicate: &str) -> ScopeHint {
    let normalized = predicate.trim().to_lowercase();
    let normalized = normalized.as_str();
    if GLOBAL_PREDICATES.contains(&normalized) {
        ScopeHint::Global
    } else if PROJECT_PREDICATES.contains(&normalized) {
        ScopeHint::Project
    } else {
        tracing::trace!(predicate = normalized, "unknown predicate, keeping it in the project layer");
        ScopeHint::Project
    }
}
