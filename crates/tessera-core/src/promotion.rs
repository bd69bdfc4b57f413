//! # Promotion
//!
//! Operator-driven batch move of project facts tagged `global` into the
//! global layer.
//!
//! Promotion copies: the global layer receives a new fact (re-embedded with
//! the global layer's embedder) and the project original keeps existing with
//! its tag cleared. A failing item is logged and reported; it never stops the
//! rest of the batch.

use crate::embedding::Embedder;
use crate::store::FactStore;
use crate::{CandidateFact, FactId, NewFact, ScopeTag, TesseraError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// SELECTION
// =============================================================================

/// Which offered candidates the operator picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    None,
    /// Zero-based positions into the offered list.
    Indices(Vec<usize>),
}

impl Selection {
    /// Parse operator input.
    ///
    /// `all`/`a` and `none`/`n`/empty are keywords; anything else is a list of
    /// one-based positions separated by commas or whitespace.
    pub fn parse(input: &str) -> Result<Self, TesseraError> {
        let trimmed = input.trim().to_lowercase();
        match trimmed.as_str() {
            "all" | "a" => return Ok(Self::All),
            "none" | "n" | "" => return Ok(Self::None),
            _ => {}
        }

        let mut indices = Vec::new();
        for token in trimmed
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            let n: usize = token.parse().map_err(|_| {
                TesseraError::InvalidInput(format!("'{token}' is not a candidate number"))
            })?;
            if n == 0 {
                return Err(TesseraError::InvalidInput(
                    "candidate numbers start at 1".to_string(),
                ));
            }
            indices.push(n - 1);
        }
        Ok(Self::Indices(indices))
    }
}

/// Strategy that decides which candidates to promote.
pub trait CandidateSelector {
    fn select(&mut self, candidates: &[CandidateFact]) -> Selection;
}

impl<F> CandidateSelector for F
where
    F: FnMut(&[CandidateFact]) -> Selection,
{
    fn select(&mut self, candidates: &[CandidateFact]) -> Selection {
        self(candidates)
    }
}

// =============================================================================
// REPORT
// =============================================================================

/// One candidate that could not be promoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionFailure {
    pub fact: FactId,
    pub triple: (String, String, String),
    pub error: String,
}

/// Totals of a completed promotion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionReport {
    /// Candidates shown to the selector.
    pub offered: usize,
    /// Candidates the selector picked.
    pub selected: usize,
    /// Candidates written to the global layer.
    pub promoted: usize,
    pub failures: Vec<PromotionFailure>,
    /// Promoted facts whose project tag could not be cleared. They are
    /// offered again; promoting them again does not copy them twice.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_errors: Vec<FactId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// The project backend cannot list candidates.
    Unavailable,
    Completed(PromotionReport),
}

// =============================================================================
// PROMOTER
// =============================================================================

/// Moves selected candidates from a project store into a global store.
pub struct Promoter {
    project: Arc<dyn FactStore>,
    global: Arc<dyn FactStore>,
    global_embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for Promoter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promoter")
            .field("global_dimension", &self.global_embedder.dimension())
            .finish_non_exhaustive()
    }
}

impl Promoter {
    #[must_use]
    pub fn new(
        project: Arc<dyn FactStore>,
        global: Arc<dyn FactStore>,
        global_embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            project,
            global,
            global_embedder,
        }
    }

    /// Candidates currently waiting in the project layer.
    pub async fn candidates(&self) -> Result<Option<Vec<CandidateFact>>, TesseraError> {
        self.project.candidate_facts().await
    }

    /// Offer every candidate to `selector` and promote its pick.
    ///
    /// Only failing to read candidates is an error; per-item failures end up
    /// in the report.
    pub async fn run<S>(&self, selector: &mut S) -> Result<PromotionOutcome, TesseraError>
    where
        S: CandidateSelector + ?Sized,
    {
        let Some(candidates) = self.candidates().await? else {
            tracing::warn!("project backend cannot list promotion candidates");
            return Ok(PromotionOutcome::Unavailable);
        };

        if candidates.is_empty() {
            tracing::info!("no promotion candidates");
            return Ok(PromotionOutcome::Completed(PromotionReport::default()));
        }
        let selection = selector.select(&candidates);
        Ok(PromotionOutcome::Completed(
            self.promote(&candidates, selection).await,
        ))
    }

    /// Promote the part of `candidates` picked by `selection`.
    ///
    /// For callers that obtain the selection themselves, e.g. from a
    /// blocking prompt, between `candidates` and this call.
    pub async fn promote(
        &self,
        candidates: &[CandidateFact],
        selection: Selection,
    ) -> PromotionReport {
        let mut report = PromotionReport {
            offered: candidates.len(),
            ..PromotionReport::default()
        };

        let picked: Vec<&CandidateFact> = match selection {
            Selection::All => candidates.iter().collect(),
            Selection::None => Vec::new(),
            Selection::Indices(indices) => {
                let unique: BTreeSet<usize> = indices.into_iter().collect();
                unique
                    .into_iter()
                    .filter_map(|i| {
                        let hit = candidates.get(i);
                        if hit.is_none() {
                            tracing::warn!(index = i + 1, "ignoring out-of-range candidate number");
                        }
                        hit
                    })
                    .collect()
            }
        };
        report.selected = picked.len();

        for candidate in picked {
            match self.promote_one(candidate).await {
                Ok(promoted) => {
                    report.promoted += 1;
                    if !promoted.tag_cleared {
                        report.tag_errors.push(candidate.id);
                    }
                    tracing::debug!(
                        project_fact = candidate.id.0,
                        global_fact = ?promoted.global_fact.map(|id| id.0),
                        "promoted fact"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        fact = candidate.id.0,
                        subject = %candidate.subject,
                        predicate = %candidate.predicate,
                        object = %candidate.object,
                        error = %e,
                        "promotion failed"
                    );
                    report.failures.push(PromotionFailure {
                        fact: candidate.id,
                        triple: (
                            candidate.subject.clone(),
                            candidate.predicate.clone(),
                            candidate.object.clone(),
                        ),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            offered = report.offered,
            selected = report.selected,
            promoted = report.promoted,
            failed = report.failures.len(),
            "promotion finished"
        );
        report
    }

    async fn promote_one(&self, candidate: &CandidateFact) -> Result<Promoted, TesseraError> {
        let already_global = self
            .global
            .has_fact(&candidate.subject, &candidate.predicate, &candidate.object)
            .await?;
        let global_fact = if already_global {
            tracing::debug!(
                fact = candidate.id.0,
                "triple already in global layer, only clearing the tag"
            );
            None
        } else {
            Some(self.copy_to_global(candidate).await?)
        };

        // The global copy exists from here on: a failure to clear the tag is
        // not a failed promotion, and the next run skips the copy.
        let tag_cleared = match self.project.clear_scope_tag(candidate.id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    fact = candidate.id.0,
                    error = %e,
                    "promoted but could not clear the project tag"
                );
                false
            }
        };
        Ok(Promoted {
            global_fact,
            tag_cleared,
        })
    }

    async fn copy_to_global(&self, candidate: &CandidateFact) -> Result<FactId, TesseraError> {
        let (subject_vec, object_vec, content_vec) = tokio::try_join!(
            self.global_embedder.embed(&candidate.subject),
            self.global_embedder.embed(&candidate.object),
            self.global_embedder.embed(&candidate.content),
        )?;

        let subject = self
            .global
            .find_or_create_entity(&candidate.subject, &subject_vec)
            .await?;
        let object = self
            .global
            .find_or_create_entity(&candidate.object, &object_vec)
            .await?;

        self.global
            .store_fact(NewFact {
                subject,
                predicate: candidate.predicate.clone(),
                object,
                content: candidate.content.clone(),
                context: candidate.context.clone(),
                source: candidate.source.clone(),
                embedding: content_vec,
                scope: Some(ScopeTag::None),
            })
            .await
    }
}

struct Promoted {
    /// `None` when the global layer already held the triple.
    global_fact: Option<FactId>,
    tag_cleared: bool,
}
