//! # Layered Store
//!
//! Composes a project store and a global store into one logical `FactStore`.
//!
//! Writes land in the project layer only, carrying a scope tag. Reads fan out
//! to both layers concurrently and merge. If either layer fails, the merged
//! read fails; there is no partial result.

use crate::scope::classify;
use crate::store::FactStore;
use crate::{
    CandidateFact, Entity, EntityId, EntitySummary, FactId, GraphResult, Layer, NewFact,
    ScopeTag, SearchHit, StoreStats, TesseraError,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Two physical stores answering as one.
#[derive(Clone)]
pub struct LayeredStore {
    project: Arc<dyn FactStore>,
    global: Arc<dyn FactStore>,
}

impl std::fmt::Debug for LayeredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredStore").finish_non_exhaustive()
    }
}

impl LayeredStore {
    #[must_use]
    pub fn new(project: Arc<dyn FactStore>, global: Arc<dyn FactStore>) -> Self {
        Self { project, global }
    }

    /// The project layer.
    #[must_use]
    pub fn project(&self) -> &Arc<dyn FactStore> {
        &self.project
    }

    /// The global layer.
    #[must_use]
    pub fn global(&self) -> &Arc<dyn FactStore> {
        &self.global
    }
}

// =============================================================================
// MERGE RULES
// =============================================================================

/// Merge per-layer search results.
///
/// Hits are tagged with their layer, concatenated project first, stably sorted
/// by score descending, deduplicated by triple keeping the first occurrence,
/// and truncated to `limit`.
#[must_use]
pub fn merge_hits(project: Vec<SearchHit>, global: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    let mut all: Vec<SearchHit> = project
        .into_iter()
        .map(|h| tagged(h, Layer::Project))
        .chain(global.into_iter().map(|h| tagged(h, Layer::Global)))
        .collect();
    all.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    all.retain(|h| {
        seen.insert((
            h.subject.clone(),
            h.predicate.clone(),
            h.object.clone(),
        ))
    });
    all.truncate(limit);
    all
}

fn tagged(mut hit: SearchHit, layer: Layer) -> SearchHit {
    hit.layer = Some(layer);
    hit
}

/// Merge per-layer traversal results.
///
/// Both missing yields `None`; a single hit is returned unchanged. With two
/// hits the connected sets are unioned, facts are deduplicated by triple with
/// project facts first, and `matched` comes from the project layer.
#[must_use]
pub fn merge_graphs(project: Option<GraphResult>, global: Option<GraphResult>) -> Option<GraphResult> {
    match (project, global) {
        (None, None) => None,
        (Some(one), None) | (None, Some(one)) => Some(one),
        (Some(mut project), Some(global)) => {
            project.connected.extend(global.connected);
            project.connected.remove(&project.matched);

            let mut seen: HashSet<(String, String, String)> = project
                .facts
                .iter()
                .map(|f| (f.subject.clone(), f.predicate.clone(), f.object.clone()))
                .collect();
            for fact in global.facts {
                if seen.insert((
                    fact.subject.clone(),
                    fact.predicate.clone(),
                    fact.object.clone(),
                )) {
                    project.facts.push(fact);
                }
            }
            Some(project)
        }
    }
}

/// Merge per-layer listings by name, summing counts, sorted by name.
#[must_use]
pub fn merge_summaries(project: Vec<EntitySummary>, global: Vec<EntitySummary>) -> Vec<EntitySummary> {
    let mut merged: BTreeMap<String, u64> = BTreeMap::new();
    for summary in project.into_iter().chain(global) {
        *merged.entry(summary.name).or_default() += summary.fact_count;
    }
    merged
        .into_iter()
        .map(|(name, fact_count)| EntitySummary { name, fact_count })
        .collect()
}

// =============================================================================
// FACTSTORE TRAIT IMPLEMENTATION
// =============================================================================

#[async_trait]
impl FactStore for LayeredStore {
    async fn find_or_create_entity(
        &self,
        name: &str,
        embedding: &[f32],
    ) -> Result<EntityId, TesseraError> {
        self.project.find_or_create_entity(name, embedding).await
    }

    async fn store_fact(&self, mut fact: NewFact) -> Result<FactId, TesseraError> {
        let tag = fact
            .scope
            .unwrap_or_else(|| ScopeTag::from(classify(&fact.predicate)));
        fact.scope = Some(tag);
        tracing::debug!(predicate = %fact.predicate, scope = %tag, "routing fact to project layer");
        self.project.store_fact(fact).await
    }

    async fn search_facts(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, TesseraError> {
        let (project, global) = tokio::try_join!(
            self.project.search_facts(query, limit),
            self.global.search_facts(query, limit),
        )?;
        Ok(merge_hits(project, global, limit))
    }

    async fn graph_traverse(
        &self,
        entity_query: &str,
        depth: usize,
    ) -> Result<Option<GraphResult>, TesseraError> {
        let (project, global) = tokio::try_join!(
            self.project.graph_traverse(entity_query, depth),
            self.global.graph_traverse(entity_query, depth),
        )?;
        Ok(merge_graphs(project, global))
    }

    async fn list_entities(
        &self,
        pattern: Option<&str>,
    ) -> Result<Vec<EntitySummary>, TesseraError> {
        let (project, global) = tokio::try_join!(
            self.project.list_entities(pattern),
            self.global.list_entities(pattern),
        )?;
        Ok(merge_summaries(project, global))
    }

    async fn has_fact(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<bool, TesseraError> {
        let (project, global) = tokio::try_join!(
            self.project.has_fact(subject, predicate, object),
            self.global.has_fact(subject, predicate, object),
        )?;
        Ok(project || global)
    }

    async fn get_entity(&self, name: &str) -> Result<Option<Entity>, TesseraError> {
        match self.project.get_entity(name).await? {
            Some(entity) => Ok(Some(entity)),
            None => self.global.get_entity(name).await,
        }
    }

    async fn candidate_facts(&self) -> Result<Option<Vec<CandidateFact>>, TesseraError> {
        match self.project.candidate_facts().await? {
            Some(candidates) => Ok(Some(candidates)),
            None => {
                tracing::warn!("project layer cannot list candidates; reporting none");
                Ok(Some(Vec::new()))
            }
        }
    }

    async fn clear_scope_tag(&self, fact: FactId) -> Result<(), TesseraError> {
        self.project.clear_scope_tag(fact).await
    }

    async fn stats(&self) -> Result<StoreStats, TesseraError> {
        let (project, global) = tokio::try_join!(self.project.stats(), self.global.stats())?;
        Ok(StoreStats {
            entity_count: project.entity_count + global.entity_count,
            fact_count: project.fact_count + global.fact_count,
            candidate_count: project.candidate_count,
            dimension: project.dimension,
        })
    }

    async fn close(&self) -> Result<(), TesseraError> {
        let (project, global) = tokio::join!(self.project.close(), self.global.close());
        let mut errors: Vec<TesseraError> = [project, global]
            .into_iter()
            .filter_map(Result::err)
            .collect();
        if errors.len() > 1 {
            return Err(TesseraError::Multiple(errors));
        }
        errors.pop().map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphFact;
    use std::collections::BTreeSet;

    fn hit(s: &str, p: &str, o: &str, score: f32) -> SearchHit {
        SearchHit {
            subject: s.into(),
            predicate: p.into(),
            object: o.into(),
            content: format!("{s} {p} {o}"),
            context: String::new(),
            source: String::new(),
            score,
            layer: None,
        }
    }

    fn gfact(s: &str, p: &str, o: &str, content: &str) -> GraphFact {
        GraphFact {
            subject: s.into(),
            predicate: p.into(),
            object: o.into(),
            content: content.into(),
        }
    }

    #[test]
    fn duplicate_triple_keeps_higher_score() {
        let merged = merge_hits(
            vec![hit("x", "uses", "y", 0.6)],
            vec![hit("x", "uses", "y", 0.9), hit("a", "uses", "b", 0.1)],
            10,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].triple(), ("x", "uses", "y"));
        assert!((merged[0].score - 0.9).abs() < f32::EPSILON);
        assert_eq!(merged[0].layer, Some(Layer::Global));
    }

    #[test]
    fn equal_scores_prefer_project() {
        let merged = merge_hits(
            vec![hit("x", "uses", "y", 0.5)],
            vec![hit("x", "uses", "y", 0.5)],
            10,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].layer, Some(Layer::Project));
    }

    #[test]
    fn merged_hits_are_truncated() {
        let merged = merge_hits(
            vec![hit("a", "p", "b", 0.3), hit("c", "p", "d", 0.2)],
            vec![hit("e", "p", "f", 0.9)],
            2,
        );
        let subjects: Vec<&str> = merged.iter().map(|h| h.subject.as_str()).collect();
        assert_eq!(subjects, vec!["e", "a"]);
    }

    #[test]
    fn graph_merge_cases() {
        assert_eq!(merge_graphs(None, None), None);

        let only = GraphResult {
            matched: "api".into(),
            connected: BTreeSet::from(["db".to_string()]),
            facts: vec![gfact("api", "uses", "db", "p")],
        };
        assert_eq!(merge_graphs(None, Some(only.clone())), Some(only.clone()));
        assert_eq!(merge_graphs(Some(only.clone()), None), Some(only));
    }

    #[test]
    fn graph_merge_unions_and_keeps_project_fact() {
        let project = GraphResult {
            matched: "api".into(),
            connected: BTreeSet::from(["db".to_string()]),
            facts: vec![gfact("api", "uses", "db", "project copy")],
        };
        let global = GraphResult {
            matched: "api".into(),
            connected: BTreeSet::from(["db".to_string(), "cache".to_string()]),
            facts: vec![
                gfact("api", "uses", "db", "global copy"),
                gfact("api", "uses", "cache", "global only"),
            ],
        };
        let merged = merge_graphs(Some(project), Some(global)).expect("hit");
        assert_eq!(merged.matched, "api");
        assert_eq!(merged.connected.len(), 2);
        assert_eq!(merged.facts.len(), 2);
        assert_eq!(merged.facts[0].content, "project copy");
    }

    #[test]
    fn summaries_sum_by_name() {
        let merged = merge_summaries(
            vec![
                EntitySummary { name: "rust".into(), fact_count: 2 },
                EntitySummary { name: "api".into(), fact_count: 1 },
            ],
            vec![EntitySummary { name: "rust".into(), fact_count: 3 }],
        );
        assert_eq!(
            merged,
            vec![
                EntitySummary { name: "api".into(), fact_count: 1 },
                EntitySummary { name: "rust".into(), fact_count: 5 },
            ]
        );
    }
}
