//! # Dual-Layer Tests
//!
//! `LayeredStore` merging and the `Promoter` workflow, end to end over real
//! backends: project on SQLite, global on redb.

use async_trait::async_trait;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};
use tessera_core::{
    BackendKind, CandidateFact, Embedder, Entity, EntityId, EntitySummary, FactId, FactStore,
    GraphResult, HashEmbedder, Layer, LayeredStore, NewFact, PromotionOutcome, Promoter,
    ScopeTag, SearchHit, Selection, Session, StoreConfig, StoreRequest, StoreStats, TesseraError,
    open_store,
};

const DIM: usize = 32;

struct Fixture {
    project: Arc<dyn FactStore>,
    global: Arc<dyn FactStore>,
    layered: Arc<LayeredStore>,
    embedder: Arc<dyn Embedder>,
    _dir: TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempdir().expect("temp dir");
    let project = open_store(&StoreConfig {
        backend: BackendKind::Sqlite,
        path: dir.path().join("project.db"),
        dimension: DIM,
    })
    .await
    .expect("project");
    let global = open_store(&StoreConfig {
        backend: BackendKind::Redb,
        path: dir.path().join("global.redb"),
        dimension: DIM,
    })
    .await
    .expect("global");
    let layered = Arc::new(LayeredStore::new(Arc::clone(&project), Arc::clone(&global)));
    Fixture {
        project,
        global,
        layered,
        embedder: Arc::new(HashEmbedder::new(DIM).expect("embedder")),
        _dir: dir,
    }
}

impl Fixture {
    fn session(&self) -> Session {
        Session::new(self.layered.clone(), Arc::clone(&self.embedder))
    }

    fn promoter(&self) -> Promoter {
        Promoter::new(
            Arc::clone(&self.project),
            Arc::clone(&self.global),
            Arc::clone(&self.embedder),
        )
    }

    async fn put(&self, store: &Arc<dyn FactStore>, s: &str, p: &str, o: &str) -> FactId {
        let sv = self.embedder.embed(s).await.expect("embed");
        let ov = self.embedder.embed(o).await.expect("embed");
        let content = format!("{s} {p} {o}");
        let cv = self.embedder.embed(&content).await.expect("embed");
        let subject = store.find_or_create_entity(s, &sv).await.expect("subject");
        let object = store.find_or_create_entity(o, &ov).await.expect("object");
        store
            .store_fact(NewFact {
                subject,
                predicate: p.to_string(),
                object,
                content,
                context: String::new(),
                source: String::new(),
                embedding: cv,
                scope: None,
            })
            .await
            .expect("fact")
    }
}

fn request(s: &str, p: &str, o: &str) -> StoreRequest {
    StoreRequest {
        subject: s.into(),
        predicate: p.into(),
        object: o.into(),
        ..StoreRequest::default()
    }
}

// =============================================================================
// WRITES
// =============================================================================

#[tokio::test]
async fn writes_go_to_project_with_classified_tag() {
    let fx = fixture().await;
    let session = fx.session();
    session
        .store_fact(request("api", "uses", "postgres"))
        .await
        .expect("global-ish");
    session
        .store_fact(request("api", "todo", "pagination"))
        .await
        .expect("project-ish");

    assert_eq!(fx.global.stats().await.expect("stats").fact_count, 0);
    let project = fx.project.stats().await.expect("stats");
    assert_eq!(project.fact_count, 2);
    assert_eq!(project.candidate_count, 1);

    let candidates = fx
        .layered
        .candidate_facts()
        .await
        .expect("candidates")
        .expect("supported");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].predicate, "uses");
}

#[tokio::test]
async fn explicit_scope_overrides_classifier() {
    let fx = fixture().await;
    let mut req = request("team", "todo", "style-guide");
    req.scope = Some(ScopeTag::Global);
    fx.session().store_fact(req).await.expect("store");

    let candidates = fx
        .layered
        .candidate_facts()
        .await
        .expect("candidates")
        .expect("supported");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].predicate, "todo");
}

// =============================================================================
// MERGED READS
// =============================================================================

#[tokio::test]
async fn search_returns_one_copy_of_a_shared_triple() {
    let fx = fixture().await;
    fx.put(&fx.project, "X", "uses", "Y").await;
    fx.put(&fx.global, "X", "uses", "Y").await;
    fx.put(&fx.global, "Z", "runs_on", "linux").await;

    let hits = fx.session().search("X uses Y", Some(10)).await.expect("search");
    let copies = hits.iter().filter(|h| h.triple() == ("X", "uses", "Y")).count();
    assert_eq!(copies, 1);
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.layer.is_some()));
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn graph_merges_both_layers() {
    let fx = fixture().await;
    fx.put(&fx.project, "billing", "blocked_by", "migration").await;
    fx.put(&fx.global, "billing", "written_in", "rust").await;
    fx.put(&fx.global, "billing", "blocked_by", "migration").await;

    let graph = fx
        .session()
        .graph("billing", Some(1))
        .await
        .expect("graph")
        .expect("found");
    assert_eq!(graph.matched, "billing");
    let connected: Vec<&str> = graph.connected.iter().map(String::as_str).collect();
    assert_eq!(connected, vec!["migration", "rust"]);
    assert_eq!(graph.facts.len(), 2);
}

#[tokio::test]
async fn graph_miss_in_both_layers_is_none() {
    let fx = fixture().await;
    fx.put(&fx.project, "a", "uses", "b").await;
    assert!(fx.session().graph("zzz", None).await.expect("graph").is_none());
}

#[tokio::test]
async fn list_sums_counts_across_layers() {
    let fx = fixture().await;
    fx.put(&fx.project, "api", "uses", "redis").await;
    fx.put(&fx.global, "api", "uses", "postgres").await;

    let listing = fx.session().list(None).await.expect("list");
    let api = listing.iter().find(|s| s.name == "api").expect("api listed");
    assert_eq!(api.fact_count, 2);
    let names: Vec<&str> = listing.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["api", "postgres", "redis"]);
}

// =============================================================================
// PROMOTION
// =============================================================================

#[tokio::test]
async fn promotion_copies_fact_and_clears_tag() {
    let fx = fixture().await;
    let session = fx.session();
    session
        .store_fact(request("svc", "written_in", "go"))
        .await
        .expect("store");

    let outcome = fx
        .promoter()
        .run(&mut |_: &[CandidateFact]| Selection::All)
        .await
        .expect("promote");
    let PromotionOutcome::Completed(report) = outcome else {
        unreachable!("sqlite project supports candidates");
    };
    assert_eq!(report.promoted, 1);
    assert!(report.failures.is_empty());

    // New global fact with the same triple and content.
    let hits = fx
        .global
        .search_facts(&fx.embedder.embed("svc written_in go").await.expect("embed"), 5)
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].triple(), ("svc", "written_in", "go"));
    assert_eq!(hits[0].content, "svc written_in go");
    assert_eq!(fx.global.stats().await.expect("stats").candidate_count, 0);

    // Original still exists, no longer a candidate.
    let project = fx.project.stats().await.expect("stats");
    assert_eq!(project.fact_count, 1);
    assert_eq!(project.candidate_count, 0);
    assert!(
        fx.project
            .candidate_facts()
            .await
            .expect("candidates")
            .expect("supported")
            .is_empty()
    );
}

#[tokio::test]
async fn unselected_candidates_keep_their_tag() {
    let fx = fixture().await;
    let session = fx.session();
    for (s, o) in [("a", "x"), ("b", "y"), ("c", "z")] {
        session.store_fact(request(s, "uses", o)).await.expect("store");
    }

    let mut offered = 0;
    let outcome = fx
        .promoter()
        .run(&mut |c: &[CandidateFact]| {
            offered = c.len();
            Selection::Indices(vec![1, 7])
        })
        .await
        .expect("promote");
    assert_eq!(offered, 3);
    assert!(matches!(
        outcome,
        PromotionOutcome::Completed(ref r) if r.selected == 1 && r.promoted == 1
    ));

    let remaining = fx
        .project
        .candidate_facts()
        .await
        .expect("candidates")
        .expect("supported");
    let subjects: Vec<&str> = remaining.iter().map(|c| c.subject.as_str()).collect();
    assert_eq!(subjects, vec!["a", "c"]);
}

#[tokio::test]
async fn selecting_none_changes_nothing() {
    let fx = fixture().await;
    fx.session()
        .store_fact(request("a", "uses", "b"))
        .await
        .expect("store");
    let outcome = fx
        .promoter()
        .run(&mut |_: &[CandidateFact]| Selection::None)
        .await
        .expect("promote");
    assert!(matches!(outcome, PromotionOutcome::Completed(ref r) if r.promoted == 0));
    assert_eq!(fx.global.stats().await.expect("stats").fact_count, 0);
    assert_eq!(fx.project.stats().await.expect("stats").candidate_count, 1);
}

#[tokio::test]
async fn item_failure_does_not_abort_batch() {
    let fx = fixture().await;
    let session = fx.session();
    session.store_fact(request("a", "uses", "b")).await.expect("store");
    session.store_fact(request("c", "uses", "d")).await.expect("store");

    // A global embedder with the wrong dimension fails every item.
    let promoter = Promoter::new(
        Arc::clone(&fx.project),
        Arc::clone(&fx.global),
        Arc::new(HashEmbedder::new(DIM + 1).expect("embedder")),
    );
    let outcome = promoter
        .run(&mut |_: &[CandidateFact]| Selection::All)
        .await
        .expect("promotion itself succeeds");
    let PromotionOutcome::Completed(report) = outcome else {
        unreachable!("sqlite project supports candidates");
    };
    assert_eq!(report.selected, 2);
    assert_eq!(report.promoted, 0);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(fx.project.stats().await.expect("stats").candidate_count, 2);
}

// =============================================================================
// CAPABILITY-ABSENT AND FAILING BACKENDS
// =============================================================================

/// Delegates everything except `candidate_facts`, which keeps the default.
struct NoCandidates(Arc<dyn FactStore>);

#[async_trait]
impl FactStore for NoCandidates {
    async fn find_or_create_entity(&self, name: &str, e: &[f32]) -> Result<EntityId, TesseraError> {
        self.0.find_or_create_entity(name, e).await
    }
    async fn store_fact(&self, fact: NewFact) -> Result<FactId, TesseraError> {
        self.0.store_fact(fact).await
    }
    async fn search_facts(&self, q: &[f32], limit: usize) -> Result<Vec<SearchHit>, TesseraError> {
        self.0.search_facts(q, limit).await
    }
    async fn graph_traverse(&self, q: &str, d: usize) -> Result<Option<GraphResult>, TesseraError> {
        self.0.graph_traverse(q, d).await
    }
    async fn list_entities(&self, p: Option<&str>) -> Result<Vec<EntitySummary>, TesseraError> {
        self.0.list_entities(p).await
    }
    async fn has_fact(&self, s: &str, p: &str, o: &str) -> Result<bool, TesseraError> {
        self.0.has_fact(s, p, o).await
    }
    async fn get_entity(&self, name: &str) -> Result<Option<Entity>, TesseraError> {
        self.0.get_entity(name).await
    }
    async fn clear_scope_tag(&self, fact: FactId) -> Result<(), TesseraError> {
        self.0.clear_scope_tag(fact).await
    }
    async fn stats(&self) -> Result<StoreStats, TesseraError> {
        self.0.stats().await
    }
    async fn close(&self) -> Result<(), TesseraError> {
        Err(TesseraError::Storage("close refused".into()))
    }
}

/// Delegates everything except `clear_scope_tag`, which always fails.
struct StickyTags(Arc<dyn FactStore>);

#[async_trait]
impl FactStore for StickyTags {
    async fn find_or_create_entity(&self, name: &str, e: &[f32]) -> Result<EntityId, TesseraError> {
        self.0.find_or_create_entity(name, e).await
    }
    async fn store_fact(&self, fact: NewFact) -> Result<FactId, TesseraError> {
        self.0.store_fact(fact).await
    }
    async fn search_facts(&self, q: &[f32], limit: usize) -> Result<Vec<SearchHit>, TesseraError> {
        self.0.search_facts(q, limit).await
    }
    async fn graph_traverse(&self, q: &str, d: usize) -> Result<Option<GraphResult>, TesseraError> {
        self.0.graph_traverse(q, d).await
    }
    async fn list_entities(&self, p: Option<&str>) -> Result<Vec<EntitySummary>, TesseraError> {
        self.0.list_entities(p).await
    }
    async fn has_fact(&self, s: &str, p: &str, o: &str) -> Result<bool, TesseraError> {
        self.0.has_fact(s, p, o).await
    }
    async fn get_entity(&self, name: &str) -> Result<Option<Entity>, TesseraError> {
        self.0.get_entity(name).await
    }
    async fn candidate_facts(&self) -> Result<Option<Vec<CandidateFact>>, TesseraError> {
        self.0.candidate_facts().await
    }
    async fn clear_scope_tag(&self, _fact: FactId) -> Result<(), TesseraError> {
        Err(TesseraError::Storage("disk full".into()))
    }
    async fn stats(&self) -> Result<StoreStats, TesseraError> {
        self.0.stats().await
    }
    async fn close(&self) -> Result<(), TesseraError> {
        self.0.close().await
    }
}

#[tokio::test]
async fn uncleared_tag_does_not_duplicate_global_fact() {
    let fx = fixture().await;
    fx.session()
        .store_fact(request("api", "uses", "postgres"))
        .await
        .expect("store");

    let project: Arc<dyn FactStore> = Arc::new(StickyTags(Arc::clone(&fx.project)));
    let promoter = Promoter::new(project, Arc::clone(&fx.global), Arc::clone(&fx.embedder));

    for round in 0..2 {
        let outcome = promoter
            .run(&mut |_: &[CandidateFact]| Selection::All)
            .await
            .expect("run");
        let PromotionOutcome::Completed(report) = outcome else {
            unreachable!("sqlite project supports candidates");
        };
        assert_eq!(report.promoted, 1, "round {round}");
        assert!(report.failures.is_empty(), "round {round}");
        assert_eq!(report.tag_errors.len(), 1, "round {round}");
    }

    // Still offered, but the global layer holds exactly one copy.
    assert_eq!(fx.project.stats().await.expect("stats").candidate_count, 1);
    assert_eq!(fx.global.stats().await.expect("stats").fact_count, 1);
}

#[tokio::test]
async fn triple_already_in_global_only_clears_the_tag() {
    let fx = fixture().await;
    fx.put(&fx.global, "api", "uses", "postgres").await;
    fx.session()
        .store_fact(request("api", "uses", "postgres"))
        .await
        .expect("store");

    let promoter = fx.promoter();
    let candidates = promoter
        .candidates()
        .await
        .expect("candidates")
        .expect("supported");
    let report = promoter.promote(&candidates, Selection::All).await;

    assert_eq!(report.promoted, 1);
    assert!(report.tag_errors.is_empty());
    assert_eq!(fx.global.stats().await.expect("stats").fact_count, 1);
    assert_eq!(fx.project.stats().await.expect("stats").candidate_count, 0);
}

#[tokio::test]
async fn promotion_unavailable_without_candidate_capability() {
    let fx = fixture().await;
    let project: Arc<dyn FactStore> = Arc::new(NoCandidates(Arc::clone(&fx.project)));
    let promoter = Promoter::new(project, Arc::clone(&fx.global), Arc::clone(&fx.embedder));

    let mut called = false;
    let outcome = promoter
        .run(&mut |_: &[CandidateFact]| {
            called = true;
            Selection::All
        })
        .await
        .expect("run");
    assert_eq!(outcome, PromotionOutcome::Unavailable);
    assert!(!called);
}

#[tokio::test]
async fn coordinator_degrades_to_empty_candidates() {
    let fx = fixture().await;
    let project: Arc<dyn FactStore> = Arc::new(NoCandidates(Arc::clone(&fx.project)));
    let layered = LayeredStore::new(project, Arc::clone(&fx.global));
    assert_eq!(
        layered.candidate_facts().await.expect("candidates"),
        Some(Vec::new())
    );
}

#[tokio::test]
async fn close_aggregates_layer_failures() {
    let fx = fixture().await;
    let failing_project: Arc<dyn FactStore> = Arc::new(NoCandidates(Arc::clone(&fx.project)));
    let failing_global: Arc<dyn FactStore> = Arc::new(NoCandidates(Arc::clone(&fx.global)));

    let one = LayeredStore::new(Arc::clone(&failing_project), Arc::clone(&fx.global));
    assert!(matches!(one.close().await, Err(TesseraError::Storage(_))));

    let both = LayeredStore::new(failing_project, failing_global);
    match both.close().await {
        Err(TesseraError::Multiple(errors)) => assert_eq!(errors.len(), 2),
        other => unreachable!("expected both failures, got {other:?}"),
    }
}

#[tokio::test]
async fn merged_hits_carry_their_layer() {
    let fx = fixture().await;
    fx.put(&fx.project, "p", "todo", "q").await;
    fx.put(&fx.global, "g", "uses", "h").await;

    let hits = fx.session().search("p todo q", Some(5)).await.expect("search");
    let layer_of = |s: &str| hits.iter().find(|h| h.subject == s).and_then(|h| h.layer);
    assert_eq!(layer_of("p"), Some(Layer::Project));
    assert_eq!(layer_of("g"), Some(Layer::Global));
}
