//! # redb-backed Graph Store
//!
//! The graph-native backend. Entities and facts are two labelled node types;
//! each fact hangs off two directed edges:
//!
//! ```text
//!   (subject entity) --SUBJECT--> (fact) --OBJECT--> (object entity)
//! ```
//!
//! Both edge tables are keyed by the entity end so that a node's incident
//! facts are a single range scan in either direction. The value of each edge
//! row is the entity at the opposite end of the fact, so traversal never has
//! to decode fact nodes.
//!
//! redb gives ACID write transactions with a single writer and MVCC readers.
//! Every operation runs on tokio's blocking pool. Fact embeddings are cached
//! in memory after open for brute-force k-NN; the cache is only updated after
//! a successful commit.

use crate::primitives::DIMENSION_KEY;
use crate::store::{FactStore, name_matches, resolve_fuzzy};
use crate::vector::{check_dimension, top_k};
use crate::{
    CandidateFact, Entity, EntityId, EntitySummary, FactId, GraphFact, GraphResult, NewFact,
    ScopeTag, SearchHit, StoreStats, TesseraError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Entity nodes: EntityId(u64) -> serialized `EntityNode`
const ENTITIES: TableDefinition<u64, &[u8]> = TableDefinition::new("entities");

/// Unique name index: name -> EntityId(u64)
const ENTITY_NAMES: TableDefinition<&str, u64> = TableDefinition::new("entity_names");

/// Fact nodes: FactId(u64) -> serialized `FactNode`
const FACTS: TableDefinition<u64, &[u8]> = TableDefinition::new("facts");

/// SUBJECT edges: (subject_id, fact_id) -> object_id
const SUBJECT_EDGES: TableDefinition<(u64, u64), u64> = TableDefinition::new("subject_edges");

/// OBJECT edges, indexed by the object end: (object_id, fact_id) -> subject_id
const OBJECT_EDGES: TableDefinition<(u64, u64), u64> = TableDefinition::new("object_edges");

/// Facts currently tagged as global candidates.
const CANDIDATES: TableDefinition<u64, ()> = TableDefinition::new("candidates");

/// Metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_ENTITY_ID: &str = "next_entity_id";
const NEXT_FACT_ID: &str = "next_fact_id";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntityNode {
    name: String,
    created_at_ms: i64,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FactNode {
    subject: u64,
    predicate: String,
    object: u64,
    content: String,
    context: String,
    source: String,
    created_at_ms: i64,
    scope: ScopeTag,
    embedding: Vec<f32>,
}

fn storage<E: std::fmt::Display>(e: E) -> TesseraError {
    TesseraError::Storage(e.to_string())
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>, TesseraError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| TesseraError::Serialization(format!("timestamp out of range: {ms}")))
}

fn poisoned<T>(_: T) -> TesseraError {
    TesseraError::Storage("redb store lock poisoned".to_string())
}

fn closed() -> TesseraError {
    TesseraError::Storage("store closed".to_string())
}

// =============================================================================
// STORE HANDLE
// =============================================================================

/// A graph-native fact store on a single redb file.
#[derive(Clone)]
pub struct RedbStore {
    inner: Arc<RedbInner>,
}

struct RedbInner {
    /// `None` once the store is closed.
    db: RwLock<Option<Database>>,
    path: PathBuf,
    dimension: usize,
    /// FactId -> embedding, rebuilt from FACTS on open.
    vectors: RwLock<BTreeMap<u64, Vec<f32>>>,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("path", &self.inner.path)
            .field("dimension", &self.inner.dimension)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at `path` with the given embedding dimension.
    ///
    /// A fresh file records `dimension`. An existing file recorded with a
    /// different dimension fails with `DimensionMismatch` before any table
    /// is read.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self, TesseraError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path).map_err(storage)?;

        // Initialize tables and lock the dimension.
        {
            let write_txn = db.begin_write().map_err(storage)?;
            {
                let _ = write_txn.open_table(ENTITIES).map_err(storage)?;
                let _ = write_txn.open_table(ENTITY_NAMES).map_err(storage)?;
                let _ = write_txn.open_table(FACTS).map_err(storage)?;
                let _ = write_txn.open_table(SUBJECT_EDGES).map_err(storage)?;
                let _ = write_txn.open_table(OBJECT_EDGES).map_err(storage)?;
                let _ = write_txn.open_table(CANDIDATES).map_err(storage)?;

                let mut meta = write_txn.open_table(METADATA).map_err(storage)?;
                let stored = meta
                    .get(DIMENSION_KEY)
                    .map_err(storage)?
                    .map(|v| v.value());
                match stored {
                    None => {
                        meta.insert(DIMENSION_KEY, dimension as u64)
                            .map_err(storage)?;
                    }
                    Some(stored) if stored as usize != dimension => {
                        // Dropping the transaction rolls it back.
                        return Err(TesseraError::DimensionMismatch {
                            stored: stored as usize,
                            configured: dimension,
                        });
                    }
                    Some(_) => {}
                }
            }
            write_txn.commit().map_err(storage)?;
        }

        // Load the vector cache.
        let vectors = {
            let read_txn = db.begin_read().map_err(storage)?;
            let facts = read_txn.open_table(FACTS).map_err(storage)?;
            let mut cache = BTreeMap::new();
            for entry in facts.iter().map_err(storage)? {
                let (key, value) = entry.map_err(storage)?;
                let node: FactNode = postcard::from_bytes(value.value())?;
                cache.insert(key.value(), node.embedding);
            }
            cache
        };

        tracing::info!(
            path = %path.display(),
            dimension,
            facts = vectors.len(),
            "opened redb store"
        );

        Ok(Self {
            inner: Arc::new(RedbInner {
                db: RwLock::new(Some(db)),
                path,
                dimension,
                vectors: RwLock::new(vectors),
            }),
        })
    }

    /// Locked embedding dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.inner.dimension
    }

    /// Run a synchronous operation on the blocking pool.
    ///
    /// The database read guard is held for the whole operation, so `close`
    /// waits for in-flight work before releasing the file.
    async fn run<T, F>(&self, op: F) -> Result<T, TesseraError>
    where
        T: Send + 'static,
        F: FnOnce(&RedbInner, &Database) -> Result<T, TesseraError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let guard = inner.db.read().map_err(poisoned)?;
            let db = (*guard).as_ref().ok_or_else(closed)?;
            op(&inner, db)
        })
        .await?
    }
}

// =============================================================================
// SYNCHRONOUS OPERATIONS
// =============================================================================

impl RedbInner {
    fn find_or_create_entity(
        &self,
        db: &Database,
        name: &str,
        embedding: Vec<f32>,
    ) -> Result<u64, TesseraError> {
        check_dimension(&embedding, self.dimension)?;

        let write_txn = db.begin_write().map_err(storage)?;
        let id = {
            let mut names = write_txn.open_table(ENTITY_NAMES).map_err(storage)?;
            let mut entities = write_txn.open_table(ENTITIES).map_err(storage)?;
            let existing = names.get(name).map_err(storage)?.map(|v| v.value());

            match existing {
                Some(id) => {
                    let node: Option<EntityNode> = entities
                        .get(id)
                        .map_err(storage)?
                        .map(|data| postcard::from_bytes(data.value()))
                        .transpose()?;
                    let mut node = node.ok_or_else(|| {
                        TesseraError::Storage(format!("name index points at missing entity {id}"))
                    })?;
                    node.embedding = embedding;
                    let bytes = postcard::to_allocvec(&node)?;
                    entities.insert(id, bytes.as_slice()).map_err(storage)?;
                    id
                }
                None => {
                    let mut meta = write_txn.open_table(METADATA).map_err(storage)?;
                    let id = meta
                        .get(NEXT_ENTITY_ID)
                        .map_err(storage)?
                        .map(|v| v.value())
                        .unwrap_or(0);
                    let node = EntityNode {
                        name: name.to_string(),
                        created_at_ms: Utc::now().timestamp_millis(),
                        embedding,
                    };
                    let bytes = postcard::to_allocvec(&node)?;
                    entities.insert(id, bytes.as_slice()).map_err(storage)?;
                    names.insert(name, id).map_err(storage)?;
                    meta.insert(NEXT_ENTITY_ID, id.saturating_add(1))
                        .map_err(storage)?;
                    id
                }
            }
        };
        write_txn.commit().map_err(storage)?;

        tracing::debug!(entity = id, name, "entity written");
        Ok(id)
    }

    fn store_fact(&self, db: &Database, fact: NewFact) -> Result<u64, TesseraError> {
        check_dimension(&fact.embedding, self.dimension)?;

        let scope = fact.scope.unwrap_or_default();
        let write_txn = db.begin_write().map_err(storage)?;
        let id = {
            let entities = write_txn.open_table(ENTITIES).map_err(storage)?;
            for entity in [fact.subject, fact.object] {
                if entities.get(entity.0).map_err(storage)?.is_none() {
                    return Err(TesseraError::ReferentialIntegrity(entity));
                }
            }

            let mut meta = write_txn.open_table(METADATA).map_err(storage)?;
            let id = meta
                .get(NEXT_FACT_ID)
                .map_err(storage)?
                .map(|v| v.value())
                .unwrap_or(0);

            let node = FactNode {
                subject: fact.subject.0,
                predicate: fact.predicate,
                object: fact.object.0,
                content: fact.content,
                context: fact.context,
                source: fact.source,
                created_at_ms: Utc::now().timestamp_millis(),
                scope,
                embedding: fact.embedding.clone(),
            };
            let bytes = postcard::to_allocvec(&node)?;

            let mut facts = write_txn.open_table(FACTS).map_err(storage)?;
            facts.insert(id, bytes.as_slice()).map_err(storage)?;

            let mut subject_edges = write_txn.open_table(SUBJECT_EDGES).map_err(storage)?;
            subject_edges
                .insert((node.subject, id), node.object)
                .map_err(storage)?;
            let mut object_edges = write_txn.open_table(OBJECT_EDGES).map_err(storage)?;
            object_edges
                .insert((node.object, id), node.subject)
                .map_err(storage)?;

            if scope == ScopeTag::Global {
                let mut candidates = write_txn.open_table(CANDIDATES).map_err(storage)?;
                candidates.insert(id, ()).map_err(storage)?;
            }

            meta.insert(NEXT_FACT_ID, id.saturating_add(1))
                .map_err(storage)?;
            id
        };
        write_txn.commit().map_err(storage)?;

        // Update the cache only after a durable commit.
        self.vectors
            .write()
            .map_err(poisoned)?
            .insert(id, fact.embedding);

        tracing::debug!(fact = id, scope = %scope, "fact appended");
        Ok(id)
    }

    fn search_facts(
        &self,
        db: &Database,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, TesseraError> {
        check_dimension(query, self.dimension)?;

        let ranked = {
            let vectors = self.vectors.read().map_err(poisoned)?;
            top_k(
                query,
                vectors.iter().map(|(id, v)| (*id, v.as_slice())),
                limit,
            )
        };

        let read_txn = db.begin_read().map_err(storage)?;
        let facts = read_txn.open_table(FACTS).map_err(storage)?;
        let entities = read_txn.open_table(ENTITIES).map_err(storage)?;

        let mut hits = Vec::with_capacity(ranked.len());
        for (id, score) in ranked {
            let Some(data) = facts.get(id).map_err(storage)? else {
                continue;
            };
            let node: FactNode = postcard::from_bytes(data.value())?;
            hits.push(SearchHit {
                subject: entity_name(&entities, node.subject)?,
                predicate: node.predicate,
                object: entity_name(&entities, node.object)?,
                content: node.content,
                context: node.context,
                source: node.source,
                score,
                layer: None,
            });
        }
        Ok(hits)
    }

    fn graph_traverse(
        &self,
        db: &Database,
        entity_query: &str,
        depth: usize,
    ) -> Result<Option<GraphResult>, TesseraError> {
        let read_txn = db.begin_read().map_err(storage)?;

        // id -> name, in id (creation) order.
        let names: BTreeMap<u64, String> = {
            let table = read_txn.open_table(ENTITY_NAMES).map_err(storage)?;
            let mut names = BTreeMap::new();
            for entry in table.iter().map_err(storage)? {
                let (key, value) = entry.map_err(storage)?;
                names.insert(value.value(), key.value().to_string());
            }
            names
        };

        let Some((start, matched)) = resolve_fuzzy(
            names.iter().map(|(id, name)| (EntityId(*id), name.as_str())),
            entity_query,
        ) else {
            return Ok(None);
        };
        let start = start.0;

        let subject_edges = read_txn.open_table(SUBJECT_EDGES).map_err(storage)?;
        let object_edges = read_txn.open_table(OBJECT_EDGES).map_err(storage)?;

        // Breadth-first expansion across both edge directions.
        let mut visited = BTreeSet::from([start]);
        let mut frontier = vec![start];
        for _ in 0..depth {
            let mut next = Vec::new();
            for &node in &frontier {
                for table in [&subject_edges, &object_edges] {
                    for entry in table.range((node, 0u64)..=(node, u64::MAX)).map_err(storage)? {
                        let (_, other) = entry.map_err(storage)?;
                        let other = other.value();
                        if visited.insert(other) {
                            next.push(other);
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        // Every fact incident to the visited set.
        let mut fact_ids = BTreeSet::new();
        for &node in &visited {
            for table in [&subject_edges, &object_edges] {
                for entry in table.range((node, 0u64)..=(node, u64::MAX)).map_err(storage)? {
                    let (key, _) = entry.map_err(storage)?;
                    fact_ids.insert(key.value().1);
                }
            }
        }

        let facts_table = read_txn.open_table(FACTS).map_err(storage)?;
        let mut facts = Vec::with_capacity(fact_ids.len());
        for id in fact_ids {
            let Some(data) = facts_table.get(id).map_err(storage)? else {
                continue;
            };
            let node: FactNode = postcard::from_bytes(data.value())?;
            facts.push(GraphFact {
                subject: lookup_name(&names, node.subject)?,
                predicate: node.predicate,
                object: lookup_name(&names, node.object)?,
                content: node.content,
            });
        }

        let connected = visited
            .iter()
            .filter(|id| **id != start)
            .map(|id| lookup_name(&names, *id))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Some(GraphResult {
            matched: matched.to_string(),
            connected,
            facts,
        }))
    }

    fn list_entities(
        &self,
        db: &Database,
        pattern: Option<&str>,
    ) -> Result<Vec<EntitySummary>, TesseraError> {
        let read_txn = db.begin_read().map_err(storage)?;
        let names = read_txn.open_table(ENTITY_NAMES).map_err(storage)?;
        let subject_edges = read_txn.open_table(SUBJECT_EDGES).map_err(storage)?;

        // ENTITY_NAMES iterates in byte order of the name, i.e. ascending.
        let mut summaries = Vec::new();
        for entry in names.iter().map_err(storage)? {
            let (key, value) = entry.map_err(storage)?;
            let name = key.value();
            if pattern.is_some_and(|p| !name_matches(name, p)) {
                continue;
            }
            let id = value.value();
            let fact_count = subject_edges
                .range((id, 0u64)..=(id, u64::MAX))
                .map_err(storage)?
                .count() as u64;
            summaries.push(EntitySummary {
                name: name.to_string(),
                fact_count,
            });
        }
        Ok(summaries)
    }

    fn has_fact(
        &self,
        db: &Database,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<bool, TesseraError> {
        let read_txn = db.begin_read().map_err(storage)?;
        let names = read_txn.open_table(ENTITY_NAMES).map_err(storage)?;
        let lookup = |name: &str| -> Result<Option<u64>, TesseraError> {
            Ok(names.get(name).map_err(storage)?.map(|v| v.value()))
        };
        let (Some(subject), Some(object)) = (lookup(subject)?, lookup(object)?) else {
            return Ok(false);
        };

        let subject_edges = read_txn.open_table(SUBJECT_EDGES).map_err(storage)?;
        let facts = read_txn.open_table(FACTS).map_err(storage)?;
        for entry in subject_edges
            .range((subject, 0u64)..=(subject, u64::MAX))
            .map_err(storage)?
        {
            let (key, other) = entry.map_err(storage)?;
            if other.value() != object {
                continue;
            }
            let Some(data) = facts.get(key.value().1).map_err(storage)? else {
                continue;
            };
            let node: FactNode = postcard::from_bytes(data.value())?;
            if node.predicate == predicate {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn get_entity(&self, db: &Database, name: &str) -> Result<Option<Entity>, TesseraError> {
        let read_txn = db.begin_read().map_err(storage)?;
        let names = read_txn.open_table(ENTITY_NAMES).map_err(storage)?;
        let Some(id) = names.get(name).map_err(storage)?.map(|v| v.value()) else {
            return Ok(None);
        };
        let entities = read_txn.open_table(ENTITIES).map_err(storage)?;
        let Some(data) = entities.get(id).map_err(storage)? else {
            return Ok(None);
        };
        let node: EntityNode = postcard::from_bytes(data.value())?;
        Ok(Some(Entity {
            id: EntityId(id),
            name: node.name,
            created_at: timestamp(node.created_at_ms)?,
            embedding: node.embedding,
        }))
    }

    fn candidate_facts(&self, db: &Database) -> Result<Vec<CandidateFact>, TesseraError> {
        let read_txn = db.begin_read().map_err(storage)?;
        let candidates = read_txn.open_table(CANDIDATES).map_err(storage)?;
        let facts = read_txn.open_table(FACTS).map_err(storage)?;
        let entities = read_txn.open_table(ENTITIES).map_err(storage)?;

        let mut out = Vec::new();
        for entry in candidates.iter().map_err(storage)? {
            let (key, _) = entry.map_err(storage)?;
            let id = key.value();
            let Some(data) = facts.get(id).map_err(storage)? else {
                continue;
            };
            let node: FactNode = postcard::from_bytes(data.value())?;
            out.push(CandidateFact {
                id: FactId(id),
                subject: entity_name(&entities, node.subject)?,
                predicate: node.predicate,
                object: entity_name(&entities, node.object)?,
                content: node.content,
                context: node.context,
                source: node.source,
                created_at: timestamp(node.created_at_ms)?,
            });
        }
        Ok(out)
    }

    fn clear_scope_tag(&self, db: &Database, fact: FactId) -> Result<(), TesseraError> {
        let write_txn = db.begin_write().map_err(storage)?;
        {
            let mut facts = write_txn.open_table(FACTS).map_err(storage)?;
            let node: Option<FactNode> = facts
                .get(fact.0)
                .map_err(storage)?
                .map(|data| postcard::from_bytes(data.value()))
                .transpose()?;
            let mut node = node.ok_or(TesseraError::FactNotFound(fact))?;
            node.scope = ScopeTag::None;
            let bytes = postcard::to_allocvec(&node)?;
            facts.insert(fact.0, bytes.as_slice()).map_err(storage)?;

            let mut candidates = write_txn.open_table(CANDIDATES).map_err(storage)?;
            candidates.remove(fact.0).map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;

        tracing::debug!(fact = fact.0, "scope tag cleared");
        Ok(())
    }

    fn stats(&self, db: &Database) -> Result<StoreStats, TesseraError> {
        let read_txn = db.begin_read().map_err(storage)?;
        let entity_count = read_txn
            .open_table(ENTITIES)
            .map_err(storage)?
            .len()
            .map_err(storage)?;
        let fact_count = read_txn
            .open_table(FACTS)
            .map_err(storage)?
            .len()
            .map_err(storage)?;
        let candidate_count = read_txn
            .open_table(CANDIDATES)
            .map_err(storage)?
            .len()
            .map_err(storage)?;
        Ok(StoreStats {
            entity_count,
            fact_count,
            candidate_count,
            dimension: self.dimension,
        })
    }
}

fn entity_name<T>(entities: &T, id: u64) -> Result<String, TesseraError>
where
    T: ReadableTable<u64, &'static [u8]>,
{
    let data = entities.get(id).map_err(storage)?.ok_or_else(|| {
        TesseraError::Storage(format!("fact references missing entity {id}"))
    })?;
    let node: EntityNode = postcard::from_bytes(data.value())?;
    Ok(node.name)
}

fn lookup_name(names: &BTreeMap<u64, String>, id: u64) -> Result<String, TesseraError> {
    names
        .get(&id)
        .cloned()
        .ok_or_else(|| TesseraError::Storage(format!("fact references missing entity {id}")))
}

// =============================================================================
// FACTSTORE TRAIT IMPLEMENTATION
// =============================================================================

#[async_trait]
impl FactStore for RedbStore {
    async fn find_or_create_entity(
        &self,
        name: &str,
        embedding: &[f32],
    ) -> Result<EntityId, TesseraError> {
        let name = name.to_string();
        let embedding = embedding.to_vec();
        self.run(move |inner, db| inner.find_or_create_entity(db, &name, embedding))
            .await
            .map(EntityId)
    }

    async fn store_fact(&self, fact: NewFact) -> Result<FactId, TesseraError> {
        self.run(move |inner, db| inner.store_fact(db, fact))
            .await
            .map(FactId)
    }

    async fn search_facts(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, TesseraError> {
        let query = query.to_vec();
        self.run(move |inner, db| inner.search_facts(db, &query, limit))
            .await
    }

    async fn graph_traverse(
        &self,
        entity_query: &str,
        depth: usize,
    ) -> Result<Option<GraphResult>, TesseraError> {
        let entity_query = entity_query.to_string();
        self.run(move |inner, db| inner.graph_traverse(db, &entity_query, depth))
            .await
    }

    async fn list_entities(
        &self,
        pattern: Option<&str>,
    ) -> Result<Vec<EntitySummary>, TesseraError> {
        let pattern = pattern.map(str::to_string);
        self.run(move |inner, db| inner.list_entities(db, pattern.as_deref()))
            .await
    }

    async fn has_fact(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<bool, TesseraError> {
        let (subject, predicate, object) =
            (subject.to_string(), predicate.to_string(), object.to_string());
        self.run(move |inner, db| inner.has_fact(db, &subject, &predicate, &object))
            .await
    }

    async fn get_entity(&self, name: &str) -> Result<Option<Entity>, TesseraError> {
        let name = name.to_string();
        self.run(move |inner, db| inner.get_entity(db, &name)).await
    }

    async fn candidate_facts(&self) -> Result<Option<Vec<CandidateFact>>, TesseraError> {
        self.run(|inner, db| inner.candidate_facts(db)).await.map(Some)
    }

    async fn clear_scope_tag(&self, fact: FactId) -> Result<(), TesseraError> {
        self.run(move |inner, db| inner.clear_scope_tag(db, fact)).await
    }

    async fn stats(&self) -> Result<StoreStats, TesseraError> {
        self.run(|inner, db| inner.stats(db)).await
    }

    async fn close(&self) -> Result<(), TesseraError> {
        let inner = Arc::clone(&self.inner);
        let db = tokio::task::spawn_blocking(move || {
            inner.db.write().map_err(poisoned).map(|mut guard| Option::take(&mut guard))
        })
        .await??;

        // Dropping the handle releases the file lock.
        if db.is_some() {
            drop(db);
            tracing::info!(path = %self.inner.path.display(), "closed redb store");
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fact(subject: EntityId, predicate: &str, object: EntityId, v: Vec<f32>) -> NewFact {
        NewFact {
            subject,
            predicate: predicate.to_string(),
            object,
            content: format!("{predicate} fact"),
            context: String::new(),
            source: String::new(),
            embedding: v,
            scope: None,
        }
    }

    #[tokio::test]
    async fn entity_names_are_unique() {
        let temp = tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("kg.redb"), 2).expect("open");

        let a = store
            .find_or_create_entity("api", &[1.0, 0.0])
            .await
            .expect("create");
        let b = store
            .find_or_create_entity("api", &[0.0, 1.0])
            .await
            .expect("repeat");
        let c = store
            .find_or_create_entity("API", &[0.0, 1.0])
            .await
            .expect("different case");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.stats().await.expect("stats").entity_count, 2);
    }

    #[tokio::test]
    async fn edges_survive_reopen() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("kg.redb");

        {
            let store = RedbStore::open(&path, 2).expect("open");
            let a = store.find_or_create_entity("a", &[1.0, 0.0]).await.expect("a");
            let b = store.find_or_create_entity("b", &[0.0, 1.0]).await.expect("b");
            store
                .store_fact(fact(a, "uses", b, vec![1.0, 1.0]))
                .await
                .expect("fact");
        }

        let store = RedbStore::open(&path, 2).expect("reopen");
        let graph = store
            .graph_traverse("a", 1)
            .await
            .expect("traverse")
            .expect("found");
        assert!(graph.connected.contains("b"));

        // The vector cache was rebuilt from disk.
        let hits = store.search_facts(&[1.0, 1.0], 5).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn ids_keep_counting_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("kg.redb");

        let first = {
            let store = RedbStore::open(&path, 1).expect("open");
            store.find_or_create_entity("x", &[1.0]).await.expect("x")
        };
        let store = RedbStore::open(&path, 1).expect("reopen");
        let second = store.find_or_create_entity("y", &[1.0]).await.expect("y");
        assert!(second > first);
    }

    #[tokio::test]
    async fn dimension_mismatch_leaves_file_untouched() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("kg.redb");
        drop(RedbStore::open(&path, 3).expect("create"));

        assert!(matches!(
            RedbStore::open(&path, 4),
            Err(TesseraError::DimensionMismatch {
                stored: 3,
                configured: 4
            })
        ));
        assert!(RedbStore::open(&path, 3).is_ok());
    }

    #[tokio::test]
    async fn clearing_unknown_fact_fails() {
        let temp = tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("kg.redb"), 1).expect("open");
        assert!(matches!(
            store.clear_scope_tag(FactId(99)).await,
            Err(TesseraError::FactNotFound(FactId(99)))
        ));
    }

    #[tokio::test]
    async fn global_tag_registers_candidate() {
        let temp = tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("kg.redb"), 1).expect("open");
        let a = store.find_or_create_entity("svc", &[1.0]).await.expect("a");
        let b = store.find_or_create_entity("rust", &[1.0]).await.expect("b");

        let mut tagged = fact(a, "written_in", b, vec![1.0]);
        tagged.scope = Some(ScopeTag::Global);
        let id = store.store_fact(tagged).await.expect("store");
        store
            .store_fact(fact(a, "todo", b, vec![1.0]))
            .await
            .expect("store");

        let candidates = store
            .candidate_facts()
            .await
            .expect("candidates")
            .expect("supported");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, FactId(id.0));
        assert_eq!(candidates[0].subject, "svc");

        store.clear_scope_tag(id).await.expect("clear");
        let after = store
            .candidate_facts()
            .await
            .expect("candidates")
            .expect("supported");
        assert!(after.is_empty());
        assert_eq!(store.stats().await.expect("stats").fact_count, 2);
    }
}
