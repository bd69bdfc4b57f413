//! # SQLite-backed Fact Store
//!
//! The relational backend. `entities` and `facts` are ordinary tables;
//! embeddings live out-of-band in `entity_vectors` / `fact_vectors`, keyed by
//! the same row id and stored as little-endian `f32` blobs. Graph expansion
//! is a recursive CTE over `facts`, following edges in both directions.

use crate::primitives::DIMENSION_KEY;
use crate::store::{FactStore, name_matches, resolve_fuzzy};
use crate::vector::{self, check_dimension, top_k};
use crate::{
    CandidateFact, Entity, EntityId, EntitySummary, FactId, GraphFact, GraphResult, NewFact,
    ScopeTag, SearchHit, StoreStats, TesseraError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS entities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS facts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        subject_id INTEGER NOT NULL REFERENCES entities(id),
        predicate TEXT NOT NULL,
        object_id INTEGER NOT NULL REFERENCES entities(id),
        content TEXT NOT NULL DEFAULT '',
        context TEXT NOT NULL DEFAULT '',
        source TEXT NOT NULL DEFAULT '',
        scope_candidate TEXT NOT NULL DEFAULT 'none'
            CHECK (scope_candidate IN ('global', 'project', 'none')),
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_facts_subject ON facts(subject_id);
    CREATE INDEX IF NOT EXISTS idx_facts_object ON facts(object_id);
    CREATE INDEX IF NOT EXISTS idx_facts_scope ON facts(scope_candidate);

    CREATE TABLE IF NOT EXISTS entity_vectors (
        entity_id INTEGER PRIMARY KEY NOT NULL REFERENCES entities(id),
        embedding BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS fact_vectors (
        fact_id INTEGER PRIMARY KEY NOT NULL REFERENCES facts(id),
        embedding BLOB NOT NULL
    );
"#;

/// Entities reachable from `?1` in at most `?2` hops, in either direction.
const REACHABLE_CTE: &str = r#"
    WITH RECURSIVE reachable(entity_id, depth) AS (
        SELECT ?1, 0
        UNION
        SELECT
            CASE
                WHEN f.subject_id = r.entity_id THEN f.object_id
                ELSE f.subject_id
            END,
            r.depth + 1
        FROM reachable r
        JOIN facts f ON f.subject_id = r.entity_id OR f.object_id = r.entity_id
        WHERE r.depth < ?2
    )
"#;

type CandidateRow = (i64, String, String, String, String, String, String, String);

fn parse_time(s: &str) -> Result<DateTime<Utc>, TesseraError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TesseraError::Serialization(format!("bad timestamp '{s}': {e}")))
}

fn to_id(id: u64) -> Result<i64, TesseraError> {
    i64::try_from(id).map_err(|_| TesseraError::InvalidInput(format!("id {id} out of range")))
}

fn from_id(id: i64) -> Result<u64, TesseraError> {
    u64::try_from(id).map_err(|_| TesseraError::Storage(format!("negative row id {id}")))
}

/// A relational fact store backed by one SQLite file.
///
/// Reads go straight to the pool. Writes take `write_gate` first: a deferred
/// transaction that reads before writing cannot upgrade its lock while
/// another connection of the pool is writing.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
    path: PathBuf,
    dimension: usize,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating the schema and
    /// locking the embedding dimension.
    pub async fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self, TesseraError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        let mut tx = pool.begin().await?;
        let stored: Option<(String,)> =
            sqlx::query_as("SELECT value FROM store_meta WHERE key = ?")
                .bind(DIMENSION_KEY)
                .fetch_optional(&mut *tx)
                .await?;
        match stored {
            None => {
                sqlx::query("INSERT INTO store_meta (key, value) VALUES (?, ?)")
                    .bind(DIMENSION_KEY)
                    .bind(dimension.to_string())
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
            Some((value,)) => {
                let stored: usize = value.parse().map_err(|_| {
                    TesseraError::Serialization(format!("corrupt dimension record '{value}'"))
                })?;
                tx.rollback().await?;
                if stored != dimension {
                    pool.close().await;
                    return Err(TesseraError::DimensionMismatch {
                        stored,
                        configured: dimension,
                    });
                }
            }
        }

        tracing::info!(path = %path.display(), dimension, "opened sqlite store");
        Ok(Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
            path,
            dimension,
        })
    }

    /// Locked embedding dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn names_by_id(&self) -> Result<Vec<(i64, String)>, TesseraError> {
        Ok(sqlx::query_as("SELECT id, name FROM entities ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }
}

#[async_trait]
impl FactStore for SqliteStore {
    async fn find_or_create_entity(
        &self,
        name: &str,
        embedding: &[f32],
    ) -> Result<EntityId, TesseraError> {
        check_dimension(embedding, self.dimension)?;

        let _write = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO entities (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        let (id,): (i64,) = sqlx::query_as("SELECT id FROM entities WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO entity_vectors (entity_id, embedding) VALUES (?, ?)
             ON CONFLICT(entity_id) DO UPDATE SET embedding = excluded.embedding",
        )
        .bind(id)
        .bind(vector::encode(embedding))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::debug!(entity = id, name, "entity written");
        Ok(EntityId(from_id(id)?))
    }

    async fn store_fact(&self, fact: NewFact) -> Result<FactId, TesseraError> {
        check_dimension(&fact.embedding, self.dimension)?;
        let scope = fact.scope.unwrap_or_default();

        let _write = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;
        for entity in [fact.subject, fact.object] {
            let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM entities WHERE id = ?")
                .bind(to_id(entity.0)?)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(TesseraError::ReferentialIntegrity(entity));
            }
        }

        let result = sqlx::query(
            "INSERT INTO facts
                (subject_id, predicate, object_id, content, context, source, scope_candidate, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(to_id(fact.subject.0)?)
        .bind(&fact.predicate)
        .bind(to_id(fact.object.0)?)
        .bind(&fact.content)
        .bind(&fact.context)
        .bind(&fact.source)
        .bind(scope.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        sqlx::query("INSERT INTO fact_vectors (fact_id, embedding) VALUES (?, ?)")
            .bind(id)
            .bind(vector::encode(&fact.embedding))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(fact = id, predicate = %fact.predicate, scope = %scope, "fact appended");
        Ok(FactId(from_id(id)?))
    }

    async fn search_facts(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, TesseraError> {
        check_dimension(query, self.dimension)?;

        let rows: Vec<(i64, Vec<u8>)> =
            sqlx::query_as("SELECT fact_id, embedding FROM fact_vectors ORDER BY fact_id")
                .fetch_all(&self.pool)
                .await?;
        let mut vectors = Vec::with_capacity(rows.len());
        for (id, blob) in rows {
            vectors.push((from_id(id)?, vector::decode(&blob)?));
        }
        let ranked = top_k(
            query,
            vectors.iter().map(|(id, v)| (*id, v.as_slice())),
            limit,
        );

        let mut hits = Vec::with_capacity(ranked.len());
        for (id, score) in ranked {
            let row: Option<(String, String, String, String, String, String)> = sqlx::query_as(
                "SELECT s.name, f.predicate, o.name, f.content, f.context, f.source
                 FROM facts f
                 JOIN entities s ON s.id = f.subject_id
                 JOIN entities o ON o.id = f.object_id
                 WHERE f.id = ?",
            )
            .bind(to_id(id)?)
            .fetch_optional(&self.pool)
            .await?;
            if let Some((subject, predicate, object, content, context, source)) = row {
                hits.push(SearchHit {
                    subject,
                    predicate,
                    object,
                    content,
                    context,
                    source,
                    score,
                    layer: None,
                });
            }
        }
        Ok(hits)
    }

    async fn graph_traverse(
        &self,
        entity_query: &str,
        depth: usize,
    ) -> Result<Option<GraphResult>, TesseraError> {
        let names = self.names_by_id().await?;
        let Some((start, matched)) = resolve_fuzzy(
            names
                .iter()
                .filter_map(|(id, name)| u64::try_from(*id).ok().map(|id| (EntityId(id), name.as_str()))),
            entity_query,
        ) else {
            return Ok(None);
        };
        let start_id = to_id(start.0)?;
        let depth = i64::try_from(depth).unwrap_or(i64::MAX);

        let reachable: Vec<(i64,)> = sqlx::query_as(&format!(
            "{REACHABLE_CTE} SELECT DISTINCT entity_id FROM reachable"
        ))
        .bind(start_id)
        .bind(depth)
        .fetch_all(&self.pool)
        .await?;

        let lookup: BTreeMap<i64, &str> = names.iter().map(|(id, n)| (*id, n.as_str())).collect();
        let connected: BTreeSet<String> = reachable
            .iter()
            .filter(|(id,)| *id != start_id)
            .filter_map(|(id,)| lookup.get(id).map(|n| (*n).to_string()))
            .collect();

        let rows: Vec<(String, String, String, String)> = sqlx::query_as(&format!(
            "{REACHABLE_CTE}
             SELECT s.name, f.predicate, o.name, f.content
             FROM facts f
             JOIN entities s ON s.id = f.subject_id
             JOIN entities o ON o.id = f.object_id
             WHERE f.subject_id IN (SELECT entity_id FROM reachable)
                OR f.object_id IN (SELECT entity_id FROM reachable)
             ORDER BY f.id"
        ))
        .bind(start_id)
        .bind(depth)
        .fetch_all(&self.pool)
        .await?;

        let facts = rows
            .into_iter()
            .map(|(subject, predicate, object, content)| GraphFact {
                subject,
                predicate,
                object,
                content,
            })
            .collect();

        Ok(Some(GraphResult {
            matched: matched.to_string(),
            connected,
            facts,
        }))
    }

    async fn list_entities(
        &self,
        pattern: Option<&str>,
    ) -> Result<Vec<EntitySummary>, TesseraError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT e.name, COUNT(f.id)
             FROM entities e
             LEFT JOIN facts f ON f.subject_id = e.id
             GROUP BY e.id
             ORDER BY e.name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter(|(name, _)| pattern.is_none_or(|p| name_matches(name, p)))
            .map(|(name, count)| EntitySummary {
                name,
                fact_count: u64::try_from(count).unwrap_or(0),
            })
            .collect())
    }

    async fn has_fact(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<bool, TesseraError> {
        let (found,): (i64,) = sqlx::query_as(
            "SELECT EXISTS (
                SELECT 1 FROM facts f
                JOIN entities s ON s.id = f.subject_id
                JOIN entities o ON o.id = f.object_id
                WHERE s.name = ? AND f.predicate = ? AND o.name = ?
             )",
        )
        .bind(subject)
        .bind(predicate)
        .bind(object)
        .fetch_one(&self.pool)
        .await?;
        Ok(found != 0)
    }

    async fn get_entity(&self, name: &str) -> Result<Option<Entity>, TesseraError> {
        let row: Option<(i64, String, String, Option<Vec<u8>>)> = sqlx::query_as(
            "SELECT e.id, e.name, e.created_at, v.embedding
             FROM entities e
             LEFT JOIN entity_vectors v ON v.entity_id = e.id
             WHERE e.name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, name, created_at, blob)| {
            Ok(Entity {
                id: EntityId(from_id(id)?),
                name,
                created_at: parse_time(&created_at)?,
                embedding: blob.as_deref().map(vector::decode).transpose()?.unwrap_or_default(),
            })
        })
        .transpose()
    }

    async fn candidate_facts(&self) -> Result<Option<Vec<CandidateFact>>, TesseraError> {
        let rows: Vec<CandidateRow> = sqlx::query_as(
            "SELECT f.id, s.name, f.predicate, o.name, f.content, f.context, f.source, f.created_at
             FROM facts f
             JOIN entities s ON s.id = f.subject_id
             JOIN entities o ON o.id = f.object_id
             WHERE f.scope_candidate = ?
             ORDER BY f.id",
        )
        .bind(ScopeTag::Global.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, subject, predicate, object, content, context, source, created_at) in rows {
            out.push(CandidateFact {
                id: FactId(from_id(id)?),
                subject,
                predicate,
                object,
                content,
                context,
                source,
                created_at: parse_time(&created_at)?,
            });
        }
        Ok(Some(out))
    }

    async fn clear_scope_tag(&self, fact: FactId) -> Result<(), TesseraError> {
        let _write = self.write_gate.lock().await;
        let result = sqlx::query("UPDATE facts SET scope_candidate = ? WHERE id = ?")
            .bind(ScopeTag::None.as_str())
            .bind(to_id(fact.0)?)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TesseraError::FactNotFound(fact));
        }
        tracing::debug!(fact = fact.0, "scope tag cleared");
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, TesseraError> {
        let (entities, facts, candidates): (i64, i64, i64) = sqlx::query_as(
            "SELECT
                (SELECT COUNT(*) FROM entities),
                (SELECT COUNT(*) FROM facts),
                (SELECT COUNT(*) FROM facts WHERE scope_candidate = 'global')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StoreStats {
            entity_count: u64::try_from(entities).unwrap_or(0),
            fact_count: u64::try_from(facts).unwrap_or(0),
            candidate_count: u64::try_from(candidates).unwrap_or(0),
            dimension: self.dimension,
        })
    }

    async fn close(&self) -> Result<(), TesseraError> {
        if self.pool.is_closed() {
            return Ok(());
        }
        self.pool.close().await;
        tracing::info!(path = %self.path.display(), "closed sqlite store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn schema_is_created_once() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("kg.db");
        let store = SqliteStore::open(&path, 2).await.expect("open");
        store.close().await.expect("close");

        let reopened = SqliteStore::open(&path, 2).await.expect("open");
        assert_eq!(reopened.stats().await.expect("stats").dimension, 2);
    }

    #[tokio::test]
    async fn dimension_mismatch_on_reopen() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("kg.db");
        SqliteStore::open(&path, 3)
            .await
            .expect("open")
            .close()
            .await
            .expect("close");

        let err = SqliteStore::open(&path, 5).await.expect_err("mismatch");
        assert!(matches!(
            err,
            TesseraError::DimensionMismatch {
                stored: 3,
                configured: 5
            }
        ));
    }

    #[tokio::test]
    async fn unknown_entity_is_rejected() {
        let temp = tempdir().expect("temp dir");
        let store = SqliteStore::open(temp.path().join("kg.db"), 1)
            .await
            .expect("open");
        let a = store.find_or_create_entity("a", &[1.0]).await.expect("a");

        let err = store
            .store_fact(NewFact {
                subject: a,
                predicate: "uses".into(),
                object: EntityId(404),
                content: String::new(),
                context: String::new(),
                source: String::new(),
                embedding: vec![1.0],
                scope: None,
            })
            .await
            .expect_err("dangling object");
        assert!(matches!(err, TesseraError::ReferentialIntegrity(EntityId(404))));
        assert_eq!(store.stats().await.expect("stats").fact_count, 0);
    }

    #[tokio::test]
    async fn entity_embedding_is_replaced() {
        let temp = tempdir().expect("temp dir");
        let store = SqliteStore::open(temp.path().join("kg.db"), 2)
            .await
            .expect("open");
        store.find_or_create_entity("x", &[1.0, 0.0]).await.expect("first");
        store.find_or_create_entity("x", &[0.0, 1.0]).await.expect("second");

        let entity = store
            .get_entity("x")
            .await
            .expect("lookup")
            .expect("exists");
        assert_eq!(entity.embedding, vec![0.0, 1.0]);
        assert!(store.get_entity("X").await.expect("lookup").is_none());
    }
}
