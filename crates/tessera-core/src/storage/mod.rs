//! # Storage Backends
//!
//! Two interchangeable physical stores behind `FactStore`:
//! - `SqliteStore`: relational tables plus out-of-band vector tables
//! - `RedbStore`: graph-native nodes and edges in a single redb file
//!
//! Which one backs a layer is a configuration choice (`BackendKind`).

pub mod redb_store;
pub mod sqlite_store;

pub use redb_store::RedbStore;
pub use sqlite_store::SqliteStore;

use crate::TesseraError;
use crate::store::FactStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Physical engine selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendKind {
    /// Relational engine with vector tables.
    Sqlite,
    /// Graph-native engine.
    Redb,
}

impl FromStr for BackendKind {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "relational" => Ok(Self::Sqlite),
            "redb" | "graph" => Ok(Self::Redb),
            _ => Err(TesseraError::UnknownBackend(s.to_string())),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = TesseraError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BackendKind> for String {
    fn from(kind: BackendKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => f.write_str("sqlite"),
            Self::Redb => f.write_str("redb"),
        }
    }
}

/// Everything needed to open one physical store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub path: PathBuf,
    /// Embedding dimension the store is locked to.
    pub dimension: usize,
}

/// Open the store described by `config`.
///
/// Fails fast with `DimensionMismatch` if the file was created with a
/// different dimension.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn FactStore>, TesseraError> {
    if config.dimension == 0 {
        return Err(TesseraError::Config(
            "embedding dimension must be greater than zero".to_string(),
        ));
    }
    match config.backend {
        BackendKind::Sqlite => Ok(Arc::new(
            SqliteStore::open(&config.path, config.dimension).await?,
        )),
        BackendKind::Redb => {
            let path = config.path.clone();
            let dimension = config.dimension;
            let store = tokio::task::spawn_blocking(move || RedbStore::open(path, dimension)).await??;
            Ok(Arc::new(store))
        }
    }
}
