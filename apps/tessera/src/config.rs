//! # Configuration
//!
//! `TesseraConfig` is read from a TOML file and threaded explicitly into store
//! construction. Sources are layered, later ones winning:
//!
//! 1. built-in defaults
//! 2. the TOML file (`--config`, else `TESSERA_CONFIG`, else `tessera.toml`)
//! 3. environment (`TESSERA_MODE`, `TESSERA_RATE_LIMIT`)
//! 4. CLI flags
//!
//! A missing default file is not an error; a missing explicit file is.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tessera_core::{BackendKind, StoreConfig, TesseraError};

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "tessera.toml";

/// Environment variable that may point at the config file.
pub const CONFIG_ENV: &str = "TESSERA_CONFIG";

// =============================================================================
// SECTIONS
// =============================================================================

/// Single store, or project + global layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Single,
    Dual,
}

impl FromStr for Mode {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "dual" => Ok(Self::Dual),
            other => Err(TesseraError::Config(format!(
                "unknown mode '{other}' (expected 'single' or 'dual')"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => f.write_str("single"),
            Self::Dual => f.write_str("dual"),
        }
    }
}

/// Embedding provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI-compatible `/v1/embeddings` endpoint (Ollama, OpenAI, ...).
    #[default]
    Http,
    /// Offline feature hashing.
    Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: Provider,
    pub url: String,
    pub model: String,
    pub dimension: usize,
    /// Name of the environment variable holding the API key, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Http,
            url: "http://localhost:11434/v1/embeddings".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
            api_key_env: Some("TESSERA_EMBEDDING_API_KEY".to_string()),
        }
    }
}

/// One physical layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub backend: BackendKind,
    pub path: PathBuf,
    /// Embedding override for this layer. Only the global layer uses it,
    /// when promoting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingConfig>,
}

impl LayerConfig {
    fn project_default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            path: PathBuf::from(".tessera/project.db"),
            embedding: None,
        }
    }

    /// Default global layer, kept in the user's home when one is known.
    #[must_use]
    pub fn global_default() -> Self {
        let base = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".tessera"))
            .unwrap_or_else(|| PathBuf::from(".tessera"));
        Self {
            backend: BackendKind::Redb,
            path: base.join("global.redb"),
            embedding: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Requests per second; 0 disables rate limiting.
    pub rate_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8420,
            rate_limit: 100,
        }
    }
}

// =============================================================================
// TOP LEVEL
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub mode: Mode,
    pub embedding: EmbeddingConfig,
    pub project: LayerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<LayerConfig>,
    pub server: ServerConfig,
}

impl Default for TesseraConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Single,
            embedding: EmbeddingConfig::default(),
            project: LayerConfig::project_default(),
            global: None,
            server: ServerConfig::default(),
        }
    }
}

impl TesseraConfig {
    /// Parse a TOML document. Unknown backend names fail here.
    pub fn from_toml_str(text: &str) -> Result<Self, TesseraError> {
        toml::from_str(text).map_err(|e| TesseraError::Config(e.to_string()))
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, TesseraError> {
        toml::to_string_pretty(self).map_err(|e| TesseraError::Config(e.to_string()))
    }

    /// Resolve the config file and apply the environment layer.
    pub fn load(explicit: Option<&Path>) -> Result<Self, TesseraError> {
        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(p) => (PathBuf::from(p), true),
                None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
            },
        };

        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                TesseraError::Config(format!("cannot read {}: {e}", path.display()))
            })?;
            let config = Self::from_toml_str(&text).map_err(|e| {
                TesseraError::Config(format!("{}: {e}", path.display()))
            })?;
            tracing::debug!(path = %path.display(), "loaded config file");
            config
        } else if required {
            return Err(TesseraError::Config(format!(
                "config file {} does not exist",
                path.display()
            )));
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), TesseraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("TESSERA_MODE") {
            self.mode = mode.parse()?;
        }
        if let Some(limit) = lookup("TESSERA_RATE_LIMIT") {
            self.server.rate_limit = limit.trim().parse().map_err(|_| {
                TesseraError::Config(format!("TESSERA_RATE_LIMIT '{limit}' is not a number"))
            })?;
        }
        Ok(())
    }

    /// Switch to dual mode, filling in a default global layer if absent.
    pub fn enable_dual(&mut self) {
        self.mode = Mode::Dual;
        if self.global.is_none() {
            self.global = Some(LayerConfig::global_default());
        }
    }

    /// Check cross-field rules.
    pub fn validate(&self) -> Result<(), TesseraError> {
        check_embedding("embedding", &self.embedding)?;
        if let Some(global) = &self.global
            && let Some(override_) = &global.embedding
        {
            check_embedding("global.embedding", override_)?;
            if override_.dimension != self.embedding.dimension {
                return Err(TesseraError::Config(format!(
                    "global.embedding.dimension {} differs from embedding.dimension {}; \
                     both layers are queried with one vector",
                    override_.dimension, self.embedding.dimension
                )));
            }
        }
        if self.mode == Mode::Dual {
            let Some(global) = &self.global else {
                return Err(TesseraError::Config(
                    "mode = \"dual\" requires a [global] section".to_string(),
                ));
            };
            if same_file(&self.project.path, &global.path) {
                return Err(TesseraError::Config(format!(
                    "project.path and global.path both point at {}; \
                     the two layers need separate stores",
                    global.path.display()
                )));
            }
        }
        Ok(())
    }

    /// Store config of the project (or only) layer.
    #[must_use]
    pub fn project_store(&self) -> StoreConfig {
        StoreConfig {
            backend: self.project.backend,
            path: self.project.path.clone(),
            dimension: self.embedding.dimension,
        }
    }

    /// Store config of the global layer, in dual mode.
    #[must_use]
    pub fn global_store(&self) -> Option<StoreConfig> {
        if self.mode != Mode::Dual {
            return None;
        }
        self.global.as_ref().map(|g| StoreConfig {
            backend: g.backend,
            path: g.path.clone(),
            dimension: self.embedding.dimension,
        })
    }

    /// Embedding settings used when writing into the global layer.
    #[must_use]
    pub fn global_embedding(&self) -> &EmbeddingConfig {
        self.global
            .as_ref()
            .and_then(|g| g.embedding.as_ref())
            .unwrap_or(&self.embedding)
    }
}

/// Lexical comparison, refined by canonical paths once both files exist.
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => {
            fn parts(p: &Path) -> Vec<std::path::Component<'_>> {
                p.components()
                    .filter(|c| *c != std::path::Component::CurDir)
                    .collect::<Vec<_>>()
            }
            parts(a) == parts(b)
        }
    }
}

fn check_embedding(section: &str, e: &EmbeddingConfig) -> Result<(), TesseraError> {
    if e.dimension == 0 {
        return Err(TesseraError::Config(format!(
            "{section}.dimension must be greater than zero"
        )));
    }
    if e.provider == Provider::Http && e.url.trim().is_empty() {
        return Err(TesseraError::Config(format!(
            "{section}.url is required for the http provider"
        )));
    }
    Ok(())
}
