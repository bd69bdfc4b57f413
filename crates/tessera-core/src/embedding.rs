//! # Embedding Boundary
//!
//! Text goes in, a fixed-dimension vector comes out. Providers that talk to a
//! model server live in the binary; this crate only ships `HashEmbedder`, a
//! deterministic offline provider for development and tests.

use crate::TesseraError;
use async_trait::async_trait;

/// A text-embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embed one string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, TesseraError>;
}

/// Feature-hashing embedder.
///
/// Every lower-cased alphanumeric token and every character trigram of each
/// token is hashed (FNV-1a) into one of `dimension` buckets with a hashed
/// sign. The result is L2-normalized, so texts sharing words score high under
/// cosine similarity. Identical input always yields identical output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// A hashing embedder producing `dimension`-length vectors.
    pub fn new(dimension: usize) -> Result<Self, TesseraError> {
        if dimension == 0 {
            return Err(TesseraError::Config(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    /// Synchronous core of `embed`.
    #[must_use]
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();

        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            self.add_feature(&mut v, token.as_bytes(), 1.0);

            let chars: Vec<char> = token.chars().collect();
            if chars.len() > 3 {
                for gram in chars.windows(3) {
                    let gram: String = gram.iter().collect();
                    self.add_feature(&mut v, gram.as_bytes(), 0.5);
                }
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let bucket = (h % self.dimension as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        if let Some(slot) = v.get_mut(bucket) {
            *slot += sign * weight;
        }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, TesseraError> {
        Ok(self.embed_sync(text))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(PRIME))
}
