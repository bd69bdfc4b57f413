//! # Vector Math
//!
//! Cosine similarity and the little-endian `f32` blob encoding used by the
//! relational backend's vector tables.
//!
//! Search is brute force: every stored vector is scored against the query and
//! the best `k` are kept. That is adequate for the per-project and per-user
//! fact counts this store targets.

use crate::TesseraError;

/// Cosine similarity in `[-1, 1]`, i.e. `1 - cosine_distance`.
///
/// Returns `0.0` when lengths differ or either vector has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Score every candidate against `query` and keep the `k` most similar,
/// most similar first. Ties keep candidate order.
pub fn top_k<'a, I>(query: &[f32], candidates: I, k: usize) -> Vec<(u64, f32)>
where
    I: IntoIterator<Item = (u64, &'a [f32])>,
{
    if k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(u64, f32)> = candidates
        .into_iter()
        .map(|(id, v)| (id, cosine_similarity(query, v)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    scored
}

/// Encode a vector as little-endian `f32` bytes.
#[must_use]
pub fn encode(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Decode little-endian `f32` bytes.
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, TesseraError> {
    if bytes.len() % 4 != 0 {
        return Err(TesseraError::Serialization(format!(
            "corrupt embedding: byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Reject vectors that do not have the store's locked length.
pub fn check_dimension(v: &[f32], expected: usize) -> Result<(), TesseraError> {
    if v.len() != expected {
        return Err(TesseraError::InvalidEmbedding {
            expected,
            actual: v.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let v = [0.3, -0.2, 0.9];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_score_minus_one() {
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn top_k_orders_and_truncates() {
        let a = [1.0, 0.0];
        let b = [0.7, 0.7];
        let c = [0.0, 1.0];
        let hits = top_k(&[1.0, 0.0], [(1, &c[..]), (2, &a[..]), (3, &b[..])], 2);
        let ids: Vec<u64> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn top_k_returns_everything_when_short() {
        let a = [1.0, 0.0];
        assert_eq!(top_k(&[1.0, 0.0], [(1, &a[..])], 10).len(), 1);
        assert!(top_k(&[1.0, 0.0], [(1, &a[..])], 0).is_empty());
    }

    #[test]
    fn blob_encoding_is_little_endian() {
        let bytes = encode(&[1.0]);
        assert_eq!(bytes, 1.0f32.to_le_bytes().to_vec());
        assert_eq!(decode(&bytes).expect("decode"), vec![1.0]);
    }

    #[test]
    fn decode_rejects_truncated_blob() {
        assert!(matches!(
            decode(&[0, 0, 0]),
            Err(TesseraError::Serialization(_))
        ));
    }

    #[test]
    fn check_dimension_reports_both_lengths() {
        let err = check_dimension(&[0.0; 3], 4).expect_err("wrong length");
        assert!(matches!(
            err,
            TesseraError::InvalidEmbedding {
                expected: 4,
                actual: 3
            }
        ));
    }
}
