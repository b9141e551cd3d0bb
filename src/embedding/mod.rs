//! Embedding provider boundary and vector helpers.
//!
//! The indexer never computes vectors itself: it talks to an
//! [`EmbeddingProvider`], which must be stable in dimensionality for a
//! given store instance. Changing the model (identity or dims) invalidates
//! the vector store and forces a full reindex.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::errors::EmbeddingError;

/// Swappable embedding backend.
pub trait EmbeddingProvider: Send + Sync {
    /// Model identity recorded in the vector store.
    fn model_id(&self) -> &str;

    /// Vector dimensionality. Must not change for a given model id.
    fn dims(&self) -> usize;

    /// Embed a batch of document texts.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a query. Defaults to embedding it like a document.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Permanent("provider returned no vector".to_string()))
    }
}

/// Embed with bounded retry on transient failures.
///
/// Permanent failures are returned immediately; transient ones are retried
/// up to `max_retries` additional attempts before giving up.
pub fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    max_retries: u32,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut attempt = 0;
    loop {
        match provider.embed(texts) {
            Ok(vectors) => return Ok(vectors),
            Err(EmbeddingError::Transient(msg)) if attempt < max_retries => {
                attempt += 1;
                warn!(
                    "Transient embedding failure (attempt {}/{}): {}",
                    attempt, max_retries, msg
                );
            }
            Err(e) => return Err(e),
        }
    }
}

static TOKEN_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]+").unwrap());

/// Lowercased identifier-preserving tokens, shared with the keyword store
/// so both retrieval paths see the same vocabulary.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_SPLIT
        .split(text)
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

/// Deterministic local provider based on token feature hashing.
///
/// Each token is hashed into one of `dims` buckets with a +/- sign, and the
/// resulting vector is L2-normalized. No network, no model downloads, fully
/// reproducible, which is what the default setup and the test suite use.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let bucket = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize % self.dims;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn model_id(&self) -> &str {
        "hashing-v1"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a blob written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; 0.0 for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: AtomicU32,
    }

    impl EmbeddingProvider for Flaky {
        fn model_id(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            2
        }
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(EmbeddingError::Transient("flaked".to_string()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[test]
    fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed(&["add two numbers".to_string()]).unwrap();
        let b = embedder.embed(&["add two numbers".to_string()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hashing_embedder_similar_text_is_closer() {
        let embedder = HashingEmbedder::new(256);
        let docs = embedder
            .embed(&[
                "return the sum of two values".to_string(),
                "parse xml configuration namespaces".to_string(),
            ])
            .unwrap();
        let query = embedder.embed_query("sum two values").unwrap();

        let close = cosine_similarity(&query, &docs[0]);
        let far = cosine_similarity(&query, &docs[1]);
        assert!(close > far, "overlapping tokens should score higher ({close} vs {far})");
    }

    #[test]
    fn test_blob_roundtrip() {
        let v = vec![1.0f32, -2.5, 3.125, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn test_retry_recovers_from_transient() {
        let provider = Flaky { failures: AtomicU32::new(2) };
        let texts = vec!["x".to_string()];
        let result = embed_with_retry(&provider, &texts, 3);
        assert!(result.is_ok());

        let provider = Flaky { failures: AtomicU32::new(5) };
        let result = embed_with_retry(&provider, &texts, 2);
        assert!(result.is_err(), "retries are bounded");
    }

    #[test]
    fn test_permanent_failure_not_retried() {
        struct Broken;
        impl EmbeddingProvider for Broken {
            fn model_id(&self) -> &str {
                "broken"
            }
            fn dims(&self) -> usize {
                2
            }
            fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                Err(EmbeddingError::Permanent("no model".to_string()))
            }
        }

        let result = embed_with_retry(&Broken, &["x".to_string()], 5);
        assert!(matches!(result, Err(EmbeddingError::Permanent(_))));
    }

    #[test]
    fn test_tokenize_splits_identifiers() {
        assert_eq!(
            tokenize("fn add_numbers(a: i32) -> i32"),
            vec!["fn", "add_numbers", "a", "i32", "i32"]
        );
    }
}
