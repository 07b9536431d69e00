//! Embedding Service
//!
//! Generate fixed-size embeddings for memory facts and recall queries.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Trait for embedding services
pub trait Embedder: Send + Sync {
    /// Generate embedding for text
    fn embed(&self, text: &str) -> Vec<f32>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;
}

/// Lowercased alphanumeric tokens (underscores kept, so block ids stay whole)
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Hashed bag-of-tokens embedding
///
/// Each token is hashed (FNV-1a) into one of `dimension` buckets, bucket
/// counts are accumulated and the vector is L2-normalized. Empty input
/// yields the zero vector.
pub struct TokenEmbedding {
    dimension: usize,
    cache: RwLock<HashMap<String, Vec<f32>>>,
    cache_size_limit: usize,
}

impl TokenEmbedding {
    /// Create a new token embedding
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            cache: RwLock::new(HashMap::new()),
            cache_size_limit: 4096,
        }
    }

    fn hash_token(token: &str) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in token.as_bytes() {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }

    fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let idx = (Self::hash_token(&token) % self.dimension as u64) as usize;
            embedding[idx] += 1.0;
        }

        // Normalize
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        embedding
    }

    /// Number of cached embeddings
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}

impl Default for TokenEmbedding {
    fn default() -> Self {
        Self::new(crate::DEFAULT_EMBEDDING_DIMENSION)
    }
}

impl Embedder for TokenEmbedding {
    fn embed(&self, text: &str) -> Vec<f32> {
        // Check cache
        {
            let cache = self.cache.read();
            if let Some(embedding) = cache.get(text) {
                return embedding.clone();
            }
        }

        let embedding = self.generate_embedding(text);

        {
            let mut cache = self.cache.write();
            if cache.len() < self.cache_size_limit {
                cache.insert(text.to_string(), embedding.clone());
            }
        }

        embedding
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cosine similarity; both inputs are expected to be normalized, but the
/// norms are recomputed so arbitrary vectors are safe.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}
