//! Embedding providers.
//!
//! The store never embeds text itself; it is handed an [`Embedder`] at
//! construction. The HTTP-backed embedder lives next to the chat client in
//! `medsig-ai`. [`HashingEmbedder`] is an offline, deterministic stand-in.

use async_trait::async_trait;

use crate::StoreError;

/// Dense text embedder shared by builds and queries.
///
/// Queries must be embedded by the same embedder that built the index,
/// otherwise distances are meaningless.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Short identifier recorded in index metadata.
    fn name(&self) -> &str;

    /// Embed a batch of texts, one vector per input, in order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| StoreError::Embedding("embedder returned no vector".into()))
    }
}

pub const DEFAULT_HASHING_DIM: usize = 256;

/// Feature-hashing embedder over lowercase words and character trigrams.
///
/// Texts sharing tokens land close together, which is enough to rank
/// abbreviated sigs against each other without a model server.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
    name: String,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self {
            dim,
            name: format!("hashing-{dim}"),
        }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        let lower = text.to_lowercase();

        for word in lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            self.bump(&mut v, word.as_bytes(), 1.0);

            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for tri in padded.windows(3) {
                let s: String = tri.iter().collect();
                self.bump(&mut v, s.as_bytes(), 0.5);
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    fn bump(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let slot = (h % self.dim as u64) as usize;
        let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
        v[slot] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIM)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    /// `hashing-<dim>`: vectors of different widths never share an index.
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Cosine similarity of two equal-length vectors; 0.0 if either is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
