//! Offline feature-hashing embedder.
//!
//! Each lowercase alphanumeric word is hashed (FNV-1a) into one of `dims`
//! buckets with a hash-derived sign; the bag is L2-normalized. Texts that
//! share words land close together, which is enough for tests, CI, and
//! air-gapped smoke runs. No model download, no network.

use anyhow::Result;
use async_trait::async_trait;

use vecsync_core::embedding::{normalize, Embedder};

pub const DEFAULT_HASH_DIMS: usize = 256;

pub struct HashEmbedder {
    model: String,
    dims: usize,
}

impl HashEmbedder {
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            model: model.into(),
            dims: dims.max(1),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let h = fnv1a(word.to_lowercase().as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize(&mut v);
        v
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vecsync_core::embedding::cosine_similarity;

    #[test]
    fn deterministic_and_normalized() {
        let e = HashEmbedder::new("feature-hash", 64);
        let a = e.embed_one("The quick brown fox");
        assert_eq!(a, e.embed_one("the QUICK brown fox!"));
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_words_score_higher() {
        let e = HashEmbedder::new("feature-hash", 256);
        let q = e.embed_one("rust borrow checker");
        let near = e.embed_one("the borrow checker in rust rejects this");
        let far = e.embed_one("banana bread recipe with walnuts");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let e = HashEmbedder::new("feature-hash", 8);
        assert_eq!(e.embed_one("  ...  "), vec![0.0; 8]);
    }
}
