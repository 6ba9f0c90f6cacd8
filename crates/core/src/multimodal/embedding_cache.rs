//! Content-hash-keyed LRU cache for projected image embeddings.
//!
//! Repeated images (multi-turn conversations, the same image referenced
//! twice in one prompt) hash identically, so the vision tower and projector
//! can be skipped on a hit. Eviction is LRU.
//!
//! Thread-safety: not `Sync` by itself. The model wraps it in a `Mutex`.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use super::inputs::ImageEmbedding;

pub const DEFAULT_EMBEDDING_CACHE_SIZE: usize = 32;

pub struct EmbeddingCache {
    entries: HashMap<u64, ImageEmbedding>,
    /// Oldest hash at the front.
    order: VecDeque<u64>,
    capacity: usize,
}

impl EmbeddingCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Return a cached embedding, promoting it to most-recently-used.
    pub fn get(&mut self, hash: u64) -> Option<ImageEmbedding> {
        let hit = self.entries.get(&hash).cloned()?;
        self.touch(hash);
        Some(hit)
    }

    pub fn insert(&mut self, embedding: ImageEmbedding) {
        if self.capacity == 0 {
            return;
        }
        let hash = embedding.hash;
        if self.entries.insert(hash, embedding).is_some() {
            self.touch(hash);
            return;
        }
        if self.entries.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
                debug!(hash = evicted, "Evicted image embedding");
            }
        }
        self.order.push_back(hash);
    }

    fn touch(&mut self, hash: u64) {
        self.order.retain(|h| *h != hash);
        self.order.push_back(hash);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};

    fn embedding(hash: u64) -> ImageEmbedding {
        let t = Tensor::zeros((1, 4, 8), DType::F32, &Device::Cpu).unwrap();
        ImageEmbedding::new(t, hash)
    }

    #[test]
    fn hit_after_insert() {
        let mut cache = EmbeddingCache::new(4);
        cache.insert(embedding(1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(1).map(|e| e.hash), Some(1));
        assert!(cache.get(2).is_none());
    }

    #[test]
    fn replacement_does_not_grow() {
        let mut cache = EmbeddingCache::new(4);
        cache.insert(embedding(1));
        cache.insert(embedding(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let mut cache = EmbeddingCache::new(2);
        cache.insert(embedding(1));
        cache.insert(embedding(2));
        cache.insert(embedding(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_none(), "LRU entry should be evicted");
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn access_promotes_to_mru() {
        let mut cache = EmbeddingCache::new(2);
        cache.insert(embedding(1));
        cache.insert(embedding(2));
        cache.get(1);
        cache.insert(embedding(3));
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
    }

    #[test]
    fn zero_capacity_disables() {
        let mut cache = EmbeddingCache::new(0);
        cache.insert(embedding(1));
        assert!(cache.is_empty());
    }
}
