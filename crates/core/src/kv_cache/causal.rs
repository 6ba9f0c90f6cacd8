use candle_core::Tensor;

use super::error::CacheError;
use super::policy::{AttentionCache, CachePolicy};
use super::store::KvStore;

/// Full-history cache for global attention layers. Nothing is evicted.
#[derive(Debug, Default)]
pub struct CausalCache {
    capacity: Option<usize>,
    store: KvStore,
}

impl CausalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse appends that would hold more than `capacity` positions.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            store: KvStore::new(),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn check_capacity(&self, requested: usize) -> Result<(), CacheError> {
        match self.capacity {
            Some(capacity) if requested > capacity => Err(CacheError::CapacityExceeded {
                capacity,
                requested,
            }),
            _ => Ok(()),
        }
    }
}

impl AttentionCache for CausalCache {
    fn policy(&self) -> CachePolicy {
        CachePolicy::Causal
    }

    fn store(&self) -> &KvStore {
        &self.store
    }

    fn append(
        &mut self,
        positions: &[usize],
        keys: &Tensor,
        values: &Tensor,
    ) -> Result<(), CacheError> {
        self.check_capacity(self.store.len() + positions.len())?;
        self.store.append(positions, keys, values)
    }

    fn admit(&self, state: KvStore) -> Result<KvStore, CacheError> {
        self.check_capacity(state.len())?;
        Ok(state)
    }

    fn install(&mut self, state: KvStore) {
        self.store = state;
    }

    fn clear(&mut self) {
        self.store.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_cache::IdentityShift;
    use candle_core::{DType, Device};

    fn kv(n: usize) -> Tensor {
        Tensor::zeros((n, 2, 4), DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn keeps_full_history() {
        let mut cache = CausalCache::new();
        let positions: Vec<usize> = (0..100).collect();
        cache.append(&positions, &kv(100), &kv(100)).unwrap();
        assert_eq!(cache.len(), 100);
        assert!(cache.contains(0));
        assert_eq!(cache.policy(), CachePolicy::Causal);
    }

    #[test]
    fn capacity_exceeded_is_reported() {
        let mut cache = CausalCache::with_capacity(4);
        cache.append(&[0, 1, 2], &kv(3), &kv(3)).unwrap();
        let err = cache.append(&[3, 4], &kv(2), &kv(2)).unwrap_err();
        assert!(matches!(
            err,
            CacheError::CapacityExceeded {
                capacity: 4,
                requested: 5
            }
        ));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn remove_closes_gap() {
        let mut cache = CausalCache::new();
        cache.append(&[0, 1, 2, 3, 4], &kv(5), &kv(5)).unwrap();
        let staged = cache.remove(0, 1, 3, &IdentityShift).unwrap();
        cache.install(staged);
        assert_eq!(cache.store().positions(), &[0, 1, 2]);
    }

    #[test]
    fn clear_empties() {
        let mut cache = CausalCache::new();
        cache.append(&[0], &kv(1), &kv(1)).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.read().is_none());
    }
}
