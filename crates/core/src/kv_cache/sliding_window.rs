use candle_core::Tensor;

use super::error::CacheError;
use super::policy::{AttentionCache, CachePolicy};
use super::store::KvStore;

/// Keeps only positions `p` with `p > newest - window`.
///
/// Eviction happens on every append and on every admitted shift, so a read
/// never sees more than `window` rows.
#[derive(Debug)]
pub struct SlidingWindowCache {
    window: usize,
    store: KvStore,
}

impl SlidingWindowCache {
    pub fn new(window: usize) -> Result<Self, CacheError> {
        if window == 0 {
            return Err(CacheError::InvalidWindow(window));
        }
        Ok(Self {
            window,
            store: KvStore::new(),
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    fn evict(&self, store: &mut KvStore) -> Result<(), CacheError> {
        if let Some(newest) = store.newest() {
            store.retain_from((newest + 1).saturating_sub(self.window))?;
        }
        Ok(())
    }
}

impl AttentionCache for SlidingWindowCache {
    fn policy(&self) -> CachePolicy {
        CachePolicy::Windowed {
            window: self.window,
        }
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
        let mut next = self.store.clone();
        next.append(positions, keys, values)?;
        self.evict(&mut next)?;
        self.store = next;
        Ok(())
    }

    fn admit(&self, mut state: KvStore) -> Result<KvStore, CacheError> {
        self.evict(&mut state)?;
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
    fn zero_window_rejected() {
        assert!(matches!(
            SlidingWindowCache::new(0),
            Err(CacheError::InvalidWindow(0))
        ));
    }

    #[test]
    fn append_evicts_beyond_window() {
        let mut cache = SlidingWindowCache::new(4).unwrap();
        let positions: Vec<usize> = (0..6).collect();
        cache.append(&positions, &kv(6), &kv(6)).unwrap();
        assert_eq!(cache.store().positions(), &[2, 3, 4, 5]);
        assert!(!cache.contains(1));

        cache.append(&[6], &kv(1), &kv(1)).unwrap();
        assert_eq!(cache.store().positions(), &[3, 4, 5, 6]);
        assert_eq!(cache.read().unwrap().keys.dims(), &[4, 2, 4]);
    }

    #[test]
    fn failed_append_leaves_state() {
        let mut cache = SlidingWindowCache::new(4).unwrap();
        cache.append(&[0, 1], &kv(2), &kv(2)).unwrap();
        assert!(cache.append(&[1], &kv(1), &kv(1)).is_err());
        assert_eq!(cache.store().positions(), &[0, 1]);
    }

    #[test]
    fn forward_shift_slides_window() {
        let mut cache = SlidingWindowCache::new(3).unwrap();
        cache.append(&[0, 1, 2], &kv(3), &kv(3)).unwrap();
        let staged = cache.shift(0, 2, 5, &IdentityShift).unwrap();
        assert_eq!(staged.positions(), &[7]);
        assert_eq!(cache.len(), 3, "staging does not mutate");
        cache.install(staged);
        assert_eq!(cache.store().positions(), &[7]);
    }

    #[test]
    fn policy_reports_window() {
        let cache = SlidingWindowCache::new(16).unwrap();
        assert_eq!(cache.policy(), CachePolicy::Windowed { window: 16 });
        assert!(cache.is_empty());
    }
}
