mod causal;
pub mod config;
mod error;
mod policy;
mod shift;
mod sliding_window;
mod store;

pub use causal::CausalCache;
pub use config::CacheConfig;
pub use error::CacheError;
pub use policy::{AttentionCache, CachePolicy};
pub use shift::{IdentityShift, KeyShifter};
pub use sliding_window::SlidingWindowCache;
pub use store::{CachedKv, KvStore};

use std::sync::Arc;

use candle_core::Tensor;
use tracing::{info, trace};

/// Top-level coordinator: one [`AttentionCache`] per layer, bound to its
/// policy at construction.
///
/// Shift and remove are applied to all layers or to none, so position
/// bookkeeping never diverges between windowed and causal layers.
pub struct CacheOrchestrator {
    layers: Vec<Box<dyn AttentionCache>>,
    shifter: Arc<dyn KeyShifter>,
}

impl CacheOrchestrator {
    pub fn new(config: &CacheConfig, shifter: Arc<dyn KeyShifter>) -> Result<Self, CacheError> {
        let mut layers: Vec<Box<dyn AttentionCache>> = Vec::with_capacity(config.num_layers);
        for layer in 0..config.num_layers {
            let cache: Box<dyn AttentionCache> = match config.policy_for_layer(layer) {
                CachePolicy::Windowed { window } => Box::new(SlidingWindowCache::new(window)?),
                CachePolicy::Causal => match config.causal_capacity {
                    Some(capacity) => Box::new(CausalCache::with_capacity(capacity)),
                    None => Box::new(CausalCache::new()),
                },
            };
            layers.push(cache);
        }
        let causal = layers
            .iter()
            .filter(|c| c.policy() == CachePolicy::Causal)
            .count();
        info!(
            num_layers = config.num_layers,
            windowed = config.num_layers - causal,
            causal,
            window = config.sliding_window,
            "Built attention cache layout"
        );
        Ok(Self { layers, shifter })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, layer: usize) -> Result<&dyn AttentionCache, CacheError> {
        self.layers
            .get(layer)
            .map(|c| c.as_ref())
            .ok_or(CacheError::LayerOutOfRange {
                layer,
                num_layers: self.layers.len(),
            })
    }

    fn layer_mut(&mut self, layer: usize) -> Result<&mut Box<dyn AttentionCache>, CacheError> {
        let num_layers = self.layers.len();
        self.layers
            .get_mut(layer)
            .ok_or(CacheError::LayerOutOfRange { layer, num_layers })
    }

    pub fn policy(&self, layer: usize) -> Result<CachePolicy, CacheError> {
        Ok(self.layer(layer)?.policy())
    }

    /// Append `[tokens, kv_heads, head_dim]` rows to `layer` at `positions`.
    pub fn append(
        &mut self,
        layer: usize,
        positions: &[usize],
        keys: &Tensor,
        values: &Tensor,
    ) -> Result<(), CacheError> {
        let cache = self.layer_mut(layer)?;
        trace!(layer, policy = %cache.policy(), tokens = positions.len(), "Cache append");
        cache.append(positions, keys, values)
    }

    /// Keys and values visible to `layer`, or `None` when nothing is cached.
    pub fn read(&self, layer: usize) -> Result<Option<CachedKv<'_>>, CacheError> {
        let cache = self.layer(layer)?;
        trace!(layer, policy = %cache.policy(), "Cache read");
        Ok(cache.read())
    }

    /// Move every cached position `>= begin` by `offset` on every layer.
    ///
    /// Every layer sees the same position mapping. Windowed layers then
    /// re-apply their window to the new newest position, so a positive
    /// shift can evict rows there that causal layers keep.
    pub fn shift(&mut self, begin: usize, offset: i64) -> Result<(), CacheError> {
        let staged = self
            .layers
            .iter()
            .enumerate()
            .map(|(layer, cache)| cache.shift(layer, begin, offset, self.shifter.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.install(staged);
        Ok(())
    }

    /// Drop positions in `[begin, end)` on every layer and shift later
    /// positions down by `end - begin`.
    pub fn remove(&mut self, begin: usize, end: usize) -> Result<(), CacheError> {
        if end <= begin {
            return Ok(());
        }
        let staged = self
            .layers
            .iter()
            .enumerate()
            .map(|(layer, cache)| cache.remove(layer, begin, end, self.shifter.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.install(staged);
        Ok(())
    }

    fn install(&mut self, staged: Vec<KvStore>) {
        for (cache, state) in self.layers.iter_mut().zip(staged) {
            cache.install(state);
        }
    }

    pub fn clear(&mut self) {
        for cache in &mut self.layers {
            cache.clear();
        }
    }
}

impl std::fmt::Debug for CacheOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOrchestrator")
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}
