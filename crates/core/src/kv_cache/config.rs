use super::CachePolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub num_layers: usize,
    /// Window length W for sliding-window layers.
    pub sliding_window: usize,
    /// Every `sliding_window_pattern`-th layer (1-based) is global; 0 makes
    /// all layers global.
    pub sliding_window_pattern: usize,
    /// Optional hard cap on positions held by a causal layer.
    pub causal_capacity: Option<usize>,
}

impl CacheConfig {
    pub fn new(num_layers: usize, sliding_window: usize, sliding_window_pattern: usize) -> Self {
        Self {
            num_layers,
            sliding_window,
            sliding_window_pattern,
            causal_capacity: None,
        }
    }

    pub fn with_causal_capacity(mut self, capacity: usize) -> Self {
        self.causal_capacity = Some(capacity);
        self
    }

    pub fn is_global_layer(&self, layer: usize) -> bool {
        self.sliding_window_pattern == 0 || (layer + 1) % self.sliding_window_pattern == 0
    }

    /// Static cache policy for `layer`.
    pub fn policy_for_layer(&self, layer: usize) -> CachePolicy {
        if self.is_global_layer(layer) {
            CachePolicy::Causal
        } else {
            CachePolicy::Windowed {
                window: self.sliding_window,
            }
        }
    }

    pub fn policies(&self) -> Vec<CachePolicy> {
        (0..self.num_layers)
            .map(|layer| self.policy_for_layer(layer))
            .collect()
    }
}
