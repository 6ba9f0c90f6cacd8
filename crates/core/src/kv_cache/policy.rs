use std::fmt;

use candle_core::Tensor;

use super::error::CacheError;
use super::shift::KeyShifter;
use super::store::{CachedKv, KvStore};

/// Static attention-cache policy of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Only the most recent `window` positions stay visible.
    Windowed { window: usize },
    /// Full history stays visible.
    Causal,
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Windowed { window } => write!(f, "windowed({window})"),
            Self::Causal => f.write_str("causal"),
        }
    }
}

/// Per-layer K/V history under a fixed visibility policy.
///
/// Mutations that span layers are staged: `shift`/`remove` compute the next
/// state without touching `self`, and `install` swaps it in. The orchestrator
/// relies on this to apply a shift to every layer or to none.
pub trait AttentionCache: Send + Sync + fmt::Debug {
    fn policy(&self) -> CachePolicy;

    fn store(&self) -> &KvStore;

    fn append(
        &mut self,
        positions: &[usize],
        keys: &Tensor,
        values: &Tensor,
    ) -> Result<(), CacheError>;

    /// Apply this policy's retention rule to a staged state.
    fn admit(&self, state: KvStore) -> Result<KvStore, CacheError>;

    /// Install a state produced by [`shift`](Self::shift) or
    /// [`remove`](Self::remove). Never fails.
    fn install(&mut self, state: KvStore);

    fn clear(&mut self);

    fn read(&self) -> Option<CachedKv<'_>> {
        self.store().view()
    }

    fn shift(
        &self,
        layer: usize,
        begin: usize,
        offset: i64,
        shifter: &dyn KeyShifter,
    ) -> Result<KvStore, CacheError> {
        self.admit(self.store().shifted(layer, begin, offset, shifter)?)
    }

    /// Drop `[begin, end)` and close the gap.
    fn remove(
        &self,
        layer: usize,
        begin: usize,
        end: usize,
        shifter: &dyn KeyShifter,
    ) -> Result<KvStore, CacheError> {
        let gap = end.saturating_sub(begin) as i64;
        let pruned = self.store().without_range(begin, end)?;
        self.admit(pruned.shifted(layer, end, -gap, shifter)?)
    }

    fn len(&self) -> usize {
        self.store().len()
    }

    fn is_empty(&self) -> bool {
        self.store().is_empty()
    }

    fn contains(&self, position: usize) -> bool {
        self.store().contains(position)
    }
}
