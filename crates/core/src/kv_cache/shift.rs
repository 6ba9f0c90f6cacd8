use candle_core::{Result, Tensor};

/// Re-rotates cached keys when their positions move.
///
/// Implemented by whoever owns the rotary embedding. The cache only knows
/// positions; it never interprets key contents.
pub trait KeyShifter: Send + Sync {
    /// `keys` is `[rows, num_kv_heads, head_dim]`; every row moves by `offset`.
    fn shift_keys(&self, layer: usize, keys: &Tensor, offset: i64) -> Result<Tensor>;
}

/// Leaves keys untouched. For models without positional key encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityShift;

impl KeyShifter for IdentityShift {
    fn shift_keys(&self, _layer: usize, keys: &Tensor, _offset: i64) -> Result<Tensor> {
        Ok(keys.clone())
    }
}
