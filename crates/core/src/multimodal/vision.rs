//! Vision tower seam.
//!
//! The encoder itself (SigLIP for Gemma3) runs outside this crate; the
//! pipeline only needs its patch embeddings.

use candle_core::{Result, Tensor};

/// A vision encoder that turns pixels into patch embeddings.
pub trait VisionTower: Send + Sync {
    /// `[batch, channels, size, size]` → `[batch, (size / patch)², hidden]`.
    fn forward(&self, pixel_values: &Tensor) -> Result<Tensor>;
}
