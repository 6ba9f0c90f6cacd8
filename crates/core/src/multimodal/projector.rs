//! Gemma3 multi-modal projector.
//!
//! Maps vision tower outputs to the text embedding space:
//!
//! ```text
//! [batch, num_patches, vision_hidden]
//!   → AvgPool1d over the flattened patch sequence (kernel = stride = num_patches / 256)
//!   → Gemma RMSNorm (x / rms(x) * (1 + w))
//!   → x · Wᵀ, W stored [text_hidden, vision_hidden]
//! [batch, 256, text_hidden]
//! ```
//!
//! # Weight mapping
//!
//! - `mm_soft_emb_norm.weight` → `[vision_hidden]`
//! - `mm_input_projection.weight` → `[text_hidden, vision_hidden]`

use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::VarBuilder;

use super::inputs::MM_TOKENS_PER_IMAGE;

// ─── Gemma RMSNorm ──────────────────────────────────────────────────────────

struct SoftEmbNorm {
    weight: Tensor,
    eps: f64,
}

impl SoftEmbNorm {
    fn new(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get(size, "weight")?;
        Ok(Self { weight, eps })
    }
}

impl Module for SoftEmbNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let dtype = xs.dtype();
        let xs = xs.to_dtype(DType::F32)?;
        let variance = xs.sqr()?.mean_keepdim(D::Minus1)?;
        let xs_normed = xs.broadcast_div(&(variance + self.eps)?.sqrt()?)?;
        let scale = (&self.weight.to_dtype(DType::F32)? + 1.0)?;
        xs_normed.broadcast_mul(&scale)?.to_dtype(dtype)
    }
}

// ─── Projector ──────────────────────────────────────────────────────────────

pub struct Gemma3Projector {
    mm_soft_emb_norm: SoftEmbNorm,
    mm_input_projection: Tensor,
    pool_kernel: usize,
}

impl Gemma3Projector {
    pub fn new(
        vision_hidden: usize,
        text_hidden: usize,
        pool_kernel: usize,
        eps: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mm_soft_emb_norm = SoftEmbNorm::new(vision_hidden, eps, vb.pp("mm_soft_emb_norm"))?;
        let mm_input_projection =
            vb.get((text_hidden, vision_hidden), "mm_input_projection.weight")?;

        Ok(Self {
            mm_soft_emb_norm,
            mm_input_projection,
            pool_kernel,
        })
    }

    /// Input: `[batch, num_patches, vision_hidden]`
    /// Output: `[batch, num_patches / pool_kernel, text_hidden]`
    pub fn forward(&self, vision_outputs: &Tensor) -> Result<Tensor> {
        let pooled = self.avg_pool_1d(vision_outputs)?;
        let normed = self.mm_soft_emb_norm.forward(&pooled)?;
        // Candle 3D @ 2D needs broadcast_matmul
        normed.broadcast_matmul(&self.mm_input_projection.t()?)
    }

    /// Non-overlapping mean over consecutive patches.
    fn avg_pool_1d(&self, xs: &Tensor) -> Result<Tensor> {
        if self.pool_kernel == 1 {
            return Ok(xs.clone());
        }
        let (batch, num_patches, hidden) = xs.dims3()?;
        let out = num_patches / self.pool_kernel;
        xs.reshape((batch, out, self.pool_kernel, hidden))?.mean(2)
    }

    pub fn pool_kernel(&self) -> usize {
        self.pool_kernel
    }

    /// Output slots for a given patch count; 256 for every valid geometry.
    pub fn output_tokens(&self, num_patches: usize) -> usize {
        num_patches / self.pool_kernel
    }
}

/// Pool kernel that reduces `num_patches` to exactly [`MM_TOKENS_PER_IMAGE`]
/// slots, or `None` when `num_patches` is not a positive multiple of it.
pub fn pool_kernel_for(num_patches: usize) -> Option<usize> {
    if num_patches == 0 || num_patches % MM_TOKENS_PER_IMAGE != 0 {
        return None;
    }
    Some(num_patches / MM_TOKENS_PER_IMAGE)
}
