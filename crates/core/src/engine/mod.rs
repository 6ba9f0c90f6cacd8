//! Forward coordination between an expanded token stream, its image
//! embeddings and the text model.
//!
//! # Architecture
//!
//! - [`ForwardBatch`] materializes token ids, positions and output indices
//!   from expanded [`Input`](crate::multimodal::Input)s
//! - [`collect_bindings`] pairs each image embedding with the placeholder run
//!   it fills
//! - [`run_forward`] hands everything to a [`TextModel`] and keeps only the
//!   requested rows of its hidden states

mod forward;

pub use forward::{collect_bindings, run_forward, ForwardBatch, MultimodalBinding};

use std::sync::Arc;

use candle_core::Tensor;

use crate::kv_cache::{CacheOrchestrator, KeyShifter};
use crate::Result;

/// Trait for the text decoder consuming a multimodal batch.
pub trait TextModel: Send + Sync {
    /// Single-sequence forward pass.
    ///
    /// `token_ids` and `positions` are `[seq]` u32 tensors. Each binding's
    /// `[images, 256, hidden]` embedding, flattened image-major, replaces the
    /// `images * 256` placeholder rows starting at its index. Returns hidden
    /// states `[seq, hidden_size]`.
    fn forward(
        &self,
        token_ids: &Tensor,
        positions: &Tensor,
        multimodal: &[MultimodalBinding],
        cache: &mut CacheOrchestrator,
    ) -> Result<Tensor>;

    fn hidden_size(&self) -> usize;

    /// Rotary owner used when the cache moves positions.
    fn key_shifter(&self) -> Arc<dyn KeyShifter>;
}
