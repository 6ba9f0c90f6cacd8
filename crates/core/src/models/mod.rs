//! Multimodal model front ends.

pub mod gemma3_vlm;
pub mod registry;

pub use gemma3_vlm::{Gemma3Multimodal, Gemma3VlmConfig};
pub use registry::{ArchitectureInfo, ModelConstructor, ModelRegistry, ARCHITECTURE_KEY};

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::engine::{ForwardBatch, TextModel};
use crate::error::Result;
use crate::kv_cache::CacheOrchestrator;
use crate::multimodal::{ImageEmbedding, ImageTemplate, Input, VisionTower};

/// Externally supplied parts a model is assembled from.
pub struct ModelComponents<'a> {
    pub vision: Box<dyn VisionTower>,
    pub text: Box<dyn TextModel>,
    /// Root of the checkpoint; projector weights live under
    /// `multi_modal_projector`.
    pub vb: VarBuilder<'a>,
}

/// Request-facing surface of a multimodal model.
pub trait MultimodalModel: Send + Sync {
    /// Decode, encode and project one image into `[1, 256, text_hidden]`.
    fn encode_multimodal(&self, image_bytes: &[u8]) -> Result<ImageEmbedding>;

    /// Merge carrier runs and splice the image template into the stream.
    fn post_tokenize(&self, inputs: Vec<Input>) -> Result<Vec<Input>>;

    fn prepare_batch(&self, inputs: &[Input]) -> Result<ForwardBatch>;

    /// Hidden states for the batch's output rows.
    fn forward(&self, batch: &ForwardBatch, cache: &mut CacheOrchestrator) -> Result<Tensor>;

    /// Fresh per-sequence cache laid out for this model's layers.
    fn new_cache(&self) -> Result<CacheOrchestrator>;

    fn image_template(&self) -> &ImageTemplate;
}
