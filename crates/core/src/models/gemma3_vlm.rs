//! Gemma 3 Vision-Language prompt assembly.
//!
//! Combines a SigLIP-style vision tower with a Gemma3 text model via a
//! multi-modal projector that uses average pooling, Gemma RMSNorm,
//! and a linear projection.
//!
//! # Architecture
//!
//! 1. Image bytes are decoded, resized to the canonical square and normalized
//! 2. The vision tower turns pixels into `(image_size / patch_size)²` patches
//! 3. The projector pools them to 256 slots in text space
//! 4. `post_tokenize` merges carrier runs and splices in one image template
//!    per run (259 tokens for a single image, 256 more per extra image)
//! 5. `forward` binds embeddings to placeholders and runs the text model
//!    against a per-layer windowed/causal cache
//!
//! # Weight mapping
//!
//! - `multi_modal_projector.mm_soft_emb_norm.weight` → Gemma RMSNorm
//! - `multi_modal_projector.mm_input_projection.weight` → projection weight

use std::sync::{Mutex, PoisonError};

use candle_core::{DType, Device, Tensor};
use tracing::{debug, info};

use crate::config::{ConfigError, ModelConfig};
use crate::engine::{run_forward, ForwardBatch, TextModel};
use crate::error::{Error, Result};
use crate::kv_cache::{CacheConfig, CacheOrchestrator};
use crate::multimodal::{
    content_hash, expand_image_carriers, merge_image_runs, pool_kernel_for, EmbeddingCache,
    Gemma3Projector, ImageEmbedding, ImageProcessor, ImageTemplate, Input, VisionTower,
    DEFAULT_EMBEDDING_CACHE_SIZE, MM_TOKENS_PER_IMAGE,
};

use super::{ModelComponents, MultimodalModel};

// ─── Config ─────────────────────────────────────────────────────────────────

/// Resolved Gemma3 multimodal configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Gemma3VlmConfig {
    pub image_size: usize,
    pub patch_size: usize,
    pub num_channels: usize,
    pub vision_hidden: usize,
    pub vision_eps: f64,
    pub text_hidden: usize,
    pub num_layers: usize,
    pub sliding_window: usize,
    pub sliding_window_pattern: usize,
    pub template: ImageTemplate,
    pub embedding_cache_size: usize,
}

impl Gemma3VlmConfig {
    pub fn from_model_config(cfg: &ModelConfig) -> std::result::Result<Self, ConfigError> {
        let template = ImageTemplate {
            separator: token_id(cfg, "mm.separator_token_id", 108)?,
            start_of_image: token_id(cfg, "mm.start_of_image_token_id", 255_999)?,
            end_of_image: token_id(cfg, "mm.end_of_image_token_id", 256_000)?,
            placeholder: token_id(cfg, "mm.placeholder_token_id", 0)?,
        };

        let config = Self {
            image_size: cfg.uint("vision.image_size", 896)? as usize,
            patch_size: cfg.uint("vision.patch_size", 14)? as usize,
            num_channels: cfg.uint("vision.num_channels", 3)? as usize,
            vision_hidden: cfg.require_uint("vision.embedding_length")? as usize,
            vision_eps: cfg.float("vision.attention.layer_norm_epsilon", 1e-6)?,
            text_hidden: cfg.require_uint("text.embedding_length")? as usize,
            num_layers: cfg.require_uint("text.block_count")? as usize,
            sliding_window: cfg.require_uint("text.attention.sliding_window")? as usize,
            sliding_window_pattern: cfg.uint("text.attention.sliding_window_pattern", 6)?
                as usize,
            template,
            embedding_cache_size: cfg
                .uint("mm.embedding_cache_size", DEFAULT_EMBEDDING_CACHE_SIZE as u64)?
                as usize,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.patch_size == 0 || self.image_size % self.patch_size != 0 {
            return Err(ConfigError::invalid(
                "vision.patch_size",
                format!(
                    "{} does not tile an image of {} pixels",
                    self.patch_size, self.image_size
                ),
            ));
        }
        if pool_kernel_for(self.num_patches()).is_none() {
            return Err(ConfigError::invalid(
                "vision.image_size",
                format!(
                    "{} patches cannot pool to {MM_TOKENS_PER_IMAGE} slots",
                    self.num_patches()
                ),
            ));
        }
        if self.num_channels != 3 {
            return Err(ConfigError::invalid(
                "vision.num_channels",
                format!("expected 3 (RGB), got {}", self.num_channels),
            ));
        }
        if self.vision_hidden == 0 {
            return Err(ConfigError::invalid("vision.embedding_length", "must be positive"));
        }
        if self.text_hidden == 0 {
            return Err(ConfigError::invalid("text.embedding_length", "must be positive"));
        }
        if self.sliding_window == 0 {
            return Err(ConfigError::invalid(
                "text.attention.sliding_window",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Number of patches per image side (before pooling).
    pub fn patches_per_side(&self) -> usize {
        self.image_size / self.patch_size
    }

    pub fn num_patches(&self) -> usize {
        self.patches_per_side() * self.patches_per_side()
    }

    /// AvgPool kernel over the flattened patch sequence.
    pub fn pool_kernel_size(&self) -> usize {
        pool_kernel_for(self.num_patches()).unwrap_or(1)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(
            self.num_layers,
            self.sliding_window,
            self.sliding_window_pattern,
        )
    }
}

fn token_id(cfg: &ModelConfig, key: &str, default: u32) -> std::result::Result<u32, ConfigError> {
    let raw = cfg.uint(key, u64::from(default))?;
    u32::try_from(raw).map_err(|_| ConfigError::invalid(key, format!("{raw} exceeds u32")))
}

// ─── Model ──────────────────────────────────────────────────────────────────

/// Gemma3 multimodal front end: image encoding, prompt assembly and forward
/// coordination.
pub struct Gemma3Multimodal {
    config: Gemma3VlmConfig,
    image_processor: ImageProcessor,
    vision_tower: Box<dyn VisionTower>,
    multi_modal_projector: Gemma3Projector,
    language_model: Box<dyn TextModel>,
    embedding_cache: Mutex<EmbeddingCache>,
    device: Device,
    dtype: DType,
}

impl Gemma3Multimodal {
    pub fn new(cfg: &Gemma3VlmConfig, components: ModelComponents<'_>) -> Result<Self> {
        let ModelComponents { vision, text, vb } = components;

        if text.hidden_size() != cfg.text_hidden {
            return Err(ConfigError::invalid(
                "text.embedding_length",
                format!(
                    "text model hidden size is {}, config says {}",
                    text.hidden_size(),
                    cfg.text_hidden
                ),
            )
            .into());
        }

        let multi_modal_projector = Gemma3Projector::new(
            cfg.vision_hidden,
            cfg.text_hidden,
            cfg.pool_kernel_size(),
            cfg.vision_eps,
            vb.pp("multi_modal_projector"),
        )?;

        info!(
            image_size = cfg.image_size,
            patches = cfg.num_patches(),
            pool_kernel = cfg.pool_kernel_size(),
            vision_hidden = cfg.vision_hidden,
            text_hidden = cfg.text_hidden,
            layers = cfg.num_layers,
            "Built Gemma3 multimodal model"
        );

        Ok(Self {
            image_processor: ImageProcessor::new(cfg.image_size, cfg.num_channels),
            vision_tower: vision,
            multi_modal_projector,
            language_model: text,
            embedding_cache: Mutex::new(EmbeddingCache::new(cfg.embedding_cache_size)),
            device: vb.device().clone(),
            dtype: vb.dtype(),
            config: cfg.clone(),
        })
    }

    pub fn from_model_config(cfg: &ModelConfig, components: ModelComponents<'_>) -> Result<Self> {
        let vlm_cfg = Gemma3VlmConfig::from_model_config(cfg)?;
        Self::new(&vlm_cfg, components)
    }

    pub fn config(&self) -> &Gemma3VlmConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Vision tower → projector for one preprocessed image.
    pub fn encode_pixels(&self, pixel_values: &Tensor) -> Result<Tensor> {
        let pixel_values = pixel_values.to_dtype(self.dtype)?;
        let features = self.vision_tower.forward(&pixel_values)?;
        let expected = [1, self.config.num_patches(), self.config.vision_hidden];
        if features.dims() != expected {
            return Err(Error::shape("vision tower output", &expected, features.dims()));
        }
        Ok(self.multi_modal_projector.forward(&features)?)
    }

    pub fn cached_embeddings(&self) -> usize {
        self.embedding_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl MultimodalModel for Gemma3Multimodal {
    fn encode_multimodal(&self, image_bytes: &[u8]) -> Result<ImageEmbedding> {
        let hash = content_hash(image_bytes);
        if let Some(hit) = self
            .embedding_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
        {
            debug!(hash, "Image embedding cache hit");
            return Ok(hit);
        }

        let pixel_values = self.image_processor.preprocess(image_bytes, &self.device)?;
        let embedding = self.encode_pixels(&pixel_values)?;
        let expected = [1, MM_TOKENS_PER_IMAGE, self.config.text_hidden];
        if embedding.dims() != expected {
            return Err(Error::shape("image embedding", &expected, embedding.dims()));
        }
        debug!(hash, bytes = image_bytes.len(), "Encoded image");

        let embedding = ImageEmbedding::new(embedding, hash);
        self.embedding_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(embedding.clone());
        Ok(embedding)
    }

    fn post_tokenize(&self, inputs: Vec<Input>) -> Result<Vec<Input>> {
        let merged = merge_image_runs(inputs)?;
        Ok(expand_image_carriers(merged, &self.config.template))
    }

    fn prepare_batch(&self, inputs: &[Input]) -> Result<ForwardBatch> {
        Ok(ForwardBatch::from_inputs(inputs, &self.config.template)?)
    }

    fn forward(&self, batch: &ForwardBatch, cache: &mut CacheOrchestrator) -> Result<Tensor> {
        run_forward(self.language_model.as_ref(), batch, cache, &self.device)
    }

    fn new_cache(&self) -> Result<CacheOrchestrator> {
        Ok(CacheOrchestrator::new(
            &self.config.cache_config(),
            self.language_model.key_shifter(),
        )?)
    }

    fn image_template(&self) -> &ImageTemplate {
        &self.config.template
    }
}
