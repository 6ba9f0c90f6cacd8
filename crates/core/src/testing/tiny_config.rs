use candle_core::{DType, Device};
use candle_nn::VarBuilder;

use crate::config::ModelConfig;
use crate::models::ModelComponents;

use super::{MockTextModel, MockVisionTower};

/// Create a tiny Gemma3 multimodal config for testing.
///
/// 224px images with 14px patches give 256 patches, so the pool kernel is 1.
/// Vision hidden is 3 to match [`MockVisionTower`]; 4 text layers alternate
/// windowed (W = 4) and causal.
pub fn tiny_gemma3_config() -> ModelConfig {
    ModelConfig::new()
        .with("general.architecture", "gemma3")
        .with("vision.image_size", 224)
        .with("vision.patch_size", 14)
        .with("vision.num_channels", 3)
        .with("vision.embedding_length", 3)
        .with("text.embedding_length", 8)
        .with("text.block_count", 4)
        .with("text.attention.sliding_window", 4)
        .with("text.attention.sliding_window_pattern", 2)
}

/// Mock towers plus zero-initialized projector weights on CPU.
pub fn tiny_gemma3_components(config: &ModelConfig) -> ModelComponents<'static> {
    let patch_size = config.uint("vision.patch_size", 14).unwrap_or(14) as usize;
    let hidden = config.uint("text.embedding_length", 8).unwrap_or(8) as usize;
    ModelComponents {
        vision: Box::new(MockVisionTower::new(patch_size)),
        text: Box::new(MockTextModel::new(hidden)),
        vb: VarBuilder::zeros(DType::F32, &Device::Cpu),
    }
}
