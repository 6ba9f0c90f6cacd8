//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use image::{ImageFormat, Rgb, RgbImage};
use vlm_core::config::ModelConfig;
use vlm_core::kv_cache::{IdentityShift, KeyShifter};
use vlm_core::models::ModelComponents;
use vlm_core::testing::{MockTextModel, MockVisionTower};

pub const TEXT_HIDDEN: usize = 8;

// ─── Images ──────────────────────────────────────────────────────────────────

pub fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Horizontal gradient, so different resolutions decode to different pixels.
pub fn gradient_png(size: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(size, size, |x, _| {
        let v = (x * 255 / size.max(1)) as u8;
        Rgb([v, 255 - v, 128])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

// ─── Config ──────────────────────────────────────────────────────────────────

pub fn gemma3_config(image_size: usize) -> ModelConfig {
    ModelConfig::new()
        .with("general.architecture", "gemma3")
        .with("vision.image_size", image_size)
        .with("vision.patch_size", 14)
        .with("vision.embedding_length", 3)
        .with("text.embedding_length", TEXT_HIDDEN)
        .with("text.block_count", 4)
        .with("text.attention.sliding_window", 4)
        .with("text.attention.sliding_window_pattern", 2)
}

pub fn components(shifter: Arc<dyn KeyShifter>) -> ModelComponents<'static> {
    ModelComponents {
        vision: Box::new(MockVisionTower::new(14)),
        text: Box::new(MockTextModel::new(TEXT_HIDDEN).with_shifter(shifter)),
        vb: VarBuilder::zeros(DType::F32, &Device::Cpu),
    }
}

pub fn default_components() -> ModelComponents<'static> {
    components(Arc::new(IdentityShift))
}

// ─── Shifters ────────────────────────────────────────────────────────────────

/// Fails for one layer, to exercise all-or-nothing shifts.
pub struct FailingShifter {
    pub fail_layer: usize,
}

impl KeyShifter for FailingShifter {
    fn shift_keys(&self, layer: usize, keys: &Tensor, _offset: i64) -> candle_core::Result<Tensor> {
        if layer == self.fail_layer {
            return Err(candle_core::Error::Msg(format!("rope failure on layer {layer}")));
        }
        Ok(keys.clone())
    }
}

pub fn kv_rows(n: usize) -> Tensor {
    Tensor::zeros((n, 2, 4), DType::F32, &Device::Cpu).unwrap()
}
