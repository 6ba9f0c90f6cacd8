//! Image decoding and pixel preprocessing for the vision tower.
//!
//! Steps: decode → composite alpha onto white → bilinear resize to the
//! canonical `size x size` → rescale to `[0, 1]` → normalize with
//! mean/std `0.5` → pack channel-first.

use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};

use crate::error::{Error, Result};

pub const IMAGE_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const IMAGE_STD: [f32; 3] = [0.5, 0.5, 0.5];

const RESCALE_FACTOR: f32 = 1.0 / 255.0;

#[derive(Debug, Clone)]
pub struct ImageProcessor {
    image_size: usize,
    num_channels: usize,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImageProcessor {
    pub fn new(image_size: usize, num_channels: usize) -> Self {
        Self {
            image_size,
            num_channels,
            mean: IMAGE_MEAN,
            std: IMAGE_STD,
        }
    }

    pub fn with_normalization(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.mean = mean;
        self.std = std;
        self
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage> {
        Ok(image::load_from_memory(bytes)?)
    }

    /// Resize and normalize into a channel-first RGB buffer of
    /// `3 * size * size` floats.
    pub fn process_image(&self, image: &DynamicImage) -> Vec<f32> {
        let rgb = composite_over_white(image);
        let size = self.image_size as u32;
        let resized = if rgb.dimensions() == (size, size) {
            rgb
        } else {
            imageops::resize(&rgb, size, size, FilterType::Triangle)
        };

        let plane = self.image_size * self.image_size;
        let mut out = vec![0f32; 3 * plane];
        for (x, y, Rgb(px)) in resized.enumerate_pixels() {
            let idx = y as usize * self.image_size + x as usize;
            for c in 0..3 {
                let v = px[c] as f32 * RESCALE_FACTOR;
                out[c * plane + idx] = (v - self.mean[c]) / self.std[c];
            }
        }
        out
    }

    /// Wrap a channel-first pixel buffer as `[1, channels, size, size]`.
    ///
    /// Fails with [`Error::Shape`] when the buffer length does not match the
    /// configured channel count and canonical size.
    pub fn pixel_values(&self, pixels: Vec<f32>, device: &Device) -> Result<Tensor> {
        let expected = self.num_channels * self.image_size * self.image_size;
        if pixels.len() != expected {
            return Err(Error::shape("pixel buffer", &[expected], &[pixels.len()]));
        }
        Ok(Tensor::from_vec(
            pixels,
            (1, self.num_channels, self.image_size, self.image_size),
            device,
        )?)
    }

    /// Decode and preprocess in one step.
    pub fn preprocess(&self, bytes: &[u8], device: &Device) -> Result<Tensor> {
        let image = self.decode(bytes)?;
        self.pixel_values(self.process_image(&image), device)
    }
}

fn composite_over_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in rgb.pixels_mut().zip(rgba.pixels()) {
        let alpha = src[3] as f32 / 255.0;
        for c in 0..3 {
            let blended = src[c] as f32 * alpha + 255.0 * (1.0 - alpha);
            dst[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn solid_rgb(w: u32, h: u32, px: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(px)))
    }

    #[test]
    fn process_solid_image_normalizes() {
        let processor = ImageProcessor::new(8, 3);
        let pixels = processor.process_image(&solid_rgb(8, 8, [255, 0, 255]));

        assert_eq!(pixels.len(), 3 * 64);
        // 255 → 1.0 → (1.0 - 0.5) / 0.5 = 1.0; 0 → -1.0
        assert!(pixels[..64].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(pixels[64..128].iter().all(|&v| (v + 1.0).abs() < 1e-6));
        assert!(pixels[128..].iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn resize_to_canonical_size() {
        let processor = ImageProcessor::new(16, 3);
        for (w, h) in [(224, 224), (448, 448), (31, 77)] {
            let pixels = processor.process_image(&solid_rgb(w, h, [10, 20, 30]));
            assert_eq!(pixels.len(), 3 * 16 * 16, "source {w}x{h}");
        }
    }

    #[test]
    fn transparent_pixels_become_white() {
        let processor = ImageProcessor::new(4, 3);
        let rgba = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        let pixels = processor.process_image(&DynamicImage::ImageRgba8(rgba));
        assert!(pixels.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn preprocess_png_bytes() {
        let processor = ImageProcessor::new(14, 3);
        let bytes = png_bytes(solid_rgb(20, 10, [128, 128, 128]));
        let t = processor.preprocess(&bytes, &Device::Cpu).unwrap();
        assert_eq!(t.dims(), &[1, 3, 14, 14]);
    }

    #[test]
    fn malformed_bytes_are_decode_errors() {
        let processor = ImageProcessor::new(14, 3);
        let err = processor.preprocess(b"definitely not an image", &Device::Cpu).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn channel_mismatch_is_shape_error() {
        let processor = ImageProcessor::new(4, 4);
        let pixels = processor.process_image(&solid_rgb(4, 4, [0, 0, 0]));
        let err = processor.pixel_values(pixels, &Device::Cpu).unwrap_err();
        assert!(matches!(err, Error::Shape { .. }));
    }
}
