//! Multimodal prompt assembly.
//!
//! # Architecture
//!
//! 1. [`ImageProcessor`] decodes and normalizes image bytes
//! 2. A [`VisionTower`] encodes pixels into patch embeddings
//! 3. [`Gemma3Projector`] pools to 256 slots and projects into text space
//! 4. [`merge_image_runs`] folds runs of image carriers into their consumer
//! 5. [`expand_image_carriers`] splices the [`ImageTemplate`] into the stream

mod embedding_cache;
mod expand;
mod hash;
mod image_processor;
mod inputs;
mod merge;
mod projector;
mod vision;

pub use embedding_cache::{EmbeddingCache, DEFAULT_EMBEDDING_CACHE_SIZE};
pub use expand::{expand_image_carriers, ImageTemplate};
pub use hash::{content_hash, HashFold};
pub use image_processor::{ImageProcessor, IMAGE_MEAN, IMAGE_STD};
pub use inputs::{ImageEmbedding, Input, Token, MM_TOKENS_PER_IMAGE};
pub use merge::{merge_image_runs, MERGE_AXIS};
pub use projector::{pool_kernel_for, Gemma3Projector};
pub use vision::VisionTower;
