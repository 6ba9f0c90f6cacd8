//! Multimodal prompt assembly and dual-policy attention caching for
//! Gemma3-style vision-language models.
//!
//! The pipeline runs in four stages:
//! 1. [`models::MultimodalModel::encode_multimodal`] turns image bytes into a
//!    fixed block of 256 projected embeddings plus a content hash.
//! 2. [`multimodal::merge_image_runs`] folds each run of image carriers into
//!    the real token that follows it.
//! 3. [`multimodal::expand_image_carriers`] splices the image template into
//!    the token stream.
//! 4. [`models::MultimodalModel::forward`] binds embeddings to placeholder
//!    positions and drives the text model against a [`kv_cache::CacheOrchestrator`].

pub mod config;
pub mod engine;
pub mod error;
pub mod kv_cache;
pub mod models;
pub mod multimodal;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::{Error, InputError, Result};
