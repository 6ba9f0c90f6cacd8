//! Shared test utilities for vlm-core.
//!
//! Mock towers, a recording key shifter and a tiny Gemma3 config for unit
//! and integration tests.

mod mock_model;
mod tiny_config;

pub use mock_model::{MockTextModel, MockVisionTower, RecordingShifter};
pub use tiny_config::{tiny_gemma3_components, tiny_gemma3_config};
