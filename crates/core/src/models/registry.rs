//! Catalog of supported multimodal architectures.
//!
//! The registry is an explicit value owned by the process entry point and
//! passed by reference; there is no global registration.

use std::collections::HashMap;

use tracing::info;

use crate::config::ModelConfig;
use crate::error::{Error, Result};

use super::gemma3_vlm::Gemma3Multimodal;
use super::{ModelComponents, MultimodalModel};

/// Key holding the architecture name in [`ModelConfig`].
pub const ARCHITECTURE_KEY: &str = "general.architecture";

pub type ModelConstructor =
    fn(&ModelConfig, ModelComponents<'_>) -> Result<Box<dyn MultimodalModel>>;

/// Metadata for a registered architecture.
#[derive(Clone, Copy)]
pub struct ArchitectureInfo {
    /// Human-readable name for logging and error messages.
    pub display_name: &'static str,
    pub constructor: ModelConstructor,
}

impl std::fmt::Debug for ArchitectureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchitectureInfo")
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    architectures: HashMap<String, ArchitectureInfo>,
}

impl ModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in architecture.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "gemma3",
            ArchitectureInfo {
                display_name: "Gemma 3",
                constructor: build_gemma3,
            },
        );
        registry
    }

    /// Register `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, info: ArchitectureInfo) {
        self.architectures.insert(name.into(), info);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.architectures.contains_key(name)
    }

    pub fn find(&self, name: &str) -> Option<&ArchitectureInfo> {
        self.architectures.get(name)
    }

    /// Registered architecture names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.architectures.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the model named by `general.architecture`.
    pub fn build(
        &self,
        cfg: &ModelConfig,
        components: ModelComponents<'_>,
    ) -> Result<Box<dyn MultimodalModel>> {
        let arch = cfg.require_string(ARCHITECTURE_KEY)?;
        let info = self
            .find(arch)
            .ok_or_else(|| Error::UnsupportedArchitecture(arch.to_string()))?;
        info!(architecture = arch, model = info.display_name, "Building model");
        (info.constructor)(cfg, components)
    }
}

fn build_gemma3(
    cfg: &ModelConfig,
    components: ModelComponents<'_>,
) -> Result<Box<dyn MultimodalModel>> {
    Ok(Box::new(Gemma3Multimodal::from_model_config(cfg, components)?))
}
