mod logging;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use candle_core::{DType, Device, Tensor};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use vlm_core::{
    config::ModelConfig,
    models::{Gemma3VlmConfig, ModelRegistry, ARCHITECTURE_KEY},
    multimodal::{
        content_hash, expand_image_carriers, merge_image_runs, HashFold, ImageEmbedding,
        ImageProcessor, ImageTemplate, Input, MM_TOKENS_PER_IMAGE,
    },
};

use logging::LogFormat;

/// Token spelling for an image carrier in `--tokens`.
const IMAGE_TOKEN: &str = "<image>";

#[derive(Parser)]
#[command(name = "vlm", about = "Gemma3-style multimodal prompt assembly")]
struct Cli {
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a model config and print image geometry and cache layout
    Plan {
        /// JSON model config with flat dotted keys
        #[arg(long)]
        config: PathBuf,
    },
    /// Print content hashes of image files and the fold of the whole run
    Hash {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Merge and expand a token stream with image carriers
    Assemble {
        #[arg(long)]
        config: PathBuf,
        /// Comma-separated token ids; `<image>` marks an image carrier
        #[arg(long)]
        tokens: String,
        /// Image files consumed by the carriers, in order
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref(), LogFormat::from_env());

    let registry = ModelRegistry::with_defaults();
    match cli.command {
        Command::Plan { config } => run_plan(&registry, &config),
        Command::Hash { images } => run_hash(&images),
        Command::Assemble {
            config,
            tokens,
            images,
        } => run_assemble(&registry, &config, &tokens, &images),
    }
}

/// Load a config and check its architecture against the registry.
fn load_config(
    registry: &ModelRegistry,
    path: &Path,
) -> anyhow::Result<(ModelConfig, Gemma3VlmConfig)> {
    let cfg = ModelConfig::from_file(path)
        .with_context(|| format!("loading config {}", path.display()))?;
    let arch = cfg.require_string(ARCHITECTURE_KEY)?;
    if !registry.contains(arch) {
        bail!(
            "unsupported architecture {arch:?}; registered: {}",
            registry.names().join(", ")
        );
    }
    let vlm = Gemma3VlmConfig::from_model_config(&cfg).context("resolving model config")?;
    Ok((cfg, vlm))
}

fn run_plan(registry: &ModelRegistry, path: &Path) -> anyhow::Result<()> {
    let (cfg, vlm) = load_config(registry, path)?;
    let cache = vlm.cache_config();
    let layers: Vec<String> = cache.policies().iter().map(ToString::to_string).collect();
    let plan = json!({
        "architecture": cfg.require_string(ARCHITECTURE_KEY)?,
        "image_size": vlm.image_size,
        "patch_size": vlm.patch_size,
        "patches_per_side": vlm.patches_per_side(),
        "num_patches": vlm.num_patches(),
        "pool_kernel": vlm.pool_kernel_size(),
        "tokens_per_image": MM_TOKENS_PER_IMAGE,
        "template_len_single_image": ImageTemplate::LEN,
        "template_len_two_images": ImageTemplate::len_for(2),
        "embedding_cache_size": vlm.embedding_cache_size,
        "layers": layers,
    });
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

/// Content hash of an image file, after checking that it decodes.
fn image_hash(processor: &ImageProcessor, path: &Path) -> anyhow::Result<u64> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    processor
        .decode(&bytes)
        .with_context(|| format!("decoding {}", path.display()))?;
    Ok(content_hash(&bytes))
}

fn run_hash(images: &[PathBuf]) -> anyhow::Result<()> {
    let processor = ImageProcessor::new(896, 3);
    let mut hashes = Vec::with_capacity(images.len());
    for path in images {
        let hash = image_hash(&processor, path)?;
        println!("{hash:016x}  {}", path.display());
        hashes.push(hash);
    }
    if let Some(run) = HashFold::new().fold_all(hashes) {
        println!("{run:016x}  (run)");
    }
    Ok(())
}

fn run_assemble(
    registry: &ModelRegistry,
    config: &Path,
    tokens: &str,
    images: &[PathBuf],
) -> anyhow::Result<()> {
    let (_, vlm) = load_config(registry, config)?;
    let processor = ImageProcessor::new(vlm.image_size, vlm.num_channels);

    // Without model weights each image is a zero block carrying its real
    // content hash; structure and hashes match a full encode.
    let mut pending = images.iter();
    let mut inputs = Vec::new();
    for (position, raw) in tokens.split(',').map(str::trim).enumerate() {
        let input = if raw == IMAGE_TOKEN {
            let Some(path) = pending.next() else {
                bail!("more {IMAGE_TOKEN} tokens than --image files");
            };
            let hash = image_hash(&processor, path)?;
            let block = Tensor::zeros((1, MM_TOKENS_PER_IMAGE, 1), DType::F32, &Device::Cpu)?;
            Input::image(ImageEmbedding::new(block, hash))
        } else {
            let id: u32 = raw
                .parse()
                .with_context(|| format!("token {raw:?} is neither an id nor {IMAGE_TOKEN}"))?;
            Input::text(id)
        };
        inputs.push(input.with_position(position));
    }
    if pending.next().is_some() {
        bail!("more --image files than {IMAGE_TOKEN} tokens");
    }

    let carriers = inputs.iter().filter(|i| i.token.is_carrier()).count();
    let len_in = inputs.len();
    let merged = merge_image_runs(inputs)?;
    let expanded = expand_image_carriers(merged, &vlm.template);
    info!(len_in, carriers, len_out = expanded.len(), "Assembled prompt");

    let token_ids: Vec<u32> = expanded.iter().filter_map(|i| i.token.id()).collect();
    let bindings: Vec<serde_json::Value> = expanded
        .iter()
        .enumerate()
        .filter_map(|(index, input)| {
            input.hash().map(|hash| {
                json!({
                    "consumer": index,
                    "images": input.multimodal.as_ref().map_or(0, |m| m.num_images()),
                    "hash": format!("{hash:016x}"),
                })
            })
        })
        .collect();
    let out = json!({ "tokens": token_ids, "images": bindings });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
