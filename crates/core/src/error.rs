use thiserror::Error;

use crate::config::ConfigError;
use crate::kv_cache::CacheError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error for encode, post-tokenize and forward calls.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    Shape {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),
}

impl Error {
    pub(crate) fn shape(what: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        Self::Shape {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

/// Malformed token-stream or forward-batch input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("image carrier at index {index} has no embedding")]
    CarrierWithoutEmbedding { index: usize },

    #[error("{carriers} image carrier(s) at end of stream have no consuming token")]
    UnconsumedImageRun { carriers: usize },

    #[error("image carrier at index {index} reached forward without expansion")]
    UnexpandedCarrier { index: usize },

    #[error("forward batch is empty")]
    EmptyBatch,

    #[error("length mismatch: {tokens} tokens but {positions} positions")]
    PositionCountMismatch { tokens: usize, positions: usize },

    #[error("no output positions selected")]
    NoOutputsSelected,

    #[error("position {position} at index {index} does not fit in u32")]
    PositionOverflow { index: usize, position: usize },

    #[error("output index {index} out of range for batch of {len}")]
    OutputOutOfRange { index: usize, len: usize },

    #[error("embedding at index {index} is not preceded by an image template")]
    UnboundEmbedding { index: usize },

    #[error("binding at index {index} spans past the end of a batch of {len}")]
    BindingOutOfRange { index: usize, len: usize },

    #[error("binding at index {index} has dims {dims:?}, expected [_, {tokens}, {hidden}]")]
    BindingShape {
        index: usize,
        dims: Vec<usize>,
        tokens: usize,
        hidden: usize,
    },
}
