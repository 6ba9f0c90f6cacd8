//! Token-stream elements produced by the tokenizer and rewritten by
//! [`merge_image_runs`](super::merge_image_runs) and
//! [`expand_image_carriers`](super::expand_image_carriers).

use candle_core::Tensor;

/// Number of embedding vectors produced per image and placeholders per template.
pub const MM_TOKENS_PER_IMAGE: usize = 256;

/// A position in the token stream: either a vocabulary token or an image carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// A real vocabulary token.
    Text(u32),
    /// Transports an image embedding until expansion; has no vocabulary id.
    ImageCarrier,
}

impl Token {
    pub fn is_carrier(&self) -> bool {
        matches!(self, Self::ImageCarrier)
    }

    /// Vocabulary id, or `None` for a carrier.
    pub fn id(&self) -> Option<u32> {
        match self {
            Self::Text(id) => Some(*id),
            Self::ImageCarrier => None,
        }
    }
}

/// Embedding block for one image (or one merged run of images) and its
/// content hash.
///
/// `embedding` is `[batch, 256, text_hidden]`: one batch entry per image.
#[derive(Debug, Clone)]
pub struct ImageEmbedding {
    pub embedding: Tensor,
    pub hash: u64,
}

impl ImageEmbedding {
    pub fn new(embedding: Tensor, hash: u64) -> Self {
        Self { embedding, hash }
    }

    /// Number of images folded into this embedding.
    pub fn num_images(&self) -> usize {
        self.embedding.dims().first().copied().unwrap_or(0)
    }
}

/// One element of the token stream.
#[derive(Debug, Clone)]
pub struct Input {
    pub token: Token,
    pub multimodal: Option<ImageEmbedding>,
    /// Assigned by [`expand_image_carriers`](super::expand_image_carriers),
    /// which renumbers every input from the first one's position.
    pub position: usize,
    /// Whether the hidden state at this position is returned from forward.
    pub output: bool,
}

impl Input {
    pub fn text(id: u32) -> Self {
        Self {
            token: Token::Text(id),
            multimodal: None,
            position: 0,
            output: false,
        }
    }

    pub fn image(embedding: ImageEmbedding) -> Self {
        Self {
            token: Token::ImageCarrier,
            multimodal: Some(embedding),
            position: 0,
            output: false,
        }
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.position = position;
        self
    }

    pub fn with_output(mut self, output: bool) -> Self {
        self.output = output;
        self
    }

    pub fn hash(&self) -> Option<u64> {
        self.multimodal.as_ref().map(|mm| mm.hash)
    }
}
