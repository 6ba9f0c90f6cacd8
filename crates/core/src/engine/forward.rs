use candle_core::{Device, Tensor};
use tracing::debug;

use crate::error::{Error, InputError, Result};
use crate::kv_cache::CacheOrchestrator;
use crate::multimodal::{ImageTemplate, Input, MM_TOKENS_PER_IMAGE};

use super::TextModel;

/// An image embedding pinned to the first placeholder it fills.
#[derive(Debug, Clone)]
pub struct MultimodalBinding {
    /// Batch index of the first placeholder.
    pub index: usize,
    /// `[images, 256, hidden]`.
    pub embedding: Tensor,
    pub hash: u64,
}

impl MultimodalBinding {
    pub fn num_images(&self) -> usize {
        self.embedding.dims().first().copied().unwrap_or(0)
    }

    /// Placeholder rows this binding fills: `images * 256`.
    pub fn num_slots(&self) -> usize {
        self.num_images() * MM_TOKENS_PER_IMAGE
    }
}

/// Bind every embedding-holding input to the template that precedes it.
///
/// After expansion the consumer of an image run sits directly behind its
/// template, so the first placeholder is at `consumer - len_for(images) + 2`.
/// For a single image that is `consumer - 257`.
pub fn collect_bindings(
    inputs: &[Input],
    template: &ImageTemplate,
) -> std::result::Result<Vec<MultimodalBinding>, InputError> {
    let mut bindings = Vec::new();
    for (index, input) in inputs.iter().enumerate() {
        let Some(mm) = &input.multimodal else {
            continue;
        };
        if input.token.is_carrier() {
            return Err(InputError::UnexpandedCarrier { index });
        }
        let images = mm.num_images();
        if !template.ends_at(inputs, index, images) {
            return Err(InputError::UnboundEmbedding { index });
        }
        bindings.push(MultimodalBinding {
            index: index - ImageTemplate::len_for(images) + ImageTemplate::PLACEHOLDER_OFFSET,
            embedding: mm.embedding.clone(),
            hash: mm.hash,
        });
    }
    Ok(bindings)
}

/// Host-side buffers for one forward pass.
#[derive(Debug, Clone)]
pub struct ForwardBatch {
    pub token_ids: Vec<u32>,
    pub positions: Vec<u32>,
    /// Batch indices whose hidden states are returned, ascending.
    pub outputs: Vec<u32>,
    pub multimodal: Vec<MultimodalBinding>,
}

impl ForwardBatch {
    pub fn new(
        token_ids: Vec<u32>,
        positions: Vec<u32>,
        outputs: Vec<u32>,
        multimodal: Vec<MultimodalBinding>,
    ) -> std::result::Result<Self, InputError> {
        let batch = Self {
            token_ids,
            positions,
            outputs,
            multimodal,
        };
        batch.validate()?;
        Ok(batch)
    }

    /// Materialize buffers from an expanded input stream.
    pub fn from_inputs(
        inputs: &[Input],
        template: &ImageTemplate,
    ) -> std::result::Result<Self, InputError> {
        let mut token_ids = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            match input.token.id() {
                Some(id) => token_ids.push(id),
                None => return Err(InputError::UnexpandedCarrier { index }),
            }
        }
        let positions = inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                u32::try_from(input.position).map_err(|_| InputError::PositionOverflow {
                    index,
                    position: input.position,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let outputs = inputs
            .iter()
            .enumerate()
            .filter(|(_, i)| i.output)
            .map(|(idx, _)| idx as u32)
            .collect();
        let multimodal = collect_bindings(inputs, template)?;
        Self::new(token_ids, positions, outputs, multimodal)
    }

    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }

    pub fn validate(&self) -> std::result::Result<(), InputError> {
        let len = self.len();
        if len == 0 {
            return Err(InputError::EmptyBatch);
        }
        if self.positions.len() != len {
            return Err(InputError::PositionCountMismatch {
                tokens: len,
                positions: self.positions.len(),
            });
        }
        if self.outputs.is_empty() {
            return Err(InputError::NoOutputsSelected);
        }
        if let Some(&index) = self.outputs.iter().find(|&&i| i as usize >= len) {
            return Err(InputError::OutputOutOfRange {
                index: index as usize,
                len,
            });
        }
        for binding in &self.multimodal {
            if binding.index + binding.num_slots() > len {
                return Err(InputError::BindingOutOfRange {
                    index: binding.index,
                    len,
                });
            }
        }
        Ok(())
    }

    /// Every binding must be `[images, 256, hidden]`.
    pub fn validate_bindings(&self, hidden: usize) -> std::result::Result<(), InputError> {
        for binding in &self.multimodal {
            let dims = binding.embedding.dims();
            let ok = matches!(dims, [images, tokens, h]
                if *images > 0 && *tokens == MM_TOKENS_PER_IMAGE && *h == hidden);
            if !ok {
                return Err(InputError::BindingShape {
                    index: binding.index,
                    dims: dims.to_vec(),
                    tokens: MM_TOKENS_PER_IMAGE,
                    hidden,
                });
            }
        }
        Ok(())
    }
}

/// Run `model` over `batch` and return `[outputs, hidden]`.
pub fn run_forward(
    model: &dyn TextModel,
    batch: &ForwardBatch,
    cache: &mut CacheOrchestrator,
    device: &Device,
) -> Result<Tensor> {
    batch.validate()?;
    let hidden_size = model.hidden_size();
    batch.validate_bindings(hidden_size)?;

    let token_ids = Tensor::new(batch.token_ids.as_slice(), device)?;
    let positions = Tensor::new(batch.positions.as_slice(), device)?;
    debug!(
        tokens = batch.len(),
        bindings = batch.multimodal.len(),
        outputs = batch.outputs.len(),
        "Running forward pass"
    );
    let hidden = model.forward(&token_ids, &positions, &batch.multimodal, cache)?;

    if hidden.dims() != [batch.len(), hidden_size] {
        return Err(Error::shape(
            "text model hidden states",
            &[batch.len(), hidden_size],
            hidden.dims(),
        ));
    }
    let outputs = Tensor::new(batch.outputs.as_slice(), device)?;
    Ok(hidden.index_select(&outputs, 0)?)
}
