use std::sync::{Arc, Mutex, PoisonError};

use candle_core::{DType, Tensor};

use crate::engine::{MultimodalBinding, TextModel};
use crate::kv_cache::{CacheOrchestrator, IdentityShift, KeyShifter};
use crate::multimodal::VisionTower;

/// Vision tower that averages each patch per channel.
///
/// Output hidden size equals the channel count, which keeps projector
/// weights tiny and outputs predictable.
pub struct MockVisionTower {
    patch_size: usize,
}

impl MockVisionTower {
    pub fn new(patch_size: usize) -> Self {
        Self { patch_size }
    }
}

impl VisionTower for MockVisionTower {
    fn forward(&self, pixel_values: &Tensor) -> candle_core::Result<Tensor> {
        let (b, c, s, _) = pixel_values.dims4()?;
        let p = self.patch_size;
        let n = s / p;
        pixel_values
            .reshape((b, c, n, p, n, p))?
            .permute((0, 2, 4, 1, 3, 5))?
            .contiguous()?
            .reshape((b, n * n, c, p * p))?
            .mean(3)
    }
}

/// Text model whose hidden row `i` is the token id at `i` broadcast over the
/// hidden size, with every row of each bound image block spliced in.
///
/// Every forward appends the produced rows as keys and values to every cache
/// layer at the batch positions.
pub struct MockTextModel {
    hidden_size: usize,
    shifter: Arc<dyn KeyShifter>,
}

impl MockTextModel {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            shifter: Arc::new(IdentityShift),
        }
    }

    pub fn with_shifter(mut self, shifter: Arc<dyn KeyShifter>) -> Self {
        self.shifter = shifter;
        self
    }
}

impl TextModel for MockTextModel {
    fn forward(
        &self,
        token_ids: &Tensor,
        positions: &Tensor,
        multimodal: &[MultimodalBinding],
        cache: &mut CacheOrchestrator,
    ) -> crate::Result<Tensor> {
        let seq = token_ids.dim(0)?;
        let mut hidden = token_ids
            .to_dtype(DType::F32)?
            .reshape((seq, 1))?
            .broadcast_as((seq, self.hidden_size))?
            .contiguous()?;

        for binding in multimodal {
            // [images, 256, hidden] -> [images * 256, hidden]
            let rows = binding.embedding.flatten_to(1)?.to_dtype(DType::F32)?;
            let end = binding.index + rows.dim(0)?;
            let mut pieces = Vec::with_capacity(3);
            if binding.index > 0 {
                pieces.push(hidden.narrow(0, 0, binding.index)?);
            }
            pieces.push(rows);
            if end < seq {
                pieces.push(hidden.narrow(0, end, seq - end)?);
            }
            hidden = Tensor::cat(&pieces, 0)?;
        }

        let positions: Vec<usize> = positions
            .to_vec1::<u32>()?
            .into_iter()
            .map(|p| p as usize)
            .collect();
        let kv = hidden.reshape((seq, 1, self.hidden_size))?;
        for layer in 0..cache.num_layers() {
            cache.append(layer, &positions, &kv, &kv)?;
        }
        Ok(hidden)
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn key_shifter(&self) -> Arc<dyn KeyShifter> {
        Arc::clone(&self.shifter)
    }
}

/// Key shifter that adds the offset to every key element and records each
/// `(layer, offset)` call.
#[derive(Default)]
pub struct RecordingShifter {
    calls: Mutex<Vec<(usize, i64)>>,
}

impl RecordingShifter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(usize, i64)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl KeyShifter for RecordingShifter {
    fn shift_keys(&self, layer: usize, keys: &Tensor, offset: i64) -> candle_core::Result<Tensor> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((layer, offset));
        keys.affine(1.0, offset as f64)
    }
}
