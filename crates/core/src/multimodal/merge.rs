//! Folding runs of image carriers into the token that consumes them.

use candle_core::Tensor;
use tracing::debug;

use super::hash::HashFold;
use super::inputs::{ImageEmbedding, Input};
use crate::error::{InputError, Result};

/// Axis along which the embeddings of one run are concatenated.
pub const MERGE_AXIS: usize = 0;

/// Collapse every maximal run of image carriers into the next real token.
///
/// For a run `c1 .. cN` followed by token `t`:
/// - `t` becomes the sole holder of the merged embedding (the run's
///   embeddings concatenated along [`MERGE_AXIS`] in encounter order) and of
///   the left-to-right [`HashFold`] of the run's hashes;
/// - `c1` stays in the stream, stripped of its payload, as the anchor that
///   [`expand_image_carriers`](super::expand_image_carriers) replaces with
///   the image template;
/// - `c2 .. cN` are consumed.
///
/// Real tokens that do not follow a run are untouched. A run with no
/// consuming token at the end of the stream is rejected.
pub fn merge_image_runs(inputs: Vec<Input>) -> Result<Vec<Input>> {
    let mut merged = Vec::with_capacity(inputs.len());
    let mut pending: Vec<ImageEmbedding> = Vec::new();
    let mut fold = HashFold::new();
    let mut runs = 0usize;
    let mut consumed = 0usize;

    for (index, mut input) in inputs.into_iter().enumerate() {
        if input.token.is_carrier() {
            let image = input
                .multimodal
                .take()
                .ok_or(InputError::CarrierWithoutEmbedding { index })?;
            if pending.is_empty() {
                merged.push(input);
            } else {
                consumed += 1;
            }
            pending.push(image);
            continue;
        }

        if let Some((first, rest)) = pending.split_first() {
            input.multimodal = Some(merge_run(first, rest, &mut fold)?);
            pending.clear();
            runs += 1;
        }
        merged.push(input);
    }

    if !pending.is_empty() {
        return Err(InputError::UnconsumedImageRun {
            carriers: pending.len(),
        }
        .into());
    }

    debug!(runs, consumed, len = merged.len(), "Merged image carrier runs");
    Ok(merged)
}

fn merge_run(
    first: &ImageEmbedding,
    rest: &[ImageEmbedding],
    fold: &mut HashFold,
) -> Result<ImageEmbedding> {
    if rest.is_empty() {
        return Ok(first.clone());
    }

    let embeddings: Vec<&Tensor> = std::iter::once(first)
        .chain(rest)
        .map(|img| &img.embedding)
        .collect();
    let embedding = Tensor::cat(&embeddings, MERGE_AXIS)?;
    let hash = rest
        .iter()
        .fold(first.hash, |running, img| fold.fold(running, img.hash));

    Ok(ImageEmbedding { embedding, hash })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multimodal::inputs::{Token, MM_TOKENS_PER_IMAGE};
    use crate::Error;
    use candle_core::{DType, Device};

    const HIDDEN: usize = 4;

    fn image(fill: f32, hash: u64) -> Input {
        let emb = Tensor::full(fill, (1, MM_TOKENS_PER_IMAGE, HIDDEN), &Device::Cpu).unwrap();
        Input::image(ImageEmbedding::new(emb, hash))
    }

    fn first_values(emb: &Tensor) -> Vec<f32> {
        // One value per batch entry.
        emb.narrow(1, 0, 1)
            .unwrap()
            .narrow(2, 0, 1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap()
    }

    #[test]
    fn single_carrier_moves_payload_to_consumer() {
        let out = merge_image_runs(vec![image(1.0, 11), Input::text(5)]).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].token, Token::ImageCarrier);
        assert!(out[0].multimodal.is_none());
        assert_eq!(out[1].token, Token::Text(5));
        assert_eq!(out[1].hash(), Some(11));
    }

    #[test]
    fn run_of_three_folds_in_order() {
        let out = merge_image_runs(vec![
            image(1.0, 1),
            image(2.0, 2),
            image(3.0, 3),
            Input::text(9),
        ])
        .unwrap();

        assert_eq!(out.len(), 2);
        let mm = out[1].multimodal.as_ref().unwrap();
        assert_eq!(mm.embedding.dims(), &[3, MM_TOKENS_PER_IMAGE, HIDDEN]);
        assert_eq!(first_values(&mm.embedding), vec![1.0, 2.0, 3.0]);
        assert_eq!(mm.hash, HashFold::new().fold_all([1, 2, 3]).unwrap());
    }

    #[test]
    fn reversed_run_changes_hash() {
        let forward = merge_image_runs(vec![image(0.0, 100), image(0.0, 200), Input::text(1)])
            .unwrap();
        let reversed = merge_image_runs(vec![image(0.0, 200), image(0.0, 100), Input::text(1)])
            .unwrap();
        assert_ne!(forward[1].hash(), reversed[1].hash());
    }

    #[test]
    fn separate_runs_stay_separate() {
        let out = merge_image_runs(vec![
            Input::text(1),
            image(1.0, 10),
            Input::text(2),
            Input::text(3),
            image(2.0, 20),
            image(3.0, 30),
            Input::text(4),
        ])
        .unwrap();

        let tokens: Vec<Token> = out.iter().map(|i| i.token).collect();
        assert_eq!(
            tokens,
            vec![
                Token::Text(1),
                Token::ImageCarrier,
                Token::Text(2),
                Token::Text(3),
                Token::ImageCarrier,
                Token::Text(4),
            ]
        );
        assert_eq!(out[2].hash(), Some(10));
        assert!(out[3].multimodal.is_none());
        assert_eq!(out[5].hash(), HashFold::new().fold_all([20, 30]));
    }

    #[test]
    fn text_only_is_untouched() {
        let out = merge_image_runs(vec![Input::text(1), Input::text(2)]).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|i| i.multimodal.is_none()));
    }

    #[test]
    fn trailing_run_is_rejected() {
        let err = merge_image_runs(vec![Input::text(1), image(1.0, 1), image(1.0, 2)]).unwrap_err();
        assert!(matches!(
            err,
            Error::Input(InputError::UnconsumedImageRun { carriers: 2 })
        ));
    }

    #[test]
    fn carrier_without_embedding_is_rejected() {
        let mut bare = image(0.0, 0);
        bare.multimodal = None;
        let err = merge_image_runs(vec![Input::text(1), bare, Input::text(2)]).unwrap_err();
        assert!(matches!(
            err,
            Error::Input(InputError::CarrierWithoutEmbedding { index: 1 })
        ));
    }

    #[test]
    fn mismatched_hidden_sizes_fail_concat() {
        let odd = Tensor::zeros((1, MM_TOKENS_PER_IMAGE, HIDDEN + 1), DType::F32, &Device::Cpu)
            .unwrap();
        let err = merge_image_runs(vec![
            image(0.0, 1),
            Input::image(ImageEmbedding::new(odd, 2)),
            Input::text(3),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Candle(_)));
    }
}
