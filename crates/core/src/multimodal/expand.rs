//! Replacing image carriers with the placeholder template.

use tracing::debug;

use super::inputs::{ImageEmbedding, Input, Token, MM_TOKENS_PER_IMAGE};

/// Token ids of the image template:
/// `separator, start_of_image, placeholder x (256 * images), end_of_image`.
///
/// A single image yields the 259-token form. A merged run of N images gets
/// one template whose placeholder block holds all N x 256 vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTemplate {
    /// `"\n\n"` in the Gemma3 vocabulary.
    pub separator: u32,
    pub start_of_image: u32,
    pub placeholder: u32,
    pub end_of_image: u32,
}

impl Default for ImageTemplate {
    fn default() -> Self {
        Self {
            separator: 108,
            start_of_image: 255_999,
            placeholder: 0,
            end_of_image: 256_000,
        }
    }
}

impl ImageTemplate {
    /// Template length for a single image.
    pub const LEN: usize = Self::len_for(1);
    /// Offset of the first placeholder within the template.
    pub const PLACEHOLDER_OFFSET: usize = 2;

    /// Template length for a run of `images` images.
    pub const fn len_for(images: usize) -> usize {
        images * MM_TOKENS_PER_IMAGE + 3
    }

    pub fn tokens(&self, images: usize) -> impl Iterator<Item = u32> {
        let t = *self;
        [t.separator, t.start_of_image]
            .into_iter()
            .chain(std::iter::repeat(t.placeholder).take(images * MM_TOKENS_PER_IMAGE))
            .chain(std::iter::once(t.end_of_image))
    }

    /// Whether `inputs[end - len_for(images) .. end]` is exactly this template.
    pub fn ends_at(&self, inputs: &[Input], end: usize, images: usize) -> bool {
        let len = Self::len_for(images);
        if end < len || end > inputs.len() {
            return false;
        }
        inputs[end - len..end]
            .iter()
            .zip(self.tokens(images))
            .all(|(input, id)| input.token == Token::Text(id))
    }
}

/// Replace each image carrier with one [`ImageTemplate`].
///
/// After merging, a run's anchor carrier sits directly before its consumer,
/// and the template is sized to the consumer's image count. A carrier with no
/// consumer behind it gets the single-image template.
///
/// The output is built fresh; non-carrier inputs keep their payloads, flags
/// and relative order. Positions are renumbered contiguously from the first
/// input's position. Template inputs are never output positions.
pub fn expand_image_carriers(inputs: Vec<Input>, template: &ImageTemplate) -> Vec<Input> {
    let base = inputs.first().map_or(0, |input| input.position);
    let carriers = inputs.iter().filter(|i| i.token.is_carrier()).count();
    let mut expanded = Vec::with_capacity(inputs.len() + carriers * (ImageTemplate::LEN - 1));

    let mut inputs = inputs.into_iter().peekable();
    while let Some(input) = inputs.next() {
        if input.token.is_carrier() {
            let images = inputs
                .peek()
                .filter(|next| !next.token.is_carrier())
                .and_then(|next| next.multimodal.as_ref())
                .map_or(1, ImageEmbedding::num_images);
            expanded.extend(template.tokens(images).map(Input::text));
        } else {
            expanded.push(input);
        }
    }

    for (offset, input) in expanded.iter_mut().enumerate() {
        input.position = base + offset;
    }

    debug!(carriers, len = expanded.len(), "Expanded image carriers");
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multimodal::inputs::ImageEmbedding;
    use candle_core::{DType, Device, Tensor};

    fn ids(inputs: &[Input]) -> Vec<Option<u32>> {
        inputs.iter().map(|i| i.token.id()).collect()
    }

    fn bare_carrier() -> Input {
        Input {
            token: Token::ImageCarrier,
            multimodal: None,
            position: 0,
            output: false,
        }
    }

    #[test]
    fn template_layout() {
        let t = ImageTemplate::default();
        let tokens: Vec<u32> = t.tokens(1).collect();
        assert_eq!(tokens.len(), 259);
        assert_eq!(tokens[0], 108);
        assert_eq!(tokens[1], 255_999);
        assert!(tokens[2..258].iter().all(|&id| id == 0));
        assert_eq!(tokens[258], 256_000);
    }

    #[test]
    fn carrier_becomes_template_in_place() {
        let t = ImageTemplate::default();
        let out = expand_image_carriers(
            vec![Input::text(1), bare_carrier(), Input::text(2)],
            &t,
        );

        assert_eq!(out.len(), 2 + ImageTemplate::LEN);
        assert_eq!(out[0].token, Token::Text(1));
        assert!(t.ends_at(&out, 1 + ImageTemplate::LEN, 1));
        assert_eq!(out[1 + ImageTemplate::LEN].token, Token::Text(2));
    }

    #[test]
    fn multiple_carriers_do_not_corrupt_each_other() {
        let t = ImageTemplate::default();
        let out = expand_image_carriers(
            vec![bare_carrier(), Input::text(7), bare_carrier(), Input::text(8)],
            &t,
        );

        let len = ImageTemplate::LEN;
        assert_eq!(out.len(), 2 * len + 2);
        assert!(t.ends_at(&out, len, 1));
        assert_eq!(out[len].token, Token::Text(7));
        assert!(t.ends_at(&out, 2 * len + 1, 1));
        assert_eq!(out[2 * len + 1].token, Token::Text(8));
        assert!(out.iter().all(|i| !i.token.is_carrier()));
    }

    #[test]
    fn positions_are_renumbered_from_base() {
        let t = ImageTemplate::default();
        let out = expand_image_carriers(
            vec![
                Input::text(1).with_position(10),
                bare_carrier().with_position(11),
                Input::text(2).with_position(12),
            ],
            &t,
        );
        let positions: Vec<usize> = out.iter().map(|i| i.position).collect();
        let expected: Vec<usize> = (10..10 + out.len()).collect();
        assert_eq!(positions, expected);
    }

    #[test]
    fn passthrough_keeps_payload_and_output_flag() {
        let t = ImageTemplate::default();
        let emb = Tensor::zeros((1, MM_TOKENS_PER_IMAGE, 2), DType::F32, &Device::Cpu).unwrap();
        let mut consumer = Input::text(3).with_output(true);
        consumer.multimodal = Some(ImageEmbedding::new(emb, 42));

        let out = expand_image_carriers(vec![bare_carrier(), consumer], &t);
        let last = out.last().unwrap();
        assert_eq!(last.hash(), Some(42));
        assert!(last.output);
        assert!(out[..ImageTemplate::LEN].iter().all(|i| !i.output));
    }

    #[test]
    fn merged_run_gets_placeholders_for_every_image() {
        let t = ImageTemplate::default();
        let emb = Tensor::zeros((3, MM_TOKENS_PER_IMAGE, 2), DType::F32, &Device::Cpu).unwrap();
        let mut consumer = Input::text(3);
        consumer.multimodal = Some(ImageEmbedding::new(emb, 5));

        let out = expand_image_carriers(vec![bare_carrier(), consumer], &t);
        let len = ImageTemplate::len_for(3);
        assert_eq!(len, 3 * 256 + 3);
        assert_eq!(out.len(), len + 1);
        assert!(t.ends_at(&out, len, 3));
        assert!(!t.ends_at(&out, len, 1));
        assert_eq!(out[len - 1].token, Token::Text(256_000));
        assert_eq!(out[len].hash(), Some(5));
    }

    #[test]
    fn text_only_is_identity() {
        let t = ImageTemplate::default();
        let out = expand_image_carriers(vec![Input::text(1), Input::text(2)], &t);
        assert_eq!(ids(&out), vec![Some(1), Some(2)]);
    }

    #[test]
    fn custom_template_ids() {
        let t = ImageTemplate {
            separator: 1,
            start_of_image: 2,
            placeholder: 3,
            end_of_image: 4,
        };
        let out = expand_image_carriers(vec![bare_carrier()], &t);
        assert_eq!(out[0].token, Token::Text(1));
        assert_eq!(out[1].token, Token::Text(2));
        assert_eq!(out[2].token, Token::Text(3));
        assert_eq!(out[258].token, Token::Text(4));
        assert!(!ImageTemplate::default().ends_at(&out, out.len(), 1));
    }
}
