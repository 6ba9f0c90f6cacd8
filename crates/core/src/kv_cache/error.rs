use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache capacity exceeded: capacity {capacity}, requested {requested}")]
    CapacityExceeded { capacity: usize, requested: usize },

    #[error("position {position} out of range after shift by {offset}")]
    PositionOutOfRange { position: usize, offset: i64 },

    #[error("non-monotonic position: {position} does not follow {last}")]
    NonMonotonicPosition { last: usize, position: usize },

    #[error("layer {layer} out of range for {num_layers} layers")]
    LayerOutOfRange { layer: usize, num_layers: usize },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid sliding window length: {0}")]
    InvalidWindow(usize),

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_capacity_exceeded() {
        let e = CacheError::CapacityExceeded {
            capacity: 8,
            requested: 10,
        };
        assert_eq!(
            e.to_string(),
            "cache capacity exceeded: capacity 8, requested 10"
        );
    }

    #[test]
    fn error_display_layer_out_of_range() {
        let e = CacheError::LayerOutOfRange {
            layer: 5,
            num_layers: 4,
        };
        assert_eq!(e.to_string(), "layer 5 out of range for 4 layers");
    }

    #[test]
    fn error_display_position_out_of_range() {
        let e = CacheError::PositionOutOfRange {
            position: 2,
            offset: -3,
        };
        assert_eq!(e.to_string(), "position 2 out of range after shift by -3");
    }
}
