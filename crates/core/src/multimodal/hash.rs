//! Content hashing for image identity.
//!
//! Images are identified by the xxHash64 of their raw bytes. When a run of
//! images is merged, hashes are folded left to right with [`HashFold`], which
//! is order-sensitive: `fold(a, b) != fold(b, a)`.

use xxhash_rust::xxh64::{xxh64, Xxh64};

const SEED: u64 = 0;

/// xxHash64 of the raw encoded image bytes.
pub fn content_hash(bytes: &[u8]) -> u64 {
    xxh64(bytes, SEED)
}

/// Streaming, order-sensitive hash combiner.
///
/// Each [`fold`](Self::fold) resets the hasher state, feeds the running hash
/// then the next hash (little-endian), and finalizes.
pub struct HashFold {
    hasher: Xxh64,
}

impl HashFold {
    pub fn new() -> Self {
        Self {
            hasher: Xxh64::new(SEED),
        }
    }

    pub fn fold(&mut self, running: u64, next: u64) -> u64 {
        self.hasher.reset(SEED);
        self.hasher.update(&running.to_le_bytes());
        self.hasher.update(&next.to_le_bytes());
        self.hasher.digest()
    }

    /// Fold a whole sequence; `None` when empty.
    pub fn fold_all(&mut self, hashes: impl IntoIterator<Item = u64>) -> Option<u64> {
        let mut iter = hashes.into_iter();
        let first = iter.next()?;
        Some(iter.fold(first, |running, next| self.fold(running, next)))
    }
}

impl Default for HashFold {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic() {
        let bytes = b"\x89PNG fake image bytes";
        assert_eq!(content_hash(bytes), content_hash(bytes));
        assert_ne!(content_hash(bytes), content_hash(b"other bytes"));
    }

    #[test]
    fn fold_is_order_sensitive() {
        let mut f = HashFold::new();
        let ab = f.fold(1, 2);
        let ba = f.fold(2, 1);
        assert_ne!(ab, ba);
    }

    #[test]
    fn fold_resets_between_calls() {
        let mut f = HashFold::new();
        let first = f.fold(10, 20);
        f.fold(99, 100);
        assert_eq!(f.fold(10, 20), first);
    }

    #[test]
    fn fold_matches_one_shot_hash() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&5u64.to_le_bytes());
        bytes.extend_from_slice(&6u64.to_le_bytes());
        assert_eq!(HashFold::new().fold(5, 6), xxh64(&bytes, SEED));
    }

    #[test]
    fn fold_all_single_is_identity() {
        let mut f = HashFold::new();
        assert_eq!(f.fold_all([77]), Some(77));
        assert_eq!(f.fold_all(std::iter::empty()), None);
    }

    #[test]
    fn fold_all_is_left_to_right() {
        let mut f = HashFold::new();
        let expected = {
            let ab = f.fold(1, 2);
            f.fold(ab, 3)
        };
        assert_eq!(f.fold_all([1, 2, 3]), Some(expected));
        assert_ne!(f.fold_all([3, 2, 1]), Some(expected));
    }
}
