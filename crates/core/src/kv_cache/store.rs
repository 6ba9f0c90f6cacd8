use candle_core::Tensor;

use super::error::CacheError;
use super::shift::KeyShifter;

/// Borrowed view of one layer's cached keys and values.
///
/// Layout: `[seq, num_kv_heads, head_dim]`, rows ordered by position.
#[derive(Debug, Clone, Copy)]
pub struct CachedKv<'a> {
    pub keys: &'a Tensor,
    pub values: &'a Tensor,
    pub positions: &'a [usize],
}

/// Position-indexed K/V rows for a single layer.
///
/// Positions are strictly increasing; row `i` of `keys`/`values` belongs to
/// `positions[i]`. Tensor clones are reference-counted, so cloning a store to
/// stage a mutation is cheap.
#[derive(Debug, Clone, Default)]
pub struct KvStore {
    keys: Option<Tensor>,
    values: Option<Tensor>,
    positions: Vec<usize>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn newest(&self) -> Option<usize> {
        self.positions.last().copied()
    }

    pub fn contains(&self, position: usize) -> bool {
        self.positions.binary_search(&position).is_ok()
    }

    pub fn view(&self) -> Option<CachedKv<'_>> {
        match (&self.keys, &self.values) {
            (Some(keys), Some(values)) => Some(CachedKv {
                keys,
                values,
                positions: &self.positions,
            }),
            _ => None,
        }
    }

    /// Append rows for `positions`, which must all follow the newest cached
    /// position in strictly increasing order.
    pub fn append(
        &mut self,
        positions: &[usize],
        keys: &Tensor,
        values: &Tensor,
    ) -> Result<(), CacheError> {
        if positions.is_empty() {
            return Ok(());
        }
        let rows = keys.dim(0)?;
        if rows != positions.len() || values.dims() != keys.dims() {
            return Err(CacheError::ShapeMismatch(format!(
                "{} positions with keys {:?} and values {:?}",
                positions.len(),
                keys.dims(),
                values.dims()
            )));
        }
        let mut last = self.newest();
        for &position in positions {
            if let Some(last) = last {
                if position <= last {
                    return Err(CacheError::NonMonotonicPosition { last, position });
                }
            }
            last = Some(position);
        }

        let (keys, values) = match (&self.keys, &self.values) {
            (Some(k), Some(v)) => {
                if k.dims()[1..] != keys.dims()[1..] {
                    return Err(CacheError::ShapeMismatch(format!(
                        "cached rows {:?} vs appended rows {:?}",
                        k.dims(),
                        keys.dims()
                    )));
                }
                (Tensor::cat(&[k, keys], 0)?, Tensor::cat(&[v, values], 0)?)
            }
            _ => (keys.clone(), values.clone()),
        };
        self.keys = Some(keys);
        self.values = Some(values);
        self.positions.extend_from_slice(positions);
        Ok(())
    }

    /// Drop every row whose position is below `min_position`.
    pub fn retain_from(&mut self, min_position: usize) -> Result<(), CacheError> {
        let cut = self.positions.partition_point(|&p| p < min_position);
        if cut == 0 {
            return Ok(());
        }
        if cut == self.positions.len() {
            self.clear();
            return Ok(());
        }
        let keep = self.positions.len() - cut;
        self.keys = self.keys.as_ref().map(|k| k.narrow(0, cut, keep)).transpose()?;
        self.values = self
            .values
            .as_ref()
            .map(|v| v.narrow(0, cut, keep))
            .transpose()?;
        self.positions.drain(..cut);
        Ok(())
    }

    /// State with every position in `[begin, end)` removed.
    pub fn without_range(&self, begin: usize, end: usize) -> Result<Self, CacheError> {
        let start = self.positions.partition_point(|&p| p < begin);
        let stop = self.positions.partition_point(|&p| p < end);
        if start >= stop {
            return Ok(self.clone());
        }
        let kept: Vec<u32> = (0..start)
            .chain(stop..self.positions.len())
            .map(|i| i as u32)
            .collect();
        let positions: Vec<usize> = self.positions[..start]
            .iter()
            .chain(&self.positions[stop..])
            .copied()
            .collect();
        if kept.is_empty() {
            return Ok(Self::default());
        }
        let (keys, values) = match (&self.keys, &self.values) {
            (Some(k), Some(v)) => {
                let index = Tensor::new(kept.as_slice(), k.device())?;
                (k.index_select(&index, 0)?, v.index_select(&index, 0)?)
            }
            _ => return Ok(Self::default()),
        };
        Ok(Self {
            keys: Some(keys),
            values: Some(values),
            positions,
        })
    }

    /// State with every position `>= begin` moved by `offset`.
    ///
    /// Keys of moved rows are re-rotated through `shifter`; values are
    /// position-free and copied as-is. Fails without side effects if a
    /// position would go negative or collide with an unmoved one.
    pub fn shifted(
        &self,
        layer: usize,
        begin: usize,
        offset: i64,
        shifter: &dyn KeyShifter,
    ) -> Result<Self, CacheError> {
        let split = self.positions.partition_point(|&p| p < begin);
        if offset == 0 || split == self.positions.len() {
            return Ok(self.clone());
        }

        let mut positions = self.positions.clone();
        for p in &mut positions[split..] {
            let moved = *p as i64 + offset;
            if moved < 0 {
                return Err(CacheError::PositionOutOfRange {
                    position: *p,
                    offset,
                });
            }
            *p = moved as usize;
        }
        if split > 0 && positions[split] <= positions[split - 1] {
            return Err(CacheError::NonMonotonicPosition {
                last: positions[split - 1],
                position: positions[split],
            });
        }

        let Some(keys) = &self.keys else {
            return Ok(self.clone());
        };
        let moved_rows = positions.len() - split;
        let tail = keys.narrow(0, split, moved_rows)?;
        let rotated = shifter.shift_keys(layer, &tail, offset)?;
        if rotated.dims() != tail.dims() {
            return Err(CacheError::ShapeMismatch(format!(
                "key shifter returned {:?} for {:?}",
                rotated.dims(),
                tail.dims()
            )));
        }
        let keys = if split == 0 {
            rotated
        } else {
            Tensor::cat(&[&keys.narrow(0, 0, split)?, &rotated], 0)?
        };

        Ok(Self {
            keys: Some(keys),
            values: self.values.clone(),
            positions,
        })
    }

    pub fn clear(&mut self) {
        self.keys = None;
        self.values = None;
        self.positions.clear();
    }
}
