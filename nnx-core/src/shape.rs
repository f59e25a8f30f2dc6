//! C2: tensor shape (`Vector`) — a flat size sequence partitioned into named
//! `batch` / `feature` / `spatial` sub-ranges.

use std::ops::Range;

/// A shape: a flat sequence of non-negative sizes with named sub-ranges.
///
/// Equality is position-wise on the flattened sequence (SPEC_FULL.md §3) —
/// two shapes with the same `raw` compare equal regardless of how they were
/// constructed, but every constructor here produces the same partition for
/// the same logical layout, so in practice partitions agree whenever shapes
/// do.
#[derive(Debug, Clone)]
pub struct Shape {
    raw: Vec<usize>,
    batch: Range<usize>,
    feature: Range<usize>,
    spatial: Range<usize>,
}

impl PartialEq for Shape {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Shape {}

impl Shape {
    /// Builds a shape from an explicit batch scalar, feature scalar and
    /// spatial extents (in `(y, x)` or `(z, y, x)` order, matching how the
    /// reference kernels iterate them).
    pub fn new(batch: usize, feature: usize, spatial: &[usize]) -> Self {
        let mut raw = Vec::with_capacity(2 + spatial.len());
        raw.push(batch);
        raw.push(feature);
        raw.extend_from_slice(spatial);
        Shape {
            batch: 0..1,
            feature: 1..2,
            spatial: 2..raw.len(),
            raw,
        }
    }

    /// Builds a shape from a flat sequence already partitioned by the caller.
    pub fn from_raw(raw: Vec<usize>, batch: Range<usize>, feature: Range<usize>, spatial: Range<usize>) -> Self {
        Shape {
            raw,
            batch,
            feature,
            spatial,
        }
    }

    pub fn raw(&self) -> &[usize] {
        &self.raw
    }

    pub fn batch(&self) -> &[usize] {
        &self.raw[self.batch.clone()]
    }

    pub fn feature(&self) -> &[usize] {
        &self.raw[self.feature.clone()]
    }

    pub fn spatial(&self) -> &[usize] {
        &self.raw[self.spatial.clone()]
    }

    /// Scalar batch size, the common case (spec §3: "in most cases batch and
    /// feature are scalars").
    pub fn batch_size(&self) -> usize {
        self.batch().iter().product::<usize>().max(1)
    }

    pub fn feature_size(&self) -> usize {
        self.feature().iter().product::<usize>().max(1)
    }

    pub fn set_batch(&mut self, value: usize) {
        for slot in &mut self.raw[self.batch.clone()] {
            *slot = value;
        }
    }

    pub fn set_feature(&mut self, value: usize) {
        for slot in &mut self.raw[self.feature.clone()] {
            *slot = value;
        }
    }

    /// Total element count — the product of every entry in the flat sequence.
    pub fn element_count(&self) -> usize {
        self.raw.iter().product()
    }

    pub fn rank(&self) -> usize {
        self.raw.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_partitions_batch_feature_spatial() {
        let s = Shape::new(2, 3, &[4, 5]);
        assert_eq!(s.batch(), &[2]);
        assert_eq!(s.feature(), &[3]);
        assert_eq!(s.spatial(), &[4, 5]);
        assert_eq!(s.raw(), &[2, 3, 4, 5]);
    }

    #[test]
    fn equality_is_position_wise() {
        let a = Shape::new(1, 1, &[3, 3]);
        let b = Shape::new(1, 1, &[3, 3]);
        assert_eq!(a, b);
    }

    #[test]
    fn equality_ignores_sub_range_partitioning() {
        let a = Shape::new(1, 3, &[4, 5]);
        let b = Shape::from_raw(vec![1, 3, 4, 5], 0..2, 2..3, 3..4);
        assert_eq!(a, b);
    }

    #[test]
    fn element_count_is_product() {
        let s = Shape::new(2, 3, &[4, 5]);
        assert_eq!(s.element_count(), 2 * 3 * 4 * 5);
    }

    #[test]
    fn mutating_sub_range_mutates_flat_sequence() {
        let mut s = Shape::new(1, 3, &[4, 5]);
        s.set_batch(8);
        assert_eq!(s.raw()[0], 8);
        assert_eq!(s.batch_size(), 8);
    }
}
