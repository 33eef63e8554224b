//! Small numeric helpers shared by the quantity model: compensated
//! summation, bin lookup and edge handling.

use crate::domain::errors::{ReduceError, ReduceResult};

use super::dims::Dim;

/// One Kahan compensation step. Returns the new running sum and updates the
/// compensation term in place.
pub(crate) fn kahan_add(sum: f64, value: f64, compensation: &mut f64) -> f64 {
    let adjusted = value - *compensation;
    let next = sum + adjusted;
    *compensation = (next - sum) - adjusted;
    next
}

pub(crate) fn stable_sum<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0;
    let mut compensation = 0.0;
    for value in values {
        sum = kahan_add(sum, value, &mut compensation);
    }
    sum
}

/// `bins + 1` evenly spaced edges from `start` to `stop` inclusive.
pub(crate) fn linspace(start: f64, stop: f64, bins: usize) -> Vec<f64> {
    let step = (stop - start) / bins as f64;
    let mut edges: Vec<f64> = (0..=bins).map(|i| start + step * i as f64).collect();
    edges[0] = start;
    edges[bins] = stop;
    edges
}

pub(crate) fn midpoints(edges: &[f64]) -> Vec<f64> {
    edges
        .windows(2)
        .map(|pair| 0.5 * (pair[0] + pair[1]))
        .collect()
}

/// Index of the bin containing `x` for ascending `edges`. Bins are
/// half-open except the last, which is closed so the axis maximum is kept.
pub(crate) fn bin_index(edges: &[f64], x: f64) -> Option<usize> {
    let last = edges.len() - 1;
    if x < edges[0] || x > edges[last] {
        return None;
    }
    if x == edges[last] {
        return Some(last - 1);
    }
    let upper = edges.partition_point(|&edge| edge <= x);
    Some(upper - 1)
}

/// Like [`bin_index`] but clamping out-of-range values to the first or last
/// bin (nearest-bin semantics).
pub(crate) fn bin_index_clamped(edges: &[f64], x: f64) -> usize {
    if x < edges[0] {
        0
    } else {
        bin_index(edges, x).unwrap_or(edges.len() - 2)
    }
}

pub(crate) fn validate_edges(dim: Dim, edges: &[f64]) -> ReduceResult<()> {
    if edges.len() < 2 {
        return Err(ReduceError::TooFewEdges {
            dim,
            found: edges.len(),
        });
    }
    if edges.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err(ReduceError::AxisNotIncreasing { dim });
    }
    Ok(())
}

/// Whether the bin `[e0, e1)` overlaps the closed range `[lo, hi]` with
/// nonzero measure.
pub(crate) fn bin_overlaps(e0: f64, e1: f64, lo: f64, hi: f64) -> bool {
    e1 > lo && e0 < hi
}

#[cfg(test)]
mod tests {
    use super::{bin_index, bin_index_clamped, bin_overlaps, linspace, midpoints, stable_sum};

    #[test]
    fn stable_sum_recovers_cancellation() {
        let values = [1.0e16, 1.0, -1.0e16, 1.0];
        assert_eq!(stable_sum(values.iter().copied()), 2.0);
    }

    #[test]
    fn linspace_hits_both_endpoints_exactly() {
        let edges = linspace(1.0, 13.0, 6);
        assert_eq!(edges.len(), 7);
        assert_eq!(edges[0], 1.0);
        assert_eq!(edges[6], 13.0);
        assert_eq!(edges[3], 7.0);
    }

    #[test]
    fn midpoints_halve_each_bin() {
        assert_eq!(midpoints(&[0.0, 2.0, 6.0]), vec![1.0, 4.0]);
    }

    #[test]
    fn bin_index_is_half_open_with_closed_last_bin() {
        let edges = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(bin_index(&edges, 0.0), Some(0));
        assert_eq!(bin_index(&edges, 1.0), Some(1));
        assert_eq!(bin_index(&edges, 2.999), Some(2));
        assert_eq!(bin_index(&edges, 3.0), Some(2));
        assert_eq!(bin_index(&edges, -0.1), None);
        assert_eq!(bin_index(&edges, 3.1), None);
    }

    #[test]
    fn clamped_lookup_maps_outliers_to_end_bins() {
        let edges = [0.0, 1.0, 2.0];
        assert_eq!(bin_index_clamped(&edges, -5.0), 0);
        assert_eq!(bin_index_clamped(&edges, 5.0), 1);
        assert_eq!(bin_index_clamped(&edges, 0.5), 0);
    }

    #[test]
    fn bin_overlap_excludes_touching_edges() {
        assert!(bin_overlaps(1.0, 2.0, 1.5, 3.0));
        assert!(!bin_overlaps(1.0, 2.0, 2.0, 3.0));
        assert!(!bin_overlaps(3.0, 4.0, 1.0, 3.0));
    }
}
