//! Dense (histogrammed) arrays: labelled axes, values and optional
//! variances kept in lockstep.

use ndarray::{ArrayD, ArrayView1, ArrayViewMut1, Axis, Dimension, IxDyn, Slice, Zip};

use crate::domain::errors::{ReduceError, ReduceResult};

use super::dims::Dim;
use super::numeric::{bin_index, kahan_add};

/// Multi-dimensional values with one [`Dim`] label per axis.
///
/// Variances, when present, always have the data shape. Operations that
/// would break that pairing (summing, rebinning, slicing) transform both
/// arrays together.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseArray {
    dims: Vec<Dim>,
    values: ArrayD<f64>,
    variances: Option<ArrayD<f64>>,
}

impl DenseArray {
    pub fn new(dims: Vec<Dim>, values: ArrayD<f64>) -> ReduceResult<Self> {
        if dims.len() != values.ndim() {
            return Err(ReduceError::RankMismatch {
                dims: dims.len(),
                axes: values.ndim(),
            });
        }
        for (position, dim) in dims.iter().enumerate() {
            if dims[..position].contains(dim) {
                return Err(ReduceError::DuplicateDim { dim: *dim });
            }
        }
        Ok(Self {
            dims,
            values,
            variances: None,
        })
    }

    pub fn with_variances(mut self, variances: ArrayD<f64>) -> ReduceResult<Self> {
        if variances.shape() != self.values.shape() {
            return Err(ReduceError::VarianceShape {
                data: self.values.shape().to_vec(),
                found: variances.shape().to_vec(),
            });
        }
        self.variances = Some(variances);
        Ok(self)
    }

    /// Zero-dimensional array holding a single value.
    pub fn scalar(value: f64) -> Self {
        Self {
            dims: Vec::new(),
            values: ArrayD::from_elem(IxDyn(&[]), value),
            variances: None,
        }
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    pub fn variances(&self) -> Option<&ArrayD<f64>> {
        self.variances.as_ref()
    }

    pub fn has_variances(&self) -> bool {
        self.variances.is_some()
    }

    pub fn axis_of(&self, dim: Dim) -> Option<usize> {
        self.dims.iter().position(|&d| d == dim)
    }

    pub fn size(&self, dim: Dim) -> Option<usize> {
        self.axis_of(dim).map(|axis| self.values.shape()[axis])
    }

    pub fn without_variances(mut self) -> Self {
        self.variances = None;
        self
    }

    pub fn into_parts(self) -> (Vec<Dim>, ArrayD<f64>, Option<ArrayD<f64>>) {
        (self.dims, self.values, self.variances)
    }

    /// Reorder axes to match `order`, which must list exactly this array's
    /// dimensions.
    pub(crate) fn transposed(&self, order: &[Dim]) -> ReduceResult<Self> {
        if order == self.dims.as_slice() {
            return Ok(self.clone());
        }
        if order.len() != self.dims.len() {
            return Err(ReduceError::RankMismatch {
                dims: order.len(),
                axes: self.dims.len(),
            });
        }
        let mut permutation = Vec::with_capacity(order.len());
        for dim in order {
            let axis = self
                .axis_of(*dim)
                .ok_or(ReduceError::MissingDim { dim: *dim })?;
            permutation.push(axis);
        }
        let values = self.values.clone().permuted_axes(IxDyn(&permutation));
        let variances = self
            .variances
            .clone()
            .map(|v| v.permuted_axes(IxDyn(&permutation)));
        Ok(Self {
            dims: order.to_vec(),
            values,
            variances,
        })
    }

    /// Ensure `dim` is an axis, inserting it outermost with length 1 when
    /// absent.
    pub(crate) fn with_dim_axis(&self, dim: Dim) -> Self {
        if self.dims.contains(&dim) {
            return self.clone();
        }
        let mut dims = Vec::with_capacity(self.dims.len() + 1);
        dims.push(dim);
        dims.extend_from_slice(&self.dims);
        Self {
            dims,
            values: self.values.clone().insert_axis(Axis(0)),
            variances: self.variances.clone().map(|v| v.insert_axis(Axis(0))),
        }
    }

    /// Sum values (and variances) over the listed dimensions, keeping the
    /// remaining axes in their current order.
    pub fn sum_over(&self, dims: &[Dim]) -> ReduceResult<Self> {
        let mut axes = Vec::with_capacity(dims.len());
        for dim in dims {
            let axis = self
                .axis_of(*dim)
                .ok_or(ReduceError::MissingDim { dim: *dim })?;
            axes.push(axis);
        }
        axes.sort_unstable();
        let mut values = self.values.clone();
        let mut variances = self.variances.clone();
        for &axis in axes.iter().rev() {
            values = values.sum_axis(Axis(axis));
            variances = variances.map(|v| v.sum_axis(Axis(axis)));
        }
        let kept = self
            .dims
            .iter()
            .copied()
            .filter(|dim| !dims.contains(dim))
            .collect();
        Ok(Self {
            dims: kept,
            values,
            variances,
        })
    }

    /// Mean over all elements not flagged in `excluded` (same shape as the
    /// data). Returns the mean and, when variances are present, the variance
    /// of the mean.
    pub(crate) fn mean_excluding(
        &self,
        excluded: Option<&ArrayD<bool>>,
    ) -> ReduceResult<(f64, Option<f64>)> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut sum_compensation = 0.0;
        let mut var_sum = 0.0;
        let mut var_compensation = 0.0;
        for (pattern, &value) in self.values.indexed_iter() {
            let index = pattern.slice();
            if let Some(flags) = excluded {
                if flags[index] {
                    continue;
                }
            }
            count += 1;
            sum = kahan_add(sum, value, &mut sum_compensation);
            if let Some(variances) = &self.variances {
                var_sum = kahan_add(var_sum, variances[index], &mut var_compensation);
            }
        }
        if count == 0 {
            return Err(ReduceError::EmptyReduction { operation: "mean" });
        }
        let n = count as f64;
        let variance = self.variances.as_ref().map(|_| var_sum / (n * n));
        Ok((sum / n, variance))
    }

    /// Redistribute counts from `old_edges` to `new_edges` along `dim` by
    /// fractional bin overlap. Variances carry the same fractions so bin
    /// totals are conserved.
    pub(crate) fn rebin(
        &self,
        dim: Dim,
        old_edges: &[f64],
        new_edges: &[f64],
    ) -> ReduceResult<Self> {
        let axis = self.axis_of(dim).ok_or(ReduceError::MissingDim { dim })?;
        let mut shape = self.values.shape().to_vec();
        shape[axis] = new_edges.len() - 1;

        let mut values = ArrayD::zeros(IxDyn(&shape));
        Zip::from(self.values.lanes(Axis(axis)))
            .and(values.lanes_mut(Axis(axis)))
            .for_each(|input, mut output| rebin_lane(old_edges, new_edges, &input, &mut output));
        let variances = match &self.variances {
            Some(input) => {
                let mut output = ArrayD::zeros(IxDyn(&shape));
                Zip::from(input.lanes(Axis(axis)))
                    .and(output.lanes_mut(Axis(axis)))
                    .for_each(|input, mut output| {
                        rebin_lane(old_edges, new_edges, &input, &mut output)
                    });
                Some(output)
            }
            None => None,
        };
        Ok(Self {
            dims: self.dims.clone(),
            values,
            variances,
        })
    }

    /// Histogram into `edges` along a new dimension `new_dim`, consuming the
    /// dimensions the per-element coordinate spans. Elements whose coordinate
    /// falls outside the edges are dropped.
    pub(crate) fn hist_by_coord(
        &self,
        coord_dims: &[Dim],
        coord_values: &ArrayD<f64>,
        new_dim: Dim,
        edges: &[f64],
    ) -> ReduceResult<Self> {
        let mut coord_axes = Vec::with_capacity(coord_dims.len());
        for dim in coord_dims {
            let axis = self
                .axis_of(*dim)
                .ok_or(ReduceError::MissingDim { dim: *dim })?;
            coord_axes.push(axis);
        }
        let kept_axes: Vec<usize> = (0..self.dims.len())
            .filter(|axis| !coord_axes.contains(axis))
            .collect();
        let kept_dims: Vec<Dim> = kept_axes.iter().map(|&axis| self.dims[axis]).collect();
        if kept_dims.contains(&new_dim) {
            return Err(ReduceError::DuplicateDim { dim: new_dim });
        }

        let mut shape: Vec<usize> = kept_axes
            .iter()
            .map(|&axis| self.values.shape()[axis])
            .collect();
        shape.push(edges.len() - 1);
        let mut values = ArrayD::zeros(IxDyn(&shape));
        let mut variances = self.variances.as_ref().map(|_| ArrayD::zeros(IxDyn(&shape)));

        let mut coord_index = vec![0usize; coord_axes.len()];
        let mut out_index = vec![0usize; shape.len()];
        for (pattern, &value) in self.values.indexed_iter() {
            let index = pattern.slice();
            for (slot, &axis) in coord_index.iter_mut().zip(&coord_axes) {
                *slot = index[axis];
            }
            let Some(bin) = bin_index(edges, coord_values[coord_index.as_slice()]) else {
                continue;
            };
            for (slot, &axis) in out_index.iter_mut().zip(&kept_axes) {
                *slot = index[axis];
            }
            out_index[kept_axes.len()] = bin;
            values[out_index.as_slice()] += value;
            if let (Some(output), Some(input)) = (&mut variances, &self.variances) {
                output[out_index.as_slice()] += input[index];
            }
        }

        let mut dims = kept_dims;
        dims.push(new_dim);
        Ok(Self {
            dims,
            values,
            variances,
        })
    }

    /// Copy with values (and variances) zeroed wherever `flags` is set, so
    /// flagged elements contribute nothing to subsequent sums.
    pub(crate) fn zero_where(&self, flags: &ArrayD<bool>) -> Self {
        let mut values = self.values.clone();
        let mut variances = self.variances.clone();
        for (pattern, &flag) in flags.indexed_iter() {
            if !flag {
                continue;
            }
            let index = pattern.slice();
            values[index] = 0.0;
            if let Some(variances) = &mut variances {
                variances[index] = 0.0;
            }
        }
        Self {
            dims: self.dims.clone(),
            values,
            variances,
        }
    }

    /// Keep bins `start..stop` along `dim`.
    pub(crate) fn slice_bins(&self, dim: Dim, start: usize, stop: usize) -> ReduceResult<Self> {
        let axis = self.axis_of(dim).ok_or(ReduceError::MissingDim { dim })?;
        let values = self
            .values
            .slice_axis(Axis(axis), Slice::from(start..stop))
            .to_owned();
        let variances = self
            .variances
            .as_ref()
            .map(|v| v.slice_axis(Axis(axis), Slice::from(start..stop)).to_owned());
        Ok(Self {
            dims: self.dims.clone(),
            values,
            variances,
        })
    }

    /// Drop every axis of length 1.
    pub(crate) fn squeeze(&self) -> Self {
        let mut dims = self.dims.clone();
        let mut values = self.values.clone();
        let mut variances = self.variances.clone();
        for axis in (0..dims.len()).rev() {
            if values.shape()[axis] == 1 {
                values = values.index_axis_move(Axis(axis), 0);
                variances = variances.map(|v| v.index_axis_move(Axis(axis), 0));
                dims.remove(axis);
            }
        }
        Self {
            dims,
            values,
            variances,
        }
    }
}

/// Stack or append two arrays along `dim`, inserting the dimension with
/// length 1 on whichever operand lacks it.
pub(crate) fn concat_pair(a: &DenseArray, b: &DenseArray, dim: Dim) -> ReduceResult<DenseArray> {
    let a = a.with_dim_axis(dim);
    let b = b.with_dim_axis(dim).transposed(&a.dims)?;
    if a.variances.is_some() != b.variances.is_some() {
        return Err(ReduceError::VarianceMix {
            operation: "concatenation",
        });
    }
    let axis = match a.axis_of(dim) {
        Some(axis) => axis,
        None => return Err(ReduceError::MissingDim { dim }),
    };
    for (&other, (&left, &right)) in a
        .dims
        .iter()
        .zip(a.values.shape().iter().zip(b.values.shape()))
    {
        if other != dim && left != right {
            return Err(ReduceError::SizeMismatch {
                dim: other,
                left,
                right,
            });
        }
    }
    let left = a.values.shape()[axis];
    let right = b.values.shape()[axis];
    let values = ndarray::concatenate(Axis(axis), &[a.values.view(), b.values.view()])
        .map_err(|_| ReduceError::SizeMismatch { dim, left, right })?;
    let variances = match (&a.variances, &b.variances) {
        (Some(va), Some(vb)) => Some(
            ndarray::concatenate(Axis(axis), &[va.view(), vb.view()])
                .map_err(|_| ReduceError::SizeMismatch { dim, left, right })?,
        ),
        _ => None,
    };
    Ok(DenseArray {
        dims: a.dims.clone(),
        values,
        variances,
    })
}

fn rebin_lane(
    old_edges: &[f64],
    new_edges: &[f64],
    input: &ArrayView1<'_, f64>,
    output: &mut ArrayViewMut1<'_, f64>,
) {
    let mut old = 0;
    let mut new = 0;
    while old + 1 < old_edges.len() && new + 1 < new_edges.len() {
        let lo = old_edges[old].max(new_edges[new]);
        let hi = old_edges[old + 1].min(new_edges[new + 1]);
        if hi > lo {
            let fraction = (hi - lo) / (old_edges[old + 1] - old_edges[old]);
            output[new] += input[old] * fraction;
        }
        if old_edges[old + 1] <= new_edges[new + 1] {
            old += 1;
        } else {
            new += 1;
        }
    }
}
