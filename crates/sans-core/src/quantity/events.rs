//! Event-mode data: one shared, immutable table of recorded events plus
//! per-cell index lists grouping them into bins.
//!
//! Regrouping operations (concatenating cells, re-binning by a coordinate,
//! filtering) only rewrite the index lists; the table itself is shared via
//! [`Arc`], so an event may be referenced by several cells at once, as
//! happens with overlapping wavelength bands.

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::{ArrayD, Axis, Dimension, IxDyn};

use crate::domain::errors::{ReduceError, ReduceResult};

use super::dims::{CoordLabel, Dim};
use super::numeric::{bin_index, stable_sum};

/// Flat storage for individual events: a weight, an optional variance and
/// one value per attached event coordinate, all index-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTable {
    weights: Vec<f64>,
    variances: Option<Vec<f64>>,
    coords: BTreeMap<CoordLabel, Vec<f64>>,
}

impl EventTable {
    pub fn new(
        weights: Vec<f64>,
        variances: Option<Vec<f64>>,
        coords: BTreeMap<CoordLabel, Vec<f64>>,
    ) -> ReduceResult<Self> {
        let events = weights.len();
        if let Some(variances) = &variances {
            if variances.len() != events {
                return Err(ReduceError::EventLength {
                    field: "variance",
                    events,
                    found: variances.len(),
                });
            }
        }
        for values in coords.values() {
            if values.len() != events {
                return Err(ReduceError::EventLength {
                    field: "coordinate",
                    events,
                    found: values.len(),
                });
            }
        }
        Ok(Self {
            weights,
            variances,
            coords,
        })
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn variances(&self) -> Option<&[f64]> {
        self.variances.as_deref()
    }

    pub fn has_variances(&self) -> bool {
        self.variances.is_some()
    }

    pub fn without_variances(mut self) -> Self {
        self.variances = None;
        self
    }

    pub fn coords(&self) -> &BTreeMap<CoordLabel, Vec<f64>> {
        &self.coords
    }

    pub fn coord(&self, label: CoordLabel) -> ReduceResult<&[f64]> {
        self.coords
            .get(&label)
            .map(Vec::as_slice)
            .ok_or(ReduceError::MissingCoord { coord: label })
    }

    fn same_layout(&self, other: &EventTable) -> ReduceResult<()> {
        if self.variances.is_some() != other.variances.is_some() {
            return Err(ReduceError::VarianceMix {
                operation: "event concatenation",
            });
        }
        let same_keys = self.coords.len() == other.coords.len()
            && self.coords.keys().all(|label| other.coords.contains_key(label));
        if !same_keys {
            return Err(ReduceError::EventTableIncompatible {
                reason: "the operands carry different event coordinates",
            });
        }
        Ok(())
    }

    fn append(&mut self, other: &EventTable) -> ReduceResult<()> {
        self.same_layout(other)?;
        self.weights.extend_from_slice(&other.weights);
        if let (Some(mine), Some(theirs)) = (&mut self.variances, &other.variances) {
            mine.extend_from_slice(theirs);
        }
        for (label, values) in &mut self.coords {
            let theirs = other
                .coords
                .get(label)
                .ok_or(ReduceError::EventTableIncompatible {
                    reason: "the operands carry different event coordinates",
                })?;
            values.extend_from_slice(theirs);
        }
        Ok(())
    }
}

/// Binned event data: a labelled grid of cells, each holding indices into
/// the shared [`EventTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventArray {
    dims: Vec<Dim>,
    cells: ArrayD<Vec<usize>>,
    table: Arc<EventTable>,
}

impl EventArray {
    /// Assemble from one small table per cell, concatenating them into a
    /// single shared table. Cells are given in row-major order over `shape`.
    pub fn from_cells(
        dims: Vec<Dim>,
        shape: &[usize],
        cells: Vec<EventTable>,
    ) -> ReduceResult<Self> {
        if dims.len() != shape.len() {
            return Err(ReduceError::RankMismatch {
                dims: dims.len(),
                axes: shape.len(),
            });
        }
        for (position, dim) in dims.iter().enumerate() {
            if dims[..position].contains(dim) {
                return Err(ReduceError::DuplicateDim { dim: *dim });
            }
        }
        let expected: usize = shape.iter().product();
        if cells.len() != expected {
            return Err(ReduceError::EventLength {
                field: "cell list",
                events: expected,
                found: cells.len(),
            });
        }

        let mut table = EventTable {
            weights: Vec::new(),
            variances: cells
                .first()
                .is_some_and(EventTable::has_variances)
                .then(Vec::new),
            coords: cells
                .first()
                .map(|first| {
                    first
                        .coords
                        .keys()
                        .map(|&label| (label, Vec::new()))
                        .collect()
                })
                .unwrap_or_default(),
        };
        let mut index_lists = Vec::with_capacity(cells.len());
        for cell in &cells {
            let start = table.len();
            table.append(cell)?;
            index_lists.push((start..table.len()).collect::<Vec<usize>>());
        }
        let cells = ArrayD::from_shape_vec(IxDyn(shape), index_lists).map_err(|_| {
            ReduceError::EventLength {
                field: "cell list",
                events: expected,
                found: expected,
            }
        })?;
        Ok(Self {
            dims,
            cells,
            table: Arc::new(table),
        })
    }

    /// Same grouping over a replacement table of equal length.
    pub(crate) fn with_table(&self, table: EventTable) -> ReduceResult<Self> {
        if table.len() != self.table.len() {
            return Err(ReduceError::EventLength {
                field: "replacement",
                events: self.table.len(),
                found: table.len(),
            });
        }
        Ok(Self {
            dims: self.dims.clone(),
            cells: self.cells.clone(),
            table: Arc::new(table),
        })
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn shape(&self) -> &[usize] {
        self.cells.shape()
    }

    pub fn table(&self) -> &EventTable {
        &self.table
    }

    pub(crate) fn cells(&self) -> &ArrayD<Vec<usize>> {
        &self.cells
    }

    pub fn has_variances(&self) -> bool {
        self.table.variances.is_some()
    }

    pub fn axis_of(&self, dim: Dim) -> Option<usize> {
        self.dims.iter().position(|&d| d == dim)
    }

    pub fn size(&self, dim: Dim) -> Option<usize> {
        self.axis_of(dim).map(|axis| self.cells.shape()[axis])
    }

    /// Number of events referenced by cells, counting shared events once per
    /// referencing cell.
    pub fn event_count(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    /// Collapse the listed dimensions by concatenating their cells' index
    /// lists. Cells flagged in `excluded` (full data shape) contribute
    /// nothing.
    pub(crate) fn concat_over(
        &self,
        collapse: &[Dim],
        excluded: Option<&ArrayD<bool>>,
    ) -> ReduceResult<Self> {
        let mut collapse_axes = Vec::with_capacity(collapse.len());
        for dim in collapse {
            let axis = self
                .axis_of(*dim)
                .ok_or(ReduceError::MissingDim { dim: *dim })?;
            collapse_axes.push(axis);
        }
        let kept_axes: Vec<usize> = (0..self.dims.len())
            .filter(|axis| !collapse_axes.contains(axis))
            .collect();
        let kept_dims: Vec<Dim> = kept_axes.iter().map(|&axis| self.dims[axis]).collect();
        let kept_shape: Vec<usize> = kept_axes
            .iter()
            .map(|&axis| self.cells.shape()[axis])
            .collect();

        let mut out = ArrayD::from_elem(IxDyn(&kept_shape), Vec::new());
        let mut out_index = vec![0usize; kept_axes.len()];
        for (pattern, cell) in self.cells.indexed_iter() {
            let index = pattern.slice();
            if let Some(flags) = excluded {
                if flags[index] {
                    continue;
                }
            }
            for (slot, &axis) in out_index.iter_mut().zip(&kept_axes) {
                *slot = index[axis];
            }
            out[out_index.as_slice()].extend_from_slice(cell);
        }
        Ok(Self {
            dims: kept_dims,
            cells: out,
            table: Arc::clone(&self.table),
        })
    }

    /// Append a new dimension whose bins partition each cell's events by the
    /// given event coordinate. Events outside the edges are dropped.
    pub(crate) fn bin_by(
        &self,
        label: CoordLabel,
        new_dim: Dim,
        edges: &[f64],
    ) -> ReduceResult<Self> {
        if self.dims.contains(&new_dim) {
            return Err(ReduceError::DuplicateDim { dim: new_dim });
        }
        let coord = self.table.coord(label)?;
        let mut shape = self.cells.shape().to_vec();
        shape.push(edges.len() - 1);

        let mut out = ArrayD::from_elem(IxDyn(&shape), Vec::new());
        let mut out_index = vec![0usize; shape.len()];
        for (pattern, cell) in self.cells.indexed_iter() {
            let index = pattern.slice();
            out_index[..index.len()].copy_from_slice(index);
            for &event in cell {
                let Some(bin) = bin_index(edges, coord[event]) else {
                    continue;
                };
                out_index[index.len()] = bin;
                out[out_index.as_slice()].push(event);
            }
        }
        let mut dims = self.dims.clone();
        dims.push(new_dim);
        Ok(Self {
            dims,
            cells: out,
            table: Arc::clone(&self.table),
        })
    }

    /// Keep only events whose coordinate lies in the closed range
    /// `[lo, hi]`. The cell grid is unchanged and the table stays shared.
    pub(crate) fn filter_by(&self, label: CoordLabel, lo: f64, hi: f64) -> ReduceResult<Self> {
        let coord = self.table.coord(label)?;
        let cells = self.cells.map(|cell| {
            cell.iter()
                .copied()
                .filter(|&event| {
                    let value = coord[event];
                    value >= lo && value <= hi
                })
                .collect()
        });
        Ok(Self {
            dims: self.dims.clone(),
            cells,
            table: Arc::clone(&self.table),
        })
    }

    /// Sum each cell's weights (and variances), producing dense arrays of
    /// the cell-grid shape.
    pub(crate) fn hist_cells(&self) -> (ArrayD<f64>, Option<ArrayD<f64>>) {
        let values = self
            .cells
            .map(|cell| stable_sum(cell.iter().map(|&event| self.table.weights[event])));
        let variances = self.table.variances.as_ref().map(|variances| {
            self.cells
                .map(|cell| stable_sum(cell.iter().map(|&event| variances[event])))
        });
        (values, variances)
    }

    /// Drop every axis of length 1.
    pub(crate) fn squeeze(&self) -> Self {
        let mut dims = self.dims.clone();
        let mut cells = self.cells.clone();
        for axis in (0..dims.len()).rev() {
            if cells.shape()[axis] == 1 {
                cells = cells.index_axis_move(Axis(axis), 0);
                dims.remove(axis);
            }
        }
        Self {
            dims,
            cells,
            table: Arc::clone(&self.table),
        }
    }

    fn with_dim_axis(&self, dim: Dim) -> Self {
        if self.dims.contains(&dim) {
            return self.clone();
        }
        let mut dims = Vec::with_capacity(self.dims.len() + 1);
        dims.push(dim);
        dims.extend_from_slice(&self.dims);
        Self {
            dims,
            cells: self.cells.clone().insert_axis(Axis(0)),
            table: Arc::clone(&self.table),
        }
    }

    fn transposed(&self, order: &[Dim]) -> ReduceResult<Self> {
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
        Ok(Self {
            dims: order.to_vec(),
            cells: self.cells.clone().permuted_axes(IxDyn(&permutation)),
            table: Arc::clone(&self.table),
        })
    }
}

/// Stack or append two event arrays along `dim`, inserting the dimension
/// with length 1 on whichever operand lacks it. When the operands already
/// share one table it stays shared; otherwise the tables are concatenated
/// and the right-hand cells reindexed past the left-hand events.
pub(crate) fn concat_pair(a: &EventArray, b: &EventArray, dim: Dim) -> ReduceResult<EventArray> {
    let a = a.with_dim_axis(dim);
    let b = b.with_dim_axis(dim).transposed(&a.dims)?;
    let axis = match a.axis_of(dim) {
        Some(axis) => axis,
        None => return Err(ReduceError::MissingDim { dim }),
    };
    for (&other, (&left, &right)) in a
        .dims
        .iter()
        .zip(a.cells.shape().iter().zip(b.cells.shape()))
    {
        if other != dim && left != right {
            return Err(ReduceError::SizeMismatch {
                dim: other,
                left,
                right,
            });
        }
    }

    let (table, offset) = if Arc::ptr_eq(&a.table, &b.table) {
        (Arc::clone(&a.table), 0)
    } else {
        let mut merged = (*a.table).clone();
        merged.append(&b.table)?;
        (Arc::new(merged), a.table.len())
    };
    let b_cells = if offset == 0 {
        b.cells.clone()
    } else {
        b.cells
            .map(|cell| cell.iter().map(|&event| event + offset).collect())
    };

    let left = a.cells.shape()[axis];
    let right = b_cells.shape()[axis];
    let cells = ndarray::concatenate(Axis(axis), &[a.cells.view(), b_cells.view()])
        .map_err(|_| ReduceError::SizeMismatch { dim, left, right })?;
    Ok(EventArray {
        dims: a.dims.clone(),
        cells,
        table,
    })
}
