//! The quantity model: labelled scientific data in dense or event form,
//! together with coordinates and masks.
//!
//! A [`Quantity`] owns its data and keeps coordinates and masks consistent
//! through every transformation. Reduction stages never touch raw arrays
//! directly; they go through the operations here so that variances, bin
//! edges and masks travel with the values they describe.

pub mod dense;
pub mod dims;
pub mod events;
mod numeric;
pub mod ops;
pub mod uncertainty;

use std::collections::BTreeMap;

use ndarray::{Array1, ArrayD, Axis, Dimension, IxDyn, Slice};

use crate::domain::errors::{ReduceError, ReduceResult};

pub use dense::DenseArray;
pub use dims::{CoordLabel, Dim};
pub use events::{EventArray, EventTable};
pub use uncertainty::UncertaintyMode;

pub(crate) use numeric::{bin_index_clamped, bin_overlaps, linspace, midpoints, validate_edges};

/// Coordinate values spanning one or more dimensions.
///
/// Along a dimension the data also has, a coordinate holds either one value
/// per element or, for its innermost dimension only, `n + 1` bin edges.
/// Along a dimension the data does not have, it must hold exactly 2 values;
/// such range coordinates record an interval per element of the other
/// dimensions, as used for wavelength bands.
#[derive(Debug, Clone, PartialEq)]
pub struct Coord {
    dims: Vec<Dim>,
    values: ArrayD<f64>,
}

impl Coord {
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
        Ok(Self { dims, values })
    }

    /// One-dimensional coordinate along `dim`.
    pub fn axis(dim: Dim, values: Vec<f64>) -> Self {
        Self {
            dims: vec![dim],
            values: Array1::from_vec(values).into_dyn(),
        }
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn axis_of(&self, dim: Dim) -> Option<usize> {
        self.dims.iter().position(|&d| d == dim)
    }

    fn axis_vec(&self) -> Option<Vec<f64>> {
        (self.dims.len() == 1).then(|| self.values.iter().copied().collect())
    }
}

/// Boolean flags marking elements to exclude from reductions.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    dims: Vec<Dim>,
    values: ArrayD<bool>,
}

impl Mask {
    pub fn new(dims: Vec<Dim>, values: ArrayD<bool>) -> ReduceResult<Self> {
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
        Ok(Self { dims, values })
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn values(&self) -> &ArrayD<bool> {
        &self.values
    }
}

/// The two storage forms a quantity's data can take.
#[derive(Debug, Clone, PartialEq)]
pub enum QuantityData {
    Dense(DenseArray),
    Events(EventArray),
}

impl QuantityData {
    pub fn dims(&self) -> &[Dim] {
        match self {
            QuantityData::Dense(data) => data.dims(),
            QuantityData::Events(data) => data.dims(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            QuantityData::Dense(data) => data.shape(),
            QuantityData::Events(data) => data.shape(),
        }
    }

    pub fn has_variances(&self) -> bool {
        match self {
            QuantityData::Dense(data) => data.has_variances(),
            QuantityData::Events(data) => data.has_variances(),
        }
    }
}

/// Data plus the coordinates and masks attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    data: QuantityData,
    coords: BTreeMap<CoordLabel, Coord>,
    masks: BTreeMap<String, Mask>,
}

impl Quantity {
    pub fn from_dense(data: DenseArray) -> Self {
        Self {
            data: QuantityData::Dense(data),
            coords: BTreeMap::new(),
            masks: BTreeMap::new(),
        }
    }

    pub fn from_events(data: EventArray) -> Self {
        Self {
            data: QuantityData::Events(data),
            coords: BTreeMap::new(),
            masks: BTreeMap::new(),
        }
    }

    /// Attach a coordinate, checking its sizes against the data.
    pub fn with_coord(mut self, label: CoordLabel, coord: Coord) -> ReduceResult<Self> {
        let innermost = coord.dims.len().saturating_sub(1);
        for (axis, &dim) in coord.dims.iter().enumerate() {
            let found = coord.values.shape()[axis];
            match self.size(dim) {
                Some(data) => {
                    let edges_allowed = axis == innermost;
                    if found != data && !(edges_allowed && found == data + 1) {
                        return Err(ReduceError::CoordLength {
                            coord: label,
                            dim,
                            data,
                            found,
                        });
                    }
                }
                None => {
                    if found != 2 {
                        return Err(ReduceError::CoordDims {
                            coord: label,
                            dim,
                            found,
                        });
                    }
                }
            }
        }
        self.coords.insert(label, coord);
        Ok(self)
    }

    /// Attach a mask; masks must match the data sizes exactly.
    pub fn with_mask(mut self, name: impl Into<String>, mask: Mask) -> ReduceResult<Self> {
        let name = name.into();
        for (axis, &dim) in mask.dims.iter().enumerate() {
            let found = mask.values.shape()[axis];
            match self.size(dim) {
                Some(data) => {
                    if found != data {
                        return Err(ReduceError::MaskLength {
                            mask: name,
                            dim,
                            data,
                            found,
                        });
                    }
                }
                None => return Err(ReduceError::MaskDims { mask: name, dim }),
            }
        }
        self.masks.insert(name, mask);
        Ok(self)
    }

    pub fn data(&self) -> &QuantityData {
        &self.data
    }

    pub fn dims(&self) -> &[Dim] {
        self.data.dims()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn size(&self, dim: Dim) -> Option<usize> {
        self.data
            .dims()
            .iter()
            .position(|&d| d == dim)
            .map(|axis| self.data.shape()[axis])
    }

    pub fn dim_sizes(&self) -> Vec<(Dim, usize)> {
        self.data
            .dims()
            .iter()
            .copied()
            .zip(self.data.shape().iter().copied())
            .collect()
    }

    pub fn is_events(&self) -> bool {
        matches!(self.data, QuantityData::Events(_))
    }

    pub fn has_variances(&self) -> bool {
        self.data.has_variances()
    }

    pub fn as_dense(&self, operation: &'static str) -> ReduceResult<&DenseArray> {
        match &self.data {
            QuantityData::Dense(data) => Ok(data),
            QuantityData::Events(_) => Err(ReduceError::ExpectedDense { operation }),
        }
    }

    pub fn as_events(&self, operation: &'static str) -> ReduceResult<&EventArray> {
        match &self.data {
            QuantityData::Events(data) => Ok(data),
            QuantityData::Dense(_) => Err(ReduceError::ExpectedEvents { operation }),
        }
    }

    pub fn coords(&self) -> &BTreeMap<CoordLabel, Coord> {
        &self.coords
    }

    pub fn coord(&self, label: CoordLabel) -> ReduceResult<&Coord> {
        self.coords
            .get(&label)
            .ok_or(ReduceError::MissingCoord { coord: label })
    }

    pub fn get_coord(&self, label: CoordLabel) -> Option<&Coord> {
        self.coords.get(&label)
    }

    pub fn masks(&self) -> &BTreeMap<String, Mask> {
        &self.masks
    }

    fn one_dim_coord(&self, label: CoordLabel) -> ReduceResult<(Dim, Vec<f64>)> {
        let coord = self.coord(label)?;
        match (coord.dims.as_slice(), coord.axis_vec()) {
            ([dim], Some(values)) => Ok((*dim, values)),
            _ => Err(ReduceError::CoordRank {
                coord: label,
                found: coord.dims.len(),
            }),
        }
    }

    /// Bin-edge values of a one-dimensional coordinate.
    pub fn coord_edges(&self, label: CoordLabel) -> ReduceResult<Vec<f64>> {
        let (dim, values) = self.one_dim_coord(label)?;
        match self.size(dim) {
            Some(size) if values.len() == size + 1 => Ok(values),
            _ => Err(ReduceError::ExpectedEdges { coord: label, dim }),
        }
    }

    /// Per-element values of a one-dimensional coordinate.
    pub fn coord_points(&self, label: CoordLabel) -> ReduceResult<Vec<f64>> {
        let (dim, values) = self.one_dim_coord(label)?;
        match self.size(dim) {
            Some(size) if values.len() == size => Ok(values),
            _ => Err(ReduceError::ExpectedPoints { coord: label }),
        }
    }

    /// Replace a one-dimensional bin-edge coordinate by its midpoints.
    pub fn with_midpoints(mut self, label: CoordLabel) -> ReduceResult<Self> {
        let edges = self.coord_edges(label)?;
        let (dim, _) = self.one_dim_coord(label)?;
        self.coords
            .insert(label, Coord::axis(dim, midpoints(&edges)));
        Ok(self)
    }

    /// Strip variances from the data, leaving coordinates and masks alone.
    pub fn drop_variances(self) -> ReduceResult<Self> {
        let data = match self.data {
            QuantityData::Dense(data) => QuantityData::Dense(data.without_variances()),
            QuantityData::Events(data) => {
                let table = data.table().clone().without_variances();
                QuantityData::Events(data.with_table(table)?)
            }
        };
        Ok(Self { data, ..self })
    }

    /// Add a mask flagging the closed range `[lo, hi]` of a one-dimensional
    /// coordinate. For bin-edge coordinates, bins overlapping the range are
    /// flagged.
    pub fn mask_range(
        &self,
        label: CoordLabel,
        lo: f64,
        hi: f64,
        name: &str,
    ) -> ReduceResult<Self> {
        let (dim, values) = self.one_dim_coord(label)?;
        let size = self.size(dim).ok_or(ReduceError::MissingDim { dim })?;
        let flags: Vec<bool> = if values.len() == size + 1 {
            values
                .windows(2)
                .map(|pair| bin_overlaps(pair[0], pair[1], lo, hi))
                .collect()
        } else {
            values.iter().map(|&x| x >= lo && x <= hi).collect()
        };
        let mut out = self.clone();
        out.masks.insert(
            name.to_string(),
            Mask {
                dims: vec![dim],
                values: Array1::from_vec(flags).into_dyn(),
            },
        );
        Ok(out)
    }

    /// Mean over all unmasked elements, as a zero-dimensional quantity.
    pub fn mean_all(&self) -> ReduceResult<Self> {
        let dense = self.as_dense("mean")?;
        let excluded = self.exclusion(|_| true)?;
        let (mean, variance) = dense.mean_excluding(excluded.as_ref())?;
        let mut data = DenseArray::scalar(mean);
        if let Some(variance) = variance {
            data = data.with_variances(ArrayD::from_elem(IxDyn(&[]), variance))?;
        }
        Ok(Self::from_dense(data))
    }

    /// Rebin dense data onto new edges along the dimension of the given
    /// bin-edge coordinate. Other coordinates and masks spanning that
    /// dimension no longer apply and are dropped.
    pub fn rebin(&self, label: CoordLabel, new_edges: &[f64]) -> ReduceResult<Self> {
        let dense = self.as_dense("rebinning")?;
        let old_edges = self.coord_edges(label)?;
        let (dim, _) = self.one_dim_coord(label)?;
        validate_edges(dim, &old_edges)?;
        validate_edges(dim, new_edges)?;
        let data = dense.rebin(dim, &old_edges, new_edges)?;
        let mut out = Self::from_dense(data);
        for (&other, coord) in &self.coords {
            if other != label && !coord.dims.contains(&dim) {
                out.coords.insert(other, coord.clone());
            }
        }
        out.coords
            .insert(label, Coord::axis(dim, new_edges.to_vec()));
        for (name, mask) in &self.masks {
            if !mask.dims.contains(&dim) {
                out.masks.insert(name.clone(), mask.clone());
            }
        }
        Ok(out)
    }

    /// Bin events into a new dimension by one of their event coordinates,
    /// attaching the edges as its coordinate. Events outside the edges are
    /// dropped.
    pub fn bin_by(&self, label: CoordLabel, new_dim: Dim, edges: &[f64]) -> ReduceResult<Self> {
        let events = self.as_events("binning")?;
        validate_edges(new_dim, edges)?;
        let data = events.bin_by(label, new_dim, edges)?;
        let mut out = Self {
            data: QuantityData::Events(data),
            coords: self.coords.clone(),
            masks: self.masks.clone(),
        };
        out.coords
            .insert(label, Coord::axis(new_dim, edges.to_vec()));
        Ok(out)
    }

    /// Concatenate event cells over the listed dimensions. Cells excluded by
    /// masks spanning those dimensions contribute nothing; the applied masks
    /// and any coordinates over the collapsed dimensions are dropped.
    pub fn concat_over(&self, collapse: &[Dim]) -> ReduceResult<Self> {
        let events = self.as_events("cell concatenation")?;
        let excluded = self.exclusion(|mask| mask.dims.iter().any(|d| collapse.contains(d)))?;
        let data = events.concat_over(collapse, excluded.as_ref())?;
        let mut out = Self::from_events(data);
        for (&label, coord) in &self.coords {
            if !coord.dims.iter().any(|d| collapse.contains(d)) {
                out.coords.insert(label, coord.clone());
            }
        }
        for (name, mask) in &self.masks {
            if !mask.dims.iter().any(|d| collapse.contains(d)) {
                out.masks.insert(name.clone(), mask.clone());
            }
        }
        Ok(out)
    }

    /// Keep only events whose coordinate lies in the closed range.
    pub fn filter_coord_range(&self, label: CoordLabel, lo: f64, hi: f64) -> ReduceResult<Self> {
        let events = self.as_events("event filtering")?;
        let data = events.filter_by(label, lo, hi)?;
        Ok(Self {
            data: QuantityData::Events(data),
            coords: self.coords.clone(),
            masks: self.masks.clone(),
        })
    }

    /// Slice dense data to the bins selected by a range of a
    /// one-dimensional coordinate: overlapping bins for edge coordinates,
    /// closed membership for point coordinates. Coordinates and masks
    /// spanning the sliced dimension are sliced with the data.
    pub fn select_coord_range(&self, label: CoordLabel, lo: f64, hi: f64) -> ReduceResult<Self> {
        let dense = self.as_dense("range selection")?;
        let (dim, values) = self.one_dim_coord(label)?;
        let size = self.size(dim).ok_or(ReduceError::MissingDim { dim })?;
        let keep: Vec<bool> = if values.len() == size + 1 {
            values
                .windows(2)
                .map(|pair| bin_overlaps(pair[0], pair[1], lo, hi))
                .collect()
        } else {
            values.iter().map(|&x| x >= lo && x <= hi).collect()
        };
        let start = keep.iter().position(|&k| k).unwrap_or(0);
        let stop = keep.iter().rposition(|&k| k).map_or(start, |last| last + 1);

        let data = dense.slice_bins(dim, start, stop)?;
        let mut out = Self::from_dense(data);
        for (&other, coord) in &self.coords {
            match coord.axis_of(dim) {
                None => {
                    out.coords.insert(other, coord.clone());
                }
                Some(axis) => {
                    let length = coord.values.shape()[axis];
                    let edges = length == size + 1;
                    let end = if edges { stop + 1 } else { stop };
                    let values = coord
                        .values
                        .slice_axis(Axis(axis), Slice::from(start..end))
                        .to_owned();
                    out.coords.insert(
                        other,
                        Coord {
                            dims: coord.dims.clone(),
                            values,
                        },
                    );
                }
            }
        }
        for (name, mask) in &self.masks {
            match mask.dims.iter().position(|&d| d == dim) {
                None => {
                    out.masks.insert(name.clone(), mask.clone());
                }
                Some(axis) => {
                    let values = mask
                        .values
                        .slice_axis(Axis(axis), Slice::from(start..stop))
                        .to_owned();
                    out.masks.insert(
                        name.clone(),
                        Mask {
                            dims: mask.dims.clone(),
                            values,
                        },
                    );
                }
            }
        }
        Ok(out)
    }

    /// Histogram dense data into a new dimension using a per-element
    /// coordinate, consuming the dimensions that coordinate spans. Masked
    /// elements contribute nothing; applied masks and consumed coordinates
    /// are dropped.
    pub fn hist_by_coord(
        &self,
        label: CoordLabel,
        new_dim: Dim,
        edges: &[f64],
    ) -> ReduceResult<Self> {
        let dense = self.as_dense("histogramming")?;
        validate_edges(new_dim, edges)?;
        let coord = self.coord(label)?;
        for (axis, &dim) in coord.dims.iter().enumerate() {
            if self.size(dim) != Some(coord.values.shape()[axis]) {
                return Err(ReduceError::ExpectedPoints { coord: label });
            }
        }
        let consumed = coord.dims.clone();
        let excluded = self.exclusion(|mask| mask.dims.iter().any(|d| consumed.contains(d)))?;
        let base = match &excluded {
            Some(flags) => dense.zero_where(flags),
            None => dense.clone(),
        };
        let data = base.hist_by_coord(&consumed, &coord.values, new_dim, edges)?;
        let mut out = Self::from_dense(data);
        for (&other, coord) in &self.coords {
            if other != label && !coord.dims.iter().any(|d| consumed.contains(d)) {
                out.coords.insert(other, coord.clone());
            }
        }
        out.coords
            .insert(label, Coord::axis(new_dim, edges.to_vec()));
        for (name, mask) in &self.masks {
            if !mask.dims.iter().any(|d| consumed.contains(d)) {
                out.masks.insert(name.clone(), mask.clone());
            }
        }
        Ok(out)
    }

    /// Sum dense data over the listed dimensions, excluding masked elements.
    /// Applied masks and coordinates over the summed dimensions are dropped.
    pub fn sum_over(&self, dims: &[Dim]) -> ReduceResult<Self> {
        let dense = self.as_dense("summing")?;
        let excluded = self.exclusion(|mask| mask.dims.iter().any(|d| dims.contains(d)))?;
        let base = match &excluded {
            Some(flags) => dense.zero_where(flags),
            None => dense.clone(),
        };
        let data = base.sum_over(dims)?;
        let mut out = Self::from_dense(data);
        for (&label, coord) in &self.coords {
            if !coord.dims.iter().any(|d| dims.contains(d)) {
                out.coords.insert(label, coord.clone());
            }
        }
        for (name, mask) in &self.masks {
            if !mask.dims.iter().any(|d| dims.contains(d)) {
                out.masks.insert(name.clone(), mask.clone());
            }
        }
        Ok(out)
    }

    /// Histogram event cells in place, keeping the cell grid as the dense
    /// shape. Dense data is returned unchanged.
    pub fn to_dense(&self) -> ReduceResult<Self> {
        let events = match &self.data {
            QuantityData::Dense(_) => return Ok(self.clone()),
            QuantityData::Events(events) => events,
        };
        let (values, variances) = events.hist_cells();
        let mut data = DenseArray::new(events.dims().to_vec(), values)?;
        if let Some(variances) = variances {
            data = data.with_variances(variances)?;
        }
        Ok(Self {
            data: QuantityData::Dense(data),
            coords: self.coords.clone(),
            masks: self.masks.clone(),
        })
    }

    /// Drop every data axis of length 1. Coordinates and masks that no
    /// longer share a dimension with the data are dropped, so a single-band
    /// result is indistinguishable from an unbanded one.
    pub fn squeeze(&self) -> Self {
        let data = match &self.data {
            QuantityData::Dense(data) => QuantityData::Dense(data.squeeze()),
            QuantityData::Events(data) => QuantityData::Events(data.squeeze()),
        };
        let remaining = data.dims().to_vec();
        let mut out = Self {
            data,
            coords: BTreeMap::new(),
            masks: BTreeMap::new(),
        };
        for (&label, coord) in &self.coords {
            if let Some(squeezed) = squeeze_coord(coord, &remaining) {
                out.coords.insert(label, squeezed);
            }
        }
        for (name, mask) in &self.masks {
            if let Some(squeezed) = squeeze_mask(mask, &remaining) {
                out.masks.insert(name.clone(), squeezed);
            }
        }
        out
    }

    /// Combined exclusion flags over the full data shape from all masks the
    /// predicate selects.
    fn exclusion(
        &self,
        applies: impl Fn(&Mask) -> bool,
    ) -> ReduceResult<Option<ArrayD<bool>>> {
        let selected: Vec<&Mask> = self.masks.values().filter(|mask| applies(mask)).collect();
        if selected.is_empty() {
            return Ok(None);
        }
        let dims = self.data.dims();
        let mut out = ArrayD::from_elem(IxDyn(self.data.shape()), false);
        for mask in selected {
            let mut axes = Vec::with_capacity(mask.dims.len());
            for dim in &mask.dims {
                let axis = dims
                    .iter()
                    .position(|d| d == dim)
                    .ok_or(ReduceError::MissingDim { dim: *dim })?;
                axes.push(axis);
            }
            let mut mask_index = vec![0usize; axes.len()];
            for (pattern, flag) in out.indexed_iter_mut() {
                let index = pattern.slice();
                for (slot, &axis) in mask_index.iter_mut().zip(&axes) {
                    *slot = index[axis];
                }
                *flag |= mask.values[mask_index.as_slice()];
            }
        }
        Ok(Some(out))
    }
}

fn squeeze_coord(coord: &Coord, data_dims: &[Dim]) -> Option<Coord> {
    let mut dims = coord.dims.clone();
    let mut values = coord.values.clone();
    for axis in (0..dims.len()).rev() {
        if values.shape()[axis] == 1 && !data_dims.contains(&dims[axis]) {
            values = values.index_axis_move(Axis(axis), 0);
            dims.remove(axis);
        }
    }
    if dims.iter().any(|dim| data_dims.contains(dim)) {
        Some(Coord { dims, values })
    } else {
        None
    }
}

fn squeeze_mask(mask: &Mask, data_dims: &[Dim]) -> Option<Mask> {
    let mut dims = mask.dims.clone();
    let mut values = mask.values.clone();
    for axis in (0..dims.len()).rev() {
        if values.shape()[axis] == 1 && !data_dims.contains(&dims[axis]) {
            values = values.index_axis_move(Axis(axis), 0);
            dims.remove(axis);
        }
    }
    if dims.iter().all(|dim| data_dims.contains(dim)) && !dims.is_empty() {
        Some(Mask { dims, values })
    } else {
        None
    }
}
