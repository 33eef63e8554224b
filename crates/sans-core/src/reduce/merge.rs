//! Merging detector spectra into Q bins, optionally per wavelength band.

use ndarray::{ArrayD, Axis, IxDyn};

use crate::domain::errors::{ReduceError, ReduceResult};
use crate::quantity::dims::{dims_difference, single_dim_besides};
use crate::quantity::{
    Coord, CoordLabel, Dim, Mask, Quantity, QuantityData, dense, events, linspace, validate_edges,
};

/// The Q axis of the merged result.
#[derive(Debug, Clone, PartialEq)]
pub enum QBins {
    /// Evenly spaced bins spanning the Q range found in the data.
    Count(usize),
    /// Explicit bin edges.
    Edges(Vec<f64>),
}

impl QBins {
    /// Concrete bin edges for merging `data`.
    pub fn resolve(&self, data: &Quantity) -> ReduceResult<Vec<f64>> {
        match self {
            QBins::Edges(edges) => {
                validate_edges(Dim::Q, edges)?;
                Ok(edges.clone())
            }
            QBins::Count(0) => Err(ReduceError::QBinCount),
            QBins::Count(count) => {
                let (lowest, highest) = q_range(data)?;
                Ok(linspace(lowest, highest, *count))
            }
        }
    }
}

/// Extent of the Q values present in `data`, from the event table for
/// event data and from the attached coordinate otherwise.
fn q_range(data: &Quantity) -> ReduceResult<(f64, f64)> {
    let mut lowest = f64::INFINITY;
    let mut highest = f64::NEG_INFINITY;
    match data.data() {
        QuantityData::Events(events) => {
            for &q in events.table().coord(CoordLabel::Q)? {
                lowest = lowest.min(q);
                highest = highest.max(q);
            }
        }
        QuantityData::Dense(_) => {
            for &q in data.coord(CoordLabel::Q)?.values() {
                lowest = lowest.min(q);
                highest = highest.max(q);
            }
        }
    }
    if !(lowest < highest) {
        return Err(ReduceError::EmptyQRange);
    }
    Ok((lowest, highest))
}

/// Wavelength bands to merge separately, producing a banded result.
///
/// Bands are stored the way they arrive: either a flat list of wavelength
/// edges describing a single band, or a two-dimensional layout with one
/// row of edges per band.
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthBands {
    dims: Vec<Dim>,
    values: ArrayD<f64>,
}

impl WavelengthBands {
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

    /// A single band covering `[start, stop]`.
    pub fn single(start: f64, stop: f64) -> Self {
        let mut values = ArrayD::zeros(IxDyn(&[2]));
        values[[0]] = start;
        values[[1]] = stop;
        Self {
            dims: vec![Dim::Wavelength],
            values,
        }
    }

    /// One `(start, stop)` row per band.
    pub fn ranges(ranges: &[(f64, f64)]) -> ReduceResult<Self> {
        if ranges.is_empty() {
            return Err(ReduceError::EmptyBands);
        }
        let mut values = ArrayD::zeros(IxDyn(&[ranges.len(), 2]));
        for (row, &(start, stop)) in ranges.iter().enumerate() {
            values[[row, 0]] = start;
            values[[row, 1]] = stop;
        }
        Ok(Self {
            dims: vec![Dim::Band, Dim::Wavelength],
            values,
        })
    }

    /// The band dimension and the `(start, stop)` wavelength range of each
    /// band. A flat edge list folds into one band spanning its full
    /// extent; a two-dimensional layout contributes one band per row.
    pub(crate) fn normalized(&self) -> ReduceResult<(Dim, Vec<(f64, f64)>)> {
        let (band_dim, rows) = if self.dims == [Dim::Wavelength] {
            let row: Vec<f64> = self.values.iter().copied().collect();
            (Dim::Band, vec![row])
        } else {
            let band_dim = single_dim_besides(&self.dims, Dim::Wavelength)?;
            let band_axis = self
                .dims
                .iter()
                .position(|&dim| dim == band_dim)
                .ok_or(ReduceError::MissingDim { dim: band_dim })?;
            let band_count = self.values.shape()[band_axis];
            if band_count == 0 {
                return Err(ReduceError::EmptyBands);
            }
            let mut rows = Vec::with_capacity(band_count);
            for band in 0..band_count {
                let row = self.values.index_axis(Axis(band_axis), band);
                rows.push(row.iter().copied().collect());
            }
            (band_dim, rows)
        };
        let mut ranges = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() < 2 {
                return Err(ReduceError::BandValues { found: row.len() });
            }
            let (start, stop) = (row[0], row[row.len() - 1]);
            if !(start < stop) {
                return Err(ReduceError::BandRange { start, stop });
            }
            ranges.push((start, stop));
        }
        Ok((band_dim, ranges))
    }
}

/// Pool detector spectra into Q bins.
///
/// Every dimension not named in `final_dims` (default: just Q) is merged
/// away. Event data pools events across the merged dimensions and bins
/// them by their Q coordinate, keeping the event structure; dense data is
/// histogrammed by its Q coordinate and summed. With `wavelength_bands`
/// the merge runs once per band and stacks the results along the band
/// dimension, recording each band's range in a wavelength coordinate. A
/// lone size-1 band collapses so that a single full-range band and no
/// banding produce identical results.
pub fn merge_spectra(
    data: &Quantity,
    q_bins: &QBins,
    wavelength_bands: Option<&WavelengthBands>,
    final_dims: Option<&[Dim]>,
) -> ReduceResult<Quantity> {
    let final_dims: Vec<Dim> = final_dims.map_or_else(|| vec![Dim::Q], <[Dim]>::to_vec);
    if !final_dims.contains(&Dim::Q) {
        return Err(ReduceError::FinalDimsMissingQ);
    }
    let q_edges = q_bins.resolve(data)?;
    let bands = wavelength_bands.map(WavelengthBands::normalized).transpose()?;
    let merged = if data.is_events() {
        events_merge(data, &q_edges, bands.as_ref(), &final_dims)?
    } else {
        dense_merge(data, &q_edges, bands.as_ref(), &final_dims)?
    };
    Ok(merged.squeeze())
}

fn events_merge(
    data: &Quantity,
    q_edges: &[f64],
    bands: Option<&(Dim, Vec<(f64, f64)>)>,
    final_dims: &[Dim],
) -> ReduceResult<Quantity> {
    let collapse = dims_difference(data.dims(), final_dims);
    let binned = data
        .concat_over(&collapse)?
        .bin_by(CoordLabel::Q, Dim::Q, q_edges)?;
    let Some((band_dim, ranges)) = bands else {
        return Ok(binned);
    };
    let mut merged: Option<Quantity> = None;
    for &(start, stop) in ranges {
        let band = binned
            .filter_coord_range(CoordLabel::Wavelength, start, stop)?
            .with_coord(
                CoordLabel::Wavelength,
                Coord::axis(Dim::Wavelength, vec![start, stop]),
            )?;
        merged = Some(match merged {
            Some(merged) => concat_quantities(&merged, &band, *band_dim)?,
            None => band,
        });
    }
    merged.ok_or(ReduceError::EmptyBands)
}

fn dense_merge(
    data: &Quantity,
    q_edges: &[f64],
    bands: Option<&(Dim, Vec<(f64, f64)>)>,
    final_dims: &[Dim],
) -> ReduceResult<Quantity> {
    // Histogramming consumes every dimension the Q coordinate spans, so
    // those cannot be kept in the output.
    let consumed = data.coord(CoordLabel::Q)?.dims().to_vec();
    for &dim in final_dims {
        if dim != Dim::Q && consumed.contains(&dim) {
            return Err(ReduceError::FinalDimConflict { dim });
        }
    }
    let merge_one = |input: &Quantity| -> ReduceResult<Quantity> {
        let histogrammed = input.hist_by_coord(CoordLabel::Q, Dim::Q, q_edges)?;
        let leftover = dims_difference(histogrammed.dims(), final_dims);
        histogrammed.sum_over(&leftover)
    };
    let Some((band_dim, ranges)) = bands else {
        return merge_one(data);
    };
    let mut merged: Option<Quantity> = None;
    for &(start, stop) in ranges {
        let sliced = data.select_coord_range(CoordLabel::Wavelength, start, stop)?;
        let band = merge_one(&sliced)?.with_coord(
            CoordLabel::Wavelength,
            Coord::axis(Dim::Wavelength, vec![start, stop]),
        )?;
        merged = Some(match merged {
            Some(merged) => concat_quantities(&merged, &band, *band_dim)?,
            None => band,
        });
    }
    merged.ok_or(ReduceError::EmptyBands)
}

/// Stack two band results along `dim`, concatenating data and any
/// coordinate or mask that differs between them or already spans `dim`.
fn concat_quantities(left: &Quantity, right: &Quantity, dim: Dim) -> ReduceResult<Quantity> {
    let mut out = match (left.data(), right.data()) {
        (QuantityData::Events(a), QuantityData::Events(b)) => {
            Quantity::from_events(events::concat_pair(a, b, dim)?)
        }
        (QuantityData::Dense(a), QuantityData::Dense(b)) => {
            Quantity::from_dense(dense::concat_pair(a, b, dim)?)
        }
        _ => {
            return Err(ReduceError::ExpectedDense {
                operation: "band concatenation",
            });
        }
    };
    for (&label, coord) in left.coords() {
        let other = right
            .get_coord(label)
            .ok_or(ReduceError::CoordMismatch { coord: label })?;
        let merged =
            if coord.dims().contains(&dim) || other.dims().contains(&dim) || coord != other {
                concat_coord(coord, other, dim, label)?
            } else {
                coord.clone()
            };
        out = out.with_coord(label, merged)?;
    }
    for &label in right.coords().keys() {
        if left.get_coord(label).is_none() {
            return Err(ReduceError::CoordMismatch { coord: label });
        }
    }
    for (name, mask) in left.masks() {
        let other = right
            .masks()
            .get(name)
            .ok_or_else(|| ReduceError::MaskDims {
                mask: name.clone(),
                dim,
            })?;
        let merged = if mask.dims().contains(&dim) || other.dims().contains(&dim) || mask != other
        {
            concat_mask(mask, other, dim, name)?
        } else {
            mask.clone()
        };
        out = out.with_mask(name.clone(), merged)?;
    }
    for name in right.masks().keys() {
        if !left.masks().contains_key(name) {
            return Err(ReduceError::MaskDims {
                mask: name.clone(),
                dim,
            });
        }
    }
    Ok(out)
}

fn concat_coord(left: &Coord, right: &Coord, dim: Dim, label: CoordLabel) -> ReduceResult<Coord> {
    let (left_dims, left_values) = with_axis(left.dims(), left.values(), dim);
    let (right_dims, right_values) = with_axis(right.dims(), right.values(), dim);
    if left_dims != right_dims {
        return Err(ReduceError::CoordMismatch { coord: label });
    }
    let axis = left_dims
        .iter()
        .position(|&d| d == dim)
        .ok_or(ReduceError::MissingDim { dim })?;
    let values = ndarray::concatenate(Axis(axis), &[left_values.view(), right_values.view()])
        .map_err(|_| ReduceError::CoordMismatch { coord: label })?;
    Coord::new(left_dims, values)
}

fn concat_mask(left: &Mask, right: &Mask, dim: Dim, name: &str) -> ReduceResult<Mask> {
    let (left_dims, left_values) = with_axis(left.dims(), left.values(), dim);
    let (right_dims, right_values) = with_axis(right.dims(), right.values(), dim);
    if left_dims != right_dims {
        return Err(ReduceError::MaskDims {
            mask: name.to_string(),
            dim,
        });
    }
    let axis = left_dims
        .iter()
        .position(|&d| d == dim)
        .ok_or(ReduceError::MissingDim { dim })?;
    let values = ndarray::concatenate(Axis(axis), &[left_values.view(), right_values.view()])
        .map_err(|_| ReduceError::MaskDims {
            mask: name.to_string(),
            dim,
        })?;
    Mask::new(left_dims, values)
}

/// The values with `dim` guaranteed present, inserted as a new outermost
/// size-1 axis when missing.
fn with_axis<T: Clone>(dims: &[Dim], values: &ArrayD<T>, dim: Dim) -> (Vec<Dim>, ArrayD<T>) {
    if dims.contains(&dim) {
        (dims.to_vec(), values.clone())
    } else {
        let mut out_dims = Vec::with_capacity(dims.len() + 1);
        out_dims.push(dim);
        out_dims.extend_from_slice(dims);
        (out_dims, values.clone().insert_axis(Axis(0)))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr2};
    use std::collections::BTreeMap;

    use crate::domain::errors::ReduceError;
    use crate::quantity::{
        Coord, CoordLabel, DenseArray, Dim, EventArray, EventTable, Quantity,
    };

    use super::{QBins, WavelengthBands, merge_spectra};

    fn pixel_events(pixels: &[(&[f64], &[f64], &[f64])]) -> Quantity {
        let tables: Vec<EventTable> = pixels
            .iter()
            .map(|(weights, q, wavelength)| {
                EventTable::new(
                    weights.to_vec(),
                    None,
                    BTreeMap::from([
                        (CoordLabel::Q, q.to_vec()),
                        (CoordLabel::Wavelength, wavelength.to_vec()),
                    ]),
                )
                .unwrap()
            })
            .collect();
        let cells =
            EventArray::from_cells(vec![Dim::Pixel], &[pixels.len()], tables).unwrap();
        Quantity::from_events(cells)
    }

    fn detector() -> Quantity {
        pixel_events(&[
            (&[2.0], &[0.5], &[1.0]),
            (&[3.0, 5.0], &[1.5, 0.6], &[3.0, 1.5]),
        ])
    }

    #[test]
    fn q_bin_count_spans_the_event_range() {
        let edges = QBins::Count(4).resolve(&detector()).unwrap();
        assert_eq!(edges.len(), 5);
        assert_eq!(edges[0], 0.5);
        assert_eq!(edges[4], 1.5);
    }

    #[test]
    fn q_bin_count_of_zero_is_rejected() {
        assert_eq!(
            QBins::Count(0).resolve(&detector()),
            Err(ReduceError::QBinCount)
        );
    }

    #[test]
    fn identical_q_values_leave_no_usable_range() {
        let flat = pixel_events(&[(&[1.0, 1.0], &[0.7, 0.7], &[1.0, 2.0])]);
        assert_eq!(
            QBins::Count(3).resolve(&flat),
            Err(ReduceError::EmptyQRange)
        );
    }

    #[test]
    fn flat_band_edges_fold_into_a_single_band() {
        let bands = WavelengthBands::new(
            vec![Dim::Wavelength],
            arr1(&[1.0, 2.0, 4.0]).into_dyn(),
        )
        .unwrap();
        assert_eq!(
            bands.normalized().unwrap(),
            (Dim::Band, vec![(1.0, 4.0)])
        );
    }

    #[test]
    fn range_rows_become_one_band_each() {
        let bands = WavelengthBands::ranges(&[(1.0, 2.0), (2.0, 4.0)]).unwrap();
        assert_eq!(
            bands.normalized().unwrap(),
            (Dim::Band, vec![(1.0, 2.0), (2.0, 4.0)])
        );
    }

    #[test]
    fn decreasing_band_ranges_are_rejected() {
        let bands = WavelengthBands::ranges(&[(2.0, 1.0)]).unwrap();
        assert_eq!(
            bands.normalized(),
            Err(ReduceError::BandRange {
                start: 2.0,
                stop: 1.0
            })
        );
    }

    #[test]
    fn band_layout_with_two_extra_dimensions_is_ambiguous() {
        let bands = WavelengthBands::new(
            vec![Dim::Band, Dim::Layer, Dim::Wavelength],
            ndarray::ArrayD::zeros(ndarray::IxDyn(&[1, 1, 2])),
        )
        .unwrap();
        assert!(matches!(
            bands.normalized(),
            Err(ReduceError::BandDimAmbiguous { found: 2 })
        ));
    }

    #[test]
    fn events_pool_across_pixels_into_q_bins() {
        let merged =
            merge_spectra(&detector(), &QBins::Edges(vec![0.0, 1.0, 2.0]), None, None).unwrap();
        assert!(merged.is_events());
        assert_eq!(merged.dims(), &[Dim::Q]);
        let dense = merged.to_dense().unwrap();
        assert_eq!(
            dense.as_dense("test").unwrap().values(),
            &arr1(&[7.0, 3.0]).into_dyn()
        );
        assert_eq!(
            merged.coord_edges(CoordLabel::Q).unwrap(),
            vec![0.0, 1.0, 2.0]
        );
    }

    #[test]
    fn a_single_full_range_band_changes_nothing() {
        let q_bins = QBins::Edges(vec![0.0, 1.0, 2.0]);
        let plain = merge_spectra(&detector(), &q_bins, None, None).unwrap();
        let banded = merge_spectra(
            &detector(),
            &q_bins,
            Some(&WavelengthBands::single(0.0, 10.0)),
            None,
        )
        .unwrap();
        assert_eq!(banded, plain);
    }

    #[test]
    fn bands_stack_along_the_band_dimension_with_their_ranges() {
        let bands = WavelengthBands::ranges(&[(0.0, 2.0), (2.0, 4.0)]).unwrap();
        let merged = merge_spectra(
            &detector(),
            &QBins::Edges(vec![0.0, 1.0, 2.0]),
            Some(&bands),
            None,
        )
        .unwrap();
        assert_eq!(merged.dims(), &[Dim::Band, Dim::Q]);
        // Wavelengths 1.0 and 1.5 land in the first band, 3.0 in the
        // second.
        let dense = merged.to_dense().unwrap();
        assert_eq!(
            dense.as_dense("test").unwrap().values(),
            &arr2(&[[7.0, 0.0], [0.0, 3.0]]).into_dyn()
        );
        let ranges = merged.coord(CoordLabel::Wavelength).unwrap();
        assert_eq!(ranges.dims(), &[Dim::Band, Dim::Wavelength]);
        assert_eq!(
            ranges.values(),
            &arr2(&[[0.0, 2.0], [2.0, 4.0]]).into_dyn()
        );
    }

    fn dense_detector() -> Quantity {
        let data = DenseArray::new(
            vec![Dim::Pixel, Dim::Wavelength],
            arr2(&[[1.0, 2.0], [3.0, 40.0]]).into_dyn(),
        )
        .unwrap();
        Quantity::from_dense(data)
            .with_coord(
                CoordLabel::Q,
                Coord::new(
                    vec![Dim::Pixel, Dim::Wavelength],
                    arr2(&[[0.5, 1.5], [1.5, 0.5]]).into_dyn(),
                )
                .unwrap(),
            )
            .unwrap()
            .with_coord(
                CoordLabel::Wavelength,
                Coord::axis(Dim::Wavelength, vec![1.0, 3.0]),
            )
            .unwrap()
    }

    #[test]
    fn dense_data_is_histogrammed_and_summed() {
        let merged = merge_spectra(
            &dense_detector(),
            &QBins::Edges(vec![0.0, 1.0, 2.0]),
            None,
            None,
        )
        .unwrap();
        assert!(!merged.is_events());
        assert_eq!(merged.dims(), &[Dim::Q]);
        assert_eq!(
            merged.as_dense("test").unwrap().values(),
            &arr1(&[41.0, 5.0]).into_dyn()
        );
    }

    #[test]
    fn final_dims_must_include_q() {
        let result = merge_spectra(
            &detector(),
            &QBins::Edges(vec![0.0, 1.0]),
            None,
            Some(&[Dim::Pixel]),
        );
        assert_eq!(result, Err(ReduceError::FinalDimsMissingQ));
    }

    #[test]
    fn dense_final_dims_cannot_keep_a_consumed_dimension() {
        let result = merge_spectra(
            &dense_detector(),
            &QBins::Edges(vec![0.0, 1.0, 2.0]),
            None,
            Some(&[Dim::Wavelength, Dim::Q]),
        );
        assert_eq!(
            result,
            Err(ReduceError::FinalDimConflict {
                dim: Dim::Wavelength
            })
        );
    }
}
