//! The normalization denominator and the final division.

use std::collections::BTreeMap;

use ndarray::Dimension;

use crate::domain::errors::{ReduceError, ReduceResult};
use crate::quantity::uncertainty::{UncertaintyMode, broadcast_uncertainties};
use crate::quantity::{
    CoordLabel, DenseArray, Dim, EventArray, EventTable, Quantity, QuantityData,
    bin_index_clamped, ops,
};

/// Solid angle subtended by each detector pixel, approximated as a flat
/// rectangle facing the sample: width times height over the squared
/// sample-to-pixel distance.
///
/// Coordinates and masks of `data` whose dimensions all lie within the
/// result's dimensions are carried over; the rest are dropped by this
/// reduction.
pub fn solid_angle(data: &Quantity) -> ReduceResult<Quantity> {
    let width = coord_quantity(data, CoordLabel::PixelWidth)?;
    let height = coord_quantity(data, CoordLabel::PixelHeight)?;
    let distance = coord_quantity(data, CoordLabel::L2)?;
    let area = ops::mul(&width, &height)?;
    let mut omega = ops::div(&area, &ops::mul(&distance, &distance)?)?;
    let omega_dims = omega.dims().to_vec();
    for (&label, coord) in data.coords() {
        if coord.dims().iter().all(|dim| omega_dims.contains(dim)) {
            omega = omega.with_coord(label, coord.clone())?;
        }
    }
    for (name, mask) in data.masks() {
        if mask.dims().iter().all(|dim| omega_dims.contains(dim)) {
            omega = omega.with_mask(name.clone(), mask.clone())?;
        }
    }
    Ok(omega)
}

/// A coordinate of `data` reinterpreted as a standalone quantity.
fn coord_quantity(data: &Quantity, label: CoordLabel) -> ReduceResult<Quantity> {
    let coord = data.coord(label)?;
    let dense = DenseArray::new(coord.dims().to_vec(), coord.values().clone())?;
    Ok(Quantity::from_dense(dense))
}

/// Wavelength-dependent fraction of the beam transmitted through the
/// sample, from the monitor pairs of the sample run and the empty-beam
/// run.
pub fn transmission_fraction(
    sample_incident: &Quantity,
    sample_transmission: &Quantity,
    direct_incident: &Quantity,
    direct_transmission: &Quantity,
) -> ReduceResult<Quantity> {
    let transmitted = ops::div(sample_transmission, direct_transmission)?;
    let incident_ratio = ops::div(direct_incident, sample_incident)?;
    ops::mul(&transmitted, &incident_ratio)
}

/// Wavelength term of the normalization denominator: incident monitor
/// times transmission fraction, scaled by the direct-beam efficiency
/// curve when one is available.
///
/// The direct beam may resolve more dimensions than the monitor term, so
/// the monitor term is routed through `mode` against the direct beam's
/// sizes before the multiplication. The result's wavelength coordinate is
/// converted from bin edges to midpoints, ready to combine with the
/// per-pixel solid angle.
pub fn norm_wavelength_term(
    incident_monitor: &Quantity,
    transmission_fraction: &Quantity,
    direct_beam: Option<&Quantity>,
    mode: UncertaintyMode,
) -> ReduceResult<Quantity> {
    let mut term = ops::mul(incident_monitor, transmission_fraction)?;
    if let Some(direct_beam) = direct_beam {
        let prepared = broadcast_uncertainties(&term, &direct_beam.dim_sizes(), mode)?;
        term = ops::mul(direct_beam, &prepared)?;
    }
    term.with_midpoints(CoordLabel::Wavelength)
}

/// Full denominator for I(Q): the wavelength term spread over the pixels
/// and weighted by each pixel's solid angle.
///
/// Spreading the wavelength term across pixels is a broadcast of
/// variance-carrying monitor data, so it is routed through `mode`.
pub fn iofq_denominator(
    wavelength_term: &Quantity,
    solid_angle: &Quantity,
    mode: UncertaintyMode,
) -> ReduceResult<Quantity> {
    let prepared = broadcast_uncertainties(wavelength_term, &solid_angle.dim_sizes(), mode)?;
    ops::mul(solid_angle, &prepared)
}

/// Divide the merged numerator by the merged denominator to produce
/// I(Q).
///
/// An event numerator keeps its event structure: every event is divided
/// by the denominator value of the Q bin its own Q coordinate falls in.
/// When the denominator carries variances that per-event division would
/// correlate the events, so the numerator is histogrammed first. The
/// denominator itself must be dense.
pub fn normalize(numerator: &Quantity, denominator: &Quantity) -> ReduceResult<Quantity> {
    if denominator.is_events() {
        return Err(ReduceError::EventDenominator);
    }
    let numerator = if numerator.is_events() && denominator.has_variances() {
        numerator.to_dense()?
    } else {
        numerator.clone()
    };
    match numerator.data() {
        QuantityData::Events(events) => divide_events(&numerator, events, denominator),
        QuantityData::Dense(_) => ops::div(&numerator, denominator),
    }
}

fn divide_events(
    numerator: &Quantity,
    events: &EventArray,
    denominator: &Quantity,
) -> ReduceResult<Quantity> {
    let den = denominator.as_dense("normalization")?;
    let q_edges = denominator.coord_edges(CoordLabel::Q)?;
    let q_axis = den
        .axis_of(Dim::Q)
        .ok_or(ReduceError::MissingDim { dim: Dim::Q })?;

    // Denominator index template: every non-Q axis tracks the matching
    // cell axis of the numerator, the Q axis comes from the event itself.
    let mut source_axis = Vec::with_capacity(den.dims().len());
    for &dim in den.dims() {
        if dim == Dim::Q {
            source_axis.push(None);
        } else {
            let axis = events
                .axis_of(dim)
                .ok_or(ReduceError::MissingDim { dim })?;
            source_axis.push(Some(axis));
        }
    }

    let table = events.table();
    let event_q = table.coord(CoordLabel::Q)?;
    let weights = table.weights();
    let variances = table.variances();
    let coord_sources: Vec<(CoordLabel, &[f64])> = table
        .coords()
        .iter()
        .map(|(&label, values)| (label, values.as_slice()))
        .collect();

    let mut cells = Vec::with_capacity(events.cells().len());
    let mut den_index = vec![0usize; den.dims().len()];
    for (pattern, cell) in events.cells().indexed_iter() {
        let index = pattern.slice();
        let mut weights_out = Vec::with_capacity(cell.len());
        let mut variances_out = variances.map(|_| Vec::with_capacity(cell.len()));
        let mut coords_out: Vec<Vec<f64>> =
            coord_sources.iter().map(|_| Vec::with_capacity(cell.len())).collect();
        for &event in cell {
            for (slot, source) in den_index.iter_mut().zip(&source_axis) {
                if let Some(axis) = source {
                    *slot = index[*axis];
                }
            }
            den_index[q_axis] = bin_index_clamped(&q_edges, event_q[event]);
            let divisor = den.values()[den_index.as_slice()];
            weights_out.push(weights[event] / divisor);
            if let (Some(out), Some(variances)) = (&mut variances_out, variances) {
                out.push(variances[event] / (divisor * divisor));
            }
            for ((_, source), values) in coord_sources.iter().zip(&mut coords_out) {
                values.push(source[event]);
            }
        }
        let coords: BTreeMap<CoordLabel, Vec<f64>> = coord_sources
            .iter()
            .map(|&(label, _)| label)
            .zip(coords_out)
            .collect();
        cells.push(EventTable::new(weights_out, variances_out, coords)?);
    }

    let divided = EventArray::from_cells(events.dims().to_vec(), events.shape(), cells)?;
    let mut out = Quantity::from_events(divided);
    for (&label, coord) in numerator.coords() {
        out = out.with_coord(label, coord.clone())?;
    }
    for (name, mask) in numerator.masks() {
        out = out.with_mask(name.clone(), mask.clone())?;
    }
    Ok(out)
}
