//! Deterministic synthetic instrument for the `reduce` command.
//!
//! A small ring of detector pixels at slightly staggered distances records
//! scattering events whose wavelengths follow a low-discrepancy sequence,
//! so runs are reproducible without a random number generator. Monitors
//! see a smooth beam profile on a fixed native grid that is finer than the
//! reduction binning, and the direct-beam curve is tabulated on its own
//! wavelength points so the reduction has to resample it.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use ndarray::{ArrayD, IxDyn};
use sans_core::config::{AxisSpec, QBinsSpec};
use sans_core::{
    Coord, CoordLabel, DenseArray, Dim, EventArray, EventTable, Mask, Quantity, ReduceResult,
    ReductionConfig, ReductionInputs, RunInputs, RunMonitors, UncertaintyMode,
};

/// Wavelength band the synthetic source actually illuminates.
const WAVELENGTH_LO: f64 = 1.0;
const WAVELENGTH_HI: f64 = 9.0;

/// Fractional part of the golden ratio, the classic low-discrepancy step.
const GOLDEN_FRACTION: f64 = 0.618_033_988_749_894_9;

/// Parameters matched to the synthetic instrument: its wavelength band,
/// a monitor background estimated outside `[1.5, 8.5]`, and upper-bound
/// handling of broadcast variances. The Q window stops short of the
/// extremes only single pixels reach, where the normalization
/// denominator would be empty.
pub(super) fn demo_config() -> ReductionConfig {
    ReductionConfig {
        wavelength_bins: AxisSpec::Linear {
            start: WAVELENGTH_LO,
            stop: WAVELENGTH_HI,
            bins: 8,
        },
        q_bins: QBinsSpec::Edges((1..=17).map(|step| 0.05 * step as f64).collect()),
        wavelength_bands: None,
        non_background_range: Some([1.5, 8.5]),
        final_dims: None,
        uncertainty_mode: UncertaintyMode::UpperBound,
    }
}

/// Assemble sample and background runs, shared empty-beam monitors and a
/// direct-beam curve. `wavelength_bins` sizes the precomputed Q grid the
/// normalization denominator is histogrammed with.
pub(super) fn synthetic_inputs(
    pixels: usize,
    events_per_pixel: usize,
    wavelength_bins: &[f64],
) -> ReduceResult<ReductionInputs> {
    let edges = monitor_edges();
    let denominator_q = denominator_q(pixels, wavelength_bins)?;

    let sample = RunInputs {
        detector: detector_events(pixels, events_per_pixel, 0.12, 1.0)?,
        monitors: RunMonitors {
            incident: monitor_spectrum(&edges, |wavelength| {
                100.0 + 20_000.0 * beam_profile(wavelength)
            })?,
            transmission: monitor_spectrum(&edges, |wavelength| {
                80.0 + 20_000.0 * beam_profile(wavelength) * 0.8 * (-0.02 * wavelength).exp()
            })?,
        },
        denominator_q: denominator_q.clone(),
    };
    let background = RunInputs {
        detector: detector_events(pixels, events_per_pixel, 0.57, 0.25)?,
        monitors: RunMonitors {
            incident: monitor_spectrum(&edges, |wavelength| {
                100.0 + 19_400.0 * beam_profile(wavelength)
            })?,
            transmission: monitor_spectrum(&edges, |wavelength| {
                80.0 + 19_400.0 * beam_profile(wavelength) * 0.8 * (-0.02 * wavelength).exp()
            })?,
        },
        denominator_q,
    };
    let empty_beam = RunMonitors {
        incident: monitor_spectrum(&edges, |wavelength| {
            100.0 + 21_000.0 * beam_profile(wavelength)
        })?,
        transmission: monitor_spectrum(&edges, |wavelength| {
            80.0 + 21_000.0 * beam_profile(wavelength) * 0.99
        })?,
    };

    Ok(ReductionInputs {
        sample,
        background,
        empty_beam,
        direct_beam: Some(direct_beam_curve()?),
    })
}

fn low_discrepancy(seed: f64, index: usize) -> f64 {
    (seed + index as f64 * GOLDEN_FRACTION).fract()
}

/// Sample-to-pixel distances in metres, staggered so pixels do not share
/// identical geometry.
fn pixel_distances(pixels: usize) -> Vec<f64> {
    (0..pixels).map(|pixel| 2.0 + 0.002 * pixel as f64).collect()
}

/// sin(theta) for a pixel on a ring of increasing radius; Q = 4 pi
/// sin(theta) / lambda.
fn pixel_sin_theta(pixel: usize, pixels: usize, distance: f64) -> f64 {
    let radius = 0.05 + 0.45 * (pixel as f64 + 0.5) / pixels as f64;
    (0.5 * radius.atan2(distance)).sin()
}

fn detector_events(
    pixels: usize,
    events_per_pixel: usize,
    seed: f64,
    weight_scale: f64,
) -> ReduceResult<Quantity> {
    let distances = pixel_distances(pixels);
    let mut cells = Vec::with_capacity(pixels);
    for pixel in 0..pixels {
        let sin_theta = pixel_sin_theta(pixel, pixels, distances[pixel]);
        let mut weights = Vec::with_capacity(events_per_pixel);
        let mut variances = Vec::with_capacity(events_per_pixel);
        let mut wavelengths = Vec::with_capacity(events_per_pixel);
        let mut qs = Vec::with_capacity(events_per_pixel);
        for event in 0..events_per_pixel {
            let spread = low_discrepancy(seed + pixel as f64 * 0.37, event);
            let wavelength = WAVELENGTH_LO + spread * (WAVELENGTH_HI - WAVELENGTH_LO);
            let weight = weight_scale
                * (0.8 + 0.4 * low_discrepancy(seed + 0.31, pixel * events_per_pixel + event));
            weights.push(weight);
            variances.push(weight);
            wavelengths.push(wavelength);
            qs.push(4.0 * PI * sin_theta / wavelength);
        }
        let mut coords = BTreeMap::new();
        coords.insert(CoordLabel::Wavelength, wavelengths);
        coords.insert(CoordLabel::Q, qs);
        cells.push(EventTable::new(weights, Some(variances), coords)?);
    }
    let events = EventArray::from_cells(vec![Dim::Pixel], &[pixels], cells)?;

    let mut beam_stop = ArrayD::from_elem(IxDyn(&[pixels]), false);
    beam_stop[[pixels / 2]] = true;
    Quantity::from_events(events)
        .with_coord(
            CoordLabel::PixelWidth,
            Coord::axis(Dim::Pixel, vec![0.01; pixels]),
        )?
        .with_coord(
            CoordLabel::PixelHeight,
            Coord::axis(Dim::Pixel, vec![0.01; pixels]),
        )?
        .with_coord(CoordLabel::L2, Coord::axis(Dim::Pixel, distances))?
        .with_mask("beam_stop", Mask::new(vec![Dim::Pixel], beam_stop)?)
}

/// Native monitor binning, half the width of the demo reduction bins and
/// extending past the illuminated band on both sides.
fn monitor_edges() -> Vec<f64> {
    (0..=18).map(|step| 0.5 + 0.5 * step as f64).collect()
}

/// Smooth beam shape that vanishes outside the illuminated band, so the
/// bins beyond it hold background only.
fn beam_profile(wavelength: f64) -> f64 {
    let phase = PI * (wavelength - WAVELENGTH_LO) / (WAVELENGTH_HI - WAVELENGTH_LO);
    if (0.0..=PI).contains(&phase) {
        phase.sin().powi(2)
    } else {
        0.0
    }
}

/// Histogrammed monitor with counting statistics: the variance of each bin
/// equals its value.
fn monitor_spectrum(edges: &[f64], counts: impl Fn(f64) -> f64) -> ReduceResult<Quantity> {
    let mut values = ArrayD::zeros(IxDyn(&[edges.len() - 1]));
    for (bin, window) in edges.windows(2).enumerate() {
        values[[bin]] = counts(0.5 * (window[0] + window[1]));
    }
    let data = DenseArray::new(vec![Dim::Wavelength], values.clone())?.with_variances(values)?;
    Quantity::from_dense(data).with_coord(
        CoordLabel::Wavelength,
        Coord::axis(Dim::Wavelength, edges.to_vec()),
    )
}

/// Direct-beam efficiency tabulated at its own wavelength points, with
/// variances, so a reduction exercises the resampling path and its
/// variance warning.
fn direct_beam_curve() -> ReduceResult<Quantity> {
    let points = vec![0.8, 2.6, 4.4, 6.2, 8.0, 9.8];
    let mut values = ArrayD::zeros(IxDyn(&[points.len()]));
    let mut variances = ArrayD::zeros(IxDyn(&[points.len()]));
    for (index, &point) in points.iter().enumerate() {
        values[[index]] = 0.9 + 0.03 * point;
        variances[[index]] = 1e-4;
    }
    let data = DenseArray::new(vec![Dim::Wavelength], values)?.with_variances(variances)?;
    Quantity::from_dense(data).with_coord(
        CoordLabel::Wavelength,
        Coord::axis(Dim::Wavelength, points),
    )
}

/// Q of each (pixel, wavelength bin) pair of the normalization
/// denominator, evaluated at bin midpoints with the detector geometry.
fn denominator_q(pixels: usize, wavelength_bins: &[f64]) -> ReduceResult<Coord> {
    let distances = pixel_distances(pixels);
    let bins = wavelength_bins.len().saturating_sub(1);
    let mut values = ArrayD::zeros(IxDyn(&[pixels, bins]));
    for pixel in 0..pixels {
        let sin_theta = pixel_sin_theta(pixel, pixels, distances[pixel]);
        for bin in 0..bins {
            let midpoint = 0.5 * (wavelength_bins[bin] + wavelength_bins[bin + 1]);
            values[[pixel, bin]] = 4.0 * PI * sin_theta / midpoint;
        }
    }
    Coord::new(vec![Dim::Pixel, Dim::Wavelength], values)
}
