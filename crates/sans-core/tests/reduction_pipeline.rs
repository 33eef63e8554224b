//! End-to-end reductions of a small three-pixel instrument whose numbers
//! are simple enough to follow by hand.
//!
//! Monitors live on a native grid of four bins over `[0, 6]`; the two
//! outer bins fall outside the signal range `(1, 5)` and hold the
//! background level of 5 counts. The reduction rebins onto `[1, 3, 5]`.
//! One detector pixel is covered by a beam stop and must never reach the
//! result.

use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};
use sans_core::{
    CollectingDiagnostics, Coord, CoordLabel, DenseArray, Dim, EventArray, EventTable, Mask,
    MonitorKind, QBins, Quantity, ReduceError, ReductionInputs, ReductionParameters, RunInputs,
    RunKind, RunMonitors, UncertaintyMode, WavelengthBands, reduce_i_of_q,
};

const MONITOR_EDGES: [f64; 5] = [0.0, 1.0, 3.0, 5.0, 6.0];
const WAVELENGTH_BINS: [f64; 3] = [1.0, 3.0, 5.0];
const Q_EDGES: [f64; 4] = [0.0, 0.5, 1.0, 1.5];

fn monitor(native: [f64; 4]) -> Quantity {
    let values = ArrayD::from_shape_vec(IxDyn(&[4]), native.to_vec())
        .expect("monitor values should fit their shape");
    let data = DenseArray::new(vec![Dim::Wavelength], values.clone())
        .expect("monitor array should be valid")
        .with_variances(values)
        .expect("monitor variances should match");
    Quantity::from_dense(data)
        .with_coord(
            CoordLabel::Wavelength,
            Coord::axis(Dim::Wavelength, MONITOR_EDGES.to_vec()),
        )
        .expect("monitor wavelength edges should attach")
}

fn event_cell(weights: &[f64], wavelengths: &[f64], qs: &[f64]) -> EventTable {
    let mut coords = BTreeMap::new();
    coords.insert(CoordLabel::Wavelength, wavelengths.to_vec());
    coords.insert(CoordLabel::Q, qs.to_vec());
    EventTable::new(weights.to_vec(), Some(weights.to_vec()), coords)
        .expect("event cell should be consistent")
}

/// Three pixels of identical geometry; the last one is behind the beam
/// stop.
fn detector(cells: Vec<EventTable>) -> Quantity {
    let events = EventArray::from_cells(vec![Dim::Pixel], &[3], cells)
        .expect("detector cells should assemble");
    let mut beam_stop = ArrayD::from_elem(IxDyn(&[3]), false);
    beam_stop[[2]] = true;
    Quantity::from_events(events)
        .with_coord(CoordLabel::PixelWidth, Coord::axis(Dim::Pixel, vec![0.02; 3]))
        .expect("pixel width should attach")
        .with_coord(
            CoordLabel::PixelHeight,
            Coord::axis(Dim::Pixel, vec![0.03; 3]),
        )
        .expect("pixel height should attach")
        .with_coord(CoordLabel::L2, Coord::axis(Dim::Pixel, vec![2.0; 3]))
        .expect("detector distance should attach")
        .with_mask(
            "beam_stop",
            Mask::new(vec![Dim::Pixel], beam_stop).expect("beam stop mask should be valid"),
        )
        .expect("beam stop mask should attach")
}

fn sample_detector() -> Quantity {
    detector(vec![
        event_cell(
            &[1.0, 1.0, 1.0, 1.0],
            &[1.5, 2.5, 3.5, 4.5],
            &[0.2, 0.3, 0.7, 0.9],
        ),
        event_cell(&[2.0, 1.0], &[2.0, 4.0], &[0.4, 1.1]),
        event_cell(&[5.0, 5.0], &[2.0, 4.0], &[0.5, 0.5]),
    ])
}

fn background_detector() -> Quantity {
    detector(vec![
        event_cell(&[0.5, 0.5], &[2.0, 4.0], &[0.3, 0.8]),
        event_cell(&[0.5], &[2.5], &[0.45]),
        event_cell(&[9.0], &[2.5], &[0.5]),
    ])
}

/// Q of every (pixel, wavelength bin) pair of the dense denominator.
fn denominator_q() -> Coord {
    let values = ArrayD::from_shape_vec(
        IxDyn(&[3, 2]),
        vec![0.25, 0.8, 0.45, 1.05, 0.5, 0.5],
    )
    .expect("denominator Q values should fit their shape");
    Coord::new(vec![Dim::Pixel, Dim::Wavelength], values)
        .expect("denominator Q coordinate should be valid")
}

fn base_inputs() -> ReductionInputs {
    ReductionInputs {
        sample: RunInputs {
            detector: sample_detector(),
            monitors: RunMonitors {
                incident: monitor([6.0, 100.0, 80.0, 4.0]),
                transmission: monitor([4.0, 81.0, 61.0, 6.0]),
            },
            denominator_q: denominator_q(),
        },
        background: RunInputs {
            detector: background_detector(),
            monitors: RunMonitors {
                incident: monitor([5.0, 90.0, 70.0, 5.0]),
                transmission: monitor([5.0, 72.0, 50.0, 5.0]),
            },
            denominator_q: denominator_q(),
        },
        empty_beam: RunMonitors {
            incident: monitor([5.0, 105.0, 85.0, 5.0]),
            transmission: monitor([5.0, 100.0, 77.0, 5.0]),
        },
        direct_beam: None,
    }
}

fn parameters(mode: UncertaintyMode) -> ReductionParameters {
    ReductionParameters {
        wavelength_bins: WAVELENGTH_BINS.to_vec(),
        q_bins: QBins::Edges(Q_EDGES.to_vec()),
        wavelength_bands: None,
        non_background_range: Some((1.0, 5.0)),
        final_dims: None,
        uncertainty_mode: mode,
    }
}

fn dense_values(quantity: &Quantity) -> Vec<f64> {
    quantity
        .as_dense("test")
        .expect("quantity should be dense")
        .values()
        .iter()
        .copied()
        .collect()
}

fn dense_variances(quantity: &Quantity) -> Vec<f64> {
    quantity
        .as_dense("test")
        .expect("quantity should be dense")
        .variances()
        .expect("quantity should carry variances")
        .iter()
        .copied()
        .collect()
}

fn assert_close(found: &[f64], expected: &[f64], tolerance: f64) {
    assert_eq!(found.len(), expected.len(), "lengths should match");
    for (index, (f, e)) in found.iter().zip(expected).enumerate() {
        assert!(
            (f - e).abs() <= tolerance,
            "element {index}: found {f}, expected {e}"
        );
    }
}

#[test]
fn upper_bound_reduction_produces_background_subtracted_iofq() {
    let outputs = reduce_i_of_q(
        &base_inputs(),
        &parameters(UncertaintyMode::UpperBound),
        &CollectingDiagnostics::new(),
    )
    .expect("reduction should succeed");

    assert_eq!(outputs.iofq.dims(), &[Dim::Q]);
    assert_eq!(outputs.iofq.shape(), &[3]);
    assert_eq!(
        outputs.iofq.coord_edges(CoordLabel::Q).expect("Q edges"),
        Q_EDGES.to_vec()
    );
    assert!(outputs.iofq.has_variances());

    let sample = dense_values(&outputs.sample_iofq);
    let background = dense_values(&outputs.background_iofq);
    let subtracted = dense_values(&outputs.iofq);
    for bin in 0..3 {
        assert!(sample[bin] > 0.0, "sample I(Q) should be positive");
        assert!(sample[bin].is_finite() && subtracted[bin].is_finite());
        assert!(
            (subtracted[bin] - (sample[bin] - background[bin])).abs() < 1e-12,
            "I(Q) should be the per-bin difference of the runs"
        );
    }
    let sample_var = dense_variances(&outputs.sample_iofq);
    let background_var = dense_variances(&outputs.background_iofq);
    let subtracted_var = dense_variances(&outputs.iofq);
    for bin in 0..3 {
        assert!(
            (subtracted_var[bin] - (sample_var[bin] + background_var[bin])).abs() < 1e-12,
            "variances should add under subtraction"
        );
    }
}

#[test]
fn monitors_are_cleaned_onto_reduction_bins() {
    let outputs = reduce_i_of_q(
        &base_inputs(),
        &parameters(UncertaintyMode::UpperBound),
        &CollectingDiagnostics::new(),
    )
    .expect("reduction should succeed");

    let incident = outputs.monitors.get(RunKind::Sample, MonitorKind::Incident);
    assert_eq!(incident.dims(), &[Dim::Wavelength]);
    assert_eq!(
        incident
            .coord_edges(CoordLabel::Wavelength)
            .expect("wavelength edges"),
        WAVELENGTH_BINS.to_vec()
    );
    // Native [6, 100, 80, 4]: background level mean(6, 4) = 5 with
    // variance 2.5, doubled by the two-bin broadcast under UpperBound.
    assert_close(&dense_values(incident), &[95.0, 75.0], 1e-12);
    assert_close(&dense_variances(incident), &[105.0, 85.0], 1e-12);

    let empty = outputs
        .monitors
        .get(RunKind::EmptyBeam, MonitorKind::Transmission);
    assert_close(&dense_values(empty), &[95.0, 72.0], 1e-12);
}

#[test]
fn drop_mode_strips_the_broadcast_background_but_keeps_monitor_statistics() {
    let outputs = reduce_i_of_q(
        &base_inputs(),
        &parameters(UncertaintyMode::Drop),
        &CollectingDiagnostics::new(),
    )
    .expect("reduction should succeed");

    let incident = outputs.monitors.get(RunKind::Sample, MonitorKind::Incident);
    assert_close(&dense_values(incident), &[95.0, 75.0], 1e-12);
    // The monitor's own counting variances survive; only the stretched
    // background level loses its variances.
    assert_close(&dense_variances(incident), &[100.0, 80.0], 1e-12);
    assert!(outputs.iofq.has_variances());
}

#[test]
fn fail_mode_rejects_broadcasting_the_background_level() {
    let error = reduce_i_of_q(
        &base_inputs(),
        &parameters(UncertaintyMode::Fail),
        &CollectingDiagnostics::new(),
    )
    .expect_err("broadcasting a variance-carrying scalar should fail");
    assert!(
        matches!(error, ReduceError::VarianceBroadcast { .. }),
        "unexpected error: {error}"
    );
}

#[test]
fn single_full_range_band_reduces_identically() {
    let plain = reduce_i_of_q(
        &base_inputs(),
        &parameters(UncertaintyMode::UpperBound),
        &CollectingDiagnostics::new(),
    )
    .expect("unbanded reduction should succeed");

    let mut banded_params = parameters(UncertaintyMode::UpperBound);
    banded_params.wavelength_bands = Some(WavelengthBands::single(1.0, 5.0));
    let banded = reduce_i_of_q(
        &base_inputs(),
        &banded_params,
        &CollectingDiagnostics::new(),
    )
    .expect("banded reduction should succeed");

    assert_eq!(banded.iofq, plain.iofq);
    assert_eq!(banded.sample_iofq, plain.sample_iofq);
}

#[test]
fn two_bands_add_a_band_dimension_with_their_ranges() {
    let plain = reduce_i_of_q(
        &base_inputs(),
        &parameters(UncertaintyMode::UpperBound),
        &CollectingDiagnostics::new(),
    )
    .expect("unbanded reduction should succeed");

    let mut params = parameters(UncertaintyMode::UpperBound);
    params.wavelength_bands = Some(
        WavelengthBands::ranges(&[(1.0, 3.0), (3.0, 5.0)]).expect("bands should be valid"),
    );
    let banded = reduce_i_of_q(&base_inputs(), &params, &CollectingDiagnostics::new())
        .expect("banded reduction should succeed");

    assert_eq!(banded.iofq.dims(), &[Dim::Band, Dim::Q]);
    assert_eq!(banded.iofq.shape(), &[2, 3]);
    let ranges = banded
        .iofq
        .get_coord(CoordLabel::Wavelength)
        .expect("band ranges should be attached");
    assert_eq!(ranges.dims(), &[Dim::Band, Dim::Wavelength]);
    let flat: Vec<f64> = ranges.values().iter().copied().collect();
    assert_eq!(flat, vec![1.0, 3.0, 3.0, 5.0]);

    // Every populated (band, Q) cell matches the unbanded result; cells
    // no band reaches divide zero by zero.
    let full = dense_values(&plain.iofq);
    let split = dense_values(&banded.iofq);
    assert!((split[0] - full[0]).abs() < 1e-12, "band 0 holds the low-Q bin");
    assert!((split[4] - full[1]).abs() < 1e-12, "band 1 holds the mid-Q bin");
    assert!((split[5] - full[2]).abs() < 1e-12, "band 1 holds the high-Q bin");
    assert!(split[1].is_nan() && split[3].is_nan(), "unreached cells are empty");
}

#[test]
fn count_q_bins_are_resolved_once_for_both_runs() {
    let mut params = parameters(UncertaintyMode::UpperBound);
    params.q_bins = QBins::Count(4);
    let outputs = reduce_i_of_q(&base_inputs(), &params, &CollectingDiagnostics::new())
        .expect("reduction should succeed");

    let sample_edges = outputs
        .sample_iofq
        .coord_edges(CoordLabel::Q)
        .expect("sample Q edges");
    let background_edges = outputs
        .background_iofq
        .coord_edges(CoordLabel::Q)
        .expect("background Q edges");
    // The background run spans a narrower Q range; sharing the sample's
    // resolved edges is what makes the subtraction line up.
    assert_eq!(sample_edges, background_edges);
    assert_eq!(sample_edges.len(), 5);
    assert!((sample_edges[0] - 0.2).abs() < 1e-12);
    assert!((sample_edges[4] - 1.1).abs() < 1e-12);
}

#[test]
fn direct_beam_resampling_warns_and_scales_the_denominator() {
    let plain = reduce_i_of_q(
        &base_inputs(),
        &parameters(UncertaintyMode::UpperBound),
        &CollectingDiagnostics::new(),
    )
    .expect("reduction without a direct beam should succeed");

    let points = vec![0.5, 5.5];
    let mut values = ArrayD::zeros(IxDyn(&[2]));
    values[[0]] = 2.0;
    values[[1]] = 2.0;
    let curve = DenseArray::new(vec![Dim::Wavelength], values.clone())
        .expect("curve should be valid")
        .with_variances(values)
        .expect("curve variances should match");
    let mut inputs = base_inputs();
    inputs.direct_beam = Some(
        Quantity::from_dense(curve)
            .with_coord(CoordLabel::Wavelength, Coord::axis(Dim::Wavelength, points))
            .expect("curve wavelength points should attach"),
    );

    let diagnostics = CollectingDiagnostics::new();
    let scaled = reduce_i_of_q(
        &inputs,
        &parameters(UncertaintyMode::UpperBound),
        &diagnostics,
    )
    .expect("reduction with a direct beam should succeed");

    assert!(
        diagnostics
            .messages()
            .iter()
            .any(|message| message.contains("direct-beam")),
        "resampling should warn about dropping the curve's variances"
    );
    // A flat curve of 2 doubles the denominator everywhere.
    let expected: Vec<f64> = dense_values(&plain.sample_iofq)
        .iter()
        .map(|value| value / 2.0)
        .collect();
    assert_close(&dense_values(&scaled.sample_iofq), &expected, 1e-12);
}

#[test]
fn masked_pixel_never_reaches_the_result() {
    let plain = reduce_i_of_q(
        &base_inputs(),
        &parameters(UncertaintyMode::UpperBound),
        &CollectingDiagnostics::new(),
    )
    .expect("reduction should succeed");

    let mut inputs = base_inputs();
    inputs.sample.detector = detector(vec![
        event_cell(
            &[1.0, 1.0, 1.0, 1.0],
            &[1.5, 2.5, 3.5, 4.5],
            &[0.2, 0.3, 0.7, 0.9],
        ),
        event_cell(&[2.0, 1.0], &[2.0, 4.0], &[0.4, 1.1]),
        // Same beam-stop pixel, a hundred times brighter.
        event_cell(&[500.0, 500.0], &[2.0, 4.0], &[0.5, 0.5]),
    ]);
    let rerun = reduce_i_of_q(
        &inputs,
        &parameters(UncertaintyMode::UpperBound),
        &CollectingDiagnostics::new(),
    )
    .expect("reduction should succeed");

    assert_eq!(rerun.iofq, plain.iofq);
}
