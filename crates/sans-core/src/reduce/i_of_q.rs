//! End-to-end I(Q) reduction for a sample and background run pair.

use tracing::{debug, info};

use crate::diagnostics::Diagnostics;
use crate::domain::errors::ReduceResult;
use crate::domain::{MonitorKind, RunKind};
use crate::quantity::uncertainty::UncertaintyMode;
use crate::quantity::{Coord, CoordLabel, Dim, Quantity};

use super::background::subtract_background;
use super::direct_beam::resample_direct_beam;
use super::merge::{QBins, WavelengthBands, merge_spectra};
use super::monitor::preprocess_monitor_data;
use super::normalize::{
    iofq_denominator, norm_wavelength_term, normalize, solid_angle, transmission_fraction,
};

/// Incident and transmission monitor of one run, raw or cleaned.
#[derive(Debug, Clone)]
pub struct RunMonitors {
    pub incident: Quantity,
    pub transmission: Quantity,
}

/// Everything recorded for one measured run.
#[derive(Debug, Clone)]
pub struct RunInputs {
    /// Detector counts, usually event data over pixels. Must carry the
    /// pixel geometry coordinates for the solid angle.
    pub detector: Quantity,
    pub monitors: RunMonitors,
    /// Q of every pixel and wavelength bin, attached to the dense
    /// denominator before merging.
    pub denominator_q: Coord,
}

/// The measured runs and optional calibration entering a reduction.
#[derive(Debug, Clone)]
pub struct ReductionInputs {
    pub sample: RunInputs,
    pub background: RunInputs,
    /// Monitors of the empty-beam run, the transmission reference.
    pub empty_beam: RunMonitors,
    /// Measured direct-beam efficiency curve, if one is available.
    pub direct_beam: Option<Quantity>,
}

/// Knobs of the reduction.
#[derive(Debug, Clone)]
pub struct ReductionParameters {
    /// Wavelength bin edges the monitors and bands are aligned to.
    pub wavelength_bins: Vec<f64>,
    pub q_bins: QBins,
    pub wavelength_bands: Option<WavelengthBands>,
    /// Wavelength range holding actual signal; outside it the monitors
    /// see only their background level.
    pub non_background_range: Option<(f64, f64)>,
    /// Dimensions of the merged result, defaulting to just Q.
    pub final_dims: Option<Vec<Dim>>,
    pub uncertainty_mode: UncertaintyMode,
}

/// Wavelength-binned, background-free monitors of all three runs.
#[derive(Debug, Clone)]
pub struct CleanMonitors {
    pub sample: RunMonitors,
    pub background: RunMonitors,
    pub empty_beam: RunMonitors,
}

impl CleanMonitors {
    pub fn get(&self, run: RunKind, monitor: MonitorKind) -> &Quantity {
        let monitors = match run {
            RunKind::Sample => &self.sample,
            RunKind::Background => &self.background,
            RunKind::EmptyBeam => &self.empty_beam,
        };
        match monitor {
            MonitorKind::Incident => &monitors.incident,
            MonitorKind::Transmission => &monitors.transmission,
        }
    }
}

/// Results of a full reduction.
#[derive(Debug, Clone)]
pub struct ReductionOutputs {
    pub monitors: CleanMonitors,
    pub sample_iofq: Quantity,
    pub background_iofq: Quantity,
    /// Background-subtracted I(Q).
    pub iofq: Quantity,
}

/// Run the full reduction: clean the monitors, resample the direct beam,
/// reduce the sample and background runs to I(Q) and subtract them.
pub fn reduce_i_of_q(
    inputs: &ReductionInputs,
    params: &ReductionParameters,
    diagnostics: &dyn Diagnostics,
) -> ReduceResult<ReductionOutputs> {
    info!(mode = %params.uncertainty_mode, "reducing I(Q)");
    let monitors = CleanMonitors {
        sample: clean_run_monitors(&inputs.sample.monitors, params)?,
        background: clean_run_monitors(&inputs.background.monitors, params)?,
        empty_beam: clean_run_monitors(&inputs.empty_beam, params)?,
    };
    let direct_beam = match &inputs.direct_beam {
        Some(direct_beam) => Some(resample_direct_beam(
            direct_beam,
            &params.wavelength_bins,
            diagnostics,
        )?),
        None => None,
    };

    // Resolve the Q axis once, from the sample run, so both runs and
    // their denominators share identical edges.
    let q_bins = QBins::Edges(params.q_bins.resolve(&inputs.sample.detector)?);

    let sample_iofq = reduce_run(
        RunKind::Sample,
        &inputs.sample,
        &monitors.sample,
        &monitors.empty_beam,
        direct_beam.as_ref(),
        &q_bins,
        params,
    )?;
    let background_iofq = reduce_run(
        RunKind::Background,
        &inputs.background,
        &monitors.background,
        &monitors.empty_beam,
        direct_beam.as_ref(),
        &q_bins,
        params,
    )?;
    let iofq = subtract_background(&sample_iofq, &background_iofq)?;
    info!("reduction finished");
    Ok(ReductionOutputs {
        monitors,
        sample_iofq,
        background_iofq,
        iofq,
    })
}

fn clean_run_monitors(
    monitors: &RunMonitors,
    params: &ReductionParameters,
) -> ReduceResult<RunMonitors> {
    Ok(RunMonitors {
        incident: preprocess_monitor_data(
            &monitors.incident,
            &params.wavelength_bins,
            params.non_background_range,
            params.uncertainty_mode,
        )?,
        transmission: preprocess_monitor_data(
            &monitors.transmission,
            &params.wavelength_bins,
            params.non_background_range,
            params.uncertainty_mode,
        )?,
    })
}

/// Reduce one run to I(Q) against the empty-beam reference.
fn reduce_run(
    run: RunKind,
    inputs: &RunInputs,
    monitors: &RunMonitors,
    empty_beam: &RunMonitors,
    direct_beam: Option<&Quantity>,
    q_bins: &QBins,
    params: &ReductionParameters,
) -> ReduceResult<Quantity> {
    debug!(run = %run, "normalizing and merging run");
    let fraction = transmission_fraction(
        &monitors.incident,
        &monitors.transmission,
        &empty_beam.incident,
        &empty_beam.transmission,
    )?;
    let term = norm_wavelength_term(
        &monitors.incident,
        &fraction,
        direct_beam,
        params.uncertainty_mode,
    )?;
    let omega = solid_angle(&inputs.detector)?;
    let denominator = iofq_denominator(&term, &omega, params.uncertainty_mode)?
        .with_coord(CoordLabel::Q, inputs.denominator_q.clone())?;
    let numerator = merge_spectra(
        &inputs.detector,
        q_bins,
        params.wavelength_bands.as_ref(),
        params.final_dims.as_deref(),
    )?;
    let denominator = merge_spectra(
        &denominator,
        q_bins,
        params.wavelength_bands.as_ref(),
        params.final_dims.as_deref(),
    )?;
    normalize(&numerator, &denominator)
}

#[cfg(test)]
mod tests {
    use crate::domain::{MonitorKind, RunKind};
    use crate::quantity::{DenseArray, Quantity};

    use super::{CleanMonitors, RunMonitors};

    fn scalar(value: f64) -> Quantity {
        Quantity::from_dense(DenseArray::scalar(value))
    }

    fn pair(incident: f64, transmission: f64) -> RunMonitors {
        RunMonitors {
            incident: scalar(incident),
            transmission: scalar(transmission),
        }
    }

    #[test]
    fn monitors_are_addressed_by_run_and_kind() {
        let monitors = CleanMonitors {
            sample: pair(1.0, 2.0),
            background: pair(3.0, 4.0),
            empty_beam: pair(5.0, 6.0),
        };
        let value = |run, kind| {
            monitors
                .get(run, kind)
                .as_dense("test")
                .unwrap()
                .values()
                .sum()
        };
        assert_eq!(value(RunKind::Sample, MonitorKind::Incident), 1.0);
        assert_eq!(value(RunKind::Background, MonitorKind::Transmission), 4.0);
        assert_eq!(value(RunKind::EmptyBeam, MonitorKind::Incident), 5.0);
    }
}
