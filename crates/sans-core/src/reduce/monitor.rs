//! Monitor preprocessing: wavelength binning and background removal.

use crate::domain::errors::ReduceResult;
use crate::quantity::uncertainty::{UncertaintyMode, broadcast_uncertainties};
use crate::quantity::{CoordLabel, Dim, Quantity, ops};

/// Bin a raw monitor onto the reduction wavelength grid and remove its
/// wavelength-independent background.
///
/// The background level is the mean of the monitor outside
/// `non_background_range`; the in-signal bins are masked off before
/// averaging. Event monitors are histogrammed onto `wavelength_bins`
/// before the background estimate so both see the same binning; dense
/// monitors estimate the background from their native bins and are
/// rebinned afterwards. Subtracting a scalar from every wavelength bin is
/// a broadcast, so the background is routed through `mode` first.
pub fn preprocess_monitor_data(
    monitor: &Quantity,
    wavelength_bins: &[f64],
    non_background_range: Option<(f64, f64)>,
    mode: UncertaintyMode,
) -> ReduceResult<Quantity> {
    let (binned, background) = if monitor.is_events() {
        let binned = monitor
            .bin_by(CoordLabel::Wavelength, Dim::Wavelength, wavelength_bins)?
            .to_dense()?;
        let background = background_level(&binned, non_background_range)?;
        (binned, background)
    } else {
        let background = background_level(monitor, non_background_range)?;
        let binned = monitor.rebin(CoordLabel::Wavelength, wavelength_bins)?;
        (binned, background)
    };
    match background {
        Some(background) => {
            let prepared = broadcast_uncertainties(&background, &binned.dim_sizes(), mode)?;
            ops::sub(&binned, &prepared)
        }
        None => Ok(binned),
    }
}

/// Mean monitor level outside the signal range, as a scalar quantity.
fn background_level(
    monitor: &Quantity,
    non_background_range: Option<(f64, f64)>,
) -> ReduceResult<Option<Quantity>> {
    match non_background_range {
        Some((start, stop)) => monitor
            .mask_range(CoordLabel::Wavelength, start, stop, "signal")?
            .mean_all()
            .map(Some),
        None => Ok(None),
    }
}
