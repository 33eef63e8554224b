//! Reduction stages turning raw detector and monitor quantities into I(Q).
//!
//! The stages mirror the order of the reduction itself: monitors are
//! cleaned ([`monitor`]), the direct-beam curve is resampled
//! ([`direct_beam`]), the normalization denominator is assembled
//! ([`normalize`]), numerator and denominator are merged into Q bins
//! ([`merge`]), the ratio is formed ([`normalize::normalize`]), and the
//! background run is subtracted ([`background`]). The [`i_of_q`] driver
//! chains them for a sample/background run pair.

pub mod background;
pub mod direct_beam;
pub mod i_of_q;
pub mod merge;
pub mod monitor;
pub mod normalize;

pub use background::subtract_background;
pub use direct_beam::resample_direct_beam;
pub use i_of_q::{
    CleanMonitors, ReductionInputs, ReductionOutputs, ReductionParameters, RunInputs, RunMonitors,
    reduce_i_of_q,
};
pub use merge::{QBins, WavelengthBands, merge_spectra};
pub use monitor::preprocess_monitor_data;
pub use normalize::{
    iofq_denominator, norm_wavelength_term, normalize, solid_angle, transmission_fraction,
};
