//! Reduction of small-angle neutron scattering data to I(Q).
//!
//! The crate is organized in three layers. [`quantity`] holds the data
//! model: dense and event-mode arrays with named dimensions, bin-edge and
//! point coordinates, exclusion masks, and variance propagation through
//! arithmetic. [`reduce`] holds the reduction stages built on top of it,
//! from monitor cleaning to the final background-subtracted I(Q).
//! [`config`] reads and writes the on-disk parameter files driving a
//! reduction.

pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod quantity;
pub mod reduce;

pub use config::{ReductionConfig, ReductionConfigError, load_reduction_config};
pub use diagnostics::{CollectingDiagnostics, Diagnostics, TracingDiagnostics};
pub use domain::{MonitorKind, ReduceError, ReduceResult, RunKind};
pub use quantity::{
    Coord, CoordLabel, DenseArray, Dim, EventArray, EventTable, Mask, Quantity, QuantityData,
    UncertaintyMode,
};
pub use reduce::{
    QBins, ReductionInputs, ReductionOutputs, ReductionParameters, RunInputs, RunMonitors,
    WavelengthBands, merge_spectra, reduce_i_of_q,
};
