use crate::quantity::dims::{CoordLabel, Dim};

pub type ReduceResult<T> = Result<T, ReduceError>;

/// Failure surfaced by a reduction stage or by the quantity model beneath it.
///
/// Everything here is fail-fast: no stage retries or substitutes default
/// data. The only accepted degradation in the pipeline (variance loss during
/// direct-beam interpolation) is a diagnostic, not an error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReduceError {
    #[error("data has {dims} dimension labels but {axes} array axes")]
    RankMismatch { dims: usize, axes: usize },

    #[error("dimension {dim} appears more than once")]
    DuplicateDim { dim: Dim },

    #[error("data has no dimension {dim}")]
    MissingDim { dim: Dim },

    #[error("required coordinate {coord} is not attached")]
    MissingCoord { coord: CoordLabel },

    #[error(
        "coordinate {coord} has {found} values along dimension {dim}, which the data does not \
         have; only 2-value ranges are allowed for absent dimensions"
    )]
    CoordDims {
        coord: CoordLabel,
        dim: Dim,
        found: usize,
    },

    #[error(
        "coordinate {coord} has {found} values along dimension {dim}; expected {data} points or \
         {data} + 1 bin edges"
    )]
    CoordLength {
        coord: CoordLabel,
        dim: Dim,
        data: usize,
        found: usize,
    },

    #[error("variance shape {found:?} does not match data shape {data:?}")]
    VarianceShape { data: Vec<usize>, found: Vec<usize> },

    #[error("mask '{mask}' spans dimension {dim} which the data does not have")]
    MaskDims { mask: String, dim: Dim },

    #[error("mask '{mask}' has {found} values along dimension {dim}; expected {data}")]
    MaskLength {
        mask: String,
        dim: Dim,
        data: usize,
        found: usize,
    },

    #[error("size mismatch along dimension {dim}: {left} vs {right}")]
    SizeMismatch { dim: Dim, left: usize, right: usize },

    #[error("coordinate {coord} differs between operands")]
    CoordMismatch { coord: CoordLabel },

    #[error(
        "operand with variances would be broadcast along dimension {dim}; broadcasting variances \
         introduces spurious correlation"
    )]
    VarianceBroadcast { dim: Dim },

    #[error("{operation} requires either both operands or neither to carry variances")]
    VarianceMix { operation: &'static str },

    #[error("{operation} requires dense (histogrammed) data")]
    ExpectedDense { operation: &'static str },

    #[error("{operation} requires event (binned) data")]
    ExpectedEvents { operation: &'static str },

    #[error("coordinate {coord} must span exactly one dimension here, found {found}")]
    CoordRank { coord: CoordLabel, found: usize },

    #[error("coordinate {coord} must be bin edges along dimension {dim}")]
    ExpectedEdges { coord: CoordLabel, dim: Dim },

    #[error("coordinate {coord} must hold one value per element, not bin edges")]
    ExpectedPoints { coord: CoordLabel },

    #[error("{dim} axis values must be strictly increasing")]
    AxisNotIncreasing { dim: Dim },

    #[error("{dim} axis needs at least 2 bin edges, found {found}")]
    TooFewEdges { dim: Dim, found: usize },

    #[error("{operation} has no unmasked elements to reduce")]
    EmptyReduction { operation: &'static str },

    #[error("event table {field} length is {found}, expected {events}")]
    EventLength {
        field: &'static str,
        events: usize,
        found: usize,
    },

    #[error("event tables cannot be combined: {reason}")]
    EventTableIncompatible { reason: &'static str },

    #[error("wavelength bands must have exactly one dimension besides wavelength, found {found}")]
    BandDimAmbiguous { found: usize },

    #[error("wavelength band [{start}, {stop}] is not an increasing range")]
    BandRange { start: f64, stop: f64 },

    #[error("wavelength bands need at least 2 wavelength values per band, found {found}")]
    BandValues { found: usize },

    #[error("wavelength band specification contains no bands")]
    EmptyBands,

    #[error("Q bin count must be positive")]
    QBinCount,

    #[error("cannot derive a Q range: data carries no Q values")]
    EmptyQRange,

    #[error("final output dimensions must include Q")]
    FinalDimsMissingQ,

    #[error(
        "final output dimension {dim} is consumed by histogramming; dense data cannot keep it"
    )]
    FinalDimConflict { dim: Dim },

    #[error("normalization denominator must be dense, not event data")]
    EventDenominator,

    #[error("direct-beam curve must be one-dimensional over wavelength, found {found} dimensions")]
    CurveDims { found: usize },

    #[error("interpolation needs at least 2 direct-beam points, found {found}")]
    CurvePoints { found: usize },
}
