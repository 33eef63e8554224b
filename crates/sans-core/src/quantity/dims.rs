//! Closed universe of dimension and coordinate labels used by reduction
//! quantities. Pipeline stages compute "all dims except ..." style sets as
//! explicit differences over this universe instead of free-form strings.

use std::fmt;

use crate::domain::errors::{ReduceError, ReduceResult};

/// A dimension a quantity's data may be laid out along.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Dim {
    Pixel,
    #[serde(rename = "Q")]
    Q,
    Wavelength,
    Band,
    Layer,
}

impl Dim {
    pub const fn label(self) -> &'static str {
        match self {
            Dim::Pixel => "pixel",
            Dim::Q => "Q",
            Dim::Wavelength => "wavelength",
            Dim::Band => "band",
            Dim::Layer => "layer",
        }
    }

    /// Coordinate label carrying the physical axis values of this dimension,
    /// for dimensions that have one.
    pub const fn coord_label(self) -> Option<CoordLabel> {
        match self {
            Dim::Q => Some(CoordLabel::Q),
            Dim::Wavelength => Some(CoordLabel::Wavelength),
            Dim::Pixel | Dim::Band | Dim::Layer => None,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Label of a coordinate array attached to a quantity.
///
/// `Wavelength` and `Q` are axis coordinates; `PixelWidth`, `PixelHeight`
/// and `L2` (sample-to-pixel distance) are geometry coordinates supplied by
/// the instrument layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CoordLabel {
    Wavelength,
    Q,
    PixelWidth,
    PixelHeight,
    L2,
}

impl CoordLabel {
    pub const fn label(self) -> &'static str {
        match self {
            CoordLabel::Wavelength => "wavelength",
            CoordLabel::Q => "Q",
            CoordLabel::PixelWidth => "pixel_width",
            CoordLabel::PixelHeight => "pixel_height",
            CoordLabel::L2 => "L2",
        }
    }
}

impl fmt::Display for CoordLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Dimensions of `dims` that are not listed in `exclude`, preserving order.
pub fn dims_difference(dims: &[Dim], exclude: &[Dim]) -> Vec<Dim> {
    dims.iter()
        .copied()
        .filter(|dim| !exclude.contains(dim))
        .collect()
}

/// The single dimension of `dims` besides `besides`; anything other than
/// exactly one is ill-formed input.
pub fn single_dim_besides(dims: &[Dim], besides: Dim) -> ReduceResult<Dim> {
    let remaining = dims_difference(dims, &[besides]);
    match remaining.as_slice() {
        [dim] => Ok(*dim),
        _ => Err(ReduceError::BandDimAmbiguous {
            found: remaining.len(),
        }),
    }
}
