//! On-disk reduction parameters.
//!
//! Parameters are stored as a JSON document so a reduction can be
//! reproduced from the file alone. [`ReductionConfig::template`] writes a
//! starting point with typical values; [`load_reduction_config`] reads a
//! file back and [`ReductionConfig::into_parameters`] turns it into the
//! in-memory form the driver takes.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::errors::ReduceResult;
use crate::quantity::{Dim, UncertaintyMode, linspace, validate_edges};
use crate::reduce::{QBins, ReductionParameters, WavelengthBands};

/// A binning axis: explicit edges, or an even subdivision of a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisSpec {
    Edges(Vec<f64>),
    Linear { start: f64, stop: f64, bins: usize },
}

impl AxisSpec {
    pub fn edges(&self) -> Vec<f64> {
        match self {
            AxisSpec::Edges(edges) => edges.clone(),
            AxisSpec::Linear { start, stop, bins } => linspace(*start, *stop, *bins),
        }
    }
}

/// The Q axis: a bin count resolved against the data, or explicit edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QBinsSpec {
    Count(usize),
    Edges(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionConfig {
    #[serde(rename = "wavelengthBins")]
    pub wavelength_bins: AxisSpec,
    #[serde(rename = "qBins")]
    pub q_bins: QBinsSpec,
    /// One `[start, stop]` wavelength range per band of the output.
    #[serde(
        rename = "wavelengthBands",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub wavelength_bands: Option<Vec<[f64; 2]>>,
    /// Wavelength range holding actual signal, for the monitor
    /// background estimate.
    #[serde(
        rename = "nonBackgroundRange",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub non_background_range: Option<[f64; 2]>,
    #[serde(rename = "finalDims", default, skip_serializing_if = "Option::is_none")]
    pub final_dims: Option<Vec<Dim>>,
    #[serde(rename = "uncertaintyMode", default)]
    pub uncertainty_mode: UncertaintyMode,
}

impl ReductionConfig {
    /// A configuration with typical values, meant to be edited.
    pub fn template() -> Self {
        Self {
            wavelength_bins: AxisSpec::Linear {
                start: 1.0,
                stop: 13.0,
                bins: 50,
            },
            q_bins: QBinsSpec::Count(100),
            wavelength_bands: None,
            non_background_range: None,
            final_dims: None,
            uncertainty_mode: UncertaintyMode::UpperBound,
        }
    }

    pub fn into_parameters(self) -> ReduceResult<ReductionParameters> {
        let wavelength_bins = self.wavelength_bins.edges();
        validate_edges(Dim::Wavelength, &wavelength_bins)?;
        let q_bins = match self.q_bins {
            QBinsSpec::Count(count) => QBins::Count(count),
            QBinsSpec::Edges(edges) => QBins::Edges(edges),
        };
        let wavelength_bands = match &self.wavelength_bands {
            Some(ranges) => {
                let pairs: Vec<(f64, f64)> =
                    ranges.iter().map(|&[start, stop]| (start, stop)).collect();
                Some(WavelengthBands::ranges(&pairs)?)
            }
            None => None,
        };
        Ok(ReductionParameters {
            wavelength_bins,
            q_bins,
            wavelength_bands,
            non_background_range: self.non_background_range.map(|[start, stop]| (start, stop)),
            final_dims: self.final_dims,
            uncertainty_mode: self.uncertainty_mode,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReductionConfigError {
    #[error("failed to read reduction parameters '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse reduction parameters '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub fn load_reduction_config(path: &Path) -> Result<ReductionConfig, ReductionConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ReductionConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ReductionConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
