//! Domain vocabulary shared across the reduction pipeline: which run a
//! quantity was measured in, which beam monitor produced it, and the error
//! type every fallible stage returns.

pub mod errors;

pub use errors::{ReduceError, ReduceResult};

use std::fmt;

/// Measurement run a quantity originates from. The reduction algorithms are
/// identical across run kinds; only the bound input data differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunKind {
    /// Run with the sample in the beam.
    Sample,
    /// Run with the sample holder or solvent only.
    Background,
    /// Run with an empty beam, used for direct-beam normalization.
    EmptyBeam,
}

impl RunKind {
    pub const fn label(self) -> &'static str {
        match self {
            RunKind::Sample => "sample",
            RunKind::Background => "background",
            RunKind::EmptyBeam => "empty_beam",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Beam monitor position. The incident monitor sits before the sample, the
/// transmission monitor behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MonitorKind {
    Incident,
    Transmission,
}

impl MonitorKind {
    pub const fn label(self) -> &'static str {
        match self {
            MonitorKind::Incident => "incident",
            MonitorKind::Transmission => "transmission",
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
