//! Warning side-channel for reduction stages.
//!
//! The only accepted degradation in the pipeline, dropping variances when
//! interpolating the direct-beam curve, is reported here rather than through
//! an error. Stages take `&dyn Diagnostics` so callers choose where the
//! warnings go.

use std::sync::Mutex;

pub trait Diagnostics {
    fn warn(&self, message: &str);
}

/// Forwards warnings to the active `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }
}

/// Buffers warnings in memory for later inspection.
#[derive(Debug, Default)]
pub struct CollectingDiagnostics {
    messages: Mutex<Vec<String>>,
}

impl CollectingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        match self.messages.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Diagnostics for CollectingDiagnostics {
    fn warn(&self, message: &str) {
        let mut guard = match self.messages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::{CollectingDiagnostics, Diagnostics};

    #[test]
    fn collecting_diagnostics_records_in_order() {
        let diagnostics = CollectingDiagnostics::new();
        let as_trait: &dyn Diagnostics = &diagnostics;
        as_trait.warn("first");
        as_trait.warn("second");
        assert_eq!(diagnostics.messages(), vec!["first", "second"]);
    }
}
