//! Background-run subtraction.

use crate::domain::errors::ReduceResult;
use crate::quantity::{Quantity, ops};

/// Subtract the background run's I(Q) from the sample run's.
///
/// Either operand may still be event data; both are histogrammed so the
/// subtraction happens bin by bin on matching Q axes.
pub fn subtract_background(sample: &Quantity, background: &Quantity) -> ReduceResult<Quantity> {
    ops::sub(&sample.to_dense()?, &background.to_dense()?)
}
