//! Policy for combining a variance-carrying quantity with a higher-rank
//! one.
//!
//! Broadcasting a quantity with variances duplicates one measured value
//! across a dimension; treating the copies as independent measurements
//! introduces spurious correlation. Operations that are about to broadcast
//! an operand route it through [`broadcast_uncertainties`] first.

use serde::{Deserialize, Serialize};

use crate::domain::errors::{ReduceError, ReduceResult};

use super::Quantity;
use super::dense::DenseArray;
use super::dims::Dim;
use super::ops::expand_to;

/// How to reconcile variances with a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyMode {
    /// Strip the operand's variances when the broadcast would duplicate
    /// them; an operand that already matches the target keeps its
    /// variances.
    Drop,
    /// Inflate variances by the number of copies the broadcast makes, a
    /// conservative estimate that cannot underestimate the true
    /// uncertainty.
    #[default]
    UpperBound,
    /// Leave the operand untouched; the combining operation fails if a
    /// variance-carrying operand would actually be stretched.
    Fail,
}

impl UncertaintyMode {
    pub const fn label(self) -> &'static str {
        match self {
            UncertaintyMode::Drop => "drop",
            UncertaintyMode::UpperBound => "upper_bound",
            UncertaintyMode::Fail => "fail",
        }
    }
}

impl std::fmt::Display for UncertaintyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Prepare `data` for being combined against an operand with the `target`
/// dimension sizes.
///
/// An operand without variances, or one whose sizes already match the
/// target, is returned unchanged in every mode. Otherwise `Drop` strips
/// the variances, `UpperBound` multiplies them by the number of copies the
/// broadcast makes (the product of the target sizes along dimensions the
/// operand lacks or has at length 1) and materializes the combined shape,
/// and `Fail` returns the operand unchanged so the combining operation
/// rejects the stretch. Coordinates and masks pass through untouched.
pub fn broadcast_uncertainties(
    data: &Quantity,
    target: &[(Dim, usize)],
    mode: UncertaintyMode,
) -> ReduceResult<Quantity> {
    if mode == UncertaintyMode::Fail || !data.has_variances() {
        return Ok(data.clone());
    }
    let dense = data.as_dense("uncertainty broadcasting")?;
    let copies = copy_count(dense, target)?;
    if copies == 1 {
        return Ok(data.clone());
    }
    match mode {
        UncertaintyMode::Drop => data.clone().drop_variances(),
        UncertaintyMode::UpperBound => upper_bound(data, dense, target, copies),
        UncertaintyMode::Fail => Ok(data.clone()),
    }
}

/// How many times the broadcast against `target` duplicates each element.
fn copy_count(dense: &DenseArray, target: &[(Dim, usize)]) -> ReduceResult<usize> {
    let mut copies = 1usize;
    for &(dim, size) in target {
        match dense.size(dim) {
            None => copies *= size,
            Some(own) if own == 1 && size > 1 => copies *= size,
            Some(own) if own == size || own == 1 => {}
            Some(own) => {
                return Err(ReduceError::SizeMismatch {
                    dim,
                    left: size,
                    right: own,
                });
            }
        }
    }
    Ok(copies)
}

fn upper_bound(
    data: &Quantity,
    dense: &DenseArray,
    target: &[(Dim, usize)],
    copies: usize,
) -> ReduceResult<Quantity> {
    let variances = match dense.variances() {
        Some(variances) => variances,
        None => return Ok(data.clone()),
    };

    // Combined shape: target dims first, then the operand's extras.
    let mut combined: Vec<(Dim, usize)> = target.to_vec();
    for (&dim, &size) in dense.dims().iter().zip(dense.shape()) {
        if !combined.iter().any(|(d, _)| *d == dim) {
            combined.push((dim, size));
        }
    }
    let values = expand_to(dense.values(), dense.dims(), &combined)?;
    let inflated = variances * copies as f64;
    let variances = expand_to(&inflated, dense.dims(), &combined)?;

    let dims: Vec<Dim> = combined.iter().map(|&(dim, _)| dim).collect();
    let expanded = DenseArray::new(dims, values)?.with_variances(variances)?;
    let mut out = Quantity::from_dense(expanded);
    for (&label, coord) in data.coords() {
        out = out.with_coord(label, coord.clone())?;
    }
    for (name, mask) in data.masks() {
        out = out.with_mask(name.clone(), mask.clone())?;
    }
    Ok(out)
}
