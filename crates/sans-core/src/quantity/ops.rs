//! Elementwise arithmetic between dense quantities: broadcasting over
//! dimension labels, first-order variance propagation, and merging of
//! coordinates and masks.
//!
//! An operand carrying variances must never be stretched by broadcasting;
//! stretching would make one measured value appear as many independent
//! ones and its uncertainty would be counted multiple times. Callers that
//! accept that (or want the variances dropped instead) pre-process the
//! operand with [`super::uncertainty::broadcast_uncertainties`].

use ndarray::{ArrayD, Axis, IxDyn, Zip};

use crate::domain::errors::{ReduceError, ReduceResult};

use super::dense::DenseArray;
use super::dims::Dim;
use super::{Mask, Quantity};

pub fn add(lhs: &Quantity, rhs: &Quantity) -> ReduceResult<Quantity> {
    binary_op(lhs, rhs, BinaryOp::Add)
}

pub fn sub(lhs: &Quantity, rhs: &Quantity) -> ReduceResult<Quantity> {
    binary_op(lhs, rhs, BinaryOp::Sub)
}

pub fn mul(lhs: &Quantity, rhs: &Quantity) -> ReduceResult<Quantity> {
    binary_op(lhs, rhs, BinaryOp::Mul)
}

pub fn div(lhs: &Quantity, rhs: &Quantity) -> ReduceResult<Quantity> {
    binary_op(lhs, rhs, BinaryOp::Div)
}

#[derive(Clone, Copy)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

fn binary_op(lhs: &Quantity, rhs: &Quantity, op: BinaryOp) -> ReduceResult<Quantity> {
    let left = lhs.as_dense("arithmetic")?;
    let right = rhs.as_dense("arithmetic")?;

    let target = union_sizes(left, right)?;
    ensure_no_variance_broadcast(left, &target)?;
    ensure_no_variance_broadcast(right, &target)?;

    let left_values = expand_to(left.values(), left.dims(), &target)?;
    let right_values = expand_to(right.values(), right.dims(), &target)?;
    let left_variances = left
        .variances()
        .map(|v| expand_to(v, left.dims(), &target))
        .transpose()?;
    let right_variances = right
        .variances()
        .map(|v| expand_to(v, right.dims(), &target))
        .transpose()?;

    let values = apply(op, &left_values, &right_values);
    let variances = combine_variances(
        op,
        &left_values,
        &right_values,
        left_variances.as_ref(),
        right_variances.as_ref(),
    );

    let dims: Vec<Dim> = target.iter().map(|&(dim, _)| dim).collect();
    let mut data = DenseArray::new(dims, values)?;
    if let Some(variances) = variances {
        data = data.with_variances(variances)?;
    }

    let mut out = Quantity::from_dense(data);
    for (&label, coord) in lhs.coords() {
        if let Some(other) = rhs.get_coord(label) {
            if other != coord {
                return Err(ReduceError::CoordMismatch { coord: label });
            }
        }
        out = out.with_coord(label, coord.clone())?;
    }
    for (&label, coord) in rhs.coords() {
        if lhs.get_coord(label).is_none() {
            out = out.with_coord(label, coord.clone())?;
        }
    }
    for (name, mask) in lhs.masks() {
        let merged = match rhs.masks().get(name) {
            Some(other) if other != mask => or_masks(mask, other, &target)?,
            _ => mask.clone(),
        };
        out = out.with_mask(name.clone(), merged)?;
    }
    for (name, mask) in rhs.masks() {
        if !lhs.masks().contains_key(name) {
            out = out.with_mask(name.clone(), mask.clone())?;
        }
    }
    Ok(out)
}

/// Result dimensions: left-hand dims in order, then right-hand extras.
/// Along a shared dim the sizes must match, or one side must have length 1.
fn union_sizes(left: &DenseArray, right: &DenseArray) -> ReduceResult<Vec<(Dim, usize)>> {
    let mut target: Vec<(Dim, usize)> = left
        .dims()
        .iter()
        .copied()
        .zip(left.shape().iter().copied())
        .collect();
    for (&dim, &size) in right.dims().iter().zip(right.shape()) {
        match target.iter_mut().find(|(d, _)| *d == dim) {
            Some((_, existing)) => {
                if *existing == size || size == 1 {
                    continue;
                }
                if *existing == 1 {
                    *existing = size;
                } else {
                    return Err(ReduceError::SizeMismatch {
                        dim,
                        left: *existing,
                        right: size,
                    });
                }
            }
            None => target.push((dim, size)),
        }
    }
    Ok(target)
}

fn ensure_no_variance_broadcast(
    data: &DenseArray,
    target: &[(Dim, usize)],
) -> ReduceResult<()> {
    if !data.has_variances() {
        return Ok(());
    }
    for &(dim, size) in target {
        if size <= 1 {
            continue;
        }
        match data.size(dim) {
            Some(own) if own == size => {}
            Some(1) | None => return Err(ReduceError::VarianceBroadcast { dim }),
            Some(_) => {}
        }
    }
    Ok(())
}

/// Materialize `values` (laid out along `from_dims`) to the full target
/// shape: reorder the axes it has, insert the ones it lacks, broadcast.
pub(crate) fn expand_to<T: Clone>(
    values: &ArrayD<T>,
    from_dims: &[Dim],
    target: &[(Dim, usize)],
) -> ReduceResult<ArrayD<T>> {
    for dim in from_dims {
        if !target.iter().any(|(d, _)| d == dim) {
            return Err(ReduceError::MissingDim { dim: *dim });
        }
    }
    let mut permutation = Vec::with_capacity(from_dims.len());
    for (dim, _) in target {
        if let Some(axis) = from_dims.iter().position(|d| d == dim) {
            permutation.push(axis);
        }
    }
    let mut expanded = values.clone().permuted_axes(IxDyn(&permutation));
    for (axis, (dim, _)) in target.iter().enumerate() {
        if !from_dims.contains(dim) {
            expanded = expanded.insert_axis(Axis(axis));
        }
    }
    let shape: Vec<usize> = target.iter().map(|&(_, size)| size).collect();
    let own_shape = expanded.shape().to_vec();
    if let Some(view) = expanded.broadcast(IxDyn(&shape)) {
        return Ok(view.to_owned());
    }
    for (&(dim, size), &own) in target.iter().zip(&own_shape) {
        if own != 1 && own != size {
            return Err(ReduceError::SizeMismatch {
                dim,
                left: size,
                right: own,
            });
        }
    }
    Err(ReduceError::RankMismatch {
        dims: target.len(),
        axes: own_shape.len(),
    })
}

fn apply(op: BinaryOp, a: &ArrayD<f64>, b: &ArrayD<f64>) -> ArrayD<f64> {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
    }
}

/// First-order propagation; an operand without variances is treated as
/// exact.
fn combine_variances(
    op: BinaryOp,
    a: &ArrayD<f64>,
    b: &ArrayD<f64>,
    va: Option<&ArrayD<f64>>,
    vb: Option<&ArrayD<f64>>,
) -> Option<ArrayD<f64>> {
    if va.is_none() && vb.is_none() {
        return None;
    }
    let mut out = ArrayD::zeros(a.raw_dim());
    match op {
        BinaryOp::Add | BinaryOp::Sub => {
            if let Some(va) = va {
                out += va;
            }
            if let Some(vb) = vb {
                out += vb;
            }
        }
        BinaryOp::Mul => {
            if let Some(va) = va {
                out = out + va * &(b * b);
            }
            if let Some(vb) = vb {
                out = out + vb * &(a * a);
            }
        }
        BinaryOp::Div => {
            let b_squared = b * b;
            if let Some(va) = va {
                out = out + va / &b_squared;
            }
            if let Some(vb) = vb {
                out = out + vb * &(a * a) / &(&b_squared * &b_squared);
            }
        }
    }
    Some(out)
}

fn or_masks(a: &Mask, b: &Mask, target: &[(Dim, usize)]) -> ReduceResult<Mask> {
    let spanned: Vec<(Dim, usize)> = target
        .iter()
        .filter(|(dim, _)| a.dims().contains(dim) || b.dims().contains(dim))
        .copied()
        .collect();
    let left = expand_to(a.values(), a.dims(), &spanned)?;
    let right = expand_to(b.values(), b.dims(), &spanned)?;
    let values = Zip::from(&left)
        .and(&right)
        .map_collect(|&x, &y| x || y);
    Mask::new(spanned.iter().map(|&(dim, _)| dim).collect(), values)
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr2};

    use crate::domain::errors::ReduceError;
    use crate::quantity::{Coord, CoordLabel, DenseArray, Dim, Quantity};

    use super::{add, div, mul, sub};

    fn plain(dim: Dim, values: &[f64]) -> Quantity {
        Quantity::from_dense(DenseArray::new(vec![dim], arr1(values).into_dyn()).unwrap())
    }

    fn with_variances(dim: Dim, values: &[f64], variances: &[f64]) -> Quantity {
        Quantity::from_dense(
            DenseArray::new(vec![dim], arr1(values).into_dyn())
                .unwrap()
                .with_variances(arr1(variances).into_dyn())
                .unwrap(),
        )
    }

    #[test]
    fn add_broadcasts_over_disjoint_dims() {
        let pixels = plain(Dim::Pixel, &[10.0, 20.0]);
        let wavelengths = plain(Dim::Wavelength, &[1.0, 2.0, 3.0]);
        let sum = add(&pixels, &wavelengths).unwrap();
        assert_eq!(sum.dims(), &[Dim::Pixel, Dim::Wavelength]);
        let dense = sum.as_dense("test").unwrap();
        assert_eq!(
            dense.values(),
            &arr2(&[[11.0, 12.0, 13.0], [21.0, 22.0, 23.0]]).into_dyn()
        );
    }

    #[test]
    fn sub_propagates_both_variances() {
        let a = with_variances(Dim::Wavelength, &[10.0, 20.0], &[4.0, 9.0]);
        let b = with_variances(Dim::Wavelength, &[1.0, 2.0], &[1.0, 1.0]);
        let difference = sub(&a, &b).unwrap();
        let dense = difference.as_dense("test").unwrap();
        assert_eq!(dense.values(), &arr1(&[9.0, 18.0]).into_dyn());
        assert_eq!(dense.variances().unwrap(), &arr1(&[5.0, 10.0]).into_dyn());
    }

    #[test]
    fn mul_and_div_follow_first_order_propagation() {
        let a = with_variances(Dim::Wavelength, &[2.0], &[1.0]);
        let b = with_variances(Dim::Wavelength, &[3.0], &[4.0]);
        let product = mul(&a, &b).unwrap();
        let dense = product.as_dense("test").unwrap();
        assert_eq!(dense.values(), &arr1(&[6.0]).into_dyn());
        // var = va * b^2 + vb * a^2
        assert_eq!(dense.variances().unwrap(), &arr1(&[25.0]).into_dyn());

        let c = with_variances(Dim::Wavelength, &[4.0], &[4.0]);
        let ratio = div(&a, &c).unwrap();
        let dense = ratio.as_dense("test").unwrap();
        assert_eq!(dense.values(), &arr1(&[0.5]).into_dyn());
        // var = va / b^2 + vb * a^2 / b^4
        assert_eq!(dense.variances().unwrap(), &arr1(&[0.125]).into_dyn());
    }

    #[test]
    fn one_sided_variances_treat_the_other_operand_as_exact() {
        let a = with_variances(Dim::Wavelength, &[2.0, 3.0], &[1.0, 1.0]);
        let b = plain(Dim::Wavelength, &[10.0, 10.0]);
        let product = mul(&a, &b).unwrap();
        let dense = product.as_dense("test").unwrap();
        assert_eq!(dense.variances().unwrap(), &arr1(&[100.0, 100.0]).into_dyn());
    }

    #[test]
    fn stretching_an_operand_with_variances_is_refused() {
        let scalar = Quantity::from_dense(
            DenseArray::scalar(5.0)
                .with_variances(ndarray::arr0(1.0).into_dyn())
                .unwrap(),
        );
        let vector = plain(Dim::Wavelength, &[1.0, 2.0, 3.0]);
        assert_eq!(
            add(&vector, &scalar).unwrap_err(),
            ReduceError::VarianceBroadcast {
                dim: Dim::Wavelength
            }
        );
        // Without variances the same stretch is fine.
        let exact = Quantity::from_dense(DenseArray::scalar(5.0));
        let shifted = add(&vector, &exact).unwrap();
        let dense = shifted.as_dense("test").unwrap();
        assert_eq!(dense.values(), &arr1(&[6.0, 7.0, 8.0]).into_dyn());
    }

    #[test]
    fn shared_coords_must_agree_and_the_union_is_kept() {
        let edges = Coord::axis(Dim::Wavelength, vec![0.0, 1.0, 2.0]);
        let a = plain(Dim::Wavelength, &[1.0, 2.0])
            .with_coord(CoordLabel::Wavelength, edges.clone())
            .unwrap();
        let b = plain(Dim::Wavelength, &[3.0, 4.0])
            .with_coord(CoordLabel::Wavelength, edges)
            .unwrap();
        let sum = add(&a, &b).unwrap();
        assert!(sum.get_coord(CoordLabel::Wavelength).is_some());

        let other = plain(Dim::Wavelength, &[3.0, 4.0])
            .with_coord(
                CoordLabel::Wavelength,
                Coord::axis(Dim::Wavelength, vec![0.0, 5.0, 9.0]),
            )
            .unwrap();
        assert_eq!(
            add(&a, &other).unwrap_err(),
            ReduceError::CoordMismatch {
                coord: CoordLabel::Wavelength
            }
        );
    }

    #[test]
    fn size_mismatch_along_a_shared_dim_is_an_error() {
        let a = plain(Dim::Wavelength, &[1.0, 2.0]);
        let b = plain(Dim::Wavelength, &[1.0, 2.0, 3.0]);
        assert_eq!(
            add(&a, &b).unwrap_err(),
            ReduceError::SizeMismatch {
                dim: Dim::Wavelength,
                left: 2,
                right: 3,
            }
        );
    }
}
