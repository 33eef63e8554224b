//! Direct-beam efficiency curve resampling.

use ndarray::Array1;

use crate::diagnostics::Diagnostics;
use crate::domain::errors::{ReduceError, ReduceResult};
use crate::quantity::{Coord, CoordLabel, DenseArray, Dim, Quantity, midpoints, validate_edges};

/// Resample a measured direct-beam curve onto the reduction wavelength
/// grid.
///
/// The curve is evaluated by linear interpolation at the midpoints of
/// `wavelength_bins`, extrapolating from the outermost segments where the
/// grid reaches past the measurement. A curve whose wavelength coordinate
/// already equals `wavelength_bins` is returned unchanged, so resampling
/// is idempotent. Interpolated values have no meaningful variances; any
/// variances on the input are dropped with a warning.
pub fn resample_direct_beam(
    direct_beam: &Quantity,
    wavelength_bins: &[f64],
    diagnostics: &dyn Diagnostics,
) -> ReduceResult<Quantity> {
    validate_edges(Dim::Wavelength, wavelength_bins)?;
    let dense = direct_beam.as_dense("direct-beam resampling")?;
    if dense.dims().len() != 1 {
        return Err(ReduceError::CurveDims {
            found: dense.dims().len(),
        });
    }
    if dense.dims() != [Dim::Wavelength] {
        return Err(ReduceError::MissingDim {
            dim: Dim::Wavelength,
        });
    }

    let coord = direct_beam.coord(CoordLabel::Wavelength)?;
    if coord.dims() == [Dim::Wavelength] && coord.values().iter().eq(wavelength_bins.iter()) {
        return Ok(direct_beam.clone());
    }

    if dense.has_variances() {
        diagnostics.warn(
            "interpolating the direct-beam curve onto new wavelength bins; \
             its variances will be dropped",
        );
    }

    let sample_points = match direct_beam.coord_points(CoordLabel::Wavelength) {
        Ok(points) => points,
        Err(_) => midpoints(&direct_beam.coord_edges(CoordLabel::Wavelength)?),
    };
    if sample_points.len() < 2 {
        return Err(ReduceError::CurvePoints {
            found: sample_points.len(),
        });
    }
    if sample_points.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err(ReduceError::AxisNotIncreasing {
            dim: Dim::Wavelength,
        });
    }

    let values: Vec<f64> = dense.values().iter().copied().collect();
    let resampled: Vec<f64> = midpoints(wavelength_bins)
        .into_iter()
        .map(|wavelength| interpolate(&sample_points, &values, wavelength))
        .collect();
    let data = DenseArray::new(
        vec![Dim::Wavelength],
        Array1::from_vec(resampled).into_dyn(),
    )?;
    Quantity::from_dense(data).with_coord(
        CoordLabel::Wavelength,
        Coord::axis(Dim::Wavelength, wavelength_bins.to_vec()),
    )
}

/// Piecewise-linear evaluation at `target`, extending the first and last
/// segments beyond the sampled range.
fn interpolate(x: &[f64], y: &[f64], target: f64) -> f64 {
    let segment = match x.partition_point(|&point| point <= target) {
        0 => 0,
        upper => (upper - 1).min(x.len() - 2),
    };
    let slope = (y[segment + 1] - y[segment]) / (x[segment + 1] - x[segment]);
    y[segment] + slope * (target - x[segment])
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use crate::diagnostics::CollectingDiagnostics;
    use crate::quantity::{Coord, CoordLabel, DenseArray, Dim, Quantity};

    use super::resample_direct_beam;

    fn curve(values: &[f64], wavelengths: &[f64], variances: Option<&[f64]>) -> Quantity {
        let mut data = DenseArray::new(vec![Dim::Wavelength], arr1(values).into_dyn()).unwrap();
        if let Some(variances) = variances {
            data = data.with_variances(arr1(variances).into_dyn()).unwrap();
        }
        Quantity::from_dense(data)
            .with_coord(
                CoordLabel::Wavelength,
                Coord::axis(Dim::Wavelength, wavelengths.to_vec()),
            )
            .unwrap()
    }

    #[test]
    fn interpolates_at_target_bin_midpoints() {
        let direct_beam = curve(&[1.0, 3.0], &[0.0, 2.0], None);
        let diagnostics = CollectingDiagnostics::new();
        let resampled =
            resample_direct_beam(&direct_beam, &[0.0, 1.0, 2.0], &diagnostics).unwrap();
        let dense = resampled.as_dense("test").unwrap();
        assert_eq!(dense.values(), &arr1(&[1.5, 2.5]).into_dyn());
        assert_eq!(
            resampled.coord_edges(CoordLabel::Wavelength).unwrap(),
            vec![0.0, 1.0, 2.0]
        );
        assert!(diagnostics.messages().is_empty());
    }

    #[test]
    fn extrapolates_from_the_outermost_segments() {
        let direct_beam = curve(&[1.0, 3.0], &[0.0, 2.0], None);
        let diagnostics = CollectingDiagnostics::new();
        let resampled =
            resample_direct_beam(&direct_beam, &[-2.0, -1.0, 3.0, 5.0], &diagnostics).unwrap();
        let dense = resampled.as_dense("test").unwrap();
        assert_eq!(dense.values(), &arr1(&[-0.5, 2.0, 5.0]).into_dyn());
    }

    #[test]
    fn edge_coordinates_sample_the_curve_at_their_midpoints() {
        // Values sampled at the midpoints 1 and 3 of the input bins.
        let direct_beam = curve(&[1.0, 3.0], &[0.0, 2.0, 4.0], None);
        let diagnostics = CollectingDiagnostics::new();
        let resampled =
            resample_direct_beam(&direct_beam, &[1.0, 3.0], &diagnostics).unwrap();
        let dense = resampled.as_dense("test").unwrap();
        assert_eq!(dense.values(), &arr1(&[2.0]).into_dyn());
    }

    #[test]
    fn matching_wavelength_grid_returns_the_curve_unchanged() {
        let direct_beam = curve(&[1.0, 3.0], &[0.0, 1.0, 2.0], Some(&[0.1, 0.1]));
        let diagnostics = CollectingDiagnostics::new();
        let resampled =
            resample_direct_beam(&direct_beam, &[0.0, 1.0, 2.0], &diagnostics).unwrap();
        assert_eq!(resampled, direct_beam);
        assert!(resampled.has_variances());
        assert!(diagnostics.messages().is_empty());
    }

    #[test]
    fn resampling_twice_is_idempotent_and_warns_once() {
        let direct_beam = curve(&[1.0, 2.0, 4.0], &[0.0, 1.5, 3.0], Some(&[0.1; 3]));
        let diagnostics = CollectingDiagnostics::new();
        let first =
            resample_direct_beam(&direct_beam, &[0.0, 1.0, 2.0, 3.0], &diagnostics).unwrap();
        let second = resample_direct_beam(&first, &[0.0, 1.0, 2.0, 3.0], &diagnostics).unwrap();
        assert_eq!(second, first);
        assert!(!first.has_variances());
        assert_eq!(diagnostics.messages().len(), 1);
        assert!(diagnostics.messages()[0].contains("variances"));
    }
}
