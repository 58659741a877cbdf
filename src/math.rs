use nalgebra as na;
use num_traits::Float;

/// Least-squares polynomial fit of `degree`, coefficients in ascending order
/// (`c[0] + c[1]·x + c[2]·x² ...`). Solves the Vandermonde system through QR
/// instead of the normal equations.
pub fn poly_ls<T>(x: &[T], y: &[T], degree: usize) -> Option<na::DVector<T>>
where
    T: na::RealField + Float,
{
    let ncoef = degree + 1;

    if x.len() != y.len() || x.len() < ncoef {
        return None;
    }

    let a = na::DMatrix::from_fn(x.len(), ncoef, |i, j| Float::powi(x[i], j as i32));
    let b = na::DVector::from_column_slice(y);

    let qr = a.qr();
    let qty = qr.q().transpose() * b;
    let r = qr.r();

    let eps = <T as num_traits::NumCast>::from(1e-12)?;
    if r.diagonal().iter().any(|d| Float::abs(*d) < eps) {
        return None;
    }

    r.solve_upper_triangular(&qty)
}

/// `[intercept, slope]`
pub fn linear_ls<T: na::RealField + Float>(x: &[T], y: &[T]) -> Option<na::Vector2<T>> {
    let c = poly_ls(x, y, 1)?;

    Some(na::Vector2::new(c[0], c[1]))
}

/// `[c0, c1, c2]` of `c0 + c1·x + c2·x²`
pub fn quadratic_ls<T: na::RealField + Float>(x: &[T], y: &[T]) -> Option<na::Vector3<T>> {
    let c = poly_ls(x, y, 2)?;

    Some(na::Vector3::new(c[0], c[1], c[2]))
}

pub fn rmse<T: Float>(observed: &[T], predicted: &[T]) -> T {
    mean(observed.iter().zip(predicted).map(|(&o, &p)| (o - p) * (o - p))).sqrt()
}

pub fn mae<T: Float>(observed: &[T], predicted: &[T]) -> T {
    mean(observed.iter().zip(predicted).map(|(&o, &p)| (o - p).abs()))
}

/// Coefficient of determination, 0 when the observations have no variance
pub fn r_squared<T: Float>(observed: &[T], predicted: &[T]) -> T {
    // the mean of identical values can round away from them, check directly
    if observed.windows(2).all(|w| w[0] == w[1]) {
        return T::zero();
    }

    let m = mean(observed.iter().copied());

    let ss_tot = observed
        .iter()
        .fold(T::zero(), |acc, &o| acc + (o - m) * (o - m));
    let ss_res = observed
        .iter()
        .zip(predicted)
        .fold(T::zero(), |acc, (&o, &p)| acc + (o - p) * (o - p));

    if ss_tot == T::zero() {
        return T::zero();
    }

    T::one() - ss_res / ss_tot
}

fn mean<T: Float, I: Iterator<Item = T>>(iter: I) -> T {
    let (sum, n) = iter.fold((T::zero(), T::zero()), |(s, n), v| (s + v, n + T::one()));

    if n == T::zero() {
        T::zero()
    } else {
        sum / n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_recovers_line() {
        let x: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|x| 3.0 - 2.0 * x).collect();

        let c = linear_ls(&x, &y).unwrap();
        assert!((c[0] - 3.0).abs() < 1e-10);
        assert!((c[1] + 2.0).abs() < 1e-10);
    }

    #[test]
    fn quadratic_recovers_parabola() {
        let x: Vec<f64> = (0..25).map(|i| i as f64 / 24.0).collect();
        let y: Vec<f64> = x.iter().map(|x| 1.0 + 0.5 * x - 4.905 * x * x).collect();

        let c = quadratic_ls(&x, &y).unwrap();
        assert!((c[0] - 1.0).abs() < 1e-9);
        assert!((c[1] - 0.5).abs() < 1e-9);
        assert!((c[2] + 4.905).abs() < 1e-9);
    }

    #[test]
    fn underdetermined_or_degenerate_input_fails() {
        assert!(quadratic_ls(&[0.0, 1.0], &[0.0, 1.0]).is_none());
        assert!(linear_ls(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(linear_ls(&[1.0, 2.0], &[1.0]).is_none());
    }

    #[test]
    fn metrics_on_known_residuals() {
        let obs = [1.0, 2.0, 3.0, 4.0];
        let pred = [1.0, 2.0, 3.0, 6.0];

        assert!((rmse(&obs, &pred) - 1.0).abs() < 1e-12);
        assert!((mae(&obs, &pred) - 0.5).abs() < 1e-12);
        // ss_tot = 5, ss_res = 4
        assert!((r_squared(&obs, &pred) - 0.2).abs() < 1e-12);
        assert_eq!(r_squared(&obs, &obs), 1.0);
    }

    #[test]
    fn r_squared_of_constant_series_is_zero() {
        let obs = [2.5; 6];
        let pred = [2.4, 2.5, 2.6, 2.5, 2.5, 2.5];

        let r2 = r_squared(&obs, &pred);
        assert_eq!(r2, 0.0);
        assert!(!r2.is_nan());
    }
}
