//! Numerical checks for derivative and adjoint implementations.
//!
//! [`check_derivative`] is a Taylor test: for a differentiable `f` and a
//! claimed directional derivative `J dx`,
//!
//! ```text
//! ‖f(x + h dx) - f(x)‖          = O(h)
//! ‖f(x + h dx) - f(x) - h J dx‖ = O(h²)
//! ```
//!
//! so halving `h` should divide the second error by four. The adjoint helpers
//! compare `wᵀ (J v)` with `(Jᵀ w)ᵀ v`.

use nalgebra::DVector;

use crate::C64;
use crate::error::{Error, Result};

/// Settings of a Taylor test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaylorOptions {
    /// Number of step sizes tried.
    pub n_steps: usize,
    /// First step size; each following one is half the previous.
    pub initial_step: f64,
    /// Expected convergence order of the first-order error.
    pub expected_order: f64,
    /// Accepted shortfall below `expected_order`.
    pub tolerance: f64,
    /// Relative error below which the linearization counts as exact.
    pub floor: f64,
}

impl Default for TaylorOptions {
    fn default() -> Self {
        Self {
            n_steps: 6,
            initial_step: 0.1,
            expected_order: 2.0,
            tolerance: 0.5,
            floor: 1e-9,
        }
    }
}

impl TaylorOptions {
    pub fn with_initial_step(mut self, h: f64) -> Self {
        self.initial_step = h;
        self
    }

    pub fn with_steps(mut self, n: usize) -> Self {
        self.n_steps = n;
        self
    }
}

/// Outcome of a Taylor test.
#[derive(Debug, Clone)]
pub struct DerivativeCheck {
    pub steps: Vec<f64>,
    /// `‖f(x + h dx) - f(x)‖`.
    pub zeroth_order: Vec<f64>,
    /// `‖f(x + h dx) - f(x) - h J dx‖`.
    pub first_order: Vec<f64>,
    /// `log₂` ratio of consecutive first-order errors.
    pub orders: Vec<f64>,
    pub passed: bool,
}

/// Taylor test of `jdx` as the derivative of `f` at `x0` along `dx`.
///
/// Passes when at least half of the observed orders reach
/// `expected_order - tolerance`, or when every first-order error is at the
/// relative `floor` (a linear `f`).
pub fn check_derivative<F>(
    f: F,
    x0: &DVector<f64>,
    dx: &DVector<f64>,
    jdx: &DVector<f64>,
    options: &TaylorOptions,
) -> Result<DerivativeCheck>
where
    F: Fn(&DVector<f64>) -> Result<DVector<f64>>,
{
    if dx.len() != x0.len() {
        return Err(Error::DimensionMismatch {
            expected: x0.len(),
            actual: dx.len(),
        });
    }
    if options.n_steps < 2 {
        return Err(Error::InvalidArgument(
            "a Taylor test needs at least two step sizes".to_string(),
        ));
    }
    let f0 = f(x0)?;
    if jdx.len() != f0.len() {
        return Err(Error::DimensionMismatch {
            expected: f0.len(),
            actual: jdx.len(),
        });
    }

    let mut steps = Vec::with_capacity(options.n_steps);
    let mut zeroth_order = Vec::with_capacity(options.n_steps);
    let mut first_order = Vec::with_capacity(options.n_steps);
    let mut h = options.initial_step;
    for _ in 0..options.n_steps {
        let fh = f(&(x0 + dx * h))?;
        if fh.len() != f0.len() {
            return Err(Error::DimensionMismatch {
                expected: f0.len(),
                actual: fh.len(),
            });
        }
        let diff = fh - &f0;
        let e1 = (&diff - jdx * h).norm();
        log::debug!("taylor h={:.3e} e0={:.3e} e1={:.3e}", h, diff.norm(), e1);
        steps.push(h);
        zeroth_order.push(diff.norm());
        first_order.push(e1);
        h *= 0.5;
    }

    let orders: Vec<f64> = first_order
        .windows(2)
        .map(|pair| (pair[0] / pair[1]).log2())
        .collect();
    let target = options.expected_order - options.tolerance;
    let good = orders.iter().filter(|o| **o >= target).count();
    let scale = f0.norm().max(jdx.norm()).max(f64::MIN_POSITIVE);
    let at_floor = first_order.iter().all(|e| *e <= options.floor * scale);

    Ok(DerivativeCheck {
        steps,
        zeroth_order,
        first_order,
        passed: 2 * good >= orders.len() || at_floor,
        orders,
    })
}

/// `|a - b| / max(|a|, |b|)`, zero when both vanish.
pub fn relative_error(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 { 0.0 } else { (a - b).abs() / scale }
}

/// Relative mismatch of `wᵀ (J v)` and `(Jᵀ w)ᵀ v` for real operators.
pub fn adjoint_identity(
    w: &DVector<f64>,
    jv: &DVector<f64>,
    v: &DVector<f64>,
    jtw: &DVector<f64>,
) -> Result<f64> {
    check_pair(w.len(), jv.len())?;
    check_pair(v.len(), jtw.len())?;
    Ok(relative_error(w.dot(jv), jtw.dot(v)))
}

/// Complex counterpart of [`adjoint_identity`] under the plain bilinear
/// product `xᵀ y` (no conjugation).
pub fn adjoint_identity_complex(
    w: &DVector<C64>,
    jv: &DVector<C64>,
    v: &DVector<C64>,
    jtw: &DVector<C64>,
) -> Result<f64> {
    check_pair(w.len(), jv.len())?;
    check_pair(v.len(), jtw.len())?;
    let lhs = w.dot(jv);
    let rhs = jtw.dot(v);
    let scale = lhs.norm().max(rhs.norm());
    Ok(if scale == 0.0 { 0.0 } else { (lhs - rhs).norm() / scale })
}

fn check_pair(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::DimensionMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, dvector};

    fn cubic(x: &DVector<f64>) -> Result<DVector<f64>> {
        Ok(x.map(|v| v * v * v + v.sin()))
    }

    #[test]
    fn test_correct_derivative_passes() {
        let x0 = dvector![0.3, -1.2, 2.0];
        let dx = dvector![1.0, 0.5, -0.25];
        let jdx = x0.zip_map(&dx, |x: f64, d| (3.0 * x * x + x.cos()) * d);
        let check = check_derivative(cubic, &x0, &dx, &jdx, &TaylorOptions::default()).unwrap();
        assert!(check.passed, "orders {:?}", check.orders);
        assert_eq!(check.orders.len(), 5);
        assert!(check.orders.iter().all(|o| (o - 2.0).abs() < 0.3));
    }

    #[test]
    fn test_wrong_derivative_fails() {
        let x0 = dvector![0.3, -1.2, 2.0];
        let dx = dvector![1.0, 0.5, -0.25];
        let jdx = x0.zip_map(&dx, |x, d| 3.0 * x * x * d);
        let check = check_derivative(cubic, &x0, &dx, &jdx, &TaylorOptions::default()).unwrap();
        assert!(!check.passed, "orders {:?}", check.orders);
    }

    #[test]
    fn test_linear_map_is_at_floor() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, -3.0, 0.5]);
        let f = |x: &DVector<f64>| -> Result<DVector<f64>> { Ok(&a * x) };
        let x0 = dvector![1.0, 1.0];
        let dx = dvector![0.2, -0.7];
        let check = check_derivative(f, &x0, &dx, &(&a * &dx), &TaylorOptions::default()).unwrap();
        assert!(check.passed);
    }

    #[test]
    fn test_dimension_errors() {
        let x0 = dvector![1.0, 2.0];
        assert!(matches!(
            check_derivative(cubic, &x0, &dvector![1.0], &x0, &TaylorOptions::default()),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(matches!(
            check_derivative(cubic, &x0, &x0, &dvector![1.0], &TaylorOptions::default()),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_adjoint_identity() {
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 2.0, -1.0, 3.0, 0.5]);
        let v = dvector![0.1, 0.2, 0.3];
        let w = dvector![1.0, -2.0];
        let err = adjoint_identity(&w, &(&a * &v), &v, &(a.transpose() * &w)).unwrap();
        assert!(err < 1e-15);
        let bad = adjoint_identity(&w, &(&a * &v), &v, &(a.transpose() * &w * 1.1)).unwrap();
        assert!(bad > 0.05);
        assert_eq!(relative_error(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_complex_identity_is_bilinear() {
        let a = DMatrix::from_row_slice(
            2,
            2,
            &[
                C64::new(1.0, 1.0),
                C64::new(0.0, 2.0),
                C64::new(-1.0, 0.0),
                C64::new(0.5, -0.5),
            ],
        );
        let v = dvector![C64::new(1.0, -1.0), C64::new(0.0, 0.5)];
        let w = dvector![C64::new(0.3, 0.0), C64::new(2.0, 1.0)];
        let plain = adjoint_identity_complex(&w, &(&a * &v), &v, &(a.transpose() * &w)).unwrap();
        assert!(plain < 1e-14);
        let conjugated = adjoint_identity_complex(&w, &(&a * &v), &v, &(a.adjoint() * &w)).unwrap();
        assert!(conjugated > 1e-3);
    }
}
