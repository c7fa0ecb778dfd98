//! Linear system solvers.
//!
//! The engine factorizes each frequency's system matrix once and solves for
//! every source at that frequency with a single multi-column solve.
//! Transposed systems are solved by factorizing `Aᵀ`.

use nalgebra::{DMatrix, DVector, Dyn, LU};
use nalgebra_sparse::CscMatrix;

use emsim_core::sparse;

use crate::C64;
use crate::error::{Error, Result};

/// A factorized square system ready for repeated solves.
pub trait Factorization: Send + Sync {
    /// Dimension of the factorized system.
    fn dim(&self) -> usize;

    /// Solve `A X = B` for every column of `B`.
    fn solve(&self, b: &DMatrix<C64>) -> Result<DMatrix<C64>>;

    /// Solve `A x = b`.
    fn solve_vector(&self, b: &DVector<C64>) -> Result<DVector<C64>> {
        let x = self.solve(&DMatrix::from_column_slice(b.len(), 1, b.as_slice()))?;
        Ok(x.column(0).into_owned())
    }
}

/// A strategy for factorizing complex sparse systems.
pub trait LinearSolver: Send + Sync + std::fmt::Debug {
    fn factorize(&self, a: &CscMatrix<C64>) -> Result<Box<dyn Factorization>>;
}

/// Dense LU with partial pivoting.
///
/// Suitable for the small meshes used in tests and sensitivity checks; the
/// matrix is densified before factorization.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseLu;

struct DenseLuFactorization {
    lu: LU<C64, Dyn, Dyn>,
    dim: usize,
}

impl LinearSolver for DenseLu {
    fn factorize(&self, a: &CscMatrix<C64>) -> Result<Box<dyn Factorization>> {
        if a.nrows() != a.ncols() {
            return Err(Error::DimensionMismatch {
                expected: a.nrows(),
                actual: a.ncols(),
            });
        }
        let lu = sparse::to_dense(a).lu();
        if !lu.is_invertible() {
            return Err(Error::SingularMatrix { frequency: None });
        }
        Ok(Box::new(DenseLuFactorization {
            lu,
            dim: a.nrows(),
        }))
    }
}

impl Factorization for DenseLuFactorization {
    fn dim(&self) -> usize {
        self.dim
    }

    fn solve(&self, b: &DMatrix<C64>) -> Result<DMatrix<C64>> {
        let n = self.dim();
        if b.nrows() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: b.nrows(),
            });
        }
        let x = self
            .lu
            .solve(b)
            .ok_or(Error::SingularMatrix { frequency: None })?;
        if x.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
            return Err(Error::SingularMatrix { frequency: None });
        }
        Ok(x)
    }
}

/// Solve a complex linear system Ax = b with a one-off dense LU.
pub fn solve_complex(a: &CscMatrix<C64>, b: &DVector<C64>) -> Result<DVector<C64>> {
    if a.nrows() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.nrows(),
            actual: b.len(),
        });
    }
    DenseLu.factorize(a)?.solve_vector(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;
    use nalgebra_sparse::CooMatrix;

    fn complex_csc(n: usize, entries: &[(usize, usize, C64)]) -> CscMatrix<C64> {
        let mut coo = CooMatrix::new(n, n);
        for &(i, j, v) in entries {
            coo.push(i, j, v);
        }
        CscMatrix::from(&coo)
    }

    #[test]
    fn test_solve_complex_simple() {
        // (1+i) x = 2  =>  x = 1 - i
        let a = complex_csc(1, &[(0, 0, C64::new(1.0, 1.0))]);
        let x = solve_complex(&a, &dvector![C64::new(2.0, 0.0)]).unwrap();
        assert!((x[0] - C64::new(1.0, -1.0)).norm() < 1e-14);
    }

    #[test]
    fn test_multiple_right_hand_sides() {
        let a = complex_csc(
            2,
            &[
                (0, 0, C64::new(2.0, 0.0)),
                (0, 1, C64::new(1.0, 0.0)),
                (1, 0, C64::new(1.0, 0.0)),
                (1, 1, C64::new(3.0, 1.0)),
            ],
        );
        let factor = DenseLu.factorize(&a).unwrap();
        assert_eq!(factor.dim(), 2);

        let b = DMatrix::from_fn(2, 3, |i, j| C64::new((i + j) as f64, j as f64));
        let x = factor.solve(&b).unwrap();
        let residual = sparse::to_dense(&a) * &x - &b;
        assert!(residual.norm() < 1e-13);
    }

    #[test]
    fn test_singular_matrix() {
        let a = complex_csc(
            2,
            &[
                (0, 0, C64::new(1.0, 0.0)),
                (0, 1, C64::new(2.0, 0.0)),
                (1, 0, C64::new(2.0, 0.0)),
                (1, 1, C64::new(4.0, 0.0)),
            ],
        );
        let result = DenseLu.factorize(&a);
        assert!(matches!(result, Err(Error::SingularMatrix { .. })));
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = complex_csc(2, &[(0, 0, C64::new(1.0, 0.0)), (1, 1, C64::new(1.0, 0.0))]);
        let result = solve_complex(&a, &dvector![C64::new(1.0, 0.0)]);
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }
}
