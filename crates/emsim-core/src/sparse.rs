//! Sparse matrix helpers.
//!
//! Discrete operators (curl, averaging, mass matrices, projections) are real
//! `CscMatrix<f64>`, while fields are complex. These helpers apply real
//! operators to real or complex vectors without promoting the operator.

use std::ops::{AddAssign, Mul};

use nalgebra::{DMatrix, DVector, Scalar};
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_traits::Zero;

use crate::C64;

/// Build a sparse matrix from `(row, col, value)` triplets.
///
/// Duplicate entries are summed.
pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> CscMatrix<f64> {
    let mut coo = CooMatrix::new(nrows, ncols);
    for &(i, j, v) in triplets {
        coo.push(i, j, v);
    }
    CscMatrix::from(&coo)
}

/// Square diagonal matrix with `d` on the diagonal.
pub fn diag(d: &DVector<f64>) -> CscMatrix<f64> {
    let n = d.len();
    let mut coo = CooMatrix::new(n, n);
    for (i, &v) in d.iter().enumerate() {
        coo.push(i, i, v);
    }
    CscMatrix::from(&coo)
}

/// Identity matrix of size `n`.
pub fn identity(n: usize) -> CscMatrix<f64> {
    diag(&DVector::from_element(n, 1.0))
}

/// The diagonal of a square sparse matrix.
pub fn diagonal(a: &CscMatrix<f64>) -> DVector<f64> {
    let n = a.nrows().min(a.ncols());
    let mut d = DVector::zeros(n);
    for (i, j, v) in a.triplet_iter() {
        if i == j {
            d[i] += *v;
        }
    }
    d
}

/// y = A * x for a real sparse `A` and a real or complex `x`.
pub fn spmv<T>(a: &CscMatrix<f64>, x: &DVector<T>) -> DVector<T>
where
    T: Scalar + Zero + AddAssign + Mul<f64, Output = T> + Copy,
{
    assert_eq!(a.ncols(), x.len(), "spmv dimension mismatch");
    let mut y = DVector::from_element(a.nrows(), T::zero());
    for (i, j, v) in a.triplet_iter() {
        y[i] += x[j] * *v;
    }
    y
}

/// y = Aᵀ * x for a real sparse `A` and a real or complex `x`.
pub fn spmv_t<T>(a: &CscMatrix<f64>, x: &DVector<T>) -> DVector<T>
where
    T: Scalar + Zero + AddAssign + Mul<f64, Output = T> + Copy,
{
    assert_eq!(a.nrows(), x.len(), "spmv_t dimension mismatch");
    let mut y = DVector::from_element(a.ncols(), T::zero());
    for (i, j, v) in a.triplet_iter() {
        y[j] += x[i] * *v;
    }
    y
}

/// y = A * x for a complex sparse `A`.
pub fn spmv_complex(a: &CscMatrix<C64>, x: &DVector<C64>) -> DVector<C64> {
    assert_eq!(a.ncols(), x.len(), "spmv dimension mismatch");
    let mut y = DVector::from_element(a.nrows(), C64::zero());
    for (i, j, v) in a.triplet_iter() {
        y[i] += *v * x[j];
    }
    y
}

/// Combine two real operators into `K + s * M` with a complex scalar `s`.
///
/// Every frequency-domain system matrix in this workspace has this shape.
pub fn combine(k: &CscMatrix<f64>, m: &CscMatrix<f64>, s: C64) -> CscMatrix<C64> {
    assert_eq!(k.nrows(), m.nrows(), "combine row mismatch");
    assert_eq!(k.ncols(), m.ncols(), "combine column mismatch");
    let mut coo = CooMatrix::new(k.nrows(), k.ncols());
    for (i, j, v) in k.triplet_iter() {
        coo.push(i, j, C64::new(*v, 0.0));
    }
    for (i, j, v) in m.triplet_iter() {
        coo.push(i, j, s * *v);
    }
    CscMatrix::from(&coo)
}

/// Dense copy of a sparse matrix.
pub fn to_dense<T>(a: &CscMatrix<T>) -> DMatrix<T>
where
    T: Scalar + Zero + AddAssign + Copy,
{
    let mut dense = DMatrix::from_element(a.nrows(), a.ncols(), T::zero());
    for (i, j, v) in a.triplet_iter() {
        dense[(i, j)] += *v;
    }
    dense
}

/// Promote a real vector to complex.
pub fn to_complex(x: &DVector<f64>) -> DVector<C64> {
    x.map(|v| C64::new(v, 0.0))
}

/// Element-wise product of two vectors.
pub fn hadamard<T>(a: &DVector<T>, b: &DVector<T>) -> DVector<T>
where
    T: Scalar + Mul<Output = T> + Copy,
{
    assert_eq!(a.len(), b.len(), "hadamard dimension mismatch");
    DVector::from_iterator(a.len(), a.iter().zip(b.iter()).map(|(&x, &y)| x * y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn sample() -> CscMatrix<f64> {
        // [1 0 2]
        // [0 3 0]
        from_triplets(2, 3, &[(0, 0, 1.0), (0, 2, 2.0), (1, 1, 3.0)])
    }

    #[test]
    fn test_spmv_real() {
        let a = sample();
        let y = spmv(&a, &dvector![1.0, 2.0, 3.0]);
        assert_eq!(y, dvector![7.0, 6.0]);
    }

    #[test]
    fn test_spmv_t_complex() {
        let a = sample();
        let x = dvector![C64::new(1.0, 1.0), C64::new(0.0, -1.0)];
        let y = spmv_t(&a, &x);
        assert!((y[0] - C64::new(1.0, 1.0)).norm() < 1e-15);
        assert!((y[1] - C64::new(0.0, -3.0)).norm() < 1e-15);
        assert!((y[2] - C64::new(2.0, 2.0)).norm() < 1e-15);
    }

    #[test]
    fn test_duplicate_triplets_are_summed() {
        let a = from_triplets(1, 1, &[(0, 0, 1.5), (0, 0, 2.5)]);
        assert!((to_dense(&a)[(0, 0)] - 4.0).abs() < 1e-15);
    }

    #[test]
    fn test_combine() {
        let k = identity(2);
        let m = diag(&dvector![2.0, 3.0]);
        let a = combine(&k, &m, C64::new(0.0, 1.0));
        let dense = to_dense(&a);
        assert!((dense[(0, 0)] - C64::new(1.0, 2.0)).norm() < 1e-15);
        assert!((dense[(1, 1)] - C64::new(1.0, 3.0)).norm() < 1e-15);
        assert!(dense[(0, 1)].norm() < 1e-15);
    }

    #[test]
    fn test_diagonal_roundtrip() {
        let d = dvector![1.0, -2.0, 4.0];
        assert_eq!(diagonal(&diag(&d)), d);
    }
}
