//! Matrix-free complex linear operators.
//!
//! Derivatives of mass matrices with respect to a property vector depend on
//! the field they are linearized at. They are never materialized; instead
//! they are exposed through [`ComplexOperator`], which supports the forward
//! action and the (non-conjugated) transpose action.

use nalgebra::DVector;

use crate::C64;

/// A linear operator `y = A * x` between complex vector spaces.
///
/// `apply_transpose` must implement the plain transpose `Aᵀ`, not the
/// conjugate transpose, so that `wᵀ (A v) == (Aᵀ w)ᵀ v` holds for the
/// bilinear product used by the adjoint sensitivity code.
pub trait ComplexOperator: Send + Sync {
    /// Number of rows of the operator.
    fn nrows(&self) -> usize;

    /// Number of columns of the operator.
    fn ncols(&self) -> usize;

    /// Apply the operator: y = A * x, with `x.len() == ncols()`.
    fn apply(&self, x: &DVector<C64>) -> DVector<C64>;

    /// Apply the transpose: x = Aᵀ * y, with `y.len() == nrows()`.
    fn apply_transpose(&self, y: &DVector<C64>) -> DVector<C64>;
}
