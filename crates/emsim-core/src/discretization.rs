//! The discretization interface consumed by the frequency-domain engine.
//!
//! A [`Discretization`] supplies the edge curl, property-weighted inner
//! products (mass matrices) on edges and faces, their derivatives with respect
//! to a cell-wise property, and interpolation to arbitrary points.
//! [`TensorMesh`] implements it with lumped (diagonal) inner products
//! `M(p) = diag(Avᵀ (vol ⊙ p))`.

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use serde::{Deserialize, Serialize};

use crate::C64;
use crate::error::{Error, Result};
use crate::mesh::{GridLocation, TensorMesh};
use crate::operator::ComplexOperator;
use crate::sparse::{self, hadamard, spmv, spmv_t, to_complex};

/// Where an inner product lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MassLocation {
    Edges,
    Faces,
}

/// Provider of discrete differential operators and mass matrices.
pub trait Discretization: Send + Sync + std::fmt::Debug {
    fn n_cells(&self) -> usize;

    fn n_edges(&self) -> usize;

    fn n_faces(&self) -> usize;

    /// Number of unknowns at `loc`.
    fn n_at(&self, loc: MassLocation) -> usize {
        match loc {
            MassLocation::Edges => self.n_edges(),
            MassLocation::Faces => self.n_faces(),
        }
    }

    /// Discrete curl from edges to faces (nF × nE).
    fn edge_curl(&self) -> &CscMatrix<f64>;

    /// Property-weighted inner product `M(p)` at `loc`, or `M(p)⁻¹` if `invert`.
    fn inner_product(
        &self,
        loc: MassLocation,
        prop: &DVector<f64>,
        invert: bool,
    ) -> Result<CscMatrix<f64>>;

    /// Derivative of `M(p) u` (or `M(p)⁻¹ u`) with respect to `p`, linearized at `u`.
    fn inner_product_deriv(
        &self,
        loc: MassLocation,
        prop: &DVector<f64>,
        invert: bool,
        u: &DVector<C64>,
    ) -> Result<InnerProductDeriv>;

    /// Interpolation matrix from grid location `loc` to `points`.
    fn interpolation_matrix(
        &self,
        points: &[[f64; 3]],
        loc: GridLocation,
    ) -> Result<CscMatrix<f64>>;

    /// Coordinates of the points of `loc`, in unknown order.
    fn grid_points(&self, loc: GridLocation) -> Vec<[f64; 3]>;
}

/// `dp ↦ diag(scale) · W · dp` where `W = Avᵀ diag(vol)`.
///
/// For `M(p) u` the scale is `u`; for `M(p)⁻¹ u` it is `-u / d²` with `d` the
/// diagonal of `M(p)`.
#[derive(Debug, Clone)]
pub struct InnerProductDeriv {
    scale: DVector<C64>,
    weights: CscMatrix<f64>,
}

impl InnerProductDeriv {
    pub fn new(scale: DVector<C64>, weights: CscMatrix<f64>) -> Self {
        assert_eq!(scale.len(), weights.nrows(), "scale/weights mismatch");
        Self { scale, weights }
    }
}

impl ComplexOperator for InnerProductDeriv {
    fn nrows(&self) -> usize {
        self.weights.nrows()
    }

    fn ncols(&self) -> usize {
        self.weights.ncols()
    }

    fn apply(&self, x: &DVector<C64>) -> DVector<C64> {
        hadamard(&self.scale, &spmv(&self.weights, x))
    }

    fn apply_transpose(&self, y: &DVector<C64>) -> DVector<C64> {
        spmv_t(&self.weights, &hadamard(&self.scale, y))
    }
}

impl TensorMesh {
    fn averaging(&self, loc: MassLocation) -> &CscMatrix<f64> {
        match loc {
            MassLocation::Edges => self.ave_e2cc(),
            MassLocation::Faces => self.ave_f2cc(),
        }
    }

    /// `Avᵀ diag(vol)`, the sensitivity of the lumped diagonal to the property.
    fn inner_product_weights(&self, loc: MassLocation) -> CscMatrix<f64> {
        let av = self.averaging(loc);
        let vol = self.cell_volumes();
        let triplets: Vec<(usize, usize, f64)> = av
            .triplet_iter()
            .map(|(cell, dof, v)| (dof, cell, v * vol[cell]))
            .collect();
        sparse::from_triplets(av.ncols(), av.nrows(), &triplets)
    }

    /// Diagonal of the lumped inner product for a cell-wise property.
    fn lumped_diagonal(&self, loc: MassLocation, prop: &DVector<f64>) -> Result<DVector<f64>> {
        if prop.len() != self.n_cells() {
            return Err(Error::DimensionMismatch {
                expected: self.n_cells(),
                actual: prop.len(),
            });
        }
        let weighted = hadamard(self.cell_volumes(), prop);
        Ok(spmv_t(self.averaging(loc), &weighted))
    }

    fn checked_inverse(d: &DVector<f64>) -> Result<DVector<f64>> {
        if let Some(v) = d.iter().find(|v| **v == 0.0 || !v.is_finite()) {
            return Err(Error::InvalidArgument(format!(
                "inner product is not invertible (diagonal entry {})",
                v
            )));
        }
        Ok(d.map(|v| 1.0 / v))
    }
}

impl Discretization for TensorMesh {
    fn n_cells(&self) -> usize {
        TensorMesh::n_cells(self)
    }

    fn n_edges(&self) -> usize {
        TensorMesh::n_edges(self)
    }

    fn n_faces(&self) -> usize {
        TensorMesh::n_faces(self)
    }

    fn edge_curl(&self) -> &CscMatrix<f64> {
        TensorMesh::edge_curl(self)
    }

    fn inner_product(
        &self,
        loc: MassLocation,
        prop: &DVector<f64>,
        invert: bool,
    ) -> Result<CscMatrix<f64>> {
        let d = self.lumped_diagonal(loc, prop)?;
        if invert {
            Ok(sparse::diag(&Self::checked_inverse(&d)?))
        } else {
            Ok(sparse::diag(&d))
        }
    }

    fn inner_product_deriv(
        &self,
        loc: MassLocation,
        prop: &DVector<f64>,
        invert: bool,
        u: &DVector<C64>,
    ) -> Result<InnerProductDeriv> {
        let n = self.n_at(loc);
        if u.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: u.len(),
            });
        }
        let scale = if invert {
            let d_inv = Self::checked_inverse(&self.lumped_diagonal(loc, prop)?)?;
            let factor = to_complex(&d_inv.map(|v| -v * v));
            hadamard(u, &factor)
        } else {
            u.clone()
        };
        Ok(InnerProductDeriv::new(scale, self.inner_product_weights(loc)))
    }

    fn interpolation_matrix(
        &self,
        points: &[[f64; 3]],
        loc: GridLocation,
    ) -> Result<CscMatrix<f64>> {
        TensorMesh::interpolation_matrix(self, points, loc)
    }

    fn grid_points(&self, loc: GridLocation) -> Vec<[f64; 3]> {
        TensorMesh::grid_points(self, loc)
    }
}
