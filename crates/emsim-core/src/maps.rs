//! Mappings from inversion parameters to a cell-wise physical property.
//!
//! A [`Mapping`] turns a model vector `m` into a property on the mesh cells
//! and supplies the sparse derivative `d property / dm`. Mappings compose
//! through [`ComboMap`], whose derivative is the chain rule as a sparse
//! product.

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;

use crate::error::{Error, Result};
use crate::mesh::TensorMesh;
use crate::sparse;

/// A differentiable map `m ↦ p(m)`.
pub trait Mapping: Send + Sync + std::fmt::Debug {
    /// Length of the model vector.
    fn n_params(&self) -> usize;

    /// Length of the mapped property.
    fn n_output(&self) -> usize;

    fn transform(&self, m: &DVector<f64>) -> Result<DVector<f64>>;

    /// Sparse Jacobian of `transform` at `m` (n_output × n_params).
    fn deriv(&self, m: &DVector<f64>) -> Result<CscMatrix<f64>>;

    fn check_len(&self, m: &DVector<f64>) -> Result<()> {
        if m.len() != self.n_params() {
            return Err(Error::DimensionMismatch {
                expected: self.n_params(),
                actual: m.len(),
            });
        }
        Ok(())
    }
}

/// `p = m`.
#[derive(Debug, Clone)]
pub struct IdentityMap {
    n: usize,
}

impl IdentityMap {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl Mapping for IdentityMap {
    fn n_params(&self) -> usize {
        self.n
    }

    fn n_output(&self) -> usize {
        self.n
    }

    fn transform(&self, m: &DVector<f64>) -> Result<DVector<f64>> {
        self.check_len(m)?;
        Ok(m.clone())
    }

    fn deriv(&self, m: &DVector<f64>) -> Result<CscMatrix<f64>> {
        self.check_len(m)?;
        Ok(sparse::identity(self.n))
    }
}

/// `p = exp(m)`, the usual log-conductivity parametrization.
#[derive(Debug, Clone)]
pub struct ExpMap {
    n: usize,
}

impl ExpMap {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl Mapping for ExpMap {
    fn n_params(&self) -> usize {
        self.n
    }

    fn n_output(&self) -> usize {
        self.n
    }

    fn transform(&self, m: &DVector<f64>) -> Result<DVector<f64>> {
        self.check_len(m)?;
        Ok(m.map(f64::exp))
    }

    fn deriv(&self, m: &DVector<f64>) -> Result<CscMatrix<f64>> {
        self.check_len(m)?;
        Ok(sparse::diag(&m.map(f64::exp)))
    }
}

/// `p = 1 / m`, e.g. resistivity parameters driving a conductivity problem.
#[derive(Debug, Clone)]
pub struct ReciprocalMap {
    n: usize,
}

impl ReciprocalMap {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl Mapping for ReciprocalMap {
    fn n_params(&self) -> usize {
        self.n
    }

    fn n_output(&self) -> usize {
        self.n
    }

    fn transform(&self, m: &DVector<f64>) -> Result<DVector<f64>> {
        self.check_len(m)?;
        if m.iter().any(|v| *v == 0.0) {
            return Err(Error::InvalidArgument(
                "reciprocal map is undefined at zero".to_string(),
            ));
        }
        Ok(m.map(|v| 1.0 / v))
    }

    fn deriv(&self, m: &DVector<f64>) -> Result<CscMatrix<f64>> {
        let p = self.transform(m)?;
        Ok(sparse::diag(&p.map(|v| -v * v)))
    }
}

/// Layered earth: one parameter per z-layer, repeated over every cell in the layer.
#[derive(Debug, Clone)]
pub struct SurjectVertical1D {
    shape: [usize; 3],
}

impl SurjectVertical1D {
    pub fn new(mesh: &TensorMesh) -> Self {
        Self {
            shape: mesh.shape_cells(),
        }
    }

    fn projection(&self) -> CscMatrix<f64> {
        let [nx, ny, nz] = self.shape;
        let layer = nx * ny;
        let triplets: Vec<(usize, usize, f64)> = (0..layer * nz)
            .map(|cell| (cell, cell / layer, 1.0))
            .collect();
        sparse::from_triplets(layer * nz, nz, &triplets)
    }
}

impl Mapping for SurjectVertical1D {
    fn n_params(&self) -> usize {
        self.shape[2]
    }

    fn n_output(&self) -> usize {
        self.shape.iter().product()
    }

    fn transform(&self, m: &DVector<f64>) -> Result<DVector<f64>> {
        self.check_len(m)?;
        Ok(sparse::spmv(&self.projection(), m))
    }

    fn deriv(&self, m: &DVector<f64>) -> Result<CscMatrix<f64>> {
        self.check_len(m)?;
        Ok(self.projection())
    }
}

/// Parameters only on active cells; inactive cells (typically air) take a fixed value.
#[derive(Debug, Clone)]
pub struct InjectActiveCells {
    active: Vec<bool>,
    fill: f64,
    n_active: usize,
}

impl InjectActiveCells {
    pub fn new(active: Vec<bool>, fill: f64) -> Self {
        let n_active = active.iter().filter(|a| **a).count();
        Self {
            active,
            fill,
            n_active,
        }
    }

    /// Cells whose center lies at or below `z`.
    pub fn below(mesh: &TensorMesh, z: f64, fill: f64) -> Self {
        let active = mesh.cell_centers().iter().map(|c| c[2] <= z).collect();
        Self::new(active, fill)
    }

    pub fn active(&self) -> &[bool] {
        &self.active
    }
}

impl Mapping for InjectActiveCells {
    fn n_params(&self) -> usize {
        self.n_active
    }

    fn n_output(&self) -> usize {
        self.active.len()
    }

    fn transform(&self, m: &DVector<f64>) -> Result<DVector<f64>> {
        self.check_len(m)?;
        let mut out = DVector::from_element(self.active.len(), self.fill);
        let cells = self.active.iter().enumerate().filter(|(_, a)| **a);
        for ((cell, _), value) in cells.zip(m.iter()) {
            out[cell] = *value;
        }
        Ok(out)
    }

    fn deriv(&self, m: &DVector<f64>) -> Result<CscMatrix<f64>> {
        self.check_len(m)?;
        let triplets: Vec<(usize, usize, f64)> = self
            .active
            .iter()
            .enumerate()
            .filter(|(_, a)| **a)
            .enumerate()
            .map(|(param, (cell, _))| (cell, param, 1.0))
            .collect();
        Ok(sparse::from_triplets(
            self.active.len(),
            self.n_active,
            &triplets,
        ))
    }
}

/// Composition `maps[0] ∘ maps[1] ∘ ...`; the last map is applied first.
#[derive(Debug)]
pub struct ComboMap {
    maps: Vec<Box<dyn Mapping>>,
}

impl ComboMap {
    pub fn new(maps: Vec<Box<dyn Mapping>>) -> Result<Self> {
        if maps.is_empty() {
            return Err(Error::InvalidArgument(
                "combo map needs at least one mapping".to_string(),
            ));
        }
        for pair in maps.windows(2) {
            if pair[0].n_params() != pair[1].n_output() {
                return Err(Error::DimensionMismatch {
                    expected: pair[0].n_params(),
                    actual: pair[1].n_output(),
                });
            }
        }
        Ok(Self { maps })
    }
}

impl Mapping for ComboMap {
    fn n_params(&self) -> usize {
        self.maps.last().map_or(0, |m| m.n_params())
    }

    fn n_output(&self) -> usize {
        self.maps.first().map_or(0, |m| m.n_output())
    }

    fn transform(&self, m: &DVector<f64>) -> Result<DVector<f64>> {
        self.check_len(m)?;
        let mut p = m.clone();
        for map in self.maps.iter().rev() {
            p = map.transform(&p)?;
        }
        Ok(p)
    }

    fn deriv(&self, m: &DVector<f64>) -> Result<CscMatrix<f64>> {
        self.check_len(m)?;
        let mut p = m.clone();
        let mut jac = sparse::identity(m.len());
        for map in self.maps.iter().rev() {
            jac = &map.deriv(&p)? * &jac;
            p = map.transform(&p)?;
        }
        Ok(jac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng;
    use nalgebra::dvector;

    /// Central finite difference of `map` at `m` along `dm` against the sparse derivative.
    fn fd_error(map: &dyn Mapping, m: &DVector<f64>, dm: &DVector<f64>) -> f64 {
        let h = 1e-6;
        let plus = map.transform(&(m + dm * h)).unwrap();
        let minus = map.transform(&(m - dm * h)).unwrap();
        let fd = (plus - minus) / (2.0 * h);
        let an = sparse::spmv(&map.deriv(m).unwrap(), dm);
        (&fd - &an).norm() / an.norm().max(1e-300)
    }

    #[test]
    fn test_exp_map() {
        let map = ExpMap::new(3);
        let m = dvector![0.0, 1.0, -2.0];
        let p = map.transform(&m).unwrap();
        assert!((p[1] - std::f64::consts::E).abs() < 1e-14);
        assert!(fd_error(&map, &m, &dvector![1.0, -0.5, 2.0]) < 1e-8);
    }

    #[test]
    fn test_reciprocal_map() {
        let map = ReciprocalMap::new(2);
        let m = dvector![2.0, 0.5];
        assert_eq!(map.transform(&m).unwrap(), dvector![0.5, 2.0]);
        assert!(fd_error(&map, &m, &dvector![0.3, 1.0]) < 1e-7);
        assert!(map.transform(&dvector![1.0, 0.0]).is_err());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let map = IdentityMap::new(4);
        let err = map.transform(&DVector::zeros(3)).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 3 }));
    }

    #[test]
    fn test_surject_vertical() {
        let mesh = TensorMesh::uniform(1.0, [2, 3, 4]).unwrap();
        let map = SurjectVertical1D::new(&mesh);
        assert_eq!(map.n_params(), 4);
        assert_eq!(map.n_output(), 24);
        let p = map.transform(&dvector![1.0, 2.0, 3.0, 4.0]).unwrap();
        // x-fastest ordering puts each z-layer in a contiguous block of 6.
        assert_eq!(p[0], 1.0);
        assert_eq!(p[5], 1.0);
        assert_eq!(p[6], 2.0);
        assert_eq!(p[23], 4.0);
    }

    #[test]
    fn test_inject_active_cells() {
        let map = InjectActiveCells::new(vec![true, false, true, false], 1e-8);
        assert_eq!(map.n_params(), 2);
        let p = map.transform(&dvector![3.0, 5.0]).unwrap();
        assert_eq!(p, dvector![3.0, 1e-8, 5.0, 1e-8]);
        let d = sparse::to_dense(&map.deriv(&dvector![3.0, 5.0]).unwrap());
        assert_eq!(d[(2, 1)], 1.0);
        assert_eq!(d[(1, 0)], 0.0);
    }

    #[test]
    fn test_inject_below_surface() {
        // Centred mesh: cell centres at z = -1.5, -0.5, 0.5, 1.5.
        let mesh = TensorMesh::uniform(1.0, [2, 2, 4]).unwrap();
        let map = InjectActiveCells::below(&mesh, 0.0, 1e-8);
        assert_eq!(map.n_params(), 8);
    }

    #[test]
    fn test_combo_chain_rule() {
        let mesh = TensorMesh::uniform(1.0, [2, 2, 3]).unwrap();
        let combo = ComboMap::new(vec![
            Box::new(ExpMap::new(mesh.n_cells())),
            Box::new(SurjectVertical1D::new(&mesh)),
        ])
        .unwrap();
        assert_eq!(combo.n_params(), 3);
        assert_eq!(combo.n_output(), 12);
        let m = dvector![-2.0, -1.0, -3.0];
        let p = combo.transform(&m).unwrap();
        assert!((p[0] - (-2.0f64).exp()).abs() < 1e-14);
        let dm = rng::gaussian_vector(1, 3);
        assert!(fd_error(&combo, &m, &dm) < 1e-8);
    }

    #[test]
    fn test_combo_rejects_incompatible() {
        let result = ComboMap::new(vec![
            Box::new(ExpMap::new(3)),
            Box::new(IdentityMap::new(4)),
        ]);
        assert!(result.is_err());
    }
}
