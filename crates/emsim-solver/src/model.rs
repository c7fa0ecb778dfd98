//! Per-model operator bundle.
//!
//! Every kernel call receives a [`ModelOperators`] explicitly instead of
//! reading state cached on the problem. It holds the physical properties for
//! one model, their sparse derivatives, and the lumped mass matrices the four
//! formulations are assembled from.

use std::sync::Arc;

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;

use emsim_core::sparse::{self, spmv, spmv_t};
use emsim_core::{ComplexOperator, Discretization, InnerProductDeriv, MassLocation, Mapping};

use crate::C64;
use crate::error::{Error, Result};

/// Which physical property the model mapping produces.
#[derive(Debug)]
pub enum PropertyMap {
    /// The mapping yields conductivity σ (S/m).
    Conductivity(Box<dyn Mapping>),
    /// The mapping yields resistivity ρ (Ω·m).
    Resistivity(Box<dyn Mapping>),
}

impl PropertyMap {
    fn mapping(&self) -> &dyn Mapping {
        match self {
            PropertyMap::Conductivity(map) | PropertyMap::Resistivity(map) => map.as_ref(),
        }
    }

    /// Length of the model vector.
    pub fn n_params(&self) -> usize {
        self.mapping().n_params()
    }

    /// Number of cells the property covers.
    pub fn n_output(&self) -> usize {
        self.mapping().n_output()
    }
}

/// `dp ↦ dM/dσ · (dσ/dm) · dp` for one mass-matrix/vector product.
#[derive(Debug, Clone)]
pub struct PropertyDeriv {
    inner: InnerProductDeriv,
    property_deriv: Arc<CscMatrix<f64>>,
}

impl ComplexOperator for PropertyDeriv {
    fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    fn ncols(&self) -> usize {
        self.property_deriv.ncols()
    }

    fn apply(&self, v: &DVector<C64>) -> DVector<C64> {
        self.inner.apply(&spmv(&self.property_deriv, v))
    }

    fn apply_transpose(&self, w: &DVector<C64>) -> DVector<C64> {
        spmv_t(&self.property_deriv, &self.inner.apply_transpose(w))
    }
}

/// Properties and mass matrices for one model.
///
/// Naming follows the usual FDEM shorthand: `me_*`/`mf_*` live on edges/faces,
/// a trailing `_i` is the inverse, `mui` is 1/μ.
#[derive(Debug)]
pub struct ModelOperators {
    disc: Arc<dyn Discretization>,
    model: DVector<f64>,
    mu: f64,
    sigma: DVector<f64>,
    rho: DVector<f64>,
    sigma_deriv: Arc<CscMatrix<f64>>,
    rho_deriv: Arc<CscMatrix<f64>>,
    me_sigma: CscMatrix<f64>,
    me_sigma_i: CscMatrix<f64>,
    mf_rho: CscMatrix<f64>,
    mf_rho_i: CscMatrix<f64>,
    mf_mui: CscMatrix<f64>,
    me_mu: CscMatrix<f64>,
    me_mu_i: CscMatrix<f64>,
    me_i: CscMatrix<f64>,
    mf: CscMatrix<f64>,
    mf_i: CscMatrix<f64>,
}

impl ModelOperators {
    pub fn new(
        disc: Arc<dyn Discretization>,
        property: &PropertyMap,
        m: &DVector<f64>,
        mu: f64,
    ) -> Result<Self> {
        if property.n_output() != disc.n_cells() {
            return Err(Error::DimensionMismatch {
                expected: disc.n_cells(),
                actual: property.n_output(),
            });
        }
        if !(mu.is_finite() && mu > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "permeability must be positive, got {}",
                mu
            )));
        }

        let mapped = property.mapping().transform(m)?;
        if let Some(p) = mapped.iter().find(|p| !(p.is_finite() && **p > 0.0)) {
            return Err(Error::InvalidArgument(format!(
                "mapped property must be positive, got {}",
                p
            )));
        }
        let mapped_deriv = property.mapping().deriv(m)?;

        // d(1/p)/dm = -diag(1/p²) dp/dm
        let reciprocal = mapped.map(|p| 1.0 / p);
        let reciprocal_deriv = &sparse::diag(&reciprocal.map(|r| -r * r)) * &mapped_deriv;

        let (sigma, rho, sigma_deriv, rho_deriv) = match property {
            PropertyMap::Conductivity(_) => (mapped, reciprocal, mapped_deriv, reciprocal_deriv),
            PropertyMap::Resistivity(_) => (reciprocal, mapped, reciprocal_deriv, mapped_deriv),
        };

        let n = disc.n_cells();
        let ones = DVector::from_element(n, 1.0);
        let mu_cells = DVector::from_element(n, mu);
        let mui_cells = DVector::from_element(n, 1.0 / mu);

        Ok(Self {
            me_sigma: disc.inner_product(MassLocation::Edges, &sigma, false)?,
            me_sigma_i: disc.inner_product(MassLocation::Edges, &sigma, true)?,
            mf_rho: disc.inner_product(MassLocation::Faces, &rho, false)?,
            mf_rho_i: disc.inner_product(MassLocation::Faces, &rho, true)?,
            mf_mui: disc.inner_product(MassLocation::Faces, &mui_cells, false)?,
            me_mu: disc.inner_product(MassLocation::Edges, &mu_cells, false)?,
            me_mu_i: disc.inner_product(MassLocation::Edges, &mu_cells, true)?,
            me_i: disc.inner_product(MassLocation::Edges, &ones, true)?,
            mf: disc.inner_product(MassLocation::Faces, &ones, false)?,
            mf_i: disc.inner_product(MassLocation::Faces, &ones, true)?,
            disc,
            model: m.clone(),
            mu,
            sigma,
            rho,
            sigma_deriv: Arc::new(sigma_deriv),
            rho_deriv: Arc::new(rho_deriv),
        })
    }

    pub fn discretization(&self) -> &dyn Discretization {
        self.disc.as_ref()
    }

    /// Edge curl `C` (nF × nE).
    pub fn curl(&self) -> &CscMatrix<f64> {
        self.disc.edge_curl()
    }

    /// The model these operators were built for.
    pub fn model(&self) -> &DVector<f64> {
        &self.model
    }

    pub fn n_params(&self) -> usize {
        self.model.len()
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn sigma(&self) -> &DVector<f64> {
        &self.sigma
    }

    pub fn rho(&self) -> &DVector<f64> {
        &self.rho
    }

    pub fn me_sigma(&self) -> &CscMatrix<f64> {
        &self.me_sigma
    }

    pub fn me_sigma_i(&self) -> &CscMatrix<f64> {
        &self.me_sigma_i
    }

    pub fn mf_rho(&self) -> &CscMatrix<f64> {
        &self.mf_rho
    }

    pub fn mf_rho_i(&self) -> &CscMatrix<f64> {
        &self.mf_rho_i
    }

    pub fn mf_mui(&self) -> &CscMatrix<f64> {
        &self.mf_mui
    }

    pub fn me_mu(&self) -> &CscMatrix<f64> {
        &self.me_mu
    }

    pub fn me_mu_i(&self) -> &CscMatrix<f64> {
        &self.me_mu_i
    }

    pub fn me_i(&self) -> &CscMatrix<f64> {
        &self.me_i
    }

    pub fn mf(&self) -> &CscMatrix<f64> {
        &self.mf
    }

    pub fn mf_i(&self) -> &CscMatrix<f64> {
        &self.mf_i
    }

    fn sigma_deriv_op(
        &self,
        loc: MassLocation,
        invert: bool,
        u: &DVector<C64>,
    ) -> Result<PropertyDeriv> {
        Ok(PropertyDeriv {
            inner: self.disc.inner_product_deriv(loc, &self.sigma, invert, u)?,
            property_deriv: Arc::clone(&self.sigma_deriv),
        })
    }

    /// d(M_e,σ u)/dm.
    pub fn me_sigma_deriv(&self, u: &DVector<C64>) -> Result<PropertyDeriv> {
        self.sigma_deriv_op(MassLocation::Edges, false, u)
    }

    /// d(M_e,σ⁻¹ u)/dm.
    pub fn me_sigma_i_deriv(&self, u: &DVector<C64>) -> Result<PropertyDeriv> {
        self.sigma_deriv_op(MassLocation::Edges, true, u)
    }

    /// d(M_f,ρ u)/dm.
    pub fn mf_rho_deriv(&self, u: &DVector<C64>) -> Result<PropertyDeriv> {
        Ok(PropertyDeriv {
            inner: self
                .disc
                .inner_product_deriv(MassLocation::Faces, &self.rho, false, u)?,
            property_deriv: Arc::clone(&self.rho_deriv),
        })
    }

    /// Conductivity-weighted mass matrix at either location.
    pub fn mass_sigma(&self, loc: MassLocation) -> Result<CscMatrix<f64>> {
        match loc {
            MassLocation::Edges => Ok(self.me_sigma.clone()),
            MassLocation::Faces => Ok(self.disc.inner_product(loc, &self.sigma, false)?),
        }
    }

    /// d(M_σ u)/dm at either location.
    pub fn mass_sigma_deriv(&self, loc: MassLocation, u: &DVector<C64>) -> Result<PropertyDeriv> {
        self.sigma_deriv_op(loc, false, u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emsim_core::sparse::{diagonal, to_complex};
    use emsim_core::{ExpMap, IdentityMap, TensorMesh, rng};

    fn disc() -> Arc<dyn Discretization> {
        Arc::new(TensorMesh::uniform(10.0, [2, 2, 2]).unwrap())
    }

    #[test]
    fn test_conductivity_and_resistivity_agree() {
        let disc = disc();
        let n = disc.n_cells();
        let sigma = DVector::from_fn(n, |i, _| 0.01 * (i + 1) as f64);
        let rho = sigma.map(|s| 1.0 / s);

        let by_sigma = ModelOperators::new(
            Arc::clone(&disc),
            &PropertyMap::Conductivity(Box::new(IdentityMap::new(n))),
            &sigma,
            emsim_core::MU_0,
        )
        .unwrap();
        let by_rho = ModelOperators::new(
            Arc::clone(&disc),
            &PropertyMap::Resistivity(Box::new(IdentityMap::new(n))),
            &rho,
            emsim_core::MU_0,
        )
        .unwrap();

        let a = diagonal(by_sigma.me_sigma());
        let b = diagonal(by_rho.me_sigma());
        assert!((&a - &b).norm() < 1e-12 * a.norm());
        let a = diagonal(by_sigma.mf_rho());
        let b = diagonal(by_rho.mf_rho());
        assert!((&a - &b).norm() < 1e-12 * a.norm());
    }

    #[test]
    fn test_rejects_non_positive_property() {
        let disc = disc();
        let n = disc.n_cells();
        let mut sigma = DVector::from_element(n, 0.1);
        sigma[3] = 0.0;
        let result = ModelOperators::new(
            disc,
            &PropertyMap::Conductivity(Box::new(IdentityMap::new(n))),
            &sigma,
            emsim_core::MU_0,
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_mismatched_mapping() {
        let result = ModelOperators::new(
            disc(),
            &PropertyMap::Conductivity(Box::new(IdentityMap::new(3))),
            &DVector::from_element(3, 0.1),
            emsim_core::MU_0,
        );
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_mf_rho_deriv_under_log_conductivity() {
        let disc = disc();
        let n = disc.n_cells();
        let map = PropertyMap::Conductivity(Box::new(ExpMap::new(n)));
        let m = rng::uniform_vector(1, n).map(|x| -4.0 + 2.0 * x);
        let dm = rng::gaussian_vector(2, n);
        let u = rng::complex_vector(3, disc.n_faces());

        let ops = ModelOperators::new(Arc::clone(&disc), &map, &m, emsim_core::MU_0).unwrap();
        let deriv = ops.mf_rho_deriv(&u).unwrap();

        let h = 1e-5;
        let eval = |m: &DVector<f64>| {
            let ops = ModelOperators::new(Arc::clone(&disc), &map, m, emsim_core::MU_0).unwrap();
            spmv(ops.mf_rho(), &u)
        };
        let fd = (eval(&(&m + &dm * h)) - eval(&(&m - &dm * h))) / C64::new(2.0 * h, 0.0);
        let an = deriv.apply(&to_complex(&dm));
        assert!((&fd - &an).norm() < 1e-6 * an.norm());
    }

    #[test]
    fn test_property_deriv_adjoint() {
        let disc = disc();
        let n = disc.n_cells();
        let map = PropertyMap::Resistivity(Box::new(ExpMap::new(n)));
        let m = rng::uniform_vector(4, n);
        let ops = ModelOperators::new(Arc::clone(&disc), &map, &m, emsim_core::MU_0).unwrap();

        let u = rng::complex_vector(5, disc.n_edges());
        let op = ops.me_sigma_i_deriv(&u).unwrap();
        let v = rng::complex_vector(6, n);
        let w = rng::complex_vector(7, disc.n_edges());
        let lhs = w.dot(&op.apply(&v));
        let rhs = op.apply_transpose(&w).dot(&v);
        assert!((lhs - rhs).norm() < 1e-10 * lhs.norm());
    }
}
