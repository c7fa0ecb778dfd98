//! The four frequency-domain formulations.
//!
//! Each kernel assembles one complex system `A(ω) u = rhs` per frequency,
//! supplies the derivatives of `A u` and `rhs` with respect to the model
//! (forward and transposed), and registers the rules that derive the
//! remaining field quantities from its primary unknown.
//!
//! | kernel | unknown | lives on | sources |
//! |--------|---------|----------|---------|
//! | [`EKernel`] | e | edges | `S_m` faces, `S_e` edges |
//! | [`BKernel`] | b | faces | `S_m` faces, `S_e` edges |
//! | [`HKernel`] | h | edges | `S_m` edges, `S_e` faces |
//! | [`JKernel`] | j | faces | `S_m` edges, `S_e` faces |

mod b;
mod e;
mod h;
mod j;

use std::fmt;
use std::str::FromStr;

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use serde::{Deserialize, Serialize};

use emsim_core::sparse::{spmv, spmv_t};
use emsim_core::{MassLocation, omega};

use crate::C64;
use crate::error::{Error, Result};
use crate::fields::{FieldContext, FieldRule};
use crate::model::ModelOperators;
use crate::survey::{DerivMode, EquationLayout, Quantity, SourceTerms};

pub use b::BKernel;
pub use e::EKernel;
pub use h::HKernel;
pub use j::JKernel;

/// Which field is solved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Formulation {
    E,
    B,
    H,
    J,
}

impl Formulation {
    pub const ALL: [Formulation; 4] = [Formulation::E, Formulation::B, Formulation::H, Formulation::J];

    pub fn name(&self) -> &'static str {
        match self {
            Formulation::E => "e",
            Formulation::B => "b",
            Formulation::H => "h",
            Formulation::J => "j",
        }
    }

    /// Build the kernel; `make_symmetric` only affects the b and j systems.
    pub fn kernel(&self, make_symmetric: bool) -> Box<dyn FormulationKernel> {
        match self {
            Formulation::E => Box::new(EKernel),
            Formulation::B => Box::new(BKernel::new(make_symmetric)),
            Formulation::H => Box::new(HKernel),
            Formulation::J => Box::new(JKernel::new(make_symmetric)),
        }
    }
}

impl fmt::Display for Formulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Formulation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "e" => Ok(Formulation::E),
            "b" => Ok(Formulation::B),
            "h" => Ok(Formulation::H),
            "j" => Ok(Formulation::J),
            other => Err(Error::InvalidArgument(format!(
                "unknown formulation '{}' (expected e, b, h or j)",
                other
            ))),
        }
    }
}

/// Per-frequency assembly and model derivatives of one formulation.
///
/// All derivative methods take complex model-space vectors and use plain
/// (non-conjugated) transposes.
pub trait FormulationKernel: Send + Sync + fmt::Debug {
    fn formulation(&self) -> Formulation;

    /// Primary unknown solved for.
    fn primary(&self) -> Quantity;

    fn primary_location(&self) -> MassLocation;

    fn layout(&self) -> EquationLayout;

    /// Rules deriving every other quantity from the primary unknown.
    fn rules(&self) -> &'static [FieldRule];

    /// System matrix `A(ω)`.
    fn system_matrix(&self, ops: &ModelOperators, frequency: f64) -> Result<CscMatrix<C64>>;

    /// `d(A u)/dm · v` with `u` held fixed.
    fn system_matrix_deriv(
        &self,
        ops: &ModelOperators,
        frequency: f64,
        u: &DVector<C64>,
        v: &DVector<C64>,
    ) -> Result<DVector<C64>>;

    /// `(d(A u)/dm)ᵀ · w` with `u` held fixed.
    fn system_matrix_deriv_adjoint(
        &self,
        ops: &ModelOperators,
        frequency: f64,
        u: &DVector<C64>,
        w: &DVector<C64>,
    ) -> Result<DVector<C64>>;

    /// Right-hand side for one source.
    fn rhs(&self, ops: &ModelOperators, frequency: f64, terms: &SourceTerms)
        -> Result<DVector<C64>>;

    /// `d rhs/dm · v`; `None` when the right-hand side does not depend on the model.
    fn rhs_deriv(&self, ctx: &FieldContext<'_>, v: &DVector<C64>) -> Result<Option<DVector<C64>>>;

    /// `(d rhs/dm)ᵀ · w`; `None` when the right-hand side does not depend on the model.
    fn rhs_deriv_adjoint(
        &self,
        ctx: &FieldContext<'_>,
        w: &DVector<C64>,
    ) -> Result<Option<DVector<C64>>>;
}

/// `iω` for a frequency in Hz.
pub(crate) fn i_omega(frequency: f64) -> C64 {
    C64::new(0.0, omega(frequency))
}

/// One factor of a matrix chain: a real operator or its transpose.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Factor<'a> {
    Mat(&'a CscMatrix<f64>),
    Tr(&'a CscMatrix<f64>),
}

fn apply_factor(factor: Factor<'_>, x: &DVector<C64>, transpose: bool) -> DVector<C64> {
    match (factor, transpose) {
        (Factor::Mat(m), false) | (Factor::Tr(m), true) => spmv(m, x),
        (Factor::Mat(m), true) | (Factor::Tr(m), false) => spmv_t(m, x),
    }
}

/// `F_1 F_2 ... F_k x` (forward) or `F_kᵀ ... F_1ᵀ x` (adjoint).
pub(crate) fn chain(factors: &[Factor<'_>], x: &DVector<C64>, mode: DerivMode) -> DVector<C64> {
    match mode {
        DerivMode::Forward => factors
            .iter()
            .rev()
            .fold(x.clone(), |acc, f| apply_factor(*f, &acc, false)),
        DerivMode::Adjoint => factors
            .iter()
            .fold(x.clone(), |acc, f| apply_factor(*f, &acc, true)),
    }
}

/// Sum of the contributions that are present; `None` if none are.
pub(crate) fn sum_terms<const N: usize>(terms: [Option<DVector<C64>>; N]) -> Option<DVector<C64>> {
    terms.into_iter().flatten().reduce(|a, b| a + b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use emsim_core::sparse::{diag, from_triplets, to_complex, to_dense};
    use nalgebra::dvector;

    #[test]
    fn test_formulation_from_str() {
        assert_eq!("h".parse::<Formulation>().unwrap(), Formulation::H);
        assert!(matches!(
            "q".parse::<Formulation>(),
            Err(Error::InvalidArgument(_))
        ));
        for f in Formulation::ALL {
            assert_eq!(f.name().parse::<Formulation>().unwrap(), f);
            assert_eq!(f.kernel(false).formulation(), f);
        }
    }

    #[test]
    fn test_chain_matches_dense_product() {
        let a = from_triplets(2, 3, &[(0, 0, 1.0), (0, 2, 2.0), (1, 1, -1.0)]);
        let d = diag(&dvector![2.0, 3.0]);
        let x = to_complex(&dvector![1.0, 2.0, 3.0]);

        // D A x
        let fwd = chain(&[Factor::Mat(&d), Factor::Mat(&a)], &x, DerivMode::Forward);
        let dense = to_dense(&d) * to_dense(&a) * dvector![1.0, 2.0, 3.0];
        assert!((fwd - to_complex(&dense)).norm() < 1e-14);

        // Adjoint of Aᵀ D is Dᵀ A.
        let y = dvector![1.0, -1.0, 0.5];
        let adj = chain(&[Factor::Tr(&a), Factor::Mat(&d)], &to_complex(&y), DerivMode::Adjoint);
        let product = to_dense(&a).transpose() * to_dense(&d);
        let expected = product.transpose() * y;
        assert!((adj - to_complex(&expected)).norm() < 1e-14);
    }

    #[test]
    fn test_sum_terms() {
        let a = Some(to_complex(&dvector![1.0, 2.0]));
        assert!(sum_terms::<2>([None, None]).is_none());
        let s = sum_terms([a.clone(), None, a]).unwrap();
        assert_eq!(s, to_complex(&dvector![2.0, 4.0]));
    }
}
