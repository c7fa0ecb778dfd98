//! B formulation: magnetic flux density on faces.
//!
//! `(C M_e,σ⁻¹ Cᵀ M_f,μ⁻¹ + iω) b = S_m + C M_e,σ⁻¹ S_e`
//!
//! The system is not symmetric; with `make_symmetric` both sides are
//! left-multiplied by `M_f,μ⁻¹ᵀ`.

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;

use emsim_core::sparse::{self, spmv, spmv_t};
use emsim_core::{ComplexOperator, MassLocation};

use super::{Factor, FormulationKernel, chain, i_omega, sum_terms};
use crate::C64;
use crate::error::Result;
use crate::fields::{FieldContext, FieldRule};
use crate::formulation::Formulation;
use crate::model::ModelOperators;
use crate::survey::{DerivMode, EquationLayout, Quantity, SourceTerms};

#[derive(Debug, Clone, Copy, Default)]
pub struct BKernel {
    symmetric: bool,
}

impl BKernel {
    pub fn new(symmetric: bool) -> Self {
        Self { symmetric }
    }

    /// `M_f,μ⁻¹ᵀ x` when symmetrized.
    fn left(&self, ops: &ModelOperators, x: DVector<C64>) -> DVector<C64> {
        if self.symmetric {
            spmv_t(ops.mf_mui(), &x)
        } else {
            x
        }
    }

    /// Transpose of [`Self::left`].
    fn left_adjoint(&self, ops: &ModelOperators, w: &DVector<C64>) -> DVector<C64> {
        if self.symmetric {
            spmv(ops.mf_mui(), w)
        } else {
            w.clone()
        }
    }
}

static RULES: [FieldRule; 3] = [
    FieldRule {
        quantity: Quantity::E,
        location: MassLocation::Edges,
        eval: e_eval,
        deriv_u: e_deriv_u,
        deriv_m: e_deriv_m,
    },
    FieldRule {
        quantity: Quantity::J,
        location: MassLocation::Edges,
        eval: j_eval,
        deriv_u: j_deriv_u,
        deriv_m: j_deriv_m,
    },
    FieldRule {
        quantity: Quantity::H,
        location: MassLocation::Faces,
        eval: h_eval,
        deriv_u: h_deriv_u,
        deriv_m: h_deriv_m,
    },
];

impl FormulationKernel for BKernel {
    fn formulation(&self) -> Formulation {
        Formulation::B
    }

    fn primary(&self) -> Quantity {
        Quantity::B
    }

    fn primary_location(&self) -> MassLocation {
        MassLocation::Faces
    }

    fn layout(&self) -> EquationLayout {
        EquationLayout::Eb
    }

    fn rules(&self) -> &'static [FieldRule] {
        &RULES
    }

    fn system_matrix(&self, ops: &ModelOperators, frequency: f64) -> Result<CscMatrix<C64>> {
        let c = ops.curl();
        let curl_curl = &(&(c * ops.me_sigma_i()) * &c.transpose()) * ops.mf_mui();
        let (k, m) = if self.symmetric {
            let left = ops.mf_mui().transpose();
            (&left * &curl_curl, left)
        } else {
            (curl_curl, sparse::identity(c.nrows()))
        };
        Ok(sparse::combine(&k, &m, i_omega(frequency)))
    }

    fn system_matrix_deriv(
        &self,
        ops: &ModelOperators,
        _frequency: f64,
        u: &DVector<C64>,
        v: &DVector<C64>,
    ) -> Result<DVector<C64>> {
        let x = spmv_t(ops.curl(), &spmv(ops.mf_mui(), u));
        let y = spmv(ops.curl(), &ops.me_sigma_i_deriv(&x)?.apply(v));
        Ok(self.left(ops, y))
    }

    fn system_matrix_deriv_adjoint(
        &self,
        ops: &ModelOperators,
        _frequency: f64,
        u: &DVector<C64>,
        w: &DVector<C64>,
    ) -> Result<DVector<C64>> {
        let x = spmv_t(ops.curl(), &spmv(ops.mf_mui(), u));
        let w = self.left_adjoint(ops, w);
        Ok(ops.me_sigma_i_deriv(&x)?.apply_transpose(&spmv_t(ops.curl(), &w)))
    }

    fn rhs(&self, ops: &ModelOperators, _frequency: f64, terms: &SourceTerms) -> Result<DVector<C64>> {
        let rhs = &terms.s_m + spmv(ops.curl(), &spmv(ops.me_sigma_i(), &terms.s_e));
        Ok(self.left(ops, rhs))
    }

    fn rhs_deriv(&self, ctx: &FieldContext<'_>, v: &DVector<C64>) -> Result<Option<DVector<C64>>> {
        let ops = ctx.ops();
        let c = ops.curl();
        let conductivity = if ctx.terms.has_s_e() {
            Some(spmv(c, &ops.me_sigma_i_deriv(&ctx.terms.s_e)?.apply(v)))
        } else {
            None
        };
        let s_m = ctx.s_m_deriv(v, DerivMode::Forward)?;
        let s_e = ctx
            .s_e_deriv(v, DerivMode::Forward)?
            .map(|d| spmv(c, &spmv(ops.me_sigma_i(), &d)));
        Ok(sum_terms([conductivity, s_m, s_e]).map(|d| self.left(ops, d)))
    }

    fn rhs_deriv_adjoint(
        &self,
        ctx: &FieldContext<'_>,
        w: &DVector<C64>,
    ) -> Result<Option<DVector<C64>>> {
        let ops = ctx.ops();
        let c = ops.curl();
        let w = self.left_adjoint(ops, w);
        let ct_w = spmv_t(c, &w);
        let conductivity = if ctx.terms.has_s_e() {
            Some(ops.me_sigma_i_deriv(&ctx.terms.s_e)?.apply_transpose(&ct_w))
        } else {
            None
        };
        let s_m = ctx.s_m_deriv(&w, DerivMode::Adjoint)?;
        let s_e = ctx.s_e_deriv(&spmv_t(ops.me_sigma_i(), &ct_w), DerivMode::Adjoint)?;
        Ok(sum_terms([conductivity, s_m, s_e]))
    }
}

/// `Cᵀ M_f,μ⁻¹ b - S_e`, the edge current shared by the e and j rules.
fn edge_current(ctx: &FieldContext<'_>, b: &DVector<C64>) -> DVector<C64> {
    let ops = ctx.ops();
    spmv_t(ops.curl(), &spmv(ops.mf_mui(), b)) - &ctx.terms.s_e
}

// e = M_e,σ⁻¹ (Cᵀ M_f,μ⁻¹ b - S_e)

fn e_eval(ctx: &FieldContext<'_>, b: &DVector<C64>) -> Result<DVector<C64>> {
    Ok(spmv(ctx.ops().me_sigma_i(), &edge_current(ctx, b)))
}

fn e_deriv_u(ctx: &FieldContext<'_>, x: &DVector<C64>, mode: DerivMode) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    let factors = [
        Factor::Mat(ops.me_sigma_i()),
        Factor::Tr(ops.curl()),
        Factor::Mat(ops.mf_mui()),
    ];
    Ok(chain(&factors, x, mode))
}

fn e_deriv_m(
    ctx: &FieldContext<'_>,
    b: &DVector<C64>,
    v: &DVector<C64>,
    mode: DerivMode,
) -> Result<Option<DVector<C64>>> {
    let ops = ctx.ops();
    let deriv = ops.me_sigma_i_deriv(&edge_current(ctx, b))?;
    let out = match mode {
        DerivMode::Forward => {
            let mut out = deriv.apply(v);
            if let Some(d) = ctx.s_e_deriv(v, mode)? {
                out -= spmv(ops.me_sigma_i(), &d);
            }
            out
        }
        DerivMode::Adjoint => {
            let mut out = deriv.apply_transpose(v);
            if let Some(d) = ctx.s_e_deriv(&spmv_t(ops.me_sigma_i(), v), mode)? {
                out -= d;
            }
            out
        }
    };
    Ok(Some(out))
}

// j = Me⁻¹ (Cᵀ M_f,μ⁻¹ b - S_e)

fn j_eval(ctx: &FieldContext<'_>, b: &DVector<C64>) -> Result<DVector<C64>> {
    Ok(spmv(ctx.ops().me_i(), &edge_current(ctx, b)))
}

fn j_deriv_u(ctx: &FieldContext<'_>, x: &DVector<C64>, mode: DerivMode) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    let factors = [
        Factor::Mat(ops.me_i()),
        Factor::Tr(ops.curl()),
        Factor::Mat(ops.mf_mui()),
    ];
    Ok(chain(&factors, x, mode))
}

fn j_deriv_m(
    ctx: &FieldContext<'_>,
    _b: &DVector<C64>,
    v: &DVector<C64>,
    mode: DerivMode,
) -> Result<Option<DVector<C64>>> {
    let me_i = ctx.ops().me_i();
    let out = match mode {
        DerivMode::Forward => ctx.s_e_deriv(v, mode)?.map(|d| -spmv(me_i, &d)),
        DerivMode::Adjoint => ctx.s_e_deriv(&spmv_t(me_i, v), mode)?.map(|d| -d),
    };
    Ok(out)
}

// h = Mf⁻¹ M_f,μ⁻¹ b

fn h_eval(ctx: &FieldContext<'_>, b: &DVector<C64>) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    Ok(spmv(ops.mf_i(), &spmv(ops.mf_mui(), b)))
}

fn h_deriv_u(ctx: &FieldContext<'_>, x: &DVector<C64>, mode: DerivMode) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    Ok(chain(&[Factor::Mat(ops.mf_i()), Factor::Mat(ops.mf_mui())], x, mode))
}

fn h_deriv_m(
    _ctx: &FieldContext<'_>,
    _b: &DVector<C64>,
    _v: &DVector<C64>,
    _mode: DerivMode,
) -> Result<Option<DVector<C64>>> {
    Ok(None)
}
