//! H formulation: magnetic field on edges.
//!
//! `(Cᵀ M_f,ρ C + iω M_e,μ) h = S_m + Cᵀ M_f,ρ S_e`

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
pub struct HKernel;

static RULES: [FieldRule; 3] = [
    FieldRule {
        quantity: Quantity::J,
        location: MassLocation::Faces,
        eval: j_eval,
        deriv_u: j_deriv_u,
        deriv_m: j_deriv_m,
    },
    FieldRule {
        quantity: Quantity::E,
        location: MassLocation::Faces,
        eval: e_eval,
        deriv_u: e_deriv_u,
        deriv_m: e_deriv_m,
    },
    FieldRule {
        quantity: Quantity::B,
        location: MassLocation::Edges,
        eval: b_eval,
        deriv_u: b_deriv_u,
        deriv_m: b_deriv_m,
    },
];

impl FormulationKernel for HKernel {
    fn formulation(&self) -> Formulation {
        Formulation::H
    }

    fn primary(&self) -> Quantity {
        Quantity::H
    }

    fn primary_location(&self) -> MassLocation {
        MassLocation::Edges
    }

    fn layout(&self) -> EquationLayout {
        EquationLayout::Hj
    }

    fn rules(&self) -> &'static [FieldRule] {
        &RULES
    }

    fn system_matrix(&self, ops: &ModelOperators, frequency: f64) -> Result<CscMatrix<C64>> {
        let c = ops.curl();
        let curl_curl = &(&c.transpose() * ops.mf_rho()) * c;
        Ok(sparse::combine(&curl_curl, ops.me_mu(), i_omega(frequency)))
    }

    fn system_matrix_deriv(
        &self,
        ops: &ModelOperators,
        _frequency: f64,
        u: &DVector<C64>,
        v: &DVector<C64>,
    ) -> Result<DVector<C64>> {
        let c = ops.curl();
        Ok(spmv_t(c, &ops.mf_rho_deriv(&spmv(c, u))?.apply(v)))
    }

    fn system_matrix_deriv_adjoint(
        &self,
        ops: &ModelOperators,
        _frequency: f64,
        u: &DVector<C64>,
        w: &DVector<C64>,
    ) -> Result<DVector<C64>> {
        let c = ops.curl();
        Ok(ops.mf_rho_deriv(&spmv(c, u))?.apply_transpose(&spmv(c, w)))
    }

    fn rhs(&self, ops: &ModelOperators, _frequency: f64, terms: &SourceTerms) -> Result<DVector<C64>> {
        Ok(&terms.s_m + spmv_t(ops.curl(), &spmv(ops.mf_rho(), &terms.s_e)))
    }

    fn rhs_deriv(&self, ctx: &FieldContext<'_>, v: &DVector<C64>) -> Result<Option<DVector<C64>>> {
        let ops = ctx.ops();
        let c = ops.curl();
        let s_m = ctx.s_m_deriv(v, DerivMode::Forward)?;
        let resistivity = if ctx.terms.has_s_e() {
            Some(spmv_t(c, &ops.mf_rho_deriv(&ctx.terms.s_e)?.apply(v)))
        } else {
            None
        };
        let s_e = ctx
            .s_e_deriv(v, DerivMode::Forward)?
            .map(|d| spmv_t(c, &spmv(ops.mf_rho(), &d)));
        Ok(sum_terms([s_m, resistivity, s_e]))
    }

    fn rhs_deriv_adjoint(
        &self,
        ctx: &FieldContext<'_>,
        w: &DVector<C64>,
    ) -> Result<Option<DVector<C64>>> {
        let ops = ctx.ops();
        let c_w = spmv(ops.curl(), w);
        let s_m = ctx.s_m_deriv(w, DerivMode::Adjoint)?;
        let resistivity = if ctx.terms.has_s_e() {
            Some(ops.mf_rho_deriv(&ctx.terms.s_e)?.apply_transpose(&c_w))
        } else {
            None
        };
        let s_e = ctx.s_e_deriv(&spmv_t(ops.mf_rho(), &c_w), DerivMode::Adjoint)?;
        Ok(sum_terms([s_m, resistivity, s_e]))
    }
}

// j = C h - S_e

fn j_eval(ctx: &FieldContext<'_>, h: &DVector<C64>) -> Result<DVector<C64>> {
    Ok(spmv(ctx.ops().curl(), h) - &ctx.terms.s_e)
}

fn j_deriv_u(ctx: &FieldContext<'_>, x: &DVector<C64>, mode: DerivMode) -> Result<DVector<C64>> {
    Ok(chain(&[Factor::Mat(ctx.ops().curl())], x, mode))
}

fn j_deriv_m(
    ctx: &FieldContext<'_>,
    _h: &DVector<C64>,
    v: &DVector<C64>,
    mode: DerivMode,
) -> Result<Option<DVector<C64>>> {
    Ok(ctx.s_e_deriv(v, mode)?.map(|d| -d))
}

// e = Mf⁻¹ M_f,ρ j

fn e_eval(ctx: &FieldContext<'_>, h: &DVector<C64>) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    Ok(spmv(ops.mf_i(), &spmv(ops.mf_rho(), &j_eval(ctx, h)?)))
}

fn e_deriv_u(ctx: &FieldContext<'_>, x: &DVector<C64>, mode: DerivMode) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    let factors = [
        Factor::Mat(ops.mf_i()),
        Factor::Mat(ops.mf_rho()),
        Factor::Mat(ops.curl()),
    ];
    Ok(chain(&factors, x, mode))
}

fn e_deriv_m(
    ctx: &FieldContext<'_>,
    h: &DVector<C64>,
    v: &DVector<C64>,
    mode: DerivMode,
) -> Result<Option<DVector<C64>>> {
    let ops = ctx.ops();
    let deriv = ops.mf_rho_deriv(&j_eval(ctx, h)?)?;
    let out = match mode {
        DerivMode::Forward => {
            let mut x = deriv.apply(v);
            if let Some(d) = ctx.s_e_deriv(v, mode)? {
                x -= spmv(ops.mf_rho(), &d);
            }
            spmv(ops.mf_i(), &x)
        }
        DerivMode::Adjoint => {
            let w = spmv_t(ops.mf_i(), v);
            let mut out = deriv.apply_transpose(&w);
            if let Some(d) = ctx.s_e_deriv(&spmv_t(ops.mf_rho(), &w), mode)? {
                out -= d;
            }
            out
        }
    };
    Ok(Some(out))
}

// b = Me⁻¹ M_e,μ h

fn b_eval(ctx: &FieldContext<'_>, h: &DVector<C64>) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    Ok(spmv(ops.me_i(), &spmv(ops.me_mu(), h)))
}

fn b_deriv_u(ctx: &FieldContext<'_>, x: &DVector<C64>, mode: DerivMode) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    Ok(chain(&[Factor::Mat(ops.me_i()), Factor::Mat(ops.me_mu())], x, mode))
}

fn b_deriv_m(
    _ctx: &FieldContext<'_>,
    _h: &DVector<C64>,
    _v: &DVector<C64>,
    _mode: DerivMode,
) -> Result<Option<DVector<C64>>> {
    Ok(None)
}
