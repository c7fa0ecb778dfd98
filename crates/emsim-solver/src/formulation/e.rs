//! E formulation: electric field on edges.
//!
//! `(Cᵀ M_f,μ⁻¹ C + iω M_e,σ) e = Cᵀ M_f,μ⁻¹ S_m - iω S_e`

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
pub struct EKernel;

static RULES: [FieldRule; 3] = [
    FieldRule {
        quantity: Quantity::B,
        location: MassLocation::Faces,
        eval: b_eval,
        deriv_u: b_deriv_u,
        deriv_m: b_deriv_m,
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

impl FormulationKernel for EKernel {
    fn formulation(&self) -> Formulation {
        Formulation::E
    }

    fn primary(&self) -> Quantity {
        Quantity::E
    }

    fn primary_location(&self) -> MassLocation {
        MassLocation::Edges
    }

    fn layout(&self) -> EquationLayout {
        EquationLayout::Eb
    }

    fn rules(&self) -> &'static [FieldRule] {
        &RULES
    }

    fn system_matrix(&self, ops: &ModelOperators, frequency: f64) -> Result<CscMatrix<C64>> {
        let c = ops.curl();
        let curl_curl = &(&c.transpose() * ops.mf_mui()) * c;
        Ok(sparse::combine(&curl_curl, ops.me_sigma(), i_omega(frequency)))
    }

    fn system_matrix_deriv(
        &self,
        ops: &ModelOperators,
        frequency: f64,
        u: &DVector<C64>,
        v: &DVector<C64>,
    ) -> Result<DVector<C64>> {
        Ok(ops.me_sigma_deriv(u)?.apply(v) * i_omega(frequency))
    }

    fn system_matrix_deriv_adjoint(
        &self,
        ops: &ModelOperators,
        frequency: f64,
        u: &DVector<C64>,
        w: &DVector<C64>,
    ) -> Result<DVector<C64>> {
        Ok(ops.me_sigma_deriv(u)?.apply_transpose(w) * i_omega(frequency))
    }

    fn rhs(&self, ops: &ModelOperators, frequency: f64, terms: &SourceTerms) -> Result<DVector<C64>> {
        let magnetic = spmv_t(ops.curl(), &spmv(ops.mf_mui(), &terms.s_m));
        Ok(magnetic - &terms.s_e * i_omega(frequency))
    }

    fn rhs_deriv(&self, ctx: &FieldContext<'_>, v: &DVector<C64>) -> Result<Option<DVector<C64>>> {
        let ops = ctx.ops();
        let iw = ctx.i_omega();
        let s_m = ctx
            .s_m_deriv(v, DerivMode::Forward)?
            .map(|d| spmv_t(ops.curl(), &spmv(ops.mf_mui(), &d)));
        let s_e = ctx.s_e_deriv(v, DerivMode::Forward)?.map(|d| d * -iw);
        Ok(sum_terms([s_m, s_e]))
    }

    fn rhs_deriv_adjoint(
        &self,
        ctx: &FieldContext<'_>,
        w: &DVector<C64>,
    ) -> Result<Option<DVector<C64>>> {
        let ops = ctx.ops();
        let iw = ctx.i_omega();
        let s_m = ctx.s_m_deriv(&spmv(ops.mf_mui(), &spmv(ops.curl(), w)), DerivMode::Adjoint)?;
        let s_e = ctx.s_e_deriv(w, DerivMode::Adjoint)?.map(|d| d * -iw);
        Ok(sum_terms([s_m, s_e]))
    }
}

// b = (S_m - C e) / iω

fn b_eval(ctx: &FieldContext<'_>, e: &DVector<C64>) -> Result<DVector<C64>> {
    Ok((&ctx.terms.s_m - spmv(ctx.ops().curl(), e)) / ctx.i_omega())
}

fn b_deriv_u(ctx: &FieldContext<'_>, x: &DVector<C64>, mode: DerivMode) -> Result<DVector<C64>> {
    Ok(chain(&[Factor::Mat(ctx.ops().curl())], x, mode) / -ctx.i_omega())
}

fn b_deriv_m(
    ctx: &FieldContext<'_>,
    _e: &DVector<C64>,
    v: &DVector<C64>,
    mode: DerivMode,
) -> Result<Option<DVector<C64>>> {
    let iw = ctx.i_omega();
    match mode {
        DerivMode::Forward => Ok(ctx.s_m_deriv(v, mode)?.map(|d| d / iw)),
        DerivMode::Adjoint => ctx.s_m_deriv(&(v / iw), mode),
    }
}

// j = Me⁻¹ M_e,σ e

fn j_eval(ctx: &FieldContext<'_>, e: &DVector<C64>) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    Ok(spmv(ops.me_i(), &spmv(ops.me_sigma(), e)))
}

fn j_deriv_u(ctx: &FieldContext<'_>, x: &DVector<C64>, mode: DerivMode) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    Ok(chain(&[Factor::Mat(ops.me_i()), Factor::Mat(ops.me_sigma())], x, mode))
}

fn j_deriv_m(
    ctx: &FieldContext<'_>,
    e: &DVector<C64>,
    v: &DVector<C64>,
    mode: DerivMode,
) -> Result<Option<DVector<C64>>> {
    let ops = ctx.ops();
    let deriv = ops.me_sigma_deriv(e)?;
    Ok(Some(match mode {
        DerivMode::Forward => spmv(ops.me_i(), &deriv.apply(v)),
        DerivMode::Adjoint => deriv.apply_transpose(&spmv_t(ops.me_i(), v)),
    }))
}

// h = Mf⁻¹ M_f,μ⁻¹ b

fn h_eval(ctx: &FieldContext<'_>, e: &DVector<C64>) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    Ok(spmv(ops.mf_i(), &spmv(ops.mf_mui(), &b_eval(ctx, e)?)))
}

fn h_deriv_u(ctx: &FieldContext<'_>, x: &DVector<C64>, mode: DerivMode) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    let scale = [Factor::Mat(ops.mf_i()), Factor::Mat(ops.mf_mui())];
    match mode {
        DerivMode::Forward => Ok(chain(&scale, &b_deriv_u(ctx, x, mode)?, mode)),
        DerivMode::Adjoint => b_deriv_u(ctx, &chain(&scale, x, mode), mode),
    }
}

fn h_deriv_m(
    ctx: &FieldContext<'_>,
    e: &DVector<C64>,
    v: &DVector<C64>,
    mode: DerivMode,
) -> Result<Option<DVector<C64>>> {
    let ops = ctx.ops();
    let scale = [Factor::Mat(ops.mf_i()), Factor::Mat(ops.mf_mui())];
    match mode {
        DerivMode::Forward => Ok(b_deriv_m(ctx, e, v, mode)?.map(|d| chain(&scale, &d, mode))),
        DerivMode::Adjoint => b_deriv_m(ctx, e, &chain(&scale, v, mode), mode),
    }
}
