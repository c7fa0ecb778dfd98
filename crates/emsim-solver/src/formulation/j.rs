//! J formulation: current density on faces.
//!
//! `(C M_e,μ⁻¹ Cᵀ M_f,ρ + iω) j = C M_e,μ⁻¹ S_m - iω S_e`
//!
//! With `make_symmetric` both sides are left-multiplied by `M_f,ρᵀ`. That
//! factor depends on the model, so the symmetric system and right-hand side
//! pick up an extra derivative term.

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
pub struct JKernel {
    symmetric: bool,
}

impl JKernel {
    pub fn new(symmetric: bool) -> Self {
        Self { symmetric }
    }

    fn left(&self, ops: &ModelOperators, x: DVector<C64>) -> DVector<C64> {
        if self.symmetric {
            spmv_t(ops.mf_rho(), &x)
        } else {
            x
        }
    }

    fn left_adjoint(&self, ops: &ModelOperators, w: &DVector<C64>) -> DVector<C64> {
        if self.symmetric {
            spmv(ops.mf_rho(), w)
        } else {
            w.clone()
        }
    }

    /// `C M_e,μ⁻¹ Cᵀ x`.
    fn curl_curl(ops: &ModelOperators, x: &DVector<C64>) -> DVector<C64> {
        let c = ops.curl();
        spmv(c, &spmv(ops.me_mu_i(), &spmv_t(c, x)))
    }

    /// Unsymmetrized `A₀ u`.
    fn apply_unsymmetric(ops: &ModelOperators, frequency: f64, u: &DVector<C64>) -> DVector<C64> {
        Self::curl_curl(ops, &spmv(ops.mf_rho(), u)) + u * i_omega(frequency)
    }

    /// Unsymmetrized right-hand side `C M_e,μ⁻¹ S_m - iω S_e`.
    fn rhs_unsymmetric(ops: &ModelOperators, frequency: f64, terms: &SourceTerms) -> DVector<C64> {
        spmv(ops.curl(), &spmv(ops.me_mu_i(), &terms.s_m)) - &terms.s_e * i_omega(frequency)
    }
}

static RULES: [FieldRule; 3] = [
    FieldRule {
        quantity: Quantity::H,
        location: MassLocation::Edges,
        eval: h_eval,
        deriv_u: h_deriv_u,
        deriv_m: h_deriv_m,
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

impl FormulationKernel for JKernel {
    fn formulation(&self) -> Formulation {
        Formulation::J
    }

    fn primary(&self) -> Quantity {
        Quantity::J
    }

    fn primary_location(&self) -> MassLocation {
        MassLocation::Faces
    }

    fn layout(&self) -> EquationLayout {
        EquationLayout::Hj
    }

    fn rules(&self) -> &'static [FieldRule] {
        &RULES
    }

    fn system_matrix(&self, ops: &ModelOperators, frequency: f64) -> Result<CscMatrix<C64>> {
        let c = ops.curl();
        let curl_curl = &(&(c * ops.me_mu_i()) * &c.transpose()) * ops.mf_rho();
        let (k, m) = if self.symmetric {
            let left = ops.mf_rho().transpose();
            (&left * &curl_curl, left)
        } else {
            (curl_curl, sparse::identity(c.nrows()))
        };
        Ok(sparse::combine(&k, &m, i_omega(frequency)))
    }

    fn system_matrix_deriv(
        &self,
        ops: &ModelOperators,
        frequency: f64,
        u: &DVector<C64>,
        v: &DVector<C64>,
    ) -> Result<DVector<C64>> {
        let inner = Self::curl_curl(ops, &ops.mf_rho_deriv(u)?.apply(v));
        if !self.symmetric {
            return Ok(inner);
        }
        let a0u = Self::apply_unsymmetric(ops, frequency, u);
        Ok(ops.mf_rho_deriv(&a0u)?.apply(v) + spmv_t(ops.mf_rho(), &inner))
    }

    fn system_matrix_deriv_adjoint(
        &self,
        ops: &ModelOperators,
        frequency: f64,
        u: &DVector<C64>,
        w: &DVector<C64>,
    ) -> Result<DVector<C64>> {
        let c = ops.curl();
        let w_left = self.left_adjoint(ops, w);
        // (C M_e,μ⁻¹ Cᵀ)ᵀ = C M_e,μ⁻¹ᵀ Cᵀ
        let z = spmv(c, &spmv_t(ops.me_mu_i(), &spmv_t(c, &w_left)));
        let mut out = ops.mf_rho_deriv(u)?.apply_transpose(&z);
        if self.symmetric {
            let a0u = Self::apply_unsymmetric(ops, frequency, u);
            out += ops.mf_rho_deriv(&a0u)?.apply_transpose(w);
        }
        Ok(out)
    }

    fn rhs(&self, ops: &ModelOperators, frequency: f64, terms: &SourceTerms) -> Result<DVector<C64>> {
        Ok(self.left(ops, Self::rhs_unsymmetric(ops, frequency, terms)))
    }

    fn rhs_deriv(&self, ctx: &FieldContext<'_>, v: &DVector<C64>) -> Result<Option<DVector<C64>>> {
        let ops = ctx.ops();
        let iw = ctx.i_omega();
        let s_m = ctx
            .s_m_deriv(v, DerivMode::Forward)?
            .map(|d| spmv(ops.curl(), &spmv(ops.me_mu_i(), &d)));
        let s_e = ctx.s_e_deriv(v, DerivMode::Forward)?.map(|d| d * -iw);
        let sources = sum_terms([s_m, s_e]).map(|d| self.left(ops, d));
        let resistivity = if self.symmetric {
            let r0 = Self::rhs_unsymmetric(ops, ctx.frequency(), ctx.terms);
            Some(ops.mf_rho_deriv(&r0)?.apply(v))
        } else {
            None
        };
        Ok(sum_terms([resistivity, sources]))
    }

    fn rhs_deriv_adjoint(
        &self,
        ctx: &FieldContext<'_>,
        w: &DVector<C64>,
    ) -> Result<Option<DVector<C64>>> {
        let ops = ctx.ops();
        let iw = ctx.i_omega();
        let w_left = self.left_adjoint(ops, w);
        let s_m = ctx.s_m_deriv(
            &spmv_t(ops.me_mu_i(), &spmv_t(ops.curl(), &w_left)),
            DerivMode::Adjoint,
        )?;
        let s_e = ctx.s_e_deriv(&w_left, DerivMode::Adjoint)?.map(|d| d * -iw);
        let resistivity = if self.symmetric {
            let r0 = Self::rhs_unsymmetric(ops, ctx.frequency(), ctx.terms);
            Some(ops.mf_rho_deriv(&r0)?.apply_transpose(w))
        } else {
            None
        };
        Ok(sum_terms([s_m, s_e, resistivity]))
    }
}

// h = M_e,μ⁻¹ (S_m - Cᵀ M_f,ρ j) / iω

fn h_eval(ctx: &FieldContext<'_>, j: &DVector<C64>) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    let curl_term = spmv_t(ops.curl(), &spmv(ops.mf_rho(), j));
    Ok(spmv(ops.me_mu_i(), &(&ctx.terms.s_m - curl_term)) / ctx.i_omega())
}

fn h_deriv_u(ctx: &FieldContext<'_>, x: &DVector<C64>, mode: DerivMode) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    let factors = [
        Factor::Mat(ops.me_mu_i()),
        Factor::Tr(ops.curl()),
        Factor::Mat(ops.mf_rho()),
    ];
    Ok(chain(&factors, x, mode) / -ctx.i_omega())
}

fn h_deriv_m(
    ctx: &FieldContext<'_>,
    j: &DVector<C64>,
    v: &DVector<C64>,
    mode: DerivMode,
) -> Result<Option<DVector<C64>>> {
    let ops = ctx.ops();
    let c = ops.curl();
    let iw = ctx.i_omega();
    let deriv = ops.mf_rho_deriv(j)?;
    let out = match mode {
        DerivMode::Forward => {
            let mut x = -spmv_t(c, &deriv.apply(v));
            if let Some(d) = ctx.s_m_deriv(v, mode)? {
                x += d;
            }
            spmv(ops.me_mu_i(), &x) / iw
        }
        DerivMode::Adjoint => {
            let w = spmv_t(ops.me_mu_i(), v) / iw;
            let mut out = -deriv.apply_transpose(&spmv(c, &w));
            if let Some(d) = ctx.s_m_deriv(&w, mode)? {
                out += d;
            }
            out
        }
    };
    Ok(Some(out))
}

// e = Mf⁻¹ M_f,ρ j

fn e_eval(ctx: &FieldContext<'_>, j: &DVector<C64>) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    Ok(spmv(ops.mf_i(), &spmv(ops.mf_rho(), j)))
}

fn e_deriv_u(ctx: &FieldContext<'_>, x: &DVector<C64>, mode: DerivMode) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    Ok(chain(&[Factor::Mat(ops.mf_i()), Factor::Mat(ops.mf_rho())], x, mode))
}

fn e_deriv_m(
    ctx: &FieldContext<'_>,
    j: &DVector<C64>,
    v: &DVector<C64>,
    mode: DerivMode,
) -> Result<Option<DVector<C64>>> {
    let ops = ctx.ops();
    let deriv = ops.mf_rho_deriv(j)?;
    Ok(Some(match mode {
        DerivMode::Forward => spmv(ops.mf_i(), &deriv.apply(v)),
        DerivMode::Adjoint => deriv.apply_transpose(&spmv_t(ops.mf_i(), v)),
    }))
}

// b = Me⁻¹ M_e,μ h

fn b_eval(ctx: &FieldContext<'_>, j: &DVector<C64>) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    Ok(spmv(ops.me_i(), &spmv(ops.me_mu(), &h_eval(ctx, j)?)))
}

fn b_deriv_u(ctx: &FieldContext<'_>, x: &DVector<C64>, mode: DerivMode) -> Result<DVector<C64>> {
    let ops = ctx.ops();
    let scale = [Factor::Mat(ops.me_i()), Factor::Mat(ops.me_mu())];
    match mode {
        DerivMode::Forward => Ok(chain(&scale, &h_deriv_u(ctx, x, mode)?, mode)),
        DerivMode::Adjoint => h_deriv_u(ctx, &chain(&scale, x, mode), mode),
    }
}

fn b_deriv_m(
    ctx: &FieldContext<'_>,
    j: &DVector<C64>,
    v: &DVector<C64>,
    mode: DerivMode,
) -> Result<Option<DVector<C64>>> {
    let ops = ctx.ops();
    let scale = [Factor::Mat(ops.me_i()), Factor::Mat(ops.me_mu())];
    match mode {
        DerivMode::Forward => Ok(h_deriv_m(ctx, j, v, mode)?.map(|d| chain(&scale, &d, mode))),
        DerivMode::Adjoint => h_deriv_m(ctx, j, &chain(&scale, v, mode), mode),
    }
}
