//! Fields container: primary solutions plus typed derivation rules.
//!
//! A [`Fields`] holds one primary solution per source, computed for a single
//! model. Every other quantity is produced on demand by a [`FieldRule`]
//! registered by the formulation. A rule carries three functions: the value,
//! the derivative with respect to the primary solution, and the derivative
//! with respect to the model (which may be an algebraic zero).

use std::sync::Arc;

use nalgebra::DVector;

use emsim_core::sparse::to_complex;
use emsim_core::{MassLocation, omega};

use crate::C64;
use crate::error::{Error, Result};
use crate::formulation::{Formulation, FormulationKernel};
use crate::model::ModelOperators;
use crate::survey::{
    DerivMode, EquationLayout, Quantity, Source, SourceContext, SourceTerms, Survey,
};

/// Value of a derived quantity from the primary solution.
pub type EvalFn = fn(&FieldContext<'_>, &DVector<C64>) -> Result<DVector<C64>>;

/// `∂q/∂u · x` (forward) or `(∂q/∂u)ᵀ · x` (adjoint).
pub type DerivUFn = fn(&FieldContext<'_>, &DVector<C64>, DerivMode) -> Result<DVector<C64>>;

/// `∂q/∂m · x` (forward) or `(∂q/∂m)ᵀ · x` (adjoint), linearized at the primary
/// solution `u`; `None` when the quantity does not depend on the model directly.
pub type DerivMFn =
    fn(&FieldContext<'_>, &DVector<C64>, &DVector<C64>, DerivMode) -> Result<Option<DVector<C64>>>;

/// How one secondary quantity is derived from the primary solution.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub quantity: Quantity,
    pub location: MassLocation,
    pub eval: EvalFn,
    pub deriv_u: DerivUFn,
    pub deriv_m: DerivMFn,
}

/// Per-source inputs of a derivation rule.
#[derive(Debug, Clone, Copy)]
pub struct FieldContext<'a> {
    pub source: &'a dyn Source,
    pub terms: &'a SourceTerms,
    pub src_ctx: SourceContext<'a>,
}

impl FieldContext<'_> {
    pub fn ops(&self) -> &ModelOperators {
        self.src_ctx.ops
    }

    pub fn frequency(&self) -> f64 {
        self.src_ctx.frequency
    }

    /// `iω` at the source frequency.
    pub fn i_omega(&self) -> C64 {
        C64::new(0.0, omega(self.src_ctx.frequency))
    }

    pub fn s_m_deriv(&self, v: &DVector<C64>, mode: DerivMode) -> Result<Option<DVector<C64>>> {
        self.source.s_m_deriv(&self.src_ctx, v, mode)
    }

    pub fn s_e_deriv(&self, v: &DVector<C64>, mode: DerivMode) -> Result<Option<DVector<C64>>> {
        self.source.s_e_deriv(&self.src_ctx, v, mode)
    }
}

/// Primary solutions for every source of a survey, for one model.
#[derive(Debug)]
pub struct Fields {
    formulation: Formulation,
    primary: Quantity,
    primary_location: MassLocation,
    layout: EquationLayout,
    rules: &'static [FieldRule],
    ops: Arc<ModelOperators>,
    survey: Arc<Survey>,
    solutions: Vec<DVector<C64>>,
    terms: Vec<SourceTerms>,
}

impl Fields {
    pub(crate) fn new(
        kernel: &dyn FormulationKernel,
        ops: Arc<ModelOperators>,
        survey: Arc<Survey>,
        solutions: Vec<DVector<C64>>,
        terms: Vec<SourceTerms>,
    ) -> Self {
        Self {
            formulation: kernel.formulation(),
            primary: kernel.primary(),
            primary_location: kernel.primary_location(),
            layout: kernel.layout(),
            rules: kernel.rules(),
            ops,
            survey,
            solutions,
            terms,
        }
    }

    pub fn formulation(&self) -> Formulation {
        self.formulation
    }

    /// The model these fields were computed for.
    pub fn model(&self) -> &DVector<f64> {
        self.ops.model()
    }

    pub fn ops(&self) -> &Arc<ModelOperators> {
        &self.ops
    }

    pub fn survey(&self) -> &Arc<Survey> {
        &self.survey
    }

    pub fn n_sources(&self) -> usize {
        self.solutions.len()
    }

    /// Primary quantity of the formulation that produced these fields.
    pub fn primary(&self) -> Quantity {
        self.primary
    }

    fn rule(&self, quantity: Quantity) -> Result<&FieldRule> {
        self.rules
            .iter()
            .find(|r| r.quantity == quantity)
            .ok_or_else(|| Error::UnsupportedOperation {
                quantity: quantity.to_string(),
                formulation: self.formulation.to_string(),
            })
    }

    /// Where `quantity` lives in this formulation.
    pub fn location(&self, quantity: Quantity) -> Result<MassLocation> {
        if quantity == self.primary {
            return Ok(self.primary_location);
        }
        Ok(self.rule(quantity)?.location)
    }

    pub fn primary_solution(&self, src: usize) -> Result<&DVector<C64>> {
        self.solutions
            .get(src)
            .ok_or_else(|| Error::InvalidArgument(format!("no source with index {}", src)))
    }

    /// Inputs of the derivation rules for source `src`.
    pub fn context(&self, src: usize) -> Result<FieldContext<'_>> {
        let source = self.survey.source(src)?;
        let terms = self
            .terms
            .get(src)
            .ok_or_else(|| Error::InvalidArgument(format!("no source with index {}", src)))?;
        Ok(FieldContext {
            source,
            terms,
            src_ctx: SourceContext {
                ops: &self.ops,
                layout: self.layout,
                frequency: source.frequency(),
            },
        })
    }

    /// Value of `quantity` for source `src`.
    ///
    /// For a source with an analytic primary field (see
    /// [`Source::primary_field`]) this is the induced remainder only.
    pub fn get(&self, src: usize, quantity: Quantity) -> Result<DVector<C64>> {
        let u = self.primary_solution(src)?;
        if quantity == self.primary {
            return Ok(u.clone());
        }
        let rule = self.rule(quantity)?;
        (rule.eval)(&self.context(src)?, u)
    }

    /// `∂q/∂u · du + ∂q/∂m · v` for source `src`.
    pub fn derivative(
        &self,
        quantity: Quantity,
        src: usize,
        du: &DVector<C64>,
        v: &DVector<f64>,
    ) -> Result<DVector<C64>> {
        let u = self.primary_solution(src)?;
        check_len(u.len(), du)?;
        if v.len() != self.ops.n_params() {
            return Err(Error::DimensionMismatch {
                expected: self.ops.n_params(),
                actual: v.len(),
            });
        }
        if quantity == self.primary {
            return Ok(du.clone());
        }
        let rule = self.rule(quantity)?;
        let ctx = self.context(src)?;
        let mut out = (rule.deriv_u)(&ctx, du, DerivMode::Forward)?;
        if let Some(dm) = (rule.deriv_m)(&ctx, u, &to_complex(v), DerivMode::Forward)? {
            out += dm;
        }
        Ok(out)
    }

    /// `((∂q/∂u)ᵀ w, (∂q/∂m)ᵀ w)` for source `src`; the model part is `None`
    /// when the quantity does not depend on the model directly.
    pub fn derivative_adjoint(
        &self,
        quantity: Quantity,
        src: usize,
        w: &DVector<C64>,
    ) -> Result<(DVector<C64>, Option<DVector<C64>>)> {
        let u = self.primary_solution(src)?;
        if quantity == self.primary {
            check_len(u.len(), w)?;
            return Ok((w.clone(), None));
        }
        let rule = self.rule(quantity)?;
        let ctx = self.context(src)?;
        let n = self.ops.discretization().n_at(rule.location);
        check_len(n, w)?;
        let du = (rule.deriv_u)(&ctx, w, DerivMode::Adjoint)?;
        let dm = (rule.deriv_m)(&ctx, u, w, DerivMode::Adjoint)?;
        Ok((du, dm))
    }
}

fn check_len(expected: usize, v: &DVector<C64>) -> Result<()> {
    if v.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: v.len(),
        });
    }
    Ok(())
}
