//! Forward simulation and sensitivity products for one formulation.
//!
//! [`FdemProblem`] owns the discretization, property mapping, survey and
//! formulation kernel. Every public operation works frequency by frequency:
//! assemble `A(ω)`, factorize it once, and solve for all sources at that
//! frequency with a single multi-column solve.
//!
//! - [`FdemProblem::fields`] solves `A u = rhs` for every source.
//! - [`FdemProblem::jvec`] solves `A du = d(rhs)/dm v - d(A u)/dm v` and
//!   projects `df = ∂f/∂u du + ∂f/∂m v` onto the receivers.
//! - [`FdemProblem::jtvec`] back-projects the data residual, solves
//!   `Aᵀ λ = (∂f/∂u)ᵀ Pᵀ w` and accumulates
//!   `-(d(A u)/dm)ᵀ λ + (d(rhs)/dm)ᵀ λ + (∂f/∂m)ᵀ Pᵀ w`.
//!
//! Frequencies are independent and are processed on the rayon pool when
//! [`ParallelConfig::use_parallel`](crate::config::ParallelConfig::use_parallel)
//! allows it.

use std::ops::Range;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CscMatrix;
use rayon::prelude::*;

use emsim_core::Discretization;
use emsim_core::sparse::to_complex;

use crate::C64;
use crate::config::ProblemConfig;
use crate::error::{Error, Result};
use crate::fields::Fields;
use crate::formulation::{Formulation, FormulationKernel, sum_terms};
use crate::linear::{DenseLu, Factorization, LinearSolver};
use crate::model::{ModelOperators, PropertyMap};
use crate::survey::{Component, SourceContext, SourceTerms, Survey};

/// A frequency-domain EM problem: one formulation, mesh, model mapping and survey.
#[derive(Debug)]
pub struct FdemProblem {
    kernel: Box<dyn FormulationKernel>,
    disc: Arc<dyn Discretization>,
    property: PropertyMap,
    survey: Arc<Survey>,
    config: ProblemConfig,
    solver: Box<dyn LinearSolver>,
}

/// One adjoint right-hand side: all receivers of a source sharing a component.
struct AdjointColumn {
    src: usize,
    component: Component,
    du: DVector<C64>,
    dm: Option<DVector<C64>>,
}

impl FdemProblem {
    /// Create a problem solved with [`DenseLu`].
    pub fn new(
        formulation: Formulation,
        disc: Arc<dyn Discretization>,
        property: PropertyMap,
        survey: Arc<Survey>,
        config: ProblemConfig,
    ) -> Result<Self> {
        if property.n_output() != disc.n_cells() {
            return Err(Error::DimensionMismatch {
                expected: disc.n_cells(),
                actual: property.n_output(),
            });
        }
        if !(config.mu.is_finite() && config.mu > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "permeability must be positive, got {}",
                config.mu
            )));
        }
        Ok(Self {
            kernel: formulation.kernel(config.make_symmetric),
            disc,
            property,
            survey,
            config,
            solver: Box::new(DenseLu),
        })
    }

    /// Replace the linear solver.
    pub fn with_solver(mut self, solver: Box<dyn LinearSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn formulation(&self) -> Formulation {
        self.kernel.formulation()
    }

    pub fn kernel(&self) -> &dyn FormulationKernel {
        self.kernel.as_ref()
    }

    pub fn discretization(&self) -> &Arc<dyn Discretization> {
        &self.disc
    }

    pub fn survey(&self) -> &Arc<Survey> {
        &self.survey
    }

    pub fn config(&self) -> &ProblemConfig {
        &self.config
    }

    /// Length of the model vector.
    pub fn n_params(&self) -> usize {
        self.property.n_params()
    }

    /// Physical properties and mass matrices for model `m`.
    pub fn model_operators(&self, m: &DVector<f64>) -> Result<ModelOperators> {
        if m.len() != self.n_params() {
            return Err(Error::DimensionMismatch {
                expected: self.n_params(),
                actual: m.len(),
            });
        }
        ModelOperators::new(Arc::clone(&self.disc), &self.property, m, self.config.mu)
    }

    fn source_context<'a>(&self, ops: &'a ModelOperators, frequency: f64) -> SourceContext<'a> {
        SourceContext {
            ops,
            layout: self.kernel.layout(),
            frequency,
        }
    }

    /// Evaluated source terms of every source at `frequency`, tagged with its survey index.
    fn source_terms(
        &self,
        ops: &ModelOperators,
        frequency: f64,
    ) -> Result<Vec<(usize, SourceTerms)>> {
        let ctx = self.source_context(ops, frequency);
        self.survey
            .sources_at_frequency(frequency)
            .into_iter()
            .map(|idx| -> Result<(usize, SourceTerms)> {
                let terms = self.survey.source(idx)?.eval(&ctx)?;
                check_len(ctx.n_s_m(), terms.s_m.len())?;
                check_len(ctx.n_s_e(), terms.s_e.len())?;
                Ok((idx, terms))
            })
            .collect()
    }

    /// `(S_m, S_e)` with one column per source at `frequency`.
    pub fn get_source_term(
        &self,
        ops: &ModelOperators,
        frequency: f64,
    ) -> Result<(DMatrix<C64>, DMatrix<C64>)> {
        let ctx = self.source_context(ops, frequency);
        let terms = self.source_terms(ops, frequency)?;
        let mut s_m = DMatrix::zeros(ctx.n_s_m(), terms.len());
        let mut s_e = DMatrix::zeros(ctx.n_s_e(), terms.len());
        for (k, (_, t)) in terms.iter().enumerate() {
            s_m.set_column(k, &t.s_m);
            s_e.set_column(k, &t.s_e);
        }
        Ok((s_m, s_e))
    }

    /// System matrix `A(ω)` at `frequency`.
    pub fn system_matrix(&self, ops: &ModelOperators, frequency: f64) -> Result<CscMatrix<C64>> {
        self.kernel.system_matrix(ops, frequency)
    }

    /// Right-hand sides with one column per source at `frequency`.
    pub fn rhs(&self, ops: &ModelOperators, frequency: f64) -> Result<DMatrix<C64>> {
        let terms = self.source_terms(ops, frequency)?;
        let n = self.disc.n_at(self.kernel.primary_location());
        let mut rhs = DMatrix::zeros(n, terms.len());
        for (k, (_, t)) in terms.iter().enumerate() {
            rhs.set_column(k, &self.kernel.rhs(ops, frequency, t)?);
        }
        Ok(rhs)
    }

    fn factorize(&self, a: &CscMatrix<C64>, frequency: f64) -> Result<Box<dyn Factorization>> {
        log::debug!(
            "Factorizing {} system ({}x{}, {} nnz) at {} Hz",
            self.formulation(),
            a.nrows(),
            a.ncols(),
            a.nnz(),
            frequency
        );
        self.solver
            .factorize(a)
            .map_err(|e| e.at_frequency(frequency))
    }

    /// Run `f` once per survey frequency, in parallel when configured.
    fn map_frequencies<T, F>(&self, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(f64) -> Result<T> + Sync,
    {
        let frequencies = self.survey.frequencies();
        if self.config.parallel.use_parallel(frequencies.len()) {
            frequencies.par_iter().map(|&freq| f(freq)).collect()
        } else {
            frequencies.iter().map(|&freq| f(freq)).collect()
        }
    }

    /// Solve for the primary field of every source.
    pub fn fields(&self, m: &DVector<f64>) -> Result<Fields> {
        let ops = Arc::new(self.model_operators(m)?);
        log::info!(
            "Computing {} fields: {} frequencies, {} sources",
            self.formulation(),
            self.survey.frequencies().len(),
            self.survey.n_sources()
        );

        let solved = self.map_frequencies(|freq| self.solve_frequency(&ops, freq))?;

        let n = self.survey.n_sources();
        let mut solutions = vec![None; n];
        let mut terms = vec![None; n];
        for (idx, t, u) in solved.into_iter().flatten() {
            solutions[idx] = Some(u);
            terms[idx] = Some(t);
        }
        let missing = || Error::InvalidArgument("a source was not solved for".to_string());
        let solutions = solutions
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(missing)?;
        let terms = terms
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(missing)?;

        Ok(Fields::new(
            self.kernel.as_ref(),
            ops,
            Arc::clone(&self.survey),
            solutions,
            terms,
        ))
    }

    fn solve_frequency(
        &self,
        ops: &ModelOperators,
        frequency: f64,
    ) -> Result<Vec<(usize, SourceTerms, DVector<C64>)>> {
        let terms = self.source_terms(ops, frequency)?;
        let a = self.kernel.system_matrix(ops, frequency)?;
        let factor = self.factorize(&a, frequency)?;

        let mut rhs = DMatrix::zeros(a.nrows(), terms.len());
        for (k, (_, t)) in terms.iter().enumerate() {
            rhs.set_column(k, &self.kernel.rhs(ops, frequency, t)?);
        }
        let u = factor
            .solve(&rhs)
            .map_err(|e| e.at_frequency(frequency))?;

        Ok(terms
            .into_iter()
            .enumerate()
            .map(|(k, (idx, t))| (idx, t, u.column(k).into_owned()))
            .collect())
    }

    /// Reject fields that were not computed by this problem for model `m`.
    fn check_fields(&self, m: &DVector<f64>, fields: &Fields) -> Result<()> {
        if !Arc::ptr_eq(fields.survey(), &self.survey) {
            return Err(Error::InvalidArgument(
                "fields were computed for a different survey".to_string(),
            ));
        }
        if fields.formulation() != self.formulation() {
            return Err(Error::InvalidArgument(format!(
                "fields were computed with the {} formulation, the problem uses {}",
                fields.formulation(),
                self.formulation()
            )));
        }
        if fields.model() != m {
            return Err(Error::InvalidArgument(
                "fields were computed for a different model".to_string(),
            ));
        }
        Ok(())
    }

    /// Run `f` on the supplied fields, or on freshly computed ones.
    fn with_fields<T>(
        &self,
        m: &DVector<f64>,
        fields: Option<&Fields>,
        f: impl FnOnce(&Fields) -> Result<T>,
    ) -> Result<T> {
        match fields {
            Some(fields) => {
                self.check_fields(m, fields)?;
                f(fields)
            }
            None => f(&self.fields(m)?),
        }
    }

    /// Predicted data for model `m`.
    pub fn dpred(&self, m: &DVector<f64>, fields: Option<&Fields>) -> Result<DVector<f64>> {
        self.with_fields(m, fields, |fields| {
            let disc = fields.ops().discretization();
            let mut data = DVector::zeros(self.survey.n_data());
            for (src, source) in self.survey.sources().iter().enumerate() {
                for (rx_idx, rx) in source.receivers().iter().enumerate() {
                    let quantity = rx.quantity();
                    let f = fields.get(src, quantity)?;
                    let mut values = rx.project_field(disc, fields.location(quantity)?, &f)?;
                    if let Some(primary) = rx.primary_data(source.as_ref(), fields.ops().mu()) {
                        values += primary;
                    }
                    write_range(&mut data, self.survey.data_range(src, rx_idx), &values)?;
                }
            }
            Ok(data)
        })
    }

    /// Sensitivity times a model perturbation, `J v`.
    pub fn jvec(
        &self,
        m: &DVector<f64>,
        v: &DVector<f64>,
        fields: Option<&Fields>,
    ) -> Result<DVector<f64>> {
        check_len(self.n_params(), v.len())?;
        self.with_fields(m, fields, |fields| {
            log::info!(
                "Jvec ({} formulation): {} frequencies, {} data",
                self.formulation(),
                self.survey.frequencies().len(),
                self.survey.n_data()
            );
            let v_complex = to_complex(v);
            let parts =
                self.map_frequencies(|freq| self.jvec_frequency(fields, freq, v, &v_complex))?;

            let mut jv = DVector::zeros(self.survey.n_data());
            for (range, values) in parts.into_iter().flatten() {
                write_range(&mut jv, range, &values)?;
            }
            Ok(jv)
        })
    }

    fn jvec_frequency(
        &self,
        fields: &Fields,
        frequency: f64,
        v: &DVector<f64>,
        v_complex: &DVector<C64>,
    ) -> Result<Vec<(Range<usize>, DVector<f64>)>> {
        let ops = fields.ops();
        let sources = self.survey.sources_at_frequency(frequency);
        let a = self.kernel.system_matrix(ops, frequency)?;
        let factor = self.factorize(&a, frequency)?;

        let mut rhs = DMatrix::zeros(a.nrows(), sources.len());
        for (k, &src) in sources.iter().enumerate() {
            let u = fields.primary_solution(src)?;
            let mut col = -self.kernel.system_matrix_deriv(ops, frequency, u, v_complex)?;
            if let Some(d) = self.kernel.rhs_deriv(&fields.context(src)?, v_complex)? {
                col += d;
            }
            rhs.set_column(k, &col);
        }
        let du = factor
            .solve(&rhs)
            .map_err(|e| e.at_frequency(frequency))?;

        let disc = ops.discretization();
        let mut out = Vec::new();
        for (k, &src) in sources.iter().enumerate() {
            let du_src = du.column(k).into_owned();
            for (rx_idx, rx) in self.survey.sources()[src].receivers().iter().enumerate() {
                let quantity = rx.quantity();
                let df = fields.derivative(quantity, src, &du_src, v)?;
                let values = rx.project_field_deriv(disc, fields.location(quantity)?, &df)?;
                out.push((self.survey.data_range(src, rx_idx), values));
            }
        }
        Ok(out)
    }

    /// Transposed sensitivity times a data-space vector, `Jᵀ w`.
    pub fn jtvec(
        &self,
        m: &DVector<f64>,
        w: &DVector<f64>,
        fields: Option<&Fields>,
    ) -> Result<DVector<f64>> {
        check_len(self.survey.n_data(), w.len())?;
        self.with_fields(m, fields, |fields| {
            log::info!(
                "Jtvec ({} formulation): {} frequencies, {} data",
                self.formulation(),
                self.survey.frequencies().len(),
                self.survey.n_data()
            );
            let parts = self.map_frequencies(|freq| self.jtvec_frequency(fields, freq, w))?;
            Ok(parts
                .into_iter()
                .fold(DVector::zeros(self.n_params()), |acc, part| acc + part))
        })
    }

    fn jtvec_frequency(
        &self,
        fields: &Fields,
        frequency: f64,
        w: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let ops = fields.ops();
        let disc = ops.discretization();
        let mut columns = Vec::new();
        for src in self.survey.sources_at_frequency(frequency) {
            let receivers = self.survey.sources()[src].receivers();
            for component in [Component::Real, Component::Imag] {
                let mut du_t = None;
                let mut dm_t = None;
                for (rx_idx, rx) in receivers.iter().enumerate() {
                    if rx.component() != component {
                        continue;
                    }
                    let range = self.survey.data_range(src, rx_idx);
                    let w_rx = w.rows(range.start, range.len()).into_owned();
                    let quantity = rx.quantity();
                    let seed =
                        rx.project_field_deriv_adjoint(disc, fields.location(quantity)?, &w_rx)?;
                    let (du, dm) = fields.derivative_adjoint(quantity, src, &seed)?;
                    du_t = sum_terms([du_t, Some(du)]);
                    dm_t = sum_terms([dm_t, dm]);
                }
                if let Some(du) = du_t {
                    columns.push(AdjointColumn {
                        src,
                        component,
                        du,
                        dm: dm_t,
                    });
                }
            }
        }

        let mut acc = DVector::zeros(ops.n_params());
        if columns.is_empty() {
            return Ok(acc);
        }

        let a_t = self.kernel.system_matrix(ops, frequency)?.transpose();
        let factor = self.factorize(&a_t, frequency)?;
        let mut rhs = DMatrix::zeros(a_t.nrows(), columns.len());
        for (k, col) in columns.iter().enumerate() {
            rhs.set_column(k, &col.du);
        }
        let lambda = factor
            .solve(&rhs)
            .map_err(|e| e.at_frequency(frequency))?;

        for (k, col) in columns.iter().enumerate() {
            let lambda_k = lambda.column(k).into_owned();
            let u = fields.primary_solution(col.src)?;
            let mut x = -self
                .kernel
                .system_matrix_deriv_adjoint(ops, frequency, u, &lambda_k)?;
            if let Some(d) = self
                .kernel
                .rhs_deriv_adjoint(&fields.context(col.src)?, &lambda_k)?
            {
                x += d;
            }
            if let Some(d) = &col.dm {
                x += d;
            }
            acc += col.component.accumulate(&x);
        }
        Ok(acc)
    }
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::DimensionMismatch { expected, actual });
    }
    Ok(())
}

fn write_range(out: &mut DVector<f64>, range: Range<usize>, values: &DVector<f64>) -> Result<()> {
    check_len(range.len(), values.len())?;
    out.rows_mut(range.start, range.len()).copy_from(values);
    Ok(())
}
