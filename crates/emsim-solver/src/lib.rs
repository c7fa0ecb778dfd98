//! Frequency-domain electromagnetic simulation and sensitivities.
//!
//! This crate provides:
//! - Four formulations of the discrete Maxwell system (primary unknown e, b, h or j)
//! - Forward fields and predicted data for a survey of sources and receivers
//! - Jacobian-vector products `J v` and `Jᵀ w` without forming `J`
//! - Taylor and adjoint checks for derivative implementations

pub mod config;
pub mod error;
pub mod fields;
pub mod formulation;
pub mod linear;
pub mod model;
pub mod problem;
pub mod survey;
pub mod verify;

pub use config::{ParallelConfig, ProblemConfig};
pub use error::{Error, Result};
pub use fields::{FieldContext, FieldRule, Fields};
pub use formulation::{BKernel, EKernel, Formulation, FormulationKernel, HKernel, JKernel};
pub use linear::{DenseLu, Factorization, LinearSolver, solve_complex};
pub use model::{ModelOperators, PropertyDeriv, PropertyMap};
pub use problem::FdemProblem;
pub use survey::{
    Component, DerivMode, EquationLayout, MagDipole, Orientation, PointReceiver, Quantity, RawVec,
    Receiver, ScaledCurrent, Source, SourceContext, SourceTerms, Survey, SurveyData,
};
pub use verify::{DerivativeCheck, TaylorOptions, adjoint_identity, check_derivative};

pub use emsim_core::C64;
