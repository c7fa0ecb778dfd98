//! Discretization and property-model building blocks for emsim.
//!
//! This crate provides:
//! - A 3D tensor mesh with edge curl, averaging and interpolation operators
//! - Lumped property-weighted inner products and their derivatives
//! - Property mappings (log-conductivity, active-cell injection, ...)
//! - Sparse matrix helpers shared by the solver crate

pub mod discretization;
pub mod error;
pub mod maps;
pub mod mesh;
pub mod operator;
pub mod rng;
pub mod sparse;
pub mod units;

pub use discretization::{Discretization, InnerProductDeriv, MassLocation};
pub use error::{Error, Result};
pub use maps::{
    ComboMap, ExpMap, IdentityMap, InjectActiveCells, Mapping, ReciprocalMap, SurjectVertical1D,
};
pub use mesh::{GridLocation, TensorMesh};
pub use operator::ComplexOperator;
pub use units::{MU_0, omega};

/// Complex scalar used for all frequency-domain quantities.
pub type C64 = num_complex::Complex64;
