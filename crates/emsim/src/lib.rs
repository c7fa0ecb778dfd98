//! # emsim
//!
//! Frequency-domain electromagnetic simulation on a 3D tensor mesh, with
//! Jacobian-vector products for inversion.
//!
//! emsim provides:
//! - Four discretizations of Maxwell's equations (e, b, h and j formulations)
//! - Magnetic dipole, raw-vector and conductivity-scaled sources
//! - Point receivers for the real or imaginary part of any field component
//! - `J v` and `Jᵀ w` through the adjoint method, one factorization per frequency
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use emsim::prelude::*;
//!
//! let mesh: Arc<dyn Discretization> = Arc::new(TensorMesh::uniform(10.0, [3, 3, 3]).unwrap());
//! let n = mesh.n_cells();
//!
//! let rx: Arc<dyn Receiver> = Arc::new(PointReceiver::new(
//!     vec![[5.0, 0.0, 10.0]],
//!     Quantity::B,
//!     Orientation::Z,
//!     Component::Real,
//! ));
//! let src: Arc<dyn Source> =
//!     Arc::new(MagDipole::new(100.0, [0.0, 0.0, 0.0], Orientation::Z, 1.0, vec![rx]));
//! let survey = Arc::new(Survey::new(vec![src]).unwrap());
//!
//! let problem = FdemProblem::new(
//!     Formulation::E,
//!     mesh,
//!     PropertyMap::Conductivity(Box::new(ExpMap::new(n))),
//!     survey,
//!     ProblemConfig::default(),
//! )
//! .unwrap();
//!
//! let m = DVector::from_element(n, (0.01f64).ln());
//! let data = problem.dpred(&m, None).unwrap();
//! assert_eq!(data.len(), 1);
//! ```

// Re-export member crates
pub use emsim_core as core;
pub use emsim_solver as solver;

pub use emsim_core::{
    ComboMap, Discretization, Error as CoreError, ExpMap, GridLocation, IdentityMap,
    InjectActiveCells, Mapping, MassLocation, ReciprocalMap, SurjectVertical1D, TensorMesh, MU_0,
};

pub use emsim_solver::{
    C64, Component, DenseLu, EquationLayout, Error as SolverError, FdemProblem, Fields,
    Formulation, FormulationKernel, LinearSolver, MagDipole, ModelOperators, Orientation,
    ParallelConfig, PointReceiver, ProblemConfig, PropertyMap, Quantity, RawVec, Receiver,
    ScaledCurrent, Source, SourceTerms, Survey, SurveyData, TaylorOptions, adjoint_identity,
    check_derivative,
};

/// Re-export of nalgebra's dynamic vector type.
pub use nalgebra::DVector;

/// Re-export of num_complex's Complex type.
pub use num_complex::Complex;

/// Prelude module containing commonly used types and traits.
///
/// ```rust
/// use emsim::prelude::*;
/// ```
pub mod prelude {
    // Mesh and model
    pub use crate::{Discretization, ExpMap, IdentityMap, Mapping, PropertyMap, TensorMesh};

    // Survey
    pub use crate::{
        Component, MagDipole, Orientation, PointReceiver, Quantity, RawVec, Receiver, Source,
        Survey,
    };

    // Problem
    pub use crate::{Fields, FdemProblem, Formulation, ProblemConfig};

    // Common external types
    pub use crate::{C64, DVector};
}
