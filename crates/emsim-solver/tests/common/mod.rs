//! Shared fixtures for the solver integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use nalgebra::DVector;

use emsim_core::{Discretization, ExpMap, MassLocation, TensorMesh, rng};
use emsim_solver::{
    C64, Component, EquationLayout, FdemProblem, Formulation, MagDipole, Orientation,
    PointReceiver, ProblemConfig, PropertyMap, Quantity, Receiver, ScaledCurrent, Source, Survey,
};

pub const FREQUENCIES: [f64; 2] = [100.0, 1000.0];

/// 4×4×4 cells: two 5 m core cells and one padding cell on each side.
pub fn mesh() -> Arc<dyn Discretization> {
    Arc::new(TensorMesh::padded(5.0, [2, 2, 2], 1, 1.3).unwrap())
}

/// Log-conductivity between -3 and -1.
pub fn model(n: usize) -> DVector<f64> {
    rng::uniform_vector(11, n).map(|x| -3.0 + 2.0 * x)
}

/// Real and imaginary receivers of one quantity, away from the source.
pub fn receivers(quantity: Quantity) -> Vec<Arc<dyn Receiver>> {
    let locations = vec![[7.0, 3.0, 8.0], [-7.0, -3.0, 8.0], [3.0, -7.0, -8.0]];
    [
        (Orientation::X, Component::Real),
        (Orientation::Z, Component::Imag),
        (Orientation::Y, Component::Real),
    ]
    .into_iter()
    .map(|(orientation, component)| {
        Arc::new(PointReceiver::new(
            locations.clone(),
            quantity,
            orientation,
            component,
        )) as Arc<dyn Receiver>
    })
    .collect()
}

/// One vertical magnetic dipole per frequency.
pub fn dipole_survey(quantity: Quantity) -> Arc<Survey> {
    let sources = FREQUENCIES
        .iter()
        .map(|&f| {
            Arc::new(MagDipole::new(
                f,
                [0.0, 0.0, 0.0],
                Orientation::Z,
                1.0,
                receivers(quantity),
            )) as Arc<dyn Source>
        })
        .collect();
    Arc::new(Survey::new(sources).unwrap())
}

/// Where the electric source term lives for `formulation`.
pub fn s_e_location(formulation: Formulation) -> MassLocation {
    match formulation {
        Formulation::E | Formulation::B => EquationLayout::Eb.s_e_location(),
        Formulation::H | Formulation::J => EquationLayout::Hj.s_e_location(),
    }
}

/// A dipole plus a model-dependent current at each frequency.
pub fn mixed_survey(formulation: Formulation, quantity: Quantity) -> Arc<Survey> {
    let disc = mesh();
    let loc = s_e_location(formulation);
    let primary = rng::complex_vector(21, disc.n_at(loc)).map(|z| z * 1e-3);
    let mut sources: Vec<Arc<dyn Source>> = Vec::new();
    for &f in &FREQUENCIES {
        sources.push(Arc::new(MagDipole::new(
            f,
            [0.0, 0.0, 0.0],
            Orientation::Z,
            1.0,
            receivers(quantity),
        )));
        sources.push(Arc::new(ScaledCurrent::new(
            f,
            loc,
            primary.clone(),
            receivers(quantity),
        )));
    }
    Arc::new(Survey::new(sources).unwrap())
}

pub fn problem(formulation: Formulation, survey: Arc<Survey>, symmetric: bool) -> FdemProblem {
    let disc = mesh();
    let n = disc.n_cells();
    FdemProblem::new(
        formulation,
        disc,
        PropertyMap::Conductivity(Box::new(ExpMap::new(n))),
        survey,
        ProblemConfig::default().with_symmetric(symmetric),
    )
    .unwrap()
}

/// `[Re z; Im z]`, for Taylor tests of complex-valued maps.
pub fn stack(z: &DVector<C64>) -> DVector<f64> {
    let n = z.len();
    DVector::from_fn(2 * n, |i, _| if i < n { z[i].re } else { z[i - n].im })
}

/// Relative distance between two vectors.
pub fn rel_diff(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    (a - b).norm() / a.norm().max(b.norm()).max(f64::MIN_POSITIVE)
}

/// Quantities every FDEM formulation can produce.
pub const QUANTITIES: [Quantity; 4] = [Quantity::E, Quantity::B, Quantity::H, Quantity::J];

/// `(formulation, make_symmetric)` pairs worth testing.
pub fn variants() -> Vec<(Formulation, bool)> {
    vec![
        (Formulation::E, false),
        (Formulation::B, false),
        (Formulation::B, true),
        (Formulation::H, false),
        (Formulation::J, false),
        (Formulation::J, true),
    ]
}
