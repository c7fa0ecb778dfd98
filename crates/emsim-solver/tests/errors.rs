//! Integration tests for error reporting.

mod common;

use std::sync::Arc;

use nalgebra::DVector;

use common::{dipole_survey, mesh, model, problem};
use emsim_core::{ExpMap, MassLocation, rng};
use emsim_solver::{
    C64, EquationLayout, Error, FdemProblem, Formulation, ProblemConfig, PropertyMap, Quantity,
    RawVec, Source, Survey,
};

#[test]
fn test_phi_is_unsupported_everywhere() {
    for formulation in Formulation::ALL {
        let problem = problem(formulation, dipole_survey(Quantity::Phi), false);
        let m = model(problem.n_params());
        let fields = problem.fields(&m).unwrap();

        match fields.get(0, Quantity::Phi) {
            Err(Error::UnsupportedOperation {
                quantity,
                formulation: name,
            }) => {
                assert_eq!(quantity, "phi");
                assert_eq!(name, formulation.name());
            }
            other => panic!("expected UnsupportedOperation, got {:?}", other),
        }
        assert!(matches!(
            problem.dpred(&m, Some(&fields)),
            Err(Error::UnsupportedOperation { .. })
        ));
        let v = DVector::zeros(problem.n_params());
        assert!(matches!(
            problem.jvec(&m, &v, Some(&fields)),
            Err(Error::UnsupportedOperation { .. })
        ));
    }
}

#[test]
fn test_unknown_quantity_name() {
    assert!(matches!(
        "curl".parse::<Quantity>(),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!("j".parse::<Quantity>().unwrap(), Quantity::J);
}

#[test]
fn test_model_length_is_checked() {
    let problem = problem(Formulation::E, dipole_survey(Quantity::E), false);
    let m = DVector::zeros(problem.n_params() + 1);
    assert!(matches!(
        problem.fields(&m),
        Err(Error::DimensionMismatch { .. })
    ));
}

#[test]
fn test_fields_from_another_problem_are_rejected() {
    let survey = dipole_survey(Quantity::H);
    let e = problem(Formulation::E, survey.clone(), false);
    let b = problem(Formulation::B, survey, false);
    let m = model(e.n_params());
    let fields = e.fields(&m).unwrap();
    let w = DVector::zeros(e.survey().n_data());
    assert!(matches!(
        b.jtvec(&m, &w, Some(&fields)),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_raw_source_layout_mismatch() {
    let disc = mesh();
    let n = disc.n_cells();
    let s_m = rng::complex_vector(1, disc.n_at(MassLocation::Faces));
    let s_e = DVector::<C64>::zeros(disc.n_at(MassLocation::Edges));
    let source: Arc<dyn Source> = Arc::new(RawVec::new(100.0, EquationLayout::Eb, s_m, s_e, Vec::new()));
    let survey = Arc::new(Survey::new(vec![source]).unwrap());

    let h = FdemProblem::new(
        Formulation::H,
        Arc::clone(&disc),
        PropertyMap::Conductivity(Box::new(ExpMap::new(n))),
        Arc::clone(&survey),
        ProblemConfig::default(),
    )
    .unwrap();
    let m = model(n);
    assert!(matches!(h.fields(&m), Err(Error::InvalidArgument(_))));

    let e = FdemProblem::new(
        Formulation::E,
        disc,
        PropertyMap::Conductivity(Box::new(ExpMap::new(n))),
        survey,
        ProblemConfig::default(),
    )
    .unwrap();
    let fields = e.fields(&m).unwrap();
    assert_eq!(fields.n_sources(), 1);
    // No receivers: no data, and an empty adjoint.
    assert_eq!(e.dpred(&m, Some(&fields)).unwrap().len(), 0);
    assert_eq!(
        e.jtvec(&m, &DVector::zeros(0), Some(&fields)).unwrap(),
        DVector::zeros(n)
    );
}

#[test]
fn test_invalid_configuration() {
    let disc = mesh();
    let n = disc.n_cells();
    let err = FdemProblem::new(
        Formulation::J,
        disc,
        PropertyMap::Resistivity(Box::new(ExpMap::new(n))),
        dipole_survey(Quantity::J),
        ProblemConfig::default().with_mu(-1.0),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}
