//! Benchmarks for forward and sensitivity solves.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use emsim_core::{Discretization, ExpMap, TensorMesh, rng};
use emsim_solver::{
    Component, FdemProblem, Formulation, MagDipole, Orientation, PointReceiver, ProblemConfig,
    PropertyMap, Quantity, Receiver, Source, Survey,
};

fn setup(formulation: Formulation, ncore: usize) -> (FdemProblem, nalgebra::DVector<f64>) {
    let disc: Arc<dyn Discretization> =
        Arc::new(TensorMesh::padded(5.0, [ncore, ncore, ncore], 1, 1.3).unwrap());
    let n = disc.n_cells();
    let rx: Arc<dyn Receiver> = Arc::new(PointReceiver::new(
        vec![[4.0, 2.0, 6.0], [-4.0, -2.0, 6.0]],
        Quantity::B,
        Orientation::Z,
        Component::Imag,
    ));
    let sources: Vec<Arc<dyn Source>> = [10.0, 100.0, 1000.0]
        .iter()
        .map(|&f| {
            Arc::new(MagDipole::new(
                f,
                [0.0, 0.0, 0.0],
                Orientation::Z,
                1.0,
                vec![Arc::clone(&rx)],
            )) as Arc<dyn Source>
        })
        .collect();
    let survey = Arc::new(Survey::new(sources).unwrap());
    let problem = FdemProblem::new(
        formulation,
        disc,
        PropertyMap::Conductivity(Box::new(ExpMap::new(n))),
        survey,
        ProblemConfig::default(),
    )
    .unwrap();
    let m = rng::uniform_vector(1, n).map(|x| -3.0 + 2.0 * x);
    (problem, m)
}

fn bench_fields(c: &mut Criterion) {
    let mut group = c.benchmark_group("fields");

    for formulation in Formulation::ALL {
        let (problem, m) = setup(formulation, 2);
        group.bench_with_input(
            BenchmarkId::from_parameter(formulation),
            &formulation,
            |bencher, _| {
                bencher.iter(|| problem.fields(black_box(&m)).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_sensitivities(c: &mut Criterion) {
    let mut group = c.benchmark_group("sensitivities");

    let (problem, m) = setup(Formulation::E, 2);
    let fields = problem.fields(&m).unwrap();
    let v = rng::gaussian_vector(2, problem.n_params());
    let w = rng::gaussian_vector(3, problem.survey().n_data());

    group.bench_function("jvec", |bencher| {
        bencher.iter(|| problem.jvec(&m, black_box(&v), Some(&fields)).unwrap());
    });
    group.bench_function("jtvec", |bencher| {
        bencher.iter(|| problem.jtvec(&m, black_box(&w), Some(&fields)).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_fields, bench_sensitivities);
criterion_main!(benches);
