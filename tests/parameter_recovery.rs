//! Recovery of known parameters from noiseless synthetic data.

use ndarray::{array, Array1};
use psycal_rs::global_opt::{DeConfig, DifferentialEvolution, GlobalOptimizer};
use psycal_rs::residual::ResidualEvaluator;
use psycal_rs::synthetic::{generate, SyntheticGrid};
use psycal_rs::{Calibrator, FitMetrics, ModelKind, PointDataset};

const REFERENCE_TEMPERATURE: f64 = 55.0;

fn true_parameters(kind: ModelKind) -> Array1<f64> {
    match kind {
        ModelKind::ExponentialPsychrometric => array![6.112, 17.67, 243.5, 0.667],
        ModelKind::LogLinear => array![-0.2, -0.06],
        ModelKind::ModifiedPsychrometric => array![2.0, 0.05, -0.8, 12.0],
        ModelKind::AdiabaticRatio => array![0.9],
    }
}

fn synthetic_points(kind: ModelKind) -> PointDataset {
    let model = kind.build(REFERENCE_TEMPERATURE);
    generate(
        model.as_ref(),
        &true_parameters(kind),
        &SyntheticGrid::default(),
        0.0,
        0,
    )
    .unwrap()
}

fn initial_rmse(kind: ModelKind, points: &PointDataset) -> f64 {
    let model = kind.build(REFERENCE_TEMPERATURE);
    let guess = model.initial_guess(points);
    FitMetrics::compute(model.as_ref(), points, &guess)
        .unwrap()
        .rmse
}

#[test]
fn test_noiseless_parameters_are_recovered() {
    let calibrator = Calibrator::default();
    for kind in ModelKind::ALL {
        let points = synthetic_points(kind);
        let report = calibrator
            .calibrate(&points, kind, &["trf", "curve_fit"], None)
            .unwrap();
        for method in ["trf", "curve_fit"] {
            let result = report.get(method).unwrap();
            assert!(!result.fit.fallback, "{} {}: {}", kind, method, result.fit);
            assert!(result.fit.converged, "{} {}: {}", kind, method, result.fit);
            assert!(
                result.metrics.rmse < 1e-3,
                "{} {}: rmse {}",
                kind,
                method,
                result.metrics.rmse
            );
        }
    }
}

#[test]
fn test_differential_evolution_recovers_every_model() {
    let calibrator = Calibrator::default();
    for kind in ModelKind::ALL {
        let points = synthetic_points(kind);
        let report = calibrator
            .calibrate(&points, kind, &["differential_evolution"], None)
            .unwrap();
        let result = report.get("differential_evolution").unwrap();
        assert!(!result.fit.fallback, "{}: {}", kind, result.fit);
        // Nearly degenerate in A·exp(B·ΔT) + C·ΔT + D: shallow minima are acceptable
        let tolerance = if kind == ModelKind::ModifiedPsychrometric {
            0.5
        } else {
            1e-3
        };
        assert!(
            result.metrics.rmse < tolerance,
            "{}: rmse {}",
            kind,
            result.metrics.rmse
        );
    }
}

#[test]
fn test_polish_improves_modified_search() {
    let kind = ModelKind::ModifiedPsychrometric;
    let model = kind.build(REFERENCE_TEMPERATURE);
    let points = synthetic_points(kind);
    let evaluator = ResidualEvaluator::new(model.as_ref(), &points);
    let bounds = model.bounds();

    let raw = DifferentialEvolution::new(DeConfig::default().with_polish(false))
        .optimize(&evaluator, &bounds)
        .unwrap();
    let polished = DifferentialEvolution::default()
        .optimize(&evaluator, &bounds)
        .unwrap();
    assert!(polished.local_result.is_some());
    assert!(
        polished.cost < raw.cost,
        "polish {} vs search {}",
        polished.cost,
        raw.cost
    );
    assert!(bounds.contains(&polished.params));
}

#[test]
fn test_adiabatic_ratio_recovers_k() {
    let points = synthetic_points(ModelKind::AdiabaticRatio);
    let report = Calibrator::default()
        .calibrate(&points, ModelKind::AdiabaticRatio, &["trf", "dogbox", "lm"], None)
        .unwrap();
    for method in ["trf", "dogbox", "lm"] {
        let k = report.get(method).unwrap().fit.parameters[0];
        assert!((k - 0.9).abs() < 1e-4, "{}: K = {}", method, k);
    }
}

#[test]
fn test_exponential_starting_point_is_off() {
    // A and D only enter through D/A, so only the fitted curve is compared.
    let kind = ModelKind::ExponentialPsychrometric;
    let points = synthetic_points(kind);
    assert!(initial_rmse(kind, &points) > 1.0);
}

#[test]
fn test_noisy_data_stays_close() {
    let kind = ModelKind::LogLinear;
    let model = kind.build(REFERENCE_TEMPERATURE);
    let points = generate(
        model.as_ref(),
        &true_parameters(kind),
        &SyntheticGrid::default(),
        0.5,
        7,
    )
    .unwrap();
    let report = Calibrator::default()
        .calibrate(&points, kind, &["trf", "differential_evolution"], None)
        .unwrap();
    for method in ["trf", "differential_evolution"] {
        let result = report.get(method).unwrap();
        assert!(result.metrics.rmse < 1.5, "{}: rmse {}", method, result.metrics.rmse);
        assert!((result.fit.parameters[1] + 0.06).abs() < 0.01);
    }
}
