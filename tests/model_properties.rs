//! Randomized checks of the formula models.

use ndarray::Array1;
use psycal_rs::psychrometry::saturation_pressure;
use psycal_rs::{ModelKind, PointDataset};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const TRIALS: usize = 500;

fn random_parameters(kind: ModelKind, rng: &mut ChaCha8Rng) -> Array1<f64> {
    let bounds = kind.build(55.0).bounds();
    bounds
        .pairs()
        .into_iter()
        .map(|(lo, hi)| rng.gen_range(lo..=hi))
        .collect()
}

fn random_reading(rng: &mut ChaCha8Rng) -> (f64, f64) {
    let ts = rng.gen_range(-10.0..=60.0);
    let tu = ts - rng.gen_range(0.0..=30.0);
    (ts, tu)
}

#[test]
fn test_clamped_models_stay_in_range() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    for kind in ModelKind::ALL {
        let model = kind.build(55.0);
        if !model.clamps_output() {
            continue;
        }
        for _ in 0..TRIALS {
            let params = random_parameters(kind, &mut rng);
            let (ts, tu) = random_reading(&mut rng);
            let ur = model.evaluate(ts, tu, &params);
            assert!(
                ur.is_finite() && (0.0..=100.0).contains(&ur),
                "{} gave {} at TS={} TU={} params={:?}",
                kind,
                ur,
                ts,
                tu,
                params.to_vec()
            );
        }
    }
}

#[test]
fn test_only_exponential_is_unclamped() {
    for kind in ModelKind::ALL {
        let model = kind.build(55.0);
        assert_eq!(
            model.clamps_output(),
            kind != ModelKind::ExponentialPsychrometric
        );
    }
}

#[test]
fn test_zero_depression_is_saturation() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let exponential = ModelKind::ExponentialPsychrometric.build(55.0);
    let adiabatic = ModelKind::AdiabaticRatio.build(55.0);
    for _ in 0..TRIALS {
        let t = rng.gen_range(0.0..=60.0);

        let params = random_parameters(ModelKind::ExponentialPsychrometric, &mut rng);
        let ur = exponential.evaluate(t, t, &params);
        assert!((ur - 100.0).abs() < 1e-9, "UR = {} at T = {}", ur, t);

        let k = rng.gen_range(0.1..=1.0);
        let ur = adiabatic.evaluate(t, t, &Array1::from(vec![k]));
        assert!((ur - 100.0 * k).abs() < 1e-9);
    }
}

#[test]
fn test_humidity_falls_with_depression() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let model = ModelKind::AdiabaticRatio.build(55.0);
    let params = Array1::from(vec![0.95]);
    for _ in 0..TRIALS {
        let ts = rng.gen_range(0.0..=60.0);
        let small = rng.gen_range(0.0..=10.0);
        let large = small + rng.gen_range(0.5..=10.0);
        assert!(
            model.evaluate(ts, ts - small, &params) > model.evaluate(ts, ts - large, &params)
        );
    }
}

#[test]
fn test_saturation_pressure_is_increasing() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..TRIALS {
        let t = rng.gen_range(-40.0..=80.0);
        assert!(saturation_pressure(t + 0.5) > saturation_pressure(t));
    }
}

#[test]
fn test_initial_guess_is_admissible() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    for kind in ModelKind::ALL {
        let model = kind.build(55.0);
        for _ in 0..20 {
            let triples: Vec<(f64, f64, f64)> = (0..6)
                .map(|_| {
                    let (ts, tu) = random_reading(&mut rng);
                    (ts, tu, rng.gen_range(5.0..=100.0))
                })
                .collect();
            let points = PointDataset::from_triples(&triples).unwrap();
            let guess = model.initial_guess(&points);
            assert_eq!(guess.len(), model.parameter_count());
            assert!(guess.iter().all(|v| v.is_finite()));
            assert!(model.bounds().contains(&guess), "{}: {:?}", kind, guess.to_vec());
        }
    }
}
