//! Log-linear formula: `UR = 100·exp(a + b·ΔT)` with ΔT = TS − TU.

use super::{clamp_humidity, FormulaModel, ModelKind};
use crate::bounds::{BoundBox, Bounds};
use crate::dataset::PointDataset;
use ndarray::{array, Array1};

const PARAMETER_NAMES: [&str; 2] = ["a", "b"];

/// Smallest humidity fraction admitted to the logarithm of the initial regression.
const MIN_HUMIDITY_FRACTION: f64 = 1e-6;

/// Log-linear model with parameters `[a, b]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LogLinear;

impl LogLinear {
    /// Ordinary least squares of `ln(UR/100)` against ΔT.
    ///
    /// Returns `(intercept, slope)`, or `None` when ΔT has no spread.
    pub fn regression(dataset: &PointDataset) -> Option<(f64, f64)> {
        if dataset.is_empty() {
            return None;
        }
        let x = dataset.depressions();
        let y = dataset
            .humidity()
            .mapv(|ur| (ur / 100.0).clamp(MIN_HUMIDITY_FRACTION, 1.0).ln());
        let n = x.len() as f64;
        let x_mean = x.sum() / n;
        let y_mean = y.sum() / n;
        let sxx: f64 = x.iter().map(|&xi| (xi - x_mean).powi(2)).sum();
        if sxx <= f64::EPSILON {
            return None;
        }
        let sxy: f64 = x
            .iter()
            .zip(y.iter())
            .map(|(&xi, &yi)| (xi - x_mean) * (yi - y_mean))
            .sum();
        let slope = sxy / sxx;
        Some((y_mean - slope * x_mean, slope))
    }
}

impl FormulaModel for LogLinear {
    fn kind(&self) -> ModelKind {
        ModelKind::LogLinear
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &PARAMETER_NAMES
    }

    fn bounds(&self) -> BoundBox {
        BoundBox::new(vec![
            Bounds { min: -10.0, max: 10.0 },
            Bounds { min: -5.0, max: 5.0 },
        ])
    }

    fn default_initial_guess(&self) -> Array1<f64> {
        array![0.0, 0.0]
    }

    fn initial_guess(&self, dataset: &PointDataset) -> Array1<f64> {
        match Self::regression(dataset) {
            Some((a, b)) => self.bounds().clamp(&array![a, b]),
            None => {
                // No spread in ΔT: fit the level only
                let mean_log = dataset
                    .humidity()
                    .mapv(|ur| (ur / 100.0).clamp(MIN_HUMIDITY_FRACTION, 1.0).ln())
                    .mean()
                    .unwrap_or(0.0);
                self.bounds().clamp(&array![mean_log, 0.0])
            }
        }
    }

    fn evaluate(&self, ts: f64, tu: f64, params: &Array1<f64>) -> f64 {
        clamp_humidity(100.0 * (params[0] + params[1] * (ts - tu)).exp())
    }

    fn clamps_output(&self) -> bool {
        true
    }

    fn formula(&self) -> String {
        "UR = 100 * exp(a + b*(TS-TU))".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_evaluate_and_clamp() {
        let model = LogLinear;
        assert_relative_eq!(
            model.evaluate(30.0, 20.0, &array![-0.2, -0.05]),
            100.0 * (-0.7f64).exp()
        );
        assert_relative_eq!(model.evaluate(30.0, 20.0, &array![3.0, 0.1]), 100.0);
        assert_relative_eq!(model.evaluate(30.0, 20.0, &array![-10.0, -5.0]), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_regression_recovers_exact_line() {
        let (a, b): (f64, f64) = (-0.2, -0.06);
        let points: Vec<(f64, f64, f64)> = [2.0, 5.0, 8.0, 12.0]
            .iter()
            .map(|&dt| (40.0, 40.0 - dt, 100.0 * (a + b * dt).exp()))
            .collect();
        let dataset = PointDataset::from_triples(&points).unwrap();
        let (intercept, slope) = LogLinear::regression(&dataset).unwrap();
        assert_relative_eq!(intercept, a, epsilon = 1e-10);
        assert_relative_eq!(slope, b, epsilon = 1e-10);
        assert_relative_eq!(LogLinear.initial_guess(&dataset)[1], b, epsilon = 1e-10);
    }

    #[test]
    fn test_guess_handles_zero_humidity_and_no_spread() {
        let dataset = PointDataset::from_triples(&[
            (30.0, 20.0, 0.0),
            (35.0, 25.0, 50.0),
            (40.0, 30.0, 48.0),
            (45.0, 35.0, 52.0),
        ])
        .unwrap();
        assert!(LogLinear::regression(&dataset).is_none());
        let guess = LogLinear.initial_guess(&dataset);
        assert!(guess.iter().all(|v| v.is_finite()));
        assert_eq!(guess[1], 0.0);
        assert!(LogLinear.bounds().contains(&guess));
    }
}
