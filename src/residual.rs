//! Residuals of a formula model against calibration points.

use crate::dataset::PointDataset;
use crate::error::{PsyCalError, Result};
use crate::models::FormulaModel;
use crate::problem::Problem;
use ndarray::Array1;

/// Residual vector `r_i = UR_measured_i − model(TS_i, TU_i, params)`.
///
/// Holds the dataset columns as arrays so that repeated evaluations by a
/// solver do not re-collect them.
#[derive(Debug)]
pub struct ResidualEvaluator<'a> {
    model: &'a dyn FormulaModel,
    dry_bulb: Array1<f64>,
    wet_bulb: Array1<f64>,
    measured: Array1<f64>,
}

impl<'a> ResidualEvaluator<'a> {
    pub fn new(model: &'a dyn FormulaModel, dataset: &PointDataset) -> Self {
        Self {
            model,
            dry_bulb: dataset.dry_bulb(),
            wet_bulb: dataset.wet_bulb(),
            measured: dataset.humidity(),
        }
    }

    /// Build from separated TS, TU and UR arrays.
    pub fn from_columns(
        model: &'a dyn FormulaModel,
        dry_bulb: Array1<f64>,
        wet_bulb: Array1<f64>,
        measured: Array1<f64>,
    ) -> Result<Self> {
        if dry_bulb.len() != wet_bulb.len() || dry_bulb.len() != measured.len() {
            return Err(PsyCalError::DimensionMismatch(format!(
                "TS, TU and UR lengths differ: {}, {}, {}",
                dry_bulb.len(),
                wet_bulb.len(),
                measured.len()
            )));
        }
        Ok(Self {
            model,
            dry_bulb,
            wet_bulb,
            measured,
        })
    }

    pub fn model(&self) -> &dyn FormulaModel {
        self.model
    }

    /// Model predictions for every point.
    pub fn predict(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        self.model
            .evaluate_batch(&self.dry_bulb, &self.wet_bulb, params)
    }

    /// Measured humidities.
    pub fn measured(&self) -> &Array1<f64> {
        &self.measured
    }

    /// Residuals for every point.
    pub fn residuals(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        Ok(&self.measured - &self.predict(params)?)
    }

    /// Sum of squared residuals.
    pub fn sum_of_squares(&self, params: &Array1<f64>) -> Result<f64> {
        let r = self.residuals(params)?;
        Ok(r.dot(&r))
    }
}

impl Problem for ResidualEvaluator<'_> {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        self.residuals(params)
    }

    fn parameter_count(&self) -> usize {
        self.model.parameter_count()
    }

    fn residual_count(&self) -> usize {
        self.measured.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdiabaticRatio, LogLinear};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn dataset() -> PointDataset {
        PointDataset::from_triples(&[
            (30.0, 20.0, 45.0),
            (35.0, 25.0, 50.0),
            (40.0, 28.0, 48.0),
            (45.0, 30.0, 52.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_residual_sign_and_cost() {
        let data = dataset();
        let model = LogLinear;
        let evaluator = ResidualEvaluator::new(&model, &data);
        let params = array![-0.7, 0.0];
        let predicted = 100.0 * (-0.7f64).exp();
        let r = evaluator.residuals(&params).unwrap();
        assert_relative_eq!(r[0], 45.0 - predicted, epsilon = 1e-12);
        assert_relative_eq!(r[3], 52.0 - predicted, epsilon = 1e-12);

        let expected: f64 = data.humidity().iter().map(|u| (u - predicted).powi(2)).sum();
        assert_relative_eq!(evaluator.sum_of_squares(&params).unwrap(), expected, epsilon = 1e-9);
        assert_relative_eq!(evaluator.eval_cost(&params).unwrap(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_problem_dimensions() {
        let data = dataset();
        let model = AdiabaticRatio;
        let evaluator = ResidualEvaluator::new(&model, &data);
        assert_eq!(evaluator.parameter_count(), 1);
        assert_eq!(evaluator.residual_count(), 4);
        assert!(matches!(
            evaluator.eval(&array![1.0, 2.0]),
            Err(PsyCalError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_from_columns_checks_lengths() {
        let model = AdiabaticRatio;
        let result =
            ResidualEvaluator::from_columns(&model, array![30.0, 31.0], array![20.0], array![50.0]);
        assert!(matches!(result, Err(PsyCalError::DimensionMismatch(_))));
    }
}
