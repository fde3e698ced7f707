//! Curve fitting on separated data columns.

use super::reflective::TrustRegionReflective;
use crate::bounds::BoundBox;
use crate::error::{PsyCalError, Result};
use crate::lm::{ConvergenceStatus, LmResult, TrustRegionConfig};
use crate::models::FormulaModel;
use crate::problem::Problem;
use crate::residual::ResidualEvaluator;
use ndarray::Array1;

/// Default cap on residual evaluations for a curve fit.
pub const DEFAULT_MAX_EVALUATIONS: usize = 10_000;

/// A model fitted to `ydata` as a function of the `(TS, TU)` columns.
#[derive(Debug)]
pub struct CurveFitProblem<'a> {
    evaluator: ResidualEvaluator<'a>,
}

impl<'a> CurveFitProblem<'a> {
    /// Fails with `DimensionMismatch` when the three columns differ in length.
    pub fn new(
        model: &'a dyn FormulaModel,
        dry_bulb: Array1<f64>,
        wet_bulb: Array1<f64>,
        ydata: Array1<f64>,
    ) -> Result<Self> {
        Ok(Self {
            evaluator: ResidualEvaluator::from_columns(model, dry_bulb, wet_bulb, ydata)?,
        })
    }

    pub fn evaluator(&self) -> &ResidualEvaluator<'a> {
        &self.evaluator
    }
}

impl Problem for CurveFitProblem<'_> {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        self.evaluator.residuals(params)
    }

    fn parameter_count(&self) -> usize {
        self.evaluator.parameter_count()
    }

    fn residual_count(&self) -> usize {
        self.evaluator.residual_count()
    }
}

/// Bounded curve fit driven by the reflective trust-region solver.
///
/// Running out of evaluations is an error here rather than an unconverged
/// result.
#[derive(Debug, Clone)]
pub struct CurveFit {
    config: TrustRegionConfig,
}

impl Default for CurveFit {
    fn default() -> Self {
        Self {
            config: TrustRegionConfig::default().with_max_evaluations(DEFAULT_MAX_EVALUATIONS),
        }
    }
}

impl CurveFit {
    pub fn new(config: TrustRegionConfig) -> Self {
        Self { config }
    }

    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.config.max_evaluations = Some(max_evaluations);
        self
    }

    pub fn config(&self) -> &TrustRegionConfig {
        &self.config
    }

    /// Fit `problem` starting from `initial` inside `bounds`.
    pub fn fit<P: Problem + ?Sized>(
        &self,
        problem: &P,
        initial: &Array1<f64>,
        bounds: &BoundBox,
    ) -> Result<LmResult> {
        let mut result =
            TrustRegionReflective::new(self.config.clone()).minimize(problem, initial, bounds)?;
        if result.status == ConvergenceStatus::MaxEvaluationsReached {
            return Err(PsyCalError::ConvergenceFailure(format!(
                "Optimal parameters not found: {}",
                result.message
            )));
        }
        result.success = true;
        result.message = format!("Curve fit converged: {}", result.message);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogLinear;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn columns(a: f64, b: f64) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
        let ts = array![30.0, 35.0, 40.0, 45.0, 50.0];
        let tu = array![28.0, 30.0, 33.0, 35.0, 38.0];
        let ur = (&ts - &tu).mapv(|dt| 100.0 * (a + b * dt).exp());
        (ts, tu, ur)
    }

    #[test]
    fn test_fit_recovers_parameters() {
        let model = LogLinear;
        let (ts, tu, ur) = columns(-0.2, -0.06);
        let problem = CurveFitProblem::new(&model, ts, tu, ur).unwrap();
        let result = CurveFit::default()
            .fit(&problem, &array![-0.5, 0.0], &model.bounds())
            .unwrap();
        assert!(result.success);
        assert!(result.message.starts_with("Curve fit converged"));
        assert_relative_eq!(result.params[0], -0.2, epsilon = 1e-5);
        assert_relative_eq!(result.params[1], -0.06, epsilon = 1e-6);
    }

    #[test]
    fn test_evaluation_cap_is_an_error() {
        let model = LogLinear;
        let (ts, tu, ur) = columns(-0.2, -0.06);
        let problem = CurveFitProblem::new(&model, ts, tu, ur).unwrap();
        let result = CurveFit::default()
            .with_max_evaluations(1)
            .fit(&problem, &array![-0.5, 0.0], &model.bounds());
        match result {
            Err(PsyCalError::ConvergenceFailure(message)) => {
                assert!(message.starts_with("Optimal parameters not found"))
            }
            other => panic!("expected convergence failure, got {:?}", other),
        }
    }

    #[test]
    fn test_column_lengths_checked() {
        let model = LogLinear;
        let result = CurveFitProblem::new(&model, array![1.0, 2.0], array![1.0], array![1.0, 2.0]);
        assert!(matches!(result, Err(PsyCalError::DimensionMismatch(_))));
    }
}
