//! Core implementation of the Levenberg-Marquardt algorithm.
//!
//! The solver works on any [`Problem`] and does not know about parameter
//! bounds; callers that need feasibility clamp the result afterwards.

use super::config::LmConfig;
use super::convergence::{ConvergenceCriteria, ConvergenceStatus};
use super::step::LmStep;
use super::trust_region::{gain_ratio, TrustRegion};
use crate::error::{PsyCalError, Result};
use crate::problem::{finite_cost, Problem};
use ndarray::Array1;
use std::fmt;
use tracing::debug;

/// Result of a local least-squares optimization.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Optimized parameter values
    pub params: Array1<f64>,

    /// Residuals at the solution
    pub residuals: Array1<f64>,

    /// Sum of squared residuals
    pub cost: f64,

    /// Number of accepted iterations
    pub iterations: usize,

    /// Number of function evaluations
    pub func_evals: usize,

    /// Why the solver stopped
    pub status: ConvergenceStatus,

    /// Whether the optimization succeeded
    pub success: bool,

    /// A message describing the result
    pub message: String,
}

impl LmResult {
    pub(crate) fn finish(
        params: Array1<f64>,
        residuals: Array1<f64>,
        cost: f64,
        iterations: usize,
        func_evals: usize,
        status: ConvergenceStatus,
    ) -> Self {
        Self {
            params,
            residuals,
            cost,
            iterations,
            func_evals,
            success: status.is_converged(),
            message: status.description(),
            status,
        }
    }
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// Evaluate residuals at a starting point, failing when they are not finite.
pub(crate) fn initial_residuals<P: Problem + ?Sized>(
    problem: &P,
    params: &Array1<f64>,
) -> Result<Array1<f64>> {
    let residuals = problem.eval(params)?;
    if residuals.len() != problem.residual_count() {
        return Err(PsyCalError::DimensionMismatch(format!(
            "Expected {} residuals, got {}",
            problem.residual_count(),
            residuals.len()
        )));
    }
    if residuals.iter().any(|r| !r.is_finite()) {
        return Err(PsyCalError::FunctionEvaluation(
            "Residuals are not finite in the initial point".to_string(),
        ));
    }
    Ok(residuals)
}

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    /// Configuration options
    config: LmConfig,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt optimizer with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new Levenberg-Marquardt optimizer with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the initial value for the damping parameter.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.config.initial_lambda = lambda;
        self
    }

    /// Minimize the sum of squared residuals for the given problem.
    ///
    /// # Arguments
    ///
    /// * `problem` - The problem to solve
    /// * `initial_params` - Initial guess for the parameter values
    ///
    /// # Returns
    ///
    /// * `Result<LmResult>` - The result of the optimization
    pub fn minimize<P: Problem + ?Sized>(
        &self,
        problem: &P,
        initial_params: &Array1<f64>,
    ) -> Result<LmResult> {
        self.config.validate()?;
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params {
            return Err(PsyCalError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                n_params,
                initial_params.len()
            )));
        }

        let criteria = ConvergenceCriteria::new(
            self.config.xtol,
            self.config.ftol,
            self.config.gtol,
            self.config.max_iterations,
        );
        let mut trust_region = TrustRegion::from_config(&self.config);

        let mut params = initial_params.clone();
        let mut residuals = initial_residuals(problem, &params)?;
        let mut cost = finite_cost(&residuals);
        let mut iterations = 0;
        let mut func_evals = 1;

        loop {
            let jacobian = problem.jacobian(&params)?;
            func_evals += n_params;
            let gradient = jacobian.t().dot(&residuals);
            let gradient_norm = gradient.iter().fold(0.0, |m: f64, g| m.max(g.abs()));

            if gradient_norm < self.config.gtol {
                return Ok(LmResult::finish(
                    params,
                    residuals,
                    cost,
                    iterations,
                    func_evals,
                    ConvergenceStatus::GradientConvergence,
                ));
            }

            loop {
                let step = LmStep::calculate_step(
                    &jacobian,
                    &residuals,
                    trust_region.lambda,
                    self.config.decomposition_method,
                )?;
                let new_params = &params + &step.step;
                let new_residuals = problem.eval(&new_params)?;
                func_evals += 1;
                let new_cost = finite_cost(&new_residuals);
                let ratio = gain_ratio(cost - new_cost, step.predicted_reduction);

                if trust_region.update_lambda(ratio) && new_cost < cost {
                    iterations += 1;
                    let status = criteria.check(
                        &params,
                        &new_params,
                        cost,
                        new_cost,
                        gradient_norm,
                        iterations,
                    );
                    debug!(iterations, cost = new_cost, lambda = trust_region.lambda, "lm step accepted");
                    params = new_params;
                    residuals = new_residuals;
                    cost = new_cost;
                    if status.is_terminated() {
                        return Ok(LmResult::finish(
                            params, residuals, cost, iterations, func_evals, status,
                        ));
                    }
                    break;
                }

                if criteria.is_small_change(&params, &new_params) {
                    return Ok(LmResult::finish(
                        params,
                        residuals,
                        cost,
                        iterations,
                        func_evals,
                        ConvergenceStatus::ParameterConvergence,
                    ));
                }
                if trust_region.is_saturated() {
                    return Ok(LmResult::finish(
                        params,
                        residuals,
                        cost,
                        iterations,
                        func_evals,
                        ConvergenceStatus::NumericalError,
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    // Exponential decay y = a * exp(-b x)
    struct Decay {
        x: Array1<f64>,
        y: Array1<f64>,
    }

    impl Decay {
        fn new(a: f64, b: f64) -> Self {
            let x = Array1::linspace(0.0, 4.0, 12);
            let y = x.mapv(|xi| a * (-b * xi).exp());
            Self { x, y }
        }
    }

    impl Problem for Decay {
        fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(&self.y - &self.x.mapv(|xi| params[0] * (-params[1] * xi).exp()))
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            self.x.len()
        }
    }

    #[test]
    fn test_recovers_decay() {
        let problem = Decay::new(3.0, 0.7);
        let result = LevenbergMarquardt::new()
            .minimize(&problem, &array![1.0, 0.1])
            .unwrap();
        assert!(result.success, "{}", result);
        assert_relative_eq!(result.params[0], 3.0, epsilon = 1e-5);
        assert_relative_eq!(result.params[1], 0.7, epsilon = 1e-5);
        assert!(result.cost < 1e-10);
    }

    #[test]
    fn test_starting_at_solution() {
        let problem = Decay::new(2.0, 0.5);
        let result = LevenbergMarquardt::new()
            .minimize(&problem, &array![2.0, 0.5])
            .unwrap();
        assert!(result.success);
        assert_eq!(result.status, ConvergenceStatus::GradientConvergence);
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_iteration_cap() {
        let problem = Decay::new(3.0, 0.7);
        let result = LevenbergMarquardt::new()
            .with_max_iterations(1)
            .minimize(&problem, &array![1.0, 0.1])
            .unwrap();
        assert!(result.iterations <= 1);
        if !result.success {
            assert_eq!(result.status, ConvergenceStatus::MaxIterationsReached);
        }
    }

    #[test]
    fn test_errors() {
        let problem = Decay::new(3.0, 0.7);
        let lm = LevenbergMarquardt::new();
        assert!(matches!(
            lm.minimize(&problem, &array![1.0]),
            Err(PsyCalError::DimensionMismatch(_))
        ));
        assert!(matches!(
            lm.minimize(&problem, &array![f64::NAN, 0.1]),
            Err(PsyCalError::FunctionEvaluation(_))
        ));
    }
}
