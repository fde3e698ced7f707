//! Convergence criteria for the local least-squares solvers.
//!
//! This module defines the termination states shared by the Levenberg-Marquardt
//! and bounded trust-region solvers and the tests that produce them.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Possible convergence states for an optimization algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// The algorithm is still running.
    Running,

    /// Converged due to a small parameter change.
    ParameterConvergence,

    /// Converged due to a small relative change in cost.
    FunctionValueConvergence,

    /// Both the parameter and cost tests passed on the same step.
    BothConvergence,

    /// Converged due to a small gradient.
    GradientConvergence,

    /// Terminated after the maximum number of iterations.
    MaxIterationsReached,

    /// Terminated after the maximum number of function evaluations.
    MaxEvaluationsReached,

    /// Terminated because no step could reduce the cost.
    NumericalError,
}

impl ConvergenceStatus {
    /// Returns true if the optimization has terminated (either converged or failed).
    pub fn is_terminated(&self) -> bool {
        !matches!(self, ConvergenceStatus::Running)
    }

    /// Returns true if the optimization has converged.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            ConvergenceStatus::ParameterConvergence
                | ConvergenceStatus::FunctionValueConvergence
                | ConvergenceStatus::BothConvergence
                | ConvergenceStatus::GradientConvergence
        )
    }

    /// Returns a description of the convergence status.
    pub fn description(&self) -> String {
        match self {
            ConvergenceStatus::Running => "Optimization is still running".to_string(),
            ConvergenceStatus::ParameterConvergence => {
                "`xtol` termination condition is satisfied.".to_string()
            }
            ConvergenceStatus::FunctionValueConvergence => {
                "`ftol` termination condition is satisfied.".to_string()
            }
            ConvergenceStatus::BothConvergence => {
                "Both `ftol` and `xtol` termination conditions are satisfied.".to_string()
            }
            ConvergenceStatus::GradientConvergence => {
                "`gtol` termination condition is satisfied.".to_string()
            }
            ConvergenceStatus::MaxIterationsReached => {
                "The maximum number of iterations is exceeded.".to_string()
            }
            ConvergenceStatus::MaxEvaluationsReached => {
                "The maximum number of function evaluations is exceeded.".to_string()
            }
            ConvergenceStatus::NumericalError => {
                "Failed to reduce the cost: damping reached its maximum.".to_string()
            }
        }
    }
}

/// Criteria for determining when an optimization algorithm has converged.
#[derive(Debug, Clone)]
pub struct ConvergenceCriteria {
    /// Tolerance for change in parameter values.
    pub xtol: f64,

    /// Tolerance for change in function value.
    pub ftol: f64,

    /// Tolerance for gradient norm.
    pub gtol: f64,

    /// Maximum number of iterations.
    pub max_iterations: usize,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            xtol: 1e-8,
            ftol: 1e-8,
            gtol: 1e-8,
            max_iterations: 100,
        }
    }
}

impl ConvergenceCriteria {
    /// Creates a new set of convergence criteria with the given tolerances.
    pub fn new(xtol: f64, ftol: f64, gtol: f64, max_iterations: usize) -> Self {
        Self {
            xtol,
            ftol,
            gtol,
            max_iterations,
        }
    }

    /// The parameter test shared by every local solver:
    /// `‖Δx‖ < xtol · (xtol + ‖x‖)`.
    pub fn is_small_step(&self, step_norm: f64, x_norm: f64) -> bool {
        step_norm < self.xtol * (self.xtol + x_norm)
    }

    /// [`Self::is_small_step`] for a move from `params` to `new_params`.
    pub fn is_small_change(&self, params: &Array1<f64>, new_params: &Array1<f64>) -> bool {
        let step = new_params - params;
        self.is_small_step(step.dot(&step).sqrt(), params.dot(params).sqrt())
    }

    /// Checks an accepted Levenberg-Marquardt step.
    ///
    /// # Arguments
    ///
    /// * `params` - The parameter values before the step
    /// * `new_params` - The parameter values after the step
    /// * `cost` - The cost before the step
    /// * `new_cost` - The cost after the step
    /// * `gradient_norm` - The max-norm of the gradient before the step
    /// * `iterations` - The number of accepted iterations so far
    ///
    /// # Returns
    ///
    /// * The convergence status
    pub fn check(
        &self,
        params: &Array1<f64>,
        new_params: &Array1<f64>,
        cost: f64,
        new_cost: f64,
        gradient_norm: f64,
        iterations: usize,
    ) -> ConvergenceStatus {
        if gradient_norm < self.gtol {
            return ConvergenceStatus::GradientConvergence;
        }

        let x_converged = self.is_small_change(params, new_params);
        let f_converged = (cost - new_cost).abs() / cost.max(1e-10) < self.ftol;
        match (f_converged, x_converged) {
            (true, true) => return ConvergenceStatus::BothConvergence,
            (false, true) => return ConvergenceStatus::ParameterConvergence,
            (true, false) => return ConvergenceStatus::FunctionValueConvergence,
            (false, false) => {}
        }

        if iterations >= self.max_iterations {
            return ConvergenceStatus::MaxIterationsReached;
        }

        ConvergenceStatus::Running
    }

    /// Checks a trust-region trial step.
    ///
    /// The cost test only counts when the step was a reasonable agreement
    /// between model and function (`ratio > 0.25`).
    ///
    /// # Arguments
    ///
    /// * `actual_reduction` - Cost decrease produced by the step
    /// * `cost` - Cost before the step
    /// * `step_norm` - Euclidean norm of the step
    /// * `x_norm` - Euclidean norm of the parameters before the step
    /// * `ratio` - Actual over predicted reduction
    pub fn check_step(
        &self,
        actual_reduction: f64,
        cost: f64,
        step_norm: f64,
        x_norm: f64,
        ratio: f64,
    ) -> ConvergenceStatus {
        let f_converged = actual_reduction < self.ftol * cost && ratio > 0.25;
        let x_converged = self.is_small_step(step_norm, x_norm);
        match (f_converged, x_converged) {
            (true, true) => ConvergenceStatus::BothConvergence,
            (true, false) => ConvergenceStatus::FunctionValueConvergence,
            (false, true) => ConvergenceStatus::ParameterConvergence,
            (false, false) => ConvergenceStatus::Running,
        }
    }
}
