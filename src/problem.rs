//! Problem definition trait.
//!
//! This module defines the `Problem` trait, which represents a nonlinear
//! least squares problem: a residual vector as a function of a parameter
//! vector. Every optimizer in the crate consumes this trait.

use crate::error::Result;
use ndarray::{Array1, Array2};

/// A trait representing a nonlinear least squares problem.
///
/// Residuals are expected to be finite for feasible parameters. Solvers treat
/// non-finite residuals at a trial point as a rejected step and non-finite
/// residuals at the starting point as an error.
pub trait Problem {
    /// Evaluate the residuals at the given parameters.
    ///
    /// # Arguments
    ///
    /// * `params` - The parameter values at which to evaluate the residuals
    ///
    /// # Returns
    ///
    /// * A vector of residuals, or an error if the evaluation fails
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Get the number of parameters in the problem.
    fn parameter_count(&self) -> usize;

    /// Get the number of residuals in the problem.
    fn residual_count(&self) -> usize;

    /// Evaluate the Jacobian matrix at the given parameters.
    ///
    /// The default implementation uses forward finite differences.
    ///
    /// # Arguments
    ///
    /// * `params` - The parameter values at which to evaluate the Jacobian
    ///
    /// # Returns
    ///
    /// * The Jacobian matrix, or an error if the evaluation fails
    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        crate::utils::finite_difference::jacobian(self, params, None)
    }

    /// Check if this problem provides a custom Jacobian implementation.
    fn has_custom_jacobian(&self) -> bool {
        false
    }

    /// Evaluate the sum of squared residuals at the given parameters.
    fn eval_cost(&self, params: &Array1<f64>) -> Result<f64> {
        let residuals = self.eval(params)?;
        Ok(residuals.iter().map(|r| r.powi(2)).sum())
    }
}

/// Sum of squared residuals, or `f64::INFINITY` when any residual is not finite.
///
/// Solvers use this to rank trial points so that a NaN never compares as an
/// improvement.
pub fn finite_cost(residuals: &Array1<f64>) -> f64 {
    let cost: f64 = residuals.iter().map(|r| r.powi(2)).sum();
    if cost.is_finite() {
        cost
    } else {
        f64::INFINITY
    }
}
