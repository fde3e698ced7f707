//! Configuration options for the local least-squares solvers.
//!
//! `LmConfig` drives the unconstrained Levenberg-Marquardt solver and
//! `TrustRegionConfig` the bounded trust-region solvers (reflective and
//! dogbox), including the curve-fit entry point.

use crate::error::{PsyCalError, Result};
use serde::{Deserialize, Serialize};

/// Method for solving the linear system of a damped step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionMethod {
    /// Cholesky decomposition (fastest but requires a positive definite matrix)
    Cholesky,

    /// SVD (slowest, handles rank-deficient matrices)
    Svd,

    /// Cholesky, falling back to SVD when the matrix is not positive definite
    #[default]
    Auto,
}

fn check_tolerance(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(PsyCalError::InvalidInput(format!(
            "{} must be a finite non-negative number, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Configuration options for the Levenberg-Marquardt algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Maximum number of accepted iterations. Default: 100
    pub max_iterations: usize,

    /// Tolerance for relative change in cost. Default: 1e-8
    pub ftol: f64,

    /// Tolerance for relative change in parameter values. Default: 1e-8
    pub xtol: f64,

    /// Tolerance for the max-norm of the gradient. Default: 1e-8
    pub gtol: f64,

    /// Initial value for the damping parameter. Default: 1e-3
    pub initial_lambda: f64,

    /// Factor by which to increase lambda. Default: 10.0
    pub lambda_up_factor: f64,

    /// Factor by which to decrease lambda. Default: 0.1
    pub lambda_down_factor: f64,

    /// Minimum value for lambda. Default: 1e-10
    pub min_lambda: f64,

    /// Maximum value for lambda. Default: 1e10
    pub max_lambda: f64,

    /// Method to use for solving the linear system. Default: Auto
    pub decomposition_method: DecompositionMethod,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            initial_lambda: 1e-3,
            lambda_up_factor: 10.0,
            lambda_down_factor: 0.1,
            min_lambda: 1e-10,
            max_lambda: 1e10,
            decomposition_method: DecompositionMethod::default(),
        }
    }
}

impl LmConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerances(mut self, ftol: f64, xtol: f64, gtol: f64) -> Self {
        self.ftol = ftol;
        self.xtol = xtol;
        self.gtol = gtol;
        self
    }

    pub fn with_decomposition_method(mut self, method: DecompositionMethod) -> Self {
        self.decomposition_method = method;
        self
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        check_tolerance("ftol", self.ftol)?;
        check_tolerance("xtol", self.xtol)?;
        check_tolerance("gtol", self.gtol)?;
        if self.max_iterations == 0 {
            return Err(PsyCalError::InvalidInput(
                "max_iterations must be positive".to_string(),
            ));
        }
        if !(self.min_lambda > 0.0 && self.min_lambda <= self.initial_lambda)
            || self.initial_lambda > self.max_lambda
        {
            return Err(PsyCalError::InvalidInput(format!(
                "lambda settings must satisfy 0 < min ({}) <= initial ({}) <= max ({})",
                self.min_lambda, self.initial_lambda, self.max_lambda
            )));
        }
        if self.lambda_up_factor <= 1.0 || !(0.0 < self.lambda_down_factor && self.lambda_down_factor < 1.0) {
            return Err(PsyCalError::InvalidInput(
                "lambda_up_factor must exceed 1 and lambda_down_factor must lie in (0, 1)"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration options for the bounded trust-region solvers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustRegionConfig {
    /// Cap on residual evaluations at trial points. `None` means `100 * n`
    /// for `n` parameters.
    pub max_evaluations: Option<usize>,

    /// Tolerance for relative change in cost. Default: 1e-8
    pub ftol: f64,

    /// Tolerance for relative step length. Default: 1e-8
    pub xtol: f64,

    /// Tolerance for the max-norm of the scaled gradient. Default: 1e-8
    pub gtol: f64,
}

impl Default for TrustRegionConfig {
    fn default() -> Self {
        Self {
            max_evaluations: None,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
        }
    }
}

impl TrustRegionConfig {
    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = Some(max_evaluations);
        self
    }

    pub fn with_tolerances(mut self, ftol: f64, xtol: f64, gtol: f64) -> Self {
        self.ftol = ftol;
        self.xtol = xtol;
        self.gtol = gtol;
        self
    }

    /// Evaluation cap for a problem with `n` parameters.
    pub fn evaluation_limit(&self, n: usize) -> usize {
        self.max_evaluations.unwrap_or(100 * n.max(1))
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        check_tolerance("ftol", self.ftol)?;
        check_tolerance("xtol", self.xtol)?;
        check_tolerance("gtol", self.gtol)?;
        if self.max_evaluations == Some(0) {
            return Err(PsyCalError::InvalidInput(
                "max_evaluations must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(LmConfig::default().validate().is_ok());
        assert!(TrustRegionConfig::default().validate().is_ok());
        assert_eq!(TrustRegionConfig::default().evaluation_limit(4), 400);
        assert_eq!(
            TrustRegionConfig::default()
                .with_max_evaluations(10_000)
                .evaluation_limit(4),
            10_000
        );
    }

    #[test]
    fn test_invalid_settings() {
        assert!(LmConfig::default().with_tolerances(-1.0, 1e-8, 1e-8).validate().is_err());
        assert!(LmConfig::default().with_max_iterations(0).validate().is_err());
        let config = TrustRegionConfig {
            max_evaluations: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let config: LmConfig = serde_json::from_str(r#"{"max_iterations": 50}"#).unwrap();
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.ftol, 1e-8);
        assert_eq!(config.decomposition_method, DecompositionMethod::Auto);

        let config: TrustRegionConfig = serde_json::from_str(r#"{"xtol": 1e-6}"#).unwrap();
        assert_eq!(config.xtol, 1e-6);
        assert_eq!(config.ftol, 1e-8);
        assert_eq!(config.max_evaluations, None);
    }
}
