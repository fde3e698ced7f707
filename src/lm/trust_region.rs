//! Step-size control for the local solvers.
//!
//! `TrustRegion` adapts a Levenberg-Marquardt damping parameter from the gain
//! ratio of each trial step. `TrustRadius` adapts an explicit radius for the
//! dogbox solver.

use super::config::LmConfig;

/// Ratio of actual to predicted cost reduction.
///
/// A non-positive prediction counts as full agreement when the cost still
/// went down and as no agreement otherwise.
pub fn gain_ratio(actual_reduction: f64, predicted_reduction: f64) -> f64 {
    if !actual_reduction.is_finite() {
        return f64::NEG_INFINITY;
    }
    if predicted_reduction > 0.0 {
        actual_reduction / predicted_reduction
    } else if actual_reduction > 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Damping controller for Levenberg-Marquardt style steps.
#[derive(Debug, Clone)]
pub struct TrustRegion {
    /// Current value of the damping parameter
    pub lambda: f64,

    /// Minimum allowed value for the damping parameter
    pub lambda_min: f64,

    /// Maximum allowed value for the damping parameter
    pub lambda_max: f64,

    /// Factor to increase lambda by when step is rejected
    pub lambda_increase_factor: f64,

    /// Factor to decrease lambda by when step is accepted
    pub lambda_decrease_factor: f64,

    /// Minimum gain ratio required to accept a step
    pub min_gain_ratio: f64,

    /// Gain ratio above which lambda is decreased
    pub good_gain_ratio: f64,
}

impl Default for TrustRegion {
    fn default() -> Self {
        Self {
            lambda: 1e-3,
            lambda_min: 1e-10,
            lambda_max: 1e10,
            lambda_increase_factor: 10.0,
            lambda_decrease_factor: 0.1,
            min_gain_ratio: 1e-3,
            good_gain_ratio: 0.75,
        }
    }
}

impl TrustRegion {
    /// Creates a controller with default factors and the given starting damping.
    pub fn new(initial_lambda: f64) -> Self {
        Self {
            lambda: initial_lambda,
            ..Default::default()
        }
    }

    /// Creates a controller from a Levenberg-Marquardt configuration.
    pub fn from_config(config: &LmConfig) -> Self {
        Self {
            lambda: config.initial_lambda,
            lambda_min: config.min_lambda,
            lambda_max: config.max_lambda,
            lambda_increase_factor: config.lambda_up_factor,
            lambda_decrease_factor: config.lambda_down_factor,
            ..Default::default()
        }
    }

    /// Updates the damping parameter based on the gain ratio.
    ///
    /// # Arguments
    ///
    /// * `gain_ratio` - The ratio of actual reduction to predicted reduction
    ///
    /// # Returns
    ///
    /// * Whether the step should be accepted
    pub fn update_lambda(&mut self, gain_ratio: f64) -> bool {
        if gain_ratio > self.min_gain_ratio {
            if gain_ratio > self.good_gain_ratio {
                self.lambda = (self.lambda * self.lambda_decrease_factor).max(self.lambda_min);
            }
            true
        } else {
            self.lambda = (self.lambda * self.lambda_increase_factor).min(self.lambda_max);
            false
        }
    }

    /// True once the damping cannot grow any further.
    pub fn is_saturated(&self) -> bool {
        self.lambda >= self.lambda_max
    }
}

/// Radius controller for explicit trust-region solvers.
#[derive(Debug, Clone)]
pub struct TrustRadius {
    /// Current radius
    pub radius: f64,
}

impl TrustRadius {
    /// Initial radius: the norm of the starting point, or 1 at the origin.
    pub fn for_start(x_norm: f64) -> Self {
        let radius = if x_norm > 0.0 && x_norm.is_finite() {
            x_norm
        } else {
            1.0
        };
        Self { radius }
    }

    /// Shrinks the radius after poor steps and expands it after good steps
    /// that were truncated by the region.
    ///
    /// # Arguments
    ///
    /// * `ratio` - Actual over predicted reduction
    /// * `step_norm` - Length of the step just tried
    /// * `hit_boundary` - Whether the step was cut by the trust region
    pub fn update(&mut self, ratio: f64, step_norm: f64, hit_boundary: bool) {
        if ratio < 0.25 {
            self.radius = 0.25 * step_norm;
        } else if ratio > 0.75 && hit_boundary {
            self.radius *= 2.0;
        }
    }
}
