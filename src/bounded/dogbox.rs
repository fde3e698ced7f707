//! Dogbox solver.
//!
//! A rectangular trust region intersected with the bounds. Variables sitting
//! on a bound with the gradient pushing them out are frozen for the
//! iteration; the remaining ones take a dogleg step between the Cauchy point
//! and the Gauss-Newton point.

use super::{check_dimensions, max_norm, norm};
use crate::bounds::{step_to_limits, BoundBox};
use crate::error::Result;
use crate::lm::algorithm::initial_residuals;
use crate::lm::{
    gain_ratio, ConvergenceCriteria, ConvergenceStatus, LmResult, LmStep, TrustRadius,
    TrustRegionConfig,
};
use crate::problem::{finite_cost, Problem};
use crate::utils::finite_difference;
use ndarray::{Array1, Array2, Axis};
use tracing::debug;

/// Relative distance under which a variable counts as sitting on a bound.
const ACTIVE_RTOL: f64 = 1e-10;

/// Bounded trust-region solver with a dogleg step in a box-shaped region.
#[derive(Debug, Clone, Default)]
pub struct Dogbox {
    config: TrustRegionConfig,
}

fn within(step: &Array1<f64>, lower: &Array1<f64>, upper: &Array1<f64>) -> bool {
    step.iter()
        .zip(lower.iter().zip(upper.iter()))
        .all(|(&s, (&lo, &hi))| lo <= s && s <= hi)
}

/// Dogleg step inside `[lower, upper]`, which must contain the origin.
///
/// Returns the step and whether the region cut it short.
fn dogleg(
    newton: &Array1<f64>,
    jacobian: &Array2<f64>,
    gradient: &Array1<f64>,
    lower: &Array1<f64>,
    upper: &Array1<f64>,
) -> (Array1<f64>, bool) {
    if within(newton, lower, upper) {
        return (newton.clone(), false);
    }

    let jg = jacobian.dot(gradient);
    let curvature = jg.dot(&jg);
    let t = if curvature > 0.0 {
        gradient.dot(gradient) / curvature
    } else {
        0.0
    };
    let cauchy = gradient * -t;

    let origin = Array1::zeros(cauchy.len());
    let t_cauchy = step_to_limits(&origin, &cauchy, lower, upper);
    if t_cauchy < 1.0 {
        return (cauchy * t_cauchy, true);
    }

    let direction = newton - &cauchy;
    let t_newton = step_to_limits(&cauchy, &direction, lower, upper).min(1.0);
    (&cauchy + &(direction * t_newton), true)
}

impl Dogbox {
    pub fn new(config: TrustRegionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrustRegionConfig {
        &self.config
    }

    /// Minimize the sum of squared residuals inside `bounds`.
    ///
    /// Iterates may land exactly on a bound. The starting point is clamped
    /// into the box.
    pub fn minimize<P: Problem + ?Sized>(
        &self,
        problem: &P,
        initial: &Array1<f64>,
        bounds: &BoundBox,
    ) -> Result<LmResult> {
        self.config.validate()?;
        let n = check_dimensions(problem, initial, bounds)?;
        let max_evals = self.config.evaluation_limit(n);
        let criteria = ConvergenceCriteria::new(
            self.config.xtol,
            self.config.ftol,
            self.config.gtol,
            usize::MAX,
        );
        let lower = bounds.lower();
        let upper = bounds.upper();

        let mut x = bounds.clamp(initial);
        let mut residuals = initial_residuals(problem, &x)?;
        let mut cost = finite_cost(&residuals);
        let mut func_evals = 1;
        let mut iterations = 0;
        let mut status = ConvergenceStatus::Running;
        let mut radius = TrustRadius::for_start(norm(&x));
        let mut jacobian =
            finite_difference::jacobian_within(problem, &x, &residuals, bounds, None)?;

        loop {
            let gradient = jacobian.t().dot(&residuals);
            let sides = bounds.active_sides(&x, ACTIVE_RTOL);
            let free: Vec<usize> = (0..n)
                .filter(|&i| {
                    !((sides[i] == -1 && gradient[i] > 0.0)
                        || (sides[i] == 1 && gradient[i] < 0.0))
                })
                .collect();
            let free_gradient = gradient.select(Axis(0), &free);

            if free.is_empty() || max_norm(&free_gradient) < self.config.gtol {
                status = ConvergenceStatus::GradientConvergence;
            } else if func_evals >= max_evals {
                status = ConvergenceStatus::MaxEvaluationsReached;
            }
            if status.is_terminated() {
                break;
            }

            let free_jacobian = jacobian.select(Axis(1), &free);
            let newton = LmStep::gauss_newton(&free_jacobian, &residuals)?;
            let x_norm = norm(&x);

            let mut accepted = None;
            while func_evals < max_evals {
                let box_lower: Array1<f64> = free
                    .iter()
                    .map(|&i| (lower[i] - x[i]).max(-radius.radius))
                    .collect();
                let box_upper: Array1<f64> = free
                    .iter()
                    .map(|&i| (upper[i] - x[i]).min(radius.radius))
                    .collect();
                let (free_step, truncated) = dogleg(
                    &newton,
                    &free_jacobian,
                    &free_gradient,
                    &box_lower,
                    &box_upper,
                );

                let mut step = Array1::zeros(n);
                for (k, &i) in free.iter().enumerate() {
                    step[i] = free_step[k];
                }
                let x_new = bounds.clamp(&(&x + &step));
                let step = &x_new - &x;

                let new_residuals = problem.eval(&x_new)?;
                func_evals += 1;
                let new_cost = finite_cost(&new_residuals);
                let actual_reduction = cost - new_cost;
                let predicted = LmStep::predicted_reduction(&jacobian, &residuals, &step);
                let ratio = gain_ratio(actual_reduction, predicted);
                let step_norm = norm(&step);
                radius.update(ratio, max_norm(&step), truncated);

                status = criteria.check_step(actual_reduction, cost, step_norm, x_norm, ratio);
                if actual_reduction > 0.0 {
                    accepted = Some((x_new, new_residuals, new_cost));
                    break;
                }
                if status.is_terminated() {
                    break;
                }
            }

            if let Some((x_new, new_residuals, new_cost)) = accepted {
                iterations += 1;
                debug!(
                    iterations,
                    cost = new_cost,
                    radius = radius.radius,
                    free = free.len(),
                    "dogbox step accepted"
                );
                x = x_new;
                residuals = new_residuals;
                cost = new_cost;
                if status.is_terminated() {
                    break;
                }
                jacobian =
                    finite_difference::jacobian_within(problem, &x, &residuals, bounds, None)?;
            } else if status.is_terminated() {
                break;
            }
        }

        Ok(LmResult::finish(
            x, residuals, cost, iterations, func_evals, status,
        ))
    }
}
