//! Trust Region Reflective solver.
//!
//! Each iteration scales the problem by the distance to the bound each
//! variable is heading for (Coleman-Li scaling) and solves a trust-region
//! subproblem of radius Δ in the scaled variables. A step that would leave
//! the box competes with its reflection off the first bound it crosses and
//! with a scaled steepest-descent step. Iterates stay strictly feasible.

use super::{check_dimensions, max_norm, norm};
use crate::bounds::{step_to_limits, BoundBox};
use crate::error::Result;
use crate::lm::algorithm::initial_residuals;
use crate::lm::{
    gain_ratio, ConvergenceCriteria, ConvergenceStatus, LmResult, TrustRadius,
    TrustRegionConfig, TrustRegionSubproblem,
};
use crate::problem::{finite_cost, Problem};
use crate::utils::finite_difference;
use ndarray::{s, Array1, Array2};
use tracing::debug;

/// Smallest fraction of the distance to a bound a truncated step covers.
const MIN_STEP_BACK: f64 = 0.995;

/// Steps longer than this fraction of Δ count as reaching the region edge.
const RADIUS_HIT: f64 = 0.95;

/// Bounded trust-region solver with reflective steps.
#[derive(Debug, Clone, Default)]
pub struct TrustRegionReflective {
    config: TrustRegionConfig,
}

/// Coleman-Li scaling vector and the sign of its derivative.
///
/// `v` is the distance to the bound the negative gradient points at, or 1
/// when that bound is infinite; `dv` is ±1 where `v` is a distance and 0
/// elsewhere.
fn scaling_vector(
    x: &Array1<f64>,
    gradient: &Array1<f64>,
    bounds: &BoundBox,
) -> (Array1<f64>, Array1<f64>) {
    let n = x.len();
    let mut v = Array1::ones(n);
    let mut dv = Array1::zeros(n);
    for (i, b) in bounds.bounds().iter().enumerate() {
        if gradient[i] < 0.0 && b.max.is_finite() {
            v[i] = b.max - x[i];
            dv[i] = -1.0;
        } else if gradient[i] > 0.0 && b.min.is_finite() {
            v[i] = x[i] - b.min;
            dv[i] = 1.0;
        }
    }
    (v, dv)
}

/// Quadratic model of the cost change over scaled steps `h`:
/// `hᵀ(J_hᵀJ_h + diag(c))h + 2 g_hᵀh`.
struct ScaledModel<'a> {
    jacobian: &'a Array2<f64>,
    gradient: &'a Array1<f64>,
    diagonal: &'a Array1<f64>,
}

impl ScaledModel<'_> {
    fn value(&self, h: &Array1<f64>) -> f64 {
        let jh = self.jacobian.dot(h);
        jh.dot(&jh) + (self.diagonal * h).dot(h) + 2.0 * self.gradient.dot(h)
    }

    /// Coefficients `(a, b, c)` of `t ↦ value(origin + t·direction)`.
    fn along(&self, origin: Option<&Array1<f64>>, direction: &Array1<f64>) -> (f64, f64, f64) {
        let jd = self.jacobian.dot(direction);
        let a = jd.dot(&jd) + (self.diagonal * direction).dot(direction);
        let mut b = 2.0 * self.gradient.dot(direction);
        let mut c = 0.0;
        if let Some(origin) = origin {
            let jo = self.jacobian.dot(origin);
            b += 2.0 * (jo.dot(&jd) + (self.diagonal * origin).dot(direction));
            c = self.value(origin);
        }
        (a, b, c)
    }
}

/// Minimize `a t² + b t + c` over `[lower, upper]`.
fn minimize_on_interval(a: f64, b: f64, c: f64, lower: f64, upper: f64) -> (f64, f64) {
    let mut candidates = vec![lower, upper];
    if a != 0.0 {
        let extremum = -0.5 * b / a;
        if lower < extremum && extremum < upper {
            candidates.push(extremum);
        }
    }
    candidates
        .into_iter()
        .map(|t| (t, a * t * t + b * t + c))
        .fold((lower, f64::INFINITY), |best, cand| if cand.1 < best.1 { cand } else { best })
}

/// Positive `t` with `‖origin + t·direction‖ = radius`, for `origin` inside
/// the region.
fn to_radius(origin: &Array1<f64>, direction: &Array1<f64>, radius: f64) -> f64 {
    let a = direction.dot(direction);
    if a == 0.0 {
        return f64::INFINITY;
    }
    let b = origin.dot(direction);
    let c = origin.dot(origin) - radius * radius;
    let discriminant = (b * b - a * c).max(0.0).sqrt();
    let q = -(b + discriminant.copysign(b));
    if q == 0.0 {
        return 0.0;
    }
    (q / a).max(c / q)
}

/// Turn the scaled trust-region step `p_h` into a feasible step.
///
/// A step that stays inside the box is taken as is. Otherwise three
/// candidates are compared on the model: the step cut to a fraction `theta`
/// of the way to the first bound it crosses, that step reflected off the
/// bound, and the scaled steepest-descent step.
///
/// Returns the step, the same step in scaled variables and the cost
/// reduction the model predicts for it.
fn select_step(
    x: &Array1<f64>,
    p_h: &Array1<f64>,
    d: &Array1<f64>,
    model: &ScaledModel<'_>,
    radius: f64,
    bounds: &BoundBox,
    theta: f64,
) -> (Array1<f64>, Array1<f64>, f64) {
    let p = d * p_h;
    if bounds.contains(&(x + &p)) {
        return (p, p_h.clone(), -model.value(p_h));
    }

    let lower = bounds.lower();
    let upper = bounds.upper();
    let p_stride = step_to_limits(x, &p, &lower, &upper);

    let mut r_h = p_h.clone();
    for i in 0..x.len() {
        let limit = if p[i] > 0.0 {
            upper[i]
        } else if p[i] < 0.0 {
            lower[i]
        } else {
            continue;
        };
        if ((limit - x[i]) / p[i]).max(0.0) <= p_stride {
            r_h[i] = -r_h[i];
        }
    }
    let p_h_bound = p_h * p_stride;
    let on_bound = x + &(&p * p_stride);

    let to_edge = to_radius(&p_h_bound, &r_h, radius);
    let to_bound = step_to_limits(&on_bound, &(d * &r_h), &lower, &upper);
    let r_stride = to_edge.min(to_bound);
    let (r_lower, r_upper) = if r_stride > 0.0 {
        let upper_stride = if r_stride == to_bound {
            theta * to_bound
        } else {
            to_edge
        };
        ((1.0 - theta) * p_stride / r_stride, upper_stride)
    } else {
        (0.0, -1.0)
    };
    let reflected = if r_lower <= r_upper {
        let (a, b, c) = model.along(Some(&p_h_bound), &r_h);
        let (t, value) = minimize_on_interval(a, b, c, r_lower, r_upper);
        Some((&p_h_bound + &(&r_h * t), value))
    } else {
        None
    };

    let truncated_h = &p_h_bound * theta;
    let truncated_value = model.value(&truncated_h);

    let descent_h = -model.gradient;
    let descent = d * &descent_h;
    let descent_to_edge = radius / norm(&descent_h);
    let descent_to_bound = step_to_limits(x, &descent, &lower, &upper);
    let descent_limit = if descent_to_bound < descent_to_edge {
        theta * descent_to_bound
    } else {
        descent_to_edge
    };
    let (a, b, _) = model.along(None, &descent_h);
    let (t, descent_value) = minimize_on_interval(a, b, 0.0, 0.0, descent_limit);
    let descent_h = descent_h * t;

    let reflected_value = reflected.as_ref().map_or(f64::INFINITY, |r| r.1);
    let (step_h, value) = if truncated_value < reflected_value && truncated_value < descent_value {
        (truncated_h, truncated_value)
    } else if reflected_value < truncated_value && reflected_value < descent_value {
        match reflected {
            Some((r_h, value)) => (r_h, value),
            None => (descent_h, descent_value),
        }
    } else {
        (descent_h, descent_value)
    };
    (d * &step_h, step_h, -value)
}

/// `[J·d; diag(√c)]`, the scaled Jacobian with the Coleman-Li curvature rows.
fn augmented_jacobian(scaled_jacobian: &Array2<f64>, diagonal: &Array1<f64>) -> Array2<f64> {
    let (m, n) = scaled_jacobian.dim();
    let mut augmented = Array2::zeros((m + n, n));
    augmented.slice_mut(s![..m, ..]).assign(scaled_jacobian);
    for (i, c) in diagonal.iter().enumerate() {
        augmented[[m + i, i]] = c.sqrt();
    }
    augmented
}

impl TrustRegionReflective {
    pub fn new(config: TrustRegionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrustRegionConfig {
        &self.config
    }

    /// Minimize the sum of squared residuals inside `bounds`.
    ///
    /// The starting point is clamped into the box and moved off any bound.
    ///
    /// # Arguments
    ///
    /// * `problem` - The problem to solve
    /// * `initial` - Initial guess for the parameter values
    /// * `bounds` - The feasible box
    ///
    /// # Returns
    ///
    /// * `Result<LmResult>` - The result of the optimization
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

        let mut x = bounds.make_strictly_feasible(initial);
        let mut residuals = initial_residuals(problem, &x)?;
        let mut cost = finite_cost(&residuals);
        let mut func_evals = 1;
        let mut iterations = 0;
        let mut status = ConvergenceStatus::Running;
        let mut radius = TrustRadius::for_start(norm(&x));
        let mut alpha = 0.0;
        let mut jacobian =
            finite_difference::jacobian_within(problem, &x, &residuals, bounds, None)?;

        loop {
            let gradient = jacobian.t().dot(&residuals);
            let (v, dv) = scaling_vector(&x, &gradient, bounds);
            let g_norm = max_norm(&(&gradient * &v));
            if g_norm < self.config.gtol {
                status = ConvergenceStatus::GradientConvergence;
            } else if func_evals >= max_evals {
                status = ConvergenceStatus::MaxEvaluationsReached;
            }
            if status.is_terminated() {
                break;
            }

            let d = v.mapv(f64::sqrt);
            let diagonal = &gradient * &dv;
            let scaled_gradient = &gradient * &d;
            let scaled_jacobian = &jacobian * &d;
            let mut augmented_residuals = Array1::zeros(residuals.len() + n);
            augmented_residuals
                .slice_mut(s![..residuals.len()])
                .assign(&residuals);
            let subproblem = TrustRegionSubproblem::new(
                &augmented_jacobian(&scaled_jacobian, &diagonal),
                &augmented_residuals,
            )?;
            let model = ScaledModel {
                jacobian: &scaled_jacobian,
                gradient: &scaled_gradient,
                diagonal: &diagonal,
            };
            let theta = (1.0 - g_norm).max(MIN_STEP_BACK);
            let x_norm = norm(&x);

            let mut accepted = None;
            while func_evals < max_evals {
                let (p_h, next_alpha) = subproblem.solve(radius.radius, alpha);
                alpha = next_alpha;
                let (step, step_h, predicted) =
                    select_step(&x, &p_h, &d, &model, radius.radius, bounds, theta);
                let x_new = bounds.make_strictly_feasible(&(&x + &step));

                let new_residuals = problem.eval(&x_new)?;
                func_evals += 1;
                let new_cost = finite_cost(&new_residuals);
                let actual_reduction = cost - new_cost;
                let ratio = gain_ratio(actual_reduction, predicted);
                let step_h_norm = norm(&step_h);
                let previous_radius = radius.radius;
                radius.update(ratio, step_h_norm, step_h_norm > RADIUS_HIT * previous_radius);

                status =
                    criteria.check_step(actual_reduction, cost, norm(&step), x_norm, ratio);
                if !status.is_terminated() && radius.radius > 0.0 {
                    alpha *= previous_radius / radius.radius;
                }
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
                debug!(iterations, cost = new_cost, radius = radius.radius, "trf step accepted");
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
