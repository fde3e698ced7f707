//! Bounded nonlinear least squares.
//!
//! Two trust-region solvers that keep every iterate inside a [`BoundBox`]:
//!
//! * [`TrustRegionReflective`]: Coleman-Li scaled trust-region steps with
//!   reflection off the bounds. The default backend.
//! * [`Dogbox`]: rectangular trust region with a dogleg step over the
//!   variables that are not pinned on a bound.
//!
//! [`CurveFit`] is the curve-fitting entry point on separated data columns.

mod curve_fit;
mod dogbox;
mod reflective;

pub use curve_fit::{CurveFit, CurveFitProblem, DEFAULT_MAX_EVALUATIONS};
pub use dogbox::Dogbox;
pub use reflective::TrustRegionReflective;

use crate::bounds::BoundBox;
use crate::error::{PsyCalError, Result};
use crate::problem::Problem;
use ndarray::Array1;

fn check_dimensions<P: Problem + ?Sized>(
    problem: &P,
    initial: &Array1<f64>,
    bounds: &BoundBox,
) -> Result<usize> {
    let n = problem.parameter_count();
    if initial.len() != n {
        return Err(PsyCalError::DimensionMismatch(format!(
            "Expected {} parameters, got {}",
            n,
            initial.len()
        )));
    }
    bounds.check_len(n)?;
    Ok(n)
}

fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

fn max_norm(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0, |m: f64, x| m.max(x.abs()))
}
