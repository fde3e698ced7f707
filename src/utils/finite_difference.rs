//! Finite difference methods for numerical differentiation.
//!
//! Forward differences with a step scaled to the parameter magnitude. The
//! bounded variant flips the step direction for components where a forward
//! step would leave the feasible box.

use crate::bounds::BoundBox;
use crate::error::{PsyCalError, Result};
use crate::problem::Problem;
use ndarray::{Array1, Array2};

/// Default relative step size for finite differences (square root of machine epsilon).
pub const DEFAULT_EPSILON: f64 = 1.4901161193847656e-8;

/// Compute the Jacobian matrix using forward finite differences.
///
/// J[i,j] = ∂residual[i]/∂param[j].
///
/// # Arguments
///
/// * `problem` - The problem to evaluate
/// * `params` - The parameter values at which to evaluate the Jacobian
/// * `epsilon` - The relative step size (optional)
///
/// # Returns
///
/// * `Result<Array2<f64>>` - The Jacobian matrix
pub fn jacobian<P: Problem + ?Sized>(
    problem: &P,
    params: &Array1<f64>,
    epsilon: Option<f64>,
) -> Result<Array2<f64>> {
    let residuals = problem.eval(params)?;
    jacobian_from(problem, params, &residuals, None, epsilon)
}

/// Compute the Jacobian with steps that stay inside `bounds`.
///
/// # Arguments
///
/// * `problem` - The problem to evaluate
/// * `params` - A feasible parameter vector
/// * `residuals` - The residuals already evaluated at `params`
/// * `bounds` - The feasible box
/// * `epsilon` - The relative step size (optional)
pub fn jacobian_within<P: Problem + ?Sized>(
    problem: &P,
    params: &Array1<f64>,
    residuals: &Array1<f64>,
    bounds: &BoundBox,
    epsilon: Option<f64>,
) -> Result<Array2<f64>> {
    jacobian_from(problem, params, residuals, Some(bounds), epsilon)
}

fn jacobian_from<P: Problem + ?Sized>(
    problem: &P,
    params: &Array1<f64>,
    residuals: &Array1<f64>,
    bounds: Option<&BoundBox>,
    epsilon: Option<f64>,
) -> Result<Array2<f64>> {
    let eps = epsilon.unwrap_or(DEFAULT_EPSILON);
    let n_params = params.len();
    let n_residuals = problem.residual_count();

    if residuals.len() != n_residuals {
        return Err(PsyCalError::DimensionMismatch(format!(
            "Expected {} residuals, got {}",
            n_residuals,
            residuals.len()
        )));
    }

    let mut jac = Array2::zeros((n_residuals, n_params));

    for j in 0..n_params {
        let mut h = eps * params[j].abs().max(1.0);
        if let Some(bounds) = bounds {
            let limit = bounds.bounds()[j];
            if params[j] + h > limit.max && params[j] - h >= limit.min {
                h = -h;
            }
        }

        let mut params_perturbed = params.clone();
        params_perturbed[j] += h;
        let step = params_perturbed[j] - params[j];

        let residuals_perturbed = problem.eval(&params_perturbed)?;

        for i in 0..n_residuals {
            let derivative = (residuals_perturbed[i] - residuals[i]) / step;
            if !derivative.is_finite() {
                return Err(PsyCalError::FunctionEvaluation(format!(
                    "Non-finite derivative of residual {} with respect to parameter {}",
                    i, j
                )));
            }
            jac[[i, j]] = derivative;
        }
    }

    Ok(jac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    // r = [x0^2 + x1, exp(x0) * x1]
    struct Curved;

    impl Problem for Curved {
        fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(array![
                params[0].powi(2) + params[1],
                params[0].exp() * params[1]
            ])
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            2
        }
    }

    #[test]
    fn test_forward_jacobian() {
        let x = array![0.5, 2.0];
        let jac = jacobian(&Curved, &x, None).unwrap();
        assert_relative_eq!(jac[[0, 0]], 1.0, epsilon = 1e-6);
        assert_relative_eq!(jac[[0, 1]], 1.0, epsilon = 1e-6);
        assert_relative_eq!(jac[[1, 0]], 0.5f64.exp() * 2.0, epsilon = 1e-6);
        assert_relative_eq!(jac[[1, 1]], 0.5f64.exp(), epsilon = 1e-6);
    }

    #[test]
    fn test_jacobian_at_upper_bound_steps_backward() {
        let x = array![1.0, 2.0];
        let bounds = BoundBox::from_pairs(&[(0.0, 1.0), (0.0, 5.0)]).unwrap();
        let residuals = Curved.eval(&x).unwrap();
        let jac = jacobian_within(&Curved, &x, &residuals, &bounds, None).unwrap();
        assert_relative_eq!(jac[[0, 0]], 2.0, epsilon = 1e-6);
        assert_relative_eq!(jac[[1, 0]], 1.0f64.exp() * 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_non_finite_derivative_is_an_error() {
        struct Singular;
        impl Problem for Singular {
            fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
                Ok(array![if params[0] > 0.0 { f64::INFINITY } else { 0.0 }])
            }
            fn parameter_count(&self) -> usize {
                1
            }
            fn residual_count(&self) -> usize {
                1
            }
        }

        let result = jacobian(&Singular, &array![0.0], None);
        assert!(matches!(result, Err(PsyCalError::FunctionEvaluation(_))));
    }
}
