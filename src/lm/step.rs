//! Step calculation for the local least-squares solvers.
//!
//! Damped normal-equation steps for Levenberg-Marquardt, pseudo-inverse
//! Gauss-Newton steps for dogbox and the SVD-based trust-region subproblem
//! of the reflective solver. Dense solves are delegated to nalgebra.

use super::config::DecompositionMethod;
use crate::error::{PsyCalError, Result};
use crate::utils::{nalgebra_vec_to_ndarray, ndarray_to_nalgebra, ndarray_vec_to_nalgebra};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

/// Floor applied to diagonal entries of `JᵀJ` before damping.
const MIN_DIAGONAL: f64 = 1e-10;

/// Relative singular value cutoff for SVD solves.
const SINGULAR_VALUE_RTOL: f64 = 1e-12;

/// Result of a damped step calculation.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The calculated step vector
    pub step: Array1<f64>,

    /// The cost reduction predicted by the linearized model
    pub predicted_reduction: f64,

    /// The damping parameter used to calculate the step
    pub lambda: f64,
}

/// Handles step calculation for the local solvers.
pub struct LmStep;

impl LmStep {
    /// Calculates the Levenberg-Marquardt step.
    ///
    /// Solves `(JᵀJ + λ·diag(JᵀJ)) p = −Jᵀr`.
    ///
    /// # Arguments
    ///
    /// * `jacobian` - The Jacobian matrix at the current position
    /// * `residuals` - The residuals at the current position
    /// * `lambda` - The damping parameter
    /// * `method` - The method to use for the linear solve
    ///
    /// # Returns
    ///
    /// * The step result containing the step vector and predicted reduction
    pub fn calculate_step(
        jacobian: &Array2<f64>,
        residuals: &Array1<f64>,
        lambda: f64,
        method: DecompositionMethod,
    ) -> Result<StepResult> {
        Self::damped_step(jacobian, residuals, lambda, method)
    }

    fn damped_step(
        jacobian: &Array2<f64>,
        residuals: &Array1<f64>,
        lambda: f64,
        method: DecompositionMethod,
    ) -> Result<StepResult> {
        if jacobian.nrows() != residuals.len() {
            return Err(PsyCalError::DimensionMismatch(format!(
                "Jacobian has {} rows but there are {} residuals",
                jacobian.nrows(),
                residuals.len()
            )));
        }

        let j = ndarray_to_nalgebra(jacobian);
        let r = ndarray_vec_to_nalgebra(residuals);
        let jtj = j.transpose() * &j;
        let jtr = j.transpose() * &r;

        let mut damped = jtj.clone();
        for i in 0..damped.nrows() {
            damped[(i, i)] += lambda * jtj[(i, i)].max(MIN_DIAGONAL);
        }

        let solution = Self::solve(damped, &(-jtr), method)?;
        let step = nalgebra_vec_to_ndarray(&solution);
        if step.iter().any(|v| !v.is_finite()) {
            return Err(PsyCalError::LinearAlgebraError(
                "Damped step is not finite".to_string(),
            ));
        }

        let predicted_reduction = Self::predicted_reduction(jacobian, residuals, &step);
        Ok(StepResult {
            step,
            predicted_reduction,
            lambda,
        })
    }

    /// Minimum-norm Gauss-Newton step: the `p` minimizing `‖J p + r‖`.
    pub fn gauss_newton(jacobian: &Array2<f64>, residuals: &Array1<f64>) -> Result<Array1<f64>> {
        if jacobian.ncols() == 0 {
            return Ok(Array1::zeros(0));
        }
        let j = ndarray_to_nalgebra(jacobian);
        let r = ndarray_vec_to_nalgebra(residuals);
        let svd = j.svd(true, true);
        let cutoff = svd.singular_values.max() * SINGULAR_VALUE_RTOL;
        let solution = svd
            .solve(&(-r), cutoff)
            .map_err(|e| PsyCalError::LinearAlgebraError(e.to_string()))?;
        Ok(nalgebra_vec_to_ndarray(&solution))
    }

    /// Cost reduction predicted by the linear model: `‖r‖² − ‖r + J p‖²`.
    pub fn predicted_reduction(
        jacobian: &Array2<f64>,
        residuals: &Array1<f64>,
        step: &Array1<f64>,
    ) -> f64 {
        let linearized = residuals + &jacobian.dot(step);
        residuals.dot(residuals) - linearized.dot(&linearized)
    }

    fn solve(
        matrix: DMatrix<f64>,
        rhs: &DVector<f64>,
        method: DecompositionMethod,
    ) -> Result<DVector<f64>> {
        match method {
            DecompositionMethod::Cholesky => matrix
                .cholesky()
                .map(|chol| chol.solve(rhs))
                .ok_or_else(|| {
                    PsyCalError::LinearAlgebraError(
                        "Matrix is not positive definite".to_string(),
                    )
                }),
            DecompositionMethod::Svd => Self::solve_svd(matrix, rhs),
            DecompositionMethod::Auto => match matrix.clone().cholesky() {
                Some(chol) => Ok(chol.solve(rhs)),
                None => Self::solve_svd(matrix, rhs),
            },
        }
    }

    fn solve_svd(matrix: DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        let svd = matrix.svd(true, true);
        let cutoff = svd.singular_values.max() * SINGULAR_VALUE_RTOL;
        svd.solve(rhs, cutoff)
            .map_err(|e| PsyCalError::LinearAlgebraError(e.to_string()))
    }
}

/// Relative accuracy to which a constrained step matches the trust radius.
const RADIUS_RTOL: f64 = 0.01;

/// Newton iterations spent on the damping of a constrained step.
const MAX_ALPHA_ITERATIONS: usize = 10;

/// Minimizer of `‖J p + r‖` subject to `‖p‖ ≤ Δ`.
///
/// The SVD of `J` is computed once and reused for every radius tried
/// during an iteration. A constrained solution has the form
/// `p = −(JᵀJ + αI)⁻¹ Jᵀr` with `α` found by safeguarded Newton iterations
/// on `‖p(α)‖ = Δ`.
#[derive(Debug, Clone)]
pub struct TrustRegionSubproblem {
    singular_values: DVector<f64>,
    right_vectors: DMatrix<f64>,
    projected_residuals: DVector<f64>,
    full_rank: bool,
}

impl TrustRegionSubproblem {
    pub fn new(jacobian: &Array2<f64>, residuals: &Array1<f64>) -> Result<Self> {
        if jacobian.nrows() != residuals.len() {
            return Err(PsyCalError::DimensionMismatch(format!(
                "Jacobian has {} rows but there are {} residuals",
                jacobian.nrows(),
                residuals.len()
            )));
        }
        let (m, n) = jacobian.dim();
        let svd = ndarray_to_nalgebra(jacobian).svd(true, true);
        let u = svd.u.ok_or_else(|| {
            PsyCalError::LinearAlgebraError("SVD did not return left vectors".to_string())
        })?;
        let v_t = svd.v_t.ok_or_else(|| {
            PsyCalError::LinearAlgebraError("SVD did not return right vectors".to_string())
        })?;
        let singular_values = svd.singular_values;
        let largest = singular_values.iter().fold(0.0, |a: f64, &b| a.max(b));
        let smallest = singular_values.iter().fold(f64::INFINITY, |a: f64, &b| a.min(b));
        let full_rank = m >= n && smallest > f64::EPSILON * m as f64 * largest;

        Ok(Self {
            projected_residuals: u.transpose() * ndarray_vec_to_nalgebra(residuals),
            right_vectors: v_t.transpose(),
            singular_values,
            full_rank,
        })
    }

    /// Whether `J` has full column rank.
    pub fn is_full_rank(&self) -> bool {
        self.full_rank
    }

    /// Step for the radius `radius`, warm-started from the damping `alpha`
    /// of a previous solve.
    ///
    /// Returns the step and its damping; `0` means the Gauss-Newton step
    /// fits inside the region.
    pub fn solve(&self, radius: f64, alpha: f64) -> (Array1<f64>, f64) {
        let n = self.right_vectors.nrows();
        if radius <= 0.0 {
            return (Array1::zeros(n), alpha);
        }
        let s = &self.singular_values;
        if self.full_rank {
            let newton = -(&self.right_vectors * self.projected_residuals.component_div(s));
            if newton.norm() <= radius {
                return (nalgebra_vec_to_ndarray(&newton), 0.0);
            }
        }

        let suf = s.component_mul(&self.projected_residuals);
        let suf_norm = suf.norm();
        if suf_norm == 0.0 {
            return (Array1::zeros(n), alpha);
        }
        let mut alpha_upper = suf_norm / radius;
        let mut alpha_lower = if self.full_rank {
            let (phi, slope) = self.radius_mismatch(0.0, &suf, radius);
            -phi / slope
        } else {
            0.0
        };
        let restart = |lower: f64, upper: f64| (0.001 * upper).max((lower * upper).sqrt());

        let mut alpha = if !self.full_rank && alpha == 0.0 {
            restart(alpha_lower, alpha_upper)
        } else {
            alpha
        };
        for _ in 0..MAX_ALPHA_ITERATIONS {
            if alpha < alpha_lower || alpha > alpha_upper {
                alpha = restart(alpha_lower, alpha_upper);
            }
            let (phi, slope) = self.radius_mismatch(alpha, &suf, radius);
            if phi < 0.0 {
                alpha_upper = alpha;
            }
            let ratio = phi / slope;
            alpha_lower = alpha_lower.max(alpha - ratio);
            alpha -= (phi + radius) * ratio / radius;
            if phi.abs() < RADIUS_RTOL * radius {
                break;
            }
        }
        let alpha = alpha.max(alpha_lower);

        let coefficients = suf.zip_map(s, |a, si| {
            let denominator = si * si + alpha;
            if denominator > 0.0 {
                a / denominator
            } else {
                0.0
            }
        });
        let mut step = -(&self.right_vectors * coefficients);
        let step_norm = step.norm();
        if step_norm > 0.0 {
            step *= radius / step_norm;
        }
        (nalgebra_vec_to_ndarray(&step), alpha)
    }

    /// `‖p(α)‖ − Δ` and its derivative in `α`.
    fn radius_mismatch(&self, alpha: f64, suf: &DVector<f64>, radius: f64) -> (f64, f64) {
        let mut p_norm_sq: f64 = 0.0;
        let mut curvature = 0.0;
        for (a, s) in suf.iter().zip(self.singular_values.iter()) {
            let denominator = s * s + alpha;
            if denominator > 0.0 {
                p_norm_sq += (a / denominator).powi(2);
                curvature += a * a / denominator.powi(3);
            }
        }
        let p_norm = p_norm_sq.sqrt();
        (p_norm - radius, -curvature / p_norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_small_damping_approaches_gauss_newton() {
        // r = y - (a x + b) at a = b = 0 for y = 2x + 1
        let jacobian = array![[-0.0, -1.0], [-1.0, -1.0], [-2.0, -1.0]];
        let residuals = array![1.0, 3.0, 5.0];
        for method in [
            DecompositionMethod::Cholesky,
            DecompositionMethod::Svd,
            DecompositionMethod::Auto,
        ] {
            let result = LmStep::calculate_step(&jacobian, &residuals, 1e-12, method).unwrap();
            assert_relative_eq!(result.step[0], 2.0, epsilon = 1e-6);
            assert_relative_eq!(result.step[1], 1.0, epsilon = 1e-6);
            assert_relative_eq!(result.predicted_reduction, 35.0, epsilon = 1e-6);
        }

        let gn = LmStep::gauss_newton(&jacobian, &residuals).unwrap();
        assert_relative_eq!(gn[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(gn[1], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_large_damping_shrinks_step() {
        let jacobian = array![[-1.0, 0.0], [0.0, -2.0]];
        let residuals = array![1.0, 1.0];
        let small = LmStep::calculate_step(&jacobian, &residuals, 1e-3, DecompositionMethod::Auto).unwrap();
        let large = LmStep::calculate_step(&jacobian, &residuals, 1e3, DecompositionMethod::Auto).unwrap();
        assert!(large.step.dot(&large.step) < small.step.dot(&small.step));
        assert!(large.predicted_reduction > 0.0);
    }

    #[test]
    fn test_rank_deficient_gauss_newton_is_minimum_norm() {
        // Two identical columns: only their sum is determined
        let jacobian = array![[1.0, 1.0], [2.0, 2.0]];
        let residuals = array![-2.0, -4.0];
        let gn = LmStep::gauss_newton(&jacobian, &residuals).unwrap();
        assert_relative_eq!(gn[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(gn[1], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_subproblem_takes_newton_step_inside_radius() {
        // Gauss-Newton step (3, 4) of length 5
        let jacobian = array![[1.0, 0.0], [0.0, 1.0]];
        let residuals = array![-3.0, -4.0];
        let subproblem = TrustRegionSubproblem::new(&jacobian, &residuals).unwrap();
        assert!(subproblem.is_full_rank());

        let (step, alpha) = subproblem.solve(10.0, 0.0);
        assert_relative_eq!(alpha, 0.0);
        assert_relative_eq!(step[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(step[1], 4.0, epsilon = 1e-12);

        let (step, alpha) = subproblem.solve(1.0, 0.0);
        assert!(alpha > 0.0);
        assert_relative_eq!(step[0], 0.6, epsilon = 1e-12);
        assert_relative_eq!(step[1], 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_subproblem_bends_toward_steep_directions() {
        // A short step favors the well-determined first component
        let jacobian = array![[10.0, 0.0], [0.0, 1.0]];
        let residuals = array![-10.0, -1.0];
        let subproblem = TrustRegionSubproblem::new(&jacobian, &residuals).unwrap();
        let (step, _) = subproblem.solve(0.5, 0.0);
        assert_relative_eq!(step.dot(&step).sqrt(), 0.5, epsilon = 1e-12);
        assert!(step[0] > step[1]);
        assert!(step[1] > 0.0);
    }

    #[test]
    fn test_rank_deficient_subproblem() {
        let jacobian = array![[1.0, 1.0], [2.0, 2.0]];
        let residuals = array![-2.0, -4.0];
        let subproblem = TrustRegionSubproblem::new(&jacobian, &residuals).unwrap();
        assert!(!subproblem.is_full_rank());
        let (step, _) = subproblem.solve(0.5, 0.0);
        assert_relative_eq!(step[0], 0.5 / 2f64.sqrt(), epsilon = 1e-10);
        assert_relative_eq!(step[1], 0.5 / 2f64.sqrt(), epsilon = 1e-10);
    }

    #[test]
    fn test_dimension_mismatch() {
        let jacobian = array![[1.0], [2.0]];
        let residuals = array![1.0];
        assert!(matches!(
            LmStep::calculate_step(&jacobian, &residuals, 1.0, DecompositionMethod::Auto),
            Err(PsyCalError::DimensionMismatch(_))
        ));
    }
}
