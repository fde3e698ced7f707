//! Global optimization over a bounded parameter box.
//!
//! Global methods ignore any initial guess and search the whole box. They
//! minimize the sum of squared residuals of a [`Problem`].

use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;

use crate::bounds::BoundBox;
use crate::error::{PsyCalError, Result};
use crate::lm::LmResult;
use crate::problem::{finite_cost, Problem};

mod differential_evolution;

pub use differential_evolution::{DEStrategy, DeConfig, DifferentialEvolution};

/// Trait for global optimization methods.
pub trait GlobalOptimizer {
    /// Run the optimization and return the best solution found.
    ///
    /// # Arguments
    ///
    /// * `problem` - The problem to solve
    /// * `bounds` - Finite lower and upper bounds for each parameter
    fn optimize<P: Problem + ?Sized>(&self, problem: &P, bounds: &BoundBox)
        -> Result<GlobalOptResult>;
}

/// Result of a global optimization.
#[derive(Debug, Clone)]
pub struct GlobalOptResult {
    /// The best parameters found
    pub params: Array1<f64>,

    /// The best cost found
    pub cost: f64,

    /// The number of generations performed
    pub iterations: usize,

    /// The number of function evaluations, polishing included
    pub func_evals: usize,

    /// Whether the search met its convergence test
    pub success: bool,

    /// A message describing the result
    pub message: String,

    /// Local polishing result if a local solver was run from the best point
    pub local_result: Option<LmResult>,
}

impl fmt::Display for GlobalOptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Global Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;

        if let Some(ref local_result) = self.local_result {
            writeln!(f, "\nLocal Optimization Result:")?;
            writeln!(f, "  Success: {}", local_result.success)?;
            writeln!(f, "  Cost: {:.6e}", local_result.cost)?;
            writeln!(f, "  Iterations: {}", local_result.iterations)?;
            writeln!(f, "  Message: {}", local_result.message)?;
        }

        Ok(())
    }
}

/// Fail unless the box has the right length and every limit is finite.
fn check_search_box<P: Problem + ?Sized>(problem: &P, bounds: &BoundBox) -> Result<usize> {
    let n = problem.parameter_count();
    bounds.check_len(n)?;
    if !bounds.is_finite() {
        return Err(PsyCalError::BoundsError(
            "Global search needs finite lower and upper bounds".to_string(),
        ));
    }
    Ok(n)
}

/// Uniform random value for component `i` of the box.
fn random_component(bounds: &BoundBox, i: usize, rng: &mut impl Rng) -> f64 {
    let b = &bounds.bounds()[i];
    b.min + rng.gen::<f64>() * b.width()
}

/// Sum of squared residuals, infinite when the residuals are not finite.
fn calculate_cost<P: Problem + ?Sized>(problem: &P, point: &Array1<f64>) -> Result<f64> {
    Ok(finite_cost(&problem.eval(point)?))
}

/// Latin hypercube sample of `pop_size` points: each parameter range is cut
/// into `pop_size` equal strata and every stratum is hit exactly once.
///
/// Row `k` of the returned matrix is one point.
fn latin_hypercube(bounds: &BoundBox, pop_size: usize, rng: &mut impl Rng) -> Array2<f64> {
    let n = bounds.len();
    let segment = 1.0 / pop_size as f64;
    let mut population = Array2::zeros((pop_size, n));
    for (j, b) in bounds.bounds().iter().enumerate() {
        let mut column: Vec<f64> = (0..pop_size)
            .map(|k| (k as f64 + rng.gen::<f64>()) * segment)
            .collect();
        column.shuffle(rng);
        for (k, u) in column.into_iter().enumerate() {
            population[(k, j)] = b.min + u * b.width();
        }
    }
    population
}

/// Evaluate the cost for each row of a population.
fn evaluate_population<P: Problem + ?Sized>(
    problem: &P,
    population: &Array2<f64>,
) -> Result<Vec<f64>> {
    population
        .outer_iter()
        .map(|point| calculate_cost(problem, &point.to_owned()))
        .collect()
}
