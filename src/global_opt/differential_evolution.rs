//! Differential Evolution algorithm for global optimization.
//!
//! A population-based stochastic minimizer. The population starts from a
//! Latin hypercube over the bound box, mutation uses a weight redrawn every
//! generation from a dither range, and trial components that leave the box
//! are resampled uniformly inside it. The search stops once the spread of
//! the population costs is small relative to their mean.
//!
//! A population can also collapse onto a plateau: a region where some
//! residuals are stuck at a nonzero value that no parameter moves, as with
//! predictions clamped to 0 or 100 %. Such a collapse does not count as
//! convergence; a fresh population is drawn and the best member seen so far
//! is kept.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    calculate_cost, check_search_box, evaluate_population, latin_hypercube, random_component,
    GlobalOptResult, GlobalOptimizer,
};
use crate::bounded::TrustRegionReflective;
use crate::bounds::BoundBox;
use crate::error::{PsyCalError, Result};
use crate::problem::Problem;
use crate::utils::finite_difference;

/// Strategies for creating candidate solutions in Differential Evolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DEStrategy {
    /// DE/rand/1: x_r1 + F * (x_r2 - x_r3)
    Rand1,

    /// DE/rand/2: x_r1 + F * (x_r2 - x_r3) + F * (x_r4 - x_r5)
    Rand2,

    /// DE/best/1: x_best + F * (x_r1 - x_r2)
    #[default]
    Best1,

    /// DE/best/2: x_best + F * (x_r1 - x_r2) + F * (x_r3 - x_r4)
    Best2,

    /// DE/current-to-best/1: x_i + F * (x_best - x_i) + F * (x_r1 - x_r2)
    CurrentToBest1,
}

impl DEStrategy {
    /// Number of random donors a mutation draws.
    fn donors(&self) -> usize {
        match self {
            DEStrategy::Rand1 => 3,
            DEStrategy::Rand2 => 5,
            DEStrategy::Best1 | DEStrategy::CurrentToBest1 => 2,
            DEStrategy::Best2 => 4,
        }
    }
}

/// Configuration options for differential evolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeConfig {
    /// Seed of the per-run random generator. Default: 42
    pub seed: u64,

    /// Population size per parameter. Default: 15
    pub popsize: usize,

    /// Maximum number of generations. Default: 1000
    pub max_generations: usize,

    /// Relative tolerance on the spread of population costs. Default: 1e-8
    pub tol: f64,

    /// Absolute tolerance on the spread of population costs. Default: 1e-8
    pub atol: f64,

    /// Range the differential weight is drawn from each generation. Default: (0.5, 1.0)
    pub mutation: (f64, f64),

    /// Crossover probability. Default: 0.7
    pub crossover: f64,

    /// Refine the best member with the reflective trust-region solver. Default: true
    pub polish: bool,

    /// Mutation strategy. Default: best/1 with binomial crossover
    pub strategy: DEStrategy,
}

impl Default for DeConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            popsize: 15,
            max_generations: 1000,
            tol: 1e-8,
            atol: 1e-8,
            mutation: (0.5, 1.0),
            crossover: 0.7,
            polish: true,
            strategy: DEStrategy::default(),
        }
    }
}

impl DeConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_generations(mut self, max_generations: usize) -> Self {
        self.max_generations = max_generations;
        self
    }

    pub fn with_polish(mut self, polish: bool) -> Self {
        self.polish = polish;
        self
    }

    pub fn with_strategy(mut self, strategy: DEStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        if self.popsize == 0 || self.max_generations == 0 {
            return Err(PsyCalError::InvalidInput(
                "popsize and max_generations must be positive".to_string(),
            ));
        }
        let (lo, hi) = self.mutation;
        if !(0.0..=2.0).contains(&lo) || !(0.0..=2.0).contains(&hi) || lo > hi {
            return Err(PsyCalError::InvalidInput(format!(
                "mutation range must lie within [0, 2], got ({}, {})",
                lo, hi
            )));
        }
        if !(0.0..=1.0).contains(&self.crossover) {
            return Err(PsyCalError::InvalidInput(format!(
                "crossover must lie within [0, 1], got {}",
                self.crossover
            )));
        }
        if !(self.tol >= 0.0 && self.atol >= 0.0) {
            return Err(PsyCalError::InvalidInput(
                "tol and atol must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Differential Evolution algorithm for global optimization.
#[derive(Debug, Clone, Default)]
pub struct DifferentialEvolution {
    config: DeConfig,
}

fn best_index(costs: &[f64]) -> usize {
    costs
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(bi, bc), (i, &c)| {
            if c < bc {
                (i, c)
            } else {
                (bi, bc)
            }
        })
        .0
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Residuals at `params` that are nonzero but insensitive to every parameter.
fn saturated_residuals<P: Problem + ?Sized>(
    problem: &P,
    params: &Array1<f64>,
    bounds: &BoundBox,
) -> Result<usize> {
    let residuals = problem.eval(params)?;
    let jacobian = finite_difference::jacobian_within(problem, params, &residuals, bounds, None)?;
    Ok(jacobian
        .outer_iter()
        .zip(residuals.iter())
        .filter(|(row, r)| **r != 0.0 && row.iter().all(|&v| v == 0.0))
        .count())
}

impl DifferentialEvolution {
    pub fn new(config: DeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DeConfig {
        &self.config
    }

    /// Population size for `n` parameters.
    pub fn population_size(&self, n: usize) -> usize {
        (self.config.popsize * n)
            .max(5)
            .max(self.config.strategy.donors() + 2)
    }

    /// Create a trial vector for member `target_idx`.
    ///
    /// # Arguments
    ///
    /// * `target_idx` - Index of the target vector
    /// * `population` - Current population, one member per row
    /// * `best_idx` - Index of the best member
    /// * `weight` - Differential weight of this generation
    /// * `bounds` - Parameter bounds
    /// * `rng` - Random number generator
    fn create_trial_vector(
        &self,
        target_idx: usize,
        population: &Array2<f64>,
        best_idx: usize,
        weight: f64,
        bounds: &BoundBox,
        rng: &mut impl Rng,
    ) -> Array1<f64> {
        let (n_pop, n_params) = population.dim();
        let strategy = self.config.strategy;
        let excludes_best = matches!(
            strategy,
            DEStrategy::Best1 | DEStrategy::Best2 | DEStrategy::CurrentToBest1
        );
        let mut available: Vec<usize> = (0..n_pop)
            .filter(|&i| i != target_idx && !(excludes_best && i == best_idx))
            .collect();
        available.shuffle(rng);
        let r = &available[..strategy.donors()];
        let row = |i: usize| population.row(i);
        let diff = |a: usize, b: usize| &row(a) - &row(b);

        let mutant = match strategy {
            DEStrategy::Rand1 => &row(r[0]) + &(diff(r[1], r[2]) * weight),
            DEStrategy::Rand2 => {
                &row(r[0]) + &((diff(r[1], r[2]) + diff(r[3], r[4])) * weight)
            }
            DEStrategy::Best1 => &row(best_idx) + &(diff(r[0], r[1]) * weight),
            DEStrategy::Best2 => {
                &row(best_idx) + &((diff(r[0], r[1]) + diff(r[2], r[3])) * weight)
            }
            DEStrategy::CurrentToBest1 => {
                &row(target_idx)
                    + &((diff(best_idx, target_idx) + diff(r[0], r[1])) * weight)
            }
        };

        // Binomial crossover with the target; one component always comes from the mutant
        let target = population.row(target_idx);
        let j_rand = rng.gen_range(0..n_params);
        let mut trial = target.to_owned();
        for j in 0..n_params {
            if j == j_rand || rng.gen::<f64>() < self.config.crossover {
                trial[j] = mutant[j];
            }
        }

        for (j, b) in bounds.bounds().iter().enumerate() {
            if !b.is_within_bounds(trial[j]) {
                trial[j] = random_component(bounds, j, rng);
            }
        }
        trial
    }

    fn polish<P: Problem + ?Sized>(
        &self,
        problem: &P,
        bounds: &BoundBox,
        result: &mut GlobalOptResult,
    ) {
        match TrustRegionReflective::default().minimize(problem, &result.params, bounds) {
            Ok(local) => {
                result.func_evals += local.func_evals;
                if local.cost < result.cost {
                    result.params = local.params.clone();
                    result.cost = local.cost;
                }
                result.local_result = Some(local);
            }
            Err(e) => debug!(error = %e, "polishing skipped"),
        }
    }
}

impl GlobalOptimizer for DifferentialEvolution {
    fn optimize<P: Problem + ?Sized>(
        &self,
        problem: &P,
        bounds: &BoundBox,
    ) -> Result<GlobalOptResult> {
        self.config.validate()?;
        let n_params = check_search_box(problem, bounds)?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let pop_size = self.population_size(n_params);
        let mut population = latin_hypercube(bounds, pop_size, &mut rng);
        let mut costs = evaluate_population(problem, &population)?;
        let mut best_idx = best_index(&costs);
        let mut best = (population.row(best_idx).to_owned(), costs[best_idx]);
        let mut func_evals = pop_size;
        let mut iterations = 0;
        let mut restarts = 0;
        let mut converged = false;

        let (lo, hi) = self.config.mutation;
        while iterations < self.config.max_generations {
            let weight = if hi > lo { rng.gen_range(lo..hi) } else { lo };

            for i in 0..pop_size {
                let trial =
                    self.create_trial_vector(i, &population, best_idx, weight, bounds, &mut rng);
                let trial_cost = calculate_cost(problem, &trial)?;
                func_evals += 1;

                if trial_cost <= costs[i] {
                    population.row_mut(i).assign(&trial);
                    costs[i] = trial_cost;
                    if trial_cost < costs[best_idx] {
                        best_idx = i;
                    }
                }
            }
            iterations += 1;
            if costs[best_idx] < best.1 {
                best = (population.row(best_idx).to_owned(), costs[best_idx]);
            }

            let (mean, std) = mean_and_std(&costs);
            if std > self.config.atol + self.config.tol * mean.abs() {
                continue;
            }
            let stuck =
                saturated_residuals(problem, &population.row(best_idx).to_owned(), bounds)?;
            func_evals += n_params + 1;
            if stuck == 0 {
                converged = true;
                break;
            }

            restarts += 1;
            debug!(
                iterations,
                stuck,
                cost = costs[best_idx],
                "population collapsed on a plateau, drawing a new one"
            );
            population = latin_hypercube(bounds, pop_size, &mut rng);
            costs = evaluate_population(problem, &population)?;
            func_evals += pop_size;
            best_idx = best_index(&costs);
            if costs[best_idx] < best.1 {
                best = (population.row(best_idx).to_owned(), costs[best_idx]);
            }
        }

        debug!(
            iterations,
            func_evals,
            restarts,
            best_cost = best.1,
            converged,
            "differential evolution finished"
        );

        let (params, cost) = best;
        let mut result = GlobalOptResult {
            params,
            cost,
            iterations,
            func_evals,
            success: converged,
            message: if converged {
                "Optimization terminated successfully.".to_string()
            } else {
                "Maximum number of iterations has been exceeded.".to_string()
            },
            local_result: None,
        };
        if self.config.polish {
            self.polish(problem, bounds, &mut result);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    // r = [x0 - 1, x1 + 2]
    struct Shifted;

    impl Problem for Shifted {
        fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(array![params[0] - 1.0, params[1] + 2.0])
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            2
        }
    }

    /// A 1-D problem with several local minima; the global one is at x = 0.
    struct Rippled;

    impl Problem for Rippled {
        fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
            let x = params[0];
            Ok(array![x, 3.0 * (2.0 * x).sin()])
        }

        fn parameter_count(&self) -> usize {
            1
        }

        fn residual_count(&self) -> usize {
            2
        }
    }

    /// Nonzero residual that no parameter can change.
    struct Flat;

    impl Problem for Flat {
        fn eval(&self, _params: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(array![1.0, 0.0])
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            2
        }
    }

    /// Saturates to a constant for x < 0, a parabola with its minimum at
    /// x = 2 elsewhere.
    struct Shelf;

    impl Problem for Shelf {
        fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
            let x = params[0];
            Ok(if x < 0.0 { array![4.0] } else { array![x - 2.0] })
        }

        fn parameter_count(&self) -> usize {
            1
        }

        fn residual_count(&self) -> usize {
            1
        }
    }

    fn square_box() -> BoundBox {
        BoundBox::from_pairs(&[(-5.0, 5.0), (-5.0, 5.0)]).unwrap()
    }

    #[test]
    fn test_converges_without_polish() {
        let de = DifferentialEvolution::new(DeConfig::default().with_polish(false));
        let result = de.optimize(&Shifted, &square_box()).unwrap();
        assert!(result.success, "{}", result);
        assert_eq!(result.message, "Optimization terminated successfully.");
        assert!(result.cost < 1e-6);
        assert!(result.local_result.is_none());
        // One population per generation plus the final residual and Jacobian check
        assert_eq!(result.func_evals, 30 * (result.iterations + 1) + 3);
    }

    #[test]
    fn test_polish_refines_best_member() {
        let de = DifferentialEvolution::new(DeConfig::default().with_max_generations(3));
        let result = de.optimize(&Shifted, &square_box()).unwrap();
        assert!(result.local_result.is_some());
        assert_relative_eq!(result.params[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(result.params[1], -2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_generation_cap() {
        let de = DifferentialEvolution::new(
            DeConfig::default().with_max_generations(1).with_polish(false),
        );
        let result = de.optimize(&Shifted, &square_box()).unwrap();
        assert!(!result.success);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.message, "Maximum number of iterations has been exceeded.");
        assert!(square_box().contains(&result.params));
    }

    #[test]
    fn test_same_seed_same_answer() {
        let de = DifferentialEvolution::new(
            DeConfig::default().with_max_generations(20).with_polish(false),
        );
        let first = de.optimize(&Shifted, &square_box()).unwrap();
        let second = de.optimize(&Shifted, &square_box()).unwrap();
        assert_eq!(first.params, second.params);
        assert_eq!(first.func_evals, second.func_evals);
    }

    #[test]
    fn test_finds_global_minimum_among_ripples() {
        let bounds = BoundBox::from_pairs(&[(-6.0, 6.0)]).unwrap();
        for strategy in [DEStrategy::Best1, DEStrategy::Rand1, DEStrategy::CurrentToBest1] {
            let de = DifferentialEvolution::new(DeConfig::default().with_strategy(strategy));
            let result = de.optimize(&Rippled, &bounds).unwrap();
            assert!(result.params[0].abs() < 1e-4, "{:?}: {}", strategy, result);
        }
    }

    #[test]
    fn test_plateau_is_not_convergence() {
        let de = DifferentialEvolution::new(
            DeConfig::default().with_max_generations(20).with_polish(false),
        );
        let result = de.optimize(&Flat, &square_box()).unwrap();
        assert!(!result.success, "{}", result);
        assert_eq!(result.iterations, 20);
        assert_relative_eq!(result.cost, 1.0);
    }

    #[test]
    fn test_saturated_residuals() {
        let bounds = BoundBox::from_pairs(&[(-5.0, 5.0)]).unwrap();
        assert_eq!(saturated_residuals(&Shelf, &array![-3.0], &bounds).unwrap(), 1);
        assert_eq!(saturated_residuals(&Shelf, &array![1.0], &bounds).unwrap(), 0);
        // A zero residual is not stuck even when flat
        assert_eq!(
            saturated_residuals(&Flat, &array![0.0, 0.0], &square_box()).unwrap(),
            1
        );
    }

    #[test]
    fn test_escapes_shelf() {
        let bounds = BoundBox::from_pairs(&[(-100.0, 5.0)]).unwrap();
        let result = DifferentialEvolution::default().optimize(&Shelf, &bounds).unwrap();
        assert_relative_eq!(result.params[0], 2.0, epsilon = 1e-6);
        assert!(result.cost < 1e-12);
    }

    #[test]
    fn test_population_size_floor() {
        let de = DifferentialEvolution::default();
        assert_eq!(de.population_size(1), 15);
        assert_eq!(de.population_size(4), 60);
        let tiny = DifferentialEvolution::new(DeConfig {
            popsize: 1,
            strategy: DEStrategy::Rand2,
            ..Default::default()
        });
        assert_eq!(tiny.population_size(1), 7);
    }

    #[test]
    fn test_rejects_unbounded_box() {
        let bounds = BoundBox::unbounded(2);
        let result = DifferentialEvolution::default().optimize(&Shifted, &bounds);
        assert!(matches!(result, Err(PsyCalError::BoundsError(_))));
    }

    #[test]
    fn test_invalid_config() {
        let de = DifferentialEvolution::new(DeConfig {
            crossover: 1.5,
            ..Default::default()
        });
        assert!(matches!(
            de.optimize(&Shifted, &square_box()),
            Err(PsyCalError::InvalidInput(_))
        ));
    }
}
