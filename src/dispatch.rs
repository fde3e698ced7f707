//! Optimizer backends and their common contract.
//!
//! Every backend consumes a [`SolveRequest`] (model, points, starting point,
//! bounds) and returns a [`SolverOutcome`]. [`run_backend`] turns that into a
//! [`FitResult`] and absorbs backend errors into a fallback result that keeps
//! the initial guess, so a calibration always ends with usable parameters.

use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bounded::{CurveFit, CurveFitProblem, Dogbox, TrustRegionReflective};
use crate::bounds::BoundBox;
use crate::config::CalibrationConfig;
use crate::dataset::PointDataset;
use crate::error::{PsyCalError, Result};
use crate::global_opt::{DeConfig, DifferentialEvolution, GlobalOptResult, GlobalOptimizer};
use crate::lm::{LevenbergMarquardt, LmConfig, LmResult, TrustRegionConfig};
use crate::models::FormulaModel;
use crate::problem::finite_cost;
use crate::residual::ResidualEvaluator;

/// The built-in optimization strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizerStrategy {
    /// Bounded trust-region reflective least squares. The default.
    #[serde(rename = "trf")]
    TrustRegion,
    /// Unbounded Levenberg-Marquardt, clamped into the bounds afterwards.
    #[serde(rename = "lm")]
    LevenbergMarquardt,
    /// Bounded rectangular trust region with dogleg steps.
    #[serde(rename = "dogbox")]
    Dogbox,
    /// Bounded curve fit on separated data columns.
    #[serde(rename = "curve_fit")]
    CurveFit,
    /// Seeded global search over the bound box.
    #[serde(rename = "differential_evolution")]
    DifferentialEvolution,
}

impl OptimizerStrategy {
    /// Every strategy, in registration order.
    pub const ALL: [OptimizerStrategy; 5] = [
        OptimizerStrategy::TrustRegion,
        OptimizerStrategy::LevenbergMarquardt,
        OptimizerStrategy::Dogbox,
        OptimizerStrategy::CurveFit,
        OptimizerStrategy::DifferentialEvolution,
    ];

    /// Method name used as the key of calibration results.
    pub fn name(&self) -> &'static str {
        match self {
            OptimizerStrategy::TrustRegion => "trf",
            OptimizerStrategy::LevenbergMarquardt => "lm",
            OptimizerStrategy::Dogbox => "dogbox",
            OptimizerStrategy::CurveFit => "curve_fit",
            OptimizerStrategy::DifferentialEvolution => "differential_evolution",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OptimizerStrategy::TrustRegion => "Trust Region Reflective",
            OptimizerStrategy::LevenbergMarquardt => "Levenberg-Marquardt",
            OptimizerStrategy::Dogbox => "Dogbox",
            OptimizerStrategy::CurveFit => "Curve fit",
            OptimizerStrategy::DifferentialEvolution => "Differential evolution",
        }
    }

    /// Whether the strategy starts from the initial guess.
    pub fn uses_initial_guess(&self) -> bool {
        !matches!(self, OptimizerStrategy::DifferentialEvolution)
    }
}

impl fmt::Display for OptimizerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptimizerStrategy {
    type Err = PsyCalError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "trf" | "trust_region" | "trust_region_reflective" => {
                Ok(OptimizerStrategy::TrustRegion)
            }
            "lm" | "levenberg_marquardt" => Ok(OptimizerStrategy::LevenbergMarquardt),
            "dogbox" => Ok(OptimizerStrategy::Dogbox),
            "curve_fit" | "curvefit" => Ok(OptimizerStrategy::CurveFit),
            "differential_evolution" | "de" => Ok(OptimizerStrategy::DifferentialEvolution),
            _ => Err(PsyCalError::UnknownMethod(s.to_string())),
        }
    }
}

/// Outcome of one backend run on one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Method name the result is keyed by
    pub method: String,

    /// Fitted parameters, or the initial guess for a fallback
    pub parameters: Array1<f64>,

    /// Whether the backend reported convergence
    pub converged: bool,

    /// Backend message, or the error text for a fallback
    pub message: String,

    /// Residual evaluations spent by the backend
    pub evaluations: usize,

    /// Sum of squared residuals at `parameters`
    pub cost: f64,

    /// True when the backend failed and `parameters` is the initial guess
    pub fallback: bool,
}

impl FitResult {
    /// Result standing in for a backend that failed.
    pub fn fallback(method: &str, initial_guess: &Array1<f64>, cost: f64, error: &str) -> Self {
        Self {
            method: method.to_string(),
            parameters: initial_guess.clone(),
            converged: false,
            message: format!("Error: {}", error),
            evaluations: 0,
            cost,
            fallback: true,
        }
    }
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.method)?;
        writeln!(f, "  Converged: {}", self.converged)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Evaluations: {}", self.evaluations)?;
        writeln!(f, "  Parameters: {:?}", self.parameters)?;
        Ok(())
    }
}

/// Everything a backend needs for one run.
#[derive(Debug, Clone, Copy)]
pub struct SolveRequest<'a> {
    pub model: &'a dyn FormulaModel,
    pub dataset: &'a PointDataset,
    pub initial_guess: &'a Array1<f64>,
    pub bounds: &'a BoundBox,
}

impl<'a> SolveRequest<'a> {
    /// Residual evaluator of the request's model on its points.
    pub fn residuals(&self) -> ResidualEvaluator<'a> {
        ResidualEvaluator::new(self.model, self.dataset)
    }
}

/// What a backend reports back.
#[derive(Debug, Clone)]
pub struct SolverOutcome {
    pub parameters: Array1<f64>,
    pub converged: bool,
    pub message: String,
    pub evaluations: usize,
}

impl From<LmResult> for SolverOutcome {
    fn from(result: LmResult) -> Self {
        Self {
            parameters: result.params,
            converged: result.success,
            message: result.message,
            evaluations: result.func_evals,
        }
    }
}

impl From<GlobalOptResult> for SolverOutcome {
    fn from(result: GlobalOptResult) -> Self {
        Self {
            parameters: result.params,
            converged: result.success,
            message: result.message,
            evaluations: result.func_evals,
        }
    }
}

/// An optimization backend selectable by name.
pub trait Backend: fmt::Debug + Send + Sync {
    /// Name the backend is registered and reported under.
    fn name(&self) -> &str;

    /// Fit the request's model to its points.
    fn solve(&self, request: &SolveRequest<'_>) -> Result<SolverOutcome>;
}

/// The `trf` backend.
#[derive(Debug, Clone, Default)]
pub struct TrustRegionBackend {
    pub config: TrustRegionConfig,
}

impl Backend for TrustRegionBackend {
    fn name(&self) -> &str {
        OptimizerStrategy::TrustRegion.name()
    }

    fn solve(&self, request: &SolveRequest<'_>) -> Result<SolverOutcome> {
        let problem = request.residuals();
        TrustRegionReflective::new(self.config.clone())
            .minimize(&problem, request.initial_guess, request.bounds)
            .map(SolverOutcome::from)
    }
}

/// The `lm` backend: fits without bounds, then clamps the answer into them.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardtBackend {
    pub config: LmConfig,
}

impl Backend for LevenbergMarquardtBackend {
    fn name(&self) -> &str {
        OptimizerStrategy::LevenbergMarquardt.name()
    }

    fn solve(&self, request: &SolveRequest<'_>) -> Result<SolverOutcome> {
        let problem = request.residuals();
        let mut outcome = SolverOutcome::from(
            LevenbergMarquardt::with_config(self.config.clone())
                .minimize(&problem, request.initial_guess)?,
        );
        outcome.parameters = request.bounds.clamp(&outcome.parameters);
        Ok(outcome)
    }
}

/// The `dogbox` backend.
#[derive(Debug, Clone, Default)]
pub struct DogboxBackend {
    pub config: TrustRegionConfig,
}

impl Backend for DogboxBackend {
    fn name(&self) -> &str {
        OptimizerStrategy::Dogbox.name()
    }

    fn solve(&self, request: &SolveRequest<'_>) -> Result<SolverOutcome> {
        let problem = request.residuals();
        Dogbox::new(self.config.clone())
            .minimize(&problem, request.initial_guess, request.bounds)
            .map(SolverOutcome::from)
    }
}

/// The `curve_fit` backend.
#[derive(Debug, Clone, Default)]
pub struct CurveFitBackend {
    pub fitter: CurveFit,
}

impl Backend for CurveFitBackend {
    fn name(&self) -> &str {
        OptimizerStrategy::CurveFit.name()
    }

    fn solve(&self, request: &SolveRequest<'_>) -> Result<SolverOutcome> {
        let problem = CurveFitProblem::new(
            request.model,
            request.dataset.dry_bulb(),
            request.dataset.wet_bulb(),
            request.dataset.humidity(),
        )?;
        self.fitter
            .fit(&problem, request.initial_guess, request.bounds)
            .map(SolverOutcome::from)
    }
}

/// The `differential_evolution` backend. Ignores the initial guess.
#[derive(Debug, Clone, Default)]
pub struct DifferentialEvolutionBackend {
    pub config: DeConfig,
}

impl Backend for DifferentialEvolutionBackend {
    fn name(&self) -> &str {
        OptimizerStrategy::DifferentialEvolution.name()
    }

    fn solve(&self, request: &SolveRequest<'_>) -> Result<SolverOutcome> {
        let problem = request.residuals();
        DifferentialEvolution::new(self.config.clone())
            .optimize(&problem, request.bounds)
            .map(SolverOutcome::from)
    }
}

/// Named backends in registration order.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The five built-in backends configured from `config`.
    pub fn standard(config: &CalibrationConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(TrustRegionBackend {
            config: config.trust_region.clone(),
        }));
        registry.register(Box::new(LevenbergMarquardtBackend {
            config: config.levenberg_marquardt.clone(),
        }));
        registry.register(Box::new(DogboxBackend {
            config: config.trust_region.clone(),
        }));
        registry.register(Box::new(CurveFitBackend {
            fitter: CurveFit::new(config.trust_region.clone())
                .with_max_evaluations(config.curve_fit_max_evaluations),
        }));
        registry.register(Box::new(DifferentialEvolutionBackend {
            config: config.differential_evolution.clone(),
        }));
        registry
    }

    /// Add a backend. One with the same name is replaced in place.
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        match self.backends.iter().position(|b| b.name() == backend.name()) {
            Some(index) => self.backends[index] = backend,
            None => self.backends.push(backend),
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Backend> {
        self.backends
            .iter()
            .find(|b| b.name() == name)
            .map(|b| b.as_ref())
    }

    /// Position of a backend in registration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.backends.iter().position(|b| b.name() == name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Look a method up by name, accepting the aliases of the built-in strategies.
    pub fn resolve(&self, method: &str) -> Result<&dyn Backend> {
        if let Some(backend) = self.get(method) {
            return Ok(backend);
        }
        let strategy = method.parse::<OptimizerStrategy>()?;
        self.get(strategy.name())
            .ok_or_else(|| PsyCalError::UnknownMethod(method.to_string()))
    }
}

/// Run one backend and convert its outcome into a [`FitResult`].
///
/// Backend errors and non-finite parameters produce a fallback result that
/// keeps the initial guess.
pub fn run_backend(backend: &dyn Backend, request: &SolveRequest<'_>) -> FitResult {
    let method = backend.name();
    let residuals = request.residuals();
    let cost_at = |params: &Array1<f64>| {
        residuals
            .residuals(params)
            .map(|r| finite_cost(&r))
            .unwrap_or(f64::INFINITY)
    };

    let failure = match backend.solve(request) {
        Ok(outcome) => {
            if outcome.parameters.len() == request.initial_guess.len()
                && outcome.parameters.iter().all(|v| v.is_finite())
            {
                debug!(
                    method,
                    converged = outcome.converged,
                    evaluations = outcome.evaluations,
                    message = %outcome.message,
                    "backend finished"
                );
                return FitResult {
                    method: method.to_string(),
                    cost: cost_at(&outcome.parameters),
                    parameters: outcome.parameters,
                    converged: outcome.converged,
                    message: outcome.message,
                    evaluations: outcome.evaluations,
                    fallback: false,
                };
            }
            "backend returned invalid parameters".to_string()
        }
        Err(e) => e.to_string(),
    };

    warn!(method, error = %failure, "backend failed, keeping the initial guess");
    FitResult::fallback(
        method,
        request.initial_guess,
        cost_at(request.initial_guess),
        &failure,
    )
}
