//! Calibration orchestration.
//!
//! A [`Calibrator`] validates the points, runs every requested backend on
//! one formula model, scores each fit and picks the best by RMSE. Backend
//! failures are recorded as fallback results; only invalid input aborts a
//! calibration.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::Array1;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CalibrationConfig;
use crate::dataset::PointDataset;
use crate::dispatch::{run_backend, Backend, BackendRegistry, FitResult, SolveRequest};
use crate::error::{PsyCalError, Result};
use crate::io::ConstantsFile;
use crate::metrics::FitMetrics;
use crate::models::{CalibratedModel, FormulaModel, ModelKind};

/// A fit together with its scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodReport {
    pub fit: FitResult,
    pub metrics: FitMetrics,
}

/// Everything one calibration produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    /// Calibrated formula family
    pub model: ModelKind,

    /// Reference temperature the model was built with
    pub reference_temperature: f64,

    /// Parameter names, in vector order
    pub parameter_names: Vec<String>,

    /// Number of calibration points
    pub point_count: usize,

    /// Methods in the order they were run
    pub methods: Vec<String>,

    /// Fit and metrics per method name
    pub results: BTreeMap<String, MethodReport>,

    /// Method with the lowest RMSE among those that did not fall back
    pub best: Option<String>,
}

impl CalibrationReport {
    pub fn get(&self, method: &str) -> Option<&MethodReport> {
        self.results.get(method)
    }

    /// Report of the best method, if any backend succeeded.
    pub fn best(&self) -> Option<&MethodReport> {
        self.best.as_deref().and_then(|name| self.results.get(name))
    }

    fn require(&self, method: &str) -> Result<&MethodReport> {
        self.results
            .get(method)
            .ok_or_else(|| PsyCalError::UnknownMethod(method.to_string()))
    }

    /// The model with the parameters fitted by `method`.
    pub fn calibrated_model(&self, method: &str) -> Result<CalibratedModel> {
        let report = self.require(method)?;
        CalibratedModel::new(
            self.model.build(self.reference_temperature),
            report.fit.parameters.clone(),
        )
    }

    /// Constants file for the parameters fitted by `method`, with a header
    /// naming the formula, the method and its scores.
    pub fn constants_file(&self, method: &str) -> Result<ConstantsFile> {
        let report = self.require(method)?;
        let model = self.model.build(self.reference_temperature);
        let mut constants = ConstantsFile::new()
            .with_comment(format!("Calibrated constants: {}", self.model.label()))
            .with_comment(format!("Formula: {}", model.formula()))
            .with_comment(format!("Method: {}", method))
            .with_comment(format!("Points: {}", self.point_count))
            .with_comment(format!("RMSE: {:.6}", report.metrics.rmse))
            .with_comment(format!("R2: {:.6}", report.metrics.r2))
            .with_comment(format!(
                "Mean error: {:.6}",
                report.metrics.legacy_mean_error(self.model)
            ));
        for (name, value) in model.constants(&report.fit.parameters)? {
            constants.insert(name, value);
        }
        Ok(constants)
    }

    /// Constants file of the best method.
    pub fn best_constants_file(&self) -> Result<ConstantsFile> {
        let best = self.best.as_deref().ok_or_else(|| {
            PsyCalError::OptimizationFailure("No method produced a usable fit".to_string())
        })?;
        self.constants_file(best)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for CalibrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Calibration of {} on {} points",
            self.model.label(),
            self.point_count
        )?;
        writeln!(f, "Parameters: {}", self.parameter_names.join(", "))?;
        for method in &self.methods {
            if let Some(report) = self.results.get(method) {
                writeln!(
                    f,
                    "  {:<24} converged={:<5} rmse={:.4} r2={:.4} params={:?}",
                    method,
                    report.fit.converged,
                    report.metrics.rmse,
                    report.metrics.r2,
                    report.fit.parameters.to_vec()
                )?;
            }
        }
        match &self.best {
            Some(best) => writeln!(f, "Best method: {}", best),
            None => writeln!(f, "Best method: none"),
        }
    }
}

/// Pick the lowest RMSE among non-fallback results.
///
/// `candidates` holds `(registration index, method, report)`; ties go to
/// the lower registration index.
fn select_best(candidates: &[(usize, &str, &MethodReport)]) -> Option<String> {
    candidates
        .iter()
        .filter(|(_, _, report)| !report.fit.fallback && report.metrics.rmse.is_finite())
        .fold(None, |best: Option<&(usize, &str, &MethodReport)>, candidate| {
            match best {
                Some(current)
                    if (current.2.metrics.rmse, current.0)
                        <= (candidate.2.metrics.rmse, candidate.0) =>
                {
                    Some(current)
                }
                _ => Some(candidate),
            }
        })
        .map(|(_, name, _)| name.to_string())
}

/// Runs optimizer backends on formula models.
#[derive(Debug)]
pub struct Calibrator {
    config: CalibrationConfig,
    registry: BackendRegistry,
}

impl Default for Calibrator {
    fn default() -> Self {
        let config = CalibrationConfig::default();
        let registry = BackendRegistry::standard(&config);
        Self { config, registry }
    }
}

impl Calibrator {
    /// A calibrator with the five standard backends configured from `config`.
    pub fn new(config: CalibrationConfig) -> Result<Self> {
        config.validate()?;
        let registry = BackendRegistry::standard(&config);
        Ok(Self { config, registry })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Register an extra backend, replacing one with the same name.
    pub fn with_backend(mut self, backend: Box<dyn Backend>) -> Self {
        self.registry.register(backend);
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BackendRegistry {
        &mut self.registry
    }

    /// Calibrate one model family with the named methods.
    ///
    /// # Arguments
    ///
    /// * `dataset` - Calibration points
    /// * `kind` - Formula family
    /// * `methods` - Backend names; duplicates run once
    /// * `initial_guess` - Starting point, or `None` for the model's own guess
    pub fn calibrate(
        &self,
        dataset: &PointDataset,
        kind: ModelKind,
        methods: &[&str],
        initial_guess: Option<&[f64]>,
    ) -> Result<CalibrationReport> {
        let model = kind.build(self.config.reference_temperature);
        self.calibrate_model(dataset, model.as_ref(), methods, initial_guess)
    }

    /// Calibrate one model family with every registered backend.
    pub fn calibrate_all(
        &self,
        dataset: &PointDataset,
        kind: ModelKind,
        initial_guess: Option<&[f64]>,
    ) -> Result<CalibrationReport> {
        let names = self.registry.names();
        self.calibrate(dataset, kind, &names, initial_guess)
    }

    /// Calibrate an already built model.
    pub fn calibrate_model(
        &self,
        dataset: &PointDataset,
        model: &dyn FormulaModel,
        methods: &[&str],
        initial_guess: Option<&[f64]>,
    ) -> Result<CalibrationReport> {
        if methods.is_empty() {
            return Err(PsyCalError::InvalidInput(
                "At least one optimization method is required".to_string(),
            ));
        }
        let mut backends: Vec<&dyn Backend> = Vec::with_capacity(methods.len());
        for method in methods {
            let backend = self.registry.resolve(method)?;
            if !backends.iter().any(|b| b.name() == backend.name()) {
                backends.push(backend);
            }
        }

        dataset.ensure_min_points(model.required_min_points())?;

        let initial = match initial_guess {
            Some(guess) => {
                let guess = Array1::from(guess.to_vec());
                model.check_parameters(&guess)?;
                if guess.iter().any(|v| !v.is_finite()) {
                    return Err(PsyCalError::InvalidInput(format!(
                        "Initial guess must be finite, got {:?}",
                        guess.to_vec()
                    )));
                }
                guess
            }
            None => model.initial_guess(dataset),
        };
        let bounds = model.bounds();
        let names: Vec<&str> = backends.iter().map(|b| b.name()).collect();
        info!(
            model = %model.kind(),
            methods = ?names,
            points = dataset.len(),
            "starting calibration"
        );

        let request = SolveRequest {
            model,
            dataset,
            initial_guess: &initial,
            bounds: &bounds,
        };
        let fits = self.run_backends(&backends, &request);

        let mut results = BTreeMap::new();
        let mut methods_run = Vec::with_capacity(fits.len());
        for fit in fits {
            let metrics = FitMetrics::compute(model, dataset, &fit.parameters)?;
            info!(
                method = %fit.method,
                rmse = metrics.rmse,
                r2 = metrics.r2,
                converged = fit.converged,
                fallback = fit.fallback,
                "method finished"
            );
            methods_run.push(fit.method.clone());
            results.insert(fit.method.clone(), MethodReport { fit, metrics });
        }

        let candidates: Vec<(usize, &str, &MethodReport)> = methods_run
            .iter()
            .filter_map(|name| {
                let position = self.registry.position(name)?;
                results.get(name).map(|report| (position, name.as_str(), report))
            })
            .collect();
        let best = select_best(&candidates);
        match &best {
            Some(name) => info!(best = %name, "selected best method"),
            None => warn!(model = %model.kind(), "every optimization method failed"),
        }

        Ok(CalibrationReport {
            model: model.kind(),
            reference_temperature: self.config.reference_temperature,
            parameter_names: model.parameter_names().iter().map(|s| s.to_string()).collect(),
            point_count: dataset.len(),
            methods: methods_run,
            results,
            best,
        })
    }

    fn run_backends(&self, backends: &[&dyn Backend], request: &SolveRequest<'_>) -> Vec<FitResult> {
        #[cfg(feature = "parallel")]
        {
            if self.config.parallel {
                return backends
                    .par_iter()
                    .map(|backend| run_backend(*backend, request))
                    .collect();
            }
        }
        backends
            .iter()
            .map(|backend| run_backend(*backend, request))
            .collect()
    }
}

/// Calibrate `model_name` on `points` with the default configuration.
///
/// ```no_run
/// use psycal_rs::{calibrate, PointDataset};
///
/// let points = PointDataset::from_triples(&[
///     (30.0, 20.0, 45.0),
///     (35.0, 25.0, 50.0),
///     (40.0, 28.0, 48.0),
///     (45.0, 30.0, 52.0),
/// ])?;
/// let report = calibrate(&points, "log_linear", &["trf"], None)?;
/// println!("{}", report);
/// # Ok::<(), psycal_rs::PsyCalError>(())
/// ```
pub fn calibrate(
    points: &PointDataset,
    model_name: &str,
    methods: &[&str],
    initial_guess: Option<&[f64]>,
) -> Result<CalibrationReport> {
    let kind = model_name.parse::<ModelKind>()?;
    Calibrator::default().calibrate(points, kind, methods, initial_guess)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn report(rmse: f64, fallback: bool) -> MethodReport {
        let measured = array![50.0, 60.0];
        let predicted = array![50.0 + rmse, 60.0 + rmse];
        MethodReport {
            fit: FitResult {
                method: String::new(),
                parameters: array![1.0],
                converged: !fallback,
                message: String::new(),
                evaluations: 1,
                cost: 0.0,
                fallback,
            },
            metrics: FitMetrics::from_predictions(&measured, predicted).unwrap(),
        }
    }

    #[test]
    fn test_select_best_lowest_rmse() {
        let a = report(2.0, false);
        let b = report(1.0, false);
        let c = report(0.5, true);
        let best = select_best(&[(0, "trf", &a), (2, "dogbox", &b), (1, "lm", &c)]);
        assert_eq!(best.as_deref(), Some("dogbox"));
    }

    #[test]
    fn test_select_best_ties_follow_registration_order() {
        let a = report(1.0, false);
        let b = report(1.0, false);
        let best = select_best(&[(3, "curve_fit", &a), (0, "trf", &b)]);
        assert_eq!(best.as_deref(), Some("trf"));
    }

    #[test]
    fn test_select_best_none_when_all_fell_back() {
        let a = report(1.0, true);
        assert_eq!(select_best(&[(0, "trf", &a)]), None);
        assert_eq!(select_best(&[]), None);
    }
}
