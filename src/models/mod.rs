//! Humidity formula models.
//!
//! Each model maps a psychrometer reading (TS, TU) and a parameter vector to
//! an estimated relative humidity in percent. Models are stateless apart from
//! fixed construction constants and are shared read-only between solver runs.

use crate::bounds::BoundBox;
use crate::dataset::{PointDataset, MIN_CALIBRATION_POINTS};
use crate::error::{PsyCalError, Result};
use crate::io::ConstantsFile;
use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod adiabatic;
mod exponential;
mod log_linear;
mod modified;

pub use adiabatic::AdiabaticRatio;
pub use exponential::ExponentialPsychrometric;
pub use log_linear::LogLinear;
pub use modified::{ModifiedPsychrometric, DEFAULT_REFERENCE_TEMPERATURE, REFERENCE_TEMPERATURE_KEY};

/// Clamp a humidity estimate into [0, 100] percent.
pub fn clamp_humidity(ur: f64) -> f64 {
    ur.clamp(0.0, 100.0)
}

/// A parametric relative-humidity formula.
pub trait FormulaModel: fmt::Debug + Send + Sync {
    /// The formula family this model belongs to.
    fn kind(&self) -> ModelKind;

    /// Names of the parameters, in vector order.
    fn parameter_names(&self) -> &'static [&'static str];

    /// Number of parameters.
    fn parameter_count(&self) -> usize {
        self.parameter_names().len()
    }

    /// Admissible parameter box.
    fn bounds(&self) -> BoundBox;

    /// Data-independent starting point.
    fn default_initial_guess(&self) -> Array1<f64>;

    /// Starting point for a local solver, possibly derived from the data.
    fn initial_guess(&self, _dataset: &PointDataset) -> Array1<f64> {
        self.default_initial_guess()
    }

    /// Estimated relative humidity (%) for one reading.
    ///
    /// `params` must hold exactly [`parameter_count`](Self::parameter_count) values.
    fn evaluate(&self, ts: f64, tu: f64, params: &Array1<f64>) -> f64;

    /// Whether [`evaluate`](Self::evaluate) clamps its output into [0, 100].
    fn clamps_output(&self) -> bool;

    /// Human readable formula, written into constants file headers.
    fn formula(&self) -> String;

    /// Extra fixed constants that must be stored next to the fitted parameters.
    fn fixed_constants(&self) -> Vec<(String, f64)> {
        Vec::new()
    }

    /// Minimum number of points a calibration of this model accepts.
    fn required_min_points(&self) -> usize {
        MIN_CALIBRATION_POINTS.max(self.parameter_count())
    }

    /// Fail with `DimensionMismatch` unless `params` has the right length.
    fn check_parameters(&self, params: &Array1<f64>) -> Result<()> {
        if params.len() != self.parameter_count() {
            return Err(PsyCalError::DimensionMismatch(format!(
                "{} expects {} parameters, got {}",
                self.kind(),
                self.parameter_count(),
                params.len()
            )));
        }
        Ok(())
    }

    /// Vectorized evaluation over parallel TS and TU arrays.
    fn evaluate_batch(
        &self,
        ts: &Array1<f64>,
        tu: &Array1<f64>,
        params: &Array1<f64>,
    ) -> Result<Array1<f64>> {
        self.check_parameters(params)?;
        if ts.len() != tu.len() {
            return Err(PsyCalError::DimensionMismatch(format!(
                "TS has {} values but TU has {}",
                ts.len(),
                tu.len()
            )));
        }
        let mut out = Array1::zeros(ts.len());
        Zip::from(&mut out)
            .and(ts)
            .and(tu)
            .for_each(|o, &t_s, &t_u| *o = self.evaluate(t_s, t_u, params));
        Ok(out)
    }

    /// Fitted parameters (plus fixed constants) as named constants entries.
    fn constants(&self, params: &Array1<f64>) -> Result<Vec<(String, f64)>> {
        self.check_parameters(params)?;
        let mut entries: Vec<(String, f64)> = self
            .parameter_names()
            .iter()
            .zip(params.iter())
            .map(|(name, &value)| (name.to_string(), value))
            .collect();
        entries.extend(self.fixed_constants());
        Ok(entries)
    }

    /// Read this model's parameters back from a constants file.
    fn parameters_from_constants(&self, constants: &ConstantsFile) -> Result<Array1<f64>> {
        self.parameter_names()
            .iter()
            .map(|name| constants.require(name))
            .collect::<Result<Vec<f64>>>()
            .map(Array1::from)
    }
}

/// The formula families known to the calibrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// `UR = 100·[A·exp(B·TU/(TU+C)) − D·(TS−TU)] / [A·exp(B·TS/(TS+C))]`, unclamped
    ExponentialPsychrometric,
    /// `UR = 100·exp(a + b·ΔT)`
    LogLinear,
    /// `UR = 100/p_sat(T_ref) · [A·exp(B·ΔT) + C·ΔT + D]`
    ModifiedPsychrometric,
    /// `UR = 100·K·p_sat(TU)/p_sat(TS)`
    AdiabaticRatio,
}

impl ModelKind {
    /// Every model family.
    pub const ALL: [ModelKind; 4] = [
        ModelKind::ExponentialPsychrometric,
        ModelKind::LogLinear,
        ModelKind::ModifiedPsychrometric,
        ModelKind::AdiabaticRatio,
    ];

    /// Canonical machine name.
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::ExponentialPsychrometric => "exponential_psychrometric",
            ModelKind::LogLinear => "log_linear",
            ModelKind::ModifiedPsychrometric => "modified_psychrometric",
            ModelKind::AdiabaticRatio => "adiabatic_ratio",
        }
    }

    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::ExponentialPsychrometric => "Exponential psychrometric",
            ModelKind::LogLinear => "Log-linear",
            ModelKind::ModifiedPsychrometric => "Modified psychrometric",
            ModelKind::AdiabaticRatio => "Adiabatic ratio",
        }
    }

    /// Instantiate the model. `reference_temperature` only affects the modified
    /// psychrometric model.
    pub fn build(&self, reference_temperature: f64) -> Box<dyn FormulaModel> {
        match self {
            ModelKind::ExponentialPsychrometric => Box::new(ExponentialPsychrometric),
            ModelKind::LogLinear => Box::new(LogLinear),
            ModelKind::ModifiedPsychrometric => {
                Box::new(ModifiedPsychrometric::new(reference_temperature))
            }
            ModelKind::AdiabaticRatio => Box::new(AdiabaticRatio),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = PsyCalError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "exponential_psychrometric" | "exponential" | "psychrometric" => {
                Ok(ModelKind::ExponentialPsychrometric)
            }
            "log_linear" | "loglinear" => Ok(ModelKind::LogLinear),
            "modified_psychrometric" | "modified" => Ok(ModelKind::ModifiedPsychrometric),
            "adiabatic_ratio" | "adiabatic" => Ok(ModelKind::AdiabaticRatio),
            _ => Err(PsyCalError::UnknownModel(s.to_string())),
        }
    }
}

/// A model together with fitted parameters, ready to predict humidity.
#[derive(Debug)]
pub struct CalibratedModel {
    model: Box<dyn FormulaModel>,
    parameters: Array1<f64>,
}

impl CalibratedModel {
    /// Pair a model with parameters, checking their count.
    pub fn new(model: Box<dyn FormulaModel>, parameters: Array1<f64>) -> Result<Self> {
        model.check_parameters(&parameters)?;
        Ok(Self { model, parameters })
    }

    /// Restore a calibrated model from a constants file.
    ///
    /// The modified psychrometric model reads its reference temperature from
    /// the `T_ref` entry when present and falls back to
    /// `default_reference_temperature` otherwise.
    pub fn from_constants(
        kind: ModelKind,
        constants: &ConstantsFile,
        default_reference_temperature: f64,
    ) -> Result<Self> {
        let reference_temperature = constants
            .get(REFERENCE_TEMPERATURE_KEY)
            .unwrap_or(default_reference_temperature);
        let model = kind.build(reference_temperature);
        let parameters = model.parameters_from_constants(constants)?;
        Self::new(model, parameters)
    }

    pub fn model(&self) -> &dyn FormulaModel {
        self.model.as_ref()
    }

    pub fn parameters(&self) -> &Array1<f64> {
        &self.parameters
    }

    /// Estimated relative humidity (%) for one reading.
    pub fn predict(&self, ts: f64, tu: f64) -> f64 {
        self.model.evaluate(ts, tu, &self.parameters)
    }

    /// Estimated relative humidity (%) for parallel TS and TU arrays.
    pub fn predict_batch(&self, ts: &Array1<f64>, tu: &Array1<f64>) -> Result<Array1<f64>> {
        self.model.evaluate_batch(ts, tu, &self.parameters)
    }
}
