//! Calibration settings.
//!
//! Everything a calibration run can be tuned with lives in one
//! [`CalibrationConfig`], which round-trips through JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bounded::DEFAULT_MAX_EVALUATIONS;
use crate::error::{PsyCalError, Result};
use crate::global_opt::DeConfig;
use crate::lm::{LmConfig, TrustRegionConfig};
use crate::models::DEFAULT_REFERENCE_TEMPERATURE;

/// Settings shared by every backend of a calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Reference temperature (°C) of the modified psychrometric model. Default: 55
    pub reference_temperature: f64,

    /// Settings of the `trf` and `dogbox` backends
    pub trust_region: TrustRegionConfig,

    /// Settings of the `lm` backend
    pub levenberg_marquardt: LmConfig,

    /// Residual evaluation cap of the `curve_fit` backend. Default: 10000
    pub curve_fit_max_evaluations: usize,

    /// Settings of the `differential_evolution` backend
    pub differential_evolution: DeConfig,

    /// Run the requested backends on the rayon thread pool. Default: false
    pub parallel: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            reference_temperature: DEFAULT_REFERENCE_TEMPERATURE,
            trust_region: TrustRegionConfig::default(),
            levenberg_marquardt: LmConfig::default(),
            curve_fit_max_evaluations: DEFAULT_MAX_EVALUATIONS,
            differential_evolution: DeConfig::default(),
            parallel: false,
        }
    }
}

impl CalibrationConfig {
    pub fn with_reference_temperature(mut self, reference_temperature: f64) -> Self {
        self.reference_temperature = reference_temperature;
        self
    }

    pub fn with_trust_region(mut self, trust_region: TrustRegionConfig) -> Self {
        self.trust_region = trust_region;
        self
    }

    pub fn with_levenberg_marquardt(mut self, levenberg_marquardt: LmConfig) -> Self {
        self.levenberg_marquardt = levenberg_marquardt;
        self
    }

    pub fn with_curve_fit_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.curve_fit_max_evaluations = max_evaluations;
        self
    }

    pub fn with_differential_evolution(mut self, differential_evolution: DeConfig) -> Self {
        self.differential_evolution = differential_evolution;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Check every nested setting.
    pub fn validate(&self) -> Result<()> {
        if !self.reference_temperature.is_finite() {
            return Err(PsyCalError::InvalidInput(format!(
                "reference_temperature must be finite, got {}",
                self.reference_temperature
            )));
        }
        if self.curve_fit_max_evaluations == 0 {
            return Err(PsyCalError::InvalidInput(
                "curve_fit_max_evaluations must be positive".to_string(),
            ));
        }
        self.trust_region.validate()?;
        self.levenberg_marquardt.validate()?;
        self.differential_evolution.validate()
    }

    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
