//! Fit quality metrics.

use std::fmt;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::dataset::PointDataset;
use crate::error::{PsyCalError, Result};
use crate::models::{FormulaModel, ModelKind};

/// Quality of a parameter set on a dataset.
///
/// Residuals are `measured − predicted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitMetrics {
    /// Root mean squared residual
    pub rmse: f64,

    /// Mean absolute residual
    pub mae: f64,

    /// Coefficient of determination; 0 when the measurements have no spread
    pub r2: f64,

    /// Largest absolute residual
    pub max_abs_error: f64,

    /// Mean absolute residual, reported under its own name
    pub mean_abs_error: f64,

    /// Signed mean residual (bias)
    pub mean_error: f64,

    /// Absolute residual of every point, in dataset order
    pub per_point_errors: Array1<f64>,

    /// Signed residual of every point, in dataset order
    pub residuals: Array1<f64>,

    /// Model output for every point, in dataset order
    pub predicted: Array1<f64>,
}

impl FitMetrics {
    /// Score `params` of `model` against `dataset`.
    pub fn compute(
        model: &dyn FormulaModel,
        dataset: &PointDataset,
        params: &Array1<f64>,
    ) -> Result<Self> {
        let predicted = model.evaluate_batch(&dataset.dry_bulb(), &dataset.wet_bulb(), params)?;
        Self::from_predictions(&dataset.humidity(), predicted)
    }

    /// Score precomputed predictions against measurements.
    pub fn from_predictions(measured: &Array1<f64>, predicted: Array1<f64>) -> Result<Self> {
        if measured.is_empty() {
            return Err(PsyCalError::InvalidInput(
                "Cannot score an empty dataset".to_string(),
            ));
        }
        if measured.len() != predicted.len() {
            return Err(PsyCalError::DimensionMismatch(format!(
                "{} measurements but {} predictions",
                measured.len(),
                predicted.len()
            )));
        }

        let n = measured.len() as f64;
        let residuals = measured - &predicted;
        let per_point_errors = residuals.mapv(f64::abs);
        let ssr = residuals.dot(&residuals);
        let mae = per_point_errors.sum() / n;

        let mean_measured = measured.sum() / n;
        let sst = if measured.iter().all(|&y| y == measured[0]) {
            0.0
        } else {
            measured.mapv(|y| (y - mean_measured).powi(2)).sum()
        };
        let r2 = if sst == 0.0 { 0.0 } else { 1.0 - ssr / sst };

        Ok(Self {
            rmse: (ssr / n).sqrt(),
            mae,
            r2,
            max_abs_error: per_point_errors.fold(0.0, |m: f64, &e| m.max(e)),
            mean_abs_error: mae,
            mean_error: residuals.sum() / n,
            per_point_errors,
            residuals,
            predicted,
        })
    }

    /// The value each model family historically reported as its "mean error".
    ///
    /// The exponential psychrometric family reported the mean absolute
    /// residual; the others reported the signed mean.
    pub fn legacy_mean_error(&self, kind: ModelKind) -> f64 {
        match kind {
            ModelKind::ExponentialPsychrometric => self.mean_abs_error,
            _ => self.mean_error,
        }
    }

    pub fn point_count(&self) -> usize {
        self.residuals.len()
    }
}

impl fmt::Display for FitMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  RMSE: {:.4}", self.rmse)?;
        writeln!(f, "  MAE: {:.4}", self.mae)?;
        writeln!(f, "  R2: {:.6}", self.r2)?;
        writeln!(f, "  Max abs error: {:.4}", self.max_abs_error)?;
        writeln!(f, "  Mean error: {:.4}", self.mean_error)?;
        Ok(())
    }
}
