//! Adiabatic-ratio formula: `UR = 100·K·p_sat(TU)/p_sat(TS)`.

use super::{clamp_humidity, FormulaModel, ModelKind};
use crate::bounds::{BoundBox, Bounds};
use crate::psychrometry::{saturation_pressure, saturation_pressure_floored};
use ndarray::{array, Array1};

const PARAMETER_NAMES: [&str; 1] = ["K"];

/// Adiabatic-ratio model with the single parameter `[K]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdiabaticRatio;

impl FormulaModel for AdiabaticRatio {
    fn kind(&self) -> ModelKind {
        ModelKind::AdiabaticRatio
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &PARAMETER_NAMES
    }

    fn bounds(&self) -> BoundBox {
        BoundBox::new(vec![Bounds { min: 0.1, max: 5.0 }])
    }

    fn default_initial_guess(&self) -> Array1<f64> {
        array![1.0]
    }

    fn evaluate(&self, ts: f64, tu: f64, params: &Array1<f64>) -> f64 {
        let ratio = saturation_pressure(tu) / saturation_pressure_floored(ts);
        clamp_humidity(100.0 * params[0] * ratio)
    }

    fn clamps_output(&self) -> bool {
        true
    }

    fn formula(&self) -> String {
        "UR = 100 * K * p_sat(TU) / p_sat(TS)".to_string()
    }
}
