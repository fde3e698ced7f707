//! Modified psychrometric formula.
//!
//! ```text
//! UR = 100 / p_sat(T_ref) · [A·exp(B·ΔT) + C·ΔT + D]
//! ```
//!
//! The reference temperature is fixed at construction; parameter bounds and
//! the initial guess scale with `p_sat(T_ref)`.

use super::{clamp_humidity, FormulaModel, ModelKind};
use crate::bounds::{BoundBox, Bounds};
use crate::psychrometry::saturation_pressure_floored;
use ndarray::{array, Array1};

const PARAMETER_NAMES: [&str; 4] = ["A", "B", "C", "D"];

/// Reference temperature used when none is configured (°C).
pub const DEFAULT_REFERENCE_TEMPERATURE: f64 = 55.0;

/// Constants file key holding the reference temperature.
pub const REFERENCE_TEMPERATURE_KEY: &str = "T_ref";

/// Modified psychrometric model with parameters `[A, B, C, D]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModifiedPsychrometric {
    reference_temperature: f64,
    reference_pressure: f64,
}

impl Default for ModifiedPsychrometric {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_TEMPERATURE)
    }
}

impl ModifiedPsychrometric {
    pub fn new(reference_temperature: f64) -> Self {
        Self {
            reference_temperature,
            reference_pressure: saturation_pressure_floored(reference_temperature),
        }
    }

    pub fn reference_temperature(&self) -> f64 {
        self.reference_temperature
    }

    /// Saturation pressure at the reference temperature (kPa).
    pub fn reference_pressure(&self) -> f64 {
        self.reference_pressure
    }
}

impl FormulaModel for ModifiedPsychrometric {
    fn kind(&self) -> ModelKind {
        ModelKind::ModifiedPsychrometric
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &PARAMETER_NAMES
    }

    fn bounds(&self) -> BoundBox {
        let limit = 10.0 * self.reference_pressure;
        BoundBox::new(vec![
            Bounds { min: -limit, max: limit },
            Bounds { min: -10.0, max: 10.0 },
            Bounds { min: -limit, max: limit },
            Bounds { min: -limit, max: limit },
        ])
    }

    fn default_initial_guess(&self) -> Array1<f64> {
        let p = self.reference_pressure;
        array![0.1 * p, 0.1, -0.01 * p, 0.5 * p]
    }

    fn evaluate(&self, ts: f64, tu: f64, params: &Array1<f64>) -> f64 {
        let dt = ts - tu;
        let bracket = params[0] * (params[1] * dt).exp() + params[2] * dt + params[3];
        clamp_humidity(100.0 * bracket / self.reference_pressure)
    }

    fn clamps_output(&self) -> bool {
        true
    }

    fn formula(&self) -> String {
        format!(
            "UR = (1/p_sat({:.2}°C)) * [A*exp(B*ΔT) + C*ΔT + D] * 100",
            self.reference_temperature
        )
    }

    fn fixed_constants(&self) -> Vec<(String, f64)> {
        vec![(REFERENCE_TEMPERATURE_KEY.to_string(), self.reference_temperature)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psychrometry::saturation_pressure;
    use approx::assert_relative_eq;

    #[test]
    fn test_reference_scaling() {
        let model = ModifiedPsychrometric::default();
        let p = saturation_pressure(55.0);
        assert_relative_eq!(model.reference_pressure(), p);
        assert_relative_eq!(model.bounds().upper()[0], 10.0 * p);
        assert_relative_eq!(model.default_initial_guess()[3], 0.5 * p);
    }

    #[test]
    fn test_evaluate() {
        let model = ModifiedPsychrometric::default();
        let p = model.reference_pressure();
        let params = array![2.0, 0.05, -0.8, 12.0];
        let expected = 100.0 / p * (2.0 * (0.05f64 * 5.0).exp() - 0.8 * 5.0 + 12.0);
        assert_relative_eq!(model.evaluate(30.0, 25.0, &params), expected, epsilon = 1e-12);
        // Initial guess at ΔT = 0 gives 60 %
        assert_relative_eq!(
            model.evaluate(30.0, 30.0, &model.default_initial_guess()),
            60.0,
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_clamped_and_reference_constant() {
        let model = ModifiedPsychrometric::new(60.0);
        let p = model.reference_pressure();
        assert_relative_eq!(model.evaluate(30.0, 20.0, &array![p, 0.0, 0.0, p]), 100.0);
        assert_relative_eq!(model.evaluate(30.0, 20.0, &array![-p, 0.0, 0.0, 0.0]), 0.0);
        assert_eq!(
            model.fixed_constants(),
            vec![(REFERENCE_TEMPERATURE_KEY.to_string(), 60.0)]
        );
    }
}
