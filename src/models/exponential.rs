//! Exponential psychrometric formula.
//!
//! ```text
//! UR = 100 · [A·exp(B·TU/(TU+C)) − D·(TS−TU)] / [A·exp(B·TS/(TS+C))]
//! ```
//!
//! The numerator and denominator are Magnus-type vapor pressures at the wet
//! and dry bulb, with D playing the role of the psychrometer constant. The
//! output is deliberately left unclamped so that the fit sees the full
//! residual on saturated or supersaturated readings.

use super::{FormulaModel, ModelKind};
use crate::bounds::{BoundBox, Bounds};
use ndarray::{array, Array1};

const PARAMETER_NAMES: [&str; 4] = ["A", "B", "C", "D"];

/// Exponential psychrometric model with parameters `[A, B, C, D]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExponentialPsychrometric;

impl FormulaModel for ExponentialPsychrometric {
    fn kind(&self) -> ModelKind {
        ModelKind::ExponentialPsychrometric
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &PARAMETER_NAMES
    }

    fn bounds(&self) -> BoundBox {
        BoundBox::new(vec![
            Bounds { min: 0.01, max: 100.0 },
            Bounds { min: 0.01, max: 100.0 },
            Bounds { min: 1.0, max: 600.0 },
            Bounds { min: 0.0008, max: 5.0 },
        ])
    }

    fn default_initial_guess(&self) -> Array1<f64> {
        array![6.112, 17.67, 242.5, 1.8]
    }

    fn evaluate(&self, ts: f64, tu: f64, params: &Array1<f64>) -> f64 {
        let (a, b, c, d) = (params[0], params[1], params[2], params[3]);
        let wet = a * (b * tu / (tu + c)).exp();
        let dry = a * (b * ts / (ts + c)).exp();
        100.0 * (wet - d * (ts - tu)) / dry
    }

    fn clamps_output(&self) -> bool {
        false
    }

    fn formula(&self) -> String {
        "UR = 100 * [A*exp(B*TU/(TU+C)) - D*(TS-TU)] / [A*exp(B*TS/(TS+C))]".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_saturated_reading() {
        let model = ExponentialPsychrometric;
        let params = model.default_initial_guess();
        for t in [0.0, 20.0, 45.0] {
            assert_relative_eq!(model.evaluate(t, t, &params), 100.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_textbook_reading() {
        // e_s in hPa with a psychrometer constant of 0.667 hPa/°C
        let model = ExponentialPsychrometric;
        let params = array![6.112, 17.67, 243.5, 0.667];
        let wet = 6.112 * (17.67 * 25.0 / (25.0 + 243.5f64)).exp();
        let dry = 6.112 * (17.67 * 30.0 / (30.0 + 243.5f64)).exp();
        let expected = 100.0 * (wet - 0.667 * 5.0) / dry;
        assert_relative_eq!(model.evaluate(30.0, 25.0, &params), expected, epsilon = 1e-12);
        assert!(expected > 60.0 && expected < 70.0);
    }

    #[test]
    fn test_output_is_not_clamped() {
        let model = ExponentialPsychrometric;
        assert!(!model.clamps_output());
        // Large depression with a large psychrometer constant drives UR negative
        let ur = model.evaluate(60.0, 10.0, &array![6.112, 17.67, 243.5, 5.0]);
        assert!(ur < 0.0);
        // Wet bulb above dry bulb pushes UR above 100
        let ur = model.evaluate(20.0, 25.0, &array![6.112, 17.67, 243.5, 0.667]);
        assert!(ur > 100.0);
    }
}
