//! Calibration points.
//!
//! A calibration point is one psychrometer reading: dry-bulb temperature TS,
//! wet-bulb temperature TU (both °C) and the reference relative humidity UR
//! in percent measured by an independent instrument.

use crate::error::{PsyCalError, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Minimum number of points any calibration requires.
pub const MIN_CALIBRATION_POINTS: usize = 4;

/// Plausible temperature range in °C; readings outside it are only warned about.
pub const TEMPERATURE_RANGE: (f64, f64) = (-50.0, 100.0);

/// Physical relative humidity range in percent.
pub const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);

/// One psychrometer reading with its reference humidity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// Dry-bulb temperature (°C)
    pub ts: f64,
    /// Wet-bulb temperature (°C)
    pub tu: f64,
    /// Reference relative humidity (%)
    pub ur: f64,
}

impl CalibrationPoint {
    pub fn new(ts: f64, tu: f64, ur: f64) -> Self {
        Self { ts, tu, ur }
    }

    /// Psychrometric depression TS - TU.
    pub fn depression(&self) -> f64 {
        self.ts - self.tu
    }

    fn is_finite(&self) -> bool {
        self.ts.is_finite() && self.tu.is_finite() && self.ur.is_finite()
    }

    /// Emit warnings for implausible readings. Returns the number of warnings.
    fn warn_if_implausible(&self, index: usize) -> usize {
        let mut warnings = 0;
        let (t_min, t_max) = TEMPERATURE_RANGE;
        if !(t_min..=t_max).contains(&self.ts) || !(t_min..=t_max).contains(&self.tu) {
            warn!(index, ts = self.ts, tu = self.tu, "temperature outside plausible range");
            warnings += 1;
        }
        let (h_min, h_max) = HUMIDITY_RANGE;
        if !(h_min..=h_max).contains(&self.ur) {
            warn!(index, ur = self.ur, "relative humidity outside [0, 100]");
            warnings += 1;
        }
        if self.tu > self.ts {
            warn!(index, ts = self.ts, tu = self.tu, "wet bulb warmer than dry bulb");
            warnings += 1;
        }
        warnings
    }
}

impl From<(f64, f64, f64)> for CalibrationPoint {
    fn from((ts, tu, ur): (f64, f64, f64)) -> Self {
        Self { ts, tu, ur }
    }
}

/// An ordered, immutable collection of calibration points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointDataset {
    points: Vec<CalibrationPoint>,
}

impl PointDataset {
    /// Build a dataset, rejecting non-finite readings.
    ///
    /// Out-of-range readings are kept and reported through `tracing` warnings.
    pub fn new(points: Vec<CalibrationPoint>) -> Result<Self> {
        for (index, point) in points.iter().enumerate() {
            if !point.is_finite() {
                return Err(PsyCalError::InvalidInput(format!(
                    "Calibration point {} has a non-finite value: {:?}",
                    index, point
                )));
            }
            point.warn_if_implausible(index);
        }
        Ok(Self { points })
    }

    /// Build a dataset from `(TS, TU, UR)` triples.
    pub fn from_triples(triples: &[(f64, f64, f64)]) -> Result<Self> {
        Self::new(triples.iter().copied().map(CalibrationPoint::from).collect())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CalibrationPoint> {
        self.points.iter()
    }

    /// Dry-bulb temperatures.
    pub fn dry_bulb(&self) -> Array1<f64> {
        self.points.iter().map(|p| p.ts).collect()
    }

    /// Wet-bulb temperatures.
    pub fn wet_bulb(&self) -> Array1<f64> {
        self.points.iter().map(|p| p.tu).collect()
    }

    /// Reference humidities.
    pub fn humidity(&self) -> Array1<f64> {
        self.points.iter().map(|p| p.ur).collect()
    }

    /// Psychrometric depressions TS - TU.
    pub fn depressions(&self) -> Array1<f64> {
        self.points.iter().map(CalibrationPoint::depression).collect()
    }

    /// Fail with `InsufficientPoints` unless at least `required` points are present.
    pub fn ensure_min_points(&self, required: usize) -> Result<()> {
        if self.points.len() < required {
            return Err(PsyCalError::InsufficientPoints {
                required,
                found: self.points.len(),
            });
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a PointDataset {
    type Item = &'a CalibrationPoint;
    type IntoIter = std::slice::Iter<'a, CalibrationPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

impl TryFrom<Vec<CalibrationPoint>> for PointDataset {
    type Error = PsyCalError;

    fn try_from(points: Vec<CalibrationPoint>) -> Result<Self> {
        Self::new(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_accessors() {
        let dataset =
            PointDataset::from_triples(&[(30.0, 20.0, 45.0), (35.0, 25.0, 50.0)]).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.dry_bulb(), array![30.0, 35.0]);
        assert_eq!(dataset.wet_bulb(), array![20.0, 25.0]);
        assert_eq!(dataset.humidity(), array![45.0, 50.0]);
        assert_eq!(dataset.depressions(), array![10.0, 10.0]);
    }

    #[test]
    fn test_non_finite_rejected() {
        let result = PointDataset::from_triples(&[(30.0, f64::NAN, 45.0)]);
        assert!(matches!(result, Err(PsyCalError::InvalidInput(_))));
    }

    #[test]
    fn test_out_of_range_kept() {
        let dataset = PointDataset::from_triples(&[(120.0, 20.0, 105.0), (20.0, 25.0, 50.0)]).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.points()[0].warn_if_implausible(0), 2);
        assert_eq!(dataset.points()[1].warn_if_implausible(1), 1);
    }

    #[test]
    fn test_min_points() {
        let dataset = PointDataset::from_triples(&[
            (30.0, 20.0, 45.0),
            (35.0, 25.0, 50.0),
            (40.0, 28.0, 48.0),
        ])
        .unwrap();
        match dataset.ensure_min_points(MIN_CALIBRATION_POINTS) {
            Err(PsyCalError::InsufficientPoints { required, found }) => {
                assert_eq!(required, 4);
                assert_eq!(found, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(dataset.ensure_min_points(3).is_ok());
    }

    #[test]
    fn test_serde_roundtrip_shape() {
        let dataset = PointDataset::from_triples(&[(30.0, 20.0, 45.0)]).unwrap();
        let json = serde_json::to_string(&dataset).unwrap();
        assert_eq!(json, r#"[{"ts":30.0,"tu":20.0,"ur":45.0}]"#);
    }
}
