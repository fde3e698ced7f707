//! Synthetic calibration datasets generated from known parameters.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::dataset::{CalibrationPoint, PointDataset};
use crate::error::{PsyCalError, Result};
use crate::models::FormulaModel;

/// Dry-bulb temperatures crossed with psychrometric depressions.
///
/// Every grid point has `TU = TS − ΔT ≤ TS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticGrid {
    pub dry_bulb: Vec<f64>,
    pub depressions: Vec<f64>,
}

impl Default for SyntheticGrid {
    fn default() -> Self {
        Self {
            dry_bulb: vec![25.0, 30.0, 35.0, 40.0, 45.0, 50.0],
            depressions: vec![1.0, 3.0, 5.0, 8.0, 12.0],
        }
    }
}

impl SyntheticGrid {
    pub fn new(dry_bulb: Vec<f64>, depressions: Vec<f64>) -> Result<Self> {
        if depressions.iter().any(|&d| d < 0.0) {
            return Err(PsyCalError::InvalidInput(
                "Depressions must be non-negative".to_string(),
            ));
        }
        Ok(Self {
            dry_bulb,
            depressions,
        })
    }

    pub fn len(&self) -> usize {
        self.dry_bulb.len() * self.depressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(TS, TU)` pairs, dry bulb major.
    pub fn readings(&self) -> Vec<(f64, f64)> {
        self.dry_bulb
            .iter()
            .flat_map(|&ts| self.depressions.iter().map(move |&dt| (ts, ts - dt)))
            .collect()
    }
}

/// Build a dataset whose humidities are `model` evaluated at `params`.
///
/// With `noise_std > 0` Gaussian noise drawn from a generator seeded with
/// `seed` is added to every humidity.
pub fn generate(
    model: &dyn FormulaModel,
    params: &Array1<f64>,
    grid: &SyntheticGrid,
    noise_std: f64,
    seed: u64,
) -> Result<PointDataset> {
    model.check_parameters(params)?;
    let noise = if noise_std > 0.0 {
        Some(
            Normal::new(0.0, noise_std)
                .map_err(|e| PsyCalError::InvalidInput(e.to_string()))?,
        )
    } else {
        None
    };
    let mut rng = StdRng::seed_from_u64(seed);

    let points = grid
        .readings()
        .into_iter()
        .map(|(ts, tu)| {
            let clean = model.evaluate(ts, tu, params);
            let ur = match &noise {
                Some(normal) => clean + normal.sample(&mut rng),
                None => clean,
            };
            CalibrationPoint::new(ts, tu, ur)
        })
        .collect();
    PointDataset::new(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdiabaticRatio, LogLinear};
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_grid_readings() {
        let grid = SyntheticGrid::default();
        let readings = grid.readings();
        assert_eq!(readings.len(), 30);
        assert_eq!(grid.len(), 30);
        assert_eq!(readings[0], (25.0, 24.0));
        assert!(readings.iter().all(|&(ts, tu)| tu <= ts));
        assert!(SyntheticGrid::new(vec![30.0], vec![-1.0]).is_err());
    }

    #[test]
    fn test_noiseless_points_match_model() {
        let params = array![-0.2, -0.06];
        let data = generate(&LogLinear, &params, &SyntheticGrid::default(), 0.0, 0).unwrap();
        for p in &data {
            assert_relative_eq!(p.ur, LogLinear.evaluate(p.ts, p.tu, &params));
        }
    }

    #[test]
    fn test_noise_is_seeded() {
        let params = array![0.9];
        let grid = SyntheticGrid::default();
        let a = generate(&AdiabaticRatio, &params, &grid, 0.5, 11).unwrap();
        let b = generate(&AdiabaticRatio, &params, &grid, 0.5, 11).unwrap();
        let clean = generate(&AdiabaticRatio, &params, &grid, 0.0, 11).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, clean);
    }

    #[test]
    fn test_parameter_count_checked() {
        let result = generate(&LogLinear, &array![1.0], &SyntheticGrid::default(), 0.0, 0);
        assert!(matches!(result, Err(PsyCalError::DimensionMismatch(_))));
    }
}
