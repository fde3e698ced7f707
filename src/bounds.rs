//! Box constraints on model parameters.
//!
//! `Bounds` describes the admissible interval of a single parameter and
//! `BoundBox` the product of those intervals for a whole parameter vector.
//! Infinite limits serialize as `null`.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::f64::{INFINITY, NEG_INFINITY};
use thiserror::Error;

/// Relative distance kept from a bound when a point is made strictly feasible.
pub const STRICT_FEASIBILITY_STEP: f64 = 1e-10;

/// Errors that can occur when working with parameter bounds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: min ({min}) must not exceed max ({max})")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Bounds cannot be NaN")]
    NanBound,

    #[error("Expected {expected} bounds, got {found}")]
    LengthMismatch { expected: usize, found: usize },
}

impl From<BoundsError> for crate::error::PsyCalError {
    fn from(err: BoundsError) -> Self {
        crate::error::PsyCalError::BoundsError(err.to_string())
    }
}

/// Represents the bounds constraints on a parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Minimum allowed value for the parameter
    pub min: f64,

    /// Maximum allowed value for the parameter
    pub max: f64,
}

impl Serialize for Bounds {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Bounds", 2)?;
        let min = if self.min == NEG_INFINITY {
            None
        } else {
            Some(self.min)
        };
        let max = if self.max == INFINITY {
            None
        } else {
            Some(self.max)
        };
        state.serialize_field("min", &min)?;
        state.serialize_field("max", &max)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Bounds {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct BoundsHelper {
            #[serde(default)]
            min: Option<f64>,

            #[serde(default)]
            max: Option<f64>,
        }

        let helper = BoundsHelper::deserialize(deserializer)?;
        Bounds::new(
            helper.min.unwrap_or(NEG_INFINITY),
            helper.max.unwrap_or(INFINITY),
        )
        .map_err(serde::de::Error::custom)
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: NEG_INFINITY,
            max: INFINITY,
        }
    }
}

impl Bounds {
    /// Create a new bounds constraint with min and max values
    ///
    /// # Examples
    ///
    /// ```
    /// use psycal_rs::bounds::Bounds;
    ///
    /// let bounds = Bounds::new(0.0, 10.0).unwrap();
    /// assert_eq!(bounds.min, 0.0);
    /// assert_eq!(bounds.max, 10.0);
    /// assert!(Bounds::new(1.0, 0.0).is_err());
    /// ```
    pub fn new(min: f64, max: f64) -> Result<Self, BoundsError> {
        if min.is_nan() || max.is_nan() {
            return Err(BoundsError::NanBound);
        }
        if min > max {
            return Err(BoundsError::InvalidBounds { min, max });
        }

        Ok(Self { min, max })
    }

    /// Symmetric interval `[-limit, limit]`.
    pub fn symmetric(limit: f64) -> Result<Self, BoundsError> {
        Self::new(-limit.abs(), limit.abs())
    }

    /// Create an unbounded constraint (negative infinity to positive infinity)
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Check if a value is within the bounds
    pub fn is_within_bounds(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Check if the bounds are finite (both min and max are finite)
    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// Clamp a value into the interval.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    /// Width of the interval.
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Move a value off the bounds by a small relative step so that it lies
    /// strictly inside the interval.
    ///
    /// Degenerate intervals (`min == max`) return `min`.
    pub fn strictly_inside(&self, value: f64, rstep: f64) -> f64 {
        if self.min == self.max {
            return self.min;
        }
        let value = self.clamp(value);
        let mut inside = value;
        if value <= self.min {
            inside = self.min + rstep * self.min.abs().max(1.0);
        } else if value >= self.max {
            inside = self.max - rstep * self.max.abs().max(1.0);
        }
        if inside <= self.min || inside >= self.max {
            // Interval narrower than the step
            0.5 * (self.min + self.max)
        } else {
            inside
        }
    }
}

/// Box constraints for a parameter vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundBox {
    bounds: Vec<Bounds>,
}

impl BoundBox {
    /// Build a box from per-parameter bounds.
    pub fn new(bounds: Vec<Bounds>) -> Self {
        Self { bounds }
    }

    /// Build a box from `(min, max)` pairs.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Result<Self, BoundsError> {
        let bounds = pairs
            .iter()
            .map(|&(min, max)| Bounds::new(min, max))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { bounds })
    }

    /// Build a box from separate lower and upper vectors.
    pub fn from_arrays(lower: &Array1<f64>, upper: &Array1<f64>) -> Result<Self, BoundsError> {
        if lower.len() != upper.len() {
            return Err(BoundsError::LengthMismatch {
                expected: lower.len(),
                found: upper.len(),
            });
        }
        let bounds = lower
            .iter()
            .zip(upper.iter())
            .map(|(&min, &max)| Bounds::new(min, max))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { bounds })
    }

    /// A box with no constraints in `n` dimensions.
    pub fn unbounded(n: usize) -> Self {
        Self {
            bounds: vec![Bounds::unbounded(); n],
        }
    }

    /// Number of parameters covered by the box.
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    /// Check whether the box has no dimensions.
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Per-parameter bounds.
    pub fn bounds(&self) -> &[Bounds] {
        &self.bounds
    }

    /// Lower limits as a vector.
    pub fn lower(&self) -> Array1<f64> {
        self.bounds.iter().map(|b| b.min).collect()
    }

    /// Upper limits as a vector.
    pub fn upper(&self) -> Array1<f64> {
        self.bounds.iter().map(|b| b.max).collect()
    }

    /// `(min, max)` pairs.
    pub fn pairs(&self) -> Vec<(f64, f64)> {
        self.bounds.iter().map(|b| (b.min, b.max)).collect()
    }

    /// Check if every dimension has finite limits.
    pub fn is_finite(&self) -> bool {
        self.bounds.iter().all(Bounds::is_finite)
    }

    /// Ensure the box matches a parameter count.
    pub fn check_len(&self, n: usize) -> Result<(), BoundsError> {
        if self.bounds.len() != n {
            return Err(BoundsError::LengthMismatch {
                expected: n,
                found: self.bounds.len(),
            });
        }
        Ok(())
    }

    /// Check whether a point lies inside the box (limits included).
    pub fn contains(&self, x: &Array1<f64>) -> bool {
        x.len() == self.bounds.len()
            && x
                .iter()
                .zip(self.bounds.iter())
                .all(|(&v, b)| b.is_within_bounds(v))
    }

    /// Clamp every component into its interval.
    pub fn clamp(&self, x: &Array1<f64>) -> Array1<f64> {
        x.iter()
            .zip(self.bounds.iter())
            .map(|(&v, b)| b.clamp(v))
            .collect()
    }

    /// Clamp into the box and then step off any active bound.
    pub fn make_strictly_feasible(&self, x: &Array1<f64>) -> Array1<f64> {
        x.iter()
            .zip(self.bounds.iter())
            .map(|(&v, b)| b.strictly_inside(v, STRICT_FEASIBILITY_STEP))
            .collect()
    }

    /// Which bound each component sits on: `-1` lower, `1` upper, `0` neither.
    ///
    /// A component counts as being on a bound when it is within
    /// `rtol * max(1, |bound|)` of it.
    pub fn active_sides(&self, x: &Array1<f64>, rtol: f64) -> Vec<i8> {
        x.iter()
            .zip(self.bounds.iter())
            .map(|(&v, b)| {
                if b.min.is_finite() && v - b.min <= rtol * b.min.abs().max(1.0) {
                    -1
                } else if b.max.is_finite() && b.max - v <= rtol * b.max.abs().max(1.0) {
                    1
                } else {
                    0
                }
            })
            .collect()
    }

    /// Largest `t` such that `x + t * direction` stays inside the box.
    ///
    /// Returns `f64::INFINITY` when no finite bound is reached.
    pub fn step_to_boundary(&self, x: &Array1<f64>, direction: &Array1<f64>) -> f64 {
        step_to_limits(x, direction, &self.lower(), &self.upper())
    }
}

/// Largest `t >= 0` such that `lower <= x + t * direction <= upper` componentwise.
pub(crate) fn step_to_limits(
    x: &Array1<f64>,
    direction: &Array1<f64>,
    lower: &Array1<f64>,
    upper: &Array1<f64>,
) -> f64 {
    let mut t_max = INFINITY;
    for i in 0..x.len() {
        let d = direction[i];
        let t = if d > 0.0 {
            (upper[i] - x[i]) / d
        } else if d < 0.0 {
            (lower[i] - x[i]) / d
        } else {
            continue;
        };
        t_max = t_max.min(t.max(0.0));
    }
    t_max
}
