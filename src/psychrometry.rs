//! Saturation vapor pressure of water.
//!
//! Arden Buck's form of the Magnus equation, valid over liquid water from
//! about -40 °C to 100 °C. Pressures are in kPa.

/// Saturation pressure at 0 °C in kPa.
pub const P0_KPA: f64 = 0.61121;
const BUCK_A: f64 = 18.678;
const BUCK_B: f64 = 234.5;
const BUCK_C: f64 = 257.14;

/// Lower floor applied by models that divide by a saturation pressure.
pub const MIN_SATURATION_PRESSURE: f64 = 1e-10;

/// Saturation vapor pressure over liquid water in kPa.
///
/// ```
/// use psycal_rs::psychrometry::saturation_pressure;
///
/// assert!((saturation_pressure(0.0) - 0.61121).abs() < 1e-12);
/// assert!(saturation_pressure(40.0) > saturation_pressure(20.0));
/// ```
pub fn saturation_pressure(temperature: f64) -> f64 {
    P0_KPA * ((BUCK_A - temperature / BUCK_B) * (temperature / (temperature + BUCK_C))).exp()
}

/// Saturation pressure floored at [`MIN_SATURATION_PRESSURE`].
///
/// Non-finite results also map to the floor so that ratios built on it
/// never divide by zero or NaN.
pub fn saturation_pressure_floored(temperature: f64) -> f64 {
    let p = saturation_pressure(temperature);
    if p.is_finite() {
        p.max(MIN_SATURATION_PRESSURE)
    } else {
        MIN_SATURATION_PRESSURE
    }
}
