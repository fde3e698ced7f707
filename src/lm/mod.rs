//! Local least-squares solvers.
//!
//! The unconstrained Levenberg-Marquardt algorithm plus the configuration,
//! step calculation, step-size control and convergence tests it shares with
//! the bounded solvers in [`crate::bounded`].

pub mod algorithm;
pub mod config;
pub mod convergence;
pub mod step;
pub mod trust_region;

pub use algorithm::{LevenbergMarquardt, LmResult};
pub use config::{DecompositionMethod, LmConfig, TrustRegionConfig};
pub use convergence::{ConvergenceCriteria, ConvergenceStatus};
pub use step::{LmStep, StepResult, TrustRegionSubproblem};
pub use trust_region::{gain_ratio, TrustRadius, TrustRegion};
