//! # psycal-rs
//!
//! `psycal-rs` calibrates psychrometric relative-humidity formulas against a
//! handful of reference readings. A reading is a dry-bulb temperature (TS),
//! a wet-bulb temperature (TU) and the measured relative humidity (UR).
//!
//! The library provides:
//! - Four formula families with bounds and starting points ([`models`])
//! - Bounded trust-region solvers, Levenberg-Marquardt and differential
//!   evolution behind one backend contract ([`dispatch`])
//! - Fit metrics and best-method selection ([`calibration`])
//! - Point and constants file formats ([`io`])
//!
//! ## Basic Usage
//!
//! ```
//! use psycal_rs::{Calibrator, ModelKind, PointDataset};
//!
//! let points = PointDataset::from_triples(&[
//!     (30.0, 20.0, 45.0),
//!     (35.0, 25.0, 50.0),
//!     (40.0, 28.0, 48.0),
//!     (45.0, 30.0, 52.0),
//! ])?;
//! let report = Calibrator::default().calibrate(&points, ModelKind::LogLinear, &["trf"], None)?;
//! assert_eq!(report.best.as_deref(), Some("trf"));
//! # Ok::<(), psycal_rs::PsyCalError>(())
//! ```

pub mod bounded;
pub mod bounds;
pub mod calibration;
pub mod config;
pub mod dataset;
pub mod dispatch;
pub mod error;
pub mod global_opt;
pub mod io;
pub mod lm;
pub mod metrics;
pub mod models;
pub mod problem;
pub mod psychrometry;
pub mod residual;
pub mod synthetic;
pub mod utils;

// Re-exports for convenience
pub use bounds::{BoundBox, Bounds};
pub use calibration::{calibrate, CalibrationReport, Calibrator, MethodReport};
pub use config::CalibrationConfig;
pub use dataset::{CalibrationPoint, PointDataset};
pub use dispatch::{Backend, BackendRegistry, FitResult, OptimizerStrategy, SolveRequest};
pub use error::{PsyCalError, Result};
pub use io::ConstantsFile;
pub use metrics::FitMetrics;
pub use models::{CalibratedModel, FormulaModel, ModelKind};
pub use problem::Problem;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
