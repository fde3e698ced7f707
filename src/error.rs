use thiserror::Error;

/// Error types for the psycal-rs library.
#[derive(Error, Debug)]
pub enum PsyCalError {
    /// Fewer calibration points than the model needs.
    #[error("Insufficient calibration points: at least {required} required, got {found}")]
    InsufficientPoints { required: usize, found: usize },

    /// Model name that does not match any known formula.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Optimization method name that is not registered.
    #[error("Unknown optimization method: {0}")]
    UnknownMethod(String),

    /// Error for invalid input values.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error indicating a mismatch in vector or matrix dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error during function evaluation.
    #[error("Function evaluation error: {0}")]
    FunctionEvaluation(String),

    /// Error from a linear algebra operation.
    #[error("Linear algebra error: {0}")]
    LinearAlgebraError(String),

    /// Error indicating the algorithm failed to converge.
    #[error("Algorithm failed to converge: {0}")]
    ConvergenceFailure(String),

    /// Error indicating optimization failed.
    #[error("Optimization failed: {0}")]
    OptimizationFailure(String),

    /// Error for boundary constraint violations.
    #[error("Bounds error: {0}")]
    BoundsError(String),

    /// Error while parsing a points or constants file.
    #[error("Parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },

    /// A points file that yielded no usable point.
    #[error("No valid calibration points found in {0}")]
    NoValidPoints(String),

    /// A constants file missing a required entry.
    #[error("Constant not found: {0}")]
    MissingConstant(String),

    /// Error from IO operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from JSON (de)serialization.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl PsyCalError {
    /// Returns true for errors caused by the caller's input rather than by a solver.
    ///
    /// Input errors abort a calibration before any backend runs; solver errors
    /// are absorbed into a fallback result for the affected backend only.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            PsyCalError::InsufficientPoints { .. }
                | PsyCalError::UnknownModel(_)
                | PsyCalError::UnknownMethod(_)
                | PsyCalError::InvalidInput(_)
                | PsyCalError::DimensionMismatch(_)
        )
    }
}

/// Result type alias for psycal-rs operations.
pub type Result<T> = std::result::Result<T, PsyCalError>;
