use thiserror::Error;

/// Main error type for the hypersearch system
#[derive(Error, Debug)]
pub enum HsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Acquisition error: {0}")]
    Acquisition(String),

    #[error("Unknown experiment: {name}")]
    UnknownExperiment { name: String },

    #[error("Coordinator has stopped")]
    CoordinatorStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while validating a coordinator configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Parameter definition list is missing")]
    MissingParamDefs,

    #[error("Parameter {name} has unsupported type {kind}")]
    UnsupportedDimension { name: String, kind: String },

    #[error("Invalid bounds for parameter {name}: {message}")]
    InvalidBounds { name: String, message: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Experiment already registered: {name}")]
    DuplicateExperiment { name: String },

    #[error("{0}")]
    Other(String),
}

/// Surrogate model fitting errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("No observations to fit")]
    EmptyDesign,

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Design matrix has {rows} rows but {results} results")]
    LengthMismatch { rows: usize, results: usize },

    #[error("Non-finite value in training data")]
    NonFinite,

    #[error("Fit did not converge after {restarts} restarts")]
    NotConverged { restarts: usize },
}

/// Worker protocol violations. These never stop the coordinator; the worker is
/// told to stop and the violation is logged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Unrecognized status value: {status}")]
    UnrecognizedStatus { status: String },

    #[error("Candidate {params:?} is not known to the coordinator")]
    UnknownCandidate { params: Vec<f64> },

    #[error("Candidate {params:?} is already finished")]
    AlreadyFinished { params: Vec<f64> },

    #[error("Candidate {params:?} reported finished without a result")]
    MissingResult { params: Vec<f64> },
}

/// Result type alias for hypersearch operations
pub type HsResult<T> = Result<T, HsError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HsError::Config($crate::ConfigError::Other(format!($($arg)*)))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::HsError::Internal(format!($($arg)*))
    };
}
