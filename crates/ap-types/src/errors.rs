use thiserror::Error;

/// Main error type for AutoML Pilot
#[derive(Error, Debug)]
pub enum ApError {
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors reported by the managed platform or the transport in front of it
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    #[error("Resource conflict: {message}")]
    Conflict { message: String },

    #[error("Transport failure: {message}")]
    Transport { message: String },

    #[error("Unexpected response ({status}): {message}")]
    UnexpectedResponse { status: u16, message: String },
}

/// Compute-target provisioning errors
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Provisioning of {name} did not finish within {timeout_seconds} seconds")]
    ProvisioningTimeout { name: String, timeout_seconds: u64 },

    #[error("Provisioning of {name} failed: {message}")]
    ProvisioningFailed { name: String, message: String },

    #[error("Wait for compute {name} was cancelled")]
    WaitCancelled { name: String },
}

/// Training-job errors
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Submission rejected: {message}")]
    SubmissionRejected { message: String },

    #[error("Run {run_id} failed: {message}")]
    ExecutionFailed { run_id: String, message: String },

    #[error("Run {run_id} did not finish within {timeout_seconds} seconds")]
    Timeout { run_id: String, timeout_seconds: u64 },

    #[error("Submission to experiment {experiment} was cancelled")]
    SubmissionCancelled { experiment: String },

    #[error("Wait for run {run_id} was cancelled")]
    WaitCancelled { run_id: String },

    #[error("Run {run_id} has no completed iteration to pick from")]
    NoBestRun { run_id: String },
}

/// Result type alias for AutoML Pilot operations
pub type ApResult<T> = Result<T, ApError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::ApError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::ApError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::ApError::Config(format!($($arg)*))
    };
}
