//! Error taxonomy for the teardown sequence.
//!
//! Two layers: `InvocationError` for failures raised before the
//! protective response boundary (these surface as Lambda invocation
//! errors), and `CleanupError` for everything inside the teardown
//! sequence, where the boundary decides how each kind maps to the final
//! CloudFormation status.

use reaper_aws::AwsError;
use thiserror::Error;

/// Raised before any cleanup work starts; never converted to a
/// CloudFormation response.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error(
        "region must be provided via ResourceProperties.Region or the AWS_REGION environment variable"
    )]
    RegionMissing,
}

impl InvocationError {
    /// Error type reported to the Lambda runtime API.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::RegionMissing => "ConfigurationError",
        }
    }
}

/// Failures inside the teardown sequence.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// The kubectl binary is absent or not executable. The one error
    /// the orchestrator reports as FAILED.
    #[error("kubectl not found or not executable at {path}")]
    PrereqMissing { path: String },

    #[error("cloud API error: {0}")]
    Aws(#[from] AwsError),

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{command} timed out after {seconds}s")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CleanupError {
    pub fn is_prereq_missing(&self) -> bool {
        matches!(self, Self::PrereqMissing { .. })
    }
}
