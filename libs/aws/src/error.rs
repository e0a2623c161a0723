//! Error types for AWS API calls.
//!
//! API failures are classified into the handful of classes the cleanup
//! logic reacts to differently: absent resources, delete conflicts, and
//! throttling. Everything else stays an opaque API or transport error.

use thiserror::Error;

/// Errors from AWS wire clients.
#[derive(Debug, Error)]
pub enum AwsError {
    /// The referenced entity does not exist (role, profile, instance).
    #[error("{code}: {message}")]
    NotFound { code: String, message: String },

    /// The entity is still in use and cannot be mutated yet.
    #[error("{code}: {message}")]
    Conflict { code: String, message: String },

    /// The API asked us to slow down.
    #[error("{code}: {message}")]
    Throttled { code: String, message: String },

    /// Any other error the API reported.
    #[error("API error (status {status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Transport-level failure before an API answer arrived.
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),

    /// Credentials could not be resolved from the environment.
    #[error("credentials unavailable: {0}")]
    Credentials(String),
}

impl AwsError {
    /// Returns true if the target of the call does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    /// Returns true if the call failed because the entity is still in use.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AwsError::Conflict { .. })
    }

    /// Returns true if the call was throttled.
    pub fn is_throttled(&self) -> bool {
        matches!(self, AwsError::Throttled { .. })
    }
}

/// Classify a parsed API error envelope into an [`AwsError`].
///
/// Code conventions differ per service: IAM reports `NoSuchEntity` and
/// `DeleteConflict`, EC2 suffixes codes with `.NotFound`, and both spell
/// throttling a few ways. Conflict detection also falls back to the
/// message text because some services only say "in use" there.
pub fn classify(status: u16, code: &str, message: &str) -> AwsError {
    let code_owned = code.to_string();
    let message_owned = message.to_string();

    if code == "NoSuchEntity" || code.contains("NotFound") {
        return AwsError::NotFound {
            code: code_owned,
            message: message_owned,
        };
    }

    if code.contains("Conflict") || message.to_ascii_lowercase().contains("in use") {
        return AwsError::Conflict {
            code: code_owned,
            message: message_owned,
        };
    }

    if code.contains("Throttl") || code == "RequestLimitExceeded" {
        return AwsError::Throttled {
            code: code_owned,
            message: message_owned,
        };
    }

    AwsError::Api {
        status,
        code: code_owned,
        message: message_owned,
    }
}
