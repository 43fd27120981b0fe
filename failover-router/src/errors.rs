use crate::role::Role;
use thiserror::Error;

/// Result type alias for failover-router operations
pub type Result<T, E = FailoverError> = std::result::Result<T, E>;

/// Errors that can occur while serving a request.
///
/// Per-role failures never unwind across tasks; they travel inside an
/// `Outcome` and only influence arbitration.
#[derive(Error, Debug)]
pub enum FailoverError {
    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Invalid upstream target for {0}: {1}")]
    InvalidTarget(Role, String),

    #[error("Failed to build upstream request for {0}: {1}")]
    RequestBuildError(Role, String),

    #[error("Upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(Role, String),

    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(Role),

    #[error("Upstream request for {0} was cancelled")]
    Cancelled(Role),

    #[error("Failed to read response body: {0}")]
    ResponseBodyError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
