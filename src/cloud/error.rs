//! Error types for cloud directory operations.

use thiserror::Error;

use crate::exec::ExecError;

use super::PowerState;

/// Errors surfaced while querying or mutating cloud resources.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudError {
    /// Raised when provider output cannot be decoded. The provider's raw
    /// diagnostic stream is carried verbatim so the operator sees the real
    /// cause (expired credentials, unknown profile, throttling).
    #[error("failed to parse {operation} response: {message}; provider reported: {stderr}")]
    ProviderQuery {
        /// Provider operation that produced the output.
        operation: String,
        /// Decoder error.
        message: String,
        /// Raw diagnostic stream from the provider tooling.
        stderr: String,
    },
    /// Raised when a provider command exits with a non-zero status.
    #[error("{program} {operation} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Cloud CLI binary.
        program: String,
        /// Provider operation that failed.
        operation: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when a provider payload cannot be decoded from base64.
    #[error("failed to decode {what} for instance {instance_id}: {message}")]
    Decode {
        /// Payload being decoded.
        what: String,
        /// Instance the payload belongs to.
        instance_id: String,
        /// Decoder error.
        message: String,
    },
    /// Raised when an instance lookup returns nothing.
    #[error("instance {instance_id} not found")]
    InstanceNotFound {
        /// Identifier that was queried.
        instance_id: String,
    },
    /// Raised when a power transition does not complete within the polling
    /// budget. The instance may be left mid-transition.
    #[error(
        "instance {instance_id} did not reach the {target} state after {attempts} attempts; \
         check it in the provider console and intervene manually"
    )]
    PowerStateTimeout {
        /// Instance being transitioned.
        instance_id: String,
        /// Awaited state.
        target: PowerState,
        /// Number of state queries made.
        attempts: u32,
    },
    /// Raised when the provider tooling cannot be executed.
    #[error(transparent)]
    Runner(#[from] ExecError),
}
