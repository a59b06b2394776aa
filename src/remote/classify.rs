//! Recognises SSH transport failures from the client's diagnostic text.

/// Client messages meaning the host refused the offered key.
const KEY_REJECTED_SIGNATURES: &[&str] = &["Permission denied (publickey"];

/// Client messages meaning the host could not be reached at all, which for
/// the instances this tool manages usually means they are stopped.
const HOST_UNREACHABLE_SIGNATURES: &[&str] = &[
    "Operation timed out",
    "Connection timed out",
    "No route to host",
];

/// Transport-level cause of a failed remote invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportFailure {
    /// The host rejected the key.
    KeyRejected,
    /// The host did not answer.
    HostUnreachable,
    /// Any other failure, including failures of the command itself.
    Other,
}

/// Classifies a failed result by its diagnostic text.
#[must_use]
pub fn classify(stderr: &str) -> TransportFailure {
    if KEY_REJECTED_SIGNATURES
        .iter()
        .any(|signature| stderr.contains(signature))
    {
        TransportFailure::KeyRejected
    } else if HOST_UNREACHABLE_SIGNATURES
        .iter()
        .any(|signature| stderr.contains(signature))
    {
        TransportFailure::HostUnreachable
    } else {
        TransportFailure::Other
    }
}
