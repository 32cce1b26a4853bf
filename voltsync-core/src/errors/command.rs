use super::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// No response within the attempt budget; the device is unreachable or
    /// saturated.
    #[error("No response to {method} after {attempts} attempts")]
    Timeout { method: String, attempts: u32 },

    /// Well-formed response explicitly signalling failure.
    #[error("Device rejected {method}: {reason}")]
    DeviceRejected { method: String, reason: String },

    /// Datagram parsed but the expected fields are missing; protocol drift
    /// or a firmware bug.
    #[error("Malformed response to {method}: {reason}")]
    MalformedResponse { method: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
