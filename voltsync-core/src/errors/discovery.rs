use super::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
