/// Socket-level failures. These are fatal to the whole multiplexer, not to
/// a single command, and propagate to whatever owns the process lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind UDP socket: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Failed to send datagram: {0}")]
    Send(#[source] std::io::Error),

    #[error("Transport has shut down")]
    Closed,
}
