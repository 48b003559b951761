//! Shared error kinds.
//!
//! These are the cross-cutting error *kinds* shared across the workspace —
//! not every crate's local error type derives from this one, but each local
//! error type maps onto one of these kinds so the propagation policy
//! (subsystems recover locally whenever possible; nothing is silently
//! swallowed) stays uniform across the workspace.

use thiserror::Error;

/// A cross-cutting error kind, shared by every subsystem.
#[derive(Debug, Error)]
pub enum OctopusError {
    /// Serial or socket read/write failure.
    #[error("transport I/O error: {0}")]
    TransportIo(#[from] std::io::Error),

    /// Bad SOF, bad checksum, length out of range, truncated message.
    #[error("invalid frame: {0}")]
    FrameInvalid(String),

    /// PTL frame for an unregistered module, or IPC group/msg with no route.
    #[error("no handler registered for {0}")]
    HandlerNotFound(String),

    /// Task-message queue or thread-pool queue overflow.
    #[error("queue full: {0}")]
    QueueFull(String),

    /// An IPC/bus callback raised and was counted toward eviction.
    #[error("callback failure: {0}")]
    CallbackFailure(String),

    /// IPC client cannot reach the server.
    #[error("peer unavailable: {0}")]
    Unavailable(String),

    /// Produced when a long wait is interrupted by the stop flag.
    #[error("shutting down")]
    Shutdown,
}

/// Convenience alias.
pub type OctopusResult<T> = Result<T, OctopusError>;

/// Status of a cross-boundary send/receive call — every such call returns
/// one of these instead of raising.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Operation completed successfully.
    Success,
    /// Operation timed out before completing.
    Timeout,
    /// Peer disconnected.
    Disconnected,
    /// Operation failed for another reason.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts_into_transport_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
        let err: OctopusError = io_err.into();
        assert!(matches!(err, OctopusError::TransportIo(_)));
    }
}
