//! Error types for the discovery and exchange layer

use lifeline_core::RelayError;
use lifeline_store::StoreError;
use thiserror::Error;

/// Errors produced by the protocol roles and the controller
#[derive(Error, Debug)]
pub enum MeshError {
    /// The radio capability is unavailable (off, denied, absent)
    #[error("Radio capability unavailable")]
    RadioUnavailable,

    /// A radio operation failed
    #[error("Radio error: {0}")]
    Radio(String),

    /// Operation attempted against a peer that is not connected
    #[error("Peer not connected: {0}")]
    NotConnected(String),

    /// A command or event channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The radio's event stream was already taken
    #[error("Radio event stream already taken")]
    EventsTaken,

    /// Store-layer error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Packet-model error
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl MeshError {
    /// Whether the failure is transient radio trouble worth retrying
    /// on the fixed scan cycle
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            MeshError::Radio(_) | MeshError::NotConnected(_)
        )
    }
}

/// Result type alias for mesh operations
pub type Result<T> = std::result::Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classes() {
        assert!(MeshError::Radio("timeout".into()).is_retriable());
        assert!(MeshError::NotConnected("peer-1".into()).is_retriable());
        assert!(!MeshError::RadioUnavailable.is_retriable());
        assert!(!MeshError::ChannelClosed.is_retriable());
    }

    #[test]
    fn test_caller_error_passthrough() {
        let err: MeshError = RelayError::EmptyPayload.into();
        assert_eq!(err.to_string(), "Payload is empty");
    }
}
