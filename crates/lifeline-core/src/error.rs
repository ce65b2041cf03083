//! Error taxonomy shared by the relay layers
//!
//! Nothing in the relay is fatal to the process. The only error surfaced
//! synchronously to an application caller is a malformed or oversized
//! payload rejected at broadcast time; everything else degrades a guarantee
//! and is logged where it happens.

use thiserror::Error;

/// Errors produced by the packet model and relay plumbing
#[derive(Error, Debug)]
pub enum RelayError {
    /// Payload is empty
    #[error("Payload is empty")]
    EmptyPayload,

    /// Payload exceeds the wire ceiling
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Wire encoding failed
    #[error("Encode error: {0}")]
    Encode(String),

    /// Wire decoding failed
    #[error("Decode error: {0}")]
    Decode(String),

    /// Packet has reached the relay hop ceiling
    #[error("Hop ceiling reached: {hops} >= {ceiling}")]
    HopCeilingReached {
        /// Current hop count
        hops: u8,
        /// Configured ceiling
        ceiling: u8,
    },

    /// Unknown priority discriminator
    #[error("Invalid priority discriminator: {0}")]
    InvalidPriority(u8),

    /// A command or event channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Short code for logging and stats tagging
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayError::EmptyPayload => "EMPTY_PAYLOAD",
            RelayError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            RelayError::Encode(_) => "ENCODE_ERROR",
            RelayError::Decode(_) => "DECODE_ERROR",
            RelayError::HopCeilingReached { .. } => "HOP_CEILING",
            RelayError::InvalidPriority(_) => "INVALID_PRIORITY",
            RelayError::ChannelClosed => "CHANNEL_CLOSED",
            RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error must be reported synchronously to the caller
    /// rather than absorbed by the relay
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            RelayError::EmptyPayload | RelayError::PayloadTooLarge { .. }
        )
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = RelayError::PayloadTooLarge { size: 600, max: 512 };
        assert_eq!(err.error_code(), "PAYLOAD_TOO_LARGE");
        assert!(err.to_string().contains("600"));
        assert!(err.to_string().contains("512"));
    }

    #[test]
    fn test_caller_errors() {
        assert!(RelayError::EmptyPayload.is_caller_error());
        assert!(RelayError::PayloadTooLarge { size: 1, max: 0 }.is_caller_error());
        assert!(!RelayError::ChannelClosed.is_caller_error());
        assert!(!RelayError::Decode("bad".into()).is_caller_error());
    }
}
