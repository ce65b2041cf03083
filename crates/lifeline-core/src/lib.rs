//! Lifeline Core - Packet model and shared types for the Lifeline relay mesh
//!
//! This crate provides the foundational value types used throughout the
//! Lifeline store-carry-forward relay:
//!
//! - [`packet`] - The relay unit ([`MeshPacket`]), the five-level urgency
//!   ordering ([`Priority`]), the canonical [`DedupKey`] derivation, and the
//!   CBOR wire codec
//! - [`config`] - Wire-level constants and the [`MeshConfig`] tree
//! - [`error`] - Error taxonomy shared by the relay layers
//!
//! Everything here is pure data: no I/O, no async, no radio. The dedup key
//! derivation in particular is a wire-level contract - every implementation
//! exchanging packets must derive keys identically or flood-relayed
//! duplicates will not be recognized across nodes.
//!
//! # Example
//!
//! ```rust
//! use lifeline_core::{MeshPacket, Priority};
//!
//! let packet = MeshPacket::new(b"\x02send help, Elm St 14".to_vec());
//! assert_eq!(packet.priority, Priority::Sos);
//!
//! // Two independently observed copies of the same payload share a key
//! let copy = MeshPacket::new(packet.payload.clone());
//! assert_eq!(packet.dedup_key(), copy.dedup_key());
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod packet;

// Re-exports for convenience
pub use config::{
    MeshConfig, MeshConfigBuilder, ProtocolConfig, StoreConfig, DEFAULT_CAPACITY, DEFAULT_TTL,
    HOP_CEILING, MAX_PAYLOAD, METADATA_CHARACTERISTIC, PACKET_CHARACTERISTIC, SERVICE_IDENTITY,
};
pub use error::{RelayError, Result};
pub use packet::{DedupKey, MeshPacket, Priority};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
