//! Radio capability abstraction
//!
//! The platform radio (BLE or similar) is an external collaborator. Instead
//! of a global radio-manager singleton, the controller receives an explicit
//! [`RadioCapability`] object with its own lifecycle, so tests substitute an
//! in-memory radio and platform ports wrap the real one.
//!
//! The capability is split two ways, mirroring how these radios actually
//! behave:
//!
//! - **Operations** are short async calls (`start_advertising`,
//!   `begin_connect`, ...). Connection and read attempts only *initiate*
//!   work; their outcomes arrive later as events. The radio enforces its
//!   own timeout on stalled attempts.
//! - **Events** are a closed set of tagged [`RadioEvent`] messages
//!   delivered over an mpsc channel and consumed serially by the
//!   controller's single task; there is no open-ended delegate dispatch.

use async_trait::async_trait;
use bytes::Bytes;
use lifeline_core::{METADATA_CHARACTERISTIC, PACKET_CHARACTERISTIC};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// This node's stable identity, advertised in the service frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentity(Uuid);

impl NodeIdentity {
    /// Generate a fresh identity
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short prefix for logs
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self::generate()
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identity of a sighted peer, as reported by the radio
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity(pub String);

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two fixed resource characteristics every relay node exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicId {
    /// Wire bytes of the current head packet
    Packet,
    /// Small node metadata (identity, queue depth, peer count)
    Metadata,
}

impl CharacteristicId {
    /// Well-known identity string for this characteristic
    pub fn uuid(&self) -> &'static str {
        match self {
            CharacteristicId::Packet => PACKET_CHARACTERISTIC,
            CharacteristicId::Metadata => METADATA_CHARACTERISTIC,
        }
    }
}

/// Closed set of events a radio can deliver
///
/// Every platform callback is translated into one of these immutable
/// messages and posted to the controller's mailbox.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// Advertisement matching the service filter was sighted
    PeerSeen {
        /// The advertising peer
        peer: PeerIdentity,
        /// Signal strength as reported by the radio
        rssi: i16,
    },
    /// A connection (inbound or initiated) is established
    PeerConnected {
        /// The connected peer
        peer: PeerIdentity,
    },
    /// A connection ended or an attempt failed
    PeerDisconnected {
        /// The peer in question
        peer: PeerIdentity,
    },
    /// A characteristic read finished
    ReadCompleted {
        /// The peer that served the read
        peer: PeerIdentity,
        /// Which characteristic was read
        characteristic: CharacteristicId,
        /// The value read
        bytes: Bytes,
    },
    /// A characteristic read failed or timed out
    ReadFailed {
        /// The peer the read was issued against
        peer: PeerIdentity,
        /// Radio-reported reason
        reason: String,
    },
}

/// Abstract radio/transport capability
#[async_trait]
pub trait RadioCapability: Send {
    /// Acquire the radio. `Ok(false)` means the capability is unavailable
    /// (radio off, permission denied) - non-fatal, the caller stays in a
    /// disabled-but-constructible state.
    async fn power_on(&mut self) -> Result<bool>;

    /// Publish the well-known service advertisement
    async fn start_advertising(&mut self, service: &str, node: &NodeIdentity) -> Result<()>;

    /// Stop advertising
    async fn stop_advertising(&mut self) -> Result<()>;

    /// Start scanning for the well-known service; sightings arrive as
    /// [`RadioEvent::PeerSeen`]
    async fn start_scanning(&mut self, service: &str) -> Result<()>;

    /// Stop scanning
    async fn stop_scanning(&mut self) -> Result<()>;

    /// Update a served characteristic value; connected peers are notified
    async fn publish_characteristic(
        &mut self,
        characteristic: CharacteristicId,
        value: Bytes,
    ) -> Result<()>;

    /// Initiate a connection; completes via [`RadioEvent::PeerConnected`]
    /// or [`RadioEvent::PeerDisconnected`]
    async fn begin_connect(&mut self, peer: &PeerIdentity) -> Result<()>;

    /// Initiate a characteristic read on a connected peer; completes via
    /// [`RadioEvent::ReadCompleted`] or [`RadioEvent::ReadFailed`]
    async fn begin_read(
        &mut self,
        peer: &PeerIdentity,
        characteristic: CharacteristicId,
    ) -> Result<()>;

    /// Tear down a connection
    async fn disconnect(&mut self, peer: &PeerIdentity) -> Result<()>;

    /// Take the event stream; `None` after the first call
    fn take_events(&mut self) -> Option<mpsc::Receiver<RadioEvent>>;

    /// Radio name for logging
    fn name(&self) -> &str;
}

/// Protocol role state, for logging and assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleState {
    /// Role inactive
    Idle,
    /// Responder publishing the service advertisement
    Advertising,
    /// Initiator watching for advertisements
    Scanning,
    /// Initiator connecting to a sighted peer
    Connecting,
    /// Initiator pulling the packet characteristic
    Reading,
}

impl std::fmt::Display for RoleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleState::Idle => write!(f, "idle"),
            RoleState::Advertising => write!(f, "advertising"),
            RoleState::Scanning => write!(f, "scanning"),
            RoleState::Connecting => write!(f, "connecting"),
            RoleState::Reading => write!(f, "reading"),
        }
    }
}
