//! The relay unit: packets, priorities, and the canonical dedup key
//!
//! A [`MeshPacket`] is the immutable unit the relay buffers and exchanges.
//! Packets are created either by a local broadcast or by a successful read
//! from a peer; after creation the only mutation is the hop-count increment
//! applied when the packet is relayed onward.
//!
//! # Dedup key
//!
//! Two copies of the same logical event can reach a node over different
//! paths (the user's own broadcast plus a flood-relayed echo). The
//! [`DedupKey`] recognizes them as one message. The derivation is a
//! wire-level contract: the key is always content-derived -
//! `hex(sha256(payload))` truncated to 16 bytes - regardless of whether the
//! packet carries an explicit id, so independently created copies of the
//! same payload collide on every node.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::{DEFAULT_TTL, MAX_PAYLOAD};
use crate::error::{RelayError, Result};

/// Number of sha256 bytes kept in a dedup key (rendered as 32 hex chars)
const DEDUP_KEY_BYTES: usize = 16;

/// Urgency level of a relay packet, highest first
///
/// The wire discriminator (`0 = Trapped` .. `4 = Chat`) is fixed across
/// implementations; it doubles as the leading payload byte on local
/// broadcasts. The `Ord` impl ranks by urgency, so `Trapped > Chat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Person trapped, immediate physical danger
    Trapped,
    /// Medical emergency
    Medical,
    /// General distress call
    Sos,
    /// Status/safety check-in
    Status,
    /// Untyped chatter
    Chat,
}

impl Priority {
    /// Stable wire discriminator, `0` is the most urgent
    pub fn discriminator(&self) -> u8 {
        match self {
            Priority::Trapped => 0,
            Priority::Medical => 1,
            Priority::Sos => 2,
            Priority::Status => 3,
            Priority::Chat => 4,
        }
    }

    /// Map a wire discriminator back to a priority
    ///
    /// Unknown values map to [`Priority::Chat`] so malformed or
    /// future-versioned traffic never outranks real emergencies.
    pub fn from_discriminator(value: u8) -> Self {
        match value {
            0 => Priority::Trapped,
            1 => Priority::Medical,
            2 => Priority::Sos,
            3 => Priority::Status,
            _ => Priority::Chat,
        }
    }

    /// Urgency rank, higher is more urgent
    fn rank(&self) -> u8 {
        4 - self.discriminator()
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Trapped => write!(f, "trapped"),
            Priority::Medical => write!(f, "medical"),
            Priority::Sos => write!(f, "sos"),
            Priority::Status => write!(f, "status"),
            Priority::Chat => write!(f, "chat"),
        }
    }
}

/// Canonical identifier recognizing two packet instances as the same
/// logical message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey(String);

impl DedupKey {
    /// Derive the key from payload content
    pub fn derive(payload: &[u8]) -> Self {
        let digest = Sha256::digest(payload);
        DedupKey(hex::encode(&digest[..DEDUP_KEY_BYTES]))
    }

    /// The key as a hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single relay unit
///
/// Immutable once created apart from the hop-count increment applied on
/// relay-out. The payload is opaque to the relay; only the leading
/// discriminator byte is interpreted, and only for locally created packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshPacket {
    /// Stable identifier; content-derived unless explicitly carried
    pub id: String,
    /// Urgency level
    pub priority: Priority,
    /// Opaque payload bytes, never interpreted by the relay
    pub payload: Vec<u8>,
    /// First local observation time
    pub created_at: DateTime<Utc>,
    /// Time-to-live in milliseconds
    pub ttl_ms: u64,
    /// Number of relay hops this packet has taken
    pub hop_count: u8,
}

impl MeshPacket {
    /// Build a packet from a locally sourced payload
    ///
    /// Priority is read from the leading discriminator byte; an empty
    /// payload falls back to [`Priority::Chat`] (callers should reject
    /// empty payloads with [`validate_payload`] before getting here).
    pub fn new(payload: Vec<u8>) -> Self {
        let priority = payload
            .first()
            .map(|b| Priority::from_discriminator(*b))
            .unwrap_or(Priority::Chat);
        Self::with_priority(payload, priority)
    }

    /// Build a packet with an explicit priority
    pub fn with_priority(payload: Vec<u8>, priority: Priority) -> Self {
        let id = DedupKey::derive(&payload).as_str().to_string();
        Self {
            id,
            priority,
            payload,
            created_at: Utc::now(),
            ttl_ms: DEFAULT_TTL.as_millis() as u64,
            hop_count: 0,
        }
    }

    /// Override the time-to-live
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Override the creation timestamp (reload and test paths)
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// The canonical dedup key for this packet
    ///
    /// Always content-derived; the `id` field is carried for display but
    /// never feeds the key, so locally created and relayed copies of the
    /// same logical event collide on every node.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::derive(&self.payload)
    }

    /// Instant after which the packet is invisible to every read path
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + ChronoDuration::milliseconds(self.ttl_ms as i64)
    }

    /// Whether the packet has expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Clone for relay-out with the hop count incremented
    pub fn relayed(&self) -> Self {
        let mut next = self.clone();
        next.hop_count = next.hop_count.saturating_add(1);
        next
    }

    /// Encode to the CBOR wire form exchanged between peers
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        serde_cbor::to_vec(self).map_err(|e| RelayError::Encode(e.to_string()))
    }

    /// Decode from the CBOR wire form, enforcing the payload ceiling
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let packet: MeshPacket =
            serde_cbor::from_slice(bytes).map_err(|e| RelayError::Decode(e.to_string()))?;
        validate_payload(&packet.payload)?;
        Ok(packet)
    }
}

/// Reject empty or oversized payloads before any queue mutation
pub fn validate_payload(payload: &[u8]) -> Result<()> {
    if payload.is_empty() {
        return Err(RelayError::EmptyPayload);
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(RelayError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    Ok(())
}
