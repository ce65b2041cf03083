//! Scanner/initiator role
//!
//! `Idle -> Scanning -> Connecting -> Reading -> Idle`, where the final
//! `Idle` immediately re-enters `Scanning`: connections are short-lived and
//! purely for payload pull, with no session state kept.
//!
//! On first sighting of a peer outside its cooldown window the scanner
//! connects, reads the packet characteristic, and disconnects. Failures
//! put the peer on a fixed retry delay and return the role to `Scanning`;
//! that is the sole retry mechanism. The delay is deliberately fixed, not
//! exponential - visibility windows are short and unpredictable, so growing
//! backoff only loses relay opportunities.

use bytes::Bytes;
use lifeline_core::{ProtocolConfig, SERVICE_IDENTITY};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::radio::{CharacteristicId, PeerIdentity, RadioCapability, RoleState};

/// Bound on the recently-contacted peer table
const COOLDOWN_CAPACITY: usize = 256;

/// The initiator half of the exchange protocol
pub struct ScannerRole {
    state: RoleState,
    /// Peer -> instant until which it is left alone
    cooldown: LruCache<PeerIdentity, Instant>,
    peer_cooldown: Duration,
    retry_delay: Duration,
    current: Option<PeerIdentity>,
}

impl ScannerRole {
    /// Create an idle scanner from protocol configuration
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            state: RoleState::Idle,
            cooldown: LruCache::new(NonZeroUsize::new(COOLDOWN_CAPACITY).unwrap()),
            peer_cooldown: config.peer_cooldown,
            retry_delay: config.retry_delay,
            current: None,
        }
    }

    /// Current role state
    pub fn state(&self) -> RoleState {
        self.state
    }

    /// Whether the role is past `Idle`
    pub fn is_active(&self) -> bool {
        self.state != RoleState::Idle
    }

    /// Whether `peer` is the one currently being pulled
    pub fn is_current(&self, peer: &PeerIdentity) -> bool {
        self.current.as_ref() == Some(peer)
    }

    /// Enter `Scanning`. Idempotent.
    pub async fn start<R: RadioCapability>(&mut self, radio: &mut R) {
        if self.is_active() {
            return;
        }
        match radio.start_scanning(SERVICE_IDENTITY).await {
            Ok(()) => {
                self.state = RoleState::Scanning;
                info!("scanning started");
            }
            Err(e) => {
                warn!(error = %e, "failed to start scanning");
            }
        }
    }

    /// Return to `Idle`. Idempotent.
    pub async fn stop<R: RadioCapability>(&mut self, radio: &mut R) {
        if !self.is_active() {
            return;
        }
        if let Some(peer) = self.current.take() {
            let _ = radio.disconnect(&peer).await;
        }
        if let Err(e) = radio.stop_scanning().await {
            warn!(error = %e, "failed to stop scanning");
        }
        self.state = RoleState::Idle;
        info!("scanning stopped");
    }

    /// An advertisement was sighted; connect unless the peer is cooling down
    pub async fn on_peer_seen<R: RadioCapability>(
        &mut self,
        radio: &mut R,
        peer: PeerIdentity,
        rssi: i16,
    ) {
        if self.state != RoleState::Scanning {
            // Busy with another peer or not scanning; later sightings retry
            trace!(peer = %peer, state = %self.state, "sighting ignored");
            return;
        }
        if let Some(until) = self.cooldown.get(&peer) {
            if *until > Instant::now() {
                trace!(peer = %peer, "peer cooling down, skipped");
                return;
            }
        }

        debug!(peer = %peer, rssi, "peer sighted, connecting");
        match radio.begin_connect(&peer).await {
            Ok(()) => {
                self.state = RoleState::Connecting;
                self.current = Some(peer);
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "connect initiation failed");
                self.set_cooldown(peer, self.retry_delay);
            }
        }
    }

    /// The pending connection was established; pull the packet characteristic
    pub async fn on_connected<R: RadioCapability>(&mut self, radio: &mut R, peer: &PeerIdentity) {
        if self.state != RoleState::Connecting || !self.is_current(peer) {
            return;
        }
        match radio.begin_read(peer, CharacteristicId::Packet).await {
            Ok(()) => {
                self.state = RoleState::Reading;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "read initiation failed");
                self.abandon(radio, self.retry_delay).await;
            }
        }
    }

    /// The pull finished; disconnect and hand the bytes to the caller
    pub async fn on_read_completed<R: RadioCapability>(
        &mut self,
        radio: &mut R,
        peer: &PeerIdentity,
        characteristic: CharacteristicId,
        bytes: Bytes,
    ) -> Option<Bytes> {
        if self.state != RoleState::Reading
            || !self.is_current(peer)
            || characteristic != CharacteristicId::Packet
        {
            return None;
        }
        debug!(peer = %peer, len = bytes.len(), "packet characteristic read");
        self.abandon(radio, self.peer_cooldown).await;
        Some(bytes)
    }

    /// The pull failed; fixed-delay retry via the cooldown table
    pub async fn on_read_failed<R: RadioCapability>(
        &mut self,
        radio: &mut R,
        peer: &PeerIdentity,
        reason: &str,
    ) {
        if !self.is_current(peer) {
            return;
        }
        warn!(peer = %peer, reason, "read failed, returning to scanning");
        self.abandon(radio, self.retry_delay).await;
    }

    /// Connection lost (or an attempt rejected) mid-exchange
    pub fn on_disconnected(&mut self, peer: &PeerIdentity) {
        if !self.is_current(peer) {
            return;
        }
        debug!(peer = %peer, "disconnected mid-exchange, returning to scanning");
        self.current = None;
        self.state = RoleState::Scanning;
        self.set_cooldown(peer.clone(), self.retry_delay);
    }

    /// Disconnect the current peer, put it on cooldown, resume scanning
    async fn abandon<R: RadioCapability>(&mut self, radio: &mut R, cooldown: Duration) {
        if let Some(peer) = self.current.take() {
            let _ = radio.disconnect(&peer).await;
            self.set_cooldown(peer, cooldown);
        }
        self.state = RoleState::Scanning;
    }

    fn set_cooldown(&mut self, peer: PeerIdentity, duration: Duration) {
        self.cooldown.put(peer, Instant::now() + duration);
    }
}
