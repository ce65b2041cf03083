//! Advertiser/responder role
//!
//! `Idle <-> Advertising`. While advertising, the node publishes the
//! well-known service identity and serves the two fixed characteristics:
//! the current head packet's wire bytes and the small metadata block. The
//! payload itself never rides in the advertisement frame - broadcast frames
//! are size-constrained and some platforms cannot carry arbitrary data
//! while backgrounded - so peers connect and read.
//!
//! On a new inbound connection the head is pushed again so the newcomer
//! gets an immediate notify instead of waiting for the next change.
//!
//! Radio failures are logged and leave the role where it was; the
//! controller's job is forward progress, not escalation.

use bytes::Bytes;
use lifeline_core::SERVICE_IDENTITY;
use tracing::{debug, info, warn};

use crate::radio::{CharacteristicId, NodeIdentity, PeerIdentity, RadioCapability, RoleState};

/// The responder half of the exchange protocol
pub struct AdvertiserRole {
    state: RoleState,
    node: NodeIdentity,
    head: Option<Bytes>,
    metadata: Option<Bytes>,
}

impl AdvertiserRole {
    /// Create an idle advertiser for this node
    pub fn new(node: NodeIdentity) -> Self {
        Self {
            state: RoleState::Idle,
            node,
            head: None,
            metadata: None,
        }
    }

    /// Current role state
    pub fn state(&self) -> RoleState {
        self.state
    }

    /// Whether the role is advertising
    pub fn is_active(&self) -> bool {
        self.state == RoleState::Advertising
    }

    /// Enter `Advertising`, publishing the service identity and any cached
    /// characteristic values. Idempotent.
    pub async fn start<R: RadioCapability>(&mut self, radio: &mut R) {
        if self.is_active() {
            return;
        }
        match radio.start_advertising(SERVICE_IDENTITY, &self.node).await {
            Ok(()) => {
                self.state = RoleState::Advertising;
                info!(node = %self.node.short(), "advertising started");
                let head = self.head.clone();
                let metadata = self.metadata.clone();
                self.push(radio, head, metadata).await;
            }
            Err(e) => {
                warn!(error = %e, "failed to start advertising");
            }
        }
    }

    /// Return to `Idle`. Idempotent.
    pub async fn stop<R: RadioCapability>(&mut self, radio: &mut R) {
        if !self.is_active() {
            return;
        }
        if let Err(e) = radio.stop_advertising().await {
            warn!(error = %e, "failed to stop advertising");
        }
        self.state = RoleState::Idle;
        info!("advertising stopped");
    }

    /// Refresh the served characteristics
    ///
    /// `head = None` leaves the packet characteristic untouched and only
    /// refreshes metadata. Values are cached so a later `start()` serves
    /// them immediately.
    pub async fn republish<R: RadioCapability>(
        &mut self,
        radio: &mut R,
        head: Option<Bytes>,
        metadata: Bytes,
    ) {
        if let Some(head) = &head {
            self.head = Some(head.clone());
        }
        self.metadata = Some(metadata.clone());
        if self.is_active() {
            self.push(radio, head, Some(metadata)).await;
        }
    }

    /// Push the cached head to a newly connected peer
    pub async fn on_peer_connected<R: RadioCapability>(
        &mut self,
        radio: &mut R,
        peer: &PeerIdentity,
    ) {
        if !self.is_active() {
            return;
        }
        debug!(peer = %peer, "peer connected, pushing head");
        let head = self.head.clone();
        self.push(radio, head, None).await;
    }

    async fn push<R: RadioCapability>(
        &mut self,
        radio: &mut R,
        head: Option<Bytes>,
        metadata: Option<Bytes>,
    ) {
        if let Some(bytes) = head {
            if let Err(e) = radio
                .publish_characteristic(CharacteristicId::Packet, bytes)
                .await
            {
                warn!(error = %e, "failed to publish packet characteristic");
            }
        }
        if let Some(bytes) = metadata {
            if let Err(e) = radio
                .publish_characteristic(CharacteristicId::Metadata, bytes)
                .await
            {
                warn!(error = %e, "failed to publish metadata characteristic");
            }
        }
    }
}
