//! Mesh controller - orchestration of store, dedup, and protocol roles
//!
//! The controller is the single owner of the priority store and the dedup
//! engine. Radio callbacks, application commands, and the periodic TTL
//! sweep all arrive as messages consumed by one task in arrival order, so
//! no shared-state locking is needed and a `head()` observed by the
//! protocol is always consistent with the latest committed insert.
//!
//! Every radio operation failure is logged and folded back into the normal
//! scan/advertise cycle. Nothing here is fatal: a missing radio leaves the
//! controller disabled but still buffering local broadcasts, so nothing is
//! lost once the radio appears.

use bytes::Bytes;
use chrono::Utc;
use lifeline_core::{packet::validate_payload, MeshConfig, MeshPacket};
use lifeline_store::{PriorityStore, StoreStats};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::advertiser::AdvertiserRole;
use crate::error::{MeshError, Result};
use crate::radio::{NodeIdentity, PeerIdentity, RadioCapability, RadioEvent};
use crate::scanner::ScannerRole;

const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Bound on the recently-seen peer table
const PEER_TABLE_CAPACITY: usize = 128;

/// Window within which a sighted peer counts as active
const PEER_ACTIVE_WINDOW: Duration = Duration::from_secs(30);

/// Commands accepted by the controller task
#[derive(Debug)]
pub enum ControllerCommand {
    /// Buffer and relay a locally sourced payload
    Broadcast(Vec<u8>),
    /// Activate both protocol roles and the sweep
    Start,
    /// Deactivate both protocol roles
    Stop,
    /// Snapshot of relay statistics
    GetStats(oneshot::Sender<RelayStats>),
    /// Stop the controller task
    Shutdown,
}

/// Read-only statistics snapshot, safe to poll frequently
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    /// Peers sighted within the activity window
    pub active_peers: usize,
    /// Unexpired packets currently buffered
    pub buffered: usize,
    /// Head packets pushed to the radio for relay
    pub total_relayed: u64,
    /// Duplicate packets silently absorbed
    pub duplicates_absorbed: u64,
    /// Dedup pre-filter bit-array fill ratio
    pub prefilter_fill_ratio: f64,
    /// Full store-layer counters
    pub store: StoreStats,
}

/// Small metadata block served on the metadata characteristic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Advertised node identity
    pub node: String,
    /// Buffered packet count
    pub buffered: u32,
    /// Active peer count
    pub peers: u32,
}

/// Cloneable handle fronting the controller task
#[derive(Clone)]
pub struct ControllerHandle {
    command_tx: mpsc::Sender<ControllerCommand>,
}

impl ControllerHandle {
    /// Buffer and relay a locally sourced payload
    ///
    /// Malformed (empty) or oversized payloads are rejected synchronously,
    /// before anything is enqueued, so the caller can fall back to another
    /// transport. Everything past validation is fire-and-forget.
    pub async fn broadcast(&self, payload: Vec<u8>) -> Result<()> {
        validate_payload(&payload)?;
        self.command_tx
            .send(ControllerCommand::Broadcast(payload))
            .await
            .map_err(|_| MeshError::ChannelClosed)
    }

    /// Activate both protocol roles. Idempotent.
    pub async fn start(&self) -> Result<()> {
        self.command_tx
            .send(ControllerCommand::Start)
            .await
            .map_err(|_| MeshError::ChannelClosed)
    }

    /// Deactivate both protocol roles. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        self.command_tx
            .send(ControllerCommand::Stop)
            .await
            .map_err(|_| MeshError::ChannelClosed)
    }

    /// Snapshot of relay statistics
    pub async fn stats(&self) -> Result<RelayStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(ControllerCommand::GetStats(tx))
            .await
            .map_err(|_| MeshError::ChannelClosed)?;
        rx.await.map_err(|_| MeshError::ChannelClosed)
    }

    /// Stop the controller task
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(ControllerCommand::Shutdown)
            .await
            .map_err(|_| MeshError::ChannelClosed)
    }
}

/// The relay orchestrator; single owner of store, dedup, and radio
pub struct MeshController<R: RadioCapability> {
    config: MeshConfig,
    node: NodeIdentity,
    radio: R,
    events: mpsc::Receiver<RadioEvent>,
    store: PriorityStore,
    advertiser: AdvertiserRole,
    scanner: ScannerRole,
    command_rx: mpsc::Receiver<ControllerCommand>,
    enabled: bool,
    roles_active: bool,
    peers: LruCache<PeerIdentity, Instant>,
    total_relayed: u64,
    last_published: Option<String>,
}

impl<R: RadioCapability> MeshController<R> {
    /// Create a controller owning `radio` and `store`
    pub fn new(
        config: MeshConfig,
        mut radio: R,
        store: PriorityStore,
    ) -> Result<(Self, ControllerHandle)> {
        let events = radio.take_events().ok_or(MeshError::EventsTaken)?;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let node = NodeIdentity::generate();

        let controller = Self {
            advertiser: AdvertiserRole::new(node.clone()),
            scanner: ScannerRole::new(&config.protocol),
            config,
            node,
            radio,
            events,
            store,
            command_rx,
            enabled: false,
            roles_active: false,
            peers: LruCache::new(NonZeroUsize::new(PEER_TABLE_CAPACITY).unwrap()),
            total_relayed: 0,
            last_published: None,
        };
        let handle = ControllerHandle { command_tx };
        Ok((controller, handle))
    }

    /// This node's advertised identity
    pub fn node(&self) -> &NodeIdentity {
        &self.node
    }

    /// Acquire the radio capability
    ///
    /// Returns `false` (non-fatal) if the radio is off or denied; the
    /// controller stays constructible and `broadcast` keeps recording
    /// locally, it just cannot relay until the radio becomes available.
    pub async fn initialize(&mut self) -> bool {
        match self.radio.power_on().await {
            Ok(true) => {
                info!(radio = self.radio.name(), node = %self.node.short(), "radio acquired");
                self.enabled = true;
            }
            Ok(false) => {
                warn!(radio = self.radio.name(), "radio unavailable, controller disabled");
                self.enabled = false;
            }
            Err(e) => {
                warn!(radio = self.radio.name(), error = %e, "radio acquisition failed");
                self.enabled = false;
            }
        }
        self.enabled
    }

    /// Run the controller task
    ///
    /// Restores the buffer from durable storage, then consumes commands,
    /// radio events, and sweep ticks strictly in arrival order until
    /// shutdown.
    pub async fn run(mut self) -> Result<()> {
        if let Err(e) = self.store.reload(Utc::now()).await {
            warn!(error = %e, "durable reload failed, starting with empty buffer");
        }

        let mut sweep = tokio::time::interval(self.config.protocol.sweep_interval);
        info!(node = %self.node.short(), "mesh controller running");

        loop {
            tokio::select! {
                Some(cmd) = self.command_rx.recv() => {
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }

                Some(event) = self.events.recv() => {
                    self.handle_radio_event(event).await;
                }

                _ = sweep.tick() => {
                    self.run_sweep().await;
                }
            }
        }

        self.stop_roles().await;
        info!("mesh controller stopped");
        Ok(())
    }

    async fn handle_command(&mut self, cmd: ControllerCommand) -> bool {
        match cmd {
            ControllerCommand::Broadcast(payload) => {
                self.handle_local_broadcast(payload).await;
            }
            ControllerCommand::Start => {
                self.start_roles().await;
            }
            ControllerCommand::Stop => {
                self.stop_roles().await;
            }
            ControllerCommand::GetStats(tx) => {
                let _ = tx.send(self.stats_snapshot());
            }
            ControllerCommand::Shutdown => {
                info!("controller shutdown requested");
                return false;
            }
        }
        true
    }

    async fn start_roles(&mut self) {
        if !self.enabled {
            warn!("start requested but radio unavailable; buffering only");
            return;
        }
        if self.roles_active {
            return;
        }
        self.advertiser.start(&mut self.radio).await;
        self.scanner.start(&mut self.radio).await;
        self.roles_active = self.advertiser.is_active() || self.scanner.is_active();
        // Make the current head visible to peers right away
        self.republish().await;
    }

    async fn stop_roles(&mut self) {
        if !self.roles_active {
            return;
        }
        self.advertiser.stop(&mut self.radio).await;
        self.scanner.stop(&mut self.radio).await;
        self.roles_active = false;
    }

    /// Local broadcast path: discriminator-derived priority, dedup-gated
    /// insert, republish
    async fn handle_local_broadcast(&mut self, payload: Vec<u8>) {
        if let Err(e) = validate_payload(&payload) {
            // The handle already rejected this; belt for direct callers
            warn!(code = e.error_code(), "broadcast payload rejected");
            return;
        }

        let now = Utc::now();
        let packet = MeshPacket::new(payload).with_ttl(self.config.store.default_ttl);
        debug!(id = %packet.id, priority = %packet.priority, "local broadcast");

        let outcome = self.store.insert(packet, now).await;
        self.after_insert(outcome, true).await;
    }

    /// Inbound relay path: decode, hop increment, ceiling check, insert
    async fn handle_inbound(&mut self, bytes: &[u8]) {
        let wire = match MeshPacket::from_wire(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(code = e.error_code(), error = %e, "inbound packet rejected");
                return;
            }
        };

        let received = wire.relayed();
        let relayable = received.hop_count < self.config.protocol.hop_ceiling;
        debug!(
            id = %received.id,
            priority = %received.priority,
            hops = received.hop_count,
            relayable,
            "inbound packet"
        );

        let now = Utc::now();
        let outcome = self.store.insert(received, now).await;
        if !relayable {
            // Stored for local display, but propagation stops here
            debug!("hop ceiling reached, not re-advertised");
        }
        self.after_insert(outcome, relayable).await;
    }

    async fn after_insert(&mut self, outcome: lifeline_store::InsertOutcome, relayable: bool) {
        use lifeline_store::InsertOutcome::*;
        match outcome {
            Admitted | EvictedLowerPriority { .. } => {
                if relayable {
                    self.republish().await;
                }
            }
            DuplicateIgnored => {
                debug!("duplicate absorbed, nothing re-advertised");
            }
            RejectedLowest => {
                debug!("buffer full, packet refused");
            }
        }
    }

    /// Refresh the advertised head and metadata characteristics
    ///
    /// The advertised slot is the highest-priority unexpired packet still
    /// below the hop ceiling; hop-capped packets stay buffered for local
    /// display but are never re-exposed to peers.
    async fn republish(&mut self) {
        let now = Utc::now();
        let head = self
            .store
            .snapshot(now)
            .into_iter()
            .find(|p| p.hop_count < self.config.protocol.hop_ceiling);
        let metadata = self.metadata_bytes();

        match head {
            Some(head) if self.last_published.as_deref() != Some(head.id.as_str()) => {
                match head.to_wire() {
                    Ok(bytes) => {
                        self.advertiser
                            .republish(&mut self.radio, Some(Bytes::from(bytes)), metadata)
                            .await;
                        if self.advertiser.is_active() {
                            self.total_relayed += 1;
                        }
                        debug!(id = %head.id, priority = %head.priority, "head republished");
                        self.last_published = Some(head.id);
                    }
                    Err(e) => {
                        warn!(id = %head.id, error = %e, "head encode failed");
                    }
                }
            }
            _ => {
                // Head unchanged (or buffer empty): metadata refresh only
                self.advertiser
                    .republish(&mut self.radio, None, metadata)
                    .await;
            }
        }
    }

    async fn run_sweep(&mut self) {
        let now = Utc::now();
        let removed = self.store.sweep(now).await;
        if removed > 0 {
            debug!(removed, "sweep evicted expired packets");
            // The advertised head may have expired with them
            self.last_published = None;
        }
        self.republish().await;
    }

    async fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::PeerSeen { peer, rssi } => {
                self.peers.put(peer.clone(), Instant::now());
                if self.roles_active {
                    self.scanner.on_peer_seen(&mut self.radio, peer, rssi).await;
                }
            }
            RadioEvent::PeerConnected { peer } => {
                self.peers.put(peer.clone(), Instant::now());
                if self.scanner.is_current(&peer) {
                    self.scanner.on_connected(&mut self.radio, &peer).await;
                } else {
                    // Inbound connection: push the head to the newcomer
                    self.advertiser.on_peer_connected(&mut self.radio, &peer).await;
                }
            }
            RadioEvent::PeerDisconnected { peer } => {
                self.scanner.on_disconnected(&peer);
            }
            RadioEvent::ReadCompleted {
                peer,
                characteristic,
                bytes,
            } => {
                let inbound = self
                    .scanner
                    .on_read_completed(&mut self.radio, &peer, characteristic, bytes)
                    .await;
                if let Some(bytes) = inbound {
                    self.handle_inbound(&bytes).await;
                }
            }
            RadioEvent::ReadFailed { peer, reason } => {
                self.scanner
                    .on_read_failed(&mut self.radio, &peer, &reason)
                    .await;
            }
        }
    }

    fn active_peer_count(&self) -> usize {
        self.peers
            .iter()
            .filter(|(_, seen)| seen.elapsed() < PEER_ACTIVE_WINDOW)
            .count()
    }

    fn metadata_bytes(&self) -> Bytes {
        let metadata = NodeMetadata {
            node: self.node.to_string(),
            buffered: self.store.len() as u32,
            peers: self.active_peer_count() as u32,
        };
        match serde_cbor::to_vec(&metadata) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(error = %e, "metadata encode failed");
                Bytes::new()
            }
        }
    }

    fn stats_snapshot(&self) -> RelayStats {
        let store = self.store.stats();
        RelayStats {
            active_peers: self.active_peer_count(),
            buffered: self.store.snapshot(Utc::now()).len(),
            total_relayed: self.total_relayed,
            duplicates_absorbed: store.duplicates,
            prefilter_fill_ratio: store.prefilter_fill_ratio,
            store,
        }
    }
}
