//! The store-carry-forward buffer
//!
//! [`PriorityStore`] holds the bounded, priority-ordered set of unexpired
//! packets a node is carrying. Ordering is priority descending then recency
//! descending, which directly encodes "a trapped person's report always
//! wins the advertised slot over older or less urgent traffic".
//!
//! Insertion runs, in order: dedup check, capacity check (evicting the
//! lowest-priority-oldest entry), durable write, in-memory insert. A
//! durable-write failure is logged and the packet is kept in memory for the
//! session; that single message may not survive a crash, but current-session
//! relay keeps working.

use chrono::{DateTime, Utc};
use lifeline_core::{DedupKey, MeshPacket, StoreConfig};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::dedup::DedupEngine;
use crate::error::Result;
use crate::persist::PacketStore;

/// Result of offering a packet to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Packet admitted into the buffer
    Admitted,
    /// Packet was already known; silently absorbed
    DuplicateIgnored,
    /// Packet admitted after evicting the lowest-priority-oldest entry
    EvictedLowerPriority {
        /// Id of the evicted packet
        evicted_id: String,
    },
    /// Buffer full and the new packet would itself be the
    /// lowest-priority-oldest entry; insertion refused
    RejectedLowest,
}

/// Buffer ordering key: priority first (discriminator ascending, so the
/// most urgent sorts first), then recency (newer first), id as tie-break.
/// The first map entry is the head; the last is the eviction candidate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SlotKey {
    urgency: u8,
    recency: Reverse<i64>,
    id: String,
}

impl SlotKey {
    fn for_packet(packet: &MeshPacket) -> Self {
        Self {
            urgency: packet.priority.discriminator(),
            recency: Reverse(packet.created_at.timestamp_millis()),
            id: packet.id.clone(),
        }
    }
}

/// Store-level counters merged with the dedup engine's in [`StoreStats`]
#[derive(Debug, Clone, Default)]
struct Counters {
    admitted: u64,
    evictions: u64,
    rejected_lowest: u64,
    swept: u64,
    persist_failures: u64,
}

/// Snapshot of buffer and dedup counters, safe to poll frequently
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Packets currently buffered (including any pending sweep)
    pub buffered: usize,
    /// Packets admitted since start
    pub admitted: u64,
    /// Duplicates silently absorbed
    pub duplicates: u64,
    /// Entries evicted under capacity pressure
    pub evictions: u64,
    /// Insertions refused because the new packet was the lowest
    pub rejected_lowest: u64,
    /// Entries removed by TTL sweeps
    pub swept: u64,
    /// Durable writes that failed (packet kept in memory only)
    pub persist_failures: u64,
    /// Pre-filter bit-array fill ratio
    pub prefilter_fill_ratio: f64,
    /// Pre-filter clear-and-rebuild cycles
    pub prefilter_rebuilds: u64,
}

/// Bounded, priority-ordered, crash-surviving packet buffer
pub struct PriorityStore {
    entries: BTreeMap<SlotKey, MeshPacket>,
    by_key: HashMap<DedupKey, SlotKey>,
    dedup: DedupEngine,
    persist: Option<PacketStore>,
    capacity: usize,
    counters: Counters,
}

impl PriorityStore {
    /// Create a memory-only store (no crash survival)
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            entries: BTreeMap::new(),
            by_key: HashMap::new(),
            dedup: DedupEngine::from_config(config),
            persist: None,
            capacity: config.capacity.max(1),
            counters: Counters::default(),
        }
    }

    /// Create a store backed by a durable packet table
    pub fn with_persistence(config: &StoreConfig, persist: PacketStore) -> Self {
        let mut store = Self::new(config);
        store.persist = Some(persist);
        store
    }

    /// Offer a packet to the buffer
    ///
    /// Flow: dedup, capacity (evict lowest-priority-oldest), durable
    /// write, ordered in-memory insert.
    pub async fn insert(&mut self, packet: MeshPacket, now: DateTime<Utc>) -> InsertOutcome {
        let key = packet.dedup_key();
        if !self.dedup.mark_seen(&key) {
            debug!(key = %key, "duplicate packet absorbed");
            return InsertOutcome::DuplicateIgnored;
        }

        let mut evicted_id = None;
        if self.entries.len() >= self.capacity {
            // Prefer reclaiming expired entries over evicting live ones
            self.sweep(now).await;
        }
        if self.entries.len() >= self.capacity {
            let slot = SlotKey::for_packet(&packet);
            let worst = self
                .entries
                .last_key_value()
                .map(|(k, _)| k.clone())
                .expect("non-empty at capacity");

            if slot >= worst {
                // The new packet is itself the lowest-priority-oldest
                self.dedup.forget(&key);
                self.counters.rejected_lowest += 1;
                debug!(id = %packet.id, priority = %packet.priority, "buffer full, packet refused");
                return InsertOutcome::RejectedLowest;
            }

            if let Some(victim) = self.entries.remove(&worst) {
                self.by_key.remove(&victim.dedup_key());
                self.dedup.forget(&victim.dedup_key());
                if let Some(persist) = &self.persist {
                    if let Err(e) = persist.delete(&victim.id).await {
                        warn!(id = %victim.id, error = %e, "failed to delete evicted row");
                    }
                }
                self.counters.evictions += 1;
                info!(
                    evicted = %victim.id,
                    priority = %victim.priority,
                    "lowest-priority-oldest entry evicted"
                );
                evicted_id = Some(victim.id);
            }
        }

        // Durable write before the in-memory insert becomes observable
        if let Some(persist) = &self.persist {
            if let Err(e) = persist.insert_or_ignore(&packet).await {
                warn!(id = %packet.id, error = %e, "durable write failed, keeping in memory only");
                self.counters.persist_failures += 1;
            }
        }

        let slot = SlotKey::for_packet(&packet);
        self.by_key.insert(key, slot.clone());
        self.entries.insert(slot, packet);
        self.counters.admitted += 1;

        match evicted_id {
            Some(evicted_id) => InsertOutcome::EvictedLowerPriority { evicted_id },
            None => InsertOutcome::Admitted,
        }
    }

    /// The single highest-priority, most-recent, unexpired packet
    pub fn head(&self, now: DateTime<Utc>) -> Option<MeshPacket> {
        self.entries
            .values()
            .find(|p| !p.is_expired(now))
            .cloned()
    }

    /// Ordered sequence of unexpired packets
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<MeshPacket> {
        self.entries
            .values()
            .filter(|p| !p.is_expired(now))
            .cloned()
            .collect()
    }

    /// Whether a key belongs to a live buffered packet
    pub fn contains(&self, key: &DedupKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Remove every expired entry from memory and durable storage
    ///
    /// Returns the number of in-memory entries removed.
    pub async fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<SlotKey> = self
            .entries
            .iter()
            .filter(|(_, p)| p.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();

        for slot in &expired {
            if let Some(packet) = self.entries.remove(slot) {
                let key = packet.dedup_key();
                self.by_key.remove(&key);
                self.dedup.forget(&key);
            }
        }

        if let Some(persist) = &self.persist {
            if let Err(e) = persist.delete_expired(now).await {
                warn!(error = %e, "failed to delete expired rows");
            }
        }

        let removed = expired.len();
        if removed > 0 {
            self.counters.swept += removed as u64;
            debug!(removed, remaining = self.entries.len(), "ttl sweep");
        }
        removed
    }

    /// Rebuild the in-memory buffer and dedup set from durable storage
    ///
    /// Loads only unexpired rows in buffer order (so the pre-restart head
    /// is restored), then sweeps now-expired rows from the table. Returns
    /// the number of packets restored.
    pub async fn reload(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let Some(persist) = self.persist.clone() else {
            return Ok(0);
        };

        self.entries.clear();
        self.by_key.clear();
        self.dedup.clear();

        let rows = persist.load_unexpired(now).await?;
        let loaded = rows.len().min(self.capacity);
        for packet in rows.into_iter().take(self.capacity) {
            let key = packet.dedup_key();
            self.dedup.mark_seen(&key);
            let slot = SlotKey::for_packet(&packet);
            self.by_key.insert(key, slot.clone());
            self.entries.insert(slot, packet);
        }

        persist.delete_expired(now).await?;
        info!(loaded, "priority store reloaded from durable storage");
        Ok(loaded)
    }

    /// Number of buffered entries (expired entries count until swept)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity bound
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Merged buffer and dedup counters
    pub fn stats(&self) -> StoreStats {
        let dedup = self.dedup.stats();
        StoreStats {
            buffered: self.entries.len(),
            admitted: self.counters.admitted,
            duplicates: dedup.duplicates,
            evictions: self.counters.evictions,
            rejected_lowest: self.counters.rejected_lowest,
            swept: self.counters.swept,
            persist_failures: self.counters.persist_failures,
            prefilter_fill_ratio: self.dedup.fill_ratio(),
            prefilter_rebuilds: dedup.rebuilds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use lifeline_core::Priority;
    use std::time::Duration;

    fn config(capacity: usize) -> StoreConfig {
        StoreConfig {
            capacity,
            ..StoreConfig::default()
        }
    }

    fn packet(payload: &[u8], created_at: DateTime<Utc>) -> MeshPacket {
        MeshPacket::new(payload.to_vec()).with_created_at(created_at)
    }

    #[tokio::test]
    async fn test_dedup_idempotence() {
        let mut store = PriorityStore::new(&config(10));
        let now = Utc::now();
        let p = packet(b"\x00trapped, Elm St 14", now);

        assert_eq!(store.insert(p.clone(), now).await, InsertOutcome::Admitted);
        for _ in 0..9 {
            assert_eq!(
                store.insert(p.clone(), now).await,
                InsertOutcome::DuplicateIgnored
            );
        }

        let stats = store.stats();
        assert_eq!(stats.buffered, 1);
        assert_eq!(stats.duplicates, 9);
    }

    #[tokio::test]
    async fn test_priority_precedence() {
        let mut store = PriorityStore::new(&config(10));
        let now = Utc::now();

        // Chat is newer than the trapped report; trapped still wins
        store
            .insert(packet(b"\x00under rubble", now - ChronoDuration::minutes(5)), now)
            .await;
        store.insert(packet(b"\x04anyone there?", now), now).await;

        let head = store.head(now).unwrap();
        assert_eq!(head.priority, Priority::Trapped);
    }

    #[tokio::test]
    async fn test_head_prefers_recent_within_priority() {
        let mut store = PriorityStore::new(&config(10));
        let now = Utc::now();

        store
            .insert(packet(b"\x02older sos", now - ChronoDuration::minutes(1)), now)
            .await;
        store.insert(packet(b"\x02newer sos", now), now).await;

        let head = store.head(now).unwrap();
        assert_eq!(head.payload, b"\x02newer sos");
    }

    #[tokio::test]
    async fn test_capacity_evicts_lowest_priority_oldest() {
        let mut store = PriorityStore::new(&config(3));
        let now = Utc::now();

        let oldest_chat = packet(b"\x04chat 0", now - ChronoDuration::seconds(30));
        store.insert(oldest_chat.clone(), now).await;
        store
            .insert(packet(b"\x04chat 1", now - ChronoDuration::seconds(20)), now)
            .await;
        store
            .insert(packet(b"\x04chat 2", now - ChronoDuration::seconds(10)), now)
            .await;

        let outcome = store.insert(packet(b"\x02sos!", now), now).await;
        assert_eq!(
            outcome,
            InsertOutcome::EvictedLowerPriority {
                evicted_id: oldest_chat.id.clone()
            }
        );
        assert_eq!(store.len(), 3);

        // Every retained entry outranks (or is newer than) the evicted one
        let head = store.head(now).unwrap();
        assert_eq!(head.priority, Priority::Sos);
        assert!(!store.contains(&oldest_chat.dedup_key()));
    }

    #[tokio::test]
    async fn test_full_buffer_refuses_lowest_newcomer() {
        let mut store = PriorityStore::new(&config(2));
        let now = Utc::now();

        store.insert(packet(b"\x02sos a", now), now).await;
        store.insert(packet(b"\x02sos b", now), now).await;

        // An older chat packet would be the worst entry itself
        let outcome = store
            .insert(packet(b"\x04late chat", now - ChronoDuration::minutes(1)), now)
            .await;
        assert_eq!(outcome, InsertOutcome::RejectedLowest);
        assert_eq!(store.len(), 2);
        assert_eq!(store.stats().rejected_lowest, 1);
    }

    #[tokio::test]
    async fn test_rejected_packet_can_be_offered_again() {
        let mut store = PriorityStore::new(&config(1));
        let now = Utc::now();

        store.insert(packet(b"\x00trapped", now), now).await;
        let chat = packet(b"\x04chat", now - ChronoDuration::minutes(1));
        assert_eq!(
            store.insert(chat.clone(), now).await,
            InsertOutcome::RejectedLowest
        );

        // After the higher-priority packet expires, the chat is admissible
        let later = now + ChronoDuration::hours(2);
        store.sweep(later).await;
        assert_eq!(
            store.insert(packet(b"\x04chat", later), later).await,
            InsertOutcome::Admitted
        );
    }

    #[tokio::test]
    async fn test_capacity_bound_holds() {
        let cap = 20;
        let mut store = PriorityStore::new(&config(cap));
        let now = Utc::now();

        for n in 0..(cap + 1) {
            let payload = format!("\x04chat {n}").into_bytes();
            store
                .insert(
                    packet(&payload, now - ChronoDuration::seconds((cap - n) as i64)),
                    now,
                )
                .await;
        }
        assert_eq!(store.len(), cap);
        assert_eq!(store.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_ttl_invisible_before_sweep() {
        let mut store = PriorityStore::new(&config(10));
        let now = Utc::now();
        let p = packet(b"\x02brief", now).with_ttl(Duration::from_millis(100));
        store.insert(p, now).await;

        let at_50 = now + ChronoDuration::milliseconds(50);
        assert!(store.head(at_50).is_some());
        assert_eq!(store.snapshot(at_50).len(), 1);

        // Invisible to every read path once expired, even before the sweep
        let at_150 = now + ChronoDuration::milliseconds(150);
        assert!(store.head(at_150).is_none());
        assert!(store.snapshot(at_150).is_empty());
        assert_eq!(store.len(), 1);

        assert_eq!(store.sweep(at_150).await, 1);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_sweep_frees_key_for_readmission() {
        let mut store = PriorityStore::new(&config(10));
        let now = Utc::now();
        let p = packet(b"\x03ping", now).with_ttl(Duration::from_millis(10));
        store.insert(p, now).await;

        let later = now + ChronoDuration::seconds(1);
        store.sweep(later).await;
        assert_eq!(
            store
                .insert(packet(b"\x03ping", later), later)
                .await,
            InsertOutcome::Admitted
        );
    }

    #[tokio::test]
    async fn test_persisted_insert_and_sweep() {
        let persist = PacketStore::in_memory().await.unwrap();
        let mut store = PriorityStore::with_persistence(&config(10), persist.clone());
        let now = Utc::now();

        let p = packet(b"\x02short lived", now).with_ttl(Duration::from_millis(100));
        store.insert(p, now).await;
        assert_eq!(persist.count().await.unwrap(), 1);

        store.sweep(now + ChronoDuration::seconds(1)).await;
        assert_eq!(persist.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_crash_restart_reload_preserves_order() {
        let persist = PacketStore::in_memory().await.unwrap();
        let now = Utc::now();
        let pre_restart: Vec<String>;

        {
            let mut store = PriorityStore::with_persistence(&config(10), persist.clone());
            store
                .insert(packet(b"\x04chat", now - ChronoDuration::minutes(3)), now)
                .await;
            store
                .insert(packet(b"\x01medic", now - ChronoDuration::minutes(2)), now)
                .await;
            store
                .insert(
                    packet(b"\x03downtown ok", now - ChronoDuration::minutes(1))
                        .with_ttl(Duration::from_secs(90)),
                    now,
                )
                .await;
            pre_restart = store.snapshot(now).into_iter().map(|p| p.id).collect();
        }

        // "Restart" with 2 minutes of downtime; the status packet expires
        let restart_at = now + ChronoDuration::minutes(2);
        let mut store = PriorityStore::with_persistence(&config(10), persist.clone());
        let loaded = store.reload(restart_at).await.unwrap();
        assert_eq!(loaded, 2);

        let post_restart: Vec<String> = store
            .snapshot(restart_at)
            .into_iter()
            .map(|p| p.id)
            .collect();
        let expected: Vec<String> = pre_restart
            .into_iter()
            .filter(|id| post_restart.contains(id))
            .collect();
        assert_eq!(post_restart, expected);
        assert_eq!(store.head(restart_at).unwrap().priority, Priority::Medical);

        // Expired rows were removed from the table during reload
        assert_eq!(persist.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reload_restores_dedup_state() {
        let persist = PacketStore::in_memory().await.unwrap();
        let now = Utc::now();

        {
            let mut store = PriorityStore::with_persistence(&config(10), persist.clone());
            store.insert(packet(b"\x02sos", now), now).await;
        }

        let mut store = PriorityStore::with_persistence(&config(10), persist);
        store.reload(now).await.unwrap();
        assert_eq!(
            store.insert(packet(b"\x02sos", now), now).await,
            InsertOutcome::DuplicateIgnored
        );
    }
}
