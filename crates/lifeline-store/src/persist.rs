//! Durable packet table
//!
//! A single sqlite table keyed by packet id keeps the buffer alive across
//! process restarts. Columns mirror [`MeshPacket`] with millisecond UTC
//! integers for timestamps; an index on `created_at` keeps TTL sweeps and
//! reload filtering cheap.
//!
//! Writes are issued synchronously (awaited) from the store's owning task
//! before an insert is acknowledged, so a `head()` observed by the protocol
//! can never name a packet a crash would un-persist.

use chrono::{DateTime, Utc};
use lifeline_core::{MeshPacket, Priority};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS packets (
    id          TEXT PRIMARY KEY,
    priority    INTEGER NOT NULL,
    payload     BLOB NOT NULL,
    created_at  INTEGER NOT NULL,
    ttl_ms      INTEGER NOT NULL,
    hop_count   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_packets_created_at ON packets(created_at);
";

/// Sqlite-backed durable record table for relay packets
#[derive(Debug, Clone)]
pub struct PacketStore {
    pool: SqlitePool,
}

impl PacketStore {
    /// Open (creating if missing) a packet store at the given file path
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(path = %path.as_ref().display(), "packet store opened");
        Ok(store)
    }

    /// Open an in-memory store (tests and diskless fallback)
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?;
        // A second connection would see a different empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert a packet, ignoring an already-present id
    pub async fn insert_or_ignore(&self, packet: &MeshPacket) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO packets (id, priority, payload, created_at, ttl_ms, hop_count)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&packet.id)
        .bind(packet.priority.discriminator() as i64)
        .bind(&packet.payload)
        .bind(packet.created_at.timestamp_millis())
        .bind(packet.ttl_ms as i64)
        .bind(packet.hop_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load every unexpired row, ordered by priority then recency
    ///
    /// The ordering matches the in-memory comparator so a reloaded store
    /// advertises the same head it did before the restart.
    pub async fn load_unexpired(&self, now: DateTime<Utc>) -> Result<Vec<MeshPacket>> {
        let rows = sqlx::query(
            "SELECT id, priority, payload, created_at, ttl_ms, hop_count
             FROM packets
             WHERE created_at + ttl_ms > ?
             ORDER BY priority ASC, created_at DESC",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        let mut packets = Vec::with_capacity(rows.len());
        for row in rows {
            packets.push(Self::row_to_packet(&row)?);
        }
        Ok(packets)
    }

    /// Delete a row by id
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM packets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every expired row, returning the number removed
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM packets WHERE created_at + ttl_ms <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            debug!(deleted, "expired rows removed from durable store");
        }
        Ok(deleted)
    }

    /// Count all rows, expired or not
    pub async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM packets")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    fn row_to_packet(row: &sqlx::sqlite::SqliteRow) -> Result<MeshPacket> {
        let created_ms: i64 = row.try_get("created_at")?;
        let created_at = DateTime::from_timestamp_millis(created_ms).ok_or_else(|| {
            crate::error::StoreError::Serialization(format!(
                "created_at out of range: {created_ms}"
            ))
        })?;
        let priority: i64 = row.try_get("priority")?;
        let ttl_ms: i64 = row.try_get("ttl_ms")?;
        let hop_count: i64 = row.try_get("hop_count")?;

        Ok(MeshPacket {
            id: row.try_get("id")?,
            priority: Priority::from_discriminator(priority as u8),
            payload: row.try_get("payload")?,
            created_at,
            ttl_ms: ttl_ms as u64,
            hop_count: hop_count as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn packet(payload: &[u8]) -> MeshPacket {
        // Columns hold millisecond integers; align the timestamp so a
        // round-tripped row compares equal
        let p = MeshPacket::new(payload.to_vec());
        let millis = p.created_at.timestamp_millis();
        p.with_created_at(DateTime::from_timestamp_millis(millis).unwrap())
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = PacketStore::in_memory().await.unwrap();
        let p = packet(b"\x02sos from basement");

        store.insert_or_ignore(&p).await.unwrap();
        let loaded = store.load_unexpired(Utc::now()).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], p);
    }

    #[tokio::test]
    async fn test_insert_or_ignore_is_idempotent() {
        let store = PacketStore::in_memory().await.unwrap();
        let p = packet(b"\x02same event");

        store.insert_or_ignore(&p).await.unwrap();
        store.insert_or_ignore(&p).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_load_orders_by_priority_then_recency() {
        let store = PacketStore::in_memory().await.unwrap();
        let t0 = Utc::now();

        let chat_old = packet(b"\x04old chat").with_created_at(t0 - ChronoDuration::seconds(30));
        let chat_new = packet(b"\x04new chat").with_created_at(t0);
        let trapped =
            packet(b"\x00under rubble").with_created_at(t0 - ChronoDuration::seconds(60));

        store.insert_or_ignore(&chat_old).await.unwrap();
        store.insert_or_ignore(&chat_new).await.unwrap();
        store.insert_or_ignore(&trapped).await.unwrap();

        let loaded = store.load_unexpired(t0).await.unwrap();
        assert_eq!(loaded[0].id, trapped.id);
        assert_eq!(loaded[1].id, chat_new.id);
        assert_eq!(loaded[2].id, chat_old.id);
    }

    #[tokio::test]
    async fn test_load_filters_expired() {
        let store = PacketStore::in_memory().await.unwrap();
        let t0 = Utc::now();

        let live = packet(b"\x03still here");
        let expired = packet(b"\x03long gone")
            .with_created_at(t0 - ChronoDuration::hours(2))
            .with_ttl(Duration::from_secs(60));

        store.insert_or_ignore(&live).await.unwrap();
        store.insert_or_ignore(&expired).await.unwrap();

        let loaded = store.load_unexpired(t0).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, live.id);

        // The expired row is still physically present until a sweep
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.delete_expired(t0).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_id() {
        let store = PacketStore::in_memory().await.unwrap();
        let p = packet(b"\x04bye");
        store.insert_or_ignore(&p).await.unwrap();
        store.delete(&p.id).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
