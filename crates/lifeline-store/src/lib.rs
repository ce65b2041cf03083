//! Lifeline Store - Dedup engine and durable priority store
//!
//! This crate implements the store-carry-forward buffer at the heart of the
//! relay:
//!
//! - **prefilter**: probabilistic pre-filter (no false negatives, bounded
//!   false-positive rate) answering "definitely new" in O(1)
//! - **dedup**: two-tier duplicate filter combining the pre-filter with the
//!   authoritative set of live packet keys
//! - **persist**: sqlite-backed durable record table (sqlx)
//! - **store**: the bounded, priority-ordered, crash-surviving
//!   [`PriorityStore`]
//!
//! ## Example
//!
//! ```ignore
//! use lifeline_core::{MeshPacket, StoreConfig};
//! use lifeline_store::{PacketStore, PriorityStore};
//! use chrono::Utc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let persist = PacketStore::open("relay.db").await?;
//!     let mut store = PriorityStore::with_persistence(&StoreConfig::default(), persist);
//!     store.reload(Utc::now()).await?;
//!
//!     let packet = MeshPacket::new(b"\x02sos".to_vec());
//!     store.insert(packet, Utc::now()).await;
//!     println!("head: {:?}", store.head(Utc::now()));
//!     Ok(())
//! }
//! ```

pub mod dedup;
pub mod error;
pub mod persist;
pub mod prefilter;
pub mod store;

// Re-exports for convenience
pub use dedup::{DedupEngine, DedupStats};
pub use error::{Result, StoreError};
pub use persist::PacketStore;
pub use prefilter::PreFilter;
pub use store::{InsertOutcome, PriorityStore, StoreStats};
