//! Lifeline Mesh - Discovery, exchange, and relay orchestration
//!
//! This crate runs the radio-facing half of the relay:
//!
//! - **radio**: the [`RadioCapability`] trait and the tagged event set
//!   every backend reports through
//! - **advertiser**: the responder role, serving the head packet and a
//!   metadata block to any peer that connects
//! - **scanner**: the initiator role, sighting peers and pulling exactly
//!   one head packet per contact
//! - **controller**: the [`MeshController`] task, single owner of the
//!   store and dedup state, driven by commands, radio events, and the
//!   periodic TTL sweep
//! - **testing**: an in-process radio medium ([`testing::AirLink`] and
//!   [`testing::MockRadio`]) for multi-node tests without hardware
//!
//! ## Example
//!
//! ```ignore
//! use lifeline_core::MeshConfig;
//! use lifeline_mesh::{MeshController, testing::{AirLink, MockRadio}};
//! use lifeline_store::PriorityStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MeshConfig::default();
//!     let air = AirLink::new();
//!     let radio = MockRadio::new("node-a", &air);
//!     let store = PriorityStore::new(&config.store);
//!
//!     let (mut controller, handle) = MeshController::new(config, radio, store)?;
//!     controller.initialize().await;
//!     tokio::spawn(controller.run());
//!
//!     handle.start().await?;
//!     handle.broadcast(b"\x02need water, 3rd and main".to_vec()).await?;
//!     Ok(())
//! }
//! ```

pub mod advertiser;
pub mod controller;
pub mod error;
pub mod radio;
pub mod scanner;
pub mod testing;

// Re-exports for convenience
pub use advertiser::AdvertiserRole;
pub use controller::{ControllerHandle, MeshController, NodeMetadata, RelayStats};
pub use error::{MeshError, Result};
pub use radio::{
    CharacteristicId, NodeIdentity, PeerIdentity, RadioCapability, RadioEvent, RoleState,
};
pub use scanner::ScannerRole;
