//! In-memory radio for deterministic tests
//!
//! [`AirLink`] is a shared medium connecting any number of [`MockRadio`]s.
//! Advertising, scanning, served characteristic values, and event delivery
//! all happen through it, so two controllers wired to the same link behave
//! like two devices in radio range:
//!
//! - `start_advertising` makes the node visible; scanning nodes receive a
//!   [`RadioEvent::PeerSeen`].
//! - `publish_characteristic` updates the served value and re-announces the
//!   node to scanners, standing in for notify-on-change.
//! - `begin_connect` / `begin_read` complete immediately through the
//!   initiator's own event channel, and the responder sees the inbound
//!   [`RadioEvent::PeerConnected`].
//!
//! Failure injection (`set_power_available`, `set_fail_connect`,
//! `set_fail_reads`) exercises the retry paths.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::radio::{CharacteristicId, NodeIdentity, PeerIdentity, RadioCapability, RadioEvent};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct AirInner {
    advertising: HashSet<PeerIdentity>,
    scanning: HashSet<PeerIdentity>,
    characteristics: HashMap<PeerIdentity, HashMap<CharacteristicId, Bytes>>,
    taps: HashMap<PeerIdentity, mpsc::Sender<RadioEvent>>,
}

/// Shared medium linking mock radios
#[derive(Clone, Default)]
pub struct AirLink {
    inner: Arc<Mutex<AirInner>>,
}

impl AirLink {
    /// Create an empty medium
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the value a node currently serves for a characteristic
    pub fn served(&self, peer: &PeerIdentity, characteristic: CharacteristicId) -> Option<Bytes> {
        self.inner
            .lock()
            .characteristics
            .get(peer)
            .and_then(|chars| chars.get(&characteristic))
            .cloned()
    }

    fn register(&self, peer: PeerIdentity, tap: mpsc::Sender<RadioEvent>) {
        self.inner.lock().taps.insert(peer, tap);
    }

    /// Announce `from` to every scanning node except itself
    fn announce(&self, from: &PeerIdentity) {
        let inner = self.inner.lock();
        for peer in &inner.scanning {
            if peer == from {
                continue;
            }
            if let Some(tap) = inner.taps.get(peer) {
                let _ = tap.try_send(RadioEvent::PeerSeen {
                    peer: from.clone(),
                    rssi: -40,
                });
            }
        }
    }

    fn send_to(&self, peer: &PeerIdentity, event: RadioEvent) {
        if let Some(tap) = self.inner.lock().taps.get(peer) {
            let _ = tap.try_send(event);
        }
    }
}

/// Mock implementation of [`RadioCapability`]
pub struct MockRadio {
    identity: PeerIdentity,
    air: AirLink,
    event_tx: mpsc::Sender<RadioEvent>,
    event_rx: Option<mpsc::Receiver<RadioEvent>>,
    powered: bool,
    power_available: bool,
    advertising: bool,
    scanning: bool,
    fail_connect: bool,
    fail_reads: bool,
}

impl MockRadio {
    /// Create a radio with the given on-air identity, joined to `air`
    pub fn new(identity: impl Into<String>, air: &AirLink) -> Self {
        let identity = PeerIdentity(identity.into());
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        air.register(identity.clone(), event_tx.clone());
        Self {
            identity,
            air: air.clone(),
            event_tx,
            event_rx: Some(event_rx),
            powered: false,
            power_available: true,
            advertising: false,
            scanning: false,
            fail_connect: false,
            fail_reads: false,
        }
    }

    /// Simulate a radio that cannot be acquired (off / permission denied)
    pub fn set_power_available(&mut self, available: bool) {
        self.power_available = available;
    }

    /// Make subsequent connection attempts fail
    pub fn set_fail_connect(&mut self, fail: bool) {
        self.fail_connect = fail;
    }

    /// Make subsequent reads fail
    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Whether the radio is currently advertising
    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    /// Whether the radio is currently scanning
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Sender for injecting arbitrary events into this radio's stream
    pub fn injector(&self) -> mpsc::Sender<RadioEvent> {
        self.event_tx.clone()
    }
}

#[async_trait]
impl RadioCapability for MockRadio {
    async fn power_on(&mut self) -> Result<bool> {
        self.powered = self.power_available;
        Ok(self.powered)
    }

    async fn start_advertising(&mut self, _service: &str, _node: &NodeIdentity) -> Result<()> {
        self.advertising = true;
        self.air.inner.lock().advertising.insert(self.identity.clone());
        self.air.announce(&self.identity);
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<()> {
        self.advertising = false;
        self.air.inner.lock().advertising.remove(&self.identity);
        Ok(())
    }

    async fn start_scanning(&mut self, _service: &str) -> Result<()> {
        self.scanning = true;
        let visible: Vec<PeerIdentity> = {
            let mut inner = self.air.inner.lock();
            inner.scanning.insert(self.identity.clone());
            inner
                .advertising
                .iter()
                .filter(|p| **p != self.identity)
                .cloned()
                .collect()
        };
        // Already-advertising peers are sighted immediately
        for peer in visible {
            let _ = self.event_tx.try_send(RadioEvent::PeerSeen { peer, rssi: -40 });
        }
        Ok(())
    }

    async fn stop_scanning(&mut self) -> Result<()> {
        self.scanning = false;
        self.air.inner.lock().scanning.remove(&self.identity);
        Ok(())
    }

    async fn publish_characteristic(
        &mut self,
        characteristic: CharacteristicId,
        value: Bytes,
    ) -> Result<()> {
        self.air
            .inner
            .lock()
            .characteristics
            .entry(self.identity.clone())
            .or_default()
            .insert(characteristic, value);
        if self.advertising {
            // Stands in for notify-on-change reaching listeners
            self.air.announce(&self.identity);
        }
        Ok(())
    }

    async fn begin_connect(&mut self, peer: &PeerIdentity) -> Result<()> {
        if self.fail_connect {
            let _ = self.event_tx.try_send(RadioEvent::PeerDisconnected {
                peer: peer.clone(),
            });
            return Ok(());
        }
        let advertising = self.air.inner.lock().advertising.contains(peer);
        if advertising {
            let _ = self.event_tx.try_send(RadioEvent::PeerConnected {
                peer: peer.clone(),
            });
            // The responder side observes the inbound connection
            self.air.send_to(
                peer,
                RadioEvent::PeerConnected {
                    peer: self.identity.clone(),
                },
            );
        } else {
            let _ = self.event_tx.try_send(RadioEvent::PeerDisconnected {
                peer: peer.clone(),
            });
        }
        Ok(())
    }

    async fn begin_read(
        &mut self,
        peer: &PeerIdentity,
        characteristic: CharacteristicId,
    ) -> Result<()> {
        if self.fail_reads {
            let _ = self.event_tx.try_send(RadioEvent::ReadFailed {
                peer: peer.clone(),
                reason: "injected read failure".to_string(),
            });
            return Ok(());
        }
        let event = match self.air.served(peer, characteristic) {
            Some(bytes) => RadioEvent::ReadCompleted {
                peer: peer.clone(),
                characteristic,
                bytes,
            },
            None => RadioEvent::ReadFailed {
                peer: peer.clone(),
                reason: "characteristic not served".to_string(),
            },
        };
        let _ = self.event_tx.try_send(event);
        Ok(())
    }

    async fn disconnect(&mut self, _peer: &PeerIdentity) -> Result<()> {
        Ok(())
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<RadioEvent>> {
        self.event_rx.take()
    }

    fn name(&self) -> &str {
        &self.identity.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_power_availability() {
        let air = AirLink::new();
        let mut radio = MockRadio::new("a", &air);
        assert!(radio.power_on().await.unwrap());

        radio.set_power_available(false);
        assert!(!radio.power_on().await.unwrap());
    }

    #[tokio::test]
    async fn test_scanner_sees_advertiser() {
        let air = AirLink::new();
        let mut advertiser = MockRadio::new("a", &air);
        let mut scanner = MockRadio::new("b", &air);
        let mut events = scanner.take_events().unwrap();

        scanner.start_scanning("svc").await.unwrap();
        advertiser
            .start_advertising("svc", &NodeIdentity::generate())
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            RadioEvent::PeerSeen { peer, .. } => assert_eq!(peer.0, "a"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_round_trip_through_air() {
        let air = AirLink::new();
        let mut provider = MockRadio::new("a", &air);
        provider
            .start_advertising("svc", &NodeIdentity::generate())
            .await
            .unwrap();
        provider
            .publish_characteristic(CharacteristicId::Packet, Bytes::from_static(b"payload"))
            .await
            .unwrap();

        let mut reader = MockRadio::new("b", &air);
        let mut events = reader.take_events().unwrap();
        reader
            .begin_read(&PeerIdentity("a".into()), CharacteristicId::Packet)
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            RadioEvent::ReadCompleted { bytes, .. } => {
                assert_eq!(bytes, Bytes::from_static(b"payload"))
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_to_absent_peer_disconnects() {
        let air = AirLink::new();
        let mut radio = MockRadio::new("b", &air);
        let mut events = radio.take_events().unwrap();

        radio
            .begin_connect(&PeerIdentity("ghost".into()))
            .await
            .unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            RadioEvent::PeerDisconnected { .. }
        ));
    }
}
