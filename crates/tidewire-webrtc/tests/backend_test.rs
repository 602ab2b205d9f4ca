//! WebRTC backend tests
//!
//! Offer creation runs fully in-process. The end-to-end test needs local UDP
//! networking and is ignored by default.

use std::time::Duration;

use tidewire_core::{
    ConnectionId, DataChannelState, ManagerConfig, PeerBackend, PeerConnectionManager, PeerEvent,
    PeerId, PeerNotice, SdpKind, SystemEnv,
};
use tidewire_harness::MemoryRelay;
use tidewire_webrtc::{WebRtcBackend, WebRtcConfig};
use tokio::sync::mpsc;

fn host_only() -> WebRtcConfig {
    WebRtcConfig { ice_servers: Vec::new(), ..WebRtcConfig::default() }
}

#[test]
fn default_config() {
    let config = WebRtcConfig::default();
    assert!(config.ordered);
    assert_eq!(config.data_channel_label, "tidewire");
    assert_eq!(config.ice_servers.len(), 1);
}

#[tokio::test]
async fn offer_negotiates_data_channel() {
    let (events, _rx) = mpsc::unbounded_channel();
    let backend = WebRtcBackend::new(host_only(), events).unwrap();
    let peer = PeerId::from("bob");

    let connection = backend.create_connection(&peer, ConnectionId::new(1)).await.unwrap();
    backend.create_data_channel(&connection).await.unwrap();
    let offer = backend.create_offer(&connection).await.unwrap();

    assert_eq!(offer.kind, SdpKind::Offer);
    assert!(offer.sdp.contains("m=application"));
    backend.set_local_description(&connection, &offer).await.unwrap();

    assert!(backend.send_data(&connection, "too early").is_err());
    backend.close(connection).await;
}

#[tokio::test]
async fn answer_before_offer_is_rejected() {
    let (events, _rx) = mpsc::unbounded_channel();
    let backend = WebRtcBackend::new(host_only(), events).unwrap();

    let connection =
        backend.create_connection(&PeerId::from("bob"), ConnectionId::new(1)).await.unwrap();
    assert!(backend.create_answer(&connection).await.is_err());
    backend.close(connection).await;
}

#[tokio::test]
async fn pending_offer_rolls_back() {
    let (events, _rx) = mpsc::unbounded_channel();
    let backend = WebRtcBackend::new(host_only(), events).unwrap();

    let connection =
        backend.create_connection(&PeerId::from("bob"), ConnectionId::new(1)).await.unwrap();
    assert!(backend.rollback_local_offer(&connection).await.is_err());

    backend.create_data_channel(&connection).await.unwrap();
    let offer = backend.create_offer(&connection).await.unwrap();
    backend.set_local_description(&connection, &offer).await.unwrap();

    backend.rollback_local_offer(&connection).await.unwrap();
    assert!(connection.native().pending_local_description().await.is_none());
    backend.close(connection).await;
}

type Manager = PeerConnectionManager<SystemEnv, WebRtcBackend, tidewire_harness::RelayEndpoint>;

fn node(relay: &MemoryRelay, id: &str) -> (Manager, mpsc::UnboundedReceiver<PeerEvent>) {
    let (events_tx, events) = mpsc::unbounded_channel();
    let backend = WebRtcBackend::new(host_only(), events_tx).unwrap();
    let config = ManagerConfig {
        candidate_batch_delay: Duration::from_millis(20),
        ..ManagerConfig::default()
    };
    let manager =
        PeerConnectionManager::new(SystemEnv::new(), backend, relay.endpoint(id), id.into(), config);
    (manager, events)
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs local UDP networking"]
async fn two_managers_exchange_a_message() {
    let relay = MemoryRelay::new();
    let (mut alice, mut alice_events) = node(&relay, "alice");
    let (mut bob, mut bob_events) = node(&relay, "bob");
    let (alice_id, bob_id) = (PeerId::from("alice"), PeerId::from("bob"));

    alice.connect(&bob_id).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    let mut received = None;
    while received.is_none() && tokio::time::Instant::now() < deadline {
        for (sender, envelope) in relay.take_inbox(&bob_id) {
            let _ = bob.handle_signal(&sender, envelope).await;
        }
        for (sender, envelope) in relay.take_inbox(&alice_id) {
            let _ = alice.handle_signal(&sender, envelope).await;
        }
        while let Ok(event) = alice_events.try_recv() {
            alice.handle_event(event).await;
        }
        while let Ok(event) = bob_events.try_recv() {
            bob.handle_event(event).await;
        }
        alice.tick(std::time::Instant::now()).await;
        bob.tick(std::time::Instant::now()).await;

        if alice.data_channel_state(&bob_id) == Some(DataChannelState::Open) {
            let _ = alice.send_message(&bob_id, &"over the wire".into());
        }
        received = bob.take_notices().into_iter().find_map(|notice| match notice {
            PeerNotice::Message { payload, .. } => Some(payload),
            _ => None,
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(received.as_deref(), Some("over the wire"));
    alice.close_all().await;
    bob.close_all().await;
}
