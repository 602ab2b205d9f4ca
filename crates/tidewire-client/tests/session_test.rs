//! Session runtime tests over the loopback network

use std::{collections::HashMap, time::Duration};

use tidewire_client::{Session, SessionError, SessionHandle};
use tidewire_core::{
    ChannelSignaling, ConnectionState, DataChannelState, ManagerConfig, PeerConnectionManager,
    PeerId, PeerNotice, SendError, SignalingEnvelope, SystemEnv,
};
use tidewire_harness::LoopbackNetwork;
use tokio::{sync::mpsc, time::timeout};

const WAIT: Duration = Duration::from_secs(5);

type Inbox = mpsc::UnboundedSender<(PeerId, SignalingEnvelope)>;

struct Peer {
    handle: SessionHandle,
    notices: mpsc::UnboundedReceiver<PeerNotice>,
}

impl Peer {
    async fn wait_for(&mut self, mut pred: impl FnMut(&PeerNotice) -> bool) -> PeerNotice {
        timeout(WAIT, async {
            loop {
                let notice = self.notices.recv().await.unwrap();
                if pred(&notice) {
                    return notice;
                }
            }
        })
        .await
        .unwrap()
    }
}

/// Start one session per id, all wired through an in-process relay task.
fn start(ids: &[&str]) -> HashMap<String, Peer> {
    let network = LoopbackNetwork::new();
    let config = ManagerConfig {
        candidate_batch_delay: Duration::from_millis(10),
        ..ManagerConfig::default()
    };

    let mut inboxes: HashMap<PeerId, Inbox> = HashMap::new();
    let mut outbound = Vec::new();
    let mut peers = HashMap::new();

    for id in ids {
        let (backend, events) = network.backend(*id);
        let (signaling, signals_out) = ChannelSignaling::new();
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let manager =
            PeerConnectionManager::new(SystemEnv::new(), backend, signaling, PeerId::from(*id), config);
        let (session, handle, notices) = Session::new(manager, signals, events);
        tokio::spawn(session.run());

        inboxes.insert(PeerId::from(*id), signals_tx);
        outbound.push((PeerId::from(*id), signals_out));
        peers.insert((*id).to_string(), Peer { handle, notices });
    }

    for (sender, mut rx) in outbound {
        let inboxes = inboxes.clone();
        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let Ok(decoded) = ChannelSignaling::decode_inbound(sender.clone(), &signal.text)
                else {
                    continue;
                };
                if let Some(inbox) = inboxes.get(&signal.target) {
                    let _ = inbox.send(decoded);
                }
            }
        });
    }

    peers
}

fn channel_open(peer: &str) -> impl FnMut(&PeerNotice) -> bool + '_ {
    move |notice| {
        matches!(
            notice,
            PeerNotice::DataChannelChanged { peer_id, state: DataChannelState::Open }
                if peer_id.as_str() == peer
        )
    }
}

#[tokio::test]
async fn connect_opens_channel_and_delivers_messages() {
    let mut peers = start(&["alice", "bob"]);
    let mut bob = peers.remove("bob").unwrap();
    let mut alice = peers.remove("alice").unwrap();

    alice.handle.connect("bob").await.unwrap();
    alice.wait_for(channel_open("bob")).await;
    bob.wait_for(channel_open("alice")).await;

    alice.handle.send("bob", "hello bob").await.unwrap();
    let notice = bob.wait_for(|n| matches!(n, PeerNotice::Message { .. })).await;

    assert_eq!(
        notice,
        PeerNotice::Message { peer_id: PeerId::from("alice"), payload: "hello bob".into() }
    );
}

#[tokio::test]
async fn send_before_connect_reports_missing_peer() {
    let mut peers = start(&["alice"]);
    let alice = peers.remove("alice").unwrap();

    let result = alice.handle.send("carol", "anyone?").await;
    assert_eq!(result, Err(SessionError::Send(SendError::NoSuchPeer(PeerId::from("carol")))));
}

#[tokio::test]
async fn disconnect_reaches_remote_side() {
    let mut peers = start(&["alice", "bob"]);
    let mut bob = peers.remove("bob").unwrap();
    let mut alice = peers.remove("alice").unwrap();

    alice.handle.connect("bob").await.unwrap();
    alice.wait_for(channel_open("bob")).await;
    bob.wait_for(channel_open("alice")).await;

    assert!(alice.handle.disconnect("bob").await.unwrap());
    assert!(!alice.handle.disconnect("bob").await.unwrap());

    bob.wait_for(|n| matches!(n, PeerNotice::Removed { .. })).await;
}

#[tokio::test]
async fn shutdown_closes_peers_and_stops_loop() {
    let mut peers = start(&["alice", "bob"]);
    let mut bob = peers.remove("bob").unwrap();
    let mut alice = peers.remove("alice").unwrap();

    alice.handle.connect("bob").await.unwrap();
    bob.wait_for(channel_open("alice")).await;

    alice.handle.shutdown().await.unwrap();

    alice
        .wait_for(|n| {
            matches!(n, PeerNotice::StateChanged { state: ConnectionState::Closed, .. })
        })
        .await;
    bob.wait_for(|n| matches!(n, PeerNotice::Removed { .. })).await;
    assert_eq!(alice.handle.connect("bob").await, Err(SessionError::Closed));
}

#[tokio::test]
async fn screen_share_round_trip() {
    let mut peers = start(&["alice", "bob"]);
    let mut alice = peers.remove("alice").unwrap();
    let mut bob = peers.remove("bob").unwrap();

    alice.handle.connect("bob").await.unwrap();
    alice.wait_for(channel_open("bob")).await;
    bob.wait_for(channel_open("alice")).await;

    alice.handle.start_screen_share("bob").await.unwrap();
    assert!(matches!(
        alice.handle.start_screen_share("bob").await,
        Err(SessionError::Peer(_))
    ));
    alice.handle.stop_screen_share("bob").await.unwrap();
    assert!(matches!(alice.handle.stop_screen_share("bob").await, Err(SessionError::Peer(_))));
}
