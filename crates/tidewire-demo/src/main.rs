//! Tidewire demo binary.
//!
//! Runs two peers in one process over the loopback network: `alice` connects
//! to `bob`, both derive the room key from a shared secret, and alice sends
//! encrypted messages that bob decrypts through his worker pool.
//!
//! The native transport is `tidewire-harness`'s [`LoopbackNetwork`], linked
//! as a regular dependency: the demo needs no UDP networking or media
//! devices. Everything else (manager, session, scheduler, crypto) is the
//! production code path.
//!
//! # Usage
//!
//! ```bash
//! tidewire-demo --messages 5 --secret "correct horse"
//! RUST_LOG=tidewire_core=debug tidewire-demo
//! ```

mod relay;

use std::{sync::Arc, time::Duration};

use clap::Parser;
use tidewire_client::{DEFAULT_CACHE_CAPACITY, SecureInbox, Session, SessionHandle};
use tidewire_core::{
    DataChannelState, ManagerConfig, PeerConnectionManager, PeerId, PeerNotice, SystemEnv,
};
use tidewire_crypto::XChaChaProvider;
use tidewire_harness::LoopbackNetwork;
use tidewire_scheduler::{CryptoTaskScheduler, SchedulerConfig};
use tokio::{sync::mpsc, time::timeout};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::relay::Relay;

/// Key derivation context for the demo room.
const ROOM_INFO: &[u8] = b"tidewire demo room";

/// Two-peer encrypted chat over simulated transports
#[derive(Parser, Debug)]
#[command(name = "tidewire-demo")]
#[command(about = "Two Tidewire peers exchanging encrypted messages in-process")]
#[command(version)]
struct Args {
    /// Number of messages alice sends
    #[arg(short, long, default_value = "3")]
    messages: usize,

    /// Shared secret both peers derive the room key from
    #[arg(short, long, default_value = "tidewire demo secret")]
    secret: String,

    /// Crypto worker threads (defaults to available parallelism, max 4)
    #[arg(long)]
    workers: Option<usize>,

    /// Candidate batch delay in milliseconds
    #[arg(long, default_value = "100")]
    batch_delay_ms: u64,

    /// Seconds to wait for each step
    #[arg(long, default_value = "10")]
    step_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct Peer {
    id: PeerId,
    handle: SessionHandle,
    notices: mpsc::UnboundedReceiver<PeerNotice>,
    inbox: SecureInbox,
}

impl Peer {
    /// Wait for the first notice matching `pred`, returning it.
    async fn wait_for(
        &mut self,
        step: Duration,
        mut pred: impl FnMut(&PeerNotice) -> bool,
    ) -> Result<PeerNotice, Box<dyn std::error::Error>> {
        let notices = &mut self.notices;
        let found = timeout(step, async {
            while let Some(notice) = notices.recv().await {
                if pred(&notice) {
                    return Some(notice);
                }
            }
            None
        })
        .await?;
        found.ok_or_else(|| format!("{} session closed", self.id).into())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let step = Duration::from_secs(args.step_timeout);
    let mut scheduler_config = SchedulerConfig::default();
    if let Some(workers) = args.workers {
        scheduler_config.workers = workers;
    }
    let scheduler = Arc::new(CryptoTaskScheduler::new(scheduler_config, XChaChaProvider::new())?);

    let manager_config = ManagerConfig {
        candidate_batch_delay: Duration::from_millis(args.batch_delay_ms),
        ..ManagerConfig::default()
    };

    let network = LoopbackNetwork::new();
    let mut relay = Relay::default();
    let mut peers = Vec::new();
    for name in ["alice", "bob"] {
        let id = PeerId::from(name);
        let (backend, events) = network.backend(id.clone());
        let (signaling, signals) = relay.register(&id);
        let manager = PeerConnectionManager::new(
            SystemEnv::new(),
            backend,
            signaling,
            id.clone(),
            manager_config,
        );
        let (session, handle, notices) = Session::new(manager, signals, events);
        tokio::spawn(session.run());

        let mut inbox = SecureInbox::new(Arc::clone(&scheduler), DEFAULT_CACHE_CAPACITY);
        let key = inbox.derive_key(args.secret.as_bytes(), &[], ROOM_INFO).await?;
        inbox.set_key(key);
        inbox.set_context("demo-room");

        peers.push(Peer { id, handle, notices, inbox });
    }
    let relay_tasks = relay.spawn();

    let (mut alice, mut bob) = match <[Peer; 2]>::try_from(peers) {
        Ok([alice, bob]) => (alice, bob),
        Err(_) => return Err("expected two peers".into()),
    };

    tracing::info!("alice connecting to bob");
    alice.handle.connect(bob.id.clone()).await?;

    let bob_id = bob.id.clone();
    alice.wait_for(step, |n| channel_open(n, &bob_id)).await?;
    let alice_id = alice.id.clone();
    bob.wait_for(step, |n| channel_open(n, &alice_id)).await?;
    tracing::info!("data channel open on both sides");

    for n in 1..=args.messages {
        let ciphertext = alice.inbox.encrypt(&format!("message {n} from alice")).await?;
        tracing::debug!(len = ciphertext.len(), "alice sending ciphertext");
        alice.handle.send(bob.id.clone(), ciphertext).await?;
    }

    let mut received = Vec::with_capacity(args.messages);
    while received.len() < args.messages {
        let notice = bob.wait_for(step, |n| matches!(n, PeerNotice::Message { .. })).await?;
        if let PeerNotice::Message { payload, .. } = notice {
            received.push(payload);
        }
    }

    let plaintexts = bob.inbox.decrypt_all(&received).await?;
    for plaintext in &plaintexts {
        tracing::info!(from = %alice.id, %plaintext, "bob decrypted");
    }

    // Replaying the same ciphertexts is served from bob's cache
    bob.inbox.decrypt_all(&received).await?;
    tracing::info!(cached = bob.inbox.cache().len(), "decryption cache");

    let status = scheduler.status().await?;
    tracing::info!(
        workers = status.workers,
        active = status.active,
        queued = status.queued,
        "scheduler idle"
    );

    alice.handle.shutdown().await?;
    bob.handle.shutdown().await?;
    scheduler.destroy();
    for task in relay_tasks {
        task.abort();
    }

    tracing::info!("demo finished");
    Ok(())
}

fn channel_open(notice: &PeerNotice, peer: &PeerId) -> bool {
    matches!(
        notice,
        PeerNotice::DataChannelChanged { peer_id, state: DataChannelState::Open } if peer_id == peer
    )
}
