//! Multi-peer simulation over the loopback network and memory relay.
//!
//! Every node is a real [`PeerConnectionManager`] wired to a
//! [`LoopbackBackend`] and a [`RelayEndpoint`]; all nodes share one
//! [`SimEnv`]. The cluster plays the role of each node's event loop: it routes
//! relay inboxes into `handle_signal`, native events into `handle_event`, and
//! advances the shared clock to flush candidate batches.
//!
//! Each routing pass visits the nodes in an order drawn from the seeded RNG,
//! so the seed selects the interleaving. Envelopes for one node keep their
//! arrival order.

use std::time::Duration;

use rand::{SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;
use tidewire_core::{
    EnvelopeKind, Environment, ManagerConfig, PeerConnectionManager, PeerError, PeerEvent, PeerId,
    PeerNotice,
};
use tokio::sync::mpsc;

use crate::{LoopbackBackend, LoopbackNetwork, MemoryRelay, RelayEndpoint, SimEnv};

/// Manager type every cluster node runs.
pub type SimManager = PeerConnectionManager<SimEnv, LoopbackBackend, RelayEndpoint>;

/// Upper bound on routing rounds in [`SimCluster::settle`].
const MAX_SETTLE_ROUNDS: usize = 1000;

/// One simulated peer.
pub struct SimNode {
    /// Manager under test
    pub manager: SimManager,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    notices: Vec<PeerNotice>,
}

impl SimNode {
    /// Local peer id.
    pub fn id(&self) -> &PeerId {
        self.manager.local_id()
    }

    /// Notices collected from the manager since the last call.
    pub fn take_notices(&mut self) -> Vec<PeerNotice> {
        self.collect_notices();
        std::mem::take(&mut self.notices)
    }

    /// Messages received on data channels, as `(peer, payload)`.
    pub fn take_messages(&mut self) -> Vec<(PeerId, String)> {
        self.collect_notices();

        let mut messages = Vec::new();
        self.notices.retain(|notice| match notice {
            PeerNotice::Message { peer_id, payload } => {
                messages.push((peer_id.clone(), payload.clone()));
                false
            },
            _ => true,
        });
        messages
    }

    fn collect_notices(&mut self) {
        let fresh = self.manager.take_notices();
        self.notices.extend(fresh);
    }
}

/// Signaling failure observed while routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalFailure {
    /// Node that rejected the envelope
    pub node: PeerId,
    /// Relay-reported sender
    pub sender: PeerId,
    /// Rejection
    pub error: PeerError,
}

/// One envelope handed to a node, in routing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Node the envelope was routed to
    pub node: PeerId,
    /// Relay-reported sender
    pub sender: PeerId,
    /// Envelope type
    pub kind: EnvelopeKind,
}

/// Deterministic cluster of peers.
pub struct SimCluster {
    env: SimEnv,
    network: LoopbackNetwork,
    relay: MemoryRelay,
    nodes: Vec<SimNode>,
    failures: Vec<SignalFailure>,
    deliveries: Vec<Delivery>,
}

impl SimCluster {
    /// Build a cluster with one node per id and the default manager config.
    pub fn new(seed: u64, ids: &[&str]) -> Self {
        Self::with_config(seed, ids, &ManagerConfig::default())
    }

    /// Build a cluster with one node per id.
    pub fn with_config(seed: u64, ids: &[&str], config: &ManagerConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        let network = LoopbackNetwork::new();
        let relay = MemoryRelay::new();

        let nodes = ids
            .iter()
            .map(|id| {
                let peer_id = PeerId::from(*id);
                let (backend, events) = network.backend(peer_id.clone());
                let signaling = relay.endpoint(peer_id.clone());
                let manager =
                    PeerConnectionManager::new(env.clone(), backend, signaling, peer_id, *config);
                SimNode { manager, events, notices: Vec::new() }
            })
            .collect();

        Self { env, network, relay, nodes, failures: Vec::new(), deliveries: Vec::new() }
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Shared loopback network.
    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }

    /// Shared relay.
    pub fn relay(&self) -> &MemoryRelay {
        &self.relay
    }

    /// Node by id.
    pub fn node(&self, id: &str) -> Option<&SimNode> {
        self.nodes.iter().find(|node| node.id().as_str() == id)
    }

    /// Mutable node by id.
    pub fn node_mut(&mut self, id: &str) -> Option<&mut SimNode> {
        self.nodes.iter_mut().find(|node| node.id().as_str() == id)
    }

    /// Signaling failures observed so far (drained).
    pub fn take_failures(&mut self) -> Vec<SignalFailure> {
        std::mem::take(&mut self.failures)
    }

    /// Every envelope routed so far, in routing order.
    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    /// Hand every queued envelope to its target.
    ///
    /// Nodes are visited in seeded order; each inbox is drained in arrival
    /// order. Returns the number of envelopes delivered.
    pub async fn deliver_signals(&mut self) -> usize {
        let mut delivered = 0;
        for index in self.routing_order() {
            let node = &mut self.nodes[index];
            let inbox = self.relay.take_inbox(node.id());
            for (sender, envelope) in inbox {
                delivered += 1;
                self.deliveries.push(Delivery {
                    node: node.id().clone(),
                    sender: sender.clone(),
                    kind: envelope.kind(),
                });
                if let Err(error) = node.manager.handle_signal(&sender, envelope).await {
                    self.failures.push(SignalFailure { node: node.id().clone(), sender, error });
                }
            }
        }
        delivered
    }

    /// Hand every queued native event to its manager, visiting nodes in
    /// seeded order.
    ///
    /// Returns the number of events processed.
    pub async fn drain_events(&mut self) -> usize {
        let mut processed = 0;
        for index in self.routing_order() {
            let node = &mut self.nodes[index];
            while let Ok(event) = node.events.try_recv() {
                processed += 1;
                node.manager.handle_event(event).await;
            }
        }
        processed
    }

    /// Advance the shared clock and tick every node.
    pub async fn advance(&mut self, duration: Duration) {
        self.env.advance(duration);
        let now = self.env.now();
        for node in &mut self.nodes {
            node.manager.tick(now).await;
        }
    }

    /// Route signals and events until nothing is in flight.
    ///
    /// While local candidates are waiting, the clock moves forward by one
    /// batch delay so batches flush. Negotiation timeouts are never reached
    /// by settling alone.
    pub async fn settle(&mut self) {
        for _ in 0..MAX_SETTLE_ROUNDS {
            let progressed = self.deliver_signals().await + self.drain_events().await;
            if progressed > 0 {
                continue;
            }

            let Some(delay) = self.pending_batch_delay() else {
                return;
            };
            self.advance(delay).await;
        }

        tracing::warn!(rounds = MAX_SETTLE_ROUNDS, "cluster did not settle");
    }

    fn routing_order(&self) -> Vec<usize> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.env.random_u64());
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.shuffle(&mut rng);
        order
    }

    fn pending_batch_delay(&self) -> Option<Duration> {
        self.nodes
            .iter()
            .filter(|node| {
                node.manager
                    .peer_ids()
                    .iter()
                    .any(|peer| !node.manager.pending_local_candidates(peer).is_empty())
            })
            .map(|node| node.manager.config().candidate_batch_delay)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use tidewire_core::{ConnectionState, DataChannelState};

    use super::*;

    #[tokio::test]
    async fn two_nodes_connect() {
        let mut cluster = SimCluster::new(1, &["alice", "bob"]);
        let bob = PeerId::from("bob");

        cluster.node_mut("alice").unwrap().manager.connect(&bob).await.unwrap();
        cluster.settle().await;

        let alice = cluster.node("alice").unwrap();
        assert_eq!(alice.manager.peer_state(&bob), Some(ConnectionState::Connected));
        assert_eq!(alice.manager.data_channel_state(&bob), Some(DataChannelState::Open));
        assert!(cluster.take_failures().is_empty());
    }

    async fn full_mesh(seed: u64) -> SimCluster {
        let ids = ["ana", "bo", "cy", "dee"];
        let mut cluster = SimCluster::new(seed, &ids);
        for (i, from) in ids.iter().enumerate() {
            for to in &ids[i + 1..] {
                let node = cluster.node_mut(from).unwrap();
                node.manager.connect(&PeerId::from(*to)).await.unwrap();
            }
        }
        cluster.settle().await;
        cluster
    }

    #[tokio::test]
    async fn seed_selects_routing_order() {
        let first = full_mesh(3).await;
        let again = full_mesh(3).await;
        assert_eq!(first.deliveries(), again.deliveries());

        let mut orders = vec![first.deliveries().to_vec()];
        for seed in 4..16 {
            let cluster = full_mesh(seed).await;
            orders.push(cluster.deliveries().to_vec());
        }
        orders.dedup();
        assert!(orders.len() > 1, "routing order ignores the seed");
    }
}
