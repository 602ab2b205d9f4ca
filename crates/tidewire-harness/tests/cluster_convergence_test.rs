//! Mesh convergence tests using deterministic simulation.
//!
//! Random connect orders, with routing interleaved at random points and node
//! order chosen by the cluster seed, must always converge on one live
//! connection per pair with an open data channel on both ends. Simultaneous
//! connects may be rejected as glare, nothing else may fail.

use proptest::prelude::*;
use tidewire_core::{ConnectionState, DataChannelState, DataPayload, PeerError, PeerId};
use tidewire_harness::SimCluster;

const IDS: [&str; 4] = ["ana", "bo", "cy", "dee"];

#[derive(Debug, Clone)]
enum Step {
    Connect { from: usize, to: usize },
    DeliverSignals,
    DrainEvents,
    Settle,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0..IDS.len(), 0..IDS.len()).prop_map(|(from, to)| Step::Connect { from, to }),
        2 => Just(Step::DeliverSignals),
        2 => Just(Step::DrainEvents),
        1 => Just(Step::Settle),
    ]
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
        .block_on(future)
}

/// Pairs that some node asked to connect, as `(low, high)` indices.
fn requested_pairs(steps: &[Step]) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(usize, usize)> = steps
        .iter()
        .filter_map(|step| match step {
            Step::Connect { from, to } if from != to => Some(((*from).min(*to), (*from).max(*to))),
            _ => None,
        })
        .collect();
    pairs.sort_unstable();
    pairs.dedup();
    pairs
}

async fn run(seed: u64, steps: &[Step]) -> SimCluster {
    let mut cluster = SimCluster::new(seed, &IDS);

    for step in steps {
        match step {
            Step::Connect { from, to } => {
                let target = PeerId::from(IDS[*to]);
                let node = cluster.node_mut(IDS[*from]).expect("node");
                let result = node.manager.connect(&target).await;
                if from == to {
                    assert_eq!(result, Err(PeerError::SelfSignal));
                } else {
                    assert_eq!(result, Ok(()));
                }
            },
            Step::DeliverSignals => {
                cluster.deliver_signals().await;
            },
            Step::DrainEvents => {
                cluster.drain_events().await;
            },
            Step::Settle => cluster.settle().await,
        }
    }

    cluster.settle().await;
    cluster
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every requested pair ends connected on both sides, with exactly one
    /// native connection per live record.
    #[test]
    fn prop_mesh_converges(
        seed in any::<u64>(),
        steps in prop::collection::vec(step_strategy(), 1..40),
    ) {
        let mut cluster = block_on(run(seed, &steps));

        for failure in cluster.take_failures() {
            prop_assert!(
                matches!(failure.error, PeerError::Glare(_)),
                "unexpected failure: {failure:?}"
            );
        }

        let pairs = requested_pairs(&steps);
        for &(low, high) in &pairs {
            for (local, remote) in [(low, high), (high, low)] {
                let node = cluster.node(IDS[local]).expect("node");
                let remote = PeerId::from(IDS[remote]);
                prop_assert_eq!(node.manager.peer_state(&remote), Some(ConnectionState::Connected));
                prop_assert_eq!(
                    node.manager.data_channel_state(&remote),
                    Some(DataChannelState::Open)
                );
            }
        }

        for id in IDS {
            let node = cluster.node(id).expect("node");
            let expected = pairs.iter().filter(|(a, b)| IDS[*a] == id || IDS[*b] == id).count();
            prop_assert_eq!(node.manager.peer_count(), expected);
            prop_assert_eq!(cluster.network().open_connections(node.id()), expected);
        }
    }

    /// After convergence every node can reach every connected peer, and
    /// messages arrive in send order.
    #[test]
    fn prop_messages_reach_every_peer(seed in any::<u64>()) {
        block_on(async {
            let mut cluster = SimCluster::new(seed, &IDS);
            for (i, from) in IDS.iter().enumerate() {
                for to in &IDS[i + 1..] {
                    let node = cluster.node_mut(from).expect("node");
                    node.manager.connect(&PeerId::from(*to)).await.expect("connect");
                }
            }
            cluster.settle().await;

            for from in IDS {
                let node = cluster.node(from).expect("node");
                for to in IDS.iter().filter(|to| **to != from) {
                    for n in 0..3 {
                        let payload = DataPayload::from(format!("{from}->{to}#{n}"));
                        node.manager.send_message(&PeerId::from(*to), &payload).expect("send");
                    }
                }
            }
            cluster.drain_events().await;

            for to in IDS {
                let messages = cluster.node_mut(to).expect("node").take_messages();
                assert_eq!(messages.len(), 3 * (IDS.len() - 1));
                for from in IDS.iter().filter(|from| **from != to) {
                    let received: Vec<&str> = messages
                        .iter()
                        .filter(|(sender, _)| sender.as_str() == *from)
                        .map(|(_, payload)| payload.as_str())
                        .collect();
                    let expected: Vec<String> =
                        (0..3).map(|n| format!("{from}->{to}#{n}")).collect();
                    assert_eq!(received, expected);
                }
            }
        });
    }
}
