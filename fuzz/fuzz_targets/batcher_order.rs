//! Fuzz target for the ICE candidate batcher
//!
//! # Invariants
//!
//! - Every added candidate is flushed exactly once, unless cancelled
//! - Per peer, flushed candidates keep discovery order
//! - Nothing flushes before its quiet period has elapsed

#![no_main]

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tidewire_core::{IceCandidate, IceCandidateBatcher, PeerId};

const DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Arbitrary)]
enum Op {
    Add { peer: u8 },
    Advance(u8),
    Poll,
    Cancel { peer: u8 },
}

fuzz_target!(|ops: Vec<Op>| {
    let mut batcher = IceCandidateBatcher::new(DELAY);
    let mut now = Instant::now();
    let mut next_seq = 0u64;
    let mut pending: HashMap<PeerId, Vec<String>> = HashMap::new();
    let mut last_add: HashMap<PeerId, Instant> = HashMap::new();

    for op in ops {
        match op {
            Op::Add { peer } => {
                let peer = PeerId::from(format!("p{}", peer % 4));
                let candidate = format!("candidate:{next_seq}");
                next_seq += 1;
                batcher.add_candidate(&peer, IceCandidate::new(candidate.clone()), now);
                pending.entry(peer.clone()).or_default().push(candidate);
                last_add.insert(peer, now);
            },
            Op::Advance(ms) => now += Duration::from_millis(u64::from(ms)),
            Op::Poll => {
                for batch in batcher.poll_flush(now) {
                    let expected = pending.remove(&batch.peer_id).unwrap_or_default();
                    let flushed: Vec<String> =
                        batch.candidates.into_iter().map(|c| c.candidate).collect();
                    assert_eq!(flushed, expected);
                    let added = last_add[&batch.peer_id];
                    assert!(now - added >= DELAY);
                }
            },
            Op::Cancel { peer } => {
                let peer = PeerId::from(format!("p{}", peer % 4));
                let dropped = batcher.cancel(&peer);
                assert_eq!(dropped, pending.remove(&peer).map_or(0, |p| p.len()));
            },
        }
    }
});
