//! ICE candidate batching.
//!
//! Candidate discovery fires in bursts. Instead of one signaling message per
//! candidate, each peer gets a debounce record: new candidates append to the
//! record's pending list and push its flush deadline out by the batch delay.
//! When the deadline passes, the whole list leaves as one `CANDIDATE_BATCH`.
//!
//! Sans-IO: the batcher never owns a timer. The driver asks for
//! [`IceCandidateBatcher::next_deadline`], sleeps until then, and calls
//! [`IceCandidateBatcher::poll_flush`] with the current instant.

use std::{collections::BTreeMap, time::Duration};

use crate::{
    env::Timestamp,
    signaling::{IceCandidate, PeerId},
};

/// Quiet period after the last candidate before a batch is flushed.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(100);

/// Batch of candidates ready to be sent to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateBatch {
    /// Remote peer the candidates are for
    pub peer_id: PeerId,
    /// Candidates in discovery order
    pub candidates: Vec<IceCandidate>,
}

/// Pending list plus scheduled flush for one peer.
#[derive(Debug)]
struct DebounceRecord<I> {
    pending: Vec<IceCandidate>,
    flush_at: Option<I>,
}

/// Coalesces local candidates into one message per peer per idle window.
///
/// # Invariants
///
/// - Candidates for a peer are flushed in the order they were added
/// - A candidate is either flushed exactly once or discarded by
///   [`cancel`](Self::cancel); never both, never neither
/// - A cancelled peer has no deadline left, so no flush fires after teardown
#[derive(Debug)]
pub struct IceCandidateBatcher<I> {
    delay: Duration,
    records: BTreeMap<PeerId, DebounceRecord<I>>,
}

impl<I: Timestamp> IceCandidateBatcher<I> {
    /// Create a batcher with the given debounce delay.
    pub fn new(delay: Duration) -> Self {
        Self { delay, records: BTreeMap::new() }
    }

    /// Debounce delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Append a candidate and restart the peer's debounce window.
    ///
    /// Returns the new flush deadline for the peer.
    pub fn add_candidate(&mut self, peer_id: &PeerId, candidate: IceCandidate, now: I) -> I {
        let record = self
            .records
            .entry(peer_id.clone())
            .or_insert_with(|| DebounceRecord { pending: Vec::new(), flush_at: None });

        record.pending.push(candidate);

        let flush_at = now + self.delay;
        record.flush_at = Some(flush_at);
        flush_at
    }

    /// Take every batch whose deadline is at or before `now`.
    ///
    /// Each flushed record is removed as a whole, clearing its pending list
    /// and its deadline together. Batches are returned in peer id order.
    pub fn poll_flush(&mut self, now: I) -> Vec<CandidateBatch> {
        let due: Vec<PeerId> = self
            .records
            .iter()
            .filter(|(_, record)| record.flush_at.is_some_and(|at| at <= now))
            .map(|(peer_id, _)| peer_id.clone())
            .collect();

        let mut batches = Vec::with_capacity(due.len());
        for peer_id in due {
            let Some(record) = self.records.remove(&peer_id) else {
                continue;
            };

            if !record.pending.is_empty() {
                batches.push(CandidateBatch { peer_id, candidates: record.pending });
            }
        }

        batches
    }

    /// Drop the peer's pending batch and its scheduled flush.
    ///
    /// Returns the number of discarded candidates.
    pub fn cancel(&mut self, peer_id: &PeerId) -> usize {
        self.records.remove(peer_id).map_or(0, |record| record.pending.len())
    }

    /// Earliest scheduled flush across all peers.
    pub fn next_deadline(&self) -> Option<I> {
        self.records.values().filter_map(|record| record.flush_at).min()
    }

    /// Candidates waiting for the given peer.
    pub fn pending(&self, peer_id: &PeerId) -> &[IceCandidate] {
        self.records.get(peer_id).map_or(&[], |record| record.pending.as_slice())
    }

    /// Number of peers with a scheduled flush.
    pub fn scheduled_peers(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use proptest::prelude::*;

    use super::*;

    fn candidate(n: usize) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n}"))
    }

    #[test]
    fn burst_flushes_as_one_batch_in_order() {
        let t0 = Instant::now();
        let peer = PeerId::from("bob");
        let mut batcher = IceCandidateBatcher::new(DEFAULT_BATCH_DELAY);

        batcher.add_candidate(&peer, candidate(1), t0);
        batcher.add_candidate(&peer, candidate(2), t0 + Duration::from_millis(30));
        batcher.add_candidate(&peer, candidate(3), t0 + Duration::from_millis(60));

        // Window restarted by the third candidate
        assert!(batcher.poll_flush(t0 + Duration::from_millis(120)).is_empty());

        let batches = batcher.poll_flush(t0 + Duration::from_millis(160));
        assert_eq!(batches, vec![CandidateBatch {
            peer_id: peer.clone(),
            candidates: vec![candidate(1), candidate(2), candidate(3)],
        }]);

        assert!(batcher.pending(&peer).is_empty());
        assert_eq!(batcher.next_deadline(), None);
    }

    #[test]
    fn peers_are_batched_independently() {
        let t0 = Instant::now();
        let bob = PeerId::from("bob");
        let carol = PeerId::from("carol");
        let mut batcher = IceCandidateBatcher::new(DEFAULT_BATCH_DELAY);

        batcher.add_candidate(&bob, candidate(1), t0);
        batcher.add_candidate(&carol, candidate(2), t0 + Duration::from_millis(80));

        let first = batcher.poll_flush(t0 + Duration::from_millis(100));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].peer_id, bob);

        assert_eq!(batcher.next_deadline(), Some(t0 + Duration::from_millis(180)));
        let second = batcher.poll_flush(t0 + Duration::from_millis(180));
        assert_eq!(second[0].peer_id, carol);
    }

    #[test]
    fn cancel_discards_pending_and_deadline() {
        let t0 = Instant::now();
        let peer = PeerId::from("bob");
        let mut batcher = IceCandidateBatcher::new(DEFAULT_BATCH_DELAY);

        batcher.add_candidate(&peer, candidate(1), t0);
        batcher.add_candidate(&peer, candidate(2), t0);

        assert_eq!(batcher.cancel(&peer), 2);
        assert_eq!(batcher.next_deadline(), None);
        assert!(batcher.poll_flush(t0 + Duration::from_secs(10)).is_empty());
        assert_eq!(batcher.cancel(&peer), 0);
    }

    proptest! {
        #[test]
        fn prop_every_candidate_flushed_once_in_order(
            gaps in prop::collection::vec(0u64..250, 1..40),
        ) {
            let t0 = Instant::now();
            let peer = PeerId::from("bob");
            let mut batcher = IceCandidateBatcher::new(DEFAULT_BATCH_DELAY);
            let mut flushed = Vec::new();
            let mut now = t0;

            for (n, gap) in gaps.iter().enumerate() {
                now += Duration::from_millis(*gap);
                for batch in batcher.poll_flush(now) {
                    flushed.extend(batch.candidates);
                }
                batcher.add_candidate(&peer, candidate(n), now);
            }

            for batch in batcher.poll_flush(now + DEFAULT_BATCH_DELAY) {
                flushed.extend(batch.candidates);
            }

            let expected: Vec<_> = (0..gaps.len()).map(candidate).collect();
            prop_assert_eq!(flushed, expected);
            prop_assert_eq!(batcher.scheduled_peers(), 0);
        }
    }
}
