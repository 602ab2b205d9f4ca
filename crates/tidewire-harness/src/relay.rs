//! Signaling doubles.
//!
//! [`MemoryRelay`] is a hub that routes JSON text between registered peers,
//! exercising the real envelope codec on every hop. Delivery is manual: tests
//! take a peer's inbox and decide when (and in which order) to hand envelopes
//! to the manager, which is how reordering is simulated.
//!
//! [`RecordingSignaling`] records envelopes without routing them anywhere.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use parking_lot::Mutex;
use tidewire_core::{PeerId, SignalingChannel, SignalingEnvelope, SignalingError};

#[derive(Debug, Default)]
struct RelayState {
    inboxes: HashMap<PeerId, VecDeque<(PeerId, String)>>,
    routed: usize,
}

/// In-memory relay addressing peers by id.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer_id` and return its outbound half.
    pub fn endpoint(&self, peer_id: impl Into<PeerId>) -> RelayEndpoint {
        let peer_id = peer_id.into();
        self.state.lock().inboxes.entry(peer_id.clone()).or_default();
        RelayEndpoint { local_id: peer_id, relay: self.clone() }
    }

    /// Drain every envelope queued for `peer_id` as `(relay sender, envelope)`.
    ///
    /// Frames that fail to decode are dropped with a warning, as a real relay
    /// client would.
    pub fn take_inbox(&self, peer_id: &PeerId) -> Vec<(PeerId, SignalingEnvelope)> {
        let frames: Vec<(PeerId, String)> = self
            .state
            .lock()
            .inboxes
            .get_mut(peer_id)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default();

        frames
            .into_iter()
            .filter_map(|(sender, text)| match SignalingEnvelope::from_json(&text) {
                Ok(envelope) => Some((sender, envelope)),
                Err(err) => {
                    tracing::warn!(peer = %peer_id, error = %err, "undecodable relay frame");
                    None
                },
            })
            .collect()
    }

    /// Queue a raw text frame for `target`, as if `sender` had sent it.
    pub fn inject_raw(&self, sender: impl Into<PeerId>, target: &PeerId, text: impl Into<String>) {
        self.state
            .lock()
            .inboxes
            .entry(target.clone())
            .or_default()
            .push_back((sender.into(), text.into()));
    }

    /// Envelopes waiting across all inboxes.
    pub fn pending(&self) -> usize {
        self.state.lock().inboxes.values().map(VecDeque::len).sum()
    }

    /// Envelopes routed since creation.
    pub fn routed(&self) -> usize {
        self.state.lock().routed
    }
}

/// Outbound half of one peer's relay connection.
#[derive(Debug, Clone)]
pub struct RelayEndpoint {
    local_id: PeerId,
    relay: MemoryRelay,
}

impl RelayEndpoint {
    /// Peer this endpoint sends as.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }
}

impl SignalingChannel for RelayEndpoint {
    fn send(&self, target: &PeerId, envelope: SignalingEnvelope) -> Result<(), SignalingError> {
        let text = envelope.to_json()?;
        let mut state = self.relay.state.lock();

        let inbox =
            state.inboxes.get_mut(target).ok_or_else(|| SignalingError::Unreachable(target.clone()))?;
        inbox.push_back((self.local_id.clone(), text));
        state.routed += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Recording {
    sent: Vec<(PeerId, SignalingEnvelope)>,
    failure: Option<SignalingError>,
}

/// [`SignalingChannel`] that records every envelope.
#[derive(Debug, Clone, Default)]
pub struct RecordingSignaling {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingSignaling {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything sent so far.
    pub fn take(&self) -> Vec<(PeerId, SignalingEnvelope)> {
        std::mem::take(&mut self.inner.lock().sent)
    }

    /// Snapshot of everything sent so far.
    pub fn sent(&self) -> Vec<(PeerId, SignalingEnvelope)> {
        self.inner.lock().sent.clone()
    }

    /// Make subsequent sends fail with `error` (`None` restores delivery).
    pub fn fail_with(&self, error: Option<SignalingError>) {
        self.inner.lock().failure = error;
    }
}

impl SignalingChannel for RecordingSignaling {
    fn send(&self, target: &PeerId, envelope: SignalingEnvelope) -> Result<(), SignalingError> {
        let mut inner = self.inner.lock();
        if let Some(err) = &inner.failure {
            return Err(err.clone());
        }
        inner.sent.push((target.clone(), envelope));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tidewire_core::SessionDescription;

    use super::*;

    fn offer(sender: &str, target: &str) -> SignalingEnvelope {
        SignalingEnvelope::Offer {
            sender: PeerId::from(sender),
            target: PeerId::from(target),
            payload: SessionDescription::offer("v=0"),
        }
    }

    #[test]
    fn relay_routes_by_target() {
        let relay = MemoryRelay::new();
        let alice = relay.endpoint("alice");
        let _bob = relay.endpoint("bob");

        alice.send(&PeerId::from("bob"), offer("alice", "bob")).unwrap();

        assert_eq!(relay.pending(), 1);
        let inbox = relay.take_inbox(&PeerId::from("bob"));
        assert_eq!(inbox, vec![(PeerId::from("alice"), offer("alice", "bob"))]);
        assert_eq!(relay.pending(), 0);
        assert_eq!(relay.routed(), 1);
    }

    #[test]
    fn unknown_target_is_unreachable() {
        let relay = MemoryRelay::new();
        let alice = relay.endpoint("alice");

        let result = alice.send(&PeerId::from("carol"), offer("alice", "carol"));
        assert_eq!(result, Err(SignalingError::Unreachable(PeerId::from("carol"))));
    }

    #[test]
    fn garbage_frames_are_dropped() {
        let relay = MemoryRelay::new();
        let bob = PeerId::from("bob");
        relay.inject_raw("mallory", &bob, "{not json");

        assert!(relay.take_inbox(&bob).is_empty());
    }

    #[test]
    fn recorder_can_fail() {
        let recorder = RecordingSignaling::new();
        recorder.fail_with(Some(SignalingError::Closed));
        assert!(recorder.send(&PeerId::from("bob"), offer("alice", "bob")).is_err());

        recorder.fail_with(None);
        recorder.send(&PeerId::from("bob"), offer("alice", "bob")).unwrap();
        assert_eq!(recorder.take().len(), 1);
        assert!(recorder.sent().is_empty());
    }
}
