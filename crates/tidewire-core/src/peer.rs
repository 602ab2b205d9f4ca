//! Per-peer connection record.
//!
//! # State Machine
//!
//! ```text
//! ┌─────┐  offer/answer  ┌────────────┐  transport up  ┌───────────┐
//! │ New │───────────────>│ Connecting │───────────────>│ Connected │
//! └─────┘                └────────────┘                └───────────┘
//!                          │        │                        │
//!                  timeout │        │ Failed                 │ Disconnected/Failed
//!                          ↓        ↓                        ↓
//!                   ┌────────┐  ┌──────────────┐      ┌────────┐
//!                   │ Failed │  │ Disconnected │─────>│ Closed │
//!                   └────────┘  └──────────────┘      └────────┘
//! ```
//!
//! The data channel has its own sub-state, independent of the transport:
//! `None → Connecting → Open`, collapsed to `Closed` on teardown.

use std::{fmt, time::Duration};

use crate::{
    env::Timestamp,
    signaling::{IceCandidate, PeerId},
};

/// Transport state of one peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Record created, no negotiation yet
    New,
    /// Offer or answer sent, transport not yet established
    Connecting,
    /// Transport established
    Connected,
    /// Transport lost
    Disconnected,
    /// Negotiation or transport failed
    Failed,
    /// Record torn down
    Closed,
}

impl ConnectionState {
    /// Returns true for states in which `connect()` keeps the existing record.
    pub fn is_live(self) -> bool {
        matches!(self, Self::New | Self::Connecting | Self::Connected)
    }

    /// Returns true for states that end the record's lifetime.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Closed, Connected, Connecting, Disconnected, Failed, New};

        match (self, next) {
            (New, Connecting | Failed | Closed) => true,
            (Connecting, Connected | Disconnected | Failed | Closed) => true,
            (Connected, Connecting | Disconnected | Failed | Closed) => true,
            (Disconnected | Failed, Closed) => true,
            (Disconnected, Connected | Failed) => true,
            _ => false,
        }
    }
}

/// Data channel sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataChannelState {
    /// No data channel on this connection (answerer before the remote one arrives)
    None,
    /// Channel created, not yet open
    Connecting,
    /// Channel open; messages can be sent
    Open,
    /// Channel closed
    Closed,
}

/// Identifier, unique per manager, of one native connection object.
///
/// A fresh id is assigned every time a record is (re)built, so native events
/// emitted by a discarded object can be recognized and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id after this one.
    pub(crate) const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection record for one remote peer.
///
/// Owned by [`crate::PeerConnectionManager`]; at most one per [`PeerId`].
/// `C` is the backend's native connection handle, `S` its media stream handle.
#[derive(Debug)]
pub struct PeerConnection<C, S, I> {
    pub(crate) peer_id: PeerId,
    pub(crate) connection_id: ConnectionId,
    pub(crate) native: C,
    pub(crate) state: ConnectionState,
    pub(crate) data_channel_state: DataChannelState,
    pub(crate) is_offerer: bool,
    pub(crate) has_remote_description: bool,
    pub(crate) pending_remote_candidates: Vec<IceCandidate>,
    pub(crate) local_stream: Option<S>,
    pub(crate) negotiation_started: Option<I>,
    pub(crate) offer_sent_at: Option<I>,
}

impl<C, S, I: Timestamp> PeerConnection<C, S, I> {
    pub(crate) fn new(
        peer_id: PeerId,
        connection_id: ConnectionId,
        native: C,
        is_offerer: bool,
    ) -> Self {
        Self {
            peer_id,
            connection_id,
            native,
            state: ConnectionState::New,
            data_channel_state: DataChannelState::None,
            is_offerer,
            has_remote_description: false,
            pending_remote_candidates: Vec::new(),
            local_stream: None,
            negotiation_started: None,
            offer_sent_at: None,
        }
    }

    /// Remote peer id.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Id of the native object backing this record.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Transport state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Data channel state.
    pub fn data_channel_state(&self) -> DataChannelState {
        self.data_channel_state
    }

    /// Whether this side sent the offer of the current negotiation round.
    pub fn is_offerer(&self) -> bool {
        self.is_offerer
    }

    /// Whether a remote description was applied in the current round.
    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    /// Whether an outbound media stream is attached.
    pub fn is_sharing(&self) -> bool {
        self.local_stream.is_some()
    }

    /// Offerer still waiting for the answer of the current round.
    pub(crate) fn awaiting_answer(&self) -> bool {
        self.is_offerer && !self.has_remote_description
    }

    /// Move to `Connecting`, starting the negotiation clock if not running.
    pub(crate) fn begin_negotiation(&mut self, now: I) {
        if self.state == ConnectionState::New {
            self.state = ConnectionState::Connecting;
        }
        if self.state == ConnectionState::Connecting && self.negotiation_started.is_none() {
            self.negotiation_started = Some(now);
        }
    }

    /// Start a new offer/answer round on an established record.
    pub(crate) fn reset_round(&mut self, is_offerer: bool) {
        self.is_offerer = is_offerer;
        self.has_remote_description = false;
        self.offer_sent_at = None;
    }

    /// Local offer of the current round applied at `now`.
    pub(crate) fn offer_sent(&mut self, now: I) {
        self.offer_sent_at = Some(now);
    }

    /// Remote answer applied; the round is complete.
    pub(crate) fn answer_applied(&mut self) {
        self.has_remote_description = true;
        self.offer_sent_at = None;
    }

    /// Local offer rolled back; the previous round's descriptions stand.
    pub(crate) fn abandon_offer(&mut self) {
        self.is_offerer = false;
        self.has_remote_description = true;
        self.offer_sent_at = None;
    }

    /// Instant at which a `Connecting` record gives up.
    pub(crate) fn negotiation_deadline(&self, timeout: Duration) -> Option<I> {
        if self.state != ConnectionState::Connecting {
            return None;
        }
        self.negotiation_started.map(|started| started + timeout)
    }

    /// Whether the record has been `Connecting` for at least `timeout`.
    pub(crate) fn negotiation_expired(&self, now: I, timeout: Duration) -> bool {
        self.negotiation_deadline(timeout).is_some_and(|deadline| deadline <= now)
    }

    /// Instant at which an unanswered renegotiation offer is rolled back.
    ///
    /// Only `Connected` records renegotiate; a `Connecting` record is covered
    /// by [`negotiation_deadline`](Self::negotiation_deadline).
    pub(crate) fn renegotiation_deadline(&self, timeout: Duration) -> Option<I> {
        if self.state != ConnectionState::Connected || !self.awaiting_answer() {
            return None;
        }
        self.offer_sent_at.map(|sent| sent + timeout)
    }

    /// Whether a renegotiation offer has gone unanswered for `timeout`.
    pub(crate) fn renegotiation_expired(&self, now: I, timeout: Duration) -> bool {
        self.renegotiation_deadline(timeout).is_some_and(|deadline| deadline <= now)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn record() -> PeerConnection<(), (), Instant> {
        PeerConnection::new(PeerId::from("bob"), ConnectionId::new(1), (), true)
    }

    #[test]
    fn live_and_terminal_states() {
        assert!(ConnectionState::New.is_live());
        assert!(ConnectionState::Connecting.is_live());
        assert!(ConnectionState::Connected.is_live());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
    }

    #[test]
    fn lifecycle_transitions() {
        use ConnectionState::*;

        assert!(New.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Failed.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Connecting));
        assert!(!New.can_transition_to(Connected));
    }

    #[test]
    fn negotiation_clock_runs_only_while_connecting() {
        let t0 = Instant::now();
        let timeout = Duration::from_secs(30);
        let mut peer = record();

        assert_eq!(peer.negotiation_deadline(timeout), None);

        peer.begin_negotiation(t0);
        assert_eq!(peer.state(), ConnectionState::Connecting);
        assert!(!peer.negotiation_expired(t0 + Duration::from_secs(29), timeout));
        assert!(peer.negotiation_expired(t0 + timeout, timeout));

        peer.state = ConnectionState::Connected;
        assert!(!peer.negotiation_expired(t0 + Duration::from_secs(60), timeout));
    }

    #[test]
    fn renegotiation_clock_runs_only_for_unanswered_offers() {
        let t0 = Instant::now();
        let timeout = Duration::from_secs(30);
        let mut peer = record();
        peer.state = ConnectionState::Connected;
        peer.has_remote_description = true;
        assert_eq!(peer.renegotiation_deadline(timeout), None);

        peer.reset_round(true);
        peer.offer_sent(t0);
        assert_eq!(peer.renegotiation_deadline(timeout), Some(t0 + timeout));
        assert!(peer.renegotiation_expired(t0 + timeout, timeout));

        peer.answer_applied();
        assert_eq!(peer.renegotiation_deadline(timeout), None);

        peer.reset_round(true);
        peer.offer_sent(t0);
        peer.abandon_offer();
        assert!(!peer.awaiting_answer());
        assert!(!peer.is_offerer());
        assert_eq!(peer.renegotiation_deadline(timeout), None);
    }

    #[test]
    fn awaiting_answer_tracks_round() {
        let mut peer = record();
        assert!(peer.awaiting_answer());

        peer.has_remote_description = true;
        assert!(!peer.awaiting_answer());

        peer.reset_round(false);
        assert!(!peer.awaiting_answer());
        assert!(!peer.has_remote_description());
    }
}
