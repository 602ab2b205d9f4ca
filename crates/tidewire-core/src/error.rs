//! Error types for the Tidewire connection core.
//!
//! Strongly-typed errors per layer: peer negotiation errors (protocol
//! anomalies and negotiation failures), data channel send errors, signaling
//! relay errors, and native backend failures.

use thiserror::Error;

use crate::{
    peer::DataChannelState,
    signaling::{EnvelopeKind, PeerId},
};

/// Failure reported by the native connection backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {reason}")]
pub struct BackendError {
    /// Backend operation that failed (e.g. `create_offer`)
    pub operation: &'static str,
    /// Backend-specific description
    pub reason: String,
}

impl BackendError {
    /// Create a backend error for `operation`.
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self { operation, reason: reason.into() }
    }
}

/// Errors from the signaling relay boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// Envelope could not be encoded or decoded
    #[error("signaling codec error: {0}")]
    Codec(String),

    /// Relay has no route to the target peer
    #[error("peer {0} is not reachable through the relay")]
    Unreachable(PeerId),

    /// Relay connection is gone
    #[error("signaling channel closed")]
    Closed,
}

/// Errors that can occur while driving peer negotiation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// Negotiation message for a peer with no connection record
    #[error("no connection for peer {peer}, discarding {kind:?}")]
    UnknownPeer {
        /// Peer the message referenced
        peer: PeerId,
        /// Envelope (or operation) that referenced it
        kind: EnvelopeKind,
    },

    /// Answer received by the side that did not send the offer
    #[error("answer from {0} ignored: not the offerer for this negotiation")]
    NotOfferer(PeerId),

    /// Second answer for a negotiation round that already has one
    #[error("duplicate answer from {0} ignored")]
    DuplicateAnswer(PeerId),

    /// Simultaneous offers; the remote offer lost the tie-break
    #[error("glare with {0}: keeping local offer")]
    Glare(PeerId),

    /// Envelope addressed elsewhere or with a forged sender
    #[error("misaddressed envelope: sender {sender}, target {target}")]
    MisaddressedEnvelope {
        /// Sender named in the envelope
        sender: PeerId,
        /// Target named in the envelope
        target: PeerId,
    },

    /// Attempt to negotiate with ourselves
    #[error("refusing to negotiate with self")]
    SelfSignal,

    /// Session description of the wrong kind for the envelope
    #[error("invalid payload: expected {expected} description")]
    InvalidPayload {
        /// Expected description kind
        expected: &'static str,
    },

    /// Operation on a peer that has no connection record
    #[error("no connection for peer {0}")]
    NoSuchPeer(PeerId),

    /// Screen share already attached to this peer
    #[error("screen share already active for {0}")]
    AlreadySharing(PeerId),

    /// No screen share to stop for this peer
    #[error("no active screen share for {0}")]
    NotSharing(PeerId),

    /// Native backend step failed
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Signaling relay refused the envelope
    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),
}

impl PeerError {
    /// Returns true if this error is a protocol anomaly.
    ///
    /// Anomalies are logged and the triggering message discarded; the manager
    /// and all other peers stay usable. Everything else is a negotiation
    /// failure of one specific step.
    pub fn is_protocol_anomaly(&self) -> bool {
        matches!(
            self,
            Self::UnknownPeer { .. }
                | Self::NotOfferer(_)
                | Self::DuplicateAnswer(_)
                | Self::Glare(_)
                | Self::MisaddressedEnvelope { .. }
                | Self::SelfSignal
                | Self::InvalidPayload { .. }
        )
    }
}

/// Errors from [`crate::PeerConnectionManager::send_message`].
///
/// Failures are reported, never queued; the caller owns retry policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// No connection record for the peer
    #[error("no connection for peer {0}")]
    NoSuchPeer(PeerId),

    /// Data channel exists but is not open
    #[error("data channel to {peer} is {state:?}")]
    ChannelNotOpen {
        /// Target peer
        peer: PeerId,
        /// Current data channel state
        state: DataChannelState,
    },

    /// Structured payload could not be encoded
    #[error("payload encoding failed: {0}")]
    Encode(String),

    /// Native data channel rejected the write
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}
