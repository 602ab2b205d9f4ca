//! Signaling envelopes and the relay boundary.
//!
//! A [`SignalingEnvelope`] is the only structured payload exchanged with the
//! relay. Its JSON shape is fixed for interoperability with browser peers:
//!
//! ```text
//! { "type": "OFFER" | "ANSWER" | "CANDIDATE_BATCH",
//!   "sender": "<peer id>",
//!   "target": "<peer id>",
//!   "payload": <session description | candidate list> }
//! ```
//!
//! Session descriptions serialize as `RTCSessionDescriptionInit`
//! (`{"type":"offer","sdp":"..."}`) and candidates as `RTCIceCandidateInit`.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::SignalingError;

/// Identifier of a peer on the signaling relay.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Role of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Produced by the side initiating a negotiation round
    Offer,
    /// Produced in response to an offer
    Answer,
}

/// Session description exchanged during offer/answer negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Offer, sdp: sdp.into() }
    }

    /// Create an answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Answer, sdp: sdp.into() }
    }
}

/// One network path candidate, shaped like the browser's `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the attribute line set.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Discriminant of a [`SignalingEnvelope`], used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Session offer
    Offer,
    /// Session answer
    Answer,
    /// Batched local candidates
    CandidateBatch,
}

/// Unit exchanged through the signaling relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalingEnvelope {
    /// Start (or restart) a negotiation round
    Offer {
        /// Peer that produced the envelope
        sender: PeerId,
        /// Peer the envelope is addressed to
        target: PeerId,
        /// Offer description
        payload: SessionDescription,
    },
    /// Response to an offer
    Answer {
        /// Peer that produced the envelope
        sender: PeerId,
        /// Peer the envelope is addressed to
        target: PeerId,
        /// Answer description
        payload: SessionDescription,
    },
    /// Candidates discovered during one debounce window, in discovery order
    CandidateBatch {
        /// Peer that produced the envelope
        sender: PeerId,
        /// Peer the envelope is addressed to
        target: PeerId,
        /// Candidates in discovery order
        payload: Vec<IceCandidate>,
    },
}

impl SignalingEnvelope {
    /// Peer that produced the envelope.
    pub fn sender(&self) -> &PeerId {
        match self {
            Self::Offer { sender, .. }
            | Self::Answer { sender, .. }
            | Self::CandidateBatch { sender, .. } => sender,
        }
    }

    /// Peer the envelope is addressed to.
    pub fn target(&self) -> &PeerId {
        match self {
            Self::Offer { target, .. }
            | Self::Answer { target, .. }
            | Self::CandidateBatch { target, .. } => target,
        }
    }

    /// Envelope discriminant.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Offer { .. } => EnvelopeKind::Offer,
            Self::Answer { .. } => EnvelopeKind::Answer,
            Self::CandidateBatch { .. } => EnvelopeKind::CandidateBatch,
        }
    }

    /// Serialize to the JSON wire format.
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self).map_err(|e| SignalingError::Codec(e.to_string()))
    }

    /// Parse the JSON wire format.
    ///
    /// # Errors
    ///
    /// - `SignalingError::Codec` for malformed JSON, unknown `type` values or
    ///   payloads that do not match the envelope type
    pub fn from_json(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|e| SignalingError::Codec(e.to_string()))
    }
}

/// Outbound half of the relay connection.
///
/// Supplied by the host application. Inbound envelopes are fed to
/// [`crate::PeerConnectionManager::handle_signal`] by whoever reads the relay.
pub trait SignalingChannel: Send + Sync {
    /// Deliver `envelope` to `target` through the relay.
    ///
    /// Delivery is one-way and unacknowledged; an `Ok` only means the
    /// envelope was handed to the relay connection.
    fn send(&self, target: &PeerId, envelope: SignalingEnvelope) -> Result<(), SignalingError>;
}

impl<T: SignalingChannel + ?Sized> SignalingChannel for Arc<T> {
    fn send(&self, target: &PeerId, envelope: SignalingEnvelope) -> Result<(), SignalingError> {
        (**self).send(target, envelope)
    }
}

/// Serialized envelope ready for the relay connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSignal {
    /// Relay address of the recipient
    pub target: PeerId,
    /// JSON-encoded [`SignalingEnvelope`]
    pub text: String,
}

/// [`SignalingChannel`] adapter over an unbounded Tokio channel.
///
/// Envelopes are encoded to JSON at send time and queued for the task that
/// owns the actual relay connection (websocket, Nostr, ...).
#[derive(Debug, Clone)]
pub struct ChannelSignaling {
    outbound: mpsc::UnboundedSender<OutboundSignal>,
}

impl ChannelSignaling {
    /// Create the adapter and the receiver the relay task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundSignal>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { outbound }, rx)
    }

    /// Decode a text frame read from the relay into `(sender, envelope)`.
    ///
    /// `sender` is the relay-reported origin; the manager checks it against
    /// the envelope's own `sender` field.
    pub fn decode_inbound(
        sender: impl Into<PeerId>,
        text: &str,
    ) -> Result<(PeerId, SignalingEnvelope), SignalingError> {
        Ok((sender.into(), SignalingEnvelope::from_json(text)?))
    }
}

impl SignalingChannel for ChannelSignaling {
    fn send(&self, target: &PeerId, envelope: SignalingEnvelope) -> Result<(), SignalingError> {
        let text = envelope.to_json()?;
        self.outbound
            .send(OutboundSignal { target: target.clone(), text })
            .map_err(|_| SignalingError::Closed)
    }
}
