//! Tidewire Core
//!
//! Peer-to-peer connection substrate: per-peer negotiation state machines,
//! signaling envelopes, and ICE candidate batching.
//!
//! # Architecture
//!
//! The pieces follow the Sans-IO pattern wherever time is involved: the
//! [`IceCandidateBatcher`] takes the current instant as input and returns the
//! batches that are due, and the [`PeerConnectionManager`] is advanced with
//! [`PeerConnectionManager::tick`] by whatever loop owns it. Native connection
//! work (SDP, ICE, data channels, media) sits behind the [`PeerBackend`] trait
//! and signaling delivery behind [`SignalingChannel`], so the same manager runs
//! against WebRTC in production and in-process doubles in tests.
//!
//! # Components
//!
//! - [`Environment`]: Time, sleep and randomness abstraction
//! - [`SignalingEnvelope`]: The OFFER / ANSWER / `CANDIDATE_BATCH` wire unit
//! - [`IceCandidateBatcher`]: Per-peer debounce of local candidates
//! - [`PeerConnection`]: One negotiation record per remote peer
//! - [`PeerConnectionManager`]: Owns every record and drives negotiation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod batcher;
pub mod env;
pub mod error;
pub mod manager;
pub mod peer;
pub mod signaling;
mod system_env;

pub use backend::{PeerBackend, PeerEvent, PeerEventKind};
pub use batcher::{CandidateBatch, DEFAULT_BATCH_DELAY, IceCandidateBatcher};
pub use env::{Environment, Timestamp};
pub use error::{BackendError, PeerError, SendError, SignalingError};
pub use manager::{
    DEFAULT_NEGOTIATION_TIMEOUT, DataPayload, ManagerConfig, PeerConnectionManager, PeerNotice,
};
pub use peer::{ConnectionId, ConnectionState, DataChannelState, PeerConnection};
pub use signaling::{
    ChannelSignaling, EnvelopeKind, IceCandidate, OutboundSignal, PeerId, SdpKind,
    SessionDescription, SignalingChannel, SignalingEnvelope,
};
pub use system_env::SystemEnv;
