//! Tidewire WebRTC Backend
//!
//! Production [`tidewire_core::PeerBackend`] built on the `webrtc` crate:
//! one `RTCPeerConnection` per remote peer, a single ordered data channel for
//! chat payloads, and a VP8 sample track for screen sharing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod config;

pub use backend::{WebRtcBackend, WebRtcConnection, WebRtcStream};
pub use config::{DEFAULT_DATA_CHANNEL_LABEL, DEFAULT_STUN_SERVER, WebRtcConfig};
