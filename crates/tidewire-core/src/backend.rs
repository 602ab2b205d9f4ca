//! Native peer connection capability.
//!
//! The manager never touches SDP, ICE agents, data channels or media devices
//! directly. Everything native goes through [`PeerBackend`]; WebRTC implements
//! it in production and an in-process loopback implements it in tests.
//!
//! Native callbacks (candidate discovered, transport state changed, channel
//! opened, message received) are not delivered through the trait. A backend
//! is built with the sending half of a channel and pushes [`PeerEvent`]s into
//! it; the loop that owns the manager feeds them to
//! [`crate::PeerConnectionManager::handle_event`].

use std::future::Future;

use crate::{
    error::BackendError,
    peer::{ConnectionId, ConnectionState, DataChannelState},
    signaling::{IceCandidate, PeerId, SessionDescription},
};

/// Asynchronous notification from a native connection object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    /// Remote peer the connection belongs to
    pub peer_id: PeerId,
    /// Native object that produced the event
    pub connection_id: ConnectionId,
    /// What happened
    pub kind: PeerEventKind,
}

impl PeerEvent {
    /// Build an event for `peer_id` / `connection_id`.
    pub fn new(peer_id: PeerId, connection_id: ConnectionId, kind: PeerEventKind) -> Self {
        Self { peer_id, connection_id, kind }
    }
}

/// Native event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEventKind {
    /// A local candidate was discovered
    LocalCandidate(IceCandidate),
    /// Transport state changed
    ConnectionState(ConnectionState),
    /// Data channel state changed (including the remote channel arriving)
    DataChannelState(DataChannelState),
    /// Text received on the data channel
    Message(String),
}

/// Native connection operations used by the manager.
///
/// Every async step of a negotiation maps to one method. Implementations
/// report failures as [`BackendError`]; the manager decides whether a failure
/// is terminal for the peer.
pub trait PeerBackend: Send + Sync + 'static {
    /// Handle to one native connection object
    type Connection: Send + Sync;

    /// Handle to captured local media
    type Stream: Send + Sync;

    /// Create a native connection to `peer_id`.
    ///
    /// Events from this object must carry `connection_id`.
    fn create_connection(
        &self,
        peer_id: &PeerId,
        connection_id: ConnectionId,
    ) -> impl Future<Output = Result<Self::Connection, BackendError>> + Send;

    /// Create the reliable ordered data channel (offerer side).
    fn create_data_channel(
        &self,
        connection: &Self::Connection,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Generate an offer for the current local configuration.
    fn create_offer(
        &self,
        connection: &Self::Connection,
    ) -> impl Future<Output = Result<SessionDescription, BackendError>> + Send;

    /// Generate an answer to the applied remote offer.
    fn create_answer(
        &self,
        connection: &Self::Connection,
    ) -> impl Future<Output = Result<SessionDescription, BackendError>> + Send;

    /// Apply a locally generated description.
    ///
    /// Candidate gathering starts here; candidates arrive as
    /// [`PeerEventKind::LocalCandidate`].
    fn set_local_description(
        &self,
        connection: &Self::Connection,
        description: &SessionDescription,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Apply the remote peer's description.
    fn set_remote_description(
        &self,
        connection: &Self::Connection,
        description: &SessionDescription,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Discard the applied but unanswered local offer, returning the native
    /// object to the stable signaling state.
    fn rollback_local_offer(
        &self,
        connection: &Self::Connection,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Add one remote candidate. Requires a remote description.
    fn add_ice_candidate(
        &self,
        connection: &Self::Connection,
        candidate: &IceCandidate,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Write text to the open data channel.
    fn send_data(&self, connection: &Self::Connection, text: &str) -> Result<(), BackendError>;

    /// Capture local media (screen) for `peer_id`.
    fn open_local_media(
        &self,
        peer_id: &PeerId,
    ) -> impl Future<Output = Result<Self::Stream, BackendError>> + Send;

    /// Attach the stream's tracks to the connection.
    ///
    /// Returns true if any track was added, meaning a new offer is needed.
    fn attach_stream(
        &self,
        connection: &Self::Connection,
        stream: &Self::Stream,
    ) -> impl Future<Output = Result<bool, BackendError>> + Send;

    /// Detach the stream and stop its tracks.
    fn release_stream(
        &self,
        connection: &Self::Connection,
        stream: Self::Stream,
    ) -> impl Future<Output = ()> + Send;

    /// Close the native connection and release everything it holds.
    fn close(&self, connection: Self::Connection) -> impl Future<Output = ()> + Send;
}
