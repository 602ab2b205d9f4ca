//! In-process native connections.
//!
//! [`LoopbackNetwork`] stands in for the browser/WebRTC stack. Every
//! [`LoopbackBackend`] attached to it owns the connection objects of one local
//! peer; the network links an offerer's object with the answerer's object when
//! the offerer applies the answer, then reports both transports (and the data
//! channel) as up. No packets, no ICE: candidates are generated and recorded
//! so tests can check what was applied, but connectivity never depends on
//! them.
//!
//! Failure injection:
//! - [`LoopbackNetwork::fail_operation`] makes a backend operation fail
//! - a remote candidate whose text contains `invalid` is rejected
//! - adding a remote candidate before a remote description fails, as in
//!   browsers
//! - descriptions applied out of signaling order fail, as in browsers: a
//!   remote offer on top of an unanswered local offer is rejected until the
//!   local offer is rolled back

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;
use tidewire_core::{
    BackendError, ConnectionId, ConnectionState, DataChannelState, IceCandidate, PeerBackend,
    PeerEvent, PeerEventKind, PeerId, SdpKind, SessionDescription,
};
use tokio::sync::mpsc;

/// Local candidates emitted by default after the first local description.
pub const DEFAULT_CANDIDATES_PER_CONNECTION: usize = 2;

type ConnectionKey = (PeerId, ConnectionId);

/// Offer/answer state of one native object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

#[derive(Debug)]
struct NativeConnection {
    remote: PeerId,
    data_channel: bool,
    signaling: SignalingState,
    remote_description: Option<SessionDescription>,
    linked: Option<ConnectionKey>,
    gathered: bool,
    applied_candidates: Vec<IceCandidate>,
    tracks: usize,
    sent: Vec<String>,
    local_offers_rolled_back: usize,
    closed: bool,
}

#[derive(Debug)]
struct NetworkState {
    endpoints: HashMap<PeerId, mpsc::UnboundedSender<PeerEvent>>,
    connections: HashMap<ConnectionKey, NativeConnection>,
    failures: HashSet<&'static str>,
    candidates_per_connection: usize,
    next_stream: u64,
    released_streams: Vec<u64>,
}

impl NetworkState {
    fn check(&self, operation: &'static str) -> Result<(), BackendError> {
        if self.failures.contains(operation) {
            return Err(BackendError::new(operation, "injected failure"));
        }
        Ok(())
    }

    fn connection_mut(
        &mut self,
        key: &ConnectionKey,
        operation: &'static str,
    ) -> Result<&mut NativeConnection, BackendError> {
        match self.connections.get_mut(key) {
            Some(native) if !native.closed => Ok(native),
            Some(_) => Err(BackendError::new(operation, "connection closed")),
            None => Err(BackendError::new(operation, "unknown connection")),
        }
    }

    /// Deliver `kind` to the owner of `key`, tagged with the key's id.
    fn emit(&self, key: &ConnectionKey, kind: PeerEventKind) {
        let Some(native) = self.connections.get(key) else {
            return;
        };
        let Some(endpoint) = self.endpoints.get(&key.0) else {
            return;
        };

        let event = PeerEvent::new(native.remote.clone(), key.1, kind);
        if endpoint.send(event).is_err() {
            tracing::debug!(owner = %key.0, "event receiver dropped");
        }
    }

    fn gather_candidates(&mut self, key: &ConnectionKey) {
        let count = self.candidates_per_connection;
        let Some(native) = self.connections.get_mut(key) else {
            return;
        };
        if native.gathered {
            return;
        }
        native.gathered = true;

        for n in 0..count {
            let candidate = IceCandidate {
                candidate: format!(
                    "candidate:{n} 1 udp 2122260223 10.{}.0.{} {} typ host",
                    key.1.get() % 250,
                    n + 1,
                    50000 + n
                ),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            };
            self.emit(key, PeerEventKind::LocalCandidate(candidate));
        }
    }

    /// Offerer `key` applied an answer produced by `answerer`.
    fn link(&mut self, key: &ConnectionKey, answerer: ConnectionKey) {
        let data_channel = self.connections.get(key).is_some_and(|native| native.data_channel);

        let Some(remote) = self.connections.get_mut(&answerer) else {
            return;
        };
        if remote.closed {
            return;
        }
        remote.linked = Some(key.clone());
        remote.data_channel |= data_channel;

        if let Some(local) = self.connections.get_mut(key) {
            local.linked = Some(answerer.clone());
        }

        for side in [key, &answerer] {
            self.emit(side, PeerEventKind::ConnectionState(ConnectionState::Connected));
            if data_channel {
                self.emit(side, PeerEventKind::DataChannelState(DataChannelState::Open));
            }
        }
    }
}

/// Shared in-process network.
#[derive(Debug, Clone)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                endpoints: HashMap::new(),
                connections: HashMap::new(),
                failures: HashSet::new(),
                candidates_per_connection: DEFAULT_CANDIDATES_PER_CONNECTION,
                next_stream: 1,
                released_streams: Vec::new(),
            })),
        }
    }

    /// Attach a backend for `local_id`.
    ///
    /// Returns the backend and the receiver its native events arrive on.
    pub fn backend(
        &self,
        local_id: impl Into<PeerId>,
    ) -> (LoopbackBackend, mpsc::UnboundedReceiver<PeerEvent>) {
        let local_id = local_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().endpoints.insert(local_id.clone(), tx);
        (LoopbackBackend { local_id, network: self.clone() }, rx)
    }

    /// Make every future call of `operation` fail (e.g. `"create_answer"`).
    pub fn fail_operation(&self, operation: &'static str) {
        self.state.lock().failures.insert(operation);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Number of local candidates each connection gathers.
    pub fn set_candidates_per_connection(&self, count: usize) {
        self.state.lock().candidates_per_connection = count;
    }

    /// Push an arbitrary event to `owner` as if `connection_id` emitted it.
    ///
    /// Used to simulate late callbacks and transport changes.
    pub fn inject(&self, owner: &PeerId, event: PeerEvent) -> bool {
        self.state.lock().endpoints.get(owner).is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Inspect one connection object.
    pub fn connection(&self, owner: &PeerId, id: ConnectionId) -> Option<ConnectionSnapshot> {
        let state = self.state.lock();
        state.connections.get(&(owner.clone(), id)).map(|native| ConnectionSnapshot {
            remote: native.remote.clone(),
            data_channel: native.data_channel,
            has_remote_description: native.remote_description.is_some(),
            linked: native.linked.is_some(),
            applied_candidates: native.applied_candidates.clone(),
            tracks: native.tracks,
            sent: native.sent.clone(),
            stable: native.signaling == SignalingState::Stable,
            rollbacks: native.local_offers_rolled_back,
            closed: native.closed,
        })
    }

    /// Number of connection objects `owner` holds that are not closed.
    pub fn open_connections(&self, owner: &PeerId) -> usize {
        self.state
            .lock()
            .connections
            .iter()
            .filter(|((key_owner, _), native)| key_owner == owner && !native.closed)
            .count()
    }

    /// Ids of every released media stream, in release order.
    pub fn released_streams(&self) -> Vec<u64> {
        self.state.lock().released_streams.clone()
    }
}

/// Observable state of one loopback connection object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Remote peer
    pub remote: PeerId,
    /// Whether a data channel exists on this object
    pub data_channel: bool,
    /// Whether a remote description was applied
    pub has_remote_description: bool,
    /// Whether the transport is linked to a remote object
    pub linked: bool,
    /// Remote candidates applied, in order
    pub applied_candidates: Vec<IceCandidate>,
    /// Attached media tracks
    pub tracks: usize,
    /// Texts written to the data channel
    pub sent: Vec<String>,
    /// Whether no offer is outstanding in either direction
    pub stable: bool,
    /// Local offers discarded by rollback
    pub rollbacks: usize,
    /// Whether `close` was called
    pub closed: bool,
}

/// Handle to a loopback connection object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackConnection {
    key: ConnectionKey,
}

impl LoopbackConnection {
    /// Id the object was created with.
    pub fn id(&self) -> ConnectionId {
        self.key.1
    }
}

/// Simulated captured media.
#[derive(Debug, PartialEq, Eq)]
pub struct LoopbackStream {
    /// Stream id, unique per network
    pub id: u64,
    /// Number of tracks
    pub tracks: usize,
}

/// [`PeerBackend`] over a [`LoopbackNetwork`].
#[derive(Debug, Clone)]
pub struct LoopbackBackend {
    local_id: PeerId,
    network: LoopbackNetwork,
}

impl LoopbackBackend {
    /// Peer this backend acts for.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Network the backend is attached to.
    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }
}

fn describe(kind: SdpKind, key: &ConnectionKey, tracks: usize) -> SessionDescription {
    SessionDescription {
        kind,
        sdp: format!(
            "v=0\r\no=loopback {} {} IN {}\r\ns=-\r\na=tracks:{tracks}\r\n",
            key.1.get(),
            tracks,
            key.0
        ),
    }
}

/// Connection that produced `description`.
fn origin(description: &SessionDescription) -> Option<ConnectionKey> {
    let line = description.sdp.lines().find_map(|line| line.strip_prefix("o=loopback "))?;
    let mut fields = line.split_whitespace();
    let id = fields.next()?.parse().ok()?;
    let owner = fields.nth(2)?;
    Some((PeerId::from(owner), ConnectionId::new(id)))
}

impl PeerBackend for LoopbackBackend {
    type Connection = LoopbackConnection;
    type Stream = LoopbackStream;

    async fn create_connection(
        &self,
        peer_id: &PeerId,
        connection_id: ConnectionId,
    ) -> Result<LoopbackConnection, BackendError> {
        let mut state = self.network.state.lock();
        state.check("create_connection")?;

        let key = (self.local_id.clone(), connection_id);
        state.connections.insert(key.clone(), NativeConnection {
            remote: peer_id.clone(),
            data_channel: false,
            signaling: SignalingState::Stable,
            remote_description: None,
            linked: None,
            gathered: false,
            applied_candidates: Vec::new(),
            tracks: 0,
            sent: Vec::new(),
            local_offers_rolled_back: 0,
            closed: false,
        });

        Ok(LoopbackConnection { key })
    }

    async fn create_data_channel(&self, connection: &LoopbackConnection) -> Result<(), BackendError> {
        let mut state = self.network.state.lock();
        state.check("create_data_channel")?;
        state.connection_mut(&connection.key, "create_data_channel")?.data_channel = true;
        Ok(())
    }

    async fn create_offer(
        &self,
        connection: &LoopbackConnection,
    ) -> Result<SessionDescription, BackendError> {
        let mut state = self.network.state.lock();
        state.check("create_offer")?;
        let native = state.connection_mut(&connection.key, "create_offer")?;
        Ok(describe(SdpKind::Offer, &connection.key, native.tracks))
    }

    async fn create_answer(
        &self,
        connection: &LoopbackConnection,
    ) -> Result<SessionDescription, BackendError> {
        let mut state = self.network.state.lock();
        state.check("create_answer")?;
        let native = state.connection_mut(&connection.key, "create_answer")?;

        if native.signaling != SignalingState::HaveRemoteOffer {
            return Err(BackendError::new("create_answer", "no remote offer"));
        }
        Ok(describe(SdpKind::Answer, &connection.key, native.tracks))
    }

    async fn set_local_description(
        &self,
        connection: &LoopbackConnection,
        description: &SessionDescription,
    ) -> Result<(), BackendError> {
        let mut state = self.network.state.lock();
        state.check("set_local_description")?;
        let native = state.connection_mut(&connection.key, "set_local_description")?;

        native.signaling = match (native.signaling, description.kind) {
            (SignalingState::Stable | SignalingState::HaveLocalOffer, SdpKind::Offer) => {
                SignalingState::HaveLocalOffer
            },
            (SignalingState::HaveRemoteOffer, SdpKind::Answer) => SignalingState::Stable,
            (current, kind) => {
                return Err(BackendError::new(
                    "set_local_description",
                    format!("local {kind:?} in {current:?}"),
                ));
            },
        };

        state.gather_candidates(&connection.key);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        connection: &LoopbackConnection,
        description: &SessionDescription,
    ) -> Result<(), BackendError> {
        let mut state = self.network.state.lock();
        state.check("set_remote_description")?;
        let native = state.connection_mut(&connection.key, "set_remote_description")?;

        native.signaling = match (native.signaling, description.kind) {
            (SignalingState::Stable, SdpKind::Offer) => SignalingState::HaveRemoteOffer,
            (SignalingState::HaveLocalOffer, SdpKind::Answer) => SignalingState::Stable,
            (current, kind) => {
                return Err(BackendError::new(
                    "set_remote_description",
                    format!("remote {kind:?} in {current:?}"),
                ));
            },
        };
        native.remote_description = Some(description.clone());
        let already_linked = native.linked.is_some();

        if description.kind == SdpKind::Answer && !already_linked {
            let answerer = origin(description).ok_or_else(|| {
                BackendError::new("set_remote_description", "unrecognized answer origin")
            })?;
            state.link(&connection.key, answerer);
        }

        Ok(())
    }

    async fn rollback_local_offer(
        &self,
        connection: &LoopbackConnection,
    ) -> Result<(), BackendError> {
        let mut state = self.network.state.lock();
        state.check("rollback_local_offer")?;
        let native = state.connection_mut(&connection.key, "rollback_local_offer")?;

        if native.signaling != SignalingState::HaveLocalOffer {
            return Err(BackendError::new("rollback_local_offer", "no pending local offer"));
        }
        native.signaling = SignalingState::Stable;
        native.local_offers_rolled_back += 1;
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        connection: &LoopbackConnection,
        candidate: &IceCandidate,
    ) -> Result<(), BackendError> {
        let mut state = self.network.state.lock();
        state.check("add_ice_candidate")?;
        let native = state.connection_mut(&connection.key, "add_ice_candidate")?;

        if native.remote_description.is_none() {
            return Err(BackendError::new("add_ice_candidate", "no remote description"));
        }
        if candidate.candidate.contains("invalid") {
            return Err(BackendError::new("add_ice_candidate", "malformed candidate"));
        }

        native.applied_candidates.push(candidate.clone());
        Ok(())
    }

    fn send_data(&self, connection: &LoopbackConnection, text: &str) -> Result<(), BackendError> {
        let mut state = self.network.state.lock();
        state.check("send_data")?;
        let native = state.connection_mut(&connection.key, "send_data")?;

        let Some(remote) = native.linked.clone().filter(|_| native.data_channel) else {
            return Err(BackendError::new("send_data", "data channel not open"));
        };
        native.sent.push(text.to_string());

        state.emit(&remote, PeerEventKind::Message(text.to_string()));
        Ok(())
    }

    async fn open_local_media(&self, _peer_id: &PeerId) -> Result<LoopbackStream, BackendError> {
        let mut state = self.network.state.lock();
        state.check("open_local_media")?;

        let id = state.next_stream;
        state.next_stream += 1;
        Ok(LoopbackStream { id, tracks: 1 })
    }

    async fn attach_stream(
        &self,
        connection: &LoopbackConnection,
        stream: &LoopbackStream,
    ) -> Result<bool, BackendError> {
        let mut state = self.network.state.lock();
        state.check("attach_stream")?;
        state.connection_mut(&connection.key, "attach_stream")?.tracks += stream.tracks;
        Ok(stream.tracks > 0)
    }

    async fn release_stream(&self, connection: &LoopbackConnection, stream: LoopbackStream) {
        let mut state = self.network.state.lock();
        if let Some(native) = state.connections.get_mut(&connection.key) {
            native.tracks = native.tracks.saturating_sub(stream.tracks);
        }
        state.released_streams.push(stream.id);
    }

    async fn close(&self, connection: LoopbackConnection) {
        let mut state = self.network.state.lock();
        let Some(native) = state.connections.get_mut(&connection.key) else {
            return;
        };
        if native.closed {
            return;
        }

        native.closed = true;
        let linked = native.linked.take();

        if let Some(remote) = linked {
            if let Some(remote_native) = state.connections.get_mut(&remote) {
                remote_native.linked = None;
            }
            state.emit(&remote, PeerEventKind::ConnectionState(ConnectionState::Disconnected));
        }
    }
}
