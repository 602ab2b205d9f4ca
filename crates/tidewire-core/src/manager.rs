//! Peer connection manager.
//!
//! Owns one [`PeerConnection`] per remote peer and drives offer/answer
//! negotiation over the signaling relay. The manager is driven from a single
//! task through `&mut self`:
//!
//! - application calls ([`connect`](PeerConnectionManager::connect),
//!   [`send_message`](PeerConnectionManager::send_message), screen share)
//! - inbound envelopes ([`handle_signal`](PeerConnectionManager::handle_signal))
//! - native events ([`handle_event`](PeerConnectionManager::handle_event))
//! - time ([`tick`](PeerConnectionManager::tick) at
//!   [`next_deadline`](PeerConnectionManager::next_deadline))
//!
//! Application-facing notifications queue up internally and are drained with
//! [`take_notices`](PeerConnectionManager::take_notices).
//!
//! # Glare
//!
//! When both sides send an OFFER before either sees the other's, the peer ids
//! decide. The side with the greater id drops its own connection object and
//! answers; the side with the smaller id ignores the inbound offer and waits
//! for the answer to its own. Both sides compute the same outcome, so exactly
//! one negotiation survives.
//!
//! An established connection keeps its native object. The greater id rolls
//! back its unanswered local offer, answers, then offers again so its own
//! changes are still negotiated. A renegotiation offer that is never answered
//! is rolled back after the negotiation timeout; the connection stays up.

use std::{borrow::Cow, collections::HashMap, mem, time::Duration};

use crate::{
    backend::{PeerBackend, PeerEvent, PeerEventKind},
    batcher::{CandidateBatch, DEFAULT_BATCH_DELAY, IceCandidateBatcher},
    env::{Environment, Timestamp},
    error::{PeerError, SendError},
    peer::{ConnectionId, ConnectionState, DataChannelState, PeerConnection},
    signaling::{
        EnvelopeKind, IceCandidate, PeerId, SdpKind, SessionDescription, SignalingChannel,
        SignalingEnvelope,
    },
};

/// Time a peer may stay `Connecting` before it is failed and torn down.
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Manager configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Quiet period before local candidates are flushed as one batch
    pub candidate_batch_delay: Duration,
    /// Maximum time in `Connecting`
    pub negotiation_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            candidate_batch_delay: DEFAULT_BATCH_DELAY,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
        }
    }
}

/// Application payload for the data channel.
#[derive(Debug, Clone, PartialEq)]
pub enum DataPayload {
    /// Sent as-is
    Text(String),
    /// Serialized to JSON text before sending
    Json(serde_json::Value),
}

impl DataPayload {
    fn encode(&self) -> Result<Cow<'_, str>, SendError> {
        match self {
            Self::Text(text) => Ok(Cow::Borrowed(text)),
            Self::Json(value) => serde_json::to_string(value)
                .map(Cow::Owned)
                .map_err(|e| SendError::Encode(e.to_string())),
        }
    }
}

impl From<&str> for DataPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for DataPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<serde_json::Value> for DataPayload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Notification for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerNotice {
    /// Transport state of a peer changed
    StateChanged {
        /// Remote peer
        peer_id: PeerId,
        /// New state
        state: ConnectionState,
    },
    /// Data channel state of a peer changed
    DataChannelChanged {
        /// Remote peer
        peer_id: PeerId,
        /// New state
        state: DataChannelState,
    },
    /// Raw payload received on a data channel
    Message {
        /// Sending peer
        peer_id: PeerId,
        /// Payload exactly as received
        payload: String,
    },
    /// Connection record removed and native resources released
    Removed {
        /// Remote peer
        peer_id: PeerId,
        /// Why the record was removed
        reason: &'static str,
    },
}

/// How to treat an inbound OFFER given the current record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OfferDecision {
    /// No record: create one as answerer
    Create,
    /// Stale record: discard and create a fresh one
    Replace,
    /// Glare and we have the greater id: drop our offer, answer theirs
    Yield,
    /// Glare and we have the smaller id: ignore their offer
    Reject,
    /// Glare on an established record and we have the greater id: roll back
    /// our offer, answer theirs, then offer again
    RollBack,
    /// New round on the existing record
    Renegotiate,
}

type Record<E, B> = PeerConnection<
    <B as PeerBackend>::Connection,
    <B as PeerBackend>::Stream,
    <E as Environment>::Instant,
>;

/// Owns every peer connection and drives negotiation.
///
/// # Invariants
///
/// - At most one record per [`PeerId`]
/// - Events tagged with a connection id other than the record's are dropped
/// - A removed record has no pending candidate batch and no negotiation clock
pub struct PeerConnectionManager<E: Environment, B: PeerBackend, S> {
    env: E,
    backend: B,
    signaling: S,
    local_id: PeerId,
    config: ManagerConfig,
    peers: HashMap<PeerId, Record<E, B>>,
    batcher: IceCandidateBatcher<E::Instant>,
    next_connection_id: ConnectionId,
    notices: Vec<PeerNotice>,
}

impl<E, B, S> PeerConnectionManager<E, B, S>
where
    E: Environment,
    B: PeerBackend,
    S: SignalingChannel,
{
    /// Create a manager for the local peer `local_id`.
    pub fn new(env: E, backend: B, signaling: S, local_id: PeerId, config: ManagerConfig) -> Self {
        let batcher = IceCandidateBatcher::new(config.candidate_batch_delay);
        Self {
            env,
            backend,
            signaling,
            local_id,
            config,
            peers: HashMap::new(),
            batcher,
            next_connection_id: ConnectionId::new(1),
            notices: Vec::new(),
        }
    }

    /// Local peer id.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Active configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Environment the manager reads time from.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Native backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Start a connection to `peer_id` as offerer.
    ///
    /// No-op if a record exists in `New`, `Connecting` or `Connected`. A
    /// record in any other state is discarded and a fresh one built. On
    /// failure the new record is torn down.
    ///
    /// # Errors
    ///
    /// - `PeerError::SelfSignal` if `peer_id` is the local id
    /// - `PeerError::Backend` if a native step fails
    /// - `PeerError::Signaling` if the relay refuses the offer
    pub async fn connect(&mut self, peer_id: &PeerId) -> Result<(), PeerError> {
        if *peer_id == self.local_id {
            return Err(PeerError::SelfSignal);
        }

        if let Some(existing) = self.peers.get(peer_id) {
            if existing.state.is_live() {
                tracing::debug!(peer = %peer_id, state = ?existing.state, "connect ignored, connection live");
                return Ok(());
            }
            self.teardown(peer_id, "replaced by reconnect").await;
        }

        let now = self.env.now();
        self.create_record(peer_id, true).await?;

        let result = match self.open_data_channel(peer_id).await {
            Ok(()) => self.start_offer(peer_id, now).await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            self.fail(peer_id, "connect failed").await;
            return Err(err);
        }

        tracing::info!(peer = %peer_id, "connecting");
        Ok(())
    }

    /// Process an envelope from the relay.
    ///
    /// `sender` is the origin reported by the relay. Anomalies are logged and
    /// the envelope discarded; every other peer is unaffected either way.
    ///
    /// # Errors
    ///
    /// - Protocol anomalies (see [`PeerError::is_protocol_anomaly`])
    /// - `PeerError::Backend` / `PeerError::Signaling` if a negotiation step
    ///   fails
    pub async fn handle_signal(
        &mut self,
        sender: &PeerId,
        envelope: SignalingEnvelope,
    ) -> Result<(), PeerError> {
        let kind = envelope.kind();
        let result = self.route_signal(sender, envelope).await;

        if let Err(err) = &result {
            if err.is_protocol_anomaly() {
                tracing::warn!(peer = %sender, ?kind, error = %err, "discarding signal");
            } else {
                tracing::error!(peer = %sender, ?kind, error = %err, "negotiation step failed");
            }
        }

        result
    }

    /// Process a native event.
    ///
    /// Events for unknown peers or from a discarded connection object are
    /// dropped.
    pub async fn handle_event(&mut self, event: PeerEvent) {
        let PeerEvent { peer_id, connection_id, kind } = event;

        let Some(peer) = self.peers.get_mut(&peer_id) else {
            tracing::debug!(peer = %peer_id, connection = %connection_id, "event for unknown peer dropped");
            return;
        };

        if peer.connection_id != connection_id {
            tracing::debug!(
                peer = %peer_id,
                stale = %connection_id,
                current = %peer.connection_id,
                "stale event dropped"
            );
            return;
        }

        match kind {
            PeerEventKind::LocalCandidate(candidate) => {
                let now = self.env.now();
                self.batcher.add_candidate(&peer_id, candidate, now);
            },
            PeerEventKind::ConnectionState(state) => {
                self.on_connection_state_change(&peer_id, state).await;
            },
            PeerEventKind::DataChannelState(state) => {
                set_data_channel(&mut self.notices, peer, state);
            },
            PeerEventKind::Message(payload) => {
                self.notices.push(PeerNotice::Message { peer_id, payload });
            },
        }
    }

    /// Flush due candidate batches, fail negotiations that timed out and roll
    /// back renegotiation offers nobody answered.
    pub async fn tick(&mut self, now: E::Instant) {
        for CandidateBatch { peer_id, candidates } in self.batcher.poll_flush(now) {
            let count = candidates.len();
            let envelope = SignalingEnvelope::CandidateBatch {
                sender: self.local_id.clone(),
                target: peer_id.clone(),
                payload: candidates,
            };

            match self.signaling.send(&peer_id, envelope) {
                Ok(()) => tracing::debug!(peer = %peer_id, count, "candidate batch sent"),
                Err(err) => {
                    tracing::warn!(peer = %peer_id, count, error = %err, "candidate batch not sent");
                },
            }
        }

        let timeout = self.config.negotiation_timeout;
        let expired: Vec<PeerId> = self
            .peers
            .values()
            .filter(|peer| peer.negotiation_expired(now, timeout))
            .map(|peer| peer.peer_id.clone())
            .collect();

        for peer_id in expired {
            tracing::warn!(peer = %peer_id, ?timeout, "negotiation timed out");
            self.fail(&peer_id, "negotiation timed out").await;
        }

        let stalled: Vec<PeerId> = self
            .peers
            .values()
            .filter(|peer| peer.renegotiation_expired(now, timeout))
            .map(|peer| peer.peer_id.clone())
            .collect();

        for peer_id in stalled {
            tracing::warn!(peer = %peer_id, ?timeout, "renegotiation unanswered, rolling back");
            if let Err(err) = self.roll_back_offer(&peer_id).await {
                tracing::warn!(peer = %peer_id, error = %err, "rollback failed");
            }
        }
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        let timeout = self.config.negotiation_timeout;
        let negotiation = self
            .peers
            .values()
            .filter_map(|peer| {
                peer.negotiation_deadline(timeout).or_else(|| peer.renegotiation_deadline(timeout))
            })
            .min();

        [self.batcher.next_deadline(), negotiation].into_iter().flatten().min()
    }

    /// Write a payload to the peer's open data channel.
    ///
    /// # Errors
    ///
    /// - `SendError::NoSuchPeer` if there is no record for `peer_id`
    /// - `SendError::ChannelNotOpen` if the data channel is not open
    /// - `SendError::Encode` if a JSON payload cannot be serialized
    /// - `SendError::Backend` if the native channel rejects the write
    pub fn send_message(&self, peer_id: &PeerId, payload: &DataPayload) -> Result<(), SendError> {
        let peer = self.peers.get(peer_id).ok_or_else(|| SendError::NoSuchPeer(peer_id.clone()))?;

        if peer.data_channel_state != DataChannelState::Open {
            return Err(SendError::ChannelNotOpen {
                peer: peer_id.clone(),
                state: peer.data_channel_state,
            });
        }

        let text = payload.encode()?;
        self.backend.send_data(&peer.native, &text)?;
        Ok(())
    }

    /// Capture local media and attach it to the peer's connection.
    ///
    /// Renegotiates with a new offer when tracks were added.
    ///
    /// # Errors
    ///
    /// - `PeerError::NoSuchPeer` if there is no record for `peer_id`
    /// - `PeerError::AlreadySharing` if a stream is already attached
    /// - `PeerError::Backend` / `PeerError::Signaling` if capture, attach or
    ///   renegotiation fails
    pub async fn start_screen_share(&mut self, peer_id: &PeerId) -> Result<(), PeerError> {
        let peer =
            self.peers.get_mut(peer_id).ok_or_else(|| PeerError::NoSuchPeer(peer_id.clone()))?;

        if peer.local_stream.is_some() {
            return Err(PeerError::AlreadySharing(peer_id.clone()));
        }

        let stream = self.backend.open_local_media(peer_id).await?;
        let tracks_added = match self.backend.attach_stream(&peer.native, &stream).await {
            Ok(added) => added,
            Err(err) => {
                self.backend.release_stream(&peer.native, stream).await;
                return Err(err.into());
            },
        };
        peer.local_stream = Some(stream);
        tracing::info!(peer = %peer_id, tracks_added, "screen share started");

        if tracks_added {
            let now = self.env.now();
            self.start_offer(peer_id, now).await?;
        }

        Ok(())
    }

    /// Detach and release the peer's local media immediately.
    ///
    /// # Errors
    ///
    /// - `PeerError::NoSuchPeer` if there is no record for `peer_id`
    /// - `PeerError::NotSharing` if no stream is attached
    pub async fn stop_screen_share(&mut self, peer_id: &PeerId) -> Result<(), PeerError> {
        let peer =
            self.peers.get_mut(peer_id).ok_or_else(|| PeerError::NoSuchPeer(peer_id.clone()))?;

        let stream = peer.local_stream.take().ok_or_else(|| PeerError::NotSharing(peer_id.clone()))?;
        self.backend.release_stream(&peer.native, stream).await;

        tracing::info!(peer = %peer_id, "screen share stopped");
        Ok(())
    }

    /// Close the connection to `peer_id`. Returns false if there was none.
    pub async fn disconnect(&mut self, peer_id: &PeerId) -> bool {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            transition(&mut self.notices, peer, ConnectionState::Closed);
        }
        self.teardown(peer_id, "disconnected").await
    }

    /// Close every connection.
    pub async fn close_all(&mut self) {
        let mut peer_ids: Vec<PeerId> = self.peers.keys().cloned().collect();
        peer_ids.sort();

        for peer_id in peer_ids {
            self.disconnect(&peer_id).await;
        }
    }

    /// Drain queued notifications, oldest first.
    pub fn take_notices(&mut self) -> Vec<PeerNotice> {
        mem::take(&mut self.notices)
    }

    /// Connection record for `peer_id`.
    pub fn peer(&self, peer_id: &PeerId) -> Option<&Record<E, B>> {
        self.peers.get(peer_id)
    }

    /// Transport state of `peer_id`.
    pub fn peer_state(&self, peer_id: &PeerId) -> Option<ConnectionState> {
        self.peers.get(peer_id).map(|peer| peer.state)
    }

    /// Data channel state of `peer_id`.
    pub fn data_channel_state(&self, peer_id: &PeerId) -> Option<DataChannelState> {
        self.peers.get(peer_id).map(|peer| peer.data_channel_state)
    }

    /// Whether this side sent the offer of the peer's current round.
    pub fn is_offerer(&self, peer_id: &PeerId) -> Option<bool> {
        self.peers.get(peer_id).map(|peer| peer.is_offerer)
    }

    /// Whether local media is attached for `peer_id`.
    pub fn is_sharing(&self, peer_id: &PeerId) -> bool {
        self.peers.get(peer_id).is_some_and(PeerConnection::is_sharing)
    }

    /// Connection id of the peer's current record.
    pub fn connection_id(&self, peer_id: &PeerId) -> Option<ConnectionId> {
        self.peers.get(peer_id).map(|peer| peer.connection_id)
    }

    /// Local candidates waiting for the next batch flush.
    pub fn pending_local_candidates(&self, peer_id: &PeerId) -> &[IceCandidate] {
        self.batcher.pending(peer_id)
    }

    /// Remote candidates buffered until a remote description is applied.
    pub fn pending_remote_candidates(&self, peer_id: &PeerId) -> &[IceCandidate] {
        self.peers.get(peer_id).map_or(&[], |peer| peer.pending_remote_candidates.as_slice())
    }

    /// Number of connection records.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Ids of all peers with a record, sorted.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn route_signal(
        &mut self,
        sender: &PeerId,
        envelope: SignalingEnvelope,
    ) -> Result<(), PeerError> {
        if envelope.sender() != sender || *envelope.target() != self.local_id {
            return Err(PeerError::MisaddressedEnvelope {
                sender: envelope.sender().clone(),
                target: envelope.target().clone(),
            });
        }

        if *sender == self.local_id {
            return Err(PeerError::SelfSignal);
        }

        match envelope {
            SignalingEnvelope::Offer { payload, .. } => {
                if payload.kind != SdpKind::Offer {
                    return Err(PeerError::InvalidPayload { expected: "offer" });
                }
                let now = self.env.now();
                self.handle_offer(sender, payload, now).await
            },
            SignalingEnvelope::Answer { payload, .. } => {
                if payload.kind != SdpKind::Answer {
                    return Err(PeerError::InvalidPayload { expected: "answer" });
                }
                self.handle_answer(sender, payload).await
            },
            SignalingEnvelope::CandidateBatch { payload, .. } => {
                self.handle_candidate_batch(sender, payload).await
            },
        }
    }

    fn offer_decision(&self, sender: &PeerId) -> OfferDecision {
        match self.peers.get(sender) {
            None => OfferDecision::Create,
            Some(peer) if peer.state.is_terminal() => OfferDecision::Replace,
            Some(peer) if peer.awaiting_answer() => {
                if self.local_id < *sender {
                    OfferDecision::Reject
                } else if peer.state == ConnectionState::Connected {
                    OfferDecision::RollBack
                } else {
                    OfferDecision::Yield
                }
            },
            Some(_) => OfferDecision::Renegotiate,
        }
    }

    async fn handle_offer(
        &mut self,
        sender: &PeerId,
        offer: SessionDescription,
        now: E::Instant,
    ) -> Result<(), PeerError> {
        let decision = self.offer_decision(sender);
        let fresh = match decision {
            OfferDecision::Reject => return Err(PeerError::Glare(sender.clone())),
            OfferDecision::Create => true,
            OfferDecision::Replace => {
                self.teardown(sender, "replaced by remote offer").await;
                true
            },
            OfferDecision::Yield => {
                tracing::info!(peer = %sender, "glare, yielding to remote offer");
                self.teardown(sender, "yielded to remote offer").await;
                true
            },
            OfferDecision::RollBack => {
                tracing::info!(peer = %sender, "glare while connected, rolling back local offer");
                self.roll_back_offer(sender).await?;
                false
            },
            OfferDecision::Renegotiate => {
                tracing::debug!(peer = %sender, "renegotiation offer");
                false
            },
        };

        if fresh {
            self.create_record(sender, false).await?;
        } else if let Some(peer) = self.peers.get_mut(sender) {
            peer.reset_round(false);
        }

        if let Err(err) = self.answer_offer(sender, &offer, now).await {
            if fresh {
                self.fail(sender, "answer failed").await;
            }
            return Err(err);
        }

        if decision == OfferDecision::RollBack {
            self.start_offer(sender, now).await?;
        }

        Ok(())
    }

    /// Discard the unanswered local offer. The round is abandoned even when
    /// the native rollback fails, so it is never retried.
    async fn roll_back_offer(&mut self, peer_id: &PeerId) -> Result<(), PeerError> {
        let peer =
            self.peers.get_mut(peer_id).ok_or_else(|| PeerError::NoSuchPeer(peer_id.clone()))?;

        let result = self.backend.rollback_local_offer(&peer.native).await;
        peer.abandon_offer();
        result?;

        tracing::debug!(peer = %peer_id, "local offer rolled back");
        Ok(())
    }

    async fn answer_offer(
        &mut self,
        sender: &PeerId,
        offer: &SessionDescription,
        now: E::Instant,
    ) -> Result<(), PeerError> {
        let peer =
            self.peers.get_mut(sender).ok_or_else(|| PeerError::NoSuchPeer(sender.clone()))?;

        self.backend.set_remote_description(&peer.native, offer).await?;
        peer.has_remote_description = true;
        Self::replay_candidates(&self.backend, peer).await;

        let answer = self.backend.create_answer(&peer.native).await?;
        self.backend.set_local_description(&peer.native, &answer).await?;
        enter_negotiation(&mut self.notices, peer, now);

        let envelope = SignalingEnvelope::Answer {
            sender: self.local_id.clone(),
            target: sender.clone(),
            payload: answer,
        };
        self.signaling.send(sender, envelope)?;

        tracing::debug!(peer = %sender, "answer sent");
        Ok(())
    }

    async fn handle_answer(
        &mut self,
        sender: &PeerId,
        answer: SessionDescription,
    ) -> Result<(), PeerError> {
        let Some(peer) = self.peers.get_mut(sender) else {
            return Err(PeerError::UnknownPeer { peer: sender.clone(), kind: EnvelopeKind::Answer });
        };

        if !peer.is_offerer {
            return Err(PeerError::NotOfferer(sender.clone()));
        }

        if peer.has_remote_description {
            return Err(PeerError::DuplicateAnswer(sender.clone()));
        }

        self.backend.set_remote_description(&peer.native, &answer).await?;
        peer.answer_applied();
        tracing::debug!(peer = %sender, "answer applied");

        Self::replay_candidates(&self.backend, peer).await;
        Ok(())
    }

    async fn handle_candidate_batch(
        &mut self,
        sender: &PeerId,
        candidates: Vec<IceCandidate>,
    ) -> Result<(), PeerError> {
        let Some(peer) = self.peers.get_mut(sender) else {
            return Err(PeerError::UnknownPeer {
                peer: sender.clone(),
                kind: EnvelopeKind::CandidateBatch,
            });
        };

        if !peer.has_remote_description {
            tracing::debug!(
                peer = %sender,
                count = candidates.len(),
                "buffering remote candidates until remote description"
            );
            peer.pending_remote_candidates.extend(candidates);
            return Ok(());
        }

        let applied = Self::apply_candidates(&self.backend, peer, &candidates).await;
        tracing::debug!(peer = %sender, applied, total = candidates.len(), "remote candidates applied");
        Ok(())
    }

    async fn on_connection_state_change(&mut self, peer_id: &PeerId, state: ConnectionState) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return;
        };

        if peer.state == state {
            return;
        }

        if !peer.state.can_transition_to(state) {
            tracing::warn!(peer = %peer_id, from = ?peer.state, to = ?state, "ignoring invalid state change");
            return;
        }

        transition(&mut self.notices, peer, state);

        let reason = match state {
            ConnectionState::Connected => {
                peer.negotiation_started = None;
                return;
            },
            ConnectionState::Disconnected => "transport disconnected",
            ConnectionState::Failed => "transport failed",
            ConnectionState::Closed => "transport closed",
            ConnectionState::New | ConnectionState::Connecting => return,
        };

        self.teardown(peer_id, reason).await;
    }

    async fn create_record(&mut self, peer_id: &PeerId, is_offerer: bool) -> Result<(), PeerError> {
        let connection_id = self.next_connection_id;
        self.next_connection_id = connection_id.next();

        let native = self.backend.create_connection(peer_id, connection_id).await?;
        self.peers.insert(
            peer_id.clone(),
            PeerConnection::new(peer_id.clone(), connection_id, native, is_offerer),
        );

        tracing::debug!(peer = %peer_id, connection = %connection_id, is_offerer, "connection created");
        Ok(())
    }

    async fn open_data_channel(&mut self, peer_id: &PeerId) -> Result<(), PeerError> {
        let peer =
            self.peers.get_mut(peer_id).ok_or_else(|| PeerError::NoSuchPeer(peer_id.clone()))?;

        self.backend.create_data_channel(&peer.native).await?;
        set_data_channel(&mut self.notices, peer, DataChannelState::Connecting);
        Ok(())
    }

    async fn start_offer(&mut self, peer_id: &PeerId, now: E::Instant) -> Result<(), PeerError> {
        let peer =
            self.peers.get_mut(peer_id).ok_or_else(|| PeerError::NoSuchPeer(peer_id.clone()))?;

        let offer = self.backend.create_offer(&peer.native).await?;
        self.backend.set_local_description(&peer.native, &offer).await?;
        peer.reset_round(true);
        peer.offer_sent(now);
        enter_negotiation(&mut self.notices, peer, now);

        let envelope = SignalingEnvelope::Offer {
            sender: self.local_id.clone(),
            target: peer_id.clone(),
            payload: offer,
        };
        self.signaling.send(peer_id, envelope)?;

        tracing::debug!(peer = %peer_id, "offer sent");
        Ok(())
    }

    async fn replay_candidates(backend: &B, peer: &mut Record<E, B>) {
        let pending = mem::take(&mut peer.pending_remote_candidates);
        if pending.is_empty() {
            return;
        }

        tracing::debug!(peer = %peer.peer_id, count = pending.len(), "replaying early remote candidates");
        Self::apply_candidates(backend, peer, &pending).await;
    }

    /// Apply candidates in order. A failing candidate is logged and skipped.
    async fn apply_candidates(backend: &B, peer: &Record<E, B>, candidates: &[IceCandidate]) -> usize {
        let mut applied = 0;
        for candidate in candidates {
            match backend.add_ice_candidate(&peer.native, candidate).await {
                Ok(()) => applied += 1,
                Err(err) => tracing::warn!(
                    peer = %peer.peer_id,
                    candidate = %candidate.candidate,
                    error = %err,
                    "skipping remote candidate"
                ),
            }
        }
        applied
    }

    async fn fail(&mut self, peer_id: &PeerId, reason: &'static str) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            transition(&mut self.notices, peer, ConnectionState::Failed);
        }
        self.teardown(peer_id, reason).await;
    }

    /// Remove the record, cancel its batch, release media and close the
    /// native object.
    async fn teardown(&mut self, peer_id: &PeerId, reason: &'static str) -> bool {
        let Some(mut peer) = self.peers.remove(peer_id) else {
            return false;
        };

        let discarded = self.batcher.cancel(peer_id);

        if let Some(stream) = peer.local_stream.take() {
            self.backend.release_stream(&peer.native, stream).await;
        }

        let connection_id = peer.connection_id;
        self.backend.close(peer.native).await;

        tracing::info!(
            peer = %peer_id,
            connection = %connection_id,
            reason,
            discarded_candidates = discarded,
            "peer removed"
        );
        self.notices.push(PeerNotice::Removed { peer_id: peer_id.clone(), reason });
        true
    }
}

fn transition<C, S, I>(
    notices: &mut Vec<PeerNotice>,
    peer: &mut PeerConnection<C, S, I>,
    next: ConnectionState,
) where
    I: Timestamp,
{
    if peer.state == next {
        return;
    }

    tracing::info!(peer = %peer.peer_id, from = ?peer.state, to = ?next, "connection state");
    peer.state = next;
    notices.push(PeerNotice::StateChanged { peer_id: peer.peer_id.clone(), state: next });
}

fn enter_negotiation<C, S, I>(
    notices: &mut Vec<PeerNotice>,
    peer: &mut PeerConnection<C, S, I>,
    now: I,
) where
    I: Timestamp,
{
    if peer.state == ConnectionState::New {
        transition(notices, peer, ConnectionState::Connecting);
    }
    peer.begin_negotiation(now);
}

fn set_data_channel<C, S, I>(
    notices: &mut Vec<PeerNotice>,
    peer: &mut PeerConnection<C, S, I>,
    next: DataChannelState,
) where
    I: Timestamp,
{
    if peer.data_channel_state == next {
        return;
    }

    tracing::debug!(peer = %peer.peer_id, from = ?peer.data_channel_state, to = ?next, "data channel state");
    peer.data_channel_state = next;
    notices.push(PeerNotice::DataChannelChanged { peer_id: peer.peer_id.clone(), state: next });
}
