//! [`PeerBackend`] over the `webrtc` crate.
//!
//! Each [`WebRtcConnection`] wraps one `RTCPeerConnection`. Native callbacks
//! are translated into [`PeerEvent`]s tagged with the connection id the
//! manager assigned, so events from a replaced connection are recognizably
//! stale.

use std::sync::Arc;

use parking_lot::Mutex;
use tidewire_core::{
    BackendError, ConnectionId, ConnectionState, DataChannelState, IceCandidate, PeerBackend,
    PeerEvent, PeerEventKind, PeerId, SdpKind, SessionDescription,
};
use tokio::{runtime::Handle, sync::mpsc};
use webrtc::{
    api::{
        API, APIBuilder, interceptor_registry::register_default_interceptors,
        media_engine::{MIME_TYPE_VP8, MediaEngine},
    },
    data_channel::{
        RTCDataChannel, data_channel_init::RTCDataChannelInit,
        data_channel_message::DataChannelMessage, data_channel_state::RTCDataChannelState,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
    },
    rtp_transceiver::{rtp_codec::RTCRtpCodecCapability, rtp_sender::RTCRtpSender},
    track::track_local::{TrackLocal, track_local_static_sample::TrackLocalStaticSample},
};

use crate::config::WebRtcConfig;

fn failed(operation: &'static str) -> impl FnOnce(webrtc::Error) -> BackendError {
    move |e| BackendError::new(operation, e.to_string())
}

/// Tags native callbacks with their origin and forwards them.
#[derive(Clone)]
struct EventSink {
    peer_id: PeerId,
    connection_id: ConnectionId,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl EventSink {
    fn emit(&self, kind: PeerEventKind) {
        let event = PeerEvent::new(self.peer_id.clone(), self.connection_id, kind);
        if self.events.send(event).is_err() {
            tracing::trace!(peer = %self.peer_id, "event receiver dropped");
        }
    }
}

/// One native peer connection.
pub struct WebRtcConnection {
    peer_id: PeerId,
    connection_id: ConnectionId,
    pc: Arc<RTCPeerConnection>,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
}

impl WebRtcConnection {
    /// Remote peer.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Id the manager assigned.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Underlying `RTCPeerConnection`.
    pub fn native(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

/// Outbound screen-share track.
///
/// Capture code writes encoded VP8 samples into [`WebRtcStream::track`].
pub struct WebRtcStream {
    track: Arc<TrackLocalStaticSample>,
    sender: Mutex<Option<Arc<RTCRtpSender>>>,
}

impl WebRtcStream {
    /// Track to write samples into.
    pub fn track(&self) -> &Arc<TrackLocalStaticSample> {
        &self.track
    }
}

/// Production backend.
pub struct WebRtcBackend {
    api: API,
    config: WebRtcConfig,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl WebRtcBackend {
    /// Build the WebRTC API stack. Native events are sent on `events`.
    pub fn new(
        config: WebRtcConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self, BackendError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(failed("register_codecs"))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(failed("register_interceptors"))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, config, events })
    }

    /// Active configuration.
    pub fn config(&self) -> &WebRtcConfig {
        &self.config
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer { urls: self.config.ice_servers.clone(), ..Default::default() }]
        };
        RTCConfiguration { ice_servers, ..Default::default() }
    }
}

fn connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn to_rtc(description: &SessionDescription) -> Result<RTCSessionDescription, BackendError> {
    let sdp = description.sdp.clone();
    match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp),
        SdpKind::Answer => RTCSessionDescription::answer(sdp),
    }
    .map_err(failed("parse_description"))
}

/// Wire open, close and message callbacks of a data channel.
fn watch_channel(channel: &Arc<RTCDataChannel>, sink: &EventSink) {
    let on_open = sink.clone();
    channel.on_open(Box::new(move || {
        on_open.emit(PeerEventKind::DataChannelState(DataChannelState::Open));
        Box::pin(async {})
    }));

    let on_close = sink.clone();
    channel.on_close(Box::new(move || {
        on_close.emit(PeerEventKind::DataChannelState(DataChannelState::Closed));
        Box::pin(async {})
    }));

    let on_message = sink.clone();
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        match String::from_utf8(msg.data.to_vec()) {
            Ok(text) => on_message.emit(PeerEventKind::Message(text)),
            Err(_) => tracing::warn!(peer = %on_message.peer_id, "non-UTF-8 data channel message dropped"),
        }
        Box::pin(async {})
    }));
}

impl PeerBackend for WebRtcBackend {
    type Connection = WebRtcConnection;
    type Stream = WebRtcStream;

    async fn create_connection(
        &self,
        peer_id: &PeerId,
        connection_id: ConnectionId,
    ) -> Result<WebRtcConnection, BackendError> {
        let pc = self
            .api
            .new_peer_connection(self.rtc_configuration())
            .await
            .map(Arc::new)
            .map_err(failed("create_connection"))?;

        let sink =
            EventSink { peer_id: peer_id.clone(), connection_id, events: self.events.clone() };
        let channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>> = Arc::new(Mutex::new(None));

        let on_candidate = sink.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            // None marks the end of gathering
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => on_candidate.emit(PeerEventKind::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    })),
                    Err(e) => tracing::warn!(peer = %on_candidate.peer_id, error = %e, "unserializable local candidate"),
                }
            }
            Box::pin(async {})
        }));

        let on_state = sink.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            if let Some(state) = connection_state(state) {
                on_state.emit(PeerEventKind::ConnectionState(state));
            }
            Box::pin(async {})
        }));

        let on_channel = sink.clone();
        let slot = Arc::clone(&channel);
        let label = self.config.data_channel_label.clone();
        pc.on_data_channel(Box::new(move |remote: Arc<RTCDataChannel>| {
            if remote.label() == label {
                on_channel.emit(PeerEventKind::DataChannelState(DataChannelState::Connecting));
                watch_channel(&remote, &on_channel);
                *slot.lock() = Some(remote);
            } else {
                tracing::debug!(peer = %on_channel.peer_id, label = remote.label(), "ignoring foreign data channel");
            }
            Box::pin(async {})
        }));

        Ok(WebRtcConnection { peer_id: peer_id.clone(), connection_id, pc, channel })
    }

    async fn create_data_channel(&self, connection: &WebRtcConnection) -> Result<(), BackendError> {
        let init = RTCDataChannelInit { ordered: Some(self.config.ordered), ..Default::default() };
        let channel = connection
            .pc
            .create_data_channel(&self.config.data_channel_label, Some(init))
            .await
            .map_err(failed("create_data_channel"))?;

        let sink = EventSink {
            peer_id: connection.peer_id.clone(),
            connection_id: connection.connection_id,
            events: self.events.clone(),
        };
        watch_channel(&channel, &sink);
        *connection.channel.lock() = Some(channel);
        Ok(())
    }

    async fn create_offer(
        &self,
        connection: &WebRtcConnection,
    ) -> Result<SessionDescription, BackendError> {
        let offer = connection.pc.create_offer(None).await.map_err(failed("create_offer"))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(
        &self,
        connection: &WebRtcConnection,
    ) -> Result<SessionDescription, BackendError> {
        let answer = connection.pc.create_answer(None).await.map_err(failed("create_answer"))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        connection: &WebRtcConnection,
        description: &SessionDescription,
    ) -> Result<(), BackendError> {
        connection
            .pc
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(failed("set_local_description"))
    }

    async fn set_remote_description(
        &self,
        connection: &WebRtcConnection,
        description: &SessionDescription,
    ) -> Result<(), BackendError> {
        connection
            .pc
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(failed("set_remote_description"))
    }

    async fn rollback_local_offer(
        &self,
        connection: &WebRtcConnection,
    ) -> Result<(), BackendError> {
        let Some(mut rollback) = connection.pc.pending_local_description().await else {
            return Err(BackendError::new("rollback_local_offer", "no pending local offer"));
        };
        rollback.sdp_type = RTCSdpType::Rollback;

        connection
            .pc
            .set_local_description(rollback)
            .await
            .map_err(failed("rollback_local_offer"))
    }

    async fn add_ice_candidate(
        &self,
        connection: &WebRtcConnection,
        candidate: &IceCandidate,
    ) -> Result<(), BackendError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };
        connection.pc.add_ice_candidate(init).await.map_err(failed("add_ice_candidate"))
    }

    fn send_data(&self, connection: &WebRtcConnection, text: &str) -> Result<(), BackendError> {
        let channel = connection
            .channel
            .lock()
            .clone()
            .ok_or_else(|| BackendError::new("send_data", "no data channel"))?;

        if channel.ready_state() != RTCDataChannelState::Open {
            return Err(BackendError::new(
                "send_data",
                format!("data channel is {}", channel.ready_state()),
            ));
        }

        let runtime =
            Handle::try_current().map_err(|e| BackendError::new("send_data", e.to_string()))?;
        let peer_id = connection.peer_id.clone();
        let text = text.to_string();
        runtime.spawn(async move {
            if let Err(e) = channel.send_text(text).await {
                tracing::warn!(peer = %peer_id, error = %e, "data channel send failed");
            }
        });
        Ok(())
    }

    async fn open_local_media(&self, peer_id: &PeerId) -> Result<WebRtcStream, BackendError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability { mime_type: MIME_TYPE_VP8.to_owned(), ..Default::default() },
            "screen".to_owned(),
            format!("tidewire-{peer_id}"),
        ));
        Ok(WebRtcStream { track, sender: Mutex::new(None) })
    }

    async fn attach_stream(
        &self,
        connection: &WebRtcConnection,
        stream: &WebRtcStream,
    ) -> Result<bool, BackendError> {
        let track: Arc<dyn TrackLocal + Send + Sync> = stream.track.clone();
        let sender = connection.pc.add_track(track).await.map_err(failed("attach_stream"))?;
        *stream.sender.lock() = Some(sender);
        Ok(true)
    }

    async fn release_stream(&self, connection: &WebRtcConnection, stream: WebRtcStream) {
        let sender = stream.sender.lock().take();
        if let Some(sender) = sender {
            if let Err(e) = connection.pc.remove_track(&sender).await {
                tracing::warn!(peer = %connection.peer_id, error = %e, "remove_track failed");
            }
        }
    }

    async fn close(&self, connection: WebRtcConnection) {
        if let Err(e) = connection.pc.close().await {
            tracing::warn!(peer = %connection.peer_id, error = %e, "peer connection close failed");
        }
    }
}
