//! Session runtime.
//!
//! A [`Session`] is the single coordinator for one local peer. It owns the
//! [`PeerConnectionManager`] and is the only code that touches it, selecting
//! over four inputs:
//!
//! - commands from any number of [`SessionHandle`]s
//! - inbound signaling envelopes read from the relay
//! - native events from the backend
//! - the manager's next timer deadline
//!
//! Notices produced by the manager are forwarded on an unbounded channel
//! after every step.

use std::time::Duration;

use tidewire_core::{
    DataPayload, Environment, PeerBackend, PeerConnectionManager, PeerEvent, PeerId, PeerNotice,
    SignalingChannel, SignalingEnvelope,
};
use tokio::sync::{mpsc, oneshot};

use crate::error::SessionError;

enum Command {
    Connect { peer_id: PeerId, reply: oneshot::Sender<Result<(), SessionError>> },
    Send { peer_id: PeerId, payload: DataPayload, reply: oneshot::Sender<Result<(), SessionError>> },
    StartScreenShare { peer_id: PeerId, reply: oneshot::Sender<Result<(), SessionError>> },
    StopScreenShare { peer_id: PeerId, reply: oneshot::Sender<Result<(), SessionError>> },
    Disconnect { peer_id: PeerId, reply: oneshot::Sender<bool> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Cloneable front door to a running [`Session`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Start connecting to `peer_id` as offerer. Idempotent while live.
    pub async fn connect(&self, peer_id: impl Into<PeerId>) -> Result<(), SessionError> {
        let peer_id = peer_id.into();
        self.request(|reply| Command::Connect { peer_id, reply }).await?
    }

    /// Send a text or JSON payload over the peer's data channel.
    pub async fn send(
        &self,
        peer_id: impl Into<PeerId>,
        payload: impl Into<DataPayload>,
    ) -> Result<(), SessionError> {
        let peer_id = peer_id.into();
        let payload = payload.into();
        self.request(|reply| Command::Send { peer_id, payload, reply }).await?
    }

    /// Attach local media to the peer and renegotiate.
    pub async fn start_screen_share(&self, peer_id: impl Into<PeerId>) -> Result<(), SessionError> {
        let peer_id = peer_id.into();
        self.request(|reply| Command::StartScreenShare { peer_id, reply }).await?
    }

    /// Stop sharing local media with the peer.
    pub async fn stop_screen_share(&self, peer_id: impl Into<PeerId>) -> Result<(), SessionError> {
        let peer_id = peer_id.into();
        self.request(|reply| Command::StopScreenShare { peer_id, reply }).await?
    }

    /// Close the connection to `peer_id`. Returns whether one existed.
    pub async fn disconnect(&self, peer_id: impl Into<PeerId>) -> Result<bool, SessionError> {
        let peer_id = peer_id.into();
        self.request(|reply| Command::Disconnect { peer_id, reply }).await
    }

    /// Close every connection and stop the session loop.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }
}

/// Coordinator loop owning one [`PeerConnectionManager`].
pub struct Session<E: Environment, B: PeerBackend, S> {
    manager: PeerConnectionManager<E, B, S>,
    commands: mpsc::UnboundedReceiver<Command>,
    signals: mpsc::UnboundedReceiver<(PeerId, SignalingEnvelope)>,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    notices: mpsc::UnboundedSender<PeerNotice>,
}

impl<E, B, S> Session<E, B, S>
where
    E: Environment,
    B: PeerBackend,
    S: SignalingChannel,
{
    /// Wrap `manager` in a session.
    ///
    /// `signals` carries `(relay-reported sender, envelope)` pairs and
    /// `events` is the receiver the backend was built with. Returns the
    /// session to run, a handle, and the notice stream.
    pub fn new(
        manager: PeerConnectionManager<E, B, S>,
        signals: mpsc::UnboundedReceiver<(PeerId, SignalingEnvelope)>,
        events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<PeerNotice>) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let session = Self { manager, commands, signals, events, notices };
        (session, SessionHandle { commands: commands_tx }, notices_rx)
    }

    /// Run until shutdown is requested or every handle is dropped.
    ///
    /// All peers are closed before returning.
    pub async fn run(mut self) {
        tracing::info!(local = %self.manager.local_id(), "session started");

        loop {
            let timer = self.timer();

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if let Some(reply) = self.on_command(command).await {
                        self.finish().await;
                        let _ = reply.send(());
                        return;
                    }
                },
                Some((sender, envelope)) = self.signals.recv() => {
                    // Failures are logged by the manager and never fatal
                    let _ = self.manager.handle_signal(&sender, envelope).await;
                },
                Some(event) = self.events.recv() => {
                    self.manager.handle_event(event).await;
                },
                () = timer => {
                    let now = self.manager.env().now();
                    self.manager.tick(now).await;
                },
            }

            self.forward_notices();
        }

        self.finish().await;
    }

    /// Handle one command. Returns the shutdown reply if the loop must stop.
    async fn on_command(&mut self, command: Command) -> Option<oneshot::Sender<()>> {
        match command {
            Command::Connect { peer_id, reply } => {
                let result = self.manager.connect(&peer_id).await.map_err(SessionError::from);
                let _ = reply.send(result);
            },
            Command::Send { peer_id, payload, reply } => {
                let result = self.manager.send_message(&peer_id, &payload).map_err(SessionError::from);
                let _ = reply.send(result);
            },
            Command::StartScreenShare { peer_id, reply } => {
                let result =
                    self.manager.start_screen_share(&peer_id).await.map_err(SessionError::from);
                let _ = reply.send(result);
            },
            Command::StopScreenShare { peer_id, reply } => {
                let result =
                    self.manager.stop_screen_share(&peer_id).await.map_err(SessionError::from);
                let _ = reply.send(result);
            },
            Command::Disconnect { peer_id, reply } => {
                let existed = self.manager.disconnect(&peer_id).await;
                let _ = reply.send(existed);
            },
            Command::Shutdown { reply } => return Some(reply),
        }
        None
    }

    /// Sleep until the manager's next deadline, or forever if it has none.
    fn timer(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let env = self.manager.env().clone();
        let wait = self.manager.next_deadline().map(|deadline| {
            let now = env.now();
            if deadline > now { deadline - now } else { Duration::ZERO }
        });

        async move {
            match wait {
                Some(wait) => env.sleep(wait).await,
                None => std::future::pending().await,
            }
        }
    }

    async fn finish(&mut self) {
        self.manager.close_all().await;
        self.forward_notices();
        tracing::info!(local = %self.manager.local_id(), "session stopped");
    }

    fn forward_notices(&mut self) {
        for notice in self.manager.take_notices() {
            if self.notices.send(notice).is_err() {
                tracing::trace!("notice receiver dropped");
            }
        }
    }
}
