//! In-process signaling relay.
//!
//! Stands in for the websocket relay a browser client would use: every
//! session's outbound JSON frames are decoded and delivered to the target's
//! inbound channel, with the relay-reported sender attached.

use std::collections::HashMap;

use tidewire_core::{ChannelSignaling, OutboundSignal, PeerId, SignalingEnvelope};
use tokio::{sync::mpsc, task::JoinHandle};

/// Inbound half a session reads signals from.
pub type Inbox = mpsc::UnboundedSender<(PeerId, SignalingEnvelope)>;

/// Routing table plus the outbound queues still to be attached.
#[derive(Default)]
pub struct Relay {
    inboxes: HashMap<PeerId, Inbox>,
    outbound: Vec<(PeerId, mpsc::UnboundedReceiver<OutboundSignal>)>,
}

impl Relay {
    /// Register `peer_id`. Returns its signaling channel and signal receiver.
    pub fn register(
        &mut self,
        peer_id: &PeerId,
    ) -> (ChannelSignaling, mpsc::UnboundedReceiver<(PeerId, SignalingEnvelope)>) {
        let (signaling, outbound) = ChannelSignaling::new();
        let (inbox, signals) = mpsc::unbounded_channel();
        self.inboxes.insert(peer_id.clone(), inbox);
        self.outbound.push((peer_id.clone(), outbound));
        (signaling, signals)
    }

    /// Start one forwarding task per registered peer.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let Self { inboxes, outbound } = self;
        outbound
            .into_iter()
            .map(|(sender, rx)| tokio::spawn(forward(sender, rx, inboxes.clone())))
            .collect()
    }
}

async fn forward(
    sender: PeerId,
    mut outbound: mpsc::UnboundedReceiver<OutboundSignal>,
    inboxes: HashMap<PeerId, Inbox>,
) {
    while let Some(signal) = outbound.recv().await {
        let decoded = match ChannelSignaling::decode_inbound(sender.clone(), &signal.text) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(from = %sender, error = %e, "relay dropped undecodable frame");
                continue;
            },
        };

        match inboxes.get(&signal.target) {
            Some(inbox) if inbox.send(decoded).is_ok() => {
                tracing::trace!(from = %sender, to = %signal.target, "relayed");
            },
            _ => tracing::warn!(from = %sender, to = %signal.target, "relay target unreachable"),
        }
    }
}
