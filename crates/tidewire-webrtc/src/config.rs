//! Backend configuration

/// Label of the chat data channel.
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "tidewire";

/// Public STUN server used when none is configured.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// WebRTC backend configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRtcConfig {
    /// STUN/TURN URLs; empty means host candidates only
    pub ice_servers: Vec<String>,
    /// Label of the negotiated data channel
    pub data_channel_label: String,
    /// Reliable in-order delivery
    pub ordered: bool,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            ordered: true,
        }
    }
}
