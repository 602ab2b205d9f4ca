//! Deterministic simulation harness for Tidewire.
//!
//! Test doubles for every seam of the connection core:
//!
//! - [`SimEnv`]: manual clock and seeded RNG behind [`tidewire_core::Environment`]
//! - [`LoopbackNetwork`] / [`LoopbackBackend`]: in-process native connections
//!   behind [`tidewire_core::PeerBackend`]
//! - [`MemoryRelay`] / [`RecordingSignaling`]: signaling channels behind
//!   [`tidewire_core::SignalingChannel`]
//! - [`SimCluster`]: several real managers wired together, routed by hand
//!
//! Same seed, same inputs, same outcome: the seed picks the order in which
//! [`SimCluster`] routes nodes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod loopback;
pub mod relay;
pub mod sim_env;

pub use cluster::{Delivery, SignalFailure, SimCluster, SimManager, SimNode};
pub use loopback::{
    ConnectionSnapshot, DEFAULT_CANDIDATES_PER_CONNECTION, LoopbackBackend, LoopbackConnection,
    LoopbackNetwork, LoopbackStream,
};
pub use relay::{MemoryRelay, RecordingSignaling, RelayEndpoint};
pub use sim_env::{SimEnv, SimInstant};
