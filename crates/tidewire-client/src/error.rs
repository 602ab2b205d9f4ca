//! Client errors

use thiserror::Error;
use tidewire_core::{PeerError, SendError};
use tidewire_scheduler::TaskError;

/// Errors from the secure inbox.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InboxError {
    /// No key installed yet
    #[error("no active key")]
    NoKey,

    /// Worker task rejected or was abandoned
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Worker returned the wrong kind of output
    #[error("unexpected {expected} output from worker")]
    UnexpectedOutput {
        /// What was expected
        expected: &'static str,
    },
}

/// Errors returned through a [`crate::SessionHandle`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Session loop has stopped
    #[error("session closed")]
    Closed,

    /// Peer operation failed
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// Data channel send failed
    #[error(transparent)]
    Send(#[from] SendError),
}
