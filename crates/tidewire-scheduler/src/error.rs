//! Scheduler errors

use thiserror::Error;
use tidewire_crypto::CryptoError;

/// Errors constructing or querying the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Configuration rejected at construction
    #[error("invalid scheduler config: {reason}")]
    InvalidConfig {
        /// Which value was rejected
        reason: &'static str,
    },

    /// Scheduler was destroyed; no further work is accepted
    #[error("scheduler destroyed")]
    Destroyed,

    /// No Tokio runtime to host the coordinator
    #[error("no tokio runtime available for the coordinator")]
    NoRuntime,

    /// A worker thread could not be started
    #[error("failed to spawn worker {index}: {reason}")]
    WorkerSpawn {
        /// Worker index
        index: usize,
        /// OS error text
        reason: String,
    },
}

/// Why a single task's pending result rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Worker ran the task and the operation failed
    #[error("task failed: {0}")]
    Failed(#[from] CryptoError),

    /// Task was dropped by `destroy()` before it completed
    #[error("task abandoned before completion")]
    Abandoned,
}

impl TaskError {
    /// Returns true if the task never ran to completion.
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Abandoned)
    }
}
