//! Tidewire Crypto Task Scheduler
//!
//! Offloads encryption, decryption and key derivation to a bounded pool of
//! worker threads with load-aware dispatch and FIFO backpressure.
//!
//! # Architecture
//!
//! - [`TaskScheduler`]: Sans-IO dispatch state. Chooses workers, queues
//!   overflow, tracks in-flight tasks and returns [`SchedulerAction`]s.
//! - [`CryptoTaskScheduler`]: Runtime. One coordinator task executes those
//!   actions against worker threads and resolves each caller's
//!   [`PendingResult`].
//!
//! At most `workers × capacity_per_worker` tasks run at once; the rest wait in
//! submission order. A failing task rejects only its own result.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod runtime;
pub mod scheduler;
pub mod task;
pub mod worker;

pub use error::{SchedulerError, TaskError};
pub use runtime::{CryptoTaskScheduler, PendingResult};
pub use scheduler::{
    DEFAULT_CAPACITY_PER_WORKER, MAX_DEFAULT_WORKERS, SchedulerAction, SchedulerConfig,
    SchedulerStatus, TaskScheduler,
};
pub use task::{CryptoOutput, CryptoRequest, CryptoTask, TaskId, TaskKind, WorkerJob, WorkerReport};
