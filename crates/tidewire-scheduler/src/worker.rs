//! Worker threads.
//!
//! Each worker is an OS thread that owns nothing but its job receiver, a
//! handle to the provider and the shared report sender. It runs one job at a
//! time and exits when its job channel closes.

use std::{sync::Arc, thread};

use tidewire_crypto::{CryptoError, CryptoProvider};
use tokio::sync::mpsc;

use crate::{
    error::SchedulerError,
    task::{CryptoOutput, CryptoRequest, WorkerJob, WorkerReport},
};

/// Run one request against the provider.
pub fn execute<P: CryptoProvider + ?Sized>(
    provider: &P,
    request: CryptoRequest,
) -> Result<CryptoOutput, CryptoError> {
    match request {
        CryptoRequest::Encrypt { plaintext, key } => {
            provider.encrypt(&plaintext, &key).map(CryptoOutput::Text)
        },
        CryptoRequest::Decrypt { ciphertext, key } => {
            provider.decrypt(&ciphertext, &key).map(CryptoOutput::Text)
        },
        CryptoRequest::DeriveKey { secret, salt, info } => {
            provider.derive_key(&secret, &salt, &info).map(CryptoOutput::Key)
        },
    }
}

pub(crate) fn spawn(
    index: usize,
    provider: Arc<dyn CryptoProvider>,
    reports: mpsc::UnboundedSender<WorkerReport>,
) -> Result<mpsc::UnboundedSender<WorkerJob>, SchedulerError> {
    let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel::<WorkerJob>();

    thread::Builder::new()
        .name(format!("tidewire-crypto-{index}"))
        .spawn(move || {
            while let Some(job) = jobs_rx.blocking_recv() {
                let outcome = execute(provider.as_ref(), job.request);
                if reports.send(WorkerReport { task_id: job.task_id, outcome }).is_err() {
                    break;
                }
            }
            tracing::trace!(worker = index, "worker exiting");
        })
        .map_err(|e| SchedulerError::WorkerSpawn { index, reason: e.to_string() })?;

    Ok(jobs_tx)
}
