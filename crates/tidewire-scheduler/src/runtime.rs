//! Worker pool runtime.
//!
//! [`CryptoTaskScheduler`] owns a single coordinator task and a fixed set of
//! worker threads. The coordinator is the only holder of the
//! [`TaskScheduler`] state; callers and workers talk to it exclusively through
//! channels, so loads, the overflow queue and the in-flight map are never
//! shared.
//!
//! ```text
//! callers ──Command──► coordinator ──WorkerJob──► worker threads
//!    ▲                      │  ▲                        │
//!    └──── PendingResult ◄──┘  └──────WorkerReport──────┘
//! ```

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};

use tidewire_crypto::CryptoProvider;
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
};

use crate::{
    error::{SchedulerError, TaskError},
    scheduler::{SchedulerAction, SchedulerConfig, SchedulerStatus, TaskScheduler},
    task::{CryptoOutput, CryptoRequest, CryptoTask, TaskId, WorkerJob, WorkerReport},
    worker,
};

type Reply = oneshot::Sender<Result<CryptoOutput, TaskError>>;
type Action = SchedulerAction<CryptoRequest, Instant>;

enum Command {
    Submit { request: CryptoRequest, reply: Reply },
    Status { reply: oneshot::Sender<SchedulerStatus> },
    Destroy,
}

/// Result of a submitted task.
///
/// Resolves with the worker's output, `TaskError::Failed` if the operation
/// failed, or `TaskError::Abandoned` if the scheduler was destroyed first.
#[must_use = "a pending result does nothing unless awaited"]
#[derive(Debug)]
pub struct PendingResult {
    receiver: oneshot::Receiver<Result<CryptoOutput, TaskError>>,
}

impl Future for PendingResult {
    type Output = Result<CryptoOutput, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Abandoned)))
    }
}

/// Bounded pool of cryptographic workers with load-aware dispatch.
///
/// Must be constructed inside a Tokio runtime, which hosts the coordinator.
/// Dropping the scheduler destroys it.
#[derive(Debug)]
pub struct CryptoTaskScheduler {
    commands: mpsc::UnboundedSender<Command>,
    config: SchedulerConfig,
}

impl CryptoTaskScheduler {
    /// Start the coordinator and `config.workers` worker threads.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` for zero workers or zero capacity
    /// - `SchedulerError::NoRuntime` outside a Tokio runtime
    /// - `SchedulerError::WorkerSpawn` if a thread cannot be started
    pub fn new<P: CryptoProvider>(
        config: SchedulerConfig,
        provider: P,
    ) -> Result<Self, SchedulerError> {
        let state = TaskScheduler::new(config)?;
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let provider: Arc<dyn CryptoProvider> = Arc::new(provider);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let workers = (0..config.workers)
            .map(|index| worker::spawn(index, Arc::clone(&provider), reports_tx.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator { state, workers, resolvers: HashMap::new() };
        runtime.spawn(coordinator.run(commands_rx, reports_rx));

        tracing::info!(
            workers = config.workers,
            capacity_per_worker = config.capacity_per_worker,
            "crypto scheduler started"
        );
        Ok(Self { commands, config })
    }

    /// Configuration the pool was started with.
    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Submit one task. Never fails synchronously.
    pub fn submit(&self, request: CryptoRequest) -> PendingResult {
        let (reply, receiver) = oneshot::channel();
        // A closed coordinator drops the reply, which resolves as Abandoned
        let _ = self.commands.send(Command::Submit { request, reply });
        PendingResult { receiver }
    }

    /// Submit every request, then wait for all of them.
    ///
    /// Fails fast: the first rejected task rejects the batch. Outputs are in
    /// request order.
    pub async fn submit_batch<R>(&self, requests: R) -> Result<Vec<CryptoOutput>, TaskError>
    where
        R: IntoIterator<Item = CryptoRequest>,
    {
        let pending: Vec<PendingResult> = requests.into_iter().map(|r| self.submit(r)).collect();
        futures::future::try_join_all(pending).await
    }

    /// Current load snapshot.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::Destroyed` once the scheduler has been destroyed
    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        let (reply, receiver) = oneshot::channel();
        self.commands.send(Command::Status { reply }).map_err(|_| SchedulerError::Destroyed)?;
        receiver.await.map_err(|_| SchedulerError::Destroyed)
    }

    /// Terminate the workers and abandon every queued and running task.
    ///
    /// Commands sent before this call are handled first. Idempotent.
    pub fn destroy(&self) {
        let _ = self.commands.send(Command::Destroy);
    }
}

impl Drop for CryptoTaskScheduler {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct Coordinator {
    state: TaskScheduler<CryptoRequest, Instant>,
    workers: Vec<mpsc::UnboundedSender<WorkerJob>>,
    resolvers: HashMap<TaskId, Reply>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut reports: mpsc::UnboundedReceiver<WorkerReport>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Submit { request, reply }) => self.on_submit(request, reply),
                    Some(Command::Status { reply }) => {
                        let _ = reply.send(self.state.status());
                    },
                    Some(Command::Destroy) | None => break,
                },
                Some(report) = reports.recv() => self.on_report(report),
            }
        }

        let abandoned = self.state.clear();
        self.resolvers.clear();
        self.workers.clear();
        tracing::info!(abandoned = abandoned.len(), "crypto scheduler destroyed");
    }

    fn on_submit(&mut self, request: CryptoRequest, reply: Reply) {
        let kind = request.kind();
        let (task_id, action) = self.state.submit(kind, request, Instant::now());
        self.resolvers.insert(task_id, reply);
        if let Some(action) = action {
            self.apply(VecDeque::from([action]), task_id, None);
        }
    }

    fn on_report(&mut self, report: WorkerReport) {
        let actions = self.state.complete(report.task_id, Instant::now());
        self.apply(actions.into(), report.task_id, Some(report.outcome.map_err(TaskError::from)));
    }

    /// Execute actions until none remain. `outcome` belongs to `reported`.
    fn apply(
        &mut self,
        mut actions: VecDeque<Action>,
        reported: TaskId,
        mut outcome: Option<Result<CryptoOutput, TaskError>>,
    ) {
        while let Some(action) = actions.pop_front() {
            match action {
                SchedulerAction::Dispatch { worker, task } => {
                    actions.extend(self.send_job(worker, task));
                },
                SchedulerAction::Resolve { task_id, .. } => {
                    let reply = self.resolvers.remove(&task_id);
                    if task_id != reported {
                        continue;
                    }
                    if let (Some(reply), Some(outcome)) = (reply, outcome.take()) {
                        let _ = reply.send(outcome);
                    }
                },
            }
        }
    }

    /// Hand a task to its worker. A dead worker abandons the task and frees
    /// its slot, which may dispatch the next queued task.
    fn send_job(&mut self, worker: usize, task: CryptoTask<CryptoRequest, Instant>) -> Vec<Action> {
        let task_id = task.id;
        let job = WorkerJob { task_id, request: task.payload };
        if self.workers[worker].send(job).is_ok() {
            return Vec::new();
        }

        tracing::error!(task_id = %task_id, worker, "worker gone, task abandoned");
        self.resolvers.remove(&task_id);
        self.state.complete(task_id, Instant::now())
    }
}
