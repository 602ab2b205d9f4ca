//! Load-aware task dispatch state machine.
//!
//! Pure bookkeeping for a fixed pool of workers: per-worker load, the FIFO
//! overflow queue and the in-flight map. It performs no I/O; [`submit`] and
//! [`complete`] return [`SchedulerAction`]s for a runtime to execute.
//!
//! # Dispatch Rules
//!
//! - A task goes to the worker with the strictly lowest load, ties broken by
//!   the lowest index.
//! - If that lowest load has reached `capacity_per_worker`, the task joins the
//!   back of the overflow queue. Nothing is ever dropped.
//! - When a task completes, its worker immediately takes the head of the queue.
//!
//! # Invariants
//!
//! - Every load is in `0..=capacity_per_worker`.
//! - The sum of loads equals the number of in-flight tasks.
//! - The queue is non-empty only while every worker is at capacity.
//!
//! [`submit`]: TaskScheduler::submit
//! [`complete`]: TaskScheduler::complete

use std::{
    collections::{HashMap, VecDeque},
    num::NonZeroUsize,
    time::Duration,
};

use tidewire_core::Timestamp;

use crate::{
    error::SchedulerError,
    task::{CryptoTask, TaskId, TaskKind},
};

/// Default per-worker concurrency limit.
pub const DEFAULT_CAPACITY_PER_WORKER: usize = 5;

/// Upper bound on the default worker count.
pub const MAX_DEFAULT_WORKERS: usize = 4;

/// Worker pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of workers
    pub workers: usize,
    /// Tasks a single worker may run at once
    pub capacity_per_worker: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self {
            workers: parallelism.min(MAX_DEFAULT_WORKERS),
            capacity_per_worker: DEFAULT_CAPACITY_PER_WORKER,
        }
    }
}

impl SchedulerConfig {
    /// Reject zero-sized pools.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.workers == 0 {
            return Err(SchedulerError::InvalidConfig { reason: "workers must be non-zero" });
        }
        if self.capacity_per_worker == 0 {
            return Err(SchedulerError::InvalidConfig {
                reason: "capacity_per_worker must be non-zero",
            });
        }
        Ok(())
    }

    /// Tasks that may run at once across the pool.
    pub fn total_capacity(&self) -> usize {
        self.workers * self.capacity_per_worker
    }
}

/// Instructions for the runtime that owns the workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerAction<P, I> {
    /// Send the task to the given worker
    Dispatch {
        /// Worker index
        worker: usize,
        /// Task to run
        task: CryptoTask<P, I>,
    },

    /// Resolve the caller waiting on this task
    Resolve {
        /// Finished task
        task_id: TaskId,
        /// Time from submission to completion
        latency: Duration,
    },
}

/// Snapshot of scheduler load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerStatus {
    /// Worker count
    pub workers: usize,
    /// Tasks waiting in the overflow queue
    pub queued: usize,
    /// Tasks running on workers
    pub active: usize,
    /// Mean load across workers
    pub average_load: f64,
    /// Highest single-worker load
    pub max_load: usize,
}

#[derive(Debug, Clone, Copy)]
struct InFlight<I> {
    worker: usize,
    kind: TaskKind,
    submitted_at: I,
}

/// Pure dispatch state for a fixed worker pool.
#[derive(Debug)]
pub struct TaskScheduler<P, I> {
    capacity_per_worker: usize,
    loads: Vec<usize>,
    queue: VecDeque<CryptoTask<P, I>>,
    in_flight: HashMap<TaskId, InFlight<I>>,
    next_id: u64,
}

impl<P, I: Timestamp> TaskScheduler<P, I> {
    /// Create an idle scheduler.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self {
            capacity_per_worker: config.capacity_per_worker,
            loads: vec![0; config.workers],
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
            next_id: 0,
        })
    }

    /// Accept a task.
    ///
    /// Returns the assigned id and, when a worker has room, the dispatch.
    /// A full pool queues the task; submission itself never fails.
    pub fn submit(
        &mut self,
        kind: TaskKind,
        payload: P,
        now: I,
    ) -> (TaskId, Option<SchedulerAction<P, I>>) {
        let id = TaskId::new(self.next_id);
        self.next_id += 1;

        let task = CryptoTask { id, kind, payload, submitted_at: now };
        match self.select_worker() {
            Some(worker) => (id, Some(self.dispatch(worker, task))),
            None => {
                tracing::debug!(
                    task_id = %id,
                    %kind,
                    queued = self.queue.len() + 1,
                    "pool full, task queued"
                );
                self.queue.push_back(task);
                (id, None)
            },
        }
    }

    /// Record a worker's completion of `task_id`.
    ///
    /// Yields a `Resolve` for the task and, if the queue is non-empty, a
    /// `Dispatch` of the next queued task to the freed worker. Unknown ids
    /// are logged and produce nothing.
    pub fn complete(&mut self, task_id: TaskId, now: I) -> Vec<SchedulerAction<P, I>> {
        let Some(entry) = self.in_flight.remove(&task_id) else {
            tracing::warn!(task_id = %task_id, "completion for unknown task ignored");
            return Vec::new();
        };

        debug_assert!(self.loads[entry.worker] > 0, "completion on idle worker");
        self.loads[entry.worker] = self.loads[entry.worker].saturating_sub(1);

        let latency = now - entry.submitted_at;
        tracing::debug!(
            task_id = %task_id,
            kind = %entry.kind,
            worker = entry.worker,
            latency_ms = latency.as_millis() as u64,
            "task completed"
        );

        let mut actions = vec![SchedulerAction::Resolve { task_id, latency }];
        if let Some(next) = self.queue.pop_front() {
            actions.push(self.dispatch(entry.worker, next));
        }
        actions
    }

    /// Drop every queued and in-flight task and zero all loads.
    ///
    /// Returns the ids that will never resolve.
    pub fn clear(&mut self) -> Vec<TaskId> {
        let mut abandoned: Vec<TaskId> = self.in_flight.drain().map(|(id, _)| id).collect();
        abandoned.extend(self.queue.drain(..).map(|task| task.id));
        abandoned.sort_unstable();
        self.loads.iter_mut().for_each(|load| *load = 0);
        abandoned
    }

    /// Current load snapshot.
    pub fn status(&self) -> SchedulerStatus {
        let active: usize = self.loads.iter().sum();
        SchedulerStatus {
            workers: self.loads.len(),
            queued: self.queue.len(),
            active,
            average_load: active as f64 / self.loads.len() as f64,
            max_load: self.loads.iter().copied().max().unwrap_or(0),
        }
    }

    /// Per-worker loads, indexed by worker.
    pub fn loads(&self) -> &[usize] {
        &self.loads
    }

    /// Whether `task_id` is running on a worker.
    pub fn is_in_flight(&self, task_id: TaskId) -> bool {
        self.in_flight.contains_key(&task_id)
    }

    fn select_worker(&self) -> Option<usize> {
        let (worker, load) = self
            .loads
            .iter()
            .copied()
            .enumerate()
            .min_by(|(a_idx, a), (b_idx, b)| a.cmp(b).then(a_idx.cmp(b_idx)))?;
        (load < self.capacity_per_worker).then_some(worker)
    }

    fn dispatch(&mut self, worker: usize, task: CryptoTask<P, I>) -> SchedulerAction<P, I> {
        self.loads[worker] += 1;
        self.in_flight.insert(
            task.id,
            InFlight { worker, kind: task.kind, submitted_at: task.submitted_at },
        );
        tracing::trace!(task_id = %task.id, worker, load = self.loads[worker], "task dispatched");
        SchedulerAction::Dispatch { worker, task }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use proptest::prelude::*;

    use super::*;

    fn scheduler(workers: usize, capacity: usize) -> TaskScheduler<u32, Instant> {
        TaskScheduler::new(SchedulerConfig { workers, capacity_per_worker: capacity }).unwrap()
    }

    fn dispatched_worker(action: Option<SchedulerAction<u32, Instant>>) -> Option<usize> {
        match action {
            Some(SchedulerAction::Dispatch { worker, .. }) => Some(worker),
            _ => None,
        }
    }

    #[test]
    fn zero_sized_pools_are_rejected() {
        let zero_workers = SchedulerConfig { workers: 0, capacity_per_worker: 5 };
        let zero_capacity = SchedulerConfig { workers: 2, capacity_per_worker: 0 };

        assert!(matches!(
            TaskScheduler::<u32, Instant>::new(zero_workers),
            Err(SchedulerError::InvalidConfig { .. })
        ));
        assert!(matches!(
            TaskScheduler::<u32, Instant>::new(zero_capacity),
            Err(SchedulerError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn default_config_is_bounded() {
        let config = SchedulerConfig::default();
        assert!((1..=MAX_DEFAULT_WORKERS).contains(&config.workers));
        assert_eq!(config.capacity_per_worker, DEFAULT_CAPACITY_PER_WORKER);
    }

    #[test]
    fn least_loaded_worker_wins_ties_by_index() {
        let mut sched = scheduler(3, 5);
        let now = Instant::now();

        let workers: Vec<_> = (0..4)
            .map(|n| dispatched_worker(sched.submit(TaskKind::Encrypt, n, now).1))
            .collect();

        assert_eq!(workers, vec![Some(0), Some(1), Some(2), Some(0)]);
        assert_eq!(sched.loads(), &[2, 1, 1]);
    }

    #[test]
    fn one_past_capacity_is_queued() {
        let mut sched = scheduler(2, 5);
        let now = Instant::now();

        for n in 0..10 {
            assert!(sched.submit(TaskKind::Decrypt, n, now).1.is_some());
        }
        let (overflow, action) = sched.submit(TaskKind::Decrypt, 10, now);

        assert!(action.is_none());
        let status = sched.status();
        assert_eq!(status.queued, 1);
        assert_eq!(status.active, 10);
        assert_eq!(status.max_load, 5);
        assert!((status.average_load - 5.0).abs() < f64::EPSILON);
        assert!(!sched.is_in_flight(overflow));
    }

    #[test]
    fn freed_worker_takes_queue_head() {
        let mut sched = scheduler(2, 1);
        let now = Instant::now();

        let (first, _) = sched.submit(TaskKind::Encrypt, 0, now);
        let (_second, _) = sched.submit(TaskKind::Encrypt, 1, now);
        let (third, _) = sched.submit(TaskKind::Encrypt, 2, now);
        let (fourth, _) = sched.submit(TaskKind::Encrypt, 3, now);

        let later = now + Duration::from_millis(7);
        let actions = sched.complete(first, later);

        assert_eq!(actions.len(), 2);
        assert_eq!(
            actions[0],
            SchedulerAction::Resolve { task_id: first, latency: Duration::from_millis(7) }
        );
        match &actions[1] {
            SchedulerAction::Dispatch { worker, task } => {
                assert_eq!(*worker, 0);
                assert_eq!(task.id, third);
            },
            other => panic!("expected dispatch, got {other:?}"),
        }
        assert!(sched.is_in_flight(third));
        assert!(!sched.is_in_flight(fourth));
        assert_eq!(sched.status().queued, 1);
    }

    #[test]
    fn unknown_completion_is_ignored() {
        let mut sched = scheduler(1, 1);
        let now = Instant::now();
        let (id, _) = sched.submit(TaskKind::DeriveKey, 0, now);

        assert!(sched.complete(TaskId::new(99), now).is_empty());
        assert_eq!(sched.complete(id, now).len(), 1);
        assert!(sched.complete(id, now).is_empty());
        assert_eq!(sched.loads(), &[0]);
    }

    #[test]
    fn clear_abandons_everything() {
        let mut sched = scheduler(1, 1);
        let now = Instant::now();
        let ids: Vec<_> = (0..3).map(|n| sched.submit(TaskKind::Encrypt, n, now).0).collect();

        assert_eq!(sched.clear(), ids);
        let status = sched.status();
        assert_eq!((status.active, status.queued), (0, 0));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Submit,
        Complete(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Submit), (0usize..64).prop_map(Op::Complete)]
    }

    proptest! {
        #[test]
        fn prop_loads_never_exceed_capacity(
            workers in 1usize..5,
            capacity in 1usize..6,
            ops in prop::collection::vec(op(), 0..200),
        ) {
            let mut sched = scheduler(workers, capacity);
            let now = Instant::now();
            let mut running: Vec<TaskId> = Vec::new();
            let mut submitted = 0usize;
            let mut resolved = 0usize;

            for op in ops {
                match op {
                    Op::Submit => {
                        let (id, action) = sched.submit(TaskKind::Encrypt, 0, now);
                        submitted += 1;
                        if action.is_some() {
                            running.push(id);
                        }
                    },
                    Op::Complete(pick) => {
                        if running.is_empty() {
                            continue;
                        }
                        let id = running.remove(pick % running.len());
                        for action in sched.complete(id, now) {
                            match action {
                                SchedulerAction::Resolve { .. } => resolved += 1,
                                SchedulerAction::Dispatch { task, .. } => running.push(task.id),
                            }
                        }
                    },
                }

                let status = sched.status();
                prop_assert!(sched.loads().iter().all(|&load| load <= capacity));
                prop_assert_eq!(status.active, running.len());
                prop_assert!(status.queued == 0 || status.active == workers * capacity);
                prop_assert_eq!(submitted, resolved + status.active + status.queued);
            }
        }
    }
}
