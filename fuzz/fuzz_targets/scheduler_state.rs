//! Fuzz target for the task dispatch state machine
//!
//! # Strategy
//!
//! - Random pool shapes (1-8 workers, capacity 1-8)
//! - Interleaved submits, completions of running tasks, completions of
//!   unknown ids, and clears
//!
//! # Invariants
//!
//! - No worker load exceeds capacity
//! - Active count equals the number of tasks known to be running
//! - The queue is non-empty only while the pool is saturated
//! - Every submitted task is resolved, running, queued, or cleared

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tidewire_scheduler::{SchedulerAction, SchedulerConfig, TaskId, TaskKind, TaskScheduler};

#[derive(Debug, Arbitrary)]
struct Input {
    workers: u8,
    capacity: u8,
    ops: Vec<Op>,
}

#[derive(Debug, Arbitrary)]
enum Op {
    Submit,
    Complete(u8),
    CompleteUnknown(u64),
    Clear,
    Advance(u16),
}

fuzz_target!(|input: Input| {
    let workers = usize::from(input.workers % 8) + 1;
    let capacity = usize::from(input.capacity % 8) + 1;
    let config = SchedulerConfig { workers, capacity_per_worker: capacity };
    let mut sched: TaskScheduler<(), Instant> = TaskScheduler::new(config).expect("valid config");

    let mut now = Instant::now();
    let mut running: Vec<TaskId> = Vec::new();
    let mut submitted = 0usize;
    let mut finished = 0usize;

    for op in input.ops {
        match op {
            Op::Submit => {
                let (id, action) = sched.submit(TaskKind::Decrypt, (), now);
                submitted += 1;
                if action.is_some() {
                    running.push(id);
                }
            },
            Op::Complete(pick) => {
                if running.is_empty() {
                    continue;
                }
                let id = running.remove(usize::from(pick) % running.len());
                for action in sched.complete(id, now) {
                    match action {
                        SchedulerAction::Resolve { task_id, .. } => {
                            assert_eq!(task_id, id);
                            finished += 1;
                        },
                        SchedulerAction::Dispatch { task, .. } => running.push(task.id),
                    }
                }
            },
            Op::CompleteUnknown(raw) => {
                let id = TaskId::new(raw);
                if !sched.is_in_flight(id) {
                    assert!(sched.complete(id, now).is_empty());
                }
            },
            Op::Clear => {
                finished += sched.clear().len();
                running.clear();
            },
            Op::Advance(ms) => now += Duration::from_millis(u64::from(ms)),
        }

        let status = sched.status();
        assert!(sched.loads().iter().all(|&load| load <= capacity));
        assert_eq!(status.active, running.len());
        assert!(status.queued == 0 || status.active == workers * capacity);
        assert_eq!(submitted, finished + status.active + status.queued);
    }
});
