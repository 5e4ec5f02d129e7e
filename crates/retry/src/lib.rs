//! Retry coordinator: a queue of idempotent background tasks with exponential
//! backoff, lease-based mutual exclusion, and a dead-letter terminal state.
//!
//! Every other component hands its unreliable external calls and redo-able
//! work to this crate. Correctness under concurrent workers relies solely on
//! the lease's atomic compare-and-swap; a crashed worker is recovered by the
//! lease reaper, never by operator intervention.

pub mod coordinator;
pub mod events;
pub mod store;
pub mod task;
pub mod worker;

pub use coordinator::{CoordinatorConfig, EnqueueRequest, RetryCoordinator};
pub use events::TaskEvent;
pub use store::{DeadLetterAction, InMemoryTaskStore, TaskStats, TaskStore, TaskStoreError};
pub use task::{
    AttemptOutcome, AttemptRecord, BackoffPolicy, Lease, LeaseToken, RetryTask, TaskId, TaskKind,
    TaskStatus, WorkerId,
};
pub use worker::{TaskHandler, TaskOutcome, TaskWorker, WorkerConfig, WorkerHandle, WorkerStats};
