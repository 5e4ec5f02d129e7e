//! Task worker: polls the coordinator, runs registered handlers, reports
//! outcomes through the lease it holds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use procurex_core::TenantId;

use crate::coordinator::RetryCoordinator;
use crate::store::{TaskStore, TaskStoreError};
use crate::task::{AttemptOutcome, RetryTask, TaskStatus, WorkerId};

/// Outcome a handler reports for a single execution.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Work completed; the task is done.
    Success,
    /// Transient failure; retry on the backoff schedule.
    Failure(String),
    /// Transient failure with a known recovery time (e.g. a Retry-After
    /// header from the external service).
    RetryAfter(Duration),
}

/// Task handler function type.
pub type TaskHandler = Box<dyn Fn(&RetryTask) -> TaskOutcome + Send + Sync>;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to poll for new tasks
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
    /// Optional tenant filter
    pub tenant_id: Option<TenantId>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "retry-worker".to_string(),
            tenant_id: None,
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request graceful shutdown.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub tasks_processed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_dead_lettered: u64,
    pub leases_reaped: u64,
    pub uptime_secs: u64,
}

/// Background task worker.
///
/// Claims tasks from the coordinator, executes them with registered handlers,
/// and reports outcomes under the claimed lease. Each poll cycle also runs
/// the lease reaper so crashed siblings are recovered without a separate
/// scheduler.
pub struct TaskWorker<S: TaskStore> {
    coordinator: Arc<RetryCoordinator<S>>,
    handlers: HashMap<String, TaskHandler>,
    worker_id: WorkerId,
}

impl<S: TaskStore + 'static> TaskWorker<S> {
    pub fn new(coordinator: Arc<RetryCoordinator<S>>) -> Self {
        Self {
            coordinator,
            handlers: HashMap::new(),
            worker_id: WorkerId::new(),
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Register a handler for an operation name.
    ///
    /// Patterns: exact name, `prefix.*` category match, or `*` wildcard.
    pub fn register_handler<F>(&mut self, pattern: impl Into<String>, handler: F)
    where
        F: Fn(&RetryTask) -> TaskOutcome + Send + Sync + 'static,
    {
        self.handlers.insert(pattern.into(), Box::new(handler));
    }

    fn get_handler(&self, operation: &str) -> Option<&TaskHandler> {
        if let Some(h) = self.handlers.get(operation) {
            return Some(h);
        }

        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if operation.starts_with(prefix) {
                    return Some(handler);
                }
            }
        }

        self.handlers.get("*")
    }

    /// Claim and execute at most one task. Returns whether a task was run.
    /// For tests and synchronous callers.
    pub fn run_once(&self, tenant_id: Option<TenantId>) -> Result<bool, TaskStoreError> {
        match self.coordinator.lease_next(tenant_id, self.worker_id)? {
            Some(task) => {
                self.execute(task);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn execute(&self, task: RetryTask) -> Option<RetryTask> {
        let Some(lease) = task.lease else {
            error!(task_id = %task.id, "claimed task has no lease");
            return None;
        };

        let operation = task.kind.operation().to_string();
        let outcome = match self.get_handler(&operation) {
            Some(handler) => handler(&task),
            None => {
                warn!(task_id = %task.id, operation = %operation, "no handler for task");
                TaskOutcome::Failure(format!("no handler for operation: {operation}"))
            }
        };

        let attempt_outcome = match outcome {
            TaskOutcome::Success => AttemptOutcome::Success,
            TaskOutcome::Failure(error) => AttemptOutcome::Failure { error },
            TaskOutcome::RetryAfter(delay) => AttemptOutcome::RetryAfter {
                error: "retry after delay".to_string(),
                delay,
            },
        };

        match self.coordinator.complete(task.id, lease.token, attempt_outcome) {
            Ok(completed) => {
                debug!(
                    task_id = %completed.id,
                    status = ?completed.status,
                    "task completed"
                );
                Some(completed)
            }
            Err(TaskStoreError::StaleLease(_)) => {
                // Reclaimed mid-flight; the retried task supersedes this run.
                warn!(task_id = %task.id, "lease went stale during execution");
                None
            }
            Err(e) => {
                error!(task_id = %task.id, error = ?e, "failed to record task outcome");
                None
            }
        }
    }

    /// Spawn the worker in a background thread.
    pub fn spawn(self, config: WorkerConfig) -> WorkerHandle
    where
        S: Send + Sync,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let stats_clone = stats.clone();

        let name = config.name.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || {
                worker_loop(self, config, shutdown_rx, stats_clone);
            })
            .expect("failed to spawn retry worker thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }
}

fn worker_loop<S: TaskStore + 'static>(
    worker: TaskWorker<S>,
    config: WorkerConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    info!(worker = %config.name, id = %worker.worker_id, "retry worker started");
    let start_time = Instant::now();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        {
            let mut s = stats.lock().unwrap();
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        match worker.coordinator.reap_expired_leases() {
            Ok(reaped) => {
                if reaped > 0 {
                    let mut s = stats.lock().unwrap();
                    s.leases_reaped += reaped as u64;
                }
            }
            Err(e) => error!(worker = %config.name, error = ?e, "lease reaping failed"),
        }

        match worker.coordinator.lease_next(config.tenant_id, worker.worker_id) {
            Ok(Some(task)) => {
                let completed = worker.execute(task);

                let mut s = stats.lock().unwrap();
                s.tasks_processed += 1;
                match completed.as_ref().map(|t| &t.status) {
                    Some(TaskStatus::Succeeded) => s.tasks_succeeded += 1,
                    Some(TaskStatus::Dead { .. }) => {
                        s.tasks_failed += 1;
                        s.tasks_dead_lettered += 1;
                    }
                    Some(_) => s.tasks_failed += 1,
                    None => s.tasks_failed += 1,
                }
            }
            Ok(None) => {
                thread::sleep(config.poll_interval);
            }
            Err(e) => {
                error!(worker = %config.name, error = ?e, "failed to claim task");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(worker = %config.name, "retry worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{CoordinatorConfig, EnqueueRequest};
    use crate::store::InMemoryTaskStore;
    use crate::task::TaskKind;

    fn setup() -> (
        Arc<RetryCoordinator<Arc<InMemoryTaskStore>>>,
        Arc<InMemoryTaskStore>,
        TenantId,
    ) {
        let store = InMemoryTaskStore::arc();
        let coordinator = Arc::new(RetryCoordinator::new(
            store.clone(),
            CoordinatorConfig::default(),
        ));
        (coordinator, store, TenantId::new())
    }

    #[test]
    fn run_once_executes_a_successful_task() {
        let (coordinator, _store, tenant) = setup();
        let mut worker = TaskWorker::new(coordinator.clone());
        worker.register_handler("sync", |_task| TaskOutcome::Success);

        let task_id = coordinator
            .enqueue(EnqueueRequest::new(
                tenant,
                TaskKind::custom("sync"),
                serde_json::json!({}),
            ))
            .unwrap();

        assert!(worker.run_once(Some(tenant)).unwrap());
        let stats = coordinator.stats(tenant).unwrap();
        assert_eq!(stats.succeeded, 1);
        assert!(coordinator
            .list_dead_letters(tenant, 10)
            .unwrap()
            .iter()
            .all(|t| t.id != task_id));
    }

    #[test]
    fn failing_task_backs_off_then_dead_letters() {
        let (coordinator, store, tenant) = setup();
        let mut worker = TaskWorker::new(coordinator.clone());
        worker.register_handler("sync", |_task| {
            TaskOutcome::Failure("downstream timeout".to_string())
        });

        let task_id = coordinator
            .enqueue(
                EnqueueRequest::new(tenant, TaskKind::custom("sync"), serde_json::json!({}))
                    .with_max_retries(1),
            )
            .unwrap();

        // First attempt fails and schedules a retry in the future.
        assert!(worker.run_once(Some(tenant)).unwrap());
        assert_eq!(coordinator.stats(tenant).unwrap().failed, 1);
        assert!(!worker.run_once(Some(tenant)).unwrap());

        // Skip the backoff, then exhaust the final retry.
        let mut due = store.get(tenant, task_id).unwrap().unwrap();
        due.next_retry_at = None;
        store.put(due);

        assert!(worker.run_once(Some(tenant)).unwrap());
        let dead = coordinator.list_dead_letters(tenant, 10).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, task_id);
        assert_eq!(dead[0].history.len(), 2);
    }

    #[test]
    fn category_and_wildcard_handlers_route() {
        let (coordinator, _store, tenant) = setup();
        let mut worker = TaskWorker::new(coordinator.clone());
        worker.register_handler("carrier.*", |_task| TaskOutcome::Success);
        worker.register_handler("*", |_task| {
            TaskOutcome::Failure("unroutable".to_string())
        });

        coordinator
            .enqueue(EnqueueRequest::new(
                tenant,
                TaskKind::external_verification("carrier.tracking"),
                serde_json::json!({"request": {}}),
            ))
            .unwrap();
        coordinator
            .enqueue(EnqueueRequest::new(
                tenant,
                TaskKind::custom("unknown.op"),
                serde_json::json!({}),
            ))
            .unwrap();

        assert!(worker.run_once(Some(tenant)).unwrap());
        assert!(worker.run_once(Some(tenant)).unwrap());

        let stats = coordinator.stats(tenant).unwrap();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn missing_handler_counts_as_failure() {
        let (coordinator, _store, tenant) = setup();
        let worker = TaskWorker::new(coordinator.clone());

        coordinator
            .enqueue(EnqueueRequest::new(
                tenant,
                TaskKind::custom("nobody.home"),
                serde_json::json!({}),
            ))
            .unwrap();

        assert!(worker.run_once(Some(tenant)).unwrap());
        assert_eq!(coordinator.stats(tenant).unwrap().failed, 1);
    }

    #[test]
    fn spawned_worker_drains_queue_and_shuts_down() {
        let (coordinator, _store, tenant) = setup();
        let mut worker = TaskWorker::new(coordinator.clone());
        worker.register_handler("*", |_task| TaskOutcome::Success);

        for _ in 0..3 {
            coordinator
                .enqueue(EnqueueRequest::new(
                    tenant,
                    TaskKind::custom("sync"),
                    serde_json::json!({}),
                ))
                .unwrap();
        }

        let handle = worker.spawn(
            WorkerConfig::default()
                .with_name("test-worker")
                .with_tenant(tenant),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stats = coordinator.stats(tenant).unwrap();
            if stats.succeeded == 3 {
                break;
            }
            assert!(Instant::now() < deadline, "worker did not drain the queue");
            thread::sleep(Duration::from_millis(10));
        }

        handle.shutdown();
    }
}
