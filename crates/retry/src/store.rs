//! Task storage: lease claims, completion, reaping, dead letters.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use procurex_core::TenantId;

use crate::task::{
    AttemptOutcome, BackoffPolicy, Lease, LeaseToken, RetryTask, TaskId, TaskStatus, WorkerId,
};

/// Task store abstraction.
///
/// Any storage with atomic conditional writes can implement this; the claim
/// and completion operations are the compare-and-swap points the whole
/// concurrency model rests on.
pub trait TaskStore: Send + Sync {
    /// Insert a new task.
    fn insert(&self, task: RetryTask) -> Result<TaskId, TaskStoreError>;

    /// Get a task by ID.
    fn get(&self, tenant_id: TenantId, task_id: TaskId) -> Result<Option<RetryTask>, TaskStoreError>;

    /// Find the non-terminal task holding the given serialization key, if any.
    fn find_active_by_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<RetryTask>, TaskStoreError>;

    /// Atomically claim the oldest claimable task: install a fresh lease and
    /// return the task. Exactly one concurrent caller wins any given task.
    fn lease_next(
        &self,
        tenant_id: Option<TenantId>,
        worker: WorkerId,
        lease_duration: Duration,
    ) -> Result<Option<RetryTask>, TaskStoreError>;

    /// Complete a leased task. Fails with `StaleLease` (and changes nothing)
    /// when the token does not match the currently held lease.
    fn complete(
        &self,
        task_id: TaskId,
        token: LeaseToken,
        outcome: AttemptOutcome,
        policy: &BackoffPolicy,
    ) -> Result<RetryTask, TaskStoreError>;

    /// Reset every task whose lease has expired back to claimable.
    /// Returns the reclaimed task ids.
    fn reap_expired_leases(&self) -> Result<Vec<TaskId>, TaskStoreError>;

    /// List tasks in the dead-letter state.
    fn list_dead_letters(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<RetryTask>, TaskStoreError>;

    /// Resolve a dead-lettered task by requeueing or discarding it.
    fn resolve_dead_letter(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        action: DeadLetterAction,
    ) -> Result<RetryTask, TaskStoreError>;

    /// Drop terminal tasks (succeeded, or dead letters already discarded)
    /// older than the cutoff. Returns how many were purged. Dead letters
    /// still awaiting action are never purged.
    fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<usize, TaskStoreError>;

    /// Queue statistics.
    fn stats(&self, tenant_id: TenantId) -> Result<TaskStats, TaskStoreError>;
}

impl<T> TaskStore for Arc<T>
where
    T: TaskStore + ?Sized,
{
    fn insert(&self, task: RetryTask) -> Result<TaskId, TaskStoreError> {
        (**self).insert(task)
    }

    fn get(&self, tenant_id: TenantId, task_id: TaskId) -> Result<Option<RetryTask>, TaskStoreError> {
        (**self).get(tenant_id, task_id)
    }

    fn find_active_by_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<RetryTask>, TaskStoreError> {
        (**self).find_active_by_key(tenant_id, key)
    }

    fn lease_next(
        &self,
        tenant_id: Option<TenantId>,
        worker: WorkerId,
        lease_duration: Duration,
    ) -> Result<Option<RetryTask>, TaskStoreError> {
        (**self).lease_next(tenant_id, worker, lease_duration)
    }

    fn complete(
        &self,
        task_id: TaskId,
        token: LeaseToken,
        outcome: AttemptOutcome,
        policy: &BackoffPolicy,
    ) -> Result<RetryTask, TaskStoreError> {
        (**self).complete(task_id, token, outcome, policy)
    }

    fn reap_expired_leases(&self) -> Result<Vec<TaskId>, TaskStoreError> {
        (**self).reap_expired_leases()
    }

    fn list_dead_letters(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<RetryTask>, TaskStoreError> {
        (**self).list_dead_letters(tenant_id, limit)
    }

    fn resolve_dead_letter(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        action: DeadLetterAction,
    ) -> Result<RetryTask, TaskStoreError> {
        (**self).resolve_dead_letter(tenant_id, task_id, action)
    }

    fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<usize, TaskStoreError> {
        (**self).purge_terminal(cutoff)
    }

    fn stats(&self, tenant_id: TenantId) -> Result<TaskStats, TaskStoreError> {
        (**self).stats(tenant_id)
    }
}

/// Task store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),
    #[error("stale lease for task {0}: the lease was reclaimed or completed by another holder")]
    StaleLease(TaskId),
    #[error("task {0} is not dead-lettered")]
    NotDeadLettered(TaskId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Operator action on a dead-lettered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterAction {
    /// Reset retries and put the task back in the queue.
    Requeue,
    /// Acknowledge and drop the task from the active queue (kept for audit).
    Discard,
}

/// Queue statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TaskStats {
    pub pending: usize,
    pub leased: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dead: usize,
}

/// In-memory task store for tests/dev.
///
/// The single `RwLock` write guard makes claim and completion atomic; a
/// database-backed implementation would use conditional writes on the lease
/// token instead.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, RetryTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Test/dev hook: overwrite a stored task wholesale.
    pub fn put(&self, task: RetryTask) {
        self.tasks.write().unwrap().insert(task.id, task);
    }
}

impl TaskStore for InMemoryTaskStore {
    fn insert(&self, task: RetryTask) -> Result<TaskId, TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        if tasks.contains_key(&task.id) {
            return Err(TaskStoreError::AlreadyExists(task.id));
        }
        let id = task.id;
        tasks.insert(id, task);
        Ok(id)
    }

    fn get(&self, tenant_id: TenantId, task_id: TaskId) -> Result<Option<RetryTask>, TaskStoreError> {
        let tasks = self.tasks.read().unwrap();
        match tasks.get(&task_id) {
            Some(task) if task.tenant_id == tenant_id => Ok(Some(task.clone())),
            Some(_) => Err(TaskStoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    fn find_active_by_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<RetryTask>, TaskStoreError> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks
            .values()
            .find(|t| {
                t.tenant_id == tenant_id
                    && !t.status.is_terminal()
                    && t.serialization_key.as_deref() == Some(key)
            })
            .cloned())
    }

    fn lease_next(
        &self,
        tenant_id: Option<TenantId>,
        worker: WorkerId,
        lease_duration: Duration,
    ) -> Result<Option<RetryTask>, TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        let now = Utc::now();

        // Serialization keys currently held by an in-flight lease.
        let held_keys: Vec<String> = tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Leased))
            .filter_map(|t| t.serialization_key.clone())
            .collect();

        let mut candidates: Vec<_> = tasks
            .values()
            .filter(|t| {
                t.is_claimable(now)
                    && tenant_id.is_none_or(|tenant| t.tenant_id == tenant)
                    && t.serialization_key
                        .as_ref()
                        .is_none_or(|k| !held_keys.contains(k))
            })
            .map(|t| (t.created_at, t.id))
            .collect();

        // FIFO by creation time.
        candidates.sort();

        if let Some((_, task_id)) = candidates.first() {
            let expires_at = now + chrono::Duration::from_std(lease_duration).unwrap_or_default();
            if let Some(task) = tasks.get_mut(task_id) {
                task.mark_leased(Lease::new(worker, expires_at));
                return Ok(Some(task.clone()));
            }
        }

        Ok(None)
    }

    fn complete(
        &self,
        task_id: TaskId,
        token: LeaseToken,
        outcome: AttemptOutcome,
        policy: &BackoffPolicy,
    ) -> Result<RetryTask, TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        let task = tasks
            .get_mut(&task_id)
            .ok_or(TaskStoreError::NotFound(task_id))?;

        let holds_lease = matches!(task.status, TaskStatus::Leased)
            && task.lease.map(|l| l.token) == Some(token);
        if !holds_lease {
            return Err(TaskStoreError::StaleLease(task_id));
        }

        let started_at = task.updated_at;
        match outcome {
            AttemptOutcome::Success => task.record_success(started_at),
            AttemptOutcome::Failure { error } => {
                task.record_failure(error, started_at, policy, None)
            }
            AttemptOutcome::RetryAfter { error, delay } => {
                task.record_failure(error, started_at, policy, Some(delay))
            }
        }

        Ok(task.clone())
    }

    fn reap_expired_leases(&self) -> Result<Vec<TaskId>, TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        let now = Utc::now();
        let mut reclaimed = Vec::new();

        for task in tasks.values_mut() {
            if matches!(task.status, TaskStatus::Leased)
                && task.lease.is_some_and(|l| l.is_expired(now))
            {
                task.reclaim();
                reclaimed.push(task.id);
            }
        }

        Ok(reclaimed)
    }

    fn list_dead_letters(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<RetryTask>, TaskStoreError> {
        let tasks = self.tasks.read().unwrap();
        let mut result: Vec<_> = tasks
            .values()
            .filter(|t| t.tenant_id == tenant_id && matches!(t.status, TaskStatus::Dead { .. }))
            .cloned()
            .collect();

        result.sort_by_key(|t| t.updated_at);
        result.truncate(limit);
        Ok(result)
    }

    fn resolve_dead_letter(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        action: DeadLetterAction,
    ) -> Result<RetryTask, TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        let task = tasks
            .get_mut(&task_id)
            .ok_or(TaskStoreError::NotFound(task_id))?;

        if task.tenant_id != tenant_id {
            return Err(TaskStoreError::TenantIsolation);
        }
        if !matches!(task.status, TaskStatus::Dead { .. }) {
            return Err(TaskStoreError::NotDeadLettered(task_id));
        }

        match action {
            DeadLetterAction::Requeue => {
                task.status = TaskStatus::Pending;
                task.retry_count = 0;
                task.next_retry_at = None;
                task.updated_at = Utc::now();
            }
            DeadLetterAction::Discard => {
                // Terminal either way; the task stays for audit but is no
                // longer listed as a dead letter awaiting action.
                let id = task.id;
                let resolved = task.clone();
                tasks.remove(&id);
                return Ok(resolved);
            }
        }

        Ok(task.clone())
    }

    fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<usize, TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap();
        let before = tasks.len();
        // Dead letters stay until resolved; only succeeded tasks age out here.
        tasks.retain(|_, t| {
            !(matches!(t.status, TaskStatus::Succeeded) && t.updated_at < cutoff)
        });
        Ok(before - tasks.len())
    }

    fn stats(&self, tenant_id: TenantId) -> Result<TaskStats, TaskStoreError> {
        let tasks = self.tasks.read().unwrap();
        let mut stats = TaskStats::default();

        for task in tasks.values() {
            if task.tenant_id != tenant_id {
                continue;
            }
            match &task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Leased => stats.leased += 1,
                TaskStatus::Succeeded => stats.succeeded += 1,
                TaskStatus::Failed { .. } => stats.failed += 1,
                TaskStatus::Dead { .. } => stats.dead += 1,
            }
        }

        Ok(stats)
    }
}
