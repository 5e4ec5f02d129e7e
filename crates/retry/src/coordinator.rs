//! The coordinator: enqueue validation, single-flight coalescing, completion,
//! rollback hooks, and dead-letter resolution.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use procurex_core::{ActorId, DomainError, TenantId};

use crate::events::TaskEvent;
use crate::store::{DeadLetterAction, TaskStats, TaskStore, TaskStoreError};
use crate::task::{
    AttemptOutcome, BackoffPolicy, LeaseToken, RetryTask, TaskId, TaskKind, TaskStatus, WorkerId,
};

/// Rollback hook: restores a pre-change snapshot identified by `backup_ref`.
pub type RollbackFn = Box<dyn Fn(&RetryTask, &str) -> Result<(), String> + Send + Sync>;

/// Listener invoked after a task transitions to the dead-letter state.
pub type DeadLetterListener = Box<dyn Fn(&RetryTask, &TaskEvent) + Send + Sync>;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub backoff: BackoffPolicy,
    /// How long a claim remains exclusive before the reaper may reclaim it.
    pub lease_duration: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            lease_duration: Duration::from_secs(300),
        }
    }
}

/// Parameters for enqueueing a task.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub tenant_id: TenantId,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub requires_rollback: bool,
    pub backup_ref: Option<String>,
}

impl EnqueueRequest {
    pub fn new(tenant_id: TenantId, kind: TaskKind, payload: serde_json::Value) -> Self {
        Self {
            tenant_id,
            kind,
            payload,
            max_retries: 5,
            backoff_multiplier: 2.0,
            requires_rollback: false,
            backup_ref: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_rollback(mut self, backup_ref: impl Into<String>) -> Self {
        self.requires_rollback = true;
        self.backup_ref = Some(backup_ref.into());
        self
    }
}

/// Retry coordinator over a task store.
///
/// Owns the `RetryTask` table exclusively: every mutation goes through here
/// (or through the store primitives it delegates to). Never loses a task; a
/// crash mid-lease is recovered by `reap_expired_leases`.
pub struct RetryCoordinator<S: TaskStore> {
    store: S,
    config: CoordinatorConfig,
    rollback_hooks: RwLock<HashMap<String, RollbackFn>>,
    dead_letter_listener: RwLock<Option<DeadLetterListener>>,
}

impl<S: TaskStore> RetryCoordinator<S> {
    pub fn new(store: S, config: CoordinatorConfig) -> Self {
        Self {
            store,
            config,
            rollback_hooks: RwLock::new(HashMap::new()),
            dead_letter_listener: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Register a rollback hook for an operation name.
    pub fn register_rollback<F>(&self, operation: impl Into<String>, hook: F)
    where
        F: Fn(&RetryTask, &str) -> Result<(), String> + Send + Sync + 'static,
    {
        self.rollback_hooks
            .write()
            .unwrap()
            .insert(operation.into(), Box::new(hook));
    }

    /// Register the listener notified when a task dead-letters.
    pub fn set_dead_letter_listener<F>(&self, listener: F)
    where
        F: Fn(&RetryTask, &TaskEvent) + Send + Sync + 'static,
    {
        *self.dead_letter_listener.write().unwrap() = Some(Box::new(listener));
    }

    /// Enqueue a task for background execution.
    ///
    /// Validates the payload against the kind's contract and coalesces with an
    /// existing in-flight task sharing the same serialization key: the caller
    /// gets the existing task's id and no duplicate work is scheduled.
    pub fn enqueue(&self, request: EnqueueRequest) -> Result<TaskId, DomainError> {
        request
            .kind
            .validate_payload(&request.payload)
            .map_err(DomainError::validation)?;

        if request.backoff_multiplier < 1.0 {
            return Err(DomainError::validation(
                "backoff multiplier must be >= 1.0",
            ));
        }
        if request.requires_rollback && request.backup_ref.is_none() {
            return Err(DomainError::validation(
                "rollback requires a backup reference",
            ));
        }

        if let Some(key) = request.kind.serialization_key() {
            match self.store.find_active_by_key(request.tenant_id, &key) {
                Ok(Some(existing)) => {
                    debug!(key = %key, task_id = %existing.id, "coalesced with in-flight task");
                    return Ok(existing.id);
                }
                Ok(None) => {}
                Err(e) => return Err(DomainError::conflict(e.to_string())),
            }
        }

        let mut task = RetryTask::new(request.tenant_id, request.kind, request.payload)
            .with_max_retries(request.max_retries)
            .with_backoff_multiplier(request.backoff_multiplier);
        if let Some(backup_ref) = request.backup_ref {
            task.requires_rollback = request.requires_rollback;
            task.backup_ref = Some(backup_ref);
        }

        let operation = task.kind.operation().to_string();
        let task_id = self
            .store
            .insert(task)
            .map_err(|e| DomainError::conflict(e.to_string()))?;
        debug!(task_id = %task_id, operation = %operation, "task enqueued");
        Ok(task_id)
    }

    /// Claim the oldest due task for `worker`.
    pub fn lease_next(&self, tenant_id: Option<TenantId>, worker: WorkerId)
        -> Result<Option<RetryTask>, TaskStoreError> {
        self.store
            .lease_next(tenant_id, worker, self.config.lease_duration)
    }

    /// Report the outcome of a leased task.
    ///
    /// Fails with `StaleLease` when the token no longer matches (the task was
    /// reclaimed by the reaper) — the caller's work is discarded and the task
    /// is unaffected. On exhaustion the rollback hook runs exactly once, here,
    /// at the transition into `Dead`.
    pub fn complete(
        &self,
        task_id: TaskId,
        token: LeaseToken,
        outcome: AttemptOutcome,
    ) -> Result<RetryTask, TaskStoreError> {
        let task = self
            .store
            .complete(task_id, token, outcome, &self.config.backoff)?;

        if let TaskStatus::Dead { error, attempts } = &task.status {
            warn!(
                task_id = %task.id,
                operation = %task.kind.operation(),
                attempts,
                error = %error,
                "task dead-lettered"
            );
            let rollback_triggered = self.run_rollback(&task);
            let event = TaskEvent::TaskDeadLettered {
                tenant_id: task.tenant_id,
                task_id: task.id,
                operation: task.kind.operation().to_string(),
                error: error.clone(),
                attempts: *attempts,
                rollback_triggered,
                occurred_at: Utc::now(),
            };
            if let Some(listener) = self.dead_letter_listener.read().unwrap().as_ref() {
                listener(&task, &event);
            }
        }

        Ok(task)
    }

    /// Recover tasks whose lease expired (crashed worker). Returns how many
    /// tasks were reclaimed.
    pub fn reap_expired_leases(&self) -> Result<usize, TaskStoreError> {
        let reclaimed = self.store.reap_expired_leases()?;
        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), "reclaimed expired leases");
        }
        Ok(reclaimed.len())
    }

    /// List dead letters awaiting operator action.
    pub fn list_dead_letters(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<RetryTask>, TaskStoreError> {
        self.store.list_dead_letters(tenant_id, limit)
    }

    /// Operator resolution of a dead letter. Audited via the returned event.
    pub fn resolve_dead_letter(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        action: DeadLetterAction,
        actor: ActorId,
    ) -> Result<(RetryTask, TaskEvent), TaskStoreError> {
        let task = self.store.resolve_dead_letter(tenant_id, task_id, action)?;
        info!(task_id = %task_id, ?action, actor = %actor, "dead letter resolved");
        let event = TaskEvent::DeadLetterResolved {
            tenant_id,
            task_id,
            action,
            actor,
            occurred_at: Utc::now(),
        };
        Ok((task, event))
    }

    /// Age out succeeded tasks past the retention window.
    pub fn purge_terminal(&self, retention: Duration) -> Result<usize, TaskStoreError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        self.store.purge_terminal(cutoff)
    }

    pub fn stats(&self, tenant_id: TenantId) -> Result<TaskStats, TaskStoreError> {
        self.store.stats(tenant_id)
    }

    /// Run the rollback hook for a dead task, once. Hook failures are logged
    /// and do not re-enter the retry loop.
    fn run_rollback(&self, task: &RetryTask) -> bool {
        if !task.requires_rollback {
            return false;
        }
        let Some(backup_ref) = task.backup_ref.as_deref() else {
            error!(task_id = %task.id, "rollback required but no backup reference stored");
            return false;
        };

        let hooks = self.rollback_hooks.read().unwrap();
        match hooks.get(task.kind.operation()) {
            Some(hook) => match hook(task, backup_ref) {
                Ok(()) => {
                    info!(task_id = %task.id, backup_ref = %backup_ref, "rollback completed");
                    true
                }
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "rollback failed");
                    true
                }
            },
            None => {
                error!(
                    task_id = %task.id,
                    operation = %task.kind.operation(),
                    "no rollback hook registered"
                );
                false
            }
        }
    }
}
