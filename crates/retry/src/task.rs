//! Core task types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use procurex_core::{Entity, PurchaseOrderId, TenantId, VendorId};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a worker process/thread pulling tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fencing token proving current ownership of a lease.
///
/// A fresh token is minted on every successful claim, so a reclaimed task can
/// never be completed with a token from a previous lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseToken(pub Uuid);

impl LeaseToken {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for LeaseToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task kind for routing to appropriate handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Call out to an external verification service (carrier lookup, document
    /// verification) on behalf of the correlation engine.
    ExternalVerification { service: String },
    /// Recompute the three-way match for one purchase order.
    MatchRecompute { purchase_order_id: PurchaseOrderId },
    /// Recalculate one vendor's confidence profile.
    ScoreRecalculation { vendor_id: VendorId },
    /// Generic/custom work.
    Custom { operation: String },
}

impl TaskKind {
    pub fn external_verification(service: impl Into<String>) -> Self {
        Self::ExternalVerification {
            service: service.into(),
        }
    }

    pub fn match_recompute(purchase_order_id: PurchaseOrderId) -> Self {
        Self::MatchRecompute { purchase_order_id }
    }

    pub fn score_recalculation(vendor_id: VendorId) -> Self {
        Self::ScoreRecalculation { vendor_id }
    }

    pub fn custom(operation: impl Into<String>) -> Self {
        Self::Custom {
            operation: operation.into(),
        }
    }

    /// Operation name used for handler routing.
    pub fn operation(&self) -> &str {
        match self {
            TaskKind::ExternalVerification { service } => service,
            TaskKind::MatchRecompute { .. } => "match.recompute",
            TaskKind::ScoreRecalculation { .. } => "score.recalculate",
            TaskKind::Custom { operation } => operation,
        }
    }

    /// Single-flight key: at most one in-flight task per key at a time.
    ///
    /// Match recomputation is serialized per purchase order and score
    /// recalculation per vendor; other kinds run freely in parallel.
    pub fn serialization_key(&self) -> Option<String> {
        match self {
            TaskKind::MatchRecompute { purchase_order_id } => {
                Some(format!("{purchase_order_id}/match"))
            }
            TaskKind::ScoreRecalculation { vendor_id } => Some(format!("{vendor_id}/score")),
            _ => None,
        }
    }

    /// Minimal shape check for the opaque context payload.
    ///
    /// Kinds that carry their full context in the variant accept an empty
    /// payload; kinds that need call context require a JSON object so the
    /// handler can deserialize it into its typed request.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), String> {
        match self {
            TaskKind::MatchRecompute { .. } | TaskKind::ScoreRecalculation { .. } => {
                if payload.is_null() || payload.is_object() {
                    Ok(())
                } else {
                    Err("payload must be a JSON object or null".to_string())
                }
            }
            TaskKind::ExternalVerification { .. } | TaskKind::Custom { .. } => {
                if payload.is_object() {
                    Ok(())
                } else {
                    Err("payload must be a JSON object".to_string())
                }
            }
        }
    }
}

/// Task execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting to be claimed
    Pending,
    /// Claimed by a worker holding the lease
    Leased,
    /// Completed successfully
    Succeeded,
    /// Failed, claimable again once the backoff elapses
    Failed { error: String, attempt: u32 },
    /// Exhausted retries; terminal, surfaced for manual action
    Dead { error: String, attempts: u32 },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Dead { .. })
    }

    pub fn is_claimable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Failed { .. })
    }
}

/// An active lease: token + holder + expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub token: LeaseToken,
    pub worker: WorkerId,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(worker: WorkerId, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: LeaseToken::new(),
            worker,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Backoff configuration shared by all tasks of a coordinator.
///
/// The per-task `backoff_multiplier` scales the exponent base; delay for the
/// n-th retry is `base * multiplier^n`, capped at `cap`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(3600),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before the given retry (1-indexed: the first retry waits
    /// `base * multiplier`).
    pub fn delay_for_retry(&self, multiplier: f64, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base.as_millis() as f64;
        let cap_ms = self.cap.as_millis() as f64;
        let delay_ms = (base_ms * multiplier.powi(retry as i32)).min(cap_ms);

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

/// Record of a task execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// Outcome a completer reports for a leased task.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success,
    Failure { error: String },
    /// Failure with an explicit retry delay overriding the backoff schedule.
    RetryAfter { error: String, delay: Duration },
}

/// A retryable unit of idempotent background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryTask {
    pub id: TaskId,
    pub tenant_id: TenantId,
    /// Kind routes the task to its handler and carries typed context.
    pub kind: TaskKind,
    /// Opaque context needed to redo the work; shape-checked at enqueue,
    /// deserialized into the handler's typed request on execution.
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    /// Earliest time the task may be claimed again.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub lease: Option<Lease>,
    /// When true, a pre-change snapshot is restored on dead-letter.
    pub requires_rollback: bool,
    pub backup_ref: Option<String>,
    /// See [`TaskKind::serialization_key`].
    pub serialization_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<AttemptRecord>,
}

impl RetryTask {
    pub fn new(tenant_id: TenantId, kind: TaskKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        let serialization_key = kind.serialization_key();
        Self {
            id: TaskId::new(),
            tenant_id,
            kind,
            payload,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: 5,
            backoff_multiplier: 2.0,
            next_retry_at: None,
            lease: None,
            requires_rollback: false,
            backup_ref: None,
            serialization_key,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
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

    /// Whether the task may be claimed right now.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable()
            && match self.next_retry_at {
                Some(at) => at <= now,
                None => true,
            }
    }

    /// Install a lease and move to `Leased`.
    pub fn mark_leased(&mut self, lease: Lease) {
        self.status = TaskStatus::Leased;
        self.lease = Some(lease);
        self.updated_at = Utc::now();
    }

    /// Record a successful attempt and move to `Succeeded`.
    pub fn record_success(&mut self, started_at: DateTime<Utc>) {
        let now = Utc::now();
        let attempt = self.retry_count + 1;
        self.status = TaskStatus::Succeeded;
        self.lease = None;
        self.next_retry_at = None;
        self.updated_at = now;
        self.history.push(AttemptRecord {
            attempt,
            started_at,
            finished_at: now,
            success: true,
            error: None,
        });
    }

    /// Record a failed attempt: schedule a retry with backoff, or move to
    /// `Dead` once retries are exhausted.
    pub fn record_failure(
        &mut self,
        error: String,
        started_at: DateTime<Utc>,
        policy: &BackoffPolicy,
        explicit_delay: Option<Duration>,
    ) {
        let now = Utc::now();
        let attempt = self.retry_count + 1;
        self.lease = None;
        self.updated_at = now;
        self.history.push(AttemptRecord {
            attempt,
            started_at,
            finished_at: now,
            success: false,
            error: Some(error.clone()),
        });

        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            let delay = explicit_delay
                .unwrap_or_else(|| policy.delay_for_retry(self.backoff_multiplier, self.retry_count));
            self.next_retry_at =
                Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            self.status = TaskStatus::Failed {
                error,
                attempt: self.retry_count,
            };
        } else {
            self.next_retry_at = None;
            self.status = TaskStatus::Dead {
                error,
                attempts: self.retry_count,
            };
        }
    }

    /// Reset an expired lease back to claimable (crash recovery).
    pub fn reclaim(&mut self) {
        self.status = TaskStatus::Pending;
        self.lease = None;
        self.updated_at = Utc::now();
    }
}

impl Entity for RetryTask {
    type Id = TaskId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_tenant() -> TenantId {
        TenantId::new()
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(3600));

        assert_eq!(policy.delay_for_retry(2.0, 1), Duration::from_secs(60));
        assert_eq!(policy.delay_for_retry(2.0, 2), Duration::from_secs(120));
        assert_eq!(policy.delay_for_retry(2.0, 3), Duration::from_secs(240));
        // 30 * 2^10 = 30720s, capped.
        assert_eq!(policy.delay_for_retry(2.0, 10), Duration::from_secs(3600));
    }

    #[test]
    fn multiplier_one_gives_constant_delay() {
        let policy = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(3600));

        assert_eq!(policy.delay_for_retry(1.0, 1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_retry(1.0, 5), Duration::from_secs(10));
    }

    #[test]
    fn task_lifecycle_pending_leased_succeeded() {
        let mut task = RetryTask::new(
            test_tenant(),
            TaskKind::custom("test"),
            serde_json::json!({}),
        );
        assert!(matches!(task.status, TaskStatus::Pending));
        assert!(task.is_claimable(Utc::now()));

        let lease = Lease::new(WorkerId::new(), Utc::now() + chrono::Duration::minutes(5));
        task.mark_leased(lease);
        assert!(matches!(task.status, TaskStatus::Leased));
        assert!(!task.is_claimable(Utc::now()));

        task.record_success(Utc::now());
        assert!(matches!(task.status, TaskStatus::Succeeded));
        assert!(task.lease.is_none());
        assert_eq!(task.history.len(), 1);
        assert!(task.history[0].success);
    }

    #[test]
    fn failure_schedules_retry_then_dead_letters() {
        let policy = BackoffPolicy::default();
        let mut task = RetryTask::new(
            test_tenant(),
            TaskKind::custom("test"),
            serde_json::json!({}),
        )
        .with_max_retries(1);

        task.mark_leased(Lease::new(WorkerId::new(), Utc::now()));
        task.record_failure("boom".to_string(), Utc::now(), &policy, None);
        assert!(matches!(task.status, TaskStatus::Failed { attempt: 1, .. }));
        assert!(task.next_retry_at.is_some());

        task.mark_leased(Lease::new(WorkerId::new(), Utc::now()));
        task.record_failure("boom again".to_string(), Utc::now(), &policy, None);
        assert!(matches!(task.status, TaskStatus::Dead { attempts: 1, .. }));
        assert!(task.next_retry_at.is_none());
        assert_eq!(task.history.len(), 2);
    }

    #[test]
    fn match_recompute_tasks_carry_a_serialization_key() {
        let po = PurchaseOrderId::new();
        let task = RetryTask::new(
            test_tenant(),
            TaskKind::match_recompute(po),
            serde_json::Value::Null,
        );
        assert_eq!(task.serialization_key, Some(format!("{po}/match")));
    }

    #[test]
    fn verification_payload_must_be_an_object() {
        let kind = TaskKind::external_verification("carrier.tracking");
        assert!(kind.validate_payload(&serde_json::json!({"request": {}})).is_ok());
        assert!(kind.validate_payload(&serde_json::Value::Null).is_err());
        assert!(kind.validate_payload(&serde_json::json!([1, 2])).is_err());
    }

    proptest! {
        /// Retry delays never decrease as the retry count grows, up to the cap.
        #[test]
        fn backoff_is_monotonic(
            multiplier in 1.0f64..4.0,
            retries in 1u32..20,
        ) {
            let policy = BackoffPolicy::default();
            let mut last = Duration::ZERO;
            for n in 1..=retries {
                let delay = policy.delay_for_retry(multiplier, n);
                prop_assert!(delay >= last);
                prop_assert!(delay <= policy.cap);
                last = delay;
            }
        }
    }
}
