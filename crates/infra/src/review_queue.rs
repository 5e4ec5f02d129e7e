//! Human review queue: ambiguity is state, not error.
//!
//! Unresolved correlations, discrepant matches, and dead-lettered tasks are
//! queued here for human action rather than silently dropped.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use procurex_core::{PurchaseOrderId, TenantId};
use procurex_correlation::UnresolvedCorrelation;
use procurex_retry::TaskId;

/// Queue entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewItemId(pub Uuid);

impl ReviewItemId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ReviewItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReviewItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What needs a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewItem {
    UnresolvedCorrelation(UnresolvedCorrelation),
    DiscrepantMatch {
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        overall_score: f64,
        discrepant_lines: u32,
    },
    DeadLetteredTask {
        tenant_id: TenantId,
        task_id: TaskId,
        operation: String,
        error: String,
    },
}

impl ReviewItem {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            ReviewItem::UnresolvedCorrelation(u) => u.tenant_id,
            ReviewItem::DiscrepantMatch { tenant_id, .. }
            | ReviewItem::DeadLetteredTask { tenant_id, .. } => *tenant_id,
        }
    }
}

/// A queued item awaiting action. There is no timeout: cancellation is
/// simply leaving the item unresolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedReview {
    pub id: ReviewItemId,
    pub item: ReviewItem,
    pub queued_at: DateTime<Utc>,
}

/// Review queue abstraction.
pub trait ReviewQueue: Send + Sync {
    fn push(&self, item: ReviewItem) -> ReviewItemId;

    /// Pending items for a tenant, oldest first.
    fn pending(&self, tenant_id: TenantId) -> Vec<QueuedReview>;

    /// Remove an item once its underlying condition has been resolved.
    fn remove(&self, id: ReviewItemId) -> Option<QueuedReview>;
}

impl<T> ReviewQueue for Arc<T>
where
    T: ReviewQueue + ?Sized,
{
    fn push(&self, item: ReviewItem) -> ReviewItemId {
        (**self).push(item)
    }

    fn pending(&self, tenant_id: TenantId) -> Vec<QueuedReview> {
        (**self).pending(tenant_id)
    }

    fn remove(&self, id: ReviewItemId) -> Option<QueuedReview> {
        (**self).remove(id)
    }
}

/// In-memory review queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryReviewQueue {
    items: RwLock<Vec<QueuedReview>>,
}

impl InMemoryReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl ReviewQueue for InMemoryReviewQueue {
    fn push(&self, item: ReviewItem) -> ReviewItemId {
        let id = ReviewItemId::new();
        self.items.write().unwrap().push(QueuedReview {
            id,
            item,
            queued_at: Utc::now(),
        });
        id
    }

    fn pending(&self, tenant_id: TenantId) -> Vec<QueuedReview> {
        let items = self.items.read().unwrap();
        items
            .iter()
            .filter(|q| q.item.tenant_id() == tenant_id)
            .cloned()
            .collect()
    }

    fn remove(&self, id: ReviewItemId) -> Option<QueuedReview> {
        let mut items = self.items.write().unwrap();
        let index = items.iter().position(|q| q.id == id)?;
        Some(items.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procurex_correlation::ExternalKey;

    #[test]
    fn pending_is_scoped_by_tenant() {
        let queue = InMemoryReviewQueue::new();
        let tenant = TenantId::new();
        let other = TenantId::new();

        queue.push(ReviewItem::UnresolvedCorrelation(UnresolvedCorrelation {
            tenant_id: tenant,
            external_key: ExternalKey::tracking("1Z999"),
            reason: "no match".to_string(),
            raw_payload_ref: "events/1".to_string(),
            observed_at: Utc::now(),
        }));
        queue.push(ReviewItem::DiscrepantMatch {
            tenant_id: other,
            purchase_order_id: PurchaseOrderId::new(),
            overall_score: 0.8,
            discrepant_lines: 1,
        });

        assert_eq!(queue.pending(tenant).len(), 1);
        assert_eq!(queue.pending(other).len(), 1);
    }

    #[test]
    fn removed_items_leave_the_queue() {
        let queue = InMemoryReviewQueue::new();
        let tenant = TenantId::new();
        let id = queue.push(ReviewItem::DiscrepantMatch {
            tenant_id: tenant,
            purchase_order_id: PurchaseOrderId::new(),
            overall_score: 0.7,
            discrepant_lines: 2,
        });

        assert!(queue.remove(id).is_some());
        assert!(queue.pending(tenant).is_empty());
        assert!(queue.remove(id).is_none());
    }
}
