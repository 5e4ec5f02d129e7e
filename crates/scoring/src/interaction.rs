//! Vendor interaction history: the scorer's input contract.
//!
//! Interactions are projected from domain events (correlation, matching,
//! follow-up outcomes) by the wiring layer. The scorer only ever reads a
//! trailing window of them; it never reaches back into the engines' stores.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procurex_core::{PurchaseOrderId, TenantId, VendorId};
use procurex_correlation::CorrelationMethod;
use procurex_matching::MatchStatus;

/// One observed fact about a vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VendorInteraction {
    /// An inbound event was correlated to one of the vendor's orders.
    CorrelationObserved {
        purchase_order_id: PurchaseOrderId,
        method: CorrelationMethod,
        confidence: f64,
        /// Email correlations only: the message landed in an existing thread.
        in_existing_thread: Option<bool>,
        /// Email correlations only: hours from outbound inquiry to this reply.
        reply_latency_hours: Option<f64>,
    },
    /// A three-way match was computed for one of the vendor's orders.
    MatchObserved {
        purchase_order_id: PurchaseOrderId,
        status: MatchStatus,
        overall_score: f64,
    },
    /// Receipt and invoice both correlated for an order.
    DocumentsCompleted {
        purchase_order_id: PurchaseOrderId,
        before_expected: bool,
    },
    /// An automated follow-up was answered (or escalated unanswered).
    FollowUpResolved { answered: bool },
    /// Delivery happened; promised vs actual lead time in days.
    LeadTimeObserved { promised_days: f64, actual_days: f64 },
    /// A human overrode an automated decision on one of the vendor's orders.
    HumanOverrideObserved { purchase_order_id: PurchaseOrderId },
}

/// An interaction stamped with its vendor and business time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub tenant_id: TenantId,
    pub vendor_id: VendorId,
    pub interaction: VendorInteraction,
    pub occurred_at: DateTime<Utc>,
}

impl InteractionRecord {
    pub fn new(
        tenant_id: TenantId,
        vendor_id: VendorId,
        interaction: VendorInteraction,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            vendor_id,
            interaction,
            occurred_at,
        }
    }
}

/// History store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VendorHistoryError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Append-only interaction history with windowed reads.
pub trait VendorHistory: Send + Sync {
    fn append(&self, record: InteractionRecord) -> Result<(), VendorHistoryError>;

    /// Interactions for a vendor with `occurred_at >= since`, oldest first.
    fn window(
        &self,
        tenant_id: TenantId,
        vendor_id: VendorId,
        since: DateTime<Utc>,
    ) -> Result<Vec<InteractionRecord>, VendorHistoryError>;
}

impl<T> VendorHistory for Arc<T>
where
    T: VendorHistory + ?Sized,
{
    fn append(&self, record: InteractionRecord) -> Result<(), VendorHistoryError> {
        (**self).append(record)
    }

    fn window(
        &self,
        tenant_id: TenantId,
        vendor_id: VendorId,
        since: DateTime<Utc>,
    ) -> Result<Vec<InteractionRecord>, VendorHistoryError> {
        (**self).window(tenant_id, vendor_id, since)
    }
}

/// In-memory vendor history for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryVendorHistory {
    records: RwLock<Vec<InteractionRecord>>,
}

impl InMemoryVendorHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl VendorHistory for InMemoryVendorHistory {
    fn append(&self, record: InteractionRecord) -> Result<(), VendorHistoryError> {
        self.records.write().unwrap().push(record);
        Ok(())
    }

    fn window(
        &self,
        tenant_id: TenantId,
        vendor_id: VendorId,
        since: DateTime<Utc>,
    ) -> Result<Vec<InteractionRecord>, VendorHistoryError> {
        let records = self.records.read().unwrap();
        let mut result: Vec<_> = records
            .iter()
            .filter(|r| {
                r.tenant_id == tenant_id && r.vendor_id == vendor_id && r.occurred_at >= since
            })
            .cloned()
            .collect();
        result.sort_by_key(|r| r.occurred_at);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_filters_by_vendor_and_time() {
        let history = InMemoryVendorHistory::new();
        let tenant = TenantId::new();
        let vendor = VendorId::new();
        let other = VendorId::new();
        let now = Utc::now();

        history
            .append(InteractionRecord::new(
                tenant,
                vendor,
                VendorInteraction::FollowUpResolved { answered: true },
                now - chrono::Duration::days(100),
            ))
            .unwrap();
        history
            .append(InteractionRecord::new(
                tenant,
                vendor,
                VendorInteraction::FollowUpResolved { answered: false },
                now - chrono::Duration::days(5),
            ))
            .unwrap();
        history
            .append(InteractionRecord::new(
                tenant,
                other,
                VendorInteraction::FollowUpResolved { answered: true },
                now,
            ))
            .unwrap();

        let window = history
            .window(tenant, vendor, now - chrono::Duration::days(90))
            .unwrap();
        assert_eq!(window.len(), 1);
        assert!(matches!(
            window[0].interaction,
            VendorInteraction::FollowUpResolved { answered: false }
        ));
    }
}
