//! Projects committed domain events into vendor interaction records.
//!
//! The scorer never reads engine stores directly; this projection is the one
//! place where correlation and match facts become scorer input. It is
//! idempotent-friendly: repeated application of the same `MatchComputed`
//! event only changes the "latest match per order" view, not counts.

use chrono::{DateTime, Utc};

use procurex_core::VendorId;
use procurex_correlation::CorrelationEvent;
use procurex_matching::MatchEvent;
use procurex_scoring::{InteractionRecord, VendorHistory, VendorInteraction};

/// Event-to-interaction projection over a vendor history store.
pub struct VendorHistoryProjection<H> {
    history: H,
}

impl<H: VendorHistory> VendorHistoryProjection<H> {
    pub fn new(history: H) -> Self {
        Self { history }
    }

    /// Record the scorer-relevant facts of a correlation event.
    pub fn apply_correlation(&self, event: &CorrelationEvent) -> Result<(), String> {
        let CorrelationEvent::LinkRecorded {
            tenant_id,
            purchase_order_id,
            vendor_id,
            method,
            confidence,
            in_existing_thread,
            reply_latency_hours,
            occurred_at,
            ..
        } = event
        else {
            // Supersessions, sightings, and unresolved events carry no new
            // scorer-relevant vendor behavior.
            return Ok(());
        };

        self.history
            .append(InteractionRecord::new(
                *tenant_id,
                *vendor_id,
                VendorInteraction::CorrelationObserved {
                    purchase_order_id: *purchase_order_id,
                    method: *method,
                    confidence: confidence.value(),
                    in_existing_thread: *in_existing_thread,
                    reply_latency_hours: *reply_latency_hours,
                },
                *occurred_at,
            ))
            .map_err(|e| e.to_string())
    }

    /// Record the scorer-relevant facts of a match event.
    pub fn apply_match(&self, event: &MatchEvent) -> Result<(), String> {
        let MatchEvent::MatchComputed {
            tenant_id,
            purchase_order_id,
            vendor_id,
            status,
            overall_score,
            completed_before_expected,
            occurred_at,
            ..
        } = event
        else {
            return Ok(());
        };

        self.history
            .append(InteractionRecord::new(
                *tenant_id,
                *vendor_id,
                VendorInteraction::MatchObserved {
                    purchase_order_id: *purchase_order_id,
                    status: *status,
                    overall_score: *overall_score,
                },
                *occurred_at,
            ))
            .map_err(|e| e.to_string())?;

        if let Some(before_expected) = completed_before_expected {
            self.history
                .append(InteractionRecord::new(
                    *tenant_id,
                    *vendor_id,
                    VendorInteraction::DocumentsCompleted {
                        purchase_order_id: *purchase_order_id,
                        before_expected: *before_expected,
                    },
                    *occurred_at,
                ))
                .map_err(|e| e.to_string())?;
        }

        Ok(())
    }

    /// Record a follow-up outcome reported by the outreach layer.
    pub fn record_followup(
        &self,
        tenant_id: procurex_core::TenantId,
        vendor_id: VendorId,
        answered: bool,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), String> {
        self.history
            .append(InteractionRecord::new(
                tenant_id,
                vendor_id,
                VendorInteraction::FollowUpResolved { answered },
                occurred_at,
            ))
            .map_err(|e| e.to_string())
    }

    /// Record a human override of an automated decision.
    pub fn record_override(
        &self,
        tenant_id: procurex_core::TenantId,
        vendor_id: VendorId,
        purchase_order_id: procurex_core::PurchaseOrderId,
    ) -> Result<(), String> {
        self.history
            .append(InteractionRecord::new(
                tenant_id,
                vendor_id,
                VendorInteraction::HumanOverrideObserved { purchase_order_id },
                Utc::now(),
            ))
            .map_err(|e| e.to_string())
    }

    /// Record a delivery's promised-vs-actual lead time.
    pub fn record_lead_time(
        &self,
        tenant_id: procurex_core::TenantId,
        vendor_id: VendorId,
        promised_days: f64,
        actual_days: f64,
    ) -> Result<(), String> {
        self.history
            .append(InteractionRecord::new(
                tenant_id,
                vendor_id,
                VendorInteraction::LeadTimeObserved {
                    promised_days,
                    actual_days,
                },
                Utc::now(),
            ))
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procurex_core::{PurchaseOrderId, TenantId};
    use procurex_correlation::{Confidence, CorrelationMethod, ExternalKey, LinkId};
    use procurex_matching::MatchStatus;
    use procurex_scoring::InMemoryVendorHistory;

    #[test]
    fn link_recorded_projects_one_interaction() {
        let history = InMemoryVendorHistory::arc();
        let projection = VendorHistoryProjection::new(history.clone());
        let tenant = TenantId::new();
        let vendor = VendorId::new();

        projection
            .apply_correlation(&CorrelationEvent::LinkRecorded {
                tenant_id: tenant,
                link_id: LinkId::new(),
                external_key: ExternalKey::tracking("1Z999"),
                purchase_order_id: PurchaseOrderId::new(),
                vendor_id: vendor,
                method: CorrelationMethod::ExactIdentifier,
                confidence: Confidence::EXACT,
                in_existing_thread: None,
                reply_latency_hours: None,
                occurred_at: Utc::now(),
            })
            .unwrap();

        let window = history
            .window(tenant, vendor, Utc::now() - chrono::Duration::days(1))
            .unwrap();
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn match_computed_with_both_documents_projects_completion() {
        let history = InMemoryVendorHistory::arc();
        let projection = VendorHistoryProjection::new(history.clone());
        let tenant = TenantId::new();
        let vendor = VendorId::new();

        projection
            .apply_match(&MatchEvent::MatchComputed {
                tenant_id: tenant,
                purchase_order_id: PurchaseOrderId::new(),
                vendor_id: vendor,
                status: MatchStatus::Matched,
                overall_score: 0.98,
                discrepant_lines: 0,
                can_auto_approve: true,
                receipt_present: true,
                invoice_present: true,
                completed_before_expected: Some(true),
                occurred_at: Utc::now(),
            })
            .unwrap();

        let window = history
            .window(tenant, vendor, Utc::now() - chrono::Duration::days(1))
            .unwrap();
        assert_eq!(window.len(), 2);
        assert!(window.iter().any(|r| matches!(
            r.interaction,
            VendorInteraction::DocumentsCompleted {
                before_expected: true,
                ..
            }
        )));
    }
}
