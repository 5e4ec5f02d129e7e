//! The match computation.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use procurex_core::{DomainError, PurchaseOrderId, TenantId};

use crate::documents::{DocumentDirectory, InvoiceDocument, PurchaseOrderLines, ShipmentReceipt};
use crate::events::MatchEvent;
use crate::result::{
    DiscrepancyKind, LineDiscrepancy, MatchStatus, ThreeWayMatchResult,
};
use crate::store::MatchResultStore;

/// Tolerances and thresholds for the match computation.
///
/// A delta passes if it is under **either** its absolute or its percentage
/// bound — the looser bound wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Absolute quantity tolerance, units.
    pub qty_tolerance_abs: i64,
    /// Relative quantity tolerance.
    pub qty_tolerance_pct: f64,
    /// Absolute unit-price tolerance, minor units.
    pub price_tolerance_abs: i64,
    /// Relative unit-price tolerance.
    pub price_tolerance_pct: f64,
    /// Minimum overall score for auto-approval of a matched result.
    pub auto_approve_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            qty_tolerance_abs: 2,
            qty_tolerance_pct: 0.10,
            price_tolerance_abs: 50,
            price_tolerance_pct: 0.10,
            auto_approve_threshold: 0.95,
        }
    }
}

/// Three-way match engine over a document directory and a result store.
pub struct MatchEngine<D, S> {
    documents: D,
    results: S,
    config: MatchConfig,
}

impl<D, S> MatchEngine<D, S>
where
    D: DocumentDirectory,
    S: MatchResultStore,
{
    pub fn new(documents: D, results: S, config: MatchConfig) -> Self {
        Self {
            documents,
            results,
            config,
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Compute (or recompute) the match for a purchase order and replace the
    /// stored row. Identical inputs produce an identical outcome; only
    /// `computed_at` moves.
    pub fn compute(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<(ThreeWayMatchResult, MatchEvent), DomainError> {
        let order = self
            .documents
            .order_lines(tenant_id, purchase_order_id)
            .ok_or(DomainError::NotFound)?;
        let receipts = self.documents.receipts_for(tenant_id, purchase_order_id);
        let invoices = self.documents.invoices_for(tenant_id, purchase_order_id);

        let previous_resolution = self
            .results
            .get(tenant_id, purchase_order_id)
            .map_err(|e| DomainError::conflict(e.to_string()))?
            .and_then(|r| r.resolution_action);

        let mut result = evaluate(&self.config, tenant_id, &order, &receipts, &invoices);
        result.resolution_action = previous_resolution;

        self.results
            .upsert(result.clone())
            .map_err(|e| DomainError::conflict(e.to_string()))?;

        info!(
            po = %purchase_order_id,
            status = ?result.match_status,
            score = result.overall_score,
            auto_approve = result.can_auto_approve,
            "three-way match computed"
        );

        let completed_before_expected = if !receipts.is_empty() && !invoices.is_empty() {
            Some(match order.expected_date {
                Some(expected) => Utc::now() <= expected,
                None => true,
            })
        } else {
            None
        };

        let event = MatchEvent::MatchComputed {
            tenant_id,
            purchase_order_id,
            vendor_id: order.vendor_id,
            status: result.match_status,
            overall_score: result.overall_score,
            discrepant_lines: result.line_discrepancies.len() as u32,
            can_auto_approve: result.can_auto_approve,
            receipt_present: !receipts.is_empty(),
            invoice_present: !invoices.is_empty(),
            completed_before_expected,
            occurred_at: Utc::now(),
        };

        Ok((result, event))
    }
}

/// Pure match evaluation, deterministic over its inputs.
fn evaluate(
    config: &MatchConfig,
    tenant_id: TenantId,
    order: &PurchaseOrderLines,
    receipts: &[ShipmentReceipt],
    invoices: &[InvoiceDocument],
) -> ThreeWayMatchResult {
    let has_receipt = !receipts.is_empty();
    let has_invoice = !invoices.is_empty();

    // Aggregate observed documents per sku. BTreeMap keeps iteration (and
    // therefore output) deterministic.
    let mut received_qty: BTreeMap<&str, i64> = BTreeMap::new();
    for receipt in receipts {
        for line in &receipt.lines {
            *received_qty.entry(line.sku.as_str()).or_default() += line.quantity;
        }
    }

    let mut invoiced_qty: BTreeMap<&str, i64> = BTreeMap::new();
    let mut invoiced_value: BTreeMap<&str, i64> = BTreeMap::new();
    for invoice in invoices {
        for line in &invoice.lines {
            *invoiced_qty.entry(line.sku.as_str()).or_default() += line.quantity;
            *invoiced_value.entry(line.sku.as_str()).or_default() +=
                line.quantity * line.unit_amount as i64;
        }
    }

    let mut discrepancies: Vec<LineDiscrepancy> = Vec::new();
    let mut weighted_deviation = 0.0_f64;
    let mut weighted_total = 0.0_f64;

    for line in &order.lines {
        let ordered_qty = line.quantity;
        let ordered_price = line.unit_amount as i64;
        let line_value = (ordered_qty.max(0) as f64) * (line.unit_amount as f64);
        weighted_total += line_value;

        let mut line_deviation = 0.0_f64;

        // Quantity: the worse of received-vs-ordered and invoiced-vs-ordered.
        let qty_candidates = [
            has_receipt.then(|| received_qty.get(line.sku.as_str()).copied().unwrap_or(0)),
            has_invoice.then(|| invoiced_qty.get(line.sku.as_str()).copied().unwrap_or(0)),
        ];
        let worst_qty = qty_candidates
            .into_iter()
            .flatten()
            .max_by_key(|observed| (observed - ordered_qty).abs());
        if let Some(observed) = worst_qty {
            let delta = observed - ordered_qty;
            let percent = ratio(delta, ordered_qty);
            line_deviation = line_deviation.max(percent);
            if !within_tolerance(
                delta,
                percent,
                config.qty_tolerance_abs,
                config.qty_tolerance_pct,
            ) {
                discrepancies.push(LineDiscrepancy {
                    sku: line.sku.clone(),
                    kind: DiscrepancyKind::Quantity,
                    ordered: ordered_qty,
                    observed,
                    delta,
                    percent,
                });
            }
        }

        // Unit price: ordered vs invoiced (quantity-weighted average).
        if has_invoice {
            let qty = invoiced_qty.get(line.sku.as_str()).copied().unwrap_or(0);
            if qty > 0 {
                let value = invoiced_value.get(line.sku.as_str()).copied().unwrap_or(0);
                let observed_price = value / qty;
                let delta = observed_price - ordered_price;
                let percent = ratio(delta, ordered_price);
                line_deviation = line_deviation.max(percent);
                if !within_tolerance(
                    delta,
                    percent,
                    config.price_tolerance_abs,
                    config.price_tolerance_pct,
                ) {
                    discrepancies.push(LineDiscrepancy {
                        sku: line.sku.clone(),
                        kind: DiscrepancyKind::UnitPrice,
                        ordered: ordered_price,
                        observed: observed_price,
                        delta,
                        percent,
                    });
                }
            }
        }

        weighted_deviation += line_value * line_deviation.min(1.0);
    }

    discrepancies.sort_by(|a, b| a.sku.cmp(&b.sku).then(a.kind.cmp(&b.kind)));

    let overall_score = if !has_receipt && !has_invoice {
        0.0
    } else if weighted_total > 0.0 {
        round4((1.0 - weighted_deviation / weighted_total).clamp(0.0, 1.0))
    } else {
        1.0
    };

    let match_status = if !has_receipt && !has_invoice {
        MatchStatus::Unmatched
    } else if !discrepancies.is_empty() {
        MatchStatus::Discrepant
    } else if has_receipt && has_invoice {
        MatchStatus::Matched
    } else {
        MatchStatus::Partial
    };

    let can_auto_approve =
        match_status == MatchStatus::Matched && overall_score >= config.auto_approve_threshold;

    let ordered_total = order.total_amount() as i64;
    let invoiced_total: i64 = invoices.iter().map(|i| i.total_amount as i64).sum();
    let totals_discrepancy = if has_invoice {
        invoiced_total - ordered_total
    } else {
        0
    };

    debug!(
        po = %order.purchase_order_id,
        ?match_status,
        discrepancies = discrepancies.len(),
        "match evaluated"
    );

    ThreeWayMatchResult {
        purchase_order_id: order.purchase_order_id,
        tenant_id,
        vendor_id: order.vendor_id,
        match_status,
        line_discrepancies: discrepancies,
        totals_discrepancy,
        overall_score,
        can_auto_approve,
        resolution_action: None,
        computed_at: Utc::now(),
    }
}

fn within_tolerance(delta: i64, percent: f64, abs_bound: i64, pct_bound: f64) -> bool {
    delta.abs() <= abs_bound || percent <= pct_bound
}

fn ratio(delta: i64, base: i64) -> f64 {
    if base <= 0 {
        if delta == 0 { 0.0 } else { 1.0 }
    } else {
        delta.abs() as f64 / base as f64
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{InvoiceLine, OrderLine, ReceiptLine};
    use crate::store::InMemoryMatchResultStore;
    use procurex_core::VendorId;
    use std::sync::{Arc, RwLock};

    #[derive(Default)]
    struct StubDocuments {
        orders: RwLock<Vec<PurchaseOrderLines>>,
        receipts: RwLock<Vec<ShipmentReceipt>>,
        invoices: RwLock<Vec<InvoiceDocument>>,
    }

    impl DocumentDirectory for Arc<StubDocuments> {
        fn order_lines(
            &self,
            _tenant_id: TenantId,
            purchase_order_id: PurchaseOrderId,
        ) -> Option<PurchaseOrderLines> {
            self.orders
                .read()
                .unwrap()
                .iter()
                .find(|o| o.purchase_order_id == purchase_order_id)
                .cloned()
        }

        fn receipts_for(
            &self,
            _tenant_id: TenantId,
            _purchase_order_id: PurchaseOrderId,
        ) -> Vec<ShipmentReceipt> {
            self.receipts.read().unwrap().clone()
        }

        fn invoices_for(
            &self,
            _tenant_id: TenantId,
            _purchase_order_id: PurchaseOrderId,
        ) -> Vec<InvoiceDocument> {
            self.invoices.read().unwrap().clone()
        }
    }

    struct Fixture {
        engine: MatchEngine<Arc<StubDocuments>, Arc<InMemoryMatchResultStore>>,
        documents: Arc<StubDocuments>,
        store: Arc<InMemoryMatchResultStore>,
        tenant: TenantId,
        vendor: VendorId,
        po: PurchaseOrderId,
    }

    fn fixture() -> Fixture {
        let documents = Arc::new(StubDocuments::default());
        let store = Arc::new(InMemoryMatchResultStore::new());
        let engine = MatchEngine::new(documents.clone(), store.clone(), MatchConfig::default());
        let tenant = TenantId::new();
        let vendor = VendorId::new();
        let po = PurchaseOrderId::new();
        documents.orders.write().unwrap().push(PurchaseOrderLines {
            purchase_order_id: po,
            vendor_id: vendor,
            lines: vec![OrderLine {
                sku: "WIDGET".to_string(),
                quantity: 100,
                unit_amount: 1_000,
            }],
            expected_date: None,
        });
        Fixture {
            engine,
            documents,
            store,
            tenant,
            vendor,
            po,
        }
    }

    fn receipt(f: &Fixture, qty: i64) -> ShipmentReceipt {
        ShipmentReceipt {
            receipt_id: "rcpt-1".to_string(),
            tenant_id: f.tenant,
            declared_reference: None,
            vendor_id: f.vendor,
            lines: vec![ReceiptLine {
                sku: "WIDGET".to_string(),
                quantity: qty,
            }],
            received_at: Utc::now(),
        }
    }

    fn invoice(f: &Fixture, qty: i64, unit_amount: u64) -> InvoiceDocument {
        InvoiceDocument {
            invoice_id: "inv-1".to_string(),
            tenant_id: f.tenant,
            declared_reference: None,
            vendor_id: f.vendor,
            lines: vec![InvoiceLine {
                sku: "WIDGET".to_string(),
                quantity: qty,
                unit_amount,
            }],
            total_amount: qty.max(0) as u64 * unit_amount,
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn no_documents_is_unmatched() {
        let f = fixture();
        let (result, _) = f.engine.compute(f.tenant, f.po).unwrap();
        assert_eq!(result.match_status, MatchStatus::Unmatched);
        assert_eq!(result.overall_score, 0.0);
        assert!(!result.can_auto_approve);
    }

    #[test]
    fn receipt_only_is_partial() {
        let f = fixture();
        f.documents.receipts.write().unwrap().push(receipt(&f, 100));
        let (result, _) = f.engine.compute(f.tenant, f.po).unwrap();
        assert_eq!(result.match_status, MatchStatus::Partial);
        assert!(!result.can_auto_approve);
    }

    #[test]
    fn five_percent_price_overage_within_tolerance_auto_approves() {
        let f = fixture();
        f.documents.receipts.write().unwrap().push(receipt(&f, 100));
        f.documents.invoices.write().unwrap().push(invoice(&f, 100, 1_050));

        let (result, _) = f.engine.compute(f.tenant, f.po).unwrap();
        assert_eq!(result.match_status, MatchStatus::Matched);
        assert!(result.line_discrepancies.is_empty());
        assert_eq!(result.overall_score, 0.95);
        assert!(result.can_auto_approve);
        assert_eq!(result.totals_discrepancy, 5_000);
    }

    #[test]
    fn twenty_percent_quantity_shortfall_is_discrepant() {
        let f = fixture();
        f.documents.receipts.write().unwrap().push(receipt(&f, 100));
        f.documents.invoices.write().unwrap().push(invoice(&f, 80, 1_000));

        let (result, _) = f.engine.compute(f.tenant, f.po).unwrap();
        assert_eq!(result.match_status, MatchStatus::Discrepant);
        assert!(!result.can_auto_approve);
        assert_eq!(result.line_discrepancies.len(), 1);
        let d = &result.line_discrepancies[0];
        assert_eq!(d.kind, DiscrepancyKind::Quantity);
        assert_eq!(d.ordered, 100);
        assert_eq!(d.observed, 80);
        assert_eq!(d.delta, -20);
    }

    #[test]
    fn recomputation_is_idempotent() {
        let f = fixture();
        f.documents.receipts.write().unwrap().push(receipt(&f, 100));
        f.documents.invoices.write().unwrap().push(invoice(&f, 100, 1_050));

        let (first, _) = f.engine.compute(f.tenant, f.po).unwrap();
        let (second, _) = f.engine.compute(f.tenant, f.po).unwrap();
        assert!(first.same_outcome(&second));

        // The stored row is replaced, not duplicated.
        let stored = f.store.get(f.tenant, f.po).unwrap().unwrap();
        assert!(stored.same_outcome(&second));
    }

    #[test]
    fn recomputation_preserves_resolution_action() {
        let f = fixture();
        f.documents.receipts.write().unwrap().push(receipt(&f, 100));
        f.documents.invoices.write().unwrap().push(invoice(&f, 80, 1_000));

        f.engine.compute(f.tenant, f.po).unwrap();
        f.store
            .set_resolution(
                f.tenant,
                f.po,
                crate::result::ResolutionAction::AcceptVariance,
            )
            .unwrap();

        let (result, _) = f.engine.compute(f.tenant, f.po).unwrap();
        assert_eq!(
            result.resolution_action,
            Some(crate::result::ResolutionAction::AcceptVariance)
        );
    }

    #[test]
    fn event_reports_completion_before_expected_date() {
        let f = fixture();
        {
            let mut orders = f.documents.orders.write().unwrap();
            orders[0].expected_date =
                Some(Utc::now() + chrono::Duration::days(7));
        }
        f.documents.receipts.write().unwrap().push(receipt(&f, 100));
        f.documents.invoices.write().unwrap().push(invoice(&f, 100, 1_000));

        let (_, event) = f.engine.compute(f.tenant, f.po).unwrap();
        match event {
            MatchEvent::MatchComputed {
                completed_before_expected,
                receipt_present,
                invoice_present,
                ..
            } => {
                assert_eq!(completed_before_expected, Some(true));
                assert!(receipt_present);
                assert!(invoice_present);
            }
            other => panic!("expected MatchComputed, got {other:?}"),
        }
    }

    #[test]
    fn missing_order_is_not_found() {
        let f = fixture();
        let err = f
            .engine
            .compute(f.tenant, PurchaseOrderId::new())
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

}
