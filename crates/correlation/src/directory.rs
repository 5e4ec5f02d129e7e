//! Read-only ports onto the surrounding platform's purchase-order data.
//!
//! The purchasing service owns purchase orders; the correlation engine only
//! needs the narrow summaries below. Any read model honoring these lookups
//! satisfies the contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procurex_core::{PurchaseOrderId, TenantId, VendorId};

/// Slice of an open purchase order relevant to correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrderSummary {
    pub purchase_order_id: PurchaseOrderId,
    pub vendor_id: VendorId,
    /// Human-facing order reference (e.g. "PO-2026-0042").
    pub reference: String,
    /// Order total, minor units.
    pub total_amount: u64,
    pub order_date: DateTime<Utc>,
    pub expected_date: Option<DateTime<Utc>>,
    pub next_follow_up_due: Option<DateTime<Utc>>,
    /// When the order (or its last follow-up) was last sent to the vendor.
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// Lookup interface over open purchase orders and vendor identity hints.
pub trait OrderDirectory: Send + Sync {
    /// Find the open order carrying the identifier verbatim — its reference
    /// number or a registered external identifier such as a tracking number.
    fn find_open_by_identifier(
        &self,
        tenant_id: TenantId,
        identifier: &str,
    ) -> Option<OpenOrderSummary>;

    /// All open orders for a vendor.
    fn open_orders_for_vendor(
        &self,
        tenant_id: TenantId,
        vendor_id: VendorId,
    ) -> Vec<OpenOrderSummary>;

    /// Look up a specific order (open or not) for manual correlation.
    fn find_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Option<OpenOrderSummary>;

    /// Vendor already associated with an email sender domain.
    fn vendor_for_domain(&self, tenant_id: TenantId, domain: &str) -> Option<VendorId>;

    /// Vendor already associated with an email thread.
    fn vendor_for_thread(&self, tenant_id: TenantId, thread_id: &str) -> Option<VendorId>;
}

/// Shared ownership of a directory forwards to the inner implementation, so an
/// `Arc<D>` satisfies the port wherever a `D` does.
impl<D: OrderDirectory + ?Sized> OrderDirectory for std::sync::Arc<D> {
    fn find_open_by_identifier(
        &self,
        tenant_id: TenantId,
        identifier: &str,
    ) -> Option<OpenOrderSummary> {
        (**self).find_open_by_identifier(tenant_id, identifier)
    }

    fn open_orders_for_vendor(
        &self,
        tenant_id: TenantId,
        vendor_id: VendorId,
    ) -> Vec<OpenOrderSummary> {
        (**self).open_orders_for_vendor(tenant_id, vendor_id)
    }

    fn find_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Option<OpenOrderSummary> {
        (**self).find_order(tenant_id, purchase_order_id)
    }

    fn vendor_for_domain(&self, tenant_id: TenantId, domain: &str) -> Option<VendorId> {
        (**self).vendor_for_domain(tenant_id, domain)
    }

    fn vendor_for_thread(&self, tenant_id: TenantId, thread_id: &str) -> Option<VendorId> {
        (**self).vendor_for_thread(tenant_id, thread_id)
    }
}
