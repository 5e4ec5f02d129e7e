//! Read models for the documents entering a three-way match.
//!
//! Purchase orders, receipts, and invoices are owned by their respective
//! services (purchasing, document ingestion); the match engine reads them
//! through the narrow directory port below, resolved via correlation links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procurex_core::{PurchaseOrderId, TenantId, VendorId};

/// A purchase-order line as ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub quantity: i64,
    /// Unit price in smallest currency unit (e.g., cents).
    pub unit_amount: u64,
}

/// The orderable slice of a purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLines {
    pub purchase_order_id: PurchaseOrderId,
    pub vendor_id: VendorId,
    pub lines: Vec<OrderLine>,
    pub expected_date: Option<DateTime<Utc>>,
}

impl PurchaseOrderLines {
    /// Ordered total, minor units.
    pub fn total_amount(&self) -> u64 {
        self.lines
            .iter()
            .map(|l| l.quantity.max(0) as u64 * l.unit_amount)
            .sum()
    }
}

/// A received line on a shipment receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub sku: String,
    pub quantity: i64,
}

/// A shipment receipt as normalized by document ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentReceipt {
    pub receipt_id: String,
    pub tenant_id: TenantId,
    /// Purchase-order reference declared on the document (may be absent or
    /// wrong; linkage comes from correlation, not from this field).
    pub declared_reference: Option<String>,
    pub vendor_id: VendorId,
    pub lines: Vec<ReceiptLine>,
    pub received_at: DateTime<Utc>,
}

/// An invoiced line on a vendor invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub sku: String,
    pub quantity: i64,
    /// Unit price in smallest currency unit (e.g., cents).
    pub unit_amount: u64,
}

/// A vendor invoice as normalized by document ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDocument {
    pub invoice_id: String,
    pub tenant_id: TenantId,
    pub declared_reference: Option<String>,
    pub vendor_id: VendorId,
    pub lines: Vec<InvoiceLine>,
    /// Invoice total, minor units.
    pub total_amount: u64,
    pub issued_at: DateTime<Utc>,
}

/// Lookup port resolving the documents linked to a purchase order.
pub trait DocumentDirectory: Send + Sync {
    fn order_lines(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Option<PurchaseOrderLines>;

    /// Receipts correlated to the order, oldest first.
    fn receipts_for(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Vec<ShipmentReceipt>;

    /// Invoices correlated to the order, oldest first.
    fn invoices_for(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Vec<InvoiceDocument>;
}

/// Shared ownership of a directory forwards to the inner implementation, so an
/// `Arc<D>` satisfies the port wherever a `D` does.
impl<D: DocumentDirectory + ?Sized> DocumentDirectory for std::sync::Arc<D> {
    fn order_lines(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Option<PurchaseOrderLines> {
        (**self).order_lines(tenant_id, purchase_order_id)
    }

    fn receipts_for(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Vec<ShipmentReceipt> {
        (**self).receipts_for(tenant_id, purchase_order_id)
    }

    fn invoices_for(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Vec<InvoiceDocument> {
        (**self).invoices_for(tenant_id, purchase_order_id)
    }
}
