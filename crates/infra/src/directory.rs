//! In-memory order book: the ingestion boundary's registered open orders,
//! documents, and vendor identity hints, backing both directory ports.
//!
//! Receipts and invoices are stored under the external key they arrived
//! with; resolving them for a purchase order always goes through the active
//! correlation links, never through declared references.

use std::collections::HashMap;
use std::sync::RwLock;

use procurex_core::{PurchaseOrderId, TenantId, VendorId};
use procurex_correlation::{ExternalKey, LinkStore, OpenOrderSummary, OrderDirectory};
use procurex_matching::{
    DocumentDirectory, InvoiceDocument, PurchaseOrderLines, ShipmentReceipt,
};

#[derive(Debug, Clone)]
struct RegisteredOrder {
    summary: OpenOrderSummary,
    lines: PurchaseOrderLines,
    /// External identifiers known to belong to this order (tracking numbers
    /// registered at dispatch, carrier references).
    identifiers: Vec<String>,
    open: bool,
}

/// In-memory implementation of both read ports for tests/dev.
pub struct InMemoryOrderBook<L> {
    links: L,
    orders: RwLock<HashMap<PurchaseOrderId, RegisteredOrder>>,
    receipts: RwLock<HashMap<ExternalKey, ShipmentReceipt>>,
    invoices: RwLock<HashMap<ExternalKey, InvoiceDocument>>,
    domains: RwLock<HashMap<String, VendorId>>,
    threads: RwLock<HashMap<String, VendorId>>,
}

impl<L: LinkStore> InMemoryOrderBook<L> {
    pub fn new(links: L) -> Self {
        Self {
            links,
            orders: RwLock::new(HashMap::new()),
            receipts: RwLock::new(HashMap::new()),
            invoices: RwLock::new(HashMap::new()),
            domains: RwLock::new(HashMap::new()),
            threads: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_order(&self, summary: OpenOrderSummary, lines: PurchaseOrderLines) {
        let mut orders = self.orders.write().unwrap();
        orders.insert(
            summary.purchase_order_id,
            RegisteredOrder {
                summary,
                lines,
                identifiers: Vec::new(),
                open: true,
            },
        );
    }

    /// Attach an external identifier (e.g. a tracking number the carrier
    /// assigned at dispatch) to an order.
    pub fn register_identifier(&self, purchase_order_id: PurchaseOrderId, identifier: impl Into<String>) {
        let mut orders = self.orders.write().unwrap();
        if let Some(order) = orders.get_mut(&purchase_order_id) {
            order.identifiers.push(identifier.into());
        }
    }

    pub fn register_receipt(&self, key: ExternalKey, receipt: ShipmentReceipt) {
        self.receipts.write().unwrap().insert(key, receipt);
    }

    pub fn register_invoice(&self, key: ExternalKey, invoice: InvoiceDocument) {
        self.invoices.write().unwrap().insert(key, invoice);
    }

    pub fn register_domain(&self, domain: impl Into<String>, vendor_id: VendorId) {
        self.domains.write().unwrap().insert(domain.into(), vendor_id);
    }

    pub fn register_thread(&self, thread_id: impl Into<String>, vendor_id: VendorId) {
        self.threads.write().unwrap().insert(thread_id.into(), vendor_id);
    }

    pub fn close_order(&self, purchase_order_id: PurchaseOrderId) {
        let mut orders = self.orders.write().unwrap();
        if let Some(order) = orders.get_mut(&purchase_order_id) {
            order.open = false;
        }
    }
}

impl<L: LinkStore> OrderDirectory for InMemoryOrderBook<L> {
    fn find_open_by_identifier(
        &self,
        _tenant_id: TenantId,
        identifier: &str,
    ) -> Option<OpenOrderSummary> {
        let orders = self.orders.read().unwrap();
        orders
            .values()
            .find(|o| {
                o.open
                    && (o.summary.reference == identifier
                        || o.identifiers.iter().any(|i| i == identifier))
            })
            .map(|o| o.summary.clone())
    }

    fn open_orders_for_vendor(
        &self,
        _tenant_id: TenantId,
        vendor_id: VendorId,
    ) -> Vec<OpenOrderSummary> {
        let orders = self.orders.read().unwrap();
        let mut result: Vec<_> = orders
            .values()
            .filter(|o| o.open && o.summary.vendor_id == vendor_id)
            .map(|o| o.summary.clone())
            .collect();
        result.sort_by_key(|o| o.purchase_order_id);
        result
    }

    fn find_order(
        &self,
        _tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Option<OpenOrderSummary> {
        let orders = self.orders.read().unwrap();
        orders.get(&purchase_order_id).map(|o| o.summary.clone())
    }

    fn vendor_for_domain(&self, _tenant_id: TenantId, domain: &str) -> Option<VendorId> {
        self.domains.read().unwrap().get(domain).copied()
    }

    fn vendor_for_thread(&self, _tenant_id: TenantId, thread_id: &str) -> Option<VendorId> {
        self.threads.read().unwrap().get(thread_id).copied()
    }
}

impl<L: LinkStore> DocumentDirectory for InMemoryOrderBook<L> {
    fn order_lines(
        &self,
        _tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Option<PurchaseOrderLines> {
        let orders = self.orders.read().unwrap();
        orders.get(&purchase_order_id).map(|o| o.lines.clone())
    }

    fn receipts_for(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Vec<ShipmentReceipt> {
        let Ok(links) = self.links.links_for_order(tenant_id, purchase_order_id) else {
            return Vec::new();
        };
        let receipts = self.receipts.read().unwrap();
        links
            .iter()
            .filter(|l| l.is_active())
            .filter_map(|l| receipts.get(&l.external_key).cloned())
            .collect()
    }

    fn invoices_for(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Vec<InvoiceDocument> {
        let Ok(links) = self.links.links_for_order(tenant_id, purchase_order_id) else {
            return Vec::new();
        };
        let invoices = self.invoices.read().unwrap();
        links
            .iter()
            .filter(|l| l.is_active())
            .filter_map(|l| invoices.get(&l.external_key).cloned())
            .collect()
    }
}
