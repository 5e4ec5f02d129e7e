//! Three-way match engine: reconciles a purchase order against its linked
//! shipment receipts and vendor invoices, computing per-line discrepancies,
//! an overall score, and an auto-approval decision.
//!
//! Recomputation is an idempotent replace: the same inputs always produce the
//! same stored row, never an appended history.

pub mod documents;
pub mod engine;
pub mod events;
pub mod result;
pub mod store;

pub use documents::{
    DocumentDirectory, InvoiceDocument, InvoiceLine, OrderLine, PurchaseOrderLines, ReceiptLine,
    ShipmentReceipt,
};
pub use engine::{MatchConfig, MatchEngine};
pub use events::MatchEvent;
pub use result::{
    DiscrepancyKind, LineDiscrepancy, MatchStatus, ResolutionAction, ThreeWayMatchResult,
};
pub use store::{InMemoryMatchResultStore, MatchResultStore, MatchStoreError};
