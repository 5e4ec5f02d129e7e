//! Three-way match results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procurex_core::{Entity, PurchaseOrderId, TenantId, VendorId};

/// Aggregate outcome of a three-way match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Neither receipt nor invoice linked yet.
    Unmatched,
    /// One of receipt/invoice is missing.
    Partial,
    /// Receipt and invoice both present, no line beyond tolerance.
    Matched,
    /// At least one line beyond tolerance.
    Discrepant,
}

/// Which measured dimension a line discrepancy concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    Quantity,
    UnitPrice,
}

/// A per-line delta beyond configured tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineDiscrepancy {
    pub sku: String,
    pub kind: DiscrepancyKind,
    /// Ordered quantity or ordered unit price (minor units).
    pub ordered: i64,
    /// Observed quantity (received/invoiced) or invoiced unit price.
    pub observed: i64,
    /// `observed - ordered`.
    pub delta: i64,
    /// `|delta| / ordered`.
    pub percent: f64,
}

/// Resolution chosen by a human or policy for a discrepant match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    AcceptVariance,
    RequestCreditMemo,
    DisputeWithVendor,
    AwaitBackorder,
}

/// The stored match row, one per purchase order, replaced on recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreeWayMatchResult {
    pub purchase_order_id: PurchaseOrderId,
    pub tenant_id: TenantId,
    pub vendor_id: VendorId,
    pub match_status: MatchStatus,
    pub line_discrepancies: Vec<LineDiscrepancy>,
    /// Invoiced total minus ordered total, minor units (0 without an invoice).
    pub totals_discrepancy: i64,
    /// 1 − weighted discrepancy magnitude / weighted total magnitude, in [0, 1].
    pub overall_score: f64,
    pub can_auto_approve: bool,
    pub resolution_action: Option<ResolutionAction>,
    pub computed_at: DateTime<Utc>,
}

impl ThreeWayMatchResult {
    /// Field equality ignoring `computed_at` — the idempotence contract for
    /// recomputation with unchanged inputs.
    pub fn same_outcome(&self, other: &Self) -> bool {
        self.purchase_order_id == other.purchase_order_id
            && self.tenant_id == other.tenant_id
            && self.vendor_id == other.vendor_id
            && self.match_status == other.match_status
            && self.line_discrepancies == other.line_discrepancies
            && self.totals_discrepancy == other.totals_discrepancy
            && self.overall_score == other.overall_score
            && self.can_auto_approve == other.can_auto_approve
            && self.resolution_action == other.resolution_action
    }

    /// Discrepancy magnitude: the complement of the score.
    pub fn discrepancy_magnitude(&self) -> f64 {
        1.0 - self.overall_score
    }
}

impl Entity for ThreeWayMatchResult {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.purchase_order_id
    }
}

impl Default for MatchStatus {
    fn default() -> Self {
        Self::Unmatched
    }
}
