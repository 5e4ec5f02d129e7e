//! Domain events emitted when match facts are committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procurex_core::{ActorId, PurchaseOrderId, TenantId, VendorId};
use procurex_events::Event;

use crate::result::{MatchStatus, ResolutionAction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchEvent {
    /// A three-way match was (re)computed and its row replaced.
    ///
    /// Carries the facts downstream scoring needs so consumers never re-read
    /// the match row.
    MatchComputed {
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        vendor_id: VendorId,
        status: MatchStatus,
        overall_score: f64,
        discrepant_lines: u32,
        can_auto_approve: bool,
        receipt_present: bool,
        invoice_present: bool,
        /// Some(..) once both documents are present: whether they arrived
        /// before the order's expected date.
        completed_before_expected: Option<bool>,
        occurred_at: DateTime<Utc>,
    },
    /// A human overrode the match outcome with an explicit resolution.
    MatchOverridden {
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        action: ResolutionAction,
        actor: ActorId,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for MatchEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MatchEvent::MatchComputed { .. } => "matching.result.computed",
            MatchEvent::MatchOverridden { .. } => "matching.result.overridden",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MatchEvent::MatchComputed { occurred_at, .. }
            | MatchEvent::MatchOverridden { occurred_at, .. } => *occurred_at,
        }
    }
}
