//! Domain events emitted when a profile is recalculated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procurex_core::{TenantId, VendorId};
use procurex_events::Event;

use crate::profile::Trend;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScoringEvent {
    ProfileRecalculated {
        tenant_id: TenantId,
        vendor_id: VendorId,
        confidence_score: f64,
        weight_version: u32,
        trend: Trend,
        /// What prompted the recalculation (a correlation event, a match
        /// event, a human command, or the scheduled sweep).
        trigger: String,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for ScoringEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ScoringEvent::ProfileRecalculated { .. } => "scoring.profile.recalculated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ScoringEvent::ProfileRecalculated { occurred_at, .. } => *occurred_at,
        }
    }
}
