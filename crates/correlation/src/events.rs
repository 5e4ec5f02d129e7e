//! Domain events emitted when correlation facts are committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procurex_core::{ActorId, PurchaseOrderId, TenantId, VendorId};
use procurex_events::Event;

use crate::evidence::ExternalKey;
use crate::link::{Confidence, CorrelationMethod, LinkId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CorrelationEvent {
    LinkRecorded {
        tenant_id: TenantId,
        link_id: LinkId,
        external_key: ExternalKey,
        purchase_order_id: PurchaseOrderId,
        vendor_id: VendorId,
        method: CorrelationMethod,
        confidence: Confidence,
        /// Email evidence only: the reply landed in an already-linked thread.
        in_existing_thread: Option<bool>,
        /// Email evidence only: hours between the outbound inquiry and this
        /// correlated reply.
        reply_latency_hours: Option<f64>,
        occurred_at: DateTime<Utc>,
    },
    LinkSuperseded {
        tenant_id: TenantId,
        old_link_id: LinkId,
        new_link_id: LinkId,
        external_key: ExternalKey,
        occurred_at: DateTime<Utc>,
    },
    SightingRecorded {
        tenant_id: TenantId,
        link_id: LinkId,
        method: CorrelationMethod,
        confidence: Confidence,
        occurred_at: DateTime<Utc>,
    },
    Unresolved {
        tenant_id: TenantId,
        external_key: ExternalKey,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    ManuallyCorrelated {
        tenant_id: TenantId,
        link_id: LinkId,
        purchase_order_id: PurchaseOrderId,
        actor: ActorId,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for CorrelationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CorrelationEvent::LinkRecorded { .. } => "correlation.link.recorded",
            CorrelationEvent::LinkSuperseded { .. } => "correlation.link.superseded",
            CorrelationEvent::SightingRecorded { .. } => "correlation.sighting.recorded",
            CorrelationEvent::Unresolved { .. } => "correlation.unresolved",
            CorrelationEvent::ManuallyCorrelated { .. } => "correlation.manual",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CorrelationEvent::LinkRecorded { occurred_at, .. }
            | CorrelationEvent::LinkSuperseded { occurred_at, .. }
            | CorrelationEvent::SightingRecorded { occurred_at, .. }
            | CorrelationEvent::Unresolved { occurred_at, .. }
            | CorrelationEvent::ManuallyCorrelated { occurred_at, .. } => *occurred_at,
        }
    }
}
