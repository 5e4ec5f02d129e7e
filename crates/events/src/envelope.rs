use serde::{Deserialize, Serialize};
use uuid::Uuid;

use procurex_core::TenantId;

/// Envelope for an event, containing multi-tenant + stream metadata.
///
/// This is the unit appended to an event log or handed to subscribers.
///
/// Notes:
/// - **Multi-tenancy** is enforced here via `tenant_id`.
/// - **Append-only**: `sequence_number` is monotonically increasing per subject.
/// - `payload` is the domain-specific event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,

    /// The entity this event is about (a purchase order, a vendor, a task).
    subject_id: Uuid,
    subject_type: String,

    /// Monotonically increasing position in the subject's stream.
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        subject_id: Uuid,
        subject_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            subject_id,
            subject_type: subject_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn subject_id(&self) -> Uuid {
        self.subject_id
    }

    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
