//! Correlation links: the recorded attachment of an external key to a
//! purchase order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use procurex_core::{Entity, PurchaseOrderId, TenantId, ValueObject, VendorId};

use crate::evidence::ExternalKey;

/// Unique link identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub Uuid);

impl LinkId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Confidence in a correlation, clamped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    pub const EXACT: Confidence = Confidence(1.0);

    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl ValueObject for Confidence {}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// How a link was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorrelationMethod {
    ExactIdentifier,
    VendorAmountDate,
    EmailDomain,
    Manual,
}

impl CorrelationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationMethod::ExactIdentifier => "exact-identifier",
            CorrelationMethod::VendorAmountDate => "vendor+amount+date",
            CorrelationMethod::EmailDomain => "email-domain",
            CorrelationMethod::Manual => "manual",
        }
    }
}

/// Lifecycle of a link. Superseded links stay on record for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Active,
    Superseded { by: LinkId },
}

/// A repeat observation of the same external key after a link exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub observed_at: DateTime<Utc>,
    pub method: CorrelationMethod,
    pub confidence: Confidence,
    pub raw_payload_ref: String,
}

/// The attachment of one external key to one purchase order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationLink {
    pub id: LinkId,
    pub tenant_id: TenantId,
    pub external_key: ExternalKey,
    pub purchase_order_id: PurchaseOrderId,
    pub vendor_id: VendorId,
    pub confidence: Confidence,
    pub method: CorrelationMethod,
    pub state: LinkState,
    /// Secondary observations recorded against this link.
    pub sightings: Vec<Sighting>,
    pub created_at: DateTime<Utc>,
}

impl CorrelationLink {
    pub fn new(
        tenant_id: TenantId,
        external_key: ExternalKey,
        purchase_order_id: PurchaseOrderId,
        vendor_id: VendorId,
        confidence: Confidence,
        method: CorrelationMethod,
    ) -> Self {
        Self {
            id: LinkId::new(),
            tenant_id,
            external_key,
            purchase_order_id,
            vendor_id,
            confidence,
            method,
            state: LinkState::Active,
            sightings: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, LinkState::Active)
    }
}

impl Entity for CorrelationLink {
    type Id = LinkId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(Confidence::new(1.5).value(), 1.0);
        assert_eq!(Confidence::new(-0.1).value(), 0.0);
        assert_eq!(Confidence::new(0.42).value(), 0.42);
    }

    #[test]
    fn method_serializes_kebab_case() {
        let json = serde_json::to_string(&CorrelationMethod::ExactIdentifier).unwrap();
        assert_eq!(json, "\"exact-identifier\"");
    }
}
