//! Inbound evidence: external keys and the typed payloads behind them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procurex_core::{TenantId, ValueObject, VendorId};

/// Kind of external identifier being correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalKeyKind {
    TrackingNumber,
    EmailThread,
    InvoiceDocument,
}

impl ExternalKeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalKeyKind::TrackingNumber => "tracking_number",
            ExternalKeyKind::EmailThread => "email_thread",
            ExternalKeyKind::InvoiceDocument => "invoice_document",
        }
    }
}

/// An external identifier (tracking number, email-thread id, document id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalKey {
    pub kind: ExternalKeyKind,
    pub value: String,
}

impl ExternalKey {
    pub fn new(kind: ExternalKeyKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn tracking(value: impl Into<String>) -> Self {
        Self::new(ExternalKeyKind::TrackingNumber, value)
    }

    pub fn email_thread(value: impl Into<String>) -> Self {
        Self::new(ExternalKeyKind::EmailThread, value)
    }

    pub fn invoice_document(value: impl Into<String>) -> Self {
        Self::new(ExternalKeyKind::InvoiceDocument, value)
    }
}

impl ValueObject for ExternalKey {}

impl std::fmt::Display for ExternalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.value)
    }
}

/// Typed evidence accompanying an external key, tagged by source.
///
/// Ingestion validates the raw payload into one of these variants before the
/// engine ever sees it; the engine never pattern-matches loose JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Evidence {
    Tracking {
        carrier: String,
        status: String,
        vendor_hint: Option<VendorId>,
    },
    Email {
        sender_domain: String,
        thread_id: Option<String>,
        /// Whether the message landed in a thread already linked to a vendor.
        in_existing_thread: bool,
        /// When the message answers an outbound inquiry, the time that
        /// inquiry was sent (drives vendor response-latency scoring).
        in_reply_to_sent_at: Option<DateTime<Utc>>,
        vendor_hint: Option<VendorId>,
        /// Monetary total mentioned in the message, minor units.
        amount_hint: Option<u64>,
        date_hint: Option<DateTime<Utc>>,
    },
    Invoice {
        /// Purchase-order reference as declared on the document (may be
        /// absent or wrong).
        declared_reference: Option<String>,
        vendor_hint: Option<VendorId>,
        /// Invoice total, minor units.
        amount_hint: Option<u64>,
        date_hint: Option<DateTime<Utc>>,
    },
}

impl Evidence {
    pub fn vendor_hint(&self) -> Option<VendorId> {
        match self {
            Evidence::Tracking { vendor_hint, .. }
            | Evidence::Email { vendor_hint, .. }
            | Evidence::Invoice { vendor_hint, .. } => *vendor_hint,
        }
    }

    pub fn amount_hint(&self) -> Option<u64> {
        match self {
            Evidence::Tracking { .. } => None,
            Evidence::Email { amount_hint, .. } | Evidence::Invoice { amount_hint, .. } => {
                *amount_hint
            }
        }
    }

    pub fn date_hint(&self) -> Option<DateTime<Utc>> {
        match self {
            Evidence::Tracking { .. } => None,
            Evidence::Email { date_hint, .. } | Evidence::Invoice { date_hint, .. } => *date_hint,
        }
    }

    /// Reference strings that may appear verbatim on an open purchase order.
    pub fn declared_reference(&self) -> Option<&str> {
        match self {
            Evidence::Invoice {
                declared_reference, ..
            } => declared_reference.as_deref(),
            _ => None,
        }
    }

    /// Whether this evidence variant is coherent with the key kind.
    pub fn matches_key_kind(&self, kind: ExternalKeyKind) -> bool {
        matches!(
            (self, kind),
            (Evidence::Tracking { .. }, ExternalKeyKind::TrackingNumber)
                | (Evidence::Email { .. }, ExternalKeyKind::EmailThread)
                | (Evidence::Invoice { .. }, ExternalKeyKind::InvoiceDocument)
        )
    }
}

/// A correlation attempt handed in by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRequest {
    pub tenant_id: TenantId,
    pub external_key: ExternalKey,
    pub evidence: Evidence,
    /// Pointer into the document store for audit; the core never reads it.
    pub raw_payload_ref: String,
    pub observed_at: DateTime<Utc>,
}
