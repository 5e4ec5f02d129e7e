//! Link storage with non-downgrade supersede semantics.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use procurex_core::{PurchaseOrderId, TenantId};

use crate::evidence::ExternalKey;
use crate::link::{CorrelationLink, LinkId, LinkState, Sighting};

/// Link store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LinkStoreError {
    #[error("link not found: {0}")]
    NotFound(LinkId),
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result of offering a candidate link to the store.
#[derive(Debug, Clone)]
pub enum LinkWrite {
    /// No active link existed for the key; the candidate is now active.
    Created(CorrelationLink),
    /// The candidate outranked the active link and superseded it.
    Superseded {
        new: CorrelationLink,
        old: LinkId,
    },
    /// An equal-or-stronger link already exists; the candidate was recorded
    /// as a sighting on it and the active link is unchanged.
    SightingRecorded(CorrelationLink),
}

impl LinkWrite {
    /// The link that is active for the key after the write.
    pub fn active_link(&self) -> &CorrelationLink {
        match self {
            LinkWrite::Created(link) => link,
            LinkWrite::Superseded { new, .. } => new,
            LinkWrite::SightingRecorded(link) => link,
        }
    }
}

/// Storage abstraction for correlation links.
///
/// Invariant: at most one Active link per `(tenant, key kind, key value)`;
/// superseded links are retained, never deleted.
pub trait LinkStore: Send + Sync {
    /// Offer a candidate link. The store applies the non-downgrade rule
    /// atomically: a candidate with confidence less than or equal to the
    /// current active link becomes a sighting, a stronger candidate
    /// supersedes.
    fn record(
        &self,
        candidate: CorrelationLink,
        raw_payload_ref: &str,
    ) -> Result<LinkWrite, LinkStoreError>;

    /// Currently active link for a key, if any.
    fn active_link(
        &self,
        tenant_id: TenantId,
        key: &ExternalKey,
    ) -> Result<Option<CorrelationLink>, LinkStoreError>;

    /// All links (active and superseded) attached to a purchase order,
    /// oldest first.
    fn links_for_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Vec<CorrelationLink>, LinkStoreError>;

    /// Get a link by id.
    fn get(&self, tenant_id: TenantId, link_id: LinkId)
        -> Result<Option<CorrelationLink>, LinkStoreError>;
}

impl<T> LinkStore for Arc<T>
where
    T: LinkStore + ?Sized,
{
    fn record(
        &self,
        candidate: CorrelationLink,
        raw_payload_ref: &str,
    ) -> Result<LinkWrite, LinkStoreError> {
        (**self).record(candidate, raw_payload_ref)
    }

    fn active_link(
        &self,
        tenant_id: TenantId,
        key: &ExternalKey,
    ) -> Result<Option<CorrelationLink>, LinkStoreError> {
        (**self).active_link(tenant_id, key)
    }

    fn links_for_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Vec<CorrelationLink>, LinkStoreError> {
        (**self).links_for_order(tenant_id, purchase_order_id)
    }

    fn get(
        &self,
        tenant_id: TenantId,
        link_id: LinkId,
    ) -> Result<Option<CorrelationLink>, LinkStoreError> {
        (**self).get(tenant_id, link_id)
    }
}

/// In-memory link store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLinkStore {
    links: RwLock<HashMap<LinkId, CorrelationLink>>,
}

impl InMemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl LinkStore for InMemoryLinkStore {
    fn record(
        &self,
        candidate: CorrelationLink,
        raw_payload_ref: &str,
    ) -> Result<LinkWrite, LinkStoreError> {
        let mut links = self.links.write().unwrap();

        let existing_active = links
            .values()
            .find(|l| {
                l.tenant_id == candidate.tenant_id
                    && l.external_key == candidate.external_key
                    && l.is_active()
            })
            .map(|l| l.id);

        match existing_active {
            None => {
                let id = candidate.id;
                links.insert(id, candidate);
                Ok(LinkWrite::Created(links[&id].clone()))
            }
            Some(active_id) => {
                let active_confidence = links[&active_id].confidence;
                if candidate.confidence > active_confidence {
                    let new_id = candidate.id;
                    if let Some(old) = links.get_mut(&active_id) {
                        old.state = LinkState::Superseded { by: new_id };
                    }
                    links.insert(new_id, candidate);
                    Ok(LinkWrite::Superseded {
                        new: links[&new_id].clone(),
                        old: active_id,
                    })
                } else {
                    let sighting = Sighting {
                        observed_at: Utc::now(),
                        method: candidate.method,
                        confidence: candidate.confidence,
                        raw_payload_ref: raw_payload_ref.to_string(),
                    };
                    let active = links.get_mut(&active_id).expect("active link exists");
                    active.sightings.push(sighting);
                    Ok(LinkWrite::SightingRecorded(active.clone()))
                }
            }
        }
    }

    fn active_link(
        &self,
        tenant_id: TenantId,
        key: &ExternalKey,
    ) -> Result<Option<CorrelationLink>, LinkStoreError> {
        let links = self.links.read().unwrap();
        Ok(links
            .values()
            .find(|l| l.tenant_id == tenant_id && &l.external_key == key && l.is_active())
            .cloned())
    }

    fn links_for_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Vec<CorrelationLink>, LinkStoreError> {
        let links = self.links.read().unwrap();
        let mut result: Vec<_> = links
            .values()
            .filter(|l| l.tenant_id == tenant_id && l.purchase_order_id == purchase_order_id)
            .cloned()
            .collect();
        result.sort_by_key(|l| l.created_at);
        Ok(result)
    }

    fn get(
        &self,
        tenant_id: TenantId,
        link_id: LinkId,
    ) -> Result<Option<CorrelationLink>, LinkStoreError> {
        let links = self.links.read().unwrap();
        match links.get(&link_id) {
            Some(link) if link.tenant_id == tenant_id => Ok(Some(link.clone())),
            Some(_) => Err(LinkStoreError::TenantIsolation),
            None => Ok(None),
        }
    }
}
