//! Match result storage: one row per purchase order, idempotent replace.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use procurex_core::{PurchaseOrderId, TenantId};

use crate::result::{ResolutionAction, ThreeWayMatchResult};

/// Match store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MatchStoreError {
    #[error("no match result for purchase order {0}")]
    NotFound(PurchaseOrderId),
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Storage abstraction for match results.
///
/// Unlike correlation links there is no history here: recomputation replaces
/// the row for the purchase order wholesale.
pub trait MatchResultStore: Send + Sync {
    /// Insert or replace the row for the result's purchase order.
    fn upsert(&self, result: ThreeWayMatchResult) -> Result<(), MatchStoreError>;

    fn get(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Option<ThreeWayMatchResult>, MatchStoreError>;

    /// Set the human/policy resolution on a stored result.
    fn set_resolution(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        action: ResolutionAction,
    ) -> Result<ThreeWayMatchResult, MatchStoreError>;

    /// Remove the row once the purchase order is closed.
    fn remove(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<(), MatchStoreError>;
}

impl<T> MatchResultStore for Arc<T>
where
    T: MatchResultStore + ?Sized,
{
    fn upsert(&self, result: ThreeWayMatchResult) -> Result<(), MatchStoreError> {
        (**self).upsert(result)
    }

    fn get(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Option<ThreeWayMatchResult>, MatchStoreError> {
        (**self).get(tenant_id, purchase_order_id)
    }

    fn set_resolution(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        action: ResolutionAction,
    ) -> Result<ThreeWayMatchResult, MatchStoreError> {
        (**self).set_resolution(tenant_id, purchase_order_id, action)
    }

    fn remove(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<(), MatchStoreError> {
        (**self).remove(tenant_id, purchase_order_id)
    }
}

/// In-memory match result store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMatchResultStore {
    results: RwLock<HashMap<PurchaseOrderId, ThreeWayMatchResult>>,
}

impl InMemoryMatchResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl MatchResultStore for InMemoryMatchResultStore {
    fn upsert(&self, result: ThreeWayMatchResult) -> Result<(), MatchStoreError> {
        let mut results = self.results.write().unwrap();
        results.insert(result.purchase_order_id, result);
        Ok(())
    }

    fn get(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Option<ThreeWayMatchResult>, MatchStoreError> {
        let results = self.results.read().unwrap();
        match results.get(&purchase_order_id) {
            Some(result) if result.tenant_id == tenant_id => Ok(Some(result.clone())),
            Some(_) => Err(MatchStoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    fn set_resolution(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        action: ResolutionAction,
    ) -> Result<ThreeWayMatchResult, MatchStoreError> {
        let mut results = self.results.write().unwrap();
        let result = results
            .get_mut(&purchase_order_id)
            .ok_or(MatchStoreError::NotFound(purchase_order_id))?;
        if result.tenant_id != tenant_id {
            return Err(MatchStoreError::TenantIsolation);
        }
        result.resolution_action = Some(action);
        result.computed_at = Utc::now();
        Ok(result.clone())
    }

    fn remove(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<(), MatchStoreError> {
        let mut results = self.results.write().unwrap();
        match results.get(&purchase_order_id) {
            Some(result) if result.tenant_id != tenant_id => {
                Err(MatchStoreError::TenantIsolation)
            }
            Some(_) => {
                results.remove(&purchase_order_id);
                Ok(())
            }
            None => Err(MatchStoreError::NotFound(purchase_order_id)),
        }
    }
}
