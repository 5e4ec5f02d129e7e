//! Vendor confidence profiles and their store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procurex_core::{Entity, TenantId, VendorId};

/// Per-dimension scores, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    /// Fraction of orders with both receipt and invoice correlated before the
    /// expected date.
    pub completeness: f64,
    /// Inverse of promised-vs-actual lead-time variance.
    pub lead_time: f64,
    /// 1 − average match discrepancy magnitude.
    pub invoice_accuracy: f64,
    /// Inverse of average inquiry-to-reply latency.
    pub response_latency: f64,
    /// Fraction of inbound mail landing in an existing thread.
    pub threading: f64,
    /// Fraction of automated follow-ups answered before escalation.
    pub followup_response: f64,
}

/// Direction of score movement against the aged snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

/// A past score retained for trend comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub score: f64,
    pub taken_at: DateTime<Utc>,
}

/// The scorer's output row, one per vendor, replaced on recalculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorConfidenceProfile {
    pub vendor_id: VendorId,
    pub tenant_id: TenantId,
    pub components: ComponentScores,
    /// Weighted aggregate of the components under `weight_version`.
    pub confidence_score: f64,
    pub weight_version: u32,
    pub trend: Trend,
    pub interactions_count: u64,
    /// Baseline for the trend comparison; rolled forward as it ages out.
    pub score_snapshot: Option<ScoreSnapshot>,
    pub last_recalculated_at: DateTime<Utc>,
}

impl Entity for VendorConfidenceProfile {
    type Id = VendorId;

    fn id(&self) -> &Self::Id {
        &self.vendor_id
    }
}

/// Profile store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProfileStoreError {
    #[error("no profile for vendor {0}")]
    NotFound(VendorId),
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Storage abstraction for vendor profiles. Owned exclusively by the scorer;
/// other components read through the service facade and never write.
pub trait ProfileStore: Send + Sync {
    fn upsert(&self, profile: VendorConfidenceProfile) -> Result<(), ProfileStoreError>;

    fn get(
        &self,
        tenant_id: TenantId,
        vendor_id: VendorId,
    ) -> Result<Option<VendorConfidenceProfile>, ProfileStoreError>;

    /// Profiles not recalculated since the cutoff, oldest first — the
    /// scheduled sweep's work list.
    fn list_stale(
        &self,
        tenant_id: TenantId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<VendorConfidenceProfile>, ProfileStoreError>;
}

impl<T> ProfileStore for Arc<T>
where
    T: ProfileStore + ?Sized,
{
    fn upsert(&self, profile: VendorConfidenceProfile) -> Result<(), ProfileStoreError> {
        (**self).upsert(profile)
    }

    fn get(
        &self,
        tenant_id: TenantId,
        vendor_id: VendorId,
    ) -> Result<Option<VendorConfidenceProfile>, ProfileStoreError> {
        (**self).get(tenant_id, vendor_id)
    }

    fn list_stale(
        &self,
        tenant_id: TenantId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<VendorConfidenceProfile>, ProfileStoreError> {
        (**self).list_stale(tenant_id, cutoff)
    }
}

/// In-memory profile store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<VendorId, VendorConfidenceProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn upsert(&self, profile: VendorConfidenceProfile) -> Result<(), ProfileStoreError> {
        self.profiles
            .write()
            .unwrap()
            .insert(profile.vendor_id, profile);
        Ok(())
    }

    fn get(
        &self,
        tenant_id: TenantId,
        vendor_id: VendorId,
    ) -> Result<Option<VendorConfidenceProfile>, ProfileStoreError> {
        let profiles = self.profiles.read().unwrap();
        match profiles.get(&vendor_id) {
            Some(profile) if profile.tenant_id == tenant_id => Ok(Some(profile.clone())),
            Some(_) => Err(ProfileStoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    fn list_stale(
        &self,
        tenant_id: TenantId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<VendorConfidenceProfile>, ProfileStoreError> {
        let profiles = self.profiles.read().unwrap();
        let mut result: Vec<_> = profiles
            .values()
            .filter(|p| p.tenant_id == tenant_id && p.last_recalculated_at < cutoff)
            .cloned()
            .collect();
        result.sort_by_key(|p| p.last_recalculated_at);
        Ok(result)
    }
}
