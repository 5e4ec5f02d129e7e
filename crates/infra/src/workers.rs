//! Handler wiring: binds task kinds to engine entry points on a retry
//! worker. Spawn as many workers as needed; the lease mechanism keeps them
//! from stepping on each other.

use std::sync::Arc;

use chrono::Utc;

use procurex_core::TenantId;
use procurex_correlation::{CorrelationRequest, UnresolvedCorrelation, VerificationRequest};
use procurex_retry::{TaskKind, TaskOutcome, TaskStoreError, TaskWorker};

use crate::service::{ReconciliationService, SharedTaskStore};

/// Client for the external verification service (carrier lookups, document
/// verification). Owned by the ingestion layer; the core only sees this port.
pub trait VerificationClient: Send + Sync {
    /// `Ok(Some)` hands back enriched evidence for a fresh correlation
    /// attempt; `Ok(None)` means verified with nothing learned. Transient
    /// failures are `Err` and retried on the backoff schedule.
    fn verify(&self, request: &VerificationRequest)
        -> Result<Option<CorrelationRequest>, String>;
}

/// Verification client that never learns anything. For dev and tests.
pub struct NoopVerificationClient;

impl VerificationClient for NoopVerificationClient {
    fn verify(
        &self,
        _request: &VerificationRequest,
    ) -> Result<Option<CorrelationRequest>, String> {
        Ok(None)
    }
}

/// Build a worker with the reconciliation handlers registered.
pub fn build_worker(
    service: &Arc<ReconciliationService>,
    verification: Arc<dyn VerificationClient>,
) -> TaskWorker<SharedTaskStore> {
    let mut worker = TaskWorker::new(service.coordinator().clone());

    {
        let service = service.clone();
        worker.register_handler("match.recompute", move |task| {
            let TaskKind::MatchRecompute { purchase_order_id } = &task.kind else {
                return TaskOutcome::Failure("task kind does not carry a purchase order".to_string());
            };
            match service.recompute_match(task.tenant_id, *purchase_order_id) {
                Ok(_) => TaskOutcome::Success,
                Err(e) => TaskOutcome::Failure(e.to_string()),
            }
        });
    }

    {
        let service = service.clone();
        worker.register_handler("score.recalculate", move |task| {
            let TaskKind::ScoreRecalculation { vendor_id } = &task.kind else {
                return TaskOutcome::Failure("task kind does not carry a vendor".to_string());
            };
            match service.recalculate_vendor(task.tenant_id, *vendor_id, "domain_event") {
                Ok(_) => TaskOutcome::Success,
                Err(e) => TaskOutcome::Failure(e.to_string()),
            }
        });
    }

    {
        let service = service.clone();
        worker.register_handler("carrier.*", move |task| {
            let request: VerificationRequest = match serde_json::from_value(task.payload.clone()) {
                Ok(request) => request,
                Err(e) => {
                    return TaskOutcome::Failure(format!("malformed verification payload: {e}"));
                }
            };
            match verification.verify(&request) {
                Ok(Some(correlation)) => match service.ingest_external_event(correlation) {
                    Ok(_) => TaskOutcome::Success,
                    Err(e) => TaskOutcome::Failure(e.to_string()),
                },
                Ok(None) => {
                    service.record_unresolved(UnresolvedCorrelation {
                        tenant_id: request.tenant_id,
                        external_key: request.external_key,
                        reason: "verification returned no purchase order".to_string(),
                        raw_payload_ref: request.raw_payload_ref,
                        observed_at: Utc::now(),
                    });
                    TaskOutcome::Success
                }
                Err(e) => TaskOutcome::Failure(e),
            }
        });
    }

    worker
}

/// Run every currently due task to completion. Returns how many ran.
/// For tests and synchronous callers; production deployments spawn the
/// worker instead.
pub fn drain(
    worker: &TaskWorker<SharedTaskStore>,
    tenant_id: TenantId,
) -> Result<usize, TaskStoreError> {
    let mut processed = 0;
    while worker.run_once(Some(tenant_id))? {
        processed += 1;
    }
    Ok(processed)
}
