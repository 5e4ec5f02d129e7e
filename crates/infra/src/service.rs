//! The reconciliation service facade: ingestion entry points, read-only
//! queries, audited commands, and the correlation → match → score trigger
//! chain, serialized through retry-task keys.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use procurex_core::{ActorId, DomainError, PurchaseOrderId, TenantId, VendorId};
use procurex_correlation::{
    CorrelationConfig, CorrelationEngine, CorrelationEvent, CorrelationLink, CorrelationOutcome,
    CorrelationRequest, DeferredVerification, Evidence, ExternalKey, InMemoryLinkStore, LinkStore,
    UnresolvedCorrelation, VerificationRequest,
};
use procurex_events::{Event, EventBus, EventEnvelope, InMemoryEventBus};
use procurex_matching::{
    InMemoryMatchResultStore, InvoiceDocument, MatchConfig, MatchEngine, MatchEvent,
    MatchResultStore, MatchStatus, ResolutionAction, ShipmentReceipt, ThreeWayMatchResult,
};
use procurex_retry::{
    CoordinatorConfig, DeadLetterAction, EnqueueRequest, InMemoryTaskStore, RetryCoordinator,
    TaskEvent, TaskId, TaskKind, TaskStatus,
};
use procurex_scoring::{
    InMemoryProfileStore, InMemoryVendorHistory, ProfileStore, ScoringConfig, ScoringEvent,
    VendorConfidenceProfile, VendorScorer, WeightTable,
};

use crate::directory::InMemoryOrderBook;
use crate::history_projection::VendorHistoryProjection;
use crate::review_queue::{InMemoryReviewQueue, QueuedReview, ReviewItem, ReviewQueue};

pub type SharedTaskStore = Arc<InMemoryTaskStore>;
pub type SharedCoordinator = Arc<RetryCoordinator<SharedTaskStore>>;
pub type SharedLinks = Arc<InMemoryLinkStore>;
pub type SharedOrderBook = Arc<InMemoryOrderBook<SharedLinks>>;
pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<ReconciliationEvent>>>;

type Correlator = CorrelationEngine<SharedOrderBook, SharedLinks, TaskDeferrals>;
type Matcher = MatchEngine<SharedOrderBook, Arc<InMemoryMatchResultStore>>;
type Scorer = VendorScorer<Arc<InMemoryVendorHistory>, Arc<InMemoryProfileStore>>;

/// All domain events of the reconciliation core on one bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stream", rename_all = "snake_case")]
pub enum ReconciliationEvent {
    Correlation(CorrelationEvent),
    Match(MatchEvent),
    Task(TaskEvent),
    Scoring(ScoringEvent),
}

impl Event for ReconciliationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReconciliationEvent::Correlation(e) => e.event_type(),
            ReconciliationEvent::Match(e) => e.event_type(),
            ReconciliationEvent::Task(e) => e.event_type(),
            ReconciliationEvent::Scoring(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        match self {
            ReconciliationEvent::Correlation(e) => e.version(),
            ReconciliationEvent::Match(e) => e.version(),
            ReconciliationEvent::Task(e) => e.version(),
            ReconciliationEvent::Scoring(e) => e.version(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReconciliationEvent::Correlation(e) => e.occurred_at(),
            ReconciliationEvent::Match(e) => e.occurred_at(),
            ReconciliationEvent::Task(e) => e.occurred_at(),
            ReconciliationEvent::Scoring(e) => e.occurred_at(),
        }
    }
}

/// Defers external verification calls into the retry queue.
pub struct TaskDeferrals {
    coordinator: SharedCoordinator,
}

impl DeferredVerification for TaskDeferrals {
    fn defer_verification(&self, request: VerificationRequest) -> Result<(), String> {
        let payload = serde_json::to_value(&request).map_err(|e| e.to_string())?;
        self.coordinator
            .enqueue(EnqueueRequest::new(
                request.tenant_id,
                TaskKind::external_verification(request.service.clone()),
                payload,
            ))
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Bundled configuration for the whole core.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub correlation: CorrelationConfig,
    pub matching: MatchConfig,
    pub scoring: ScoringConfig,
    pub weights: WeightTable,
    pub coordinator: CoordinatorConfig,
}

/// The assembled reconciliation core.
pub struct ReconciliationService {
    coordinator: SharedCoordinator,
    links: SharedLinks,
    order_book: SharedOrderBook,
    match_results: Arc<InMemoryMatchResultStore>,
    profiles: Arc<InMemoryProfileStore>,
    review_queue: Arc<InMemoryReviewQueue>,
    bus: SharedBus,
    correlator: Correlator,
    matcher: Matcher,
    scorer: Scorer,
    projection: VendorHistoryProjection<Arc<InMemoryVendorHistory>>,
    sequence: Arc<AtomicU64>,
}

impl ReconciliationService {
    pub fn new(config: ServiceConfig) -> Result<Arc<Self>, DomainError> {
        let task_store = InMemoryTaskStore::arc();
        let coordinator = Arc::new(RetryCoordinator::new(task_store, config.coordinator));
        let links = InMemoryLinkStore::arc();
        let order_book = Arc::new(InMemoryOrderBook::new(links.clone()));
        let match_results = InMemoryMatchResultStore::arc();
        let history = InMemoryVendorHistory::arc();
        let profiles = InMemoryProfileStore::arc();
        let review_queue = InMemoryReviewQueue::arc();
        let bus: SharedBus = Arc::new(InMemoryEventBus::new());
        let sequence = Arc::new(AtomicU64::new(0));

        let correlator = CorrelationEngine::new(
            order_book.clone(),
            links.clone(),
            TaskDeferrals {
                coordinator: coordinator.clone(),
            },
            config.correlation,
        );
        let matcher = MatchEngine::new(order_book.clone(), match_results.clone(), config.matching);
        let scorer = VendorScorer::new(
            history.clone(),
            profiles.clone(),
            config.weights,
            config.scoring,
        )?;
        let projection = VendorHistoryProjection::new(history.clone());

        // Dead letters surface on the review queue and the bus.
        {
            let queue = review_queue.clone();
            let bus = bus.clone();
            let sequence = sequence.clone();
            coordinator.set_dead_letter_listener(move |task, event| {
                let error = match &task.status {
                    TaskStatus::Dead { error, .. } => error.clone(),
                    _ => String::new(),
                };
                queue.push(ReviewItem::DeadLetteredTask {
                    tenant_id: task.tenant_id,
                    task_id: task.id,
                    operation: task.kind.operation().to_string(),
                    error,
                });
                publish(
                    &bus,
                    &sequence,
                    task.tenant_id,
                    task.id.0,
                    "retry_task",
                    ReconciliationEvent::Task(event.clone()),
                );
            });
        }

        Ok(Arc::new(Self {
            coordinator,
            links,
            order_book,
            match_results,
            profiles,
            review_queue,
            bus,
            correlator,
            matcher,
            scorer,
            projection,
            sequence,
        }))
    }

    pub fn coordinator(&self) -> &SharedCoordinator {
        &self.coordinator
    }

    pub fn order_book(&self) -> &SharedOrderBook {
        &self.order_book
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    // ---- ingestion -------------------------------------------------------

    /// Correlate an inbound external event and kick off downstream work.
    pub fn ingest_external_event(
        &self,
        request: CorrelationRequest,
    ) -> Result<CorrelationOutcome, DomainError> {
        let outcome = self.correlator.correlate(&request)?;

        match &outcome {
            CorrelationOutcome::Linked { link, superseded } => {
                self.publish_link_recorded(link, Some(&request.evidence), request.observed_at);
                if let Some(old) = superseded {
                    self.publish(
                        link.tenant_id,
                        link.id.0,
                        "correlation_link",
                        ReconciliationEvent::Correlation(CorrelationEvent::LinkSuperseded {
                            tenant_id: link.tenant_id,
                            old_link_id: *old,
                            new_link_id: link.id,
                            external_key: link.external_key.clone(),
                            occurred_at: Utc::now(),
                        }),
                    );
                }
                self.enqueue_match(link.tenant_id, link.purchase_order_id)?;
                self.enqueue_score(link.tenant_id, link.vendor_id)?;
            }
            CorrelationOutcome::SightingRecorded { link } => {
                self.publish(
                    link.tenant_id,
                    link.id.0,
                    "correlation_link",
                    ReconciliationEvent::Correlation(CorrelationEvent::SightingRecorded {
                        tenant_id: link.tenant_id,
                        link_id: link.id,
                        method: link.method,
                        confidence: link.confidence,
                        occurred_at: Utc::now(),
                    }),
                );
            }
            CorrelationOutcome::Deferred { .. } => {
                // The verification task owns the attempt from here.
            }
            CorrelationOutcome::Unresolved(unresolved) => {
                self.record_unresolved(unresolved.clone());
            }
        }

        Ok(outcome)
    }

    /// Register a normalized shipment receipt arriving from ingestion.
    /// Triggers a match recomputation when the key is already linked.
    pub fn register_receipt(
        &self,
        key: ExternalKey,
        receipt: ShipmentReceipt,
    ) -> Result<(), DomainError> {
        let tenant_id = receipt.tenant_id;
        self.order_book.register_receipt(key.clone(), receipt);
        if let Some(link) = self
            .links
            .active_link(tenant_id, &key)
            .map_err(|e| DomainError::conflict(e.to_string()))?
        {
            self.enqueue_match(tenant_id, link.purchase_order_id)?;
        }
        Ok(())
    }

    /// Register a normalized vendor invoice arriving from ingestion.
    pub fn register_invoice(
        &self,
        key: ExternalKey,
        invoice: InvoiceDocument,
    ) -> Result<(), DomainError> {
        let tenant_id = invoice.tenant_id;
        self.order_book.register_invoice(key.clone(), invoice);
        if let Some(link) = self
            .links
            .active_link(tenant_id, &key)
            .map_err(|e| DomainError::conflict(e.to_string()))?
        {
            self.enqueue_match(tenant_id, link.purchase_order_id)?;
        }
        Ok(())
    }

    /// Outcome of an automated follow-up, reported by the outreach layer.
    pub fn record_followup_outcome(
        &self,
        tenant_id: TenantId,
        vendor_id: VendorId,
        answered: bool,
    ) -> Result<(), DomainError> {
        self.projection
            .record_followup(tenant_id, vendor_id, answered, Utc::now())
            .map_err(DomainError::conflict)?;
        self.enqueue_score(tenant_id, vendor_id)
    }

    /// A delivery's promised-vs-actual lead time, reported by ingestion.
    pub fn record_lead_time(
        &self,
        tenant_id: TenantId,
        vendor_id: VendorId,
        promised_days: f64,
        actual_days: f64,
    ) -> Result<(), DomainError> {
        self.projection
            .record_lead_time(tenant_id, vendor_id, promised_days, actual_days)
            .map_err(DomainError::conflict)?;
        self.enqueue_score(tenant_id, vendor_id)
    }

    /// Queue an unresolved correlation for human review.
    pub fn record_unresolved(&self, unresolved: UnresolvedCorrelation) {
        self.publish(
            unresolved.tenant_id,
            Uuid::now_v7(),
            "correlation_attempt",
            ReconciliationEvent::Correlation(CorrelationEvent::Unresolved {
                tenant_id: unresolved.tenant_id,
                external_key: unresolved.external_key.clone(),
                reason: unresolved.reason.clone(),
                occurred_at: unresolved.observed_at,
            }),
        );
        self.review_queue
            .push(ReviewItem::UnresolvedCorrelation(unresolved));
    }

    // ---- engine entry points (run by workers) ----------------------------

    /// Recompute the three-way match for an order and fan out its effects.
    pub fn recompute_match(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<ThreeWayMatchResult, DomainError> {
        let (result, event) = self.matcher.compute(tenant_id, purchase_order_id)?;

        self.projection
            .apply_match(&event)
            .map_err(DomainError::conflict)?;
        self.publish(
            tenant_id,
            *purchase_order_id.as_uuid(),
            "purchase_order",
            ReconciliationEvent::Match(event),
        );

        if result.match_status == MatchStatus::Discrepant {
            self.review_queue.push(ReviewItem::DiscrepantMatch {
                tenant_id,
                purchase_order_id,
                overall_score: result.overall_score,
                discrepant_lines: result.line_discrepancies.len() as u32,
            });
        }

        self.enqueue_score(tenant_id, result.vendor_id)?;
        Ok(result)
    }

    /// Recalculate one vendor's confidence profile.
    pub fn recalculate_vendor(
        &self,
        tenant_id: TenantId,
        vendor_id: VendorId,
        trigger: &str,
    ) -> Result<VendorConfidenceProfile, DomainError> {
        let (profile, event) = self.scorer.recalculate(tenant_id, vendor_id, trigger)?;
        self.publish(
            tenant_id,
            *vendor_id.as_uuid(),
            "vendor",
            ReconciliationEvent::Scoring(event),
        );
        Ok(profile)
    }

    /// Scheduled sweep: recalculate profiles untouched for `max_age`, so
    /// scores age out even for vendors with no new events.
    pub fn sweep_vendor_scores(
        &self,
        tenant_id: TenantId,
        max_age: chrono::Duration,
    ) -> Result<Vec<VendorId>, DomainError> {
        let cutoff = Utc::now() - max_age;
        let stale = self
            .profiles
            .list_stale(tenant_id, cutoff)
            .map_err(|e| DomainError::conflict(e.to_string()))?;

        let mut swept = Vec::with_capacity(stale.len());
        for profile in stale {
            self.recalculate_vendor(tenant_id, profile.vendor_id, "scheduled_sweep")?;
            swept.push(profile.vendor_id);
        }
        Ok(swept)
    }

    /// Close a purchase order: no further correlation targets it and its
    /// match row is dropped (results are retained only until close).
    pub fn close_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<(), DomainError> {
        self.order_book.close_order(purchase_order_id);
        match self.match_results.remove(tenant_id, purchase_order_id) {
            Ok(()) => Ok(()),
            // Closing an order that never reached matching is fine.
            Err(procurex_matching::MatchStoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(DomainError::conflict(e.to_string())),
        }
    }

    // ---- queries ---------------------------------------------------------

    pub fn match_result(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Option<ThreeWayMatchResult>, DomainError> {
        self.match_results
            .get(tenant_id, purchase_order_id)
            .map_err(|e| DomainError::conflict(e.to_string()))
    }

    pub fn correlation_links(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<Vec<CorrelationLink>, DomainError> {
        self.links
            .links_for_order(tenant_id, purchase_order_id)
            .map_err(|e| DomainError::conflict(e.to_string()))
    }

    pub fn vendor_confidence(
        &self,
        tenant_id: TenantId,
        vendor_id: VendorId,
    ) -> Result<Option<VendorConfidenceProfile>, DomainError> {
        self.profiles
            .get(tenant_id, vendor_id)
            .map_err(|e| DomainError::conflict(e.to_string()))
    }

    pub fn pending_reviews(&self, tenant_id: TenantId) -> Vec<QueuedReview> {
        self.review_queue.pending(tenant_id)
    }

    // ---- audited commands ------------------------------------------------

    /// Operator resolution of a dead-lettered task.
    pub fn resolve_dead_letter(
        &self,
        tenant_id: TenantId,
        task_id: TaskId,
        action: DeadLetterAction,
        actor: ActorId,
    ) -> Result<(), DomainError> {
        let (_, event) = self
            .coordinator
            .resolve_dead_letter(tenant_id, task_id, action, actor)
            .map_err(|e| DomainError::conflict(e.to_string()))?;
        self.publish(
            tenant_id,
            task_id.0,
            "retry_task",
            ReconciliationEvent::Task(event),
        );

        // The queue entry is resolved along with the task.
        let resolved: Vec<_> = self
            .review_queue
            .pending(tenant_id)
            .into_iter()
            .filter(|q| {
                matches!(
                    &q.item,
                    ReviewItem::DeadLetteredTask { task_id: t, .. } if *t == task_id
                )
            })
            .collect();
        for entry in resolved {
            self.review_queue.remove(entry.id);
        }
        Ok(())
    }

    /// Human override of a match outcome.
    pub fn override_match(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        action: ResolutionAction,
        actor: ActorId,
    ) -> Result<ThreeWayMatchResult, DomainError> {
        let result = self
            .match_results
            .set_resolution(tenant_id, purchase_order_id, action)
            .map_err(|e| DomainError::conflict(e.to_string()))?;

        self.publish(
            tenant_id,
            *purchase_order_id.as_uuid(),
            "purchase_order",
            ReconciliationEvent::Match(MatchEvent::MatchOverridden {
                tenant_id,
                purchase_order_id,
                action,
                actor,
                occurred_at: Utc::now(),
            }),
        );
        self.projection
            .record_override(tenant_id, result.vendor_id, purchase_order_id)
            .map_err(DomainError::conflict)?;
        self.enqueue_score(tenant_id, result.vendor_id)?;
        Ok(result)
    }

    /// Human correlation of an external key to a purchase order.
    pub fn manual_correlate(
        &self,
        tenant_id: TenantId,
        external_key: ExternalKey,
        purchase_order_id: PurchaseOrderId,
        actor: ActorId,
    ) -> Result<CorrelationOutcome, DomainError> {
        let outcome =
            self.correlator
                .manual_correlate(tenant_id, external_key.clone(), purchase_order_id, actor)?;

        if let CorrelationOutcome::Linked { link, superseded } = &outcome {
            self.publish(
                tenant_id,
                link.id.0,
                "correlation_link",
                ReconciliationEvent::Correlation(CorrelationEvent::ManuallyCorrelated {
                    tenant_id,
                    link_id: link.id,
                    purchase_order_id,
                    actor,
                    occurred_at: Utc::now(),
                }),
            );
            self.publish_link_recorded(link, None, Utc::now());
            if let Some(old) = superseded {
                self.publish(
                    tenant_id,
                    link.id.0,
                    "correlation_link",
                    ReconciliationEvent::Correlation(CorrelationEvent::LinkSuperseded {
                        tenant_id,
                        old_link_id: *old,
                        new_link_id: link.id,
                        external_key: link.external_key.clone(),
                        occurred_at: Utc::now(),
                    }),
                );
            }

            // Human decisions close out any unresolved entry for the key.
            let resolved: Vec<_> = self
                .review_queue
                .pending(tenant_id)
                .into_iter()
                .filter(|q| {
                    matches!(
                        &q.item,
                        ReviewItem::UnresolvedCorrelation(u) if u.external_key == external_key
                    )
                })
                .collect();
            for entry in resolved {
                self.review_queue.remove(entry.id);
            }

            self.enqueue_match(tenant_id, purchase_order_id)?;
            self.enqueue_score(tenant_id, link.vendor_id)?;
        }

        Ok(outcome)
    }

    // ---- internals -------------------------------------------------------

    fn publish_link_recorded(
        &self,
        link: &CorrelationLink,
        evidence: Option<&Evidence>,
        observed_at: DateTime<Utc>,
    ) {
        let (in_existing_thread, reply_latency_hours) = evidence
            .map(|e| email_facts(e, observed_at))
            .unwrap_or((None, None));
        let event = CorrelationEvent::LinkRecorded {
            tenant_id: link.tenant_id,
            link_id: link.id,
            external_key: link.external_key.clone(),
            purchase_order_id: link.purchase_order_id,
            vendor_id: link.vendor_id,
            method: link.method,
            confidence: link.confidence,
            in_existing_thread,
            reply_latency_hours,
            occurred_at: observed_at,
        };
        if let Err(e) = self.projection.apply_correlation(&event) {
            warn!(error = %e, "failed to project correlation interaction");
        }
        self.publish(
            link.tenant_id,
            link.id.0,
            "correlation_link",
            ReconciliationEvent::Correlation(event),
        );
    }

    fn enqueue_match(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> Result<(), DomainError> {
        self.coordinator
            .enqueue(EnqueueRequest::new(
                tenant_id,
                TaskKind::match_recompute(purchase_order_id),
                serde_json::Value::Null,
            ))
            .map(|_| ())
    }

    fn enqueue_score(&self, tenant_id: TenantId, vendor_id: VendorId) -> Result<(), DomainError> {
        self.coordinator
            .enqueue(EnqueueRequest::new(
                tenant_id,
                TaskKind::score_recalculation(vendor_id),
                serde_json::Value::Null,
            ))
            .map(|_| ())
    }

    fn publish(
        &self,
        tenant_id: TenantId,
        subject_id: Uuid,
        subject_type: &str,
        event: ReconciliationEvent,
    ) {
        publish(
            &self.bus,
            &self.sequence,
            tenant_id,
            subject_id,
            subject_type,
            event,
        );
    }
}

fn publish(
    bus: &SharedBus,
    sequence: &Arc<AtomicU64>,
    tenant_id: TenantId,
    subject_id: Uuid,
    subject_type: &str,
    event: ReconciliationEvent,
) {
    let seq = sequence.fetch_add(1, Ordering::SeqCst);
    let envelope = EventEnvelope::new(
        Uuid::now_v7(),
        tenant_id,
        subject_id,
        subject_type,
        seq,
        event,
    );
    if bus.publish(envelope).is_err() {
        warn!("event bus publish failed");
    }
}

/// Threading and latency facts carried by email evidence.
fn email_facts(evidence: &Evidence, observed_at: DateTime<Utc>) -> (Option<bool>, Option<f64>) {
    if let Evidence::Email {
        in_existing_thread,
        in_reply_to_sent_at,
        ..
    } = evidence
    {
        let latency = in_reply_to_sent_at
            .map(|sent| ((observed_at - sent).num_seconds() as f64 / 3600.0).max(0.0));
        (Some(*in_existing_thread), latency)
    } else {
        (None, None)
    }
}

