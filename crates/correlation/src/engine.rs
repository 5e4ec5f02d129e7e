//! The ranked-strategy correlation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use procurex_core::{ActorId, DomainError, PurchaseOrderId, TenantId};

use crate::directory::{OpenOrderSummary, OrderDirectory};
use crate::evidence::{CorrelationRequest, Evidence, ExternalKey, ExternalKeyKind};
use crate::link::{Confidence, CorrelationLink, CorrelationMethod};
use crate::store::{LinkStore, LinkWrite};

/// Engine configuration. Each strategy can be disabled independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub enable_exact_identifier: bool,
    pub enable_vendor_amount_date: bool,
    pub enable_email_domain: bool,
    /// Relative tolerance when comparing an evidence amount to an order total.
    pub amount_tolerance_pct: f64,
    /// How far back an order date may lie from the evidence date.
    pub date_window_days: i64,
    /// Confidence for a match via an already-linked email thread.
    pub thread_confidence: f64,
    /// Confidence for a match via sender domain alone.
    pub domain_confidence: f64,
    /// Defer tracking-number correlation misses to an external carrier
    /// verification service instead of giving up immediately.
    pub verify_unmatched_tracking: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            enable_exact_identifier: true,
            enable_vendor_amount_date: true,
            enable_email_domain: true,
            amount_tolerance_pct: 0.05,
            date_window_days: 30,
            thread_confidence: 0.60,
            domain_confidence: 0.50,
            verify_unmatched_tracking: false,
        }
    }
}

/// A correlation attempt that could not pick a purchase order.
/// Surfaced to the human review queue, never silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedCorrelation {
    pub tenant_id: TenantId,
    pub external_key: ExternalKey,
    pub reason: String,
    pub raw_payload_ref: String,
    pub observed_at: DateTime<Utc>,
}

/// Request for an external verification call, executed as a retry task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub tenant_id: TenantId,
    pub service: String,
    pub external_key: ExternalKey,
    pub raw_payload_ref: String,
}

/// Port through which the engine schedules external verification work.
///
/// Implemented against the retry coordinator so a transient outage of the
/// verification service never loses the correlation attempt.
pub trait DeferredVerification: Send + Sync {
    fn defer_verification(&self, request: VerificationRequest) -> Result<(), String>;
}

/// Outcome of a correlation attempt.
#[derive(Debug, Clone)]
pub enum CorrelationOutcome {
    /// A link is now active for the key (created fresh or superseding).
    Linked {
        link: CorrelationLink,
        superseded: Option<crate::link::LinkId>,
    },
    /// An equal-or-stronger link already existed; evidence recorded as a
    /// secondary sighting only.
    SightingRecorded { link: CorrelationLink },
    /// Verification was handed to the retry coordinator; a later attempt
    /// with enriched evidence will resolve the key.
    Deferred { request: VerificationRequest },
    /// No strategy matched; queued for a human.
    Unresolved(UnresolvedCorrelation),
}

/// Multi-strategy correlation engine.
pub struct CorrelationEngine<D, L, V> {
    directory: D,
    links: L,
    deferrals: V,
    config: CorrelationConfig,
}

impl<D, L, V> CorrelationEngine<D, L, V>
where
    D: OrderDirectory,
    L: LinkStore,
    V: DeferredVerification,
{
    pub fn new(directory: D, links: L, deferrals: V, config: CorrelationConfig) -> Self {
        Self {
            directory,
            links,
            deferrals,
            config,
        }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Correlate an inbound external event to a purchase order.
    ///
    /// Strategies run in ranked order, first match wins. The write path never
    /// downgrades: a weaker candidate than the active link is recorded as a
    /// sighting only.
    pub fn correlate(&self, request: &CorrelationRequest)
        -> Result<CorrelationOutcome, DomainError> {
        if !request.evidence.matches_key_kind(request.external_key.kind) {
            return Err(DomainError::validation(format!(
                "evidence does not match key kind {}",
                request.external_key.kind.as_str()
            )));
        }

        let candidate = self
            .exact_identifier(request)
            .or_else(|| self.vendor_amount_date(request))
            .or_else(|| self.email_domain(request));

        let Some((order, confidence, method)) = candidate else {
            return Ok(self.give_up(request));
        };

        debug!(
            key = %request.external_key,
            po = %order.purchase_order_id,
            method = method.as_str(),
            confidence = %confidence,
            "correlation candidate selected"
        );

        let link = CorrelationLink::new(
            request.tenant_id,
            request.external_key.clone(),
            order.purchase_order_id,
            order.vendor_id,
            confidence,
            method,
        );

        let write = self
            .links
            .record(link, &request.raw_payload_ref)
            .map_err(|e| DomainError::conflict(e.to_string()))?;

        Ok(match write {
            LinkWrite::Created(link) => {
                info!(key = %request.external_key, po = %link.purchase_order_id, "link recorded");
                CorrelationOutcome::Linked {
                    link,
                    superseded: None,
                }
            }
            LinkWrite::Superseded { new, old } => {
                info!(key = %request.external_key, old_link = %old, "link superseded");
                CorrelationOutcome::Linked {
                    link: new,
                    superseded: Some(old),
                }
            }
            LinkWrite::SightingRecorded(link) => {
                debug!(key = %request.external_key, "sighting recorded on existing link");
                CorrelationOutcome::SightingRecorded { link }
            }
        })
    }

    /// Record a human's explicit correlation decision at full confidence.
    pub fn manual_correlate(
        &self,
        tenant_id: TenantId,
        external_key: ExternalKey,
        purchase_order_id: PurchaseOrderId,
        actor: ActorId,
    ) -> Result<CorrelationOutcome, DomainError> {
        let order = self
            .directory
            .find_order(tenant_id, purchase_order_id)
            .ok_or(DomainError::NotFound)?;

        info!(key = %external_key, po = %purchase_order_id, actor = %actor, "manual correlation");

        let link = CorrelationLink::new(
            tenant_id,
            external_key,
            order.purchase_order_id,
            order.vendor_id,
            Confidence::EXACT,
            CorrelationMethod::Manual,
        );

        let write = self
            .links
            .record(link, "manual")
            .map_err(|e| DomainError::conflict(e.to_string()))?;

        Ok(match write {
            LinkWrite::Created(link) => CorrelationOutcome::Linked {
                link,
                superseded: None,
            },
            LinkWrite::Superseded { new, old } => CorrelationOutcome::Linked {
                link: new,
                superseded: Some(old),
            },
            LinkWrite::SightingRecorded(link) => CorrelationOutcome::SightingRecorded { link },
        })
    }

    /// Strategy 1: the key (or a declared reference) appears verbatim on an
    /// open purchase order. Confidence 1.0.
    fn exact_identifier(
        &self,
        request: &CorrelationRequest,
    ) -> Option<(OpenOrderSummary, Confidence, CorrelationMethod)> {
        if !self.config.enable_exact_identifier {
            return None;
        }

        let mut identifiers = vec![request.external_key.value.as_str()];
        if let Some(declared) = request.evidence.declared_reference() {
            identifiers.push(declared);
        }

        identifiers
            .into_iter()
            .find_map(|id| self.directory.find_open_by_identifier(request.tenant_id, id))
            .map(|order| (order, Confidence::EXACT, CorrelationMethod::ExactIdentifier))
    }

    /// Strategy 2: known vendor plus a monetary total close to an open
    /// order's total, within the date window. Confidence scales with
    /// amount closeness and recency.
    fn vendor_amount_date(
        &self,
        request: &CorrelationRequest,
    ) -> Option<(OpenOrderSummary, Confidence, CorrelationMethod)> {
        if !self.config.enable_vendor_amount_date {
            return None;
        }

        let vendor_id = request.evidence.vendor_hint()?;
        let amount = request.evidence.amount_hint()?;
        let evidence_date = request.evidence.date_hint().unwrap_or(request.observed_at);

        let mut qualifying: Vec<(OpenOrderSummary, Confidence)> = self
            .directory
            .open_orders_for_vendor(request.tenant_id, vendor_id)
            .into_iter()
            .filter_map(|order| {
                let confidence = self.amount_date_confidence(&order, amount, evidence_date)?;
                Some((order, confidence))
            })
            .collect();

        if qualifying.is_empty() {
            return None;
        }

        qualifying.sort_by(|(a, ca), (b, cb)| {
            cb.partial_cmp(ca)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| compare_dueness(a, b))
        });

        let (order, confidence) = qualifying.swap_remove(0);
        Some((order, confidence, CorrelationMethod::VendorAmountDate))
    }

    fn amount_date_confidence(
        &self,
        order: &OpenOrderSummary,
        amount: u64,
        evidence_date: DateTime<Utc>,
    ) -> Option<Confidence> {
        if order.total_amount == 0 {
            return None;
        }

        let delta = amount.abs_diff(order.total_amount) as f64;
        let tolerance = order.total_amount as f64 * self.config.amount_tolerance_pct;
        if delta > tolerance {
            return None;
        }

        let age_days = (evidence_date - order.order_date).num_days();
        if age_days < 0 || age_days > self.config.date_window_days {
            return None;
        }

        // Closeness of amount and recency each contribute half; the result
        // lands in [0.70, 0.95], below exact-identifier.
        let amount_score = if tolerance > 0.0 { 1.0 - delta / tolerance } else { 1.0 };
        let recency_score = 1.0 - age_days as f64 / self.config.date_window_days as f64;
        let scaled = 0.70 + 0.25 * (0.5 * amount_score + 0.5 * recency_score);
        Some(Confidence::new(scaled))
    }

    /// Strategy 3: a vendor identity known only by heuristic — sender domain
    /// or existing thread for email, the carrier-account mapping for tracking
    /// events — attaches to that vendor's most recently sent, still-open
    /// order. Confidence capped below the two stronger methods.
    fn email_domain(
        &self,
        request: &CorrelationRequest,
    ) -> Option<(OpenOrderSummary, Confidence, CorrelationMethod)> {
        if !self.config.enable_email_domain {
            return None;
        }

        let (vendor_id, confidence) = match &request.evidence {
            Evidence::Email {
                sender_domain,
                thread_id,
                ..
            } => thread_id
                .as_deref()
                .and_then(|t| self.directory.vendor_for_thread(request.tenant_id, t))
                .map(|v| (v, self.config.thread_confidence))
                .or_else(|| {
                    self.directory
                        .vendor_for_domain(request.tenant_id, sender_domain)
                        .map(|v| (v, self.config.domain_confidence))
                })?,
            Evidence::Tracking {
                vendor_hint: Some(vendor_id),
                ..
            } => (*vendor_id, self.config.domain_confidence),
            _ => return None,
        };

        let order = self
            .directory
            .open_orders_for_vendor(request.tenant_id, vendor_id)
            .into_iter()
            .max_by_key(|o| o.last_sent_at.unwrap_or(o.order_date))?;

        Some((
            order,
            Confidence::new(confidence),
            CorrelationMethod::EmailDomain,
        ))
    }

    fn give_up(&self, request: &CorrelationRequest) -> CorrelationOutcome {
        if self.config.verify_unmatched_tracking
            && request.external_key.kind == ExternalKeyKind::TrackingNumber
        {
            let verification = VerificationRequest {
                tenant_id: request.tenant_id,
                service: "carrier.tracking".to_string(),
                external_key: request.external_key.clone(),
                raw_payload_ref: request.raw_payload_ref.clone(),
            };
            match self.deferrals.defer_verification(verification.clone()) {
                Ok(()) => {
                    info!(key = %request.external_key, "correlation deferred to carrier verification");
                    return CorrelationOutcome::Deferred {
                        request: verification,
                    };
                }
                Err(e) => {
                    warn!(key = %request.external_key, error = %e, "failed to defer verification");
                }
            }
        }

        warn!(key = %request.external_key, "correlation unresolved");
        CorrelationOutcome::Unresolved(UnresolvedCorrelation {
            tenant_id: request.tenant_id,
            external_key: request.external_key.clone(),
            reason: "no strategy matched an open purchase order".to_string(),
            raw_payload_ref: request.raw_payload_ref.clone(),
            observed_at: request.observed_at,
        })
    }
}

/// Tie-break for equal-confidence candidates: the order more likely to be
/// "due" wins — earlier follow-up due date, then earlier expected date, then
/// lowest id for determinism.
fn compare_dueness(a: &OpenOrderSummary, b: &OpenOrderSummary) -> std::cmp::Ordering {
    let due = |o: &OpenOrderSummary| o.next_follow_up_due.unwrap_or(DateTime::<Utc>::MAX_UTC);
    let expected = |o: &OpenOrderSummary| o.expected_date.unwrap_or(DateTime::<Utc>::MAX_UTC);
    due(a)
        .cmp(&due(b))
        .then_with(|| expected(a).cmp(&expected(b)))
        .then_with(|| a.purchase_order_id.cmp(&b.purchase_order_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLinkStore;
    use procurex_core::VendorId;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct StubDirectory {
        orders: Vec<OpenOrderSummary>,
        domains: HashMap<String, VendorId>,
        threads: HashMap<String, VendorId>,
    }

    impl StubDirectory {
        fn new() -> Self {
            Self {
                orders: Vec::new(),
                domains: HashMap::new(),
                threads: HashMap::new(),
            }
        }
    }

    impl OrderDirectory for StubDirectory {
        fn find_open_by_identifier(
            &self,
            _tenant_id: TenantId,
            identifier: &str,
        ) -> Option<OpenOrderSummary> {
            self.orders.iter().find(|o| o.reference == identifier).cloned()
        }

        fn open_orders_for_vendor(
            &self,
            _tenant_id: TenantId,
            vendor_id: VendorId,
        ) -> Vec<OpenOrderSummary> {
            self.orders
                .iter()
                .filter(|o| o.vendor_id == vendor_id)
                .cloned()
                .collect()
        }

        fn find_order(
            &self,
            _tenant_id: TenantId,
            purchase_order_id: PurchaseOrderId,
        ) -> Option<OpenOrderSummary> {
            self.orders
                .iter()
                .find(|o| o.purchase_order_id == purchase_order_id)
                .cloned()
        }

        fn vendor_for_domain(&self, _tenant_id: TenantId, domain: &str) -> Option<VendorId> {
            self.domains.get(domain).copied()
        }

        fn vendor_for_thread(&self, _tenant_id: TenantId, thread_id: &str) -> Option<VendorId> {
            self.threads.get(thread_id).copied()
        }
    }

    #[derive(Default)]
    struct RecordingDeferrals {
        requests: Mutex<Vec<VerificationRequest>>,
    }

    impl DeferredVerification for Arc<RecordingDeferrals> {
        fn defer_verification(&self, request: VerificationRequest) -> Result<(), String> {
            self.requests.lock().unwrap().push(request);
            Ok(())
        }
    }

    fn order(vendor: VendorId, reference: &str, total: u64, age_days: i64) -> OpenOrderSummary {
        OpenOrderSummary {
            purchase_order_id: PurchaseOrderId::new(),
            vendor_id: vendor,
            reference: reference.to_string(),
            total_amount: total,
            order_date: Utc::now() - chrono::Duration::days(age_days),
            expected_date: None,
            next_follow_up_due: None,
            last_sent_at: None,
        }
    }

    fn engine(
        directory: StubDirectory,
        config: CorrelationConfig,
    ) -> (
        CorrelationEngine<StubDirectory, Arc<InMemoryLinkStore>, Arc<RecordingDeferrals>>,
        Arc<InMemoryLinkStore>,
        Arc<RecordingDeferrals>,
    ) {
        let links = InMemoryLinkStore::arc();
        let deferrals = Arc::new(RecordingDeferrals::default());
        let engine = CorrelationEngine::new(directory, links.clone(), deferrals.clone(), config);
        (engine, links, deferrals)
    }

    fn tracking_request(tenant: TenantId, value: &str) -> CorrelationRequest {
        CorrelationRequest {
            tenant_id: tenant,
            external_key: ExternalKey::tracking(value),
            evidence: Evidence::Tracking {
                carrier: "ups".to_string(),
                status: "in_transit".to_string(),
                vendor_hint: None,
            },
            raw_payload_ref: "events/1".to_string(),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn mismatched_evidence_kind_is_a_validation_error() {
        let (engine, _, _) = engine(StubDirectory::new(), CorrelationConfig::default());
        let tenant = TenantId::new();

        let mut request = tracking_request(tenant, "1Z999");
        request.external_key = ExternalKey::invoice_document("doc-1");
        let err = engine.correlate(&request).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn exact_identifier_wins_at_full_confidence() {
        let vendor = VendorId::new();
        let mut directory = StubDirectory::new();
        directory.orders.push(order(vendor, "1Z999", 100_000, 3));
        let (engine, _, _) = engine(directory, CorrelationConfig::default());

        let outcome = engine
            .correlate(&tracking_request(TenantId::new(), "1Z999"))
            .unwrap();
        match outcome {
            CorrelationOutcome::Linked { link, superseded } => {
                assert_eq!(link.method, CorrelationMethod::ExactIdentifier);
                assert_eq!(link.confidence, Confidence::EXACT);
                assert!(superseded.is_none());
            }
            other => panic!("expected Linked, got {other:?}"),
        }
    }

    #[test]
    fn declared_invoice_reference_matches_exactly() {
        let vendor = VendorId::new();
        let mut directory = StubDirectory::new();
        directory.orders.push(order(vendor, "PO-2026-0042", 100_000, 3));
        let (engine, _, _) = engine(directory, CorrelationConfig::default());

        let request = CorrelationRequest {
            tenant_id: TenantId::new(),
            external_key: ExternalKey::invoice_document("doc-9"),
            evidence: Evidence::Invoice {
                declared_reference: Some("PO-2026-0042".to_string()),
                vendor_hint: None,
                amount_hint: None,
                date_hint: None,
            },
            raw_payload_ref: "docs/9".to_string(),
            observed_at: Utc::now(),
        };

        let outcome = engine.correlate(&request).unwrap();
        match outcome {
            CorrelationOutcome::Linked { link, .. } => {
                assert_eq!(link.method, CorrelationMethod::ExactIdentifier);
            }
            other => panic!("expected Linked, got {other:?}"),
        }
    }

    #[test]
    fn vendor_amount_date_scales_with_closeness() {
        let vendor = VendorId::new();
        let mut directory = StubDirectory::new();
        directory.orders.push(order(vendor, "PO-1", 100_000, 2));
        let (engine, _, _) = engine(directory, CorrelationConfig::default());

        let request = CorrelationRequest {
            tenant_id: TenantId::new(),
            external_key: ExternalKey::invoice_document("doc-1"),
            evidence: Evidence::Invoice {
                declared_reference: None,
                vendor_hint: Some(vendor),
                amount_hint: Some(100_000),
                date_hint: None,
            },
            raw_payload_ref: "docs/1".to_string(),
            observed_at: Utc::now(),
        };

        let outcome = engine.correlate(&request).unwrap();
        match outcome {
            CorrelationOutcome::Linked { link, .. } => {
                assert_eq!(link.method, CorrelationMethod::VendorAmountDate);
                assert!(link.confidence.value() < 1.0);
                assert!(link.confidence.value() >= 0.70);
            }
            other => panic!("expected Linked, got {other:?}"),
        }
    }

    #[test]
    fn amount_outside_tolerance_does_not_match() {
        let vendor = VendorId::new();
        let mut directory = StubDirectory::new();
        directory.orders.push(order(vendor, "PO-1", 100_000, 2));
        let (engine, _, _) = engine(directory, CorrelationConfig::default());

        let request = CorrelationRequest {
            tenant_id: TenantId::new(),
            external_key: ExternalKey::invoice_document("doc-1"),
            evidence: Evidence::Invoice {
                declared_reference: None,
                vendor_hint: Some(vendor),
                // 20% over a 5% tolerance.
                amount_hint: Some(120_000),
                date_hint: None,
            },
            raw_payload_ref: "docs/1".to_string(),
            observed_at: Utc::now(),
        };

        let outcome = engine.correlate(&request).unwrap();
        assert!(matches!(outcome, CorrelationOutcome::Unresolved(_)));
    }

    #[test]
    fn email_domain_attaches_to_most_recently_sent_order() {
        let vendor = VendorId::new();
        let mut directory = StubDirectory::new();
        let mut stale = order(vendor, "PO-1", 50_000, 20);
        stale.last_sent_at = Some(Utc::now() - chrono::Duration::days(20));
        let mut fresh = order(vendor, "PO-2", 80_000, 5);
        fresh.last_sent_at = Some(Utc::now() - chrono::Duration::days(1));
        let fresh_id = fresh.purchase_order_id;
        directory.orders.push(stale);
        directory.orders.push(fresh);
        directory.domains.insert("acme.example".to_string(), vendor);
        let (engine, _, _) = engine(directory, CorrelationConfig::default());

        let request = CorrelationRequest {
            tenant_id: TenantId::new(),
            external_key: ExternalKey::email_thread("thread-1"),
            evidence: Evidence::Email {
                sender_domain: "acme.example".to_string(),
                thread_id: None,
                in_existing_thread: false,
                in_reply_to_sent_at: None,
                vendor_hint: None,
                amount_hint: None,
                date_hint: None,
            },
            raw_payload_ref: "mail/1".to_string(),
            observed_at: Utc::now(),
        };

        let outcome = engine.correlate(&request).unwrap();
        match outcome {
            CorrelationOutcome::Linked { link, .. } => {
                assert_eq!(link.method, CorrelationMethod::EmailDomain);
                assert_eq!(link.purchase_order_id, fresh_id);
                // Domain heuristic confidence is capped below the other methods.
                assert!(link.confidence.value() < 0.70);
            }
            other => panic!("expected Linked, got {other:?}"),
        }
    }

    #[test]
    fn tracking_event_with_vendor_hint_uses_the_heuristic() {
        let vendor = VendorId::new();
        let mut directory = StubDirectory::new();
        let mut o = order(vendor, "PO-1", 100_000, 3);
        o.last_sent_at = Some(Utc::now());
        let po = o.purchase_order_id;
        directory.orders.push(o);
        let (engine, _, _) = engine(directory, CorrelationConfig::default());

        let mut request = tracking_request(TenantId::new(), "1ZUNKNOWN");
        request.evidence = Evidence::Tracking {
            carrier: "ups".to_string(),
            status: "in_transit".to_string(),
            vendor_hint: Some(vendor),
        };

        let outcome = engine.correlate(&request).unwrap();
        match outcome {
            CorrelationOutcome::Linked { link, .. } => {
                assert_eq!(link.method, CorrelationMethod::EmailDomain);
                assert_eq!(link.purchase_order_id, po);
                assert!(link.confidence.value() < 0.70);
            }
            other => panic!("expected Linked, got {other:?}"),
        }
    }

    #[test]
    fn disabled_strategy_is_skipped() {
        let vendor = VendorId::new();
        let mut directory = StubDirectory::new();
        directory.orders.push(order(vendor, "1Z999", 100_000, 3));
        let config = CorrelationConfig {
            enable_exact_identifier: false,
            ..CorrelationConfig::default()
        };
        let (engine, _, _) = engine(directory, config);

        let outcome = engine
            .correlate(&tracking_request(TenantId::new(), "1Z999"))
            .unwrap();
        assert!(matches!(outcome, CorrelationOutcome::Unresolved(_)));
    }

    #[test]
    fn unmatched_tracking_defers_to_verification_when_enabled() {
        let config = CorrelationConfig {
            verify_unmatched_tracking: true,
            ..CorrelationConfig::default()
        };
        let (engine, _, deferrals) = engine(StubDirectory::new(), config);

        let outcome = engine
            .correlate(&tracking_request(TenantId::new(), "1Z999"))
            .unwrap();
        assert!(matches!(outcome, CorrelationOutcome::Deferred { .. }));
        assert_eq!(deferrals.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn weaker_followup_evidence_becomes_a_sighting() {
        let vendor = VendorId::new();
        let mut directory = StubDirectory::new();
        let mut o = order(vendor, "1Z999", 100_000, 3);
        o.last_sent_at = Some(Utc::now());
        directory.orders.push(o);
        directory.domains.insert("acme.example".to_string(), vendor);
        let (engine, _, _) = engine(directory, CorrelationConfig::default());
        let tenant = TenantId::new();

        // Strong link first (exact tracking number).
        engine.correlate(&tracking_request(tenant, "1Z999")).unwrap();

        // A repeat observation of the same key cannot outrank the active
        // link; it lands as a sighting.
        let mut repeat = tracking_request(tenant, "1Z999");
        repeat.evidence = Evidence::Tracking {
            carrier: "ups".to_string(),
            status: "delivered".to_string(),
            vendor_hint: None,
        };
        let outcome = engine.correlate(&repeat).unwrap();
        match outcome {
            CorrelationOutcome::SightingRecorded { link } => {
                assert_eq!(link.confidence, Confidence::EXACT);
                assert_eq!(link.sightings.len(), 1);
            }
            other => panic!("expected SightingRecorded, got {other:?}"),
        }
    }

    #[test]
    fn manual_correlation_links_at_full_confidence() {
        let vendor = VendorId::new();
        let mut directory = StubDirectory::new();
        let o = order(vendor, "PO-1", 100_000, 3);
        let po = o.purchase_order_id;
        directory.orders.push(o);
        let (engine, _, _) = engine(directory, CorrelationConfig::default());
        let tenant = TenantId::new();

        let outcome = engine
            .manual_correlate(
                tenant,
                ExternalKey::invoice_document("doc-1"),
                po,
                ActorId::new(),
            )
            .unwrap();
        match outcome {
            CorrelationOutcome::Linked { link, .. } => {
                assert_eq!(link.method, CorrelationMethod::Manual);
                assert_eq!(link.confidence, Confidence::EXACT);
                assert_eq!(link.purchase_order_id, po);
            }
            other => panic!("expected Linked, got {other:?}"),
        }
    }
}
