//! The recalculation function: trailing window in, profile out.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use procurex_core::{DomainError, TenantId, VendorId};

use crate::events::ScoringEvent;
use crate::interaction::{InteractionRecord, VendorHistory, VendorInteraction};
use crate::profile::{
    ComponentScores, ProfileStore, ScoreSnapshot, Trend, VendorConfidenceProfile,
};
use crate::weights::WeightTable;

/// Scorer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Trailing window of interactions considered, days.
    pub window_days: i64,
    /// Band around zero within which a score delta counts as stable.
    pub trend_epsilon: f64,
    /// Age at which the trend snapshot rolls forward, days.
    pub snapshot_age_days: i64,
    /// Average reply latency scoring 0.5, hours.
    pub response_latency_target_hours: f64,
    /// Score assigned to a component with no supporting events in the window.
    pub neutral_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            window_days: 90,
            trend_epsilon: 0.05,
            snapshot_age_days: 30,
            response_latency_target_hours: 24.0,
            neutral_score: 0.5,
        }
    }
}

/// Vendor confidence scorer over an interaction history and a profile store.
pub struct VendorScorer<H, P> {
    history: H,
    profiles: P,
    weights: WeightTable,
    config: ScoringConfig,
}

impl<H, P> VendorScorer<H, P>
where
    H: VendorHistory,
    P: ProfileStore,
{
    /// Build a scorer. The weight table is validated here and its version
    /// logged; it cannot change per call.
    pub fn new(
        history: H,
        profiles: P,
        weights: WeightTable,
        config: ScoringConfig,
    ) -> Result<Self, DomainError> {
        weights.validate()?;
        info!(
            weight_version = weights.version,
            window_days = config.window_days,
            "vendor scorer configured"
        );
        Ok(Self {
            history,
            profiles,
            weights,
            config,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Recalculate one vendor's profile from its trailing window.
    pub fn recalculate(
        &self,
        tenant_id: TenantId,
        vendor_id: VendorId,
        trigger: &str,
    ) -> Result<(VendorConfidenceProfile, ScoringEvent), DomainError> {
        let now = Utc::now();
        let since = now - Duration::days(self.config.window_days);
        let window = self
            .history
            .window(tenant_id, vendor_id, since)
            .map_err(|e| DomainError::conflict(e.to_string()))?;

        let components = compute_components(&self.config, &window);
        let confidence_score = self.weights.aggregate(&components);

        let previous = self
            .profiles
            .get(tenant_id, vendor_id)
            .map_err(|e| DomainError::conflict(e.to_string()))?;

        let (trend, snapshot) = self.trend_and_snapshot(previous.as_ref(), confidence_score, now);

        let profile = VendorConfidenceProfile {
            vendor_id,
            tenant_id,
            components,
            confidence_score,
            weight_version: self.weights.version,
            trend,
            interactions_count: window.len() as u64,
            score_snapshot: Some(snapshot),
            last_recalculated_at: now,
        };

        self.profiles
            .upsert(profile.clone())
            .map_err(|e| DomainError::conflict(e.to_string()))?;

        debug!(
            vendor = %vendor_id,
            score = confidence_score,
            ?trend,
            interactions = profile.interactions_count,
            trigger,
            "vendor confidence recalculated"
        );

        let event = ScoringEvent::ProfileRecalculated {
            tenant_id,
            vendor_id,
            confidence_score,
            weight_version: self.weights.version,
            trend,
            trigger: trigger.to_string(),
            occurred_at: now,
        };

        Ok((profile, event))
    }

    /// Recalculate every profile not touched since `max_age` ago — the
    /// scheduled sweep that ages scores out even with no new events.
    pub fn sweep_stale(
        &self,
        tenant_id: TenantId,
        max_age: Duration,
    ) -> Result<Vec<VendorId>, DomainError> {
        let cutoff = Utc::now() - max_age;
        let stale = self
            .profiles
            .list_stale(tenant_id, cutoff)
            .map_err(|e| DomainError::conflict(e.to_string()))?;

        let mut recalculated = Vec::with_capacity(stale.len());
        for profile in stale {
            self.recalculate(tenant_id, profile.vendor_id, "scheduled_sweep")?;
            recalculated.push(profile.vendor_id);
        }

        if !recalculated.is_empty() {
            info!(count = recalculated.len(), "stale vendor profiles swept");
        }
        Ok(recalculated)
    }

    /// Trend compares the fresh score to the retained snapshot; the snapshot
    /// rolls forward once it is older than the configured age.
    fn trend_and_snapshot(
        &self,
        previous: Option<&VendorConfidenceProfile>,
        score: f64,
        now: DateTime<Utc>,
    ) -> (Trend, ScoreSnapshot) {
        let Some(snapshot) = previous.and_then(|p| p.score_snapshot) else {
            // First calculation: no baseline yet.
            return (Trend::Stable, ScoreSnapshot {
                score,
                taken_at: now,
            });
        };

        let delta = score - snapshot.score;
        let trend = if delta > self.config.trend_epsilon {
            Trend::Improving
        } else if delta < -self.config.trend_epsilon {
            Trend::Declining
        } else {
            Trend::Stable
        };

        let age = now - snapshot.taken_at;
        let next_snapshot = if age >= Duration::days(self.config.snapshot_age_days) {
            ScoreSnapshot {
                score,
                taken_at: now,
            }
        } else {
            snapshot
        };

        (trend, next_snapshot)
    }
}

/// Derive the six component scores from the window. Components with no
/// supporting events fall back to the configured neutral score.
fn compute_components(config: &ScoringConfig, window: &[InteractionRecord]) -> ComponentScores {
    use std::collections::{BTreeMap, BTreeSet};

    use procurex_core::PurchaseOrderId;

    let neutral = config.neutral_score;

    // Completeness: orders completed before expected / orders observed.
    let mut orders_seen: BTreeSet<PurchaseOrderId> = BTreeSet::new();
    let mut orders_complete_on_time: BTreeSet<PurchaseOrderId> = BTreeSet::new();

    // Invoice accuracy: latest match score per order.
    let mut latest_match: BTreeMap<PurchaseOrderId, f64> = BTreeMap::new();

    let mut lead_time_devs: Vec<f64> = Vec::new();
    let mut reply_latencies: Vec<f64> = Vec::new();
    let mut threaded = 0u32;
    let mut email_total = 0u32;
    let mut followups_answered = 0u32;
    let mut followups_total = 0u32;

    for record in window {
        match &record.interaction {
            VendorInteraction::CorrelationObserved {
                purchase_order_id,
                in_existing_thread,
                reply_latency_hours,
                ..
            } => {
                orders_seen.insert(*purchase_order_id);
                if let Some(latency) = reply_latency_hours {
                    reply_latencies.push(latency.max(0.0));
                }
                if let Some(in_thread) = in_existing_thread {
                    email_total += 1;
                    if *in_thread {
                        threaded += 1;
                    }
                }
            }
            VendorInteraction::MatchObserved {
                purchase_order_id,
                overall_score,
                ..
            } => {
                orders_seen.insert(*purchase_order_id);
                latest_match.insert(*purchase_order_id, *overall_score);
            }
            VendorInteraction::DocumentsCompleted {
                purchase_order_id,
                before_expected,
            } => {
                orders_seen.insert(*purchase_order_id);
                if *before_expected {
                    orders_complete_on_time.insert(*purchase_order_id);
                }
            }
            VendorInteraction::FollowUpResolved { answered } => {
                followups_total += 1;
                if *answered {
                    followups_answered += 1;
                }
            }
            VendorInteraction::LeadTimeObserved {
                promised_days,
                actual_days,
            } => {
                let promised = promised_days.max(1.0);
                lead_time_devs.push((actual_days - promised_days).abs() / promised);
            }
            VendorInteraction::HumanOverrideObserved { purchase_order_id } => {
                orders_seen.insert(*purchase_order_id);
            }
        }
    }

    let completeness = if orders_seen.is_empty() {
        neutral
    } else {
        round4(orders_complete_on_time.len() as f64 / orders_seen.len() as f64)
    };

    let lead_time = if lead_time_devs.is_empty() {
        neutral
    } else {
        let mean = lead_time_devs.iter().sum::<f64>() / lead_time_devs.len() as f64;
        round4((1.0 - mean).clamp(0.0, 1.0))
    };

    let invoice_accuracy = if latest_match.is_empty() {
        neutral
    } else {
        let mean = latest_match.values().sum::<f64>() / latest_match.len() as f64;
        round4(mean.clamp(0.0, 1.0))
    };

    let response_latency = if reply_latencies.is_empty() {
        neutral
    } else {
        let mean = reply_latencies.iter().sum::<f64>() / reply_latencies.len() as f64;
        let target = config.response_latency_target_hours;
        round4(target / (target + mean))
    };

    let threading = if email_total == 0 {
        neutral
    } else {
        round4(threaded as f64 / email_total as f64)
    };

    let followup_response = if followups_total == 0 {
        neutral
    } else {
        round4(followups_answered as f64 / followups_total as f64)
    };

    ComponentScores {
        completeness,
        lead_time,
        invoice_accuracy,
        response_latency,
        threading,
        followup_response,
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::InMemoryVendorHistory;
    use crate::profile::InMemoryProfileStore;
    use procurex_core::PurchaseOrderId;
    use procurex_correlation::CorrelationMethod;
    use procurex_matching::MatchStatus;
    use std::sync::Arc;

    struct Fixture {
        scorer: VendorScorer<Arc<InMemoryVendorHistory>, Arc<InMemoryProfileStore>>,
        history: Arc<InMemoryVendorHistory>,
        profiles: Arc<InMemoryProfileStore>,
        tenant: TenantId,
        vendor: VendorId,
    }

    fn fixture() -> Fixture {
        let history = InMemoryVendorHistory::arc();
        let profiles = InMemoryProfileStore::arc();
        let scorer = VendorScorer::new(
            history.clone(),
            profiles.clone(),
            WeightTable::v1(),
            ScoringConfig::default(),
        )
        .unwrap();
        Fixture {
            scorer,
            history,
            profiles,
            tenant: TenantId::new(),
            vendor: VendorId::new(),
        }
    }

    fn record(f: &Fixture, interaction: VendorInteraction, days_ago: i64) {
        f.history
            .append(InteractionRecord::new(
                f.tenant,
                f.vendor,
                interaction,
                Utc::now() - Duration::days(days_ago),
            ))
            .unwrap();
    }

    #[test]
    fn empty_history_scores_all_components_neutral() {
        let f = fixture();
        let (profile, _) = f.scorer.recalculate(f.tenant, f.vendor, "test").unwrap();
        assert_eq!(profile.components.completeness, 0.5);
        assert_eq!(profile.components.invoice_accuracy, 0.5);
        assert_eq!(profile.confidence_score, 0.5);
        assert_eq!(profile.trend, Trend::Stable);
        assert_eq!(profile.interactions_count, 0);
        assert_eq!(profile.weight_version, 1);
    }

    #[test]
    fn recalculation_is_deterministic_to_the_bit() {
        let f = fixture();
        let po = PurchaseOrderId::new();
        record(
            &f,
            VendorInteraction::MatchObserved {
                purchase_order_id: po,
                status: MatchStatus::Matched,
                overall_score: 0.9731,
            },
            3,
        );
        record(
            &f,
            VendorInteraction::DocumentsCompleted {
                purchase_order_id: po,
                before_expected: true,
            },
            3,
        );
        record(&f, VendorInteraction::FollowUpResolved { answered: true }, 5);

        let (first, _) = f.scorer.recalculate(f.tenant, f.vendor, "test").unwrap();
        let (second, _) = f.scorer.recalculate(f.tenant, f.vendor, "test").unwrap();
        assert_eq!(
            first.confidence_score.to_bits(),
            second.confidence_score.to_bits()
        );
        assert_eq!(first.components, second.components);
    }

    #[test]
    fn invoice_accuracy_uses_latest_match_per_order() {
        let f = fixture();
        let po = PurchaseOrderId::new();
        record(
            &f,
            VendorInteraction::MatchObserved {
                purchase_order_id: po,
                status: MatchStatus::Discrepant,
                overall_score: 0.6,
            },
            10,
        );
        // Later recomputation after the vendor fixed the invoice.
        record(
            &f,
            VendorInteraction::MatchObserved {
                purchase_order_id: po,
                status: MatchStatus::Matched,
                overall_score: 1.0,
            },
            2,
        );

        let (profile, _) = f.scorer.recalculate(f.tenant, f.vendor, "test").unwrap();
        assert_eq!(profile.components.invoice_accuracy, 1.0);
    }

    #[test]
    fn completeness_counts_on_time_orders() {
        let f = fixture();
        let on_time = PurchaseOrderId::new();
        let late = PurchaseOrderId::new();
        record(
            &f,
            VendorInteraction::DocumentsCompleted {
                purchase_order_id: on_time,
                before_expected: true,
            },
            5,
        );
        record(
            &f,
            VendorInteraction::DocumentsCompleted {
                purchase_order_id: late,
                before_expected: false,
            },
            5,
        );

        let (profile, _) = f.scorer.recalculate(f.tenant, f.vendor, "test").unwrap();
        assert_eq!(profile.components.completeness, 0.5);
    }

    #[test]
    fn response_latency_halves_at_target() {
        let f = fixture();
        record(
            &f,
            VendorInteraction::CorrelationObserved {
                purchase_order_id: PurchaseOrderId::new(),
                method: CorrelationMethod::EmailDomain,
                confidence: 0.5,
                in_existing_thread: Some(true),
                reply_latency_hours: Some(24.0),
            },
            1,
        );

        let (profile, _) = f.scorer.recalculate(f.tenant, f.vendor, "test").unwrap();
        assert_eq!(profile.components.response_latency, 0.5);
        assert_eq!(profile.components.threading, 1.0);
    }

    #[test]
    fn events_outside_the_window_are_ignored() {
        let f = fixture();
        record(
            &f,
            VendorInteraction::FollowUpResolved { answered: false },
            120,
        );

        let (profile, _) = f.scorer.recalculate(f.tenant, f.vendor, "test").unwrap();
        assert_eq!(profile.interactions_count, 0);
        assert_eq!(profile.components.followup_response, 0.5);
    }

    #[test]
    fn trend_declines_once_snapshot_baseline_exists() {
        let f = fixture();
        // Establish a high baseline.
        let po = PurchaseOrderId::new();
        record(
            &f,
            VendorInteraction::MatchObserved {
                purchase_order_id: po,
                status: MatchStatus::Matched,
                overall_score: 1.0,
            },
            2,
        );
        let (first, _) = f.scorer.recalculate(f.tenant, f.vendor, "test").unwrap();
        assert_eq!(first.trend, Trend::Stable);

        // Degrade: a discrepant match on another order.
        record(
            &f,
            VendorInteraction::MatchObserved {
                purchase_order_id: PurchaseOrderId::new(),
                status: MatchStatus::Discrepant,
                overall_score: 0.2,
            },
            1,
        );
        let (second, _) = f.scorer.recalculate(f.tenant, f.vendor, "test").unwrap();
        assert_eq!(second.trend, Trend::Declining);
        // The snapshot is younger than the roll age, so it is retained.
        assert_eq!(
            second.score_snapshot.unwrap().score,
            first.score_snapshot.unwrap().score
        );
    }

    #[test]
    fn sweep_recalculates_only_stale_profiles() {
        let f = fixture();
        // Seed two profiles, one stale and one fresh.
        let stale_vendor = f.vendor;
        f.scorer.recalculate(f.tenant, stale_vendor, "seed").unwrap();
        let mut aged = f.profiles.get(f.tenant, stale_vendor).unwrap().unwrap();
        aged.last_recalculated_at = Utc::now() - Duration::days(10);
        f.profiles.upsert(aged).unwrap();

        let fresh_vendor = VendorId::new();
        f.scorer.recalculate(f.tenant, fresh_vendor, "seed").unwrap();

        let swept = f
            .scorer
            .sweep_stale(f.tenant, Duration::days(7))
            .unwrap();
        assert_eq!(swept, vec![stale_vendor]);

        let refreshed = f.profiles.get(f.tenant, stale_vendor).unwrap().unwrap();
        assert!(refreshed.last_recalculated_at > Utc::now() - Duration::minutes(1));
    }
}
