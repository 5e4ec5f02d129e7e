//! Versioned component weight tables.
//!
//! Changing the weight table is a deliberate, logged configuration change —
//! never a per-call parameter. The version travels with every profile so a
//! stored score can always be traced to the function that produced it.

use serde::{Deserialize, Serialize};

use procurex_core::{DomainError, DomainResult};

use crate::profile::ComponentScores;

/// Weights applied to the six component scores. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    pub version: u32,
    pub completeness: f64,
    pub lead_time: f64,
    pub invoice_accuracy: f64,
    pub response_latency: f64,
    pub threading: f64,
    pub followup_response: f64,
}

impl WeightTable {
    /// The initial production weight table.
    pub fn v1() -> Self {
        Self {
            version: 1,
            completeness: 0.20,
            lead_time: 0.15,
            invoice_accuracy: 0.25,
            response_latency: 0.15,
            threading: 0.10,
            followup_response: 0.15,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        let sum = self.completeness
            + self.lead_time
            + self.invoice_accuracy
            + self.response_latency
            + self.threading
            + self.followup_response;
        if (sum - 1.0).abs() > 1e-9 {
            return Err(DomainError::validation(format!(
                "weight table v{} sums to {sum}, expected 1.0",
                self.version
            )));
        }
        let all = [
            self.completeness,
            self.lead_time,
            self.invoice_accuracy,
            self.response_latency,
            self.threading,
            self.followup_response,
        ];
        if all.iter().any(|w| *w < 0.0) {
            return Err(DomainError::validation("weights must be non-negative"));
        }
        Ok(())
    }

    /// Weighted aggregate of the component scores, rounded to 4 decimals so
    /// recomputation over identical inputs is byte-identical.
    pub fn aggregate(&self, components: &ComponentScores) -> f64 {
        let raw = self.completeness * components.completeness
            + self.lead_time * components.lead_time
            + self.invoice_accuracy * components.invoice_accuracy
            + self.response_latency * components.response_latency
            + self.threading * components.threading
            + self.followup_response * components.followup_response;
        (raw * 10_000.0).round() / 10_000.0
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        Self::v1()
    }
}
