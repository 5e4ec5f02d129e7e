//! Vendor confidence scorer: aggregates correlation and match history per
//! vendor into a rolling score with component breakdown and trend.
//!
//! Scores are never mutated incrementally — every recalculation is a
//! deterministic, versioned recomputation over a trailing window of recorded
//! interactions, so replaying the same history always yields the same score.

pub mod events;
pub mod interaction;
pub mod profile;
pub mod scorer;
pub mod weights;

pub use events::ScoringEvent;
pub use interaction::{
    InMemoryVendorHistory, InteractionRecord, VendorHistory, VendorHistoryError, VendorInteraction,
};
pub use profile::{
    ComponentScores, InMemoryProfileStore, ProfileStore, ProfileStoreError, ScoreSnapshot, Trend,
    VendorConfidenceProfile,
};
pub use scorer::{ScoringConfig, VendorScorer};
pub use weights::WeightTable;
