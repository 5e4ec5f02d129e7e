//! Correlation engine: attaches inbound external events (tracking updates,
//! vendor emails, invoice documents) to the purchase order they concern.
//!
//! Matching runs a ranked sequence of strategies, first match wins, and every
//! link carries a confidence score and the method that produced it. For a
//! given external key at most one link is *active*; stronger signals
//! supersede weaker ones, and superseded links are retained for audit.

pub mod directory;
pub mod engine;
pub mod events;
pub mod evidence;
pub mod link;
pub mod store;

pub use directory::{OpenOrderSummary, OrderDirectory};
pub use engine::{
    CorrelationConfig, CorrelationEngine, CorrelationOutcome, DeferredVerification,
    UnresolvedCorrelation, VerificationRequest,
};
pub use events::CorrelationEvent;
pub use evidence::{CorrelationRequest, Evidence, ExternalKey, ExternalKeyKind};
pub use link::{Confidence, CorrelationLink, CorrelationMethod, LinkId, LinkState, Sighting};
pub use store::{InMemoryLinkStore, LinkStore, LinkStoreError, LinkWrite};
