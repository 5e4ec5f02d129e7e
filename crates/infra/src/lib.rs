//! Wiring layer: in-memory directories, the reconciliation service facade,
//! the vendor-history projection, the human review queue, and worker setup.

pub mod directory;
pub mod history_projection;
pub mod review_queue;
pub mod service;
pub mod workers;


pub use directory::InMemoryOrderBook;
pub use history_projection::VendorHistoryProjection;
pub use review_queue::{InMemoryReviewQueue, QueuedReview, ReviewItem, ReviewItemId, ReviewQueue};
pub use service::{ReconciliationEvent, ReconciliationService, ServiceConfig};
pub use workers::{NoopVerificationClient, VerificationClient, build_worker, drain};
