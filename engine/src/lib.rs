//! Ensemble classification engine over hierarchical taxonomies.
//!
//! Free-text items descend a taxonomy tree frontier by frontier. At each
//! frontier the ensemble votes, sibling nodes whose aggregated confidence
//! clears the majority threshold accept the item, and the walk recurses
//! into accepted branches. Around that core live the batch session
//! lifecycle, per-taxonomy run locking, weak-node examination, and human
//! feedback integration.
//!
//! Layering, bottom up:
//!
//! - [`store`]: persistence seam and the in-memory backend
//! - [`aggregate`]: outcome tallying and confidence ratios
//! - [`dispatch`]: concurrent vote fan-out with budget and timeouts
//! - `walker`: per-item tree descent
//! - [`session`]: batch runs, events, cancellation
//! - [`health`]: weak-node detection and structural proposals
//! - [`feedback`]: human corrections and curation

pub mod aggregate;
pub mod dispatch;
pub mod error;
pub mod feedback;
pub mod health;
pub mod locks;
pub mod session;
pub mod store;
mod walker;


pub use aggregate::{FrontierTally, NodeConfidence, VoteOutcome};
pub use dispatch::{Dispatcher, DispatcherConfig, InvocationBudget, VoteClient};
pub use error::EngineError;
pub use feedback::{FeedbackIntegrator, MANUAL_CONFIDENCE};
pub use health::{
    DISAGREEMENT_SPREAD, EXAMINE_CONFIDENCE_FLOOR, ExaminationOutcome, HealthConfig,
    MAX_PROPOSAL_SAMPLES, MIN_ITEMS_TO_EXAMINE, NodeHealthMonitor, WeakSignal, weak_signal,
};
pub use locks::{RunGuard, RunLocks};
pub use session::{RunHandle, SessionManager};
pub use store::{MemoryStore, StoreError, TaxonomyStore};
