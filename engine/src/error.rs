//! Engine error surface.
//!
//! Per-item failures during a run are absorbed into item outcomes and
//! diagnostics rather than surfaced here. `EngineError` covers the failures
//! that abort an operation outright: missing entities, a taxonomy already
//! mid-run, a lost run lock, or the store going away.

use taxa_types::{ConfigError, ItemId, NodeId, SessionId, TaxonomyId};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("taxonomy {0} not found")]
    TaxonomyNotFound(TaxonomyId),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("item {0} not found")]
    ItemNotFound(ItemId),

    /// A classification run or examination already holds the taxonomy's
    /// run lock. The holder's session id is included so callers can report
    /// which run is in the way.
    #[error("taxonomy {taxonomy_id} already has an active run (session {holder})")]
    AlreadyRunning {
        taxonomy_id: TaxonomyId,
        holder: SessionId,
    },

    /// The run lock was released out from under an active run. The run
    /// stops persisting immediately.
    #[error("run lock for taxonomy {0} was lost mid-run")]
    LockLost(TaxonomyId),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    /// The backing store is unavailable. Unlike per-item model failures,
    /// this aborts the whole run.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A conflicting write was refused by the store, for example inserting
    /// a duplicate node id.
    #[error("store conflict: {0}")]
    StoreConflict(String),

    #[error(transparent)]
    Provider(#[from] taxa_providers::ProviderError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TaxonomyNotFound(id) => Self::TaxonomyNotFound(id),
            StoreError::NodeNotFound(id) => Self::NodeNotFound(id),
            StoreError::ItemNotFound(id) => Self::ItemNotFound(id),
            StoreError::Conflict(msg) => Self::StoreConflict(msg),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
        }
    }
}

impl EngineError {
    /// True for errors that should abort an in-flight run rather than be
    /// absorbed into a single item's outcome.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::LockLost(_))
    }
}
