//! Per-taxonomy run locks.
//!
//! A taxonomy admits at most one active mutating process at a time: either
//! a classification run or a node examination pass. The registry hands out
//! a [`RunGuard`] lease keyed by taxonomy id; dropping the guard releases
//! the lock. The guard records which session holds it, so a run can detect
//! that its lease was forcibly revoked and stop persisting.
//!
//! The map is guarded by a std `Mutex` and is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use taxa_types::{SessionId, TaxonomyId};

use crate::error::EngineError;

#[derive(Debug, Clone, Default)]
pub struct RunLocks {
    inner: Arc<Mutex<HashMap<TaxonomyId, SessionId>>>,
}

impl RunLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the run lock for `taxonomy_id` on behalf of `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyRunning`] with the current holder when
    /// the taxonomy is already locked.
    pub fn try_acquire(
        &self,
        taxonomy_id: &TaxonomyId,
        session_id: &SessionId,
    ) -> Result<RunGuard, EngineError> {
        let mut map = self.lock_map();
        if let Some(holder) = map.get(taxonomy_id) {
            return Err(EngineError::AlreadyRunning {
                taxonomy_id: taxonomy_id.clone(),
                holder: holder.clone(),
            });
        }
        map.insert(taxonomy_id.clone(), session_id.clone());
        drop(map);
        Ok(RunGuard {
            locks: self.clone(),
            taxonomy_id: taxonomy_id.clone(),
            session_id: session_id.clone(),
        })
    }

    /// The session currently holding the lock for `taxonomy_id`, if any.
    #[must_use]
    pub fn holder(&self, taxonomy_id: &TaxonomyId) -> Option<SessionId> {
        self.lock_map().get(taxonomy_id).cloned()
    }

    /// Revokes the lock regardless of holder. An active run holding a guard
    /// for this taxonomy will observe the loss and abort.
    pub fn force_release(&self, taxonomy_id: &TaxonomyId) -> bool {
        self.lock_map().remove(taxonomy_id).is_some()
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<TaxonomyId, SessionId>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            // A poisoned lock map only means another thread panicked while
            // holding it; the map itself is still consistent.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Lease on a taxonomy's run lock. Released on drop.
#[derive(Debug)]
pub struct RunGuard {
    locks: RunLocks,
    taxonomy_id: TaxonomyId,
    session_id: SessionId,
}

impl RunGuard {
    #[must_use]
    pub fn taxonomy_id(&self) -> &TaxonomyId {
        &self.taxonomy_id
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Whether this lease is still the registered holder. Checked by runs
    /// before persisting so a revoked lease stops the run instead of
    /// clobbering whoever took over.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.locks
            .holder(&self.taxonomy_id)
            .is_some_and(|holder| holder == self.session_id)
    }

    /// [`EngineError::LockLost`] if the lease was revoked.
    pub fn ensure_held(&self) -> Result<(), EngineError> {
        if self.is_held() {
            Ok(())
        } else {
            Err(EngineError::LockLost(self.taxonomy_id.clone()))
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut map = self.locks.lock_map();
        // Only remove our own lease; a force-released and re-acquired lock
        // belongs to someone else now.
        if map.get(&self.taxonomy_id) == Some(&self.session_id) {
            map.remove(&self.taxonomy_id);
        }
    }
}
