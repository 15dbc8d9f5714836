use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

/// In-process "one fetch per competitor" flags. The ledger's running-job
/// check covers other processes sharing the same database.
#[derive(Debug, Clone, Default)]
pub struct CompetitorLocks {
    held: Arc<Mutex<HashSet<Uuid>>>,
}

/// Releases the competitor's flag when dropped, on every exit path.
#[derive(Debug)]
pub struct CompetitorGuard {
    held: Arc<Mutex<HashSet<Uuid>>>,
    competitor_id: Uuid,
}

fn lock(held: &Mutex<HashSet<Uuid>>) -> MutexGuard<'_, HashSet<Uuid>> {
    // The set stays consistent even if a holder panicked.
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CompetitorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, competitor_id: Uuid) -> Option<CompetitorGuard> {
        lock(&self.held)
            .insert(competitor_id)
            .then(|| CompetitorGuard {
                held: Arc::clone(&self.held),
                competitor_id,
            })
    }

    pub fn is_held(&self, competitor_id: Uuid) -> bool {
        lock(&self.held).contains(&competitor_id)
    }
}

impl Drop for CompetitorGuard {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.competitor_id);
    }
}
