use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per database uuid.
///
/// Every read-modify-write of a database row happens while holding its guard,
/// so concurrent status updates and drift saves cannot lose each other's
/// writes. Different databases never contend.
#[derive(Debug, Default, Clone)]
pub struct ResourceLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a database.
    pub async fn acquire(&self, uuid: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(uuid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the entry of a database that no longer exists.
    pub fn forget(&self, uuid: &str) {
        self.locks.remove(uuid);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
