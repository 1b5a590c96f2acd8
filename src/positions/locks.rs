//! One exclusive lock per campaign, handed out on demand.
//!
//! Entries are created on first use and dropped again once nobody holds or
//! waits for them, so the table only grows with the number of campaigns that
//! have a recalculation in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

type LockTable = Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>;

#[derive(Clone, Default)]
pub struct CampaignLocks {
    table: Arc<LockTable>,
}

/// Holds a campaign's lock. Released on drop, whichever way the holder exits.
pub struct CampaignLockGuard {
    campaign_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl CampaignLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get-or-create under the table lock: concurrent first callers always
    /// share the same entry.
    fn entry(&self, campaign_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.entry(campaign_id).or_default().clone()
    }

    /// Waits until no other holder has `campaign_id` locked.
    pub async fn acquire(&self, campaign_id: Uuid) -> CampaignLockGuard {
        let lock = self.entry(campaign_id);
        let guard = lock.lock_owned().await;

        CampaignLockGuard {
            campaign_id,
            guard: Some(guard),
            table: self.table.clone(),
        }
    }

    /// Number of campaigns with a live lock entry.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for CampaignLockGuard {
    fn drop(&mut self) {
        // Unlock first so the guard's reference to the entry is gone.
        drop(self.guard.take());

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters clone the entry while holding the table lock, so a count of
        // one means only the table still refers to it.
        if table
            .get(&self.campaign_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.campaign_id);
        }
    }
}
