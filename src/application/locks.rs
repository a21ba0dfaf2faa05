use crate::domain::sale::Secret;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-sale mutual exclusion.
///
/// The callback path, the sweepers and the refund path all run
/// "load → remote calls → save" sequences on the same records. Holding the
/// guard for a secret serializes those sequences for that sale only; other
/// sales proceed in parallel.
#[derive(Default, Clone)]
pub struct SaleLocks {
    locks: Arc<StdMutex<HashMap<Secret, Arc<Mutex<()>>>>>,
}

/// Held while a sale is being resolved. Released on drop.
pub struct SaleGuard {
    _guard: OwnedMutexGuard<()>,
}

impl SaleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, secret: &Secret) -> SaleGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Entries only referenced by the map belong to sales nobody holds.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(secret.clone()).or_default().clone()
        };
        SaleGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of sales currently locked or waited on.
    pub fn active(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.len()
    }
}
