use crate::domain::performance::{Performance, PerformanceId};
use crate::domain::ports::{PerformanceCatalog, SaleStore};
use crate::domain::sale::{BookingId, Sale, Secret};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory sale store.
///
/// Uses `Arc<RwLock<HashMap<Secret, Sale>>>` so clones share the same records.
/// Suitable for tests and for running without persistence.
#[derive(Default, Clone)]
pub struct InMemorySaleStore {
    sales: Arc<RwLock<HashMap<Secret, Sale>>>,
}

impl InMemorySaleStore {
    /// Creates a new, empty in-memory sale store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn select(&self, predicate: impl Fn(&Sale) -> bool) -> Vec<Sale> {
        let sales = self.sales.read().await;
        let mut selected: Vec<Sale> = sales.values().filter(|s| predicate(s)).cloned().collect();
        selected.sort_by_key(|s| s.created_at);
        selected
    }
}

#[async_trait]
impl SaleStore for InMemorySaleStore {
    async fn save(&self, sale: Sale) -> Result<()> {
        let mut sales = self.sales.write().await;
        sales.insert(sale.secret().clone(), sale);
        Ok(())
    }

    async fn load(&self, secret: &Secret) -> Result<Option<Sale>> {
        let sales = self.sales.read().await;
        Ok(sales.get(secret).cloned())
    }

    async fn load_by_booking_id(&self, booking_id: BookingId) -> Result<Option<Sale>> {
        let sales = self.sales.read().await;
        Ok(sales
            .values()
            .find(|sale| sale.booking_id() == booking_id)
            .cloned())
    }

    async fn load_pending_recent(&self, since: DateTime<Utc>) -> Result<Vec<Sale>> {
        Ok(self
            .select(|sale| sale.created_since(since) && sale.needs_reconciliation())
            .await)
    }

    async fn load_succeeded_unnotified_recent(&self, since: DateTime<Utc>) -> Result<Vec<Sale>> {
        Ok(self
            .select(|sale| sale.created_since(since) && sale.awaits_notification())
            .await)
    }

    async fn load_recent(&self, since: DateTime<Utc>) -> Result<Vec<Sale>> {
        Ok(self.select(|sale| sale.created_since(since)).await)
    }
}

/// Performances known to the process, keyed by local id.
#[derive(Default, Clone)]
pub struct InMemoryPerformanceCatalog {
    performances: Arc<RwLock<HashMap<PerformanceId, Performance>>>,
}

impl InMemoryPerformanceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, performance: Performance) {
        let mut performances = self.performances.write().await;
        performances.insert(performance.id, performance);
    }
}

#[async_trait]
impl PerformanceCatalog for InMemoryPerformanceCatalog {
    async fn find(&self, id: PerformanceId) -> Result<Option<Performance>> {
        let performances = self.performances.read().await;
        Ok(performances.get(&id).cloned())
    }
}
