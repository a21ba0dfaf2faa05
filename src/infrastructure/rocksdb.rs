use crate::domain::ports::SaleStore;
use crate::domain::sale::{BookingId, Sale, Secret};
use crate::error::{Result, SaleError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;

/// Column Family for storing sale records, keyed by secret.
pub const CF_SALES: &str = "sales";
/// Column Family mapping booking ids to sale secrets.
pub const CF_SALES_BY_BOOKING: &str = "sales_by_booking";

/// A persistent sale store backed by RocksDB.
///
/// Records are stored as JSON under their secret; a second column family
/// indexes them by booking id. Both are written in one batch so the index
/// never points at a missing record.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_sales = ColumnFamilyDescriptor::new(CF_SALES, Options::default());
        let cf_index = ColumnFamilyDescriptor::new(CF_SALES_BY_BOOKING, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_sales, cf_index])?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| SaleError::Storage(format!("column family {name} not found")))
    }

    fn scan(&self, predicate: impl Fn(&Sale) -> bool) -> Result<Vec<Sale>> {
        let cf = self.cf(CF_SALES)?;
        let mut sales = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let sale: Sale = serde_json::from_slice(&value)?;
            if predicate(&sale) {
                sales.push(sale);
            }
        }
        sales.sort_by_key(|s| s.created_at);
        Ok(sales)
    }
}

#[async_trait]
impl SaleStore for RocksDBStore {
    async fn save(&self, sale: Sale) -> Result<()> {
        let sales = self.cf(CF_SALES)?;
        let index = self.cf(CF_SALES_BY_BOOKING)?;

        let value = serde_json::to_vec(&sale)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(sales, sale.secret().as_str().as_bytes(), value);
        batch.put_cf(
            index,
            sale.booking_id().0.to_be_bytes(),
            sale.secret().as_str().as_bytes(),
        );
        self.db.write(batch)?;

        Ok(())
    }

    async fn load(&self, secret: &Secret) -> Result<Option<Sale>> {
        let cf = self.cf(CF_SALES)?;
        match self.db.get_cf(cf, secret.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn load_by_booking_id(&self, booking_id: BookingId) -> Result<Option<Sale>> {
        let index = self.cf(CF_SALES_BY_BOOKING)?;
        let Some(secret) = self.db.get_cf(index, booking_id.0.to_be_bytes())? else {
            return Ok(None);
        };
        let secret = String::from_utf8(secret)
            .map_err(|e| SaleError::Storage(format!("corrupt booking index entry: {e}")))?;
        self.load(&Secret::from(secret)).await
    }

    async fn load_pending_recent(&self, since: DateTime<Utc>) -> Result<Vec<Sale>> {
        self.scan(|sale| sale.created_since(since) && sale.needs_reconciliation())
    }

    async fn load_succeeded_unnotified_recent(&self, since: DateTime<Utc>) -> Result<Vec<Sale>> {
        self.scan(|sale| sale.created_since(since) && sale.awaits_notification())
    }

    async fn load_recent(&self, since: DateTime<Utc>) -> Result<Vec<Sale>> {
        self.scan(|sale| sale.created_since(since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sale::PaymentStatus;
    use crate::domain::sale::tests::{sample_sale, sample_sale_with};
    use chrono::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        assert!(store.db.cf_handle(CF_SALES).is_some());
        assert!(store.db.cf_handle(CF_SALES_BY_BOOKING).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_sale_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let mut sale = sample_sale();
        store.save(sale.clone()).await.unwrap();

        let retrieved = store.load(sale.secret()).await.unwrap().unwrap();
        assert_eq!(retrieved, sale);

        sale.apply_payment_status(PaymentStatus::Succeeded);
        store.save(sale.clone()).await.unwrap();
        let by_booking = store.load_by_booking_id(sale.booking_id()).await.unwrap().unwrap();
        assert_eq!(by_booking.payment_status(), PaymentStatus::Succeeded);

        assert!(store.load(&Secret::from("missing")).await.unwrap().is_none());
        assert!(store.load_by_booking_id(BookingId(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rocksdb_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            store.save(sample_sale_with("fresh", Utc::now())).await.unwrap();
            store
                .save(sample_sale_with("old", Utc::now() - Duration::hours(2)))
                .await
                .unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        let pending = store
            .load_pending_recent(Utc::now() - Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].secret().as_str(), "fresh");
    }
}
