use crate::domain::amount::Balance;
use crate::domain::freeze::FreezeRecord;
use crate::domain::ids::{Address, AssetId, Digest, PaymentId};
use crate::domain::payment::{LedgerEntry, LedgerError, PaymentRecord};
use crate::domain::ports::{FreezeStore, LedgerStore};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for payment records, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for net positions, keyed by party and asset.
pub const CF_BALANCES: &str = "balances";
/// Column Family for escrow-period and freeze records, keyed by payment id.
pub const CF_FREEZES: &str = "freezes";

/// A persistent ledger store backed by RocksDB.
///
/// Every commit is a single `WriteBatch` touching the payment record and all
/// affected positions, so a crash never leaves a half-applied transition.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbLedgerStore {
    db: Arc<DB>,
    // Serializes the read-modify-write of balances across commits.
    commit_lock: Arc<Mutex<()>>,
}

impl RocksDbLedgerStore {
    /// Opens or creates a RocksDB instance at `path`, creating the
    /// `payments`, `balances` and `freezes` column families when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_payments = ColumnFamilyDescriptor::new(CF_PAYMENTS, Options::default());
        let cf_balances = ColumnFamilyDescriptor::new(CF_BALANCES, Options::default());
        let cf_freezes = ColumnFamilyDescriptor::new(CF_FREEZES, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_payments, cf_balances, cf_freezes])?;

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Arc::default(),
        })
    }

    /// Freeze store backed by the same database.
    pub fn freeze_store(&self) -> RocksDbFreezeStore {
        RocksDbFreezeStore {
            db: self.db.clone(),
        }
    }

    fn read_balance(&self, key: &[u8]) -> Result<Balance> {
        match self.db.get_cf(cf(&self.db, CF_BALANCES)?, key)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Balance::ZERO),
        }
    }
}

fn cf<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name).ok_or_else(|| internal(format!("{name} column family not found")))
}

fn internal(message: String) -> PaymentError {
    PaymentError::InternalError(Box::new(std::io::Error::other(message)))
}

fn balance_key(party: &Address, asset: &AssetId) -> Vec<u8> {
    let mut key = Vec::with_capacity(party.as_str().len() + asset.as_str().len() + 1);
    key.extend_from_slice(party.as_str().as_bytes());
    key.push(0);
    key.extend_from_slice(asset.as_str().as_bytes());
    key
}

#[async_trait]
impl LedgerStore for RocksDbLedgerStore {
    async fn get(&self, payment_id: &PaymentId) -> Result<Option<PaymentRecord>> {
        let cf = cf(&self.db, CF_PAYMENTS)?;
        match self.db.get_cf(cf, payment_id.0.0)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn commit(&self, entry: LedgerEntry) -> Result<()> {
        let _guard = self.commit_lock.lock().await;

        // Postings of one entry may touch the same position more than once.
        let mut positions: HashMap<Vec<u8>, Balance> = HashMap::new();
        for posting in &entry.postings {
            let key = balance_key(&posting.party, &posting.asset);
            let current = match positions.get(&key) {
                Some(balance) => *balance,
                None => self.read_balance(&key)?,
            };
            let next = current
                .checked_add(posting.delta)
                .ok_or(LedgerError::Overflow)?;
            positions.insert(key, next);
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            cf(&self.db, CF_PAYMENTS)?,
            entry.record.payment_id.0.0,
            serde_json::to_vec(&entry.record)?,
        );
        let cf_balances = cf(&self.db, CF_BALANCES)?;
        for (key, balance) in positions {
            batch.put_cf(cf_balances, key, serde_json::to_vec(&balance)?);
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn balance(&self, party: &Address, asset: &AssetId) -> Result<Balance> {
        self.read_balance(&balance_key(party, asset))
    }
}

/// Persistent freeze store sharing the ledger's database.
#[derive(Clone)]
pub struct RocksDbFreezeStore {
    db: Arc<DB>,
}

#[async_trait]
impl FreezeStore for RocksDbFreezeStore {
    async fn get(&self, payment_id: &PaymentId) -> Result<Option<FreezeRecord>> {
        match self.db.get_cf(cf(&self.db, CF_FREEZES)?, payment_id.0.0)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, payment_id: PaymentId, record: FreezeRecord) -> Result<()> {
        self.db.put_cf(
            cf(&self.db, CF_FREEZES)?,
            payment_id.0.0,
            serde_json::to_vec(&record)?,
        )?;
        Ok(())
    }

    async fn remove(&self, payment_id: &PaymentId) -> Result<()> {
        self.db.delete_cf(cf(&self.db, CF_FREEZES)?, payment_id.0.0)?;
        Ok(())
    }

    async fn records(&self) -> Result<Vec<(PaymentId, FreezeRecord)>> {
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf(&self.db, CF_FREEZES)?, IteratorMode::Start) {
            let (key, value) = item?;
            let digest = <[u8; 32]>::try_from(key.as_ref())
                .map_err(|_| internal(format!("malformed freeze key of {} bytes", key.len())))?;
            records.push((PaymentId(Digest(digest)), serde_json::from_slice(&value)?));
        }
        Ok(records)
    }
}
