use crate::domain::amount::Balance;
use crate::domain::freeze::FreezeRecord;
use crate::domain::ids::{Address, AssetId, PaymentId};
use crate::domain::payment::{LedgerEntry, LedgerError, PaymentRecord};
use crate::domain::ports::{FreezeStore, LedgerStore};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Ledger {
    records: HashMap<PaymentId, PaymentRecord>,
    balances: HashMap<(Address, AssetId), Balance>,
}

/// A thread-safe in-memory ledger store.
///
/// Records and net positions live behind one `RwLock`, so a commit is
/// observed either entirely or not at all. Ideal for testing or for runs
/// where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    ledger: Arc<RwLock<Ledger>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get(&self, payment_id: &PaymentId) -> Result<Option<PaymentRecord>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.records.get(payment_id).cloned())
    }

    async fn commit(&self, entry: LedgerEntry) -> Result<()> {
        let mut ledger = self.ledger.write().await;

        // Every position is computed before any is written.
        let mut positions: HashMap<(Address, AssetId), Balance> = HashMap::new();
        for posting in entry.postings {
            let key = (posting.party, posting.asset);
            let current = match positions.get(&key) {
                Some(balance) => *balance,
                None => ledger.balances.get(&key).copied().unwrap_or_default(),
            };
            let next = current
                .checked_add(posting.delta)
                .ok_or(LedgerError::Overflow)?;
            positions.insert(key, next);
        }
        ledger.balances.extend(positions);
        ledger.records.insert(entry.record.payment_id, entry.record);
        Ok(())
    }

    async fn balance(&self, party: &Address, asset: &AssetId) -> Result<Balance> {
        let ledger = self.ledger.read().await;
        Ok(ledger
            .balances
            .get(&(party.clone(), asset.clone()))
            .copied()
            .unwrap_or_default())
    }
}

/// In-memory freeze store; clones share the same records.
#[derive(Default, Clone)]
pub struct InMemoryFreezeStore {
    records: Arc<RwLock<HashMap<PaymentId, FreezeRecord>>>,
}

impl InMemoryFreezeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FreezeStore for InMemoryFreezeStore {
    async fn get(&self, payment_id: &PaymentId) -> Result<Option<FreezeRecord>> {
        Ok(self.records.read().await.get(payment_id).copied())
    }

    async fn put(&self, payment_id: PaymentId, record: FreezeRecord) -> Result<()> {
        self.records.write().await.insert(payment_id, record);
        Ok(())
    }

    async fn remove(&self, payment_id: &PaymentId) -> Result<()> {
        self.records.write().await.remove(payment_id);
        Ok(())
    }

    async fn records(&self) -> Result<Vec<(PaymentId, FreezeRecord)>> {
        let records = self.records.read().await;
        Ok(records.iter().map(|(id, record)| (*id, *record)).collect())
    }
}
