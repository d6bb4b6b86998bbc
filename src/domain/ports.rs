use super::amount::Balance;
use super::freeze::FreezeRecord;
use super::ids::{Address, AssetId, PaymentId, Timestamp};
use super::payment::{LedgerEntry, PaymentRecord};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Storage port of the ledger actor that custodies escrowed funds.
///
/// The coordinator reads a record, applies a ledger primitive to a local
/// copy, and hands the result back through [`LedgerStore::commit`] only once
/// the whole transition pipeline succeeded.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, payment_id: &PaymentId) -> Result<Option<PaymentRecord>>;
    /// Persists the record and applies all postings as one atomic write.
    async fn commit(&self, entry: LedgerEntry) -> Result<()>;
    /// Net position of `party` in `asset`.
    async fn balance(&self, party: &Address, asset: &AssetId) -> Result<Balance>;
}

pub type LedgerStoreBox = Box<dyn LedgerStore>;

/// Storage port for escrow-period and freeze state, so authorization times
/// and active freezes outlive the process.
#[async_trait]
pub trait FreezeStore: Send + Sync {
    async fn get(&self, payment_id: &PaymentId) -> Result<Option<FreezeRecord>>;
    async fn put(&self, payment_id: PaymentId, record: FreezeRecord) -> Result<()>;
    /// Only used to undo the record of an authorization that never reached
    /// the ledger.
    async fn remove(&self, payment_id: &PaymentId) -> Result<()>;
    async fn records(&self) -> Result<Vec<(PaymentId, FreezeRecord)>>;
}

pub type FreezeStoreBox = Box<dyn FreezeStore>;

/// Source of the logical time every expiry is compared against.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

pub type ClockRef = Arc<dyn Clock>;
