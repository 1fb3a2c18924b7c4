//! Settlement destinations: the on-chain donation ledger and record stores.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

use crate::Amount;
use crate::model::{DonationRecord, PurchaseRecord, PurchaseType};

/// Error raised by a ledger or record store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger rejected the request: {0}")]
    Rejected(String),
}

/// Hash of a submitted ledger transaction.
pub type TxHash = String;

/// On-chain donation contract.
#[async_trait]
pub trait DonationLedger: Send + Sync {
    async fn donate(&self, campaign_id: &str, amount: Amount) -> Result<TxHash, LedgerError>;

    /// Total raised so far by a campaign.
    async fn donations_by_campaign(&self, campaign_id: &str) -> Result<Amount, LedgerError>;
}

/// Append-only stores for settlement records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn append_donations(&self, records: &[DonationRecord]) -> Result<(), LedgerError>;

    async fn append_purchases(
        &self,
        bucket: PurchaseType,
        records: &[PurchaseRecord],
    ) -> Result<(), LedgerError>;
}

impl fmt::Debug for dyn DonationLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DonationLedger")
    }
}

impl fmt::Debug for dyn RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecordStore")
    }
}

/// Ledger held in memory, producing sequential fake hashes.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    raised: Mutex<HashMap<String, Amount>>,
    next_tx: AtomicU64,
    offline: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl DonationLedger for MemoryLedger {
    async fn donate(&self, campaign_id: &str, amount: Amount) -> Result<TxHash, LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger offline".into()));
        }
        if amount <= Amount::ZERO {
            return Err(LedgerError::Rejected(format!("non-positive donation {amount}")));
        }
        *self
            .raised
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(campaign_id.to_string())
            .or_default() += amount;
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("0x{n:064x}"))
    }

    async fn donations_by_campaign(&self, campaign_id: &str) -> Result<Amount, LedgerError> {
        Ok(self
            .raised
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(campaign_id)
            .copied()
            .unwrap_or_default())
    }
}

/// Record store held in memory, with per-bucket failure switches.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    donations: Mutex<Vec<DonationRecord>>,
    purchases: Mutex<HashMap<PurchaseType, Vec<PurchaseRecord>>>,
    fail_donations: AtomicBool,
    fail_purchases: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_donations(&self, fail: bool) {
        self.fail_donations.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_purchases(&self, fail: bool) {
        self.fail_purchases.store(fail, Ordering::SeqCst);
    }

    pub fn donations(&self) -> Vec<DonationRecord> {
        self.donations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn purchases(&self, bucket: PurchaseType) -> Vec<PurchaseRecord> {
        self.purchases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&bucket)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn append_donations(&self, records: &[DonationRecord]) -> Result<(), LedgerError> {
        if self.fail_donations.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("donation store offline".into()));
        }
        self.donations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(records);
        Ok(())
    }

    async fn append_purchases(
        &self,
        bucket: PurchaseType,
        records: &[PurchaseRecord],
    ) -> Result<(), LedgerError> {
        if self.fail_purchases.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("purchase store offline".into()));
        }
        self.purchases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(bucket)
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }
}
