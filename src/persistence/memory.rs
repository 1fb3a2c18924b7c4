//! In-memory storage tiers, used by the CLI and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{CartItem, WalletAddress};

use super::PersistenceError;
use super::migrate::PersistedItem;
use super::ports::{LocalCache, RemoteStore};

/// Process-local key-value cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    read_only: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every write, mimicking a full or locked storage quota.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl LocalCache for MemoryCache {
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(PersistenceError::Cache(format!("cache is read-only, cannot write {key}")));
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Remote store held in memory, with switches to simulate outages and latency.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    carts: Mutex<HashMap<WalletAddress, Vec<PersistedItem>>>,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
    saves: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`PersistenceError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Seed a cart directly, in any persisted shape.
    pub fn insert(&self, address: WalletAddress, items: Vec<PersistedItem>) {
        self.carts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, items);
    }

    pub fn stored(&self, address: &WalletAddress) -> Option<Vec<PersistedItem>> {
        self.carts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }

    /// Number of saves that reached the store.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    async fn simulate(&self) -> Result<(), PersistenceError> {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("remote store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get_cart(
        &self,
        address: &WalletAddress,
    ) -> Result<Vec<PersistedItem>, PersistenceError> {
        self.simulate().await?;
        Ok(self.stored(address).unwrap_or_default())
    }

    async fn save_cart(
        &self,
        address: &WalletAddress,
        items: &[CartItem],
    ) -> Result<(), PersistenceError> {
        self.simulate().await?;
        let persisted = items.iter().cloned().map(PersistedItem::from).collect();
        self.insert(address.clone(), persisted);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
