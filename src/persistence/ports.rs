//! Storage tiers the coordinator reconciles.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::model::{CartItem, WalletAddress};

use super::PersistenceError;
use super::migrate::PersistedItem;

/// Synchronous key-value cache local to the device.
///
/// Values are JSON documents; typed access goes through [`LocalCacheExt`].
pub trait LocalCache: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    fn write(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
}

/// Typed JSON helpers over any [`LocalCache`], including trait objects.
pub trait LocalCacheExt: LocalCache {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PersistenceError> {
        match self.read(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), PersistenceError> {
        let raw = serde_json::to_string(value)?;
        self.write(key, &raw)
    }

    /// Append `values` to the JSON list stored under `key`.
    fn append_json<T: Serialize + DeserializeOwned + Clone>(
        &self,
        key: &str,
        values: &[T],
    ) -> Result<(), PersistenceError> {
        let mut list: Vec<T> = self.get_json(key)?.unwrap_or_default();
        list.extend_from_slice(values);
        self.set_json(key, &list)
    }
}

impl<C: LocalCache + ?Sized> LocalCacheExt for C {}

impl fmt::Debug for dyn LocalCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LocalCache")
    }
}

impl fmt::Debug for dyn RemoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RemoteStore")
    }
}

/// Remote cart storage keyed by wallet address.
///
/// Both calls may fail or hang; callers treat it as unreliable.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Stored cart for `address`; an empty list when none exists.
    async fn get_cart(&self, address: &WalletAddress)
    -> Result<Vec<PersistedItem>, PersistenceError>;

    async fn save_cart(
        &self,
        address: &WalletAddress,
        items: &[CartItem],
    ) -> Result<(), PersistenceError>;
}
