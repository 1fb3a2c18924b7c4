//! Reconciliation of the cart with the local and remote storage tiers.
//!
//! Loads prefer the remote tier and fall back to the local one. Saves always
//! write the local tier synchronously, then queue a best-effort remote write
//! tagged with the current session epoch.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CartConfig;
use crate::model::{CartItem, WalletAddress};

pub mod file;
pub mod memory;
pub mod migrate;
pub mod ports;
mod writer;

pub use file::FileCache;
pub use memory::{MemoryCache, MemoryRemoteStore};
pub use migrate::PersistedItem;
pub use ports::{LocalCache, LocalCacheExt, RemoteStore};
pub use writer::SyncStats;

use writer::RemoteWriter;

/// Error raised by a storage tier.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("remote store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("local cache error: {0}")]
    Cache(String),

    #[error("local cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed stored cart: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Tier that produced a loaded cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    Local,
    /// Neither tier had anything for this identity.
    Empty,
}

/// Cart content restored for an identity.
#[derive(Debug)]
pub struct LoadedCart {
    pub items: Vec<CartItem>,
    pub source: LoadSource,
    /// Why the remote tier could not serve the load, if it failed.
    pub remote_error: Option<PersistenceError>,
}

/// Keeps the cart in step with both storage tiers.
#[derive(Debug)]
pub struct PersistenceCoordinator {
    local: Arc<dyn LocalCache>,
    remote: Arc<dyn RemoteStore>,
    writer: RemoteWriter,
    guest_key: String,
    remote_timeout: Duration,
}

/// Public API
impl PersistenceCoordinator {
    /// Build the coordinator and start its remote writer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        local: Arc<dyn LocalCache>,
        remote: Arc<dyn RemoteStore>,
        config: &CartConfig,
    ) -> Self {
        let writer = RemoteWriter::spawn(Arc::clone(&remote), config.remote_timeout);
        Self {
            local,
            remote,
            writer,
            guest_key: config.guest_key.clone(),
            remote_timeout: config.remote_timeout,
        }
    }

    /// Cache key of the cart owned by `address`, or of the guest cart.
    pub fn cache_key(&self, address: Option<&WalletAddress>) -> String {
        match address {
            Some(address) => format!("cart_{address}"),
            None => self.guest_key.clone(),
        }
    }

    pub fn local(&self) -> &Arc<dyn LocalCache> {
        &self.local
    }

    /// Mark a session boundary: queued remote writes of the old identity are dropped.
    pub fn begin_session(&self) -> u64 {
        let epoch = self.writer.advance_epoch();
        debug!(epoch, "new persistence session");
        epoch
    }

    /// Load the cart stored for `address`.
    ///
    /// Pending remote writes of the current session are flushed first so
    /// the remote read observes them.
    pub async fn load(&self, address: &WalletAddress) -> LoadedCart {
        self.writer.flush().await;

        let remote_error = match self.fetch_remote(address).await {
            Ok(persisted) if !persisted.is_empty() => {
                let items = migrate::admit(persisted);
                info!(address = %address, items = items.len(), "cart loaded from remote store");
                return LoadedCart {
                    items,
                    source: LoadSource::Remote,
                    remote_error: None,
                };
            }
            Ok(_) => None,
            Err(e) => {
                warn!(address = %address, reason = %e, "remote cart unavailable, using local cache");
                Some(e)
            }
        };

        let mut loaded = self.load_local(Some(address));
        loaded.remote_error = remote_error;
        loaded
    }

    /// Restore the guest cart from the local cache; the remote tier is never consulted.
    pub fn load_guest(&self) -> LoadedCart {
        self.load_local(None)
    }

    /// Persist the full cart of `owner` (`None` for guest).
    ///
    /// The local write always happens and its failure is returned. The remote
    /// write is queued only for wallet owners and never reported here.
    pub fn save(
        &self,
        owner: Option<&WalletAddress>,
        items: &[CartItem],
    ) -> Result<(), PersistenceError> {
        let key = self.cache_key(owner);
        let local = self.local.set_json(&key, items);

        if let Some(address) = owner {
            self.writer.enqueue(address.clone(), items.to_vec());
        }

        match &local {
            Ok(()) => debug!(key = %key, items = items.len(), "cart saved to local cache"),
            Err(e) => warn!(key = %key, reason = %e, "local cart save failed"),
        }
        local
    }

    /// Wait for queued remote writes to settle.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.writer.stats()
    }
}

/// Private API
impl PersistenceCoordinator {
    async fn fetch_remote(
        &self,
        address: &WalletAddress,
    ) -> Result<Vec<PersistedItem>, PersistenceError> {
        tokio::time::timeout(self.remote_timeout, self.remote.get_cart(address))
            .await
            .map_err(|_elapsed| PersistenceError::Timeout(self.remote_timeout))?
    }

    fn load_local(&self, owner: Option<&WalletAddress>) -> LoadedCart {
        let key = self.cache_key(owner);
        let persisted = match self.local.get_json::<Vec<PersistedItem>>(&key) {
            Ok(persisted) => persisted.unwrap_or_default(),
            Err(e) => {
                warn!(key = %key, reason = %e, "unreadable local cart, starting empty");
                Vec::new()
            }
        };

        let items = migrate::admit(persisted);
        let source = if items.is_empty() {
            LoadSource::Empty
        } else {
            LoadSource::Local
        };
        info!(key = %key, items = items.len(), ?source, "cart loaded from local cache");

        LoadedCart {
            items,
            source,
            remote_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewItem;

    // test utils

    struct Fixture {
        local: Arc<MemoryCache>,
        remote: Arc<MemoryRemoteStore>,
        coordinator: PersistenceCoordinator,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(MemoryCache::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let config = CartConfig {
            remote_timeout: Duration::from_millis(200),
            ..CartConfig::default()
        };
        let coordinator = PersistenceCoordinator::new(
            Arc::clone(&local) as Arc<dyn LocalCache>,
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            &config,
        );
        Fixture {
            local,
            remote,
            coordinator,
        }
    }

    fn items() -> Vec<CartItem> {
        let mut shirt = NewItem::new("1", "M", "black").into_item();
        shirt.quantity = 2;
        vec![shirt, NewItem::new("2", "S", "red").into_item()]
    }

    fn pairs(items: &[CartItem]) -> Vec<(String, u32)> {
        let mut pairs: Vec<_> = items
            .iter()
            .map(|i| (i.unique_id.to_string(), i.quantity))
            .collect();
        pairs.sort();
        pairs
    }

    fn addr(s: &str) -> WalletAddress {
        WalletAddress::from(s)
    }

    #[tokio::test]
    async fn cache_keys_are_scoped() {
        let f = fixture();
        assert_eq!(f.coordinator.cache_key(Some(&addr("0xa"))), "cart_0xa");
        assert_eq!(f.coordinator.cache_key(None), "cart");
    }

    #[tokio::test]
    async fn save_then_load_round_trips_through_remote() {
        let f = fixture();
        f.coordinator.save(Some(&addr("0xa")), &items()).unwrap();

        let loaded = f.coordinator.load(&addr("0xa")).await;
        assert_eq!(loaded.source, LoadSource::Remote);
        assert_eq!(pairs(&loaded.items), pairs(&items()));
    }

    #[tokio::test]
    async fn save_then_load_round_trips_through_local_when_remote_down() {
        let f = fixture();
        f.remote.set_offline(true);
        f.coordinator.save(Some(&addr("0xa")), &items()).unwrap();

        let loaded = f.coordinator.load(&addr("0xa")).await;
        assert_eq!(loaded.source, LoadSource::Local);
        assert!(matches!(
            loaded.remote_error,
            Some(PersistenceError::Unavailable(_))
        ));
        assert_eq!(pairs(&loaded.items), pairs(&items()));
        assert_eq!(f.coordinator.sync_stats().failed, 1);
    }

    #[tokio::test]
    async fn remote_timeout_falls_back_to_local() {
        let f = fixture();
        f.local.set_json("cart_0xa", &items()).unwrap();
        f.remote.set_latency(Some(Duration::from_secs(5)));

        let loaded = f.coordinator.load(&addr("0xa")).await;
        assert_eq!(loaded.source, LoadSource::Local);
        assert!(matches!(
            loaded.remote_error,
            Some(PersistenceError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn remote_is_authoritative_when_non_empty() {
        let f = fixture();
        f.local.set_json("cart_0xa", &items()).unwrap();
        let remote_items = vec![PersistedItem::from(NewItem::new("9", "L", "blue").into_item())];
        f.remote.insert(addr("0xa"), remote_items);

        let loaded = f.coordinator.load(&addr("0xa")).await;
        assert_eq!(loaded.source, LoadSource::Remote);
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].unique_id.as_str(), "9-L-blue");
    }

    #[tokio::test]
    async fn nothing_stored_loads_empty() {
        let f = fixture();
        let loaded = f.coordinator.load(&addr("0xnew")).await;
        assert_eq!(loaded.source, LoadSource::Empty);
        assert!(loaded.items.is_empty());
    }

    #[tokio::test]
    async fn legacy_records_are_migrated_on_both_tiers() {
        let f = fixture();
        let legacy: Vec<PersistedItem> =
            serde_json::from_str(r#"[{"productId": 4, "quantity": 1, "size": "M", "color": "red"}]"#)
                .unwrap();

        f.remote.insert(addr("0xa"), legacy.clone());
        let remote = f.coordinator.load(&addr("0xa")).await;
        assert_eq!(remote.items[0].unique_id.as_str(), "4-M-red");

        f.local.set_json("cart_0xb", &legacy).unwrap();
        let local = f.coordinator.load(&addr("0xb")).await;
        assert_eq!(local.source, LoadSource::Local);
        assert_eq!(local.items[0].unique_id.as_str(), "4-M-red");
    }

    #[tokio::test]
    async fn guest_save_never_reaches_remote() {
        let f = fixture();
        f.coordinator.save(None, &items()).unwrap();
        f.coordinator.flush().await;

        assert_eq!(f.remote.save_count(), 0);
        let guest = f.coordinator.load_guest();
        assert_eq!(guest.source, LoadSource::Local);
        assert_eq!(pairs(&guest.items), pairs(&items()));
    }

    #[tokio::test]
    async fn local_write_happens_even_when_remote_fails() {
        let f = fixture();
        f.remote.set_offline(true);
        f.coordinator.save(Some(&addr("0xa")), &items()).unwrap();

        let stored: Vec<CartItem> = f.local.get_json("cart_0xa").unwrap().unwrap();
        assert_eq!(stored, items());
    }

    #[tokio::test]
    async fn local_failure_is_reported() {
        let f = fixture();
        f.local.set_read_only(true);
        assert!(matches!(
            f.coordinator.save(None, &items()),
            Err(PersistenceError::Cache(_))
        ));
    }

    #[tokio::test]
    async fn writes_of_a_past_session_still_reach_their_wallet() {
        let f = fixture();
        // the writer task cannot run before the next await on this runtime
        f.coordinator.save(Some(&addr("0xa")), &items()).unwrap();
        f.coordinator.begin_session();
        f.coordinator.flush().await;

        let stored = migrate::admit(f.remote.stored(&addr("0xa")).unwrap());
        assert_eq!(stored, items());
        assert!(f.remote.stored(&addr("0xb")).is_none());
        assert_eq!(f.coordinator.sync_stats().saved, 1);
        assert_eq!(f.coordinator.sync_stats().stale, 1);
    }

    #[tokio::test]
    async fn reload_after_session_end_sees_latest_queued_write() {
        let f = fixture();
        let mut latest = items();
        latest.pop();
        f.coordinator.save(Some(&addr("0xa")), &items()).unwrap();
        f.coordinator.flush().await;
        f.coordinator.save(Some(&addr("0xa")), &latest).unwrap();
        f.coordinator.begin_session();

        let loaded = f.coordinator.load(&addr("0xa")).await;
        assert_eq!(loaded.source, LoadSource::Remote);
        assert_eq!(pairs(&loaded.items), pairs(&latest));
    }

    #[tokio::test]
    async fn writes_apply_in_dispatch_order() {
        let f = fixture();
        let first = items();
        let mut second = items();
        second.pop();

        f.coordinator.save(Some(&addr("0xa")), &first).unwrap();
        f.coordinator.save(Some(&addr("0xa")), &second).unwrap();
        f.coordinator.flush().await;

        let stored = migrate::admit(f.remote.stored(&addr("0xa")).unwrap());
        assert_eq!(stored, second);
        assert_eq!(f.coordinator.sync_stats().saved, 2);
    }
}
