//! Cart command processing.
//!
//! The engine owns the cart of the active session and reacts to two kinds of
//! input: wallet session snapshots and user cart mutations, plus checkout
//! requests when a checkout aggregator is attached. Every accepted mutation
//! is persisted; every identity change reloads the cart for the new identity.
//! Also supports an async stream of commands.

use std::sync::Arc;

use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::cart::{CartStore, MutationOutcome};
use crate::checkout::{CheckoutAggregator, CheckoutError, CheckoutReceipt};
use crate::model::{CartOp, Command, UniqueId, WalletSession};
use crate::persistence::{LoadSource, PersistenceCoordinator};
use crate::session::{SessionTransition, WalletSessionTracker};

mod error;
pub use error::EngineError;

/// The cart engine.
///
/// Single owner of the cart: commands are applied one at a time, and no
/// command observes the cart while a session load is in progress.
#[derive(Debug)]
pub struct CartEngine {
    store: CartStore,
    tracker: WalletSessionTracker,
    persistence: PersistenceCoordinator,
    aggregator: Option<Arc<CheckoutAggregator>>,
}

/// Public API
impl CartEngine {
    /// Start disconnected, showing the last guest cart if one was saved.
    pub fn new(persistence: PersistenceCoordinator) -> Self {
        let mut store = CartStore::new();
        store.replace(persistence.load_guest().items);
        Self {
            store,
            tracker: WalletSessionTracker::new(),
            persistence,
            aggregator: None,
        }
    }

    /// Attach the aggregator used by [`Command::Checkout`].
    pub fn with_checkout(mut self, aggregator: Arc<CheckoutAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Run the engine with the given command stream
    pub async fn run(&mut self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            // a refused command must not stop the engine
            if let Err(e) = self.dispatch(command).await {
                warn!(reason = %e, "command skipped");
            }
        }
    }

    /// Apply a single command on top of the current state
    pub async fn dispatch(&mut self, command: Command) -> Result<(), EngineError> {
        match command {
            Command::Session(session) => {
                self.on_session_changed(session).await;
                Ok(())
            }
            Command::Cart(op) => self.apply(op).map(|_| ()),
            Command::Checkout => {
                let aggregator = self
                    .aggregator
                    .clone()
                    .ok_or(EngineError::CheckoutUnavailable)?;
                self.checkout(&aggregator).await.map(|_| ())
            }
        }
    }

    pub fn cart(&self) -> &CartStore {
        &self.store
    }

    pub fn session(&self) -> &WalletSession {
        self.tracker.session()
    }

    pub fn persistence(&self) -> &PersistenceCoordinator {
        &self.persistence
    }

    /// React to a wallet session snapshot.
    ///
    /// Returns the tier the cart was reloaded from, or `None` when no reload
    /// happened.
    pub async fn on_session_changed(&mut self, session: WalletSession) -> Option<LoadSource> {
        match self.tracker.observe(session) {
            SessionTransition::Unchanged => None,
            SessionTransition::Isolated { previous } => {
                self.store.clear();
                self.persistence.begin_session();
                info!(previous = %previous, "wallet changing, cart isolated");
                None
            }
            SessionTransition::Disconnected { previous } => {
                self.store.clear();
                self.persistence.begin_session();
                let loaded = self.persistence.load_guest();
                self.store.replace(loaded.items);
                info!(previous = ?previous, count = self.store.count(), "wallet disconnected, guest cart restored");
                Some(loaded.source)
            }
            SessionTransition::Connected { previous, address } => {
                if previous.as_ref() != Some(&address) {
                    // nothing of the previous identity may stay visible during the load
                    self.store.clear();
                    self.persistence.begin_session();
                }
                let loaded = self.persistence.load(&address).await;
                self.store.replace(loaded.items);
                info!(
                    address = %address,
                    source = ?loaded.source,
                    count = self.store.count(),
                    "wallet connected, cart loaded"
                );
                Some(loaded.source)
            }
        }
    }

    /// Apply a cart mutation and persist the resulting cart.
    ///
    /// On [`EngineError::Persistence`] the mutation still stands in memory.
    pub fn apply(&mut self, op: CartOp) -> Result<MutationOutcome, EngineError> {
        let outcome = self.store.apply(op)?;
        self.persist()?;
        Ok(outcome)
    }

    /// Settle the cart and clear it once its records are stored.
    ///
    /// Lines the ledger already took are removed even when checkout fails,
    /// so a retry never donates them twice.
    pub async fn checkout(
        &mut self,
        aggregator: &CheckoutAggregator,
    ) -> Result<CheckoutReceipt, EngineError> {
        let settled = aggregator
            .settle(self.store.items(), self.tracker.session())
            .await;
        match settled {
            Ok(receipt) => {
                self.store.clear();
                self.persist_settled();
                Ok(receipt)
            }
            Err(e) => {
                match &e {
                    CheckoutError::Donation { settled, .. } if !settled.is_empty() => {
                        self.drop_lines(settled);
                    }
                    // settlement went through; only some records were lost
                    CheckoutError::FallbackFailed { .. } => {
                        self.store.clear();
                        self.persist_settled();
                    }
                    _ => {}
                }
                Err(e.into())
            }
        }
    }

    /// Wait for queued remote writes to settle.
    pub async fn flush(&self) {
        self.persistence.flush().await;
    }
}

/// Private API
impl CartEngine {
    fn drop_lines(&mut self, settled: &[UniqueId]) {
        for unique_id in settled {
            self.store.remove(unique_id);
        }
        self.persist_settled();
    }

    fn persist_settled(&self) {
        if let Err(e) = self.persist() {
            error!(reason = %e, "cart could not be persisted after checkout");
        }
    }

    fn persist(&self) -> Result<(), EngineError> {
        if self.tracker.is_isolated() {
            debug!("wallet switch in progress, cart change kept in memory only");
            return Ok(());
        }
        self.persistence
            .save(self.tracker.owner(), self.store.items())
            .map_err(EngineError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::Amount;
    use crate::cart::CartError;
    use crate::checkout::CheckoutError;
    use crate::checkout::catalog::{CatalogLookup, CustomDesign, MemoryCatalog, Product};
    use crate::checkout::ledger::{DonationLedger, MemoryLedger, MemoryRecordStore, RecordStore};
    use crate::config::CartConfig;
    use crate::model::{NewItem, UniqueId, WalletAddress};
    use crate::persistence::{
        LocalCache, LocalCacheExt, MemoryCache, MemoryRemoteStore, RemoteStore,
    };

    // test utils

    struct Fixture {
        local: Arc<MemoryCache>,
        remote: Arc<MemoryRemoteStore>,
        engine: CartEngine,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(MemoryCache::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let engine = engine_over(&local, &remote);
        Fixture {
            local,
            remote,
            engine,
        }
    }

    fn engine_over(local: &Arc<MemoryCache>, remote: &Arc<MemoryRemoteStore>) -> CartEngine {
        let config = CartConfig {
            remote_timeout: Duration::from_millis(200),
            ..CartConfig::default()
        };
        CartEngine::new(PersistenceCoordinator::new(
            Arc::clone(local) as Arc<dyn LocalCache>,
            Arc::clone(remote) as Arc<dyn RemoteStore>,
            &config,
        ))
    }

    fn add(product: &str) -> CartOp {
        CartOp::Add(NewItem::new(product, "M", "black"))
    }

    fn uid(product: &str) -> UniqueId {
        NewItem::new(product, "M", "black").unique_id()
    }

    fn ids(engine: &CartEngine) -> Vec<String> {
        engine
            .cart()
            .items()
            .iter()
            .map(|i| i.unique_id.to_string())
            .collect()
    }

    #[tokio::test]
    async fn new_engine_starts_with_empty_guest_cart() {
        let f = fixture();
        assert!(f.engine.cart().is_empty());
        assert!(f.engine.session().address.is_none());
    }

    #[tokio::test]
    async fn guest_cart_is_restored_on_start() {
        let local = Arc::new(MemoryCache::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        {
            let mut engine = engine_over(&local, &remote);
            engine.apply(add("1")).unwrap();
            engine.apply(add("1")).unwrap();
        }

        let engine = engine_over(&local, &remote);
        assert_eq!(engine.cart().count(), 2);
        assert_eq!(remote.save_count(), 0);
    }

    #[tokio::test]
    async fn mutations_write_through_both_tiers() {
        let mut f = fixture();
        f.engine
            .on_session_changed(WalletSession::connected("0xa"))
            .await;
        f.engine.apply(add("1")).unwrap();
        f.engine.flush().await;

        let local: Vec<crate::model::CartItem> = f.local.get_json("cart_0xa").unwrap().unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(f.remote.stored(&WalletAddress::from("0xa")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refused_mutation_is_reported_and_not_persisted() {
        let mut f = fixture();
        let capped = NewItem::new("1", "M", "black").with_max_quantity(Some(1));
        f.engine.apply(CartOp::Add(capped.clone())).unwrap();

        let result = f.engine.apply(CartOp::Add(capped));
        assert!(matches!(
            result,
            Err(EngineError::Cart(CartError::QuantityExceeded(_)))
        ));
        assert_eq!(f.engine.cart().count(), 1);
    }

    #[tokio::test]
    async fn switching_wallets_never_shows_previous_cart() {
        let mut f = fixture();
        f.engine
            .on_session_changed(WalletSession::connected("0xa"))
            .await;
        f.engine.apply(add("1")).unwrap();
        f.engine.apply(add("2")).unwrap();

        f.engine
            .on_session_changed(WalletSession::connecting(Some("0xb".into())))
            .await;
        assert!(f.engine.cart().is_empty());

        let source = f
            .engine
            .on_session_changed(WalletSession::connected("0xb"))
            .await;
        assert_eq!(source, Some(LoadSource::Empty));
        assert!(f.engine.cart().is_empty());

        f.engine.apply(add("3")).unwrap();
        assert_eq!(ids(&f.engine), vec![uid("3").to_string()]);
    }

    #[tokio::test]
    async fn direct_switch_loads_only_new_wallet_cart() {
        let mut f = fixture();
        f.remote.insert(
            WalletAddress::from("0xb"),
            vec![NewItem::new("9", "M", "black").into_item().into()],
        );
        f.remote.set_latency(Some(Duration::from_millis(20)));

        f.engine
            .on_session_changed(WalletSession::connected("0xa"))
            .await;
        f.engine.apply(add("1")).unwrap();
        f.engine
            .on_session_changed(WalletSession::connected("0xb"))
            .await;

        assert_eq!(ids(&f.engine), vec![uid("9").to_string()]);
    }

    #[tokio::test]
    async fn reconnecting_restores_wallet_cart() {
        let mut f = fixture();
        f.engine
            .on_session_changed(WalletSession::connected("0xa"))
            .await;
        f.engine.apply(add("1")).unwrap();
        f.engine.flush().await;

        f.engine
            .on_session_changed(WalletSession::disconnected())
            .await;
        assert!(f.engine.cart().is_empty());

        let source = f
            .engine
            .on_session_changed(WalletSession::connected("0xa"))
            .await;
        assert_eq!(source, Some(LoadSource::Remote));
        assert_eq!(ids(&f.engine), vec![uid("1").to_string()]);
    }

    #[tokio::test]
    async fn guest_cart_stays_separate_from_wallet_cart() {
        let mut f = fixture();
        f.engine.apply(add("guest")).unwrap();

        f.engine
            .on_session_changed(WalletSession::connected("0xa"))
            .await;
        assert!(f.engine.cart().is_empty());
        f.engine.apply(add("1")).unwrap();

        f.engine
            .on_session_changed(WalletSession::disconnected())
            .await;
        assert_eq!(ids(&f.engine), vec![uid("guest").to_string()]);
    }

    #[tokio::test]
    async fn queued_write_reaches_previous_wallet_after_switch() {
        let mut f = fixture();
        f.engine
            .on_session_changed(WalletSession::connected("0xa"))
            .await;
        // queued, and the writer does not get to run before the switch
        f.engine.apply(add("1")).unwrap();
        f.engine
            .on_session_changed(WalletSession::connected("0xb"))
            .await;

        assert!(f.engine.cart().is_empty());
        assert_eq!(f.remote.stored(&WalletAddress::from("0xa")).unwrap().len(), 1);
        assert_eq!(f.engine.persistence().sync_stats().stale, 1);

        let source = f
            .engine
            .on_session_changed(WalletSession::connected("0xa"))
            .await;
        assert_eq!(source, Some(LoadSource::Remote));
        assert_eq!(ids(&f.engine), vec![uid("1").to_string()]);
    }

    #[tokio::test]
    async fn reconnect_keeps_change_made_just_before_disconnect() {
        let mut f = fixture();
        f.engine
            .on_session_changed(WalletSession::connected("0xa"))
            .await;
        f.engine.apply(add("1")).unwrap();
        f.engine.flush().await;
        f.engine.apply(add("2")).unwrap();

        f.engine
            .on_session_changed(WalletSession::disconnected())
            .await;
        let source = f
            .engine
            .on_session_changed(WalletSession::connected("0xa"))
            .await;

        assert_eq!(source, Some(LoadSource::Remote));
        assert_eq!(
            ids(&f.engine),
            vec![uid("1").to_string(), uid("2").to_string()]
        );
    }

    #[tokio::test]
    async fn changes_during_isolation_touch_no_stored_cart() {
        let mut f = fixture();
        f.engine.apply(add("guest")).unwrap();
        f.engine
            .on_session_changed(WalletSession::connected("0xa"))
            .await;
        f.engine.apply(add("1")).unwrap();

        f.engine
            .on_session_changed(WalletSession::connecting(Some("0xb".into())))
            .await;
        f.engine.apply(add("2")).unwrap();
        assert_eq!(ids(&f.engine), vec![uid("2").to_string()]);

        let guest: Vec<crate::model::CartItem> = f.local.get_json("cart").unwrap().unwrap();
        assert_eq!(guest.len(), 1);
        assert_eq!(guest[0].unique_id, uid("guest"));
        let wallet: Vec<crate::model::CartItem> = f.local.get_json("cart_0xa").unwrap().unwrap();
        assert_eq!(wallet.len(), 1);
        assert_eq!(wallet[0].unique_id, uid("1"));
        assert!(f.local.get_json::<Vec<crate::model::CartItem>>("cart_0xb").unwrap().is_none());

        f.engine
            .on_session_changed(WalletSession::connected("0xb"))
            .await;
        assert!(f.engine.cart().is_empty());
    }

    #[tokio::test]
    async fn remote_outage_does_not_block_cart() {
        let mut f = fixture();
        f.remote.set_offline(true);
        f.engine
            .on_session_changed(WalletSession::connected("0xa"))
            .await;

        f.engine.apply(add("1")).unwrap();
        f.engine.apply(add("1")).unwrap();
        f.engine.flush().await;

        assert_eq!(f.engine.cart().count(), 2);
        assert_eq!(f.engine.persistence().sync_stats().failed, 2);
    }

    #[tokio::test]
    async fn run_processes_all_commands() {
        let mut f = fixture();
        let commands = vec![
            Command::Session(WalletSession::connected("0xa")),
            Command::Cart(add("1")),
            Command::Cart(add("1")),
            Command::Cart(add("2")),
            Command::Cart(CartOp::Remove { unique_id: uid("2") }),
        ];

        f.engine.run(tokio_stream::iter(commands)).await;

        assert_eq!(ids(&f.engine), vec![uid("1").to_string()]);
        assert_eq!(f.engine.cart().count(), 2);
    }

    #[tokio::test]
    async fn run_skips_refused_commands_and_continues() {
        let mut f = fixture();
        let capped = NewItem::new("1", "M", "black").with_max_quantity(Some(1));
        let commands = vec![
            Command::Cart(CartOp::Add(capped.clone())),
            Command::Cart(CartOp::Add(capped)), // refused
            Command::Cart(add("2")),
        ];

        f.engine.run(tokio_stream::iter(commands)).await;

        assert_eq!(f.engine.cart().count(), 2);
    }

    // checkout

    fn aggregator(local: &Arc<MemoryCache>) -> (Arc<MemoryRecordStore>, CheckoutAggregator) {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert_product(Product {
            id: "1".into(),
            name: "Tee".into(),
            price: "₦20,000".into(),
            available_quantity: None,
        });
        catalog.insert_product(Product {
            id: "free".into(),
            name: "Pin".into(),
            price: "₦0".into(),
            available_quantity: None,
        });
        catalog.insert_design(CustomDesign {
            id: "d".into(),
            piece_name: "Wave".into(),
            price: "₦10,000".into(),
            creator_wallet: Some("0xA".into()),
            connected_wallet_address: None,
            is_ngo: false,
            sizes: vec!["M".into()],
            available_quantity: None,
        });
        let store = Arc::new(MemoryRecordStore::new());
        let aggregator = CheckoutAggregator::new(
            catalog as Arc<dyn CatalogLookup>,
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::clone(local) as Arc<dyn LocalCache>,
            Amount::new(4_000),
        );
        (store, aggregator)
    }

    #[tokio::test]
    async fn checkout_clears_cart_after_records_are_stored() {
        let mut f = fixture();
        let (store, aggregator) = aggregator(&f.local);
        f.engine
            .on_session_changed(WalletSession::connected("0xbuyer"))
            .await;
        f.engine
            .apply(CartOp::Add(NewItem::new("d", "M", "white").with_piece_name("Wave")))
            .unwrap();
        f.engine.apply(add("1")).unwrap();

        let receipt = f.engine.checkout(&aggregator).await.unwrap();

        assert_eq!(receipt.summary.total, Amount::new(34_000));
        assert_eq!(store.purchases(crate::model::PurchaseType::User).len(), 1);
        assert!(f.engine.cart().is_empty());
        let local: Vec<crate::model::CartItem> =
            f.local.get_json("cart_0xbuyer").unwrap().unwrap();
        assert!(local.is_empty());
    }

    #[tokio::test]
    async fn blocked_checkout_keeps_cart() {
        let mut f = fixture();
        let (_store, aggregator) = aggregator(&f.local);
        f.engine
            .on_session_changed(WalletSession::connected("0xa"))
            .await;
        f.engine
            .apply(CartOp::Add(NewItem::new("d", "M", "white").with_piece_name("Wave")))
            .unwrap();

        let result = f.engine.checkout(&aggregator).await;
        assert!(matches!(
            result,
            Err(EngineError::Checkout(CheckoutError::SelfPurchaseBlocked { .. }))
        ));
        assert_eq!(f.engine.cart().count(), 1);
    }

    #[tokio::test]
    async fn lines_donated_before_a_ledger_refusal_leave_the_cart() {
        let mut f = fixture();
        let (store, aggregator) = aggregator(&f.local);
        let ledger = Arc::new(MemoryLedger::new());
        let aggregator = aggregator.with_ledger(Arc::clone(&ledger) as Arc<dyn DonationLedger>);
        f.engine
            .on_session_changed(WalletSession::connected("0xbuyer"))
            .await;
        f.engine
            .apply(CartOp::Add(NewItem::new("1", "M", "black").with_campaign("water")))
            .unwrap();
        f.engine
            .apply(CartOp::Add(NewItem::new("free", "M", "black").with_campaign("school")))
            .unwrap();

        let first = f.engine.checkout(&aggregator).await;
        assert!(matches!(
            first,
            Err(EngineError::Checkout(CheckoutError::Donation { .. }))
        ));
        assert_eq!(ids(&f.engine), vec![uid("free").to_string()]);
        assert_eq!(store.donations().len(), 1);

        let retry = f.engine.checkout(&aggregator).await;
        assert!(retry.is_err());
        assert_eq!(
            ledger.donations_by_campaign("water").await.unwrap(),
            Amount::new(20_000)
        );
        assert_eq!(store.donations().len(), 1);
    }

    #[tokio::test]
    async fn checkout_command_settles_through_attached_aggregator() {
        let f = fixture();
        let (store, aggregator) = aggregator(&f.local);
        let mut engine = f.engine.with_checkout(Arc::new(aggregator));
        let commands = vec![
            Command::Session(WalletSession::connected("0xbuyer")),
            Command::Cart(CartOp::Add(
                NewItem::new("d", "M", "white").with_piece_name("Wave"),
            )),
            Command::Checkout,
        ];

        engine.run(tokio_stream::iter(commands)).await;

        assert!(engine.cart().is_empty());
        assert_eq!(store.purchases(crate::model::PurchaseType::User).len(), 1);
    }

    #[tokio::test]
    async fn checkout_command_without_aggregator_is_refused() {
        let mut f = fixture();
        f.engine
            .on_session_changed(WalletSession::connected("0xbuyer"))
            .await;
        f.engine.apply(add("1")).unwrap();

        let result = f.engine.dispatch(Command::Checkout).await;
        assert!(matches!(result, Err(EngineError::CheckoutUnavailable)));
        assert_eq!(f.engine.cart().count(), 1);
    }
}
