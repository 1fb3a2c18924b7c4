pub mod amount;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod csv;
pub mod engine;
pub mod model;
pub mod persistence;
pub mod session;

pub use amount::Amount;
pub use cart::CartStore;
pub use checkout::CheckoutAggregator;
pub use config::CartConfig;
pub use engine::CartEngine;
pub use model::{CartItem, CartOp, Command, NewItem, ProductId, UniqueId, WalletAddress, WalletSession};
pub use persistence::PersistenceCoordinator;
pub use session::WalletSessionTracker;
