//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::Amount;

/// Settings shared by the persistence and checkout layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartConfig {
    /// Local cache key of the cart used while no wallet is connected.
    pub guest_key: String,
    /// Flat shipping fee added to every checkout.
    pub shipping_fee: Amount,
    /// Upper bound on a single remote store call.
    pub remote_timeout: Duration,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            guest_key: "cart".to_string(),
            shipping_fee: Amount::new(4_000),
            remote_timeout: Duration::from_secs(5),
        }
    }
}

/// Replay cart commands from a CSV file and print the resulting cart.
#[derive(Debug, Parser)]
#[command(name = "wallet-cart", about, long_about = None)]
pub struct Cli {
    /// CSV file of session and cart commands
    pub commands: PathBuf,

    /// JSON file backing the local cache; in memory when omitted
    #[arg(long, env = "WALLET_CART_CACHE")]
    pub cache_file: Option<PathBuf>,

    /// Local cache key of the guest cart
    #[arg(long, env = "WALLET_CART_GUEST_KEY", default_value = "cart")]
    pub guest_key: String,

    /// Timeout of remote store calls, in milliseconds
    #[arg(long, env = "WALLET_CART_REMOTE_TIMEOUT_MS", default_value_t = 5_000)]
    pub remote_timeout_ms: u64,

    /// JSON catalog of products and designs; enables the checkout command
    #[arg(long, env = "WALLET_CART_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// Flat shipping fee added at checkout, in whole naira
    #[arg(long, env = "WALLET_CART_SHIPPING_FEE", default_value_t = 4_000)]
    pub shipping_fee: i64,
}

impl Cli {
    pub fn cart_config(&self) -> CartConfig {
        CartConfig {
            guest_key: self.guest_key.clone(),
            shipping_fee: Amount::new(self.shipping_fee),
            remote_timeout: Duration::from_millis(self.remote_timeout_ms),
        }
    }
}
