//! Error types for command processing.

use thiserror::Error;

use crate::cart::CartError;
use crate::checkout::CheckoutError;
use crate::persistence::PersistenceError;

/// Top-level error returned by [`CartEngine`](super::CartEngine) operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cart mutation refused: {0}")]
    Cart(#[from] CartError),

    /// The mutation is applied in memory but could not be written to the local cache.
    #[error("cart not persisted: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("checkout failed: {0}")]
    Checkout(#[from] CheckoutError),

    #[error("checkout is not available: no catalog attached")]
    CheckoutUnavailable,
}
