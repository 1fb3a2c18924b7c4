//! Error types for cart mutations.

use thiserror::Error;

use crate::model::UniqueId;

/// A quantity change was refused because it would pass the line's cap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("quantity {requested} for {unique_id} exceeds the maximum of {max}")]
pub struct QuantityExceeded {
    pub unique_id: UniqueId,
    pub requested: u64,
    pub max: u32,
}

/// Error returned by [`CartStore::apply`](super::CartStore::apply).
///
/// A refused mutation always leaves the cart unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error(transparent)]
    QuantityExceeded(#[from] QuantityExceeded),
}

/// Checkout-time stock problem for a single line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    #[error("{0} is sold out")]
    SoldOut(UniqueId),
    #[error(transparent)]
    QuantityExceeded(#[from] QuantityExceeded),
}
