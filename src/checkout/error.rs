//! Error types for checkout.

use thiserror::Error;

use crate::cart::QuantityExceeded;
use crate::model::{UniqueId, WalletAddress};
use crate::persistence::PersistenceError;

use super::ledger::LedgerError;

/// Reason a checkout was refused or could not complete.
///
/// Refusals leave the cart and all stores untouched. [`CheckoutError::Donation`]
/// names the lines already settled on the ledger, and
/// [`CheckoutError::FallbackFailed`] comes after the whole cart was settled.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("connect a wallet before checking out")]
    NotConnected,

    #[error("the cart is empty")]
    EmptyCart,

    #[error("you cannot buy your own design ({unique_id}, created by {creator})")]
    SelfPurchaseBlocked {
        unique_id: UniqueId,
        creator: WalletAddress,
    },

    #[error("cart lines could not be matched to the catalog: {0:?}")]
    UnresolvedLineItem(Vec<UniqueId>),

    #[error("sold out: {0:?}")]
    SoldOut(Vec<UniqueId>),

    #[error(transparent)]
    QuantityExceeded(#[from] QuantityExceeded),

    /// The ledger refused a donation. Lines in `settled` were donated before
    /// the failure and their records are stored; they must not be resubmitted.
    #[error("donation to campaign {campaign} failed after {} settled line(s): {source}", .settled.len())]
    Donation {
        campaign: String,
        source: LedgerError,
        settled: Vec<UniqueId>,
    },

    #[error("records of {lost:?} could not be stored remotely nor locally: {source}")]
    FallbackFailed {
        lost: Vec<&'static str>,
        source: PersistenceError,
    },
}
