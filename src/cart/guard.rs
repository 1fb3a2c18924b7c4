//! Quantity validation against per-item caps and live stock.

use crate::model::CartItem;

use super::error::{QuantityExceeded, StockError};

/// Stock level of a catalog entry as seen at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// No stock tracking for this entry.
    Unbounded,
    InStock(u32),
    SoldOut,
}

impl Availability {
    /// `None` means the catalog does not track stock; zero or less is sold out.
    pub fn from_available(available: Option<i64>) -> Self {
        match available {
            None => Availability::Unbounded,
            Some(n) if n <= 0 => Availability::SoldOut,
            Some(n) => Availability::InStock(u32::try_from(n).unwrap_or(u32::MAX)),
        }
    }
}

/// Check that `item` may hold `requested` units under its own `max_quantity`.
pub fn can_set_quantity(item: &CartItem, requested: u64) -> Result<(), QuantityExceeded> {
    let max = item.max_quantity.unwrap_or(u32::MAX);
    if requested > u64::from(max) {
        return Err(QuantityExceeded {
            unique_id: item.unique_id.clone(),
            requested,
            max,
        });
    }
    Ok(())
}

/// Check that `item` can still be bought given the catalog's current stock.
pub fn check_stock(item: &CartItem, availability: Availability) -> Result<(), StockError> {
    can_set_quantity(item, u64::from(item.quantity))?;
    match availability {
        Availability::Unbounded => Ok(()),
        Availability::SoldOut => Err(StockError::SoldOut(item.unique_id.clone())),
        Availability::InStock(available) if item.quantity > available => {
            Err(StockError::QuantityExceeded(QuantityExceeded {
                unique_id: item.unique_id.clone(),
                requested: u64::from(item.quantity),
                max: available,
            }))
        }
        Availability::InStock(_) => Ok(()),
    }
}
