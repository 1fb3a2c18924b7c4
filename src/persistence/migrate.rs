//! Admission of persisted carts, including shapes written by older clients.
//!
//! Older records may lack `uniqueId` or carry one derived differently, carry
//! a null size or color, hold a
//! non-positive quantity, exceed their cap, or repeat a variant. Every load
//! path goes through [`admit`] before items reach the cart.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{CartItem, ProductId, UniqueId};

fn one() -> i64 {
    1
}

/// A cart line as found in either storage tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedItem {
    pub product_id: ProductId,
    #[serde(default = "one")]
    pub quantity: i64,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub unique_id: Option<UniqueId>,
    #[serde(default)]
    pub campaign: Option<String>,
    #[serde(default)]
    pub piece_name: Option<String>,
    #[serde(default)]
    pub is_ngo: Option<bool>,
    #[serde(default)]
    pub max_quantity: Option<u32>,
}

impl From<CartItem> for PersistedItem {
    fn from(item: CartItem) -> Self {
        Self {
            product_id: item.product_id,
            quantity: i64::from(item.quantity),
            size: Some(item.size),
            color: Some(item.color),
            unique_id: Some(item.unique_id),
            campaign: item.campaign,
            piece_name: item.piece_name,
            is_ngo: Some(item.is_ngo),
            max_quantity: item.max_quantity,
        }
    }
}

/// Turn persisted lines into cart lines that satisfy the cart invariants.
pub fn admit(persisted: Vec<PersistedItem>) -> Vec<CartItem> {
    let mut items: Vec<CartItem> = Vec::with_capacity(persisted.len());

    for record in persisted {
        let size = record.size.unwrap_or_default();
        let color = record.color.unwrap_or_default();
        // keys written by older clients may not match the current derivation
        let unique_id = UniqueId::derive(&record.product_id, &size, &color);
        match &record.unique_id {
            None => debug!(unique_id = %unique_id, "assigned unique id to legacy cart line"),
            Some(stored) if *stored != unique_id => {
                debug!(stored = %stored, unique_id = %unique_id, "re-keyed cart line");
            }
            Some(_) => {}
        }

        if record.quantity < 1 {
            debug!(unique_id = %unique_id, quantity = record.quantity, "dropped empty cart line");
            continue;
        }

        let max = record.max_quantity.unwrap_or(u32::MAX);
        let mut quantity = u32::try_from(record.quantity).unwrap_or(u32::MAX);
        if quantity > max {
            warn!(unique_id = %unique_id, quantity, max, "clamped persisted quantity to cap");
            quantity = max;
        }
        if quantity == 0 {
            continue;
        }

        if let Some(existing) = items.iter_mut().find(|i| i.unique_id == unique_id) {
            let cap = existing.max_quantity.unwrap_or(u32::MAX);
            existing.quantity = existing.quantity.saturating_add(quantity).min(cap);
            debug!(unique_id = %unique_id, quantity = existing.quantity, "merged duplicate cart line");
            continue;
        }

        items.push(CartItem {
            product_id: record.product_id,
            quantity,
            size,
            color,
            unique_id,
            campaign: record.campaign,
            piece_name: record.piece_name,
            is_ngo: record.is_ngo.unwrap_or(false),
            max_quantity: record.max_quantity,
        });
    }

    items
}
