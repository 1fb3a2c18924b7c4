//! In-memory cart of the active session.
//!
//! The store keeps the ordered list of lines and enforces the line
//! invariants: unique `unique_id`s, quantity of at least one, and
//! quantity never above `max_quantity`. It knows nothing about
//! persistence; the engine saves after every accepted mutation.

use tracing::info;

use crate::model::{CartItem, CartOp, NewItem, UniqueId};

pub mod guard;

mod error;
pub use error::{CartError, QuantityExceeded, StockError};

/// Result of a successful `add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new line was appended with quantity 1.
    Added(UniqueId),
    /// An existing line was incremented to `quantity`.
    Incremented { unique_id: UniqueId, quantity: u32 },
}

/// Result of a successful `update_quantity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated { unique_id: UniqueId, quantity: u32 },
    Removed(UniqueId),
    /// No line with that id; the cart is unchanged.
    NotFound(UniqueId),
}

/// Result of a successful [`CartStore::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Added(AddOutcome),
    AddedSizes(Vec<AddOutcome>),
    Updated(UpdateOutcome),
    /// `true` when a line was actually removed.
    Removed(bool),
    Cleared,
}

/// The canonical cart of the active session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartStore {
    items: Vec<CartItem>,
}

/// Public API
impl CartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn get(&self, unique_id: &UniqueId) -> Option<&CartItem> {
        self.items.iter().find(|i| &i.unique_id == unique_id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total units across lines, as shown on the cart badge.
    pub fn count(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }

    /// Put one unit of a variant in the cart.
    pub fn add(&mut self, item: NewItem) -> Result<AddOutcome, CartError> {
        Ok(Self::add_into(&mut self.items, item)?)
    }

    /// Put one unit of a design in the cart for each selected size.
    ///
    /// All sizes are accepted or none is.
    pub fn add_sizes(
        &mut self,
        item: &NewItem,
        sizes: &[String],
    ) -> Result<Vec<AddOutcome>, CartError> {
        let mut staged = self.items.clone();
        let outcomes = sizes
            .iter()
            .map(|size| Self::add_into(&mut staged, item.for_size(size.as_str())))
            .collect::<Result<Vec<_>, _>>()?;
        self.items = staged;
        Ok(outcomes)
    }

    /// Replace the quantity of a line; zero or less removes it.
    pub fn update_quantity(
        &mut self,
        unique_id: &UniqueId,
        quantity: i64,
    ) -> Result<UpdateOutcome, CartError> {
        if quantity <= 0 {
            return Ok(if self.remove(unique_id) {
                UpdateOutcome::Removed(unique_id.clone())
            } else {
                UpdateOutcome::NotFound(unique_id.clone())
            });
        }

        let Some(line) = self.items.iter_mut().find(|i| &i.unique_id == unique_id) else {
            return Ok(UpdateOutcome::NotFound(unique_id.clone()));
        };

        let requested = quantity.unsigned_abs();
        guard::can_set_quantity(line, requested)?;
        // the guard caps at u32::MAX even for unbounded lines
        line.quantity = u32::try_from(requested).unwrap_or(u32::MAX);

        Ok(UpdateOutcome::Updated {
            unique_id: unique_id.clone(),
            quantity: line.quantity,
        })
    }

    /// Drop a line, returning whether it existed.
    pub fn remove(&mut self, unique_id: &UniqueId) -> bool {
        let before = self.items.len();
        self.items.retain(|i| &i.unique_id != unique_id);
        self.items.len() != before
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Apply a single user mutation on top of the current cart.
    pub fn apply(&mut self, op: CartOp) -> Result<MutationOutcome, CartError> {
        let result = match op {
            CartOp::Add(item) => self.add(item).map(MutationOutcome::Added),
            CartOp::AddSizes { item, sizes } => {
                self.add_sizes(&item, &sizes).map(MutationOutcome::AddedSizes)
            }
            CartOp::UpdateQuantity {
                unique_id,
                quantity,
            } => self
                .update_quantity(&unique_id, quantity)
                .map(MutationOutcome::Updated),
            CartOp::Remove { unique_id } => Ok(MutationOutcome::Removed(self.remove(&unique_id))),
            CartOp::Clear => {
                self.clear();
                Ok(MutationOutcome::Cleared)
            }
        };
        self.log_result(&result);
        result
    }
}

/// Crate API
impl CartStore {
    /// Swap the whole content, used when a session loads its persisted cart.
    pub(crate) fn replace(&mut self, items: Vec<CartItem>) {
        self.items = items;
    }
}

/// Private API
impl CartStore {
    fn add_into(items: &mut Vec<CartItem>, item: NewItem) -> Result<AddOutcome, QuantityExceeded> {
        let unique_id = item.unique_id();

        if let Some(line) = items.iter_mut().find(|i| i.unique_id == unique_id) {
            let requested = u64::from(line.quantity) + 1;
            guard::can_set_quantity(line, requested)?;
            line.quantity = u32::try_from(requested).unwrap_or(u32::MAX);
            return Ok(AddOutcome::Incremented {
                unique_id,
                quantity: line.quantity,
            });
        }

        let line = item.into_item();
        // a cap of zero cannot hold even the first unit
        guard::can_set_quantity(&line, 1)?;
        items.push(line);
        Ok(AddOutcome::Added(unique_id))
    }

    fn log_result(&self, result: &Result<MutationOutcome, CartError>) {
        match result {
            Ok(outcome) => {
                info!(count = self.count(), ?outcome, "cart mutation applied");
            }
            Err(e) => {
                info!(count = self.count(), reason = %e, "cart mutation refused");
            }
        }
    }
}
