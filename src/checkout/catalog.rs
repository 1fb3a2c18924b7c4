//! Catalog and design lookups consumed at checkout.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;

use crate::model::{ProductId, WalletAddress};

/// A regular catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Price as displayed, e.g. `"₦20,000"`.
    pub price: String,
    /// Units left; `None` when stock is not tracked.
    #[serde(default)]
    pub available_quantity: Option<i64>,
}

/// A design created by a user or an NGO.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomDesign {
    pub id: ProductId,
    pub piece_name: String,
    pub price: String,
    #[serde(default)]
    pub creator_wallet: Option<WalletAddress>,
    /// Wallet that was connected when the design was published.
    #[serde(default)]
    pub connected_wallet_address: Option<WalletAddress>,
    #[serde(default)]
    pub is_ngo: bool,
    #[serde(default)]
    pub sizes: Vec<String>,
    #[serde(default)]
    pub available_quantity: Option<i64>,
}

/// On-disk shape of a catalog: `{"products": [...], "designs": [...]}`.
#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    products: Vec<Product>,
    #[serde(default)]
    designs: Vec<CustomDesign>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEntry {
    Product(Product),
    Design(CustomDesign),
}

impl CatalogEntry {
    pub fn name(&self) -> &str {
        match self {
            CatalogEntry::Product(p) => &p.name,
            CatalogEntry::Design(d) => &d.piece_name,
        }
    }

    pub fn price(&self) -> &str {
        match self {
            CatalogEntry::Product(p) => &p.price,
            CatalogEntry::Design(d) => &d.price,
        }
    }

    pub fn available_quantity(&self) -> Option<i64> {
        match self {
            CatalogEntry::Product(p) => p.available_quantity,
            CatalogEntry::Design(d) => d.available_quantity,
        }
    }

    /// Wallet credited for a design sale: the creator, else the publishing wallet.
    pub fn creator(&self) -> Option<&WalletAddress> {
        match self {
            CatalogEntry::Product(_) => None,
            CatalogEntry::Design(d) => d
                .creator_wallet
                .as_ref()
                .or(d.connected_wallet_address.as_ref()),
        }
    }

    pub fn is_ngo(&self) -> bool {
        matches!(self, CatalogEntry::Design(d) if d.is_ngo)
    }
}

/// Resolves cart product ids to catalog entries.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn resolve(&self, id: &ProductId) -> Option<CatalogEntry>;
}

impl fmt::Debug for dyn CatalogLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CatalogLookup")
    }
}

/// Catalog held in memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: Mutex<HashMap<ProductId, CatalogEntry>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from a JSON document.
    pub fn from_reader(reader: impl io::Read) -> Result<Self, serde_json::Error> {
        let file: CatalogFile = serde_json::from_reader(reader)?;
        let catalog = Self::new();
        for product in file.products {
            catalog.insert_product(product);
        }
        for design in file.designs {
            catalog.insert_design(design);
        }
        Ok(catalog)
    }

    pub fn insert_product(&self, product: Product) {
        self.insert(product.id.clone(), CatalogEntry::Product(product));
    }

    pub fn insert_design(&self, design: CustomDesign) {
        self.insert(design.id.clone(), CatalogEntry::Design(design));
    }

    /// Set the remaining stock of an entry, if present.
    pub fn set_available(&self, id: &ProductId, available: Option<i64>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(id) {
            Some(CatalogEntry::Product(p)) => p.available_quantity = available,
            Some(CatalogEntry::Design(d)) => d.available_quantity = available,
            None => {}
        }
    }

    fn insert(&self, id: ProductId, entry: CatalogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);
    }
}

#[async_trait]
impl CatalogLookup for MemoryCatalog {
    async fn resolve(&self, id: &ProductId) -> Option<CatalogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}
