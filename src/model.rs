//! Core domain types for the cart engine.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::Amount;

/// Identifier of a catalog product or a user/NGO-created design.
///
/// Persisted carts carry either numeric catalog ids or string design ids,
/// both are accepted and kept in their textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ProductId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for ProductId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Float(f64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(n) => Self(n.to_string()),
            RawId::Float(n) => Self(n.to_string()),
            RawId::Text(s) => Self(s),
        })
    }
}

/// Composite variant key of a cart line, derived from `(product, size, color)`.
///
/// Parts are joined with `-`; a `-` or `%` inside a part is percent-escaped so
/// that distinct variants never share a key. Parts without either character
/// appear verbatim, which keeps keys of plain ids unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(String);

impl UniqueId {
    pub fn derive(product_id: &ProductId, size: &str, color: &str) -> Self {
        Self(format!(
            "{}-{}-{}",
            escape_part(product_id.as_str()),
            escape_part(size),
            escape_part(color)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn escape_part(part: &str) -> Cow<'_, str> {
    if part.contains(['-', '%']) {
        Cow::Owned(part.replace('%', "%25").replace('-', "%2D"))
    } else {
        Cow::Borrowed(part)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UniqueId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A wallet address as reported by the wallet provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex addresses differ only by checksum casing, so identity checks ignore case.
    pub fn same_wallet(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WalletAddress {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

/// Connection status reported by the wallet provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Snapshot of the wallet identity driving which cart is observable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WalletSession {
    pub address: Option<WalletAddress>,
    pub status: SessionStatus,
}

impl WalletSession {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connecting(address: Option<WalletAddress>) -> Self {
        Self {
            address,
            status: SessionStatus::Connecting,
        }
    }

    pub fn connected(address: impl Into<WalletAddress>) -> Self {
        Self {
            address: Some(address.into()),
            status: SessionStatus::Connected,
        }
    }

    pub fn reconnecting(address: Option<WalletAddress>) -> Self {
        Self {
            address,
            status: SessionStatus::Reconnecting,
        }
    }

    /// Address of the session if, and only if, it is connected.
    pub fn connected_address(&self) -> Option<&WalletAddress> {
        match self.status {
            SessionStatus::Connected => self.address.as_ref(),
            _ => None,
        }
    }
}

/// A line of the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub size: String,
    pub color: String,
    pub unique_id: UniqueId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub piece_name: Option<String>,
    #[serde(default)]
    pub is_ngo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_quantity: Option<u32>,
}

impl CartItem {
    /// Line contributes to a donation campaign.
    pub fn is_donation(&self) -> bool {
        self.campaign.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Line is a user or NGO created design rather than a catalog product.
    pub fn is_design(&self) -> bool {
        self.piece_name.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Request to put one unit of a variant into the cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub product_id: ProductId,
    pub size: String,
    pub color: String,
    pub campaign: Option<String>,
    pub piece_name: Option<String>,
    pub is_ngo: bool,
    pub max_quantity: Option<u32>,
}

impl NewItem {
    pub fn new(
        product_id: impl Into<ProductId>,
        size: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            size: size.into(),
            color: color.into(),
            campaign: None,
            piece_name: None,
            is_ngo: false,
            max_quantity: None,
        }
    }

    pub fn with_campaign(mut self, campaign: impl Into<String>) -> Self {
        self.campaign = Some(campaign.into());
        self
    }

    pub fn with_piece_name(mut self, piece_name: impl Into<String>) -> Self {
        self.piece_name = Some(piece_name.into());
        self
    }

    pub fn with_ngo(mut self, is_ngo: bool) -> Self {
        self.is_ngo = is_ngo;
        self
    }

    pub fn with_max_quantity(mut self, max: Option<u32>) -> Self {
        self.max_quantity = max;
        self
    }

    pub fn unique_id(&self) -> UniqueId {
        UniqueId::derive(&self.product_id, &self.size, &self.color)
    }

    /// Same request for another size, used when fanning a design out over sizes.
    pub fn for_size(&self, size: impl Into<String>) -> Self {
        Self {
            size: size.into(),
            ..self.clone()
        }
    }

    pub(crate) fn into_item(self) -> CartItem {
        let unique_id = self.unique_id();
        CartItem {
            product_id: self.product_id,
            quantity: 1,
            size: self.size,
            color: self.color,
            unique_id,
            campaign: self.campaign,
            piece_name: self.piece_name,
            is_ngo: self.is_ngo,
            max_quantity: self.max_quantity,
        }
    }
}

/// A cart mutation issued by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOp {
    /// Add one unit of a variant.
    Add(NewItem),
    /// Add one unit per selected size of a design.
    AddSizes { item: NewItem, sizes: Vec<String> },
    /// Replace the quantity of a line; `<= 0` removes it.
    UpdateQuantity { unique_id: UniqueId, quantity: i64 },
    /// Drop a line.
    Remove { unique_id: UniqueId },
    /// Drop every line.
    Clear,
}

/// Input of the engine: an identity transition, a cart mutation, or a
/// request to settle the cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Session(WalletSession),
    Cart(CartOp),
    Checkout,
}

/// Donation emitted at checkout for a campaign line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationRecord {
    pub item_id: ProductId,
    pub item_name: String,
    pub campaign: String,
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
    pub donor_address: WalletAddress,
}

/// Bucket a design purchase is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseType {
    User,
    Ngo,
}

impl PurchaseType {
    /// Local cache key holding records of this bucket when the store is unreachable.
    pub fn fallback_key(self) -> &'static str {
        match self {
            PurchaseType::User => "userPurchases",
            PurchaseType::Ngo => "ngoPurchases",
        }
    }
}

/// Purchase of a user or NGO design emitted at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub item_id: ProductId,
    pub piece_name: String,
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
    pub purchased_by: WalletAddress,
    /// Wallet credited for the sale; `None` when the design names none.
    pub creator_wallet: Option<WalletAddress>,
    pub is_ngo: bool,
    pub purchase_type: PurchaseType,
}
