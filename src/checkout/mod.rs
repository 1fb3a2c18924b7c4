//! Checkout: pricing, policy checks and settlement of a finished cart.
//!
//! A cart is priced against the catalog, checked for self-purchases and
//! stock, then split into donation and purchase records. Records go to the
//! record store; any bucket the store refuses is appended to the local
//! cache instead so that no record is lost.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::Amount;
use crate::cart::StockError;
use crate::cart::guard::{self, Availability};
use crate::model::{
    CartItem, DonationRecord, PurchaseRecord, PurchaseType, UniqueId, WalletAddress,
    WalletSession,
};
use crate::persistence::{LocalCache, LocalCacheExt, PersistenceError};

pub mod catalog;
pub mod ledger;

mod error;
pub use error::CheckoutError;

use catalog::{CatalogEntry, CatalogLookup};
use ledger::{DonationLedger, LedgerError, RecordStore, TxHash};

/// Local cache key holding donation records the store could not take.
pub const DONATIONS_FALLBACK_KEY: &str = "userDonations";

/// Ledger refusal part way through the campaign lines.
#[derive(Debug)]
struct DonationFailure {
    /// Index of the refused line; earlier campaign lines were donated.
    failed_at: usize,
    campaign: String,
    source: LedgerError,
}

/// A cart line matched to its catalog entry and priced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub item: CartItem,
    pub entry: CatalogEntry,
    pub unit_price: Amount,
    pub line_total: Amount,
}

/// Priced view of a cart, without any side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSummary {
    pub lines: Vec<PricedLine>,
    /// Lines whose product is unknown or whose price cannot be read.
    pub unresolved: Vec<UniqueId>,
    /// Priced lines with no stock left.
    pub sold_out: Vec<UniqueId>,
    pub subtotal: Amount,
    pub shipping: Amount,
    pub total: Amount,
}

/// Records produced by a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettlementRecords {
    pub donations: Vec<DonationRecord>,
    pub user_purchases: Vec<PurchaseRecord>,
    pub ngo_purchases: Vec<PurchaseRecord>,
}

impl SettlementRecords {
    pub fn purchases(&self, bucket: PurchaseType) -> &[PurchaseRecord] {
        match bucket {
            PurchaseType::User => &self.user_purchases,
            PurchaseType::Ngo => &self.ngo_purchases,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.donations.is_empty() && self.user_purchases.is_empty() && self.ngo_purchases.is_empty()
    }
}

/// Outcome of a completed checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutReceipt {
    pub summary: CheckoutSummary,
    pub records: SettlementRecords,
    /// Ledger transactions submitted for donations.
    pub transactions: Vec<TxHash>,
    /// Local cache keys that received records because the store refused them.
    pub fallback_keys: Vec<&'static str>,
}

/// Turns a finished cart into settlement records.
#[derive(Debug)]
pub struct CheckoutAggregator {
    catalog: Arc<dyn CatalogLookup>,
    records: Arc<dyn RecordStore>,
    local: Arc<dyn LocalCache>,
    ledger: Option<Arc<dyn DonationLedger>>,
    shipping_fee: Amount,
}

/// Public API
impl CheckoutAggregator {
    pub fn new(
        catalog: Arc<dyn CatalogLookup>,
        records: Arc<dyn RecordStore>,
        local: Arc<dyn LocalCache>,
        shipping_fee: Amount,
    ) -> Self {
        Self {
            catalog,
            records,
            local,
            ledger: None,
            shipping_fee,
        }
    }

    /// Also submit each donation to an on-chain ledger.
    pub fn with_ledger(mut self, ledger: Arc<dyn DonationLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Price `items` against the current catalog.
    pub async fn summarize(&self, items: &[CartItem]) -> CheckoutSummary {
        let mut lines = Vec::with_capacity(items.len());
        let mut unresolved = Vec::new();
        let mut sold_out = Vec::new();
        let mut subtotal = Amount::ZERO;

        for item in items {
            let Some(entry) = self.catalog.resolve(&item.product_id).await else {
                warn!(unique_id = %item.unique_id, product = %item.product_id, "cart line not found in catalog");
                unresolved.push(item.unique_id.clone());
                continue;
            };

            let priced = Amount::parse_price(entry.price())
                .and_then(|unit| unit.checked_mul(item.quantity).map(|total| (unit, total)));
            let Some((unit_price, line_total)) = priced else {
                warn!(unique_id = %item.unique_id, price = entry.price(), "cart line has an unreadable price");
                unresolved.push(item.unique_id.clone());
                continue;
            };

            let availability = Availability::from_available(entry.available_quantity());
            if let Err(StockError::SoldOut(id)) = guard::check_stock(item, availability) {
                sold_out.push(id);
            }

            subtotal += line_total;
            lines.push(PricedLine {
                item: item.clone(),
                entry,
                unit_price,
                line_total,
            });
        }

        CheckoutSummary {
            lines,
            unresolved,
            sold_out,
            subtotal,
            shipping: self.shipping_fee,
            total: subtotal + self.shipping_fee,
        }
    }

    /// Check whether `buyer` may check out `items` right now.
    ///
    /// Resolves the catalog on every call, so a wallet switch is always seen.
    pub async fn check_self_purchase(
        &self,
        items: &[CartItem],
        buyer: &WalletAddress,
    ) -> Result<(), CheckoutError> {
        let summary = self.summarize(items).await;
        Self::guard_self_purchase(buyer, &summary.lines)
    }

    /// Price, validate, classify and store the records of `items` for the
    /// buyer connected in `session`.
    ///
    /// The caller clears the cart once this returns `Ok`. When the ledger
    /// refuses a donation part way, lines already donated are settled on
    /// their own and reported in [`CheckoutError::Donation`].
    pub async fn settle(
        &self,
        items: &[CartItem],
        session: &WalletSession,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let buyer = session
            .connected_address()
            .ok_or(CheckoutError::NotConnected)?;
        if items.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let summary = self.summarize(items).await;
        Self::guard_self_purchase(buyer, &summary.lines)?;
        if !summary.unresolved.is_empty() {
            return Err(CheckoutError::UnresolvedLineItem(summary.unresolved.clone()));
        }
        Self::guard_stock(&summary)?;

        let timestamp = Utc::now();
        let transactions = match self.submit_donations(&summary.lines).await {
            Ok(transactions) => transactions,
            Err(failure) => {
                return Err(self
                    .settle_partial(buyer, &summary.lines, failure, timestamp)
                    .await);
            }
        };
        let records = Self::classify(buyer, &summary.lines, timestamp);
        let fallback_keys = self.store_records(&records).await?;

        info!(
            buyer = %buyer,
            total = %summary.total,
            donations = records.donations.len(),
            user_purchases = records.user_purchases.len(),
            ngo_purchases = records.ngo_purchases.len(),
            fallbacks = fallback_keys.len(),
            "checkout settled"
        );

        Ok(CheckoutReceipt {
            summary,
            records,
            transactions,
            fallback_keys,
        })
    }
}

/// Private API
impl CheckoutAggregator {
    fn guard_self_purchase(
        buyer: &WalletAddress,
        lines: &[PricedLine],
    ) -> Result<(), CheckoutError> {
        for line in lines {
            if let Some(creator) = line.entry.creator()
                && creator.same_wallet(buyer.as_str())
            {
                info!(buyer = %buyer, unique_id = %line.item.unique_id, "self purchase blocked");
                return Err(CheckoutError::SelfPurchaseBlocked {
                    unique_id: line.item.unique_id.clone(),
                    creator: creator.clone(),
                });
            }
        }
        Ok(())
    }

    fn guard_stock(summary: &CheckoutSummary) -> Result<(), CheckoutError> {
        if !summary.sold_out.is_empty() {
            return Err(CheckoutError::SoldOut(summary.sold_out.clone()));
        }
        for line in &summary.lines {
            let availability = Availability::from_available(line.entry.available_quantity());
            if let Err(StockError::QuantityExceeded(e)) = guard::check_stock(&line.item, availability) {
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Split priced lines into records. A line with both a campaign and a
    /// piece name yields one record of each kind.
    fn classify(
        buyer: &WalletAddress,
        lines: &[PricedLine],
        timestamp: DateTime<Utc>,
    ) -> SettlementRecords {
        let mut records = SettlementRecords::default();

        for line in lines {
            let item = &line.item;

            if let Some(campaign) = item.campaign.as_ref().filter(|_| item.is_donation()) {
                records.donations.push(DonationRecord {
                    item_id: item.product_id.clone(),
                    item_name: line.entry.name().to_string(),
                    campaign: campaign.clone(),
                    amount: line.line_total,
                    timestamp,
                    donor_address: buyer.clone(),
                });
            }

            if let Some(piece_name) = item.piece_name.as_ref().filter(|_| item.is_design()) {
                let is_ngo = item.is_ngo || line.entry.is_ngo();
                let purchase_type = if is_ngo {
                    PurchaseType::Ngo
                } else {
                    PurchaseType::User
                };
                let record = PurchaseRecord {
                    item_id: item.product_id.clone(),
                    piece_name: piece_name.clone(),
                    amount: line.line_total,
                    timestamp,
                    purchased_by: buyer.clone(),
                    creator_wallet: line.entry.creator().cloned(),
                    is_ngo,
                    purchase_type,
                };
                match purchase_type {
                    PurchaseType::Ngo => records.ngo_purchases.push(record),
                    PurchaseType::User => records.user_purchases.push(record),
                }
            }
        }

        records
    }

    /// Donate every campaign line to the ledger, in cart order.
    async fn submit_donations(&self, lines: &[PricedLine]) -> Result<Vec<TxHash>, DonationFailure> {
        let Some(ledger) = &self.ledger else {
            return Ok(Vec::new());
        };

        let mut transactions = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            let Some(campaign) = line.item.campaign.as_deref().filter(|_| line.item.is_donation())
            else {
                continue;
            };
            match ledger.donate(campaign, line.line_total).await {
                Ok(hash) => transactions.push(hash),
                Err(source) => {
                    warn!(
                        campaign,
                        submitted = transactions.len(),
                        reason = %source,
                        "ledger donation failed"
                    );
                    return Err(DonationFailure {
                        failed_at: idx,
                        campaign: campaign.to_string(),
                        source,
                    });
                }
            }
        }
        Ok(transactions)
    }

    /// Store the records of the lines the ledger accepted before `failure`.
    async fn settle_partial(
        &self,
        buyer: &WalletAddress,
        lines: &[PricedLine],
        failure: DonationFailure,
        timestamp: DateTime<Utc>,
    ) -> CheckoutError {
        let settled: Vec<PricedLine> = lines[..failure.failed_at]
            .iter()
            .filter(|line| line.item.is_donation())
            .cloned()
            .collect();

        if !settled.is_empty() {
            let records = Self::classify(buyer, &settled, timestamp);
            if let Err(e) = self.store_records(&records).await {
                error!(reason = %e, "records of donations already on the ledger were lost");
            }
        }

        CheckoutError::Donation {
            campaign: failure.campaign,
            source: failure.source,
            settled: settled.into_iter().map(|line| line.item.unique_id).collect(),
        }
    }

    /// Store every bucket, diverting refused buckets to the local cache.
    ///
    /// All buckets are attempted; the error lists those kept nowhere.
    async fn store_records(
        &self,
        records: &SettlementRecords,
    ) -> Result<Vec<&'static str>, CheckoutError> {
        let mut fallback_keys = Vec::new();
        let mut lost = Vec::new();

        if !records.donations.is_empty()
            && let Err(e) = self.records.append_donations(&records.donations).await
        {
            warn!(reason = %e, "donation store refused records, keeping them locally");
            match self.fall_back(DONATIONS_FALLBACK_KEY, &records.donations) {
                Ok(()) => fallback_keys.push(DONATIONS_FALLBACK_KEY),
                Err(e) => lost.push((DONATIONS_FALLBACK_KEY, e)),
            }
        }

        for bucket in [PurchaseType::User, PurchaseType::Ngo] {
            let purchases = records.purchases(bucket);
            if purchases.is_empty() {
                continue;
            }
            if let Err(e) = self.records.append_purchases(bucket, purchases).await {
                warn!(?bucket, reason = %e, "purchase store refused records, keeping them locally");
                match self.fall_back(bucket.fallback_key(), purchases) {
                    Ok(()) => fallback_keys.push(bucket.fallback_key()),
                    Err(e) => lost.push((bucket.fallback_key(), e)),
                }
            }
        }

        let mut lost = lost.into_iter();
        match lost.next() {
            None => Ok(fallback_keys),
            Some((key, source)) => Err(CheckoutError::FallbackFailed {
                lost: std::iter::once(key).chain(lost.map(|(key, _)| key)).collect(),
                source,
            }),
        }
    }

    fn fall_back<T>(&self, key: &'static str, records: &[T]) -> Result<(), PersistenceError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Clone,
    {
        self.local.append_json(key, records).inspect_err(|e| {
            error!(key, records = records.len(), reason = %e, "settlement records lost: local fallback failed");
        })
    }
}
