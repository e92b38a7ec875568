//! DCA series: the aggregate position for one trading pair
//!
//! Holds every active purchase tranche and derives the buy/sell decisions:
//! - buy only when price dips a threshold below the most recent buy
//! - sell in staircase steps, each step re-based off the previous exit
//! - liquidate most-recent tranches first
//!
//! All aggregates are recomputed from the purchase list after each mutation,
//! never updated incrementally.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{DcaError, Result};

pub const REASON_DIP_BELOW_LAST_BUY: &str = "dip_below_last_buy";
pub const REASON_EMPTY_SERIES: &str = "empty_series";
pub const REASON_NO_LAST_BUY_PRICE: &str = "no_last_buy_price";
pub const REASON_PRICE_NOT_BELOW_LAST_BUY: &str = "price_not_below_last_buy";
pub const REASON_DROP_BELOW_THRESHOLD: &str = "drop_below_threshold";
pub const REASON_MAX_TRADES_REACHED: &str = "max_trades_reached";

pub const REASON_FULL_SELL_BY_CAP: &str = "full_sell_by_cap";
pub const REASON_STAIRCASE_STEP: &str = "staircase_step";
pub const REASON_NO_POSITION: &str = "no_position";
pub const REASON_PRICE_NOT_ABOVE_REFERENCE: &str = "price_not_above_reference";
pub const REASON_GAIN_BELOW_THRESHOLD: &str = "gain_below_threshold";

/// Strategy parameters, validated once and immutable afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    buy_threshold_percent: Decimal,
    sell_threshold_percent: Decimal,
    max_trades: u32,
}

impl Thresholds {
    pub fn new(
        buy_threshold_percent: Decimal,
        sell_threshold_percent: Decimal,
        max_trades: u32,
    ) -> Result<Self> {
        if buy_threshold_percent <= Decimal::ZERO {
            return Err(DcaError::Validation(format!(
                "buy threshold must be positive, got {}",
                buy_threshold_percent
            )));
        }
        if sell_threshold_percent <= Decimal::ZERO {
            return Err(DcaError::Validation(format!(
                "sell threshold must be positive, got {}",
                sell_threshold_percent
            )));
        }
        if max_trades < 1 {
            return Err(DcaError::Validation(
                "max trades must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            buy_threshold_percent,
            sell_threshold_percent,
            max_trades,
        })
    }

    pub fn buy_threshold_percent(&self) -> Decimal {
        self.buy_threshold_percent
    }

    pub fn sell_threshold_percent(&self) -> Decimal {
        self.sell_threshold_percent
    }

    pub fn max_trades(&self) -> u32 {
        self.max_trades
    }
}

/// Percent move from `reference` to `current` is at least `threshold_percent`.
///
/// A zero reference is never a signal.
pub fn is_significant_change(current: Decimal, reference: Decimal, threshold_percent: Decimal) -> bool {
    if reference.is_zero() {
        return false;
    }
    (current - reference).abs() / reference * Decimal::ONE_HUNDRED >= threshold_percent
}

/// One executed buy tranche
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PurchaseRecord")]
pub struct Purchase {
    id: String,
    price: Decimal,
    amount: Decimal,
    time: DateTime<Utc>,
    trade_part: u32,
}

/// Unvalidated wire form of a purchase
#[derive(Deserialize)]
struct PurchaseRecord {
    #[serde(default)]
    id: String,
    price: Decimal,
    amount: Decimal,
    time: DateTime<Utc>,
    trade_part: u32,
}

impl TryFrom<PurchaseRecord> for Purchase {
    type Error = DcaError;

    fn try_from(raw: PurchaseRecord) -> Result<Self> {
        Purchase::new(raw.id, raw.price, raw.amount, raw.time, raw.trade_part)
    }
}

impl Purchase {
    pub fn new(
        id: impl Into<String>,
        price: Decimal,
        amount: Decimal,
        time: DateTime<Utc>,
        trade_part: u32,
    ) -> Result<Self> {
        if price <= Decimal::ZERO {
            return Err(DcaError::Validation(format!(
                "purchase price must be positive, got {}",
                price
            )));
        }
        if amount <= Decimal::ZERO {
            return Err(DcaError::Validation(format!(
                "purchase amount must be positive, got {}",
                amount
            )));
        }
        if trade_part < 1 {
            return Err(DcaError::Validation(
                "purchase trade part must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            id: id.into(),
            price,
            amount,
            time,
            trade_part,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    /// Quote currency spent
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn trade_part(&self) -> u32 {
        self.trade_part
    }

    /// Base currency bought
    pub fn base_amount(&self) -> Decimal {
        self.amount / self.price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuyDecision {
    pub should_buy: bool,
    pub reason: &'static str,
}

impl BuyDecision {
    fn no(reason: &'static str) -> Self {
        Self {
            should_buy: false,
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SellDecision {
    pub should_sell: bool,
    /// Base currency to sell
    pub amount: Decimal,
    pub is_full_sell: bool,
    pub reason: &'static str,
}

impl SellDecision {
    fn no(reason: &'static str) -> Self {
        Self {
            should_sell: false,
            amount: Decimal::ZERO,
            is_full_sell: false,
            reason,
        }
    }
}

/// Aggregate of all active purchases for one pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DcaSeries {
    #[serde(default)]
    purchases: Vec<Purchase>,
    #[serde(default)]
    avg_entry_price: Decimal,
    #[serde(default)]
    total_amount: Decimal,
    #[serde(default)]
    first_buy_time: Option<DateTime<Utc>>,
    #[serde(default)]
    last_buy_price: Decimal,
    #[serde(default)]
    last_sell_price: Decimal,
    #[serde(default)]
    waiting_for_dip: bool,
    /// Intent IDs already applied; survives full resets
    #[serde(default)]
    processed_trade_ids: BTreeSet<String>,
}

impl DcaSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn purchases(&self) -> &[Purchase] {
        &self.purchases
    }

    pub fn purchase_count(&self) -> usize {
        self.purchases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.purchases.is_empty()
    }

    pub fn avg_entry_price(&self) -> Decimal {
        self.avg_entry_price
    }

    /// Quote currency held in active purchases
    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    /// Base currency held, derived from the quote total and average entry
    pub fn total_base_amount(&self) -> Decimal {
        if self.avg_entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.total_amount / self.avg_entry_price
    }

    pub fn first_buy_time(&self) -> Option<DateTime<Utc>> {
        self.first_buy_time
    }

    pub fn last_buy_price(&self) -> Decimal {
        self.last_buy_price
    }

    pub fn last_sell_price(&self) -> Decimal {
        self.last_sell_price
    }

    pub fn waiting_for_dip(&self) -> bool {
        self.waiting_for_dip
    }

    pub fn processed_trade_ids(&self) -> &BTreeSet<String> {
        &self.processed_trade_ids
    }

    pub fn is_processed(&self, id: &str) -> bool {
        !id.is_empty() && self.processed_trade_ids.contains(id)
    }

    pub fn mark_processed(&mut self, id: &str) {
        if !id.is_empty() {
            self.processed_trade_ids.insert(id.to_string());
        }
    }

    /// Trade part number for the next buy
    pub fn next_trade_part(&self) -> u32 {
        self.purchases
            .last()
            .map(|p| p.trade_part + 1)
            .unwrap_or(1)
    }

    /// Price has fallen at least the buy threshold below the last exit
    pub fn dipped_below_last_sell(&self, price: Decimal, thresholds: &Thresholds) -> bool {
        price < self.last_sell_price
            && is_significant_change(price, self.last_sell_price, thresholds.buy_threshold_percent)
    }

    /// Buy only on a dip below the most recent buy, never against the average.
    pub fn should_buy_at_price(&self, price: Decimal, thresholds: &Thresholds) -> BuyDecision {
        if self.purchases.is_empty() {
            return BuyDecision::no(REASON_EMPTY_SERIES);
        }
        if self.last_buy_price.is_zero() {
            return BuyDecision::no(REASON_NO_LAST_BUY_PRICE);
        }
        if price >= self.last_buy_price {
            return BuyDecision::no(REASON_PRICE_NOT_BELOW_LAST_BUY);
        }
        if !is_significant_change(price, self.last_buy_price, thresholds.buy_threshold_percent) {
            return BuyDecision::no(REASON_DROP_BELOW_THRESHOLD);
        }
        if self.purchases.len() >= thresholds.max_trades as usize {
            return BuyDecision::no(REASON_MAX_TRADES_REACHED);
        }

        BuyDecision {
            should_buy: true,
            reason: REASON_DIP_BELOW_LAST_BUY,
        }
    }

    /// Staircase take-profit.
    ///
    /// The first sell of a series measures gain against the average entry;
    /// later sells measure it against the previous sell price. Each step sells
    /// one part (`total_base / purchases`).
    pub fn should_take_profit_at_price(&self, price: Decimal, thresholds: &Thresholds) -> SellDecision {
        if self.avg_entry_price.is_zero() || self.purchases.is_empty() {
            return SellDecision::no(REASON_NO_POSITION);
        }

        let reference = if self.last_sell_price.is_zero() {
            self.avg_entry_price
        } else {
            self.last_sell_price
        };

        if price <= reference {
            return SellDecision::no(REASON_PRICE_NOT_ABOVE_REFERENCE);
        }
        if !is_significant_change(price, reference, thresholds.sell_threshold_percent) {
            return SellDecision::no(REASON_GAIN_BELOW_THRESHOLD);
        }

        let total_base = self.total_base_amount();
        let part = (total_base / Decimal::from(self.purchases.len() as u64)).min(total_base);
        let is_full_sell = self.purchases.len() == 1 || part >= total_base;

        SellDecision {
            should_sell: true,
            amount: part,
            is_full_sell,
            reason: if is_full_sell {
                REASON_FULL_SELL_BY_CAP
            } else {
                REASON_STAIRCASE_STEP
            },
        }
    }

    /// Append a purchase and recompute aggregates.
    ///
    /// Returns `Ok(false)` when `id` was already applied.
    pub fn add_purchase(
        &mut self,
        id: &str,
        price: Decimal,
        amount: Decimal,
        time: DateTime<Utc>,
        trade_part: u32,
    ) -> Result<bool> {
        if self.is_processed(id) {
            return Ok(false);
        }

        let purchase = Purchase::new(id, price, amount, time, trade_part)?;

        // A new series starts its staircase from the average again
        if self.purchases.is_empty() {
            self.last_sell_price = Decimal::ZERO;
        }

        self.purchases.push(purchase);
        self.last_buy_price = price;
        self.mark_processed(id);
        self.recalculate_stats();
        Ok(true)
    }

    /// Remove a quote amount, most recent tranches first
    pub fn remove_amount(&mut self, quote_amount: Decimal) -> Result<()> {
        if quote_amount <= Decimal::ZERO {
            return Err(DcaError::Validation(format!(
                "amount to remove must be positive, got {}",
                quote_amount
            )));
        }

        let mut remaining = quote_amount;
        while remaining > Decimal::ZERO {
            let Some(last) = self.purchases.last_mut() else {
                break;
            };
            if last.amount <= remaining {
                remaining -= last.amount;
                self.purchases.pop();
            } else {
                last.amount -= remaining;
                remaining = Decimal::ZERO;
            }
        }

        self.recalculate_stats();
        Ok(())
    }

    /// Remove a base amount, most recent tranches first
    pub fn remove_base_amount(&mut self, base_amount: Decimal) -> Result<()> {
        if base_amount <= Decimal::ZERO {
            return Err(DcaError::Validation(format!(
                "base amount to remove must be positive, got {}",
                base_amount
            )));
        }

        let mut remaining = base_amount;
        while remaining > Decimal::ZERO {
            let Some(last) = self.purchases.last_mut() else {
                break;
            };
            let held = last.base_amount();
            if held <= remaining {
                remaining -= held;
                self.purchases.pop();
            } else {
                last.amount -= remaining * last.price;
                remaining = Decimal::ZERO;
                if last.amount <= Decimal::ZERO {
                    self.purchases.pop();
                }
            }
        }

        self.recalculate_stats();
        Ok(())
    }

    /// Apply an executed buy. Returns `Ok(false)` if already applied.
    pub fn apply_buy(
        &mut self,
        id: &str,
        price: Decimal,
        quote_amount: Decimal,
        time: DateTime<Utc>,
        trade_part: u32,
    ) -> Result<bool> {
        let applied = self.add_purchase(id, price, quote_amount, time, trade_part)?;
        if applied {
            self.waiting_for_dip = false;
        }
        Ok(applied)
    }

    /// Apply an executed sell of `base_amount` at `price`.
    ///
    /// Liquidates fully when the fill covers the position or the sell was
    /// decided as a full sell; otherwise trims the tail and re-bases the
    /// staircase on `price`. Returns `Ok(false)` if already applied.
    pub fn apply_sell(
        &mut self,
        id: &str,
        base_amount: Decimal,
        price: Decimal,
        is_full_sell: bool,
    ) -> Result<bool> {
        if self.is_processed(id) {
            return Ok(false);
        }

        if is_full_sell || base_amount >= self.total_base_amount() {
            self.reset_after_full_sell(price);
        } else {
            self.remove_base_amount(base_amount)?;
            self.last_sell_price = price;
            if self.purchases.is_empty() || self.total_amount.is_zero() {
                self.reset_after_full_sell(price);
            }
        }

        self.mark_processed(id);
        Ok(true)
    }

    /// Clear the position but keep the processed-ID set
    pub fn reset_after_full_sell(&mut self, sell_price: Decimal) {
        let processed = std::mem::take(&mut self.processed_trade_ids);
        *self = Self {
            last_sell_price: sell_price,
            waiting_for_dip: true,
            processed_trade_ids: processed,
            ..Self::default()
        };
    }

    /// Recompute all aggregates from the purchase list
    pub(crate) fn recalculate_stats(&mut self) {
        let total: Decimal = self.purchases.iter().map(|p| p.amount).sum();
        let weighted: Decimal = self.purchases.iter().map(|p| p.price * p.amount).sum();

        self.total_amount = total;
        self.avg_entry_price = if total.is_zero() {
            Decimal::ZERO
        } else {
            weighted / total
        };
        self.first_buy_time = self.purchases.first().map(|p| p.time);
    }
}
