use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trade direction recorded on an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a journaled trade intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    /// Persisted, outcome not yet known
    Pending,
    /// Applied to the series
    Done,
    /// Rejected or abandoned, never applied
    Failed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Done => "done",
            IntentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::Done | IntentStatus::Failed)
    }

    /// Status only moves forward: pending -> done | failed
    pub fn can_transition_to(&self, target: IntentStatus) -> bool {
        matches!(
            (self, target),
            (IntentStatus::Pending, IntentStatus::Done) | (IntentStatus::Pending, IntentStatus::Failed)
        )
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable record of a trade that is in flight.
///
/// The `id` doubles as the exchange client order ID, so re-submitting the same
/// intent can never produce a second order on the exchange side.
///
/// Amount conventions:
/// - `amount` is always quote currency (what a buy spends, what a sell is worth
///   at the reference `price`)
/// - `base_amount` is set for sells and is the canonical quantity for
///   liquidation and partial-fill accounting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub id: String,
    pub status: IntentStatus,
    pub action: TradeAction,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_amount: Option<Decimal>,
    pub price: Decimal,
    pub time: DateTime<Utc>,
    pub trade_part: u32,
    #[serde(default)]
    pub is_full_sell: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TradeIntent {
    pub fn new(
        action: TradeAction,
        price: Decimal,
        amount: Decimal,
        base_amount: Option<Decimal>,
        time: DateTime<Utc>,
        trade_part: u32,
        is_full_sell: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: IntentStatus::Pending,
            action,
            amount,
            base_amount,
            price,
            time,
            trade_part,
            is_full_sell,
            error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == IntentStatus::Pending
    }

    /// Requested quantity in base currency.
    ///
    /// Sells journaled without `base_amount` fall back to converting the quote
    /// amount at the reference price.
    pub fn requested_base(&self) -> Decimal {
        match self.base_amount {
            Some(base) => base,
            None if self.price.is_zero() => Decimal::ZERO,
            None => self.amount / self.price,
        }
    }

    /// Requested quantity in the unit the exchange is asked to trade
    /// (quote for buys, base for sells).
    pub fn order_amount(&self) -> Decimal {
        match self.action {
            TradeAction::Buy => self.amount,
            TradeAction::Sell => self.requested_base(),
        }
    }
}

/// Emitted by every tick that performed a trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub action: TradeAction,
    pub pair: String,
    /// Quote amount for buys, base amount for sells
    pub amount: Decimal,
    pub price: Decimal,
}
