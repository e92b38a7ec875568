use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::TradeAction;
use crate::error::{DcaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    Paper,
}

impl Default for ExchangeKind {
    fn default() -> Self {
        Self::Paper
    }
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
        }
    }
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paper" | "dry_run" | "dry-run" => Ok(Self::Paper),
            _ => Err("invalid exchange; expected paper"),
        }
    }
}

pub fn parse_exchange_kind(raw: &str) -> Result<ExchangeKind> {
    ExchangeKind::from_str(raw).map_err(|e| DcaError::Validation(e.to_string()))
}

/// Where prices come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricerKind {
    Binance,
    Fixed,
}

impl Default for PricerKind {
    fn default() -> Self {
        Self::Binance
    }
}

impl FromStr for PricerKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "fixed" | "static" => Ok(Self::Fixed),
            _ => Err("invalid pricer; expected binance|fixed"),
        }
    }
}

/// Order direction sent to the exchange.
///
/// `OpenLong` amounts are quote currency; `CloseLong` amounts are base currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionAction {
    OpenLong,
    CloseLong,
    OpenShort,
    CloseShort,
}

impl PositionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenLong => "open_long",
            Self::CloseLong => "close_long",
            Self::OpenShort => "open_short",
            Self::CloseShort => "close_short",
        }
    }

    /// DCA only trades long
    pub fn for_trade(action: TradeAction) -> Self {
        match action {
            TradeAction::Buy => Self::OpenLong,
            TradeAction::Sell => Self::CloseLong,
        }
    }
}

impl std::fmt::Display for PositionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution status of a client order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderExecution {
    pub executed: bool,
    /// Base currency filled
    pub filled_amount: Decimal,
}

impl OrderExecution {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn filled(filled_amount: Decimal) -> Self {
        Self {
            executed: true,
            filled_amount,
        }
    }
}

/// Trading capability of an exchange adapter
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Trader: Send + Sync {
    /// Place an order. `client_order_id` makes retries idempotent exchange-side.
    async fn execute_action(
        &self,
        action: PositionAction,
        amount: Decimal,
        client_order_id: &str,
    ) -> Result<()>;

    async fn order_executed(&self, client_order_id: &str) -> Result<OrderExecution>;

    async fn get_balance(&self, currency: &str) -> Result<Decimal>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Pricer: Send + Sync {
    async fn get_price(&self, pair: &str) -> Result<Decimal>;
}
