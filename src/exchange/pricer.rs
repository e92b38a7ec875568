//! Spot price sources
//!
//! - `BinancePricer`: public ticker endpoint, no auth
//! - `FixedPricer`: settable price for paper runs and tests

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::Pricer;
use crate::error::{DcaError, Result};

pub const BINANCE_API_URL: &str = "https://api.binance.com";

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: Decimal,
}

/// `BTC/USDT`, `btc-usdt` and `BTCUSDT` all map to `BTCUSDT`
pub fn exchange_symbol(pair: &str) -> String {
    pair.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase()
}

pub struct BinancePricer {
    client: reqwest::Client,
    rest_url: String,
}

impl BinancePricer {
    pub fn new(rest_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            rest_url: rest_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Pricer for BinancePricer {
    async fn get_price(&self, pair: &str) -> Result<Decimal> {
        let symbol = exchange_symbol(pair);
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.rest_url, symbol);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DcaError::Exchange(format!(
                "ticker API error for {}: {}",
                symbol,
                response.status()
            )));
        }

        let ticker: TickerPrice = response.json().await?;
        if ticker.price <= Decimal::ZERO {
            return Err(DcaError::Exchange(format!(
                "non-positive price {} for {}",
                ticker.price, ticker.symbol
            )));
        }

        debug!(symbol = %ticker.symbol, price = %ticker.price, "fetched ticker");
        Ok(ticker.price)
    }
}

/// Price source that returns whatever it was last set to
#[derive(Debug)]
pub struct FixedPricer {
    price: RwLock<Decimal>,
}

impl FixedPricer {
    pub fn new(price: Decimal) -> Self {
        Self {
            price: RwLock::new(price),
        }
    }

    pub async fn set_price(&self, price: Decimal) {
        *self.price.write().await = price;
    }
}

#[async_trait]
impl Pricer for FixedPricer {
    async fn get_price(&self, _pair: &str) -> Result<Decimal> {
        Ok(*self.price.read().await)
    }
}
