//! Paper trading adapter
//!
//! Fills market orders immediately at the current price against simulated
//! balances. A client order ID is executed at most once.
//!
//! With a store attached, the book is saved after every fill (before the fill
//! is acknowledged) and reloaded on start, so fills survive a restart.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{OrderExecution, PositionAction, Pricer, Trader};
use crate::error::{DcaError, Result};

const BOOK_FILE_NAME: &str = "paper_book.json";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PaperBook {
    balances: HashMap<String, Decimal>,
    /// client order id -> base filled
    fills: HashMap<String, Decimal>,
}

fn load_book(path: &Path) -> Result<Option<PaperBook>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
}

async fn save_book(path: &Path, book: &PaperBook) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(book)?;
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&body).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub struct PaperTrader {
    pair: String,
    base_currency: String,
    quote_currency: String,
    pricer: Arc<dyn Pricer>,
    book: RwLock<PaperBook>,
    store: Option<PathBuf>,
}

impl PaperTrader {
    pub fn new(
        pair: impl Into<String>,
        base_currency: impl Into<String>,
        quote_currency: impl Into<String>,
        pricer: Arc<dyn Pricer>,
    ) -> Self {
        Self {
            pair: pair.into(),
            base_currency: base_currency.into(),
            quote_currency: quote_currency.into(),
            pricer,
            book: RwLock::new(PaperBook::default()),
            store: None,
        }
    }

    /// Seed starting balances
    pub fn with_balances(mut self, quote: Decimal, base: Decimal) -> Self {
        let balances = &mut self.book.get_mut().balances;
        balances.insert(self.quote_currency.clone(), quote);
        balances.insert(self.base_currency.clone(), base);
        self
    }

    /// Keep the book in `dir`. A book saved by a previous run replaces the
    /// seeded balances.
    pub fn with_store<P: AsRef<Path>>(mut self, dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(BOOK_FILE_NAME);

        if let Some(book) = load_book(&path)? {
            info!(
                path = %path.display(),
                fills = book.fills.len(),
                "restored paper book"
            );
            *self.book.get_mut() = book;
        }

        self.store = Some(path);
        Ok(self)
    }

    pub async fn fill_count(&self) -> usize {
        self.book.read().await.fills.len()
    }
}

#[async_trait]
impl Trader for PaperTrader {
    async fn execute_action(
        &self,
        action: PositionAction,
        amount: Decimal,
        client_order_id: &str,
    ) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(DcaError::Exchange(format!(
                "order amount must be positive, got {}",
                amount
            )));
        }

        let price = self.pricer.get_price(&self.pair).await?;
        if price <= Decimal::ZERO {
            return Err(DcaError::Exchange(format!("no valid price for {}", self.pair)));
        }

        let mut book = self.book.write().await;
        if book.fills.contains_key(client_order_id) {
            debug!(client_order_id, "duplicate paper order ignored");
            return Ok(());
        }

        let (spend_ccy, spend, receive_ccy, receive, base_filled) = match action {
            PositionAction::OpenLong => {
                let base = amount / price;
                (&self.quote_currency, amount, &self.base_currency, base, base)
            }
            PositionAction::CloseLong => {
                (&self.base_currency, amount, &self.quote_currency, amount * price, amount)
            }
            PositionAction::OpenShort | PositionAction::CloseShort => {
                return Err(DcaError::Exchange(format!(
                    "{} is not supported by the paper exchange",
                    action
                )));
            }
        };

        let available = book.balances.get(spend_ccy).copied().unwrap_or_default();
        if available < spend {
            return Err(DcaError::Exchange(format!(
                "paper {} balance {} below order size {}",
                spend_ccy, available, spend
            )));
        }

        let mut next = book.clone();
        *next.balances.entry(spend_ccy.clone()).or_default() -= spend;
        *next.balances.entry(receive_ccy.clone()).or_default() += receive;
        next.fills.insert(client_order_id.to_string(), base_filled);

        if let Some(path) = &self.store {
            save_book(path, &next).await?;
        }
        *book = next;

        info!(
            pair = %self.pair,
            client_order_id,
            action = %action,
            price = %price,
            base = %base_filled,
            "paper order filled"
        );
        Ok(())
    }

    async fn order_executed(&self, client_order_id: &str) -> Result<OrderExecution> {
        let book = self.book.read().await;
        Ok(match book.fills.get(client_order_id) {
            Some(filled) => OrderExecution::filled(*filled),
            None => OrderExecution::pending(),
        })
    }

    async fn get_balance(&self, currency: &str) -> Result<Decimal> {
        Ok(self
            .book
            .read()
            .await
            .balances
            .get(currency)
            .copied()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::FixedPricer;
    use rust_decimal_macros::dec;

    fn trader() -> PaperTrader {
        let pricer = Arc::new(FixedPricer::new(dec!(100)));
        PaperTrader::new("BTCUSDT", "BTC", "USDT", pricer).with_balances(dec!(5000), dec!(0))
    }

    #[tokio::test]
    async fn test_open_and_close_long() {
        let trader = trader();
        trader
            .execute_action(PositionAction::OpenLong, dec!(1000), "buy-1")
            .await
            .unwrap();
        assert_eq!(trader.get_balance("USDT").await.unwrap(), dec!(4000));
        assert_eq!(trader.get_balance("BTC").await.unwrap(), dec!(10));
        assert_eq!(
            trader.order_executed("buy-1").await.unwrap(),
            OrderExecution::filled(dec!(10))
        );

        trader
            .execute_action(PositionAction::CloseLong, dec!(4), "sell-1")
            .await
            .unwrap();
        assert_eq!(trader.get_balance("BTC").await.unwrap(), dec!(6));
        assert_eq!(trader.get_balance("USDT").await.unwrap(), dec!(4400));
    }

    #[tokio::test]
    async fn test_client_order_id_is_idempotent() {
        let trader = trader();
        for _ in 0..3 {
            trader
                .execute_action(PositionAction::OpenLong, dec!(1000), "same-id")
                .await
                .unwrap();
        }
        assert_eq!(trader.fill_count().await, 1);
        assert_eq!(trader.get_balance("USDT").await.unwrap(), dec!(4000));
    }

    #[tokio::test]
    async fn test_rejects_unfunded_and_short_orders() {
        let trader = trader();
        assert!(trader
            .execute_action(PositionAction::OpenLong, dec!(6000), "too-big")
            .await
            .is_err());
        assert!(trader
            .execute_action(PositionAction::OpenShort, dec!(1), "short")
            .await
            .is_err());
        assert!(!trader.order_executed("too-big").await.unwrap().executed);
    }

    #[tokio::test]
    async fn test_stored_book_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let pricer = Arc::new(FixedPricer::new(dec!(100)));

        let trader = PaperTrader::new("BTCUSDT", "BTC", "USDT", pricer.clone())
            .with_balances(dec!(5000), dec!(0))
            .with_store(dir.path())
            .unwrap();
        trader
            .execute_action(PositionAction::OpenLong, dec!(1000), "buy-1")
            .await
            .unwrap();
        drop(trader);

        // Configured balances only seed a fresh book
        let restarted = PaperTrader::new("BTCUSDT", "BTC", "USDT", pricer)
            .with_balances(dec!(5000), dec!(0))
            .with_store(dir.path())
            .unwrap();
        assert_eq!(
            restarted.order_executed("buy-1").await.unwrap(),
            OrderExecution::filled(dec!(10))
        );
        assert_eq!(restarted.get_balance("USDT").await.unwrap(), dec!(4000));
        assert_eq!(restarted.get_balance("BTC").await.unwrap(), dec!(10));

        restarted
            .execute_action(PositionAction::OpenLong, dec!(1000), "buy-1")
            .await
            .unwrap();
        assert_eq!(restarted.fill_count().await, 1);
        assert_eq!(restarted.get_balance("USDT").await.unwrap(), dec!(4000));
    }

    #[tokio::test]
    async fn test_unfunded_order_leaves_stored_book_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let pricer = Arc::new(FixedPricer::new(dec!(100)));
        let trader = PaperTrader::new("BTCUSDT", "BTC", "USDT", pricer.clone())
            .with_balances(dec!(500), dec!(0))
            .with_store(dir.path())
            .unwrap();
        assert!(trader
            .execute_action(PositionAction::OpenLong, dec!(1000), "too-big")
            .await
            .is_err());
        assert!(!dir.path().join(BOOK_FILE_NAME).exists());

        let restarted = PaperTrader::new("BTCUSDT", "BTC", "USDT", pricer)
            .with_balances(dec!(700), dec!(0))
            .with_store(dir.path())
            .unwrap();
        assert_eq!(restarted.get_balance("USDT").await.unwrap(), dec!(700));
    }
}
