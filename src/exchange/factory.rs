use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::error::{DcaError, Result};

use super::{
    parse_exchange_kind, BinancePricer, ExchangeKind, FixedPricer, PaperTrader, Pricer,
    PricerKind, Trader,
};

/// Create the price source from `AppConfig`.
pub fn build_pricer(app_config: &AppConfig) -> Result<Arc<dyn Pricer>> {
    let exchange = &app_config.exchange;
    match exchange.pricer {
        PricerKind::Binance => {
            info!(rest_url = %exchange.rest_url, "using Binance ticker pricer");
            Ok(Arc::new(BinancePricer::new(&exchange.rest_url)?))
        }
        PricerKind::Fixed => {
            let price = exchange.fixed_price.ok_or_else(|| {
                DcaError::Validation("fixed pricer requires exchange.fixed_price".to_string())
            })?;
            info!(price = %price, "using fixed pricer");
            Ok(Arc::new(FixedPricer::new(price)))
        }
    }
}

/// Create the trading adapter from `AppConfig`.
pub fn build_trader(app_config: &AppConfig, pricer: Arc<dyn Pricer>) -> Result<Arc<dyn Trader>> {
    let kind = parse_exchange_kind(&app_config.exchange.kind)?;
    let strategy = &app_config.strategy;

    match kind {
        ExchangeKind::Paper => {
            let store = app_config.journal.pair_dir(&strategy.pair);
            info!(
                pair = %strategy.pair,
                quote = %app_config.exchange.paper_quote_balance,
                base = %app_config.exchange.paper_base_balance,
                store = %store.display(),
                "using paper trader"
            );
            let trader = PaperTrader::new(
                &strategy.pair,
                &strategy.base_currency,
                &strategy.quote_currency,
                pricer,
            )
            .with_balances(
                app_config.exchange.paper_quote_balance,
                app_config.exchange.paper_base_balance,
            )
            .with_store(store)?;
            Ok(Arc::new(trader))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ExchangeConfig, JournalConfig, LoggingConfig, ReconciliationConfig, StrategyConfig,
    };
    use crate::exchange::PositionAction;
    use rust_decimal_macros::dec;

    fn config(data_dir: &std::path::Path) -> AppConfig {
        AppConfig {
            strategy: StrategyConfig {
                pair: "ETHUSDT".to_string(),
                base_currency: "ETH".to_string(),
                quote_currency: "USDT".to_string(),
                quote_amount_per_trade: dec!(100),
                buy_threshold_pct: dec!(5),
                sell_threshold_pct: dec!(10),
                max_trades: 5,
                tick_interval_secs: 60,
                auto_start: false,
            },
            journal: JournalConfig {
                data_dir: data_dir.to_path_buf(),
            },
            reconciliation: ReconciliationConfig::default(),
            exchange: ExchangeConfig {
                pricer: PricerKind::Fixed,
                fixed_price: Some(dec!(2000)),
                paper_quote_balance: dec!(1000),
                ..ExchangeConfig::default()
            },
            logging: LoggingConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_paper_trader_is_stored_in_pair_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        let pricer = build_pricer(&cfg).unwrap();
        let trader = build_trader(&cfg, pricer.clone()).unwrap();
        trader
            .execute_action(PositionAction::OpenLong, dec!(100), "order-1")
            .await
            .unwrap();
        drop(trader);

        let rebuilt = build_trader(&cfg, pricer).unwrap();
        assert!(rebuilt.order_executed("order-1").await.unwrap().executed);
        assert_eq!(rebuilt.get_balance("USDT").await.unwrap(), dec!(900));
        assert!(dir.path().join("ETHUSDT").join("paper_book.json").exists());
    }

    #[test]
    fn test_fixed_pricer_without_price_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.exchange.fixed_price = None;
        assert!(build_pricer(&cfg).is_err());
    }
}
