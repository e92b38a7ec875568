use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::domain::Thresholds;
use crate::error::{DcaError, Result};
use crate::exchange::{parse_exchange_kind, PricerKind, BINANCE_API_URL};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Trading pair (e.g., "BTCUSDT")
    pub pair: String,
    pub base_currency: String,
    pub quote_currency: String,
    /// Quote currency spent per buy tranche
    pub quote_amount_per_trade: Decimal,
    /// Drop from the last buy (or last sell) that triggers a buy, in percent
    pub buy_threshold_pct: Decimal,
    /// Gain over the sell reference that triggers a sell, in percent
    pub sell_threshold_pct: Decimal,
    #[serde(default = "default_max_trades")]
    pub max_trades: u32,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Place the first buy on startup when the series is empty
    #[serde(default)]
    pub auto_start: bool,
}

fn default_max_trades() -> u32 {
    5
}

fn default_tick_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    /// Root directory; each pair gets its own subdirectory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl JournalConfig {
    pub fn pair_dir(&self, pair: &str) -> PathBuf {
        self.data_dir.join(pair)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    /// Interval between fill polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Trading adapter ("paper")
    #[serde(default = "default_exchange_kind")]
    pub kind: String,
    #[serde(default)]
    pub pricer: PricerKind,
    /// REST endpoint for the ticker
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// Price served by the fixed pricer
    #[serde(default)]
    pub fixed_price: Option<Decimal>,
    #[serde(default)]
    pub paper_quote_balance: Decimal,
    #[serde(default)]
    pub paper_base_balance: Decimal,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            kind: default_exchange_kind(),
            pricer: PricerKind::default(),
            rest_url: default_rest_url(),
            fixed_price: None,
            paper_quote_balance: Decimal::ZERO,
            paper_base_balance: Decimal::ZERO,
        }
    }
}

fn default_exchange_kind() -> String {
    "paper".to_string()
}

fn default_rest_url() -> String {
    BINANCE_API_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("reconciliation.poll_interval_ms", 1000)?
            .set_default("journal.data_dir", "data")?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("DCA_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (DCA__STRATEGY__PAIR, etc.)
            .add_source(
                Environment::with_prefix("DCA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values and build the strategy thresholds
    pub fn validate(&self) -> Result<Thresholds> {
        let mut errors = Vec::new();

        if self.strategy.pair.trim().is_empty() {
            errors.push("strategy.pair must not be empty".to_string());
        }
        if self.strategy.base_currency.trim().is_empty()
            || self.strategy.quote_currency.trim().is_empty()
        {
            errors.push("strategy base and quote currencies are required".to_string());
        }
        if self.strategy.quote_amount_per_trade <= Decimal::ZERO {
            errors.push("quote_amount_per_trade must be positive".to_string());
        }
        if self.strategy.tick_interval_secs == 0 {
            errors.push("tick_interval_secs must be at least 1".to_string());
        }
        if self.reconciliation.poll_interval_ms == 0 {
            errors.push("poll_interval_ms must be at least 1".to_string());
        }
        if let Err(e) = parse_exchange_kind(&self.exchange.kind) {
            errors.push(e.to_string());
        }
        if self.exchange.pricer == PricerKind::Fixed
            && !matches!(self.exchange.fixed_price, Some(p) if p > Decimal::ZERO)
        {
            errors.push("fixed pricer requires a positive exchange.fixed_price".to_string());
        }

        let thresholds = Thresholds::new(
            self.strategy.buy_threshold_pct,
            self.strategy.sell_threshold_pct,
            self.strategy.max_trades,
        );

        match thresholds {
            Ok(thresholds) if errors.is_empty() => Ok(thresholds),
            Ok(_) => Err(DcaError::Validation(errors.join("; "))),
            Err(e) => {
                errors.push(e.to_string());
                Err(DcaError::Validation(errors.join("; ")))
            }
        }
    }
}
