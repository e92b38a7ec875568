pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod strategy;

pub use config::AppConfig;
pub use coordination::{ShutdownHandle, ShutdownToken};
pub use domain::{DcaSeries, Thresholds, TradeEvent, TradeIntent};
pub use error::{DcaError, Result};
pub use exchange::{PaperTrader, Pricer, Trader};
pub use persistence::{DurableLog, FileLog, MemoryLog, TradeJournal};
pub use strategy::{DcaStrategy, ReconciliationReport, Reconciler, StrategyStatus};
