//! Trading strategy layer
//!
//! - `dca`: per-pair orchestrator (decide, journal, execute, apply)
//! - `reconciliation`: settles pending intents after a restart

pub mod dca;
pub mod reconciliation;

pub use dca::{DcaSettings, DcaStrategy, StrategyStatus};
pub use reconciliation::{ReconciliationReport, Reconciler, SettleOutcome, ZERO_FILL_CAUSE};
