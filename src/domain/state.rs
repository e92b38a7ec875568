use serde::{Deserialize, Serialize};
use std::fmt;

use super::DcaSeries;

/// Per-pair strategy state, derived from the series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyState {
    /// Fully liquidated, waiting for price to dip below the last exit
    WaitingForDip,
    /// Holding purchases, evaluating buys and sells
    Active,
    /// No purchases and not waiting; only initialization starts trading
    Idle,
}

impl StrategyState {
    pub fn of(series: &DcaSeries) -> Self {
        if series.waiting_for_dip() {
            StrategyState::WaitingForDip
        } else if !series.is_empty() {
            StrategyState::Active
        } else {
            StrategyState::Idle
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyState::WaitingForDip => "WAITING_FOR_DIP",
            StrategyState::Active => "ACTIVE",
            StrategyState::Idle => "IDLE",
        }
    }
}

impl fmt::Display for StrategyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
