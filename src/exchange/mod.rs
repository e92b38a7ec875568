pub mod factory;
pub mod paper;
pub mod pricer;
mod traits;

pub use factory::{build_pricer, build_trader};
pub use paper::PaperTrader;
pub use pricer::{exchange_symbol, BinancePricer, FixedPricer, BINANCE_API_URL};
pub use traits::{
    parse_exchange_kind, ExchangeKind, OrderExecution, PositionAction, Pricer, PricerKind, Trader,
};

#[cfg(test)]
pub use traits::{MockPricer, MockTrader};
