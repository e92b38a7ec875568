//! DCA strategy orchestrator
//!
//! One `DcaStrategy` per trading pair. It owns the pair's journal and series
//! and runs the per-tick pipeline:
//!
//! price -> decide -> journal intent -> execute -> settle fill -> apply
//!
//! States:
//! - `WaitingForDip`: fully liquidated, re-enters once price falls the buy
//!   threshold below the last exit
//! - `Active`: evaluates a buy first, then a staircase sell
//! - `Idle`: nothing to do until initialization auto-starts a series

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::reconciliation::{ReconciliationReport, Reconciler, SettleOutcome};
use crate::config::AppConfig;
use crate::coordination::ShutdownToken;
use crate::domain::{
    BuyDecision, DcaDecisionEvent, DcaSeries, DcaVerdict, DecisionEvent, SellDecision,
    StrategyState, Thresholds, TradeAction, TradeEvent,
};
use crate::error::{DcaError, Result};
use crate::exchange::{PositionAction, Pricer, Trader};
use crate::persistence::{DurableLog, FileLog, TradeJournal};

/// Per-pair trading parameters
#[derive(Debug, Clone)]
pub struct DcaSettings {
    pub pair: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub quote_amount_per_trade: Decimal,
    pub thresholds: Thresholds,
    pub auto_start: bool,
}

impl DcaSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let thresholds = config.validate()?;
        let strategy = &config.strategy;
        Ok(Self {
            pair: strategy.pair.clone(),
            base_currency: strategy.base_currency.clone(),
            quote_currency: strategy.quote_currency.clone(),
            quote_amount_per_trade: strategy.quote_amount_per_trade,
            thresholds,
            auto_start: strategy.auto_start,
        })
    }
}

/// Point-in-time view of a pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyStatus {
    pub pair: String,
    pub state: StrategyState,
    pub purchases: usize,
    pub avg_entry_price: Decimal,
    pub total_amount: Decimal,
    pub total_base_amount: Decimal,
    pub last_buy_price: Decimal,
    pub last_sell_price: Decimal,
    pub pending_intents: usize,
}

impl StrategyStatus {
    pub fn from_parts(pair: &str, series: &DcaSeries, journal: &TradeJournal) -> Self {
        Self {
            pair: pair.to_string(),
            state: StrategyState::of(series),
            purchases: series.purchase_count(),
            avg_entry_price: series.avg_entry_price(),
            total_amount: series.total_amount(),
            total_base_amount: series.total_base_amount(),
            last_buy_price: series.last_buy_price(),
            last_sell_price: series.last_sell_price(),
            pending_intents: journal.pending().len(),
        }
    }
}

/// Planned order for one tick
#[derive(Debug, Clone, Copy)]
enum Plan {
    Buy,
    Sell(SellDecision),
}

pub struct DcaStrategy {
    settings: DcaSettings,
    journal: TradeJournal,
    series: DcaSeries,
    trader: Arc<dyn Trader>,
    pricer: Arc<dyn Pricer>,
    reconciler: Reconciler,
    shutdown: ShutdownToken,
    last_decision: Option<DecisionEvent>,
}

impl DcaStrategy {
    /// Rebuild the pair's journal and series from `log`.
    ///
    /// Nothing is reconciled until `initialize`.
    pub fn new(
        settings: DcaSettings,
        log: Box<dyn DurableLog>,
        trader: Arc<dyn Trader>,
        pricer: Arc<dyn Pricer>,
        reconciler: Reconciler,
        shutdown: ShutdownToken,
    ) -> Result<Self> {
        let (journal, series) = TradeJournal::restore(log, &settings.pair)?;
        let series = series.unwrap_or_default();

        info!(
            pair = %settings.pair,
            state = %StrategyState::of(&series),
            purchases = series.purchase_count(),
            intents = journal.intents().len(),
            "strategy restored"
        );

        Ok(Self {
            settings,
            journal,
            series,
            trader,
            pricer,
            reconciler,
            shutdown,
            last_decision: None,
        })
    }

    /// Open the pair's file log under `journal.data_dir`
    pub fn open(
        config: &AppConfig,
        trader: Arc<dyn Trader>,
        pricer: Arc<dyn Pricer>,
        shutdown: ShutdownToken,
    ) -> Result<Self> {
        let settings = DcaSettings::from_config(config)?;
        let log = FileLog::open(config.journal.pair_dir(&settings.pair))?;
        Self::new(
            settings,
            Box::new(log),
            trader,
            pricer,
            Reconciler::from_config(&config.reconciliation),
            shutdown,
        )
    }

    pub fn pair(&self) -> &str {
        &self.settings.pair
    }

    pub fn series(&self) -> &DcaSeries {
        &self.series
    }

    pub fn journal(&self) -> &TradeJournal {
        &self.journal
    }

    pub fn state(&self) -> StrategyState {
        StrategyState::of(&self.series)
    }

    pub fn last_decision(&self) -> Option<&DecisionEvent> {
        self.last_decision.as_ref()
    }

    pub fn status(&self) -> StrategyStatus {
        StrategyStatus::from_parts(&self.settings.pair, &self.series, &self.journal)
    }

    /// Resolve pending intents without placing new orders
    pub async fn reconcile(&mut self) -> Result<ReconciliationReport> {
        self.reconciler
            .reconcile(
                &mut self.journal,
                &mut self.series,
                self.trader.as_ref(),
                &mut self.shutdown,
            )
            .await
    }

    /// Reconcile pending intents, then auto-start an empty series if enabled.
    ///
    /// Must complete before the first `tick`.
    pub async fn initialize(&mut self) -> Result<ReconciliationReport> {
        let report = self.reconcile().await?;

        if self.settings.auto_start && self.state() == StrategyState::Idle {
            let price = self.current_price().await?;
            info!(pair = %self.settings.pair, price = %price, "auto-starting series");
            self.record_decision(price, StrategyState::Idle, DcaVerdict::InitialBuy, None, None);
            if let Some(event) = self.execute(Plan::Buy, price).await? {
                info!(pair = %event.pair, amount = %event.amount, price = %event.price, "initial buy placed");
            }
        }

        Ok(report)
    }

    /// Evaluate the market once; at most one order per tick
    pub async fn tick(&mut self) -> Result<Option<TradeEvent>> {
        let price = self.current_price().await?;
        let state = self.state();
        let thresholds = self.settings.thresholds;

        let plan = match state {
            StrategyState::Idle => {
                self.record_decision(price, state, DcaVerdict::Hold, None, None);
                None
            }
            StrategyState::WaitingForDip => {
                if self.series.dipped_below_last_sell(price, &thresholds) {
                    self.record_decision(price, state, DcaVerdict::InitialBuy, None, None);
                    Some(Plan::Buy)
                } else {
                    self.record_decision(price, state, DcaVerdict::Hold, None, None);
                    None
                }
            }
            StrategyState::Active => {
                let buy = self.series.should_buy_at_price(price, &thresholds);
                if buy.should_buy {
                    self.record_decision(price, state, DcaVerdict::Buy, Some(buy), None);
                    Some(Plan::Buy)
                } else {
                    let sell = self.series.should_take_profit_at_price(price, &thresholds);
                    if sell.should_sell {
                        self.record_decision(price, state, DcaVerdict::Sell, Some(buy), Some(sell));
                        Some(Plan::Sell(sell))
                    } else {
                        self.record_decision(price, state, DcaVerdict::Hold, Some(buy), Some(sell));
                        None
                    }
                }
            }
        };

        match plan {
            Some(plan) => self.execute(plan, price).await,
            None => Ok(None),
        }
    }

    /// Tick on `tick_interval` until shutdown.
    ///
    /// Tick errors are logged and retried next tick; durable log failures stop
    /// the loop.
    pub async fn run(&mut self, tick_interval: Duration) -> Result<()> {
        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.clone();

        info!(
            pair = %self.settings.pair,
            interval_secs = tick_interval.as_secs(),
            "strategy loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(pair = %self.settings.pair, "strategy loop stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(Some(event)) => info!(
                    pair = %event.pair,
                    action = %event.action,
                    amount = %event.amount,
                    price = %event.price,
                    "trade executed"
                ),
                Ok(None) => {}
                Err(DcaError::Cancelled) => break,
                Err(e @ DcaError::Log(_)) => {
                    error!(pair = %self.settings.pair, error = %e, "durable log failure");
                    return Err(e);
                }
                Err(e) if e.is_transient() => {
                    warn!(pair = %self.settings.pair, error = %e, "tick failed, retrying");
                }
                Err(e) => {
                    error!(pair = %self.settings.pair, error = %e, "tick failed");
                }
            }
        }

        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        info!(pair = %self.settings.pair, "closing strategy");
        self.journal.close()
    }

    async fn current_price(&self) -> Result<Decimal> {
        let price = self.pricer.get_price(&self.settings.pair).await?;
        if price <= Decimal::ZERO {
            return Err(DcaError::Exchange(format!(
                "non-positive price {} for {}",
                price, self.settings.pair
            )));
        }
        Ok(price)
    }

    fn record_decision(
        &mut self,
        price: Decimal,
        state: StrategyState,
        verdict: DcaVerdict,
        buy: Option<BuyDecision>,
        sell: Option<SellDecision>,
    ) {
        let event = DcaDecisionEvent {
            pair: self.settings.pair.clone(),
            price,
            state,
            verdict,
            buy,
            sell,
            time: Utc::now(),
        };

        if verdict == DcaVerdict::Hold {
            debug!(
                pair = %event.pair,
                price = %price,
                state = %state,
                reason = event.reason(),
                "decision: hold"
            );
        } else {
            info!(
                pair = %event.pair,
                price = %price,
                state = %state,
                verdict = ?verdict,
                reason = event.reason(),
                "decision"
            );
        }

        self.last_decision = Some(DecisionEvent::Dca(event));
    }

    /// size -> prepare -> execute -> settle
    async fn execute(&mut self, plan: Plan, price: Decimal) -> Result<Option<TradeEvent>> {
        let intent = match plan {
            Plan::Buy => {
                let amount = self.settings.quote_amount_per_trade;
                self.require_balance(&self.settings.quote_currency, amount).await?;
                self.journal.prepare(
                    TradeAction::Buy,
                    price,
                    amount,
                    None,
                    Utc::now(),
                    self.series.next_trade_part(),
                    false,
                )?
            }
            Plan::Sell(decision) => {
                let available = self.trader.get_balance(&self.settings.base_currency).await?;
                if available <= Decimal::ZERO {
                    return Err(DcaError::InsufficientBalance {
                        currency: self.settings.base_currency.clone(),
                        required: decision.amount,
                        available,
                    });
                }
                let base = decision.amount.min(available);
                if base < decision.amount {
                    warn!(
                        pair = %self.settings.pair,
                        requested = %decision.amount,
                        available = %available,
                        "sell capped at available balance"
                    );
                }
                self.journal.prepare(
                    TradeAction::Sell,
                    price,
                    base * price,
                    Some(base),
                    Utc::now(),
                    self.series.purchase_count() as u32,
                    decision.is_full_sell,
                )?
            }
        };

        let action = PositionAction::for_trade(intent.action);
        if let Err(e) = self
            .trader
            .execute_action(action, intent.order_amount(), &intent.id)
            .await
        {
            error!(
                pair = %self.settings.pair,
                intent_id = %intent.id,
                action = %action,
                error = %e,
                "order execution failed"
            );
            self.journal.mark_failed(&intent.id, &e.to_string())?;
            return Err(e);
        }

        let outcome = self
            .reconciler
            .settle(
                &mut self.journal,
                &mut self.series,
                self.trader.as_ref(),
                &intent.id,
                &mut self.shutdown,
            )
            .await?;

        if outcome != SettleOutcome::Applied {
            warn!(
                pair = %self.settings.pair,
                intent_id = %intent.id,
                outcome = ?outcome,
                "order not applied"
            );
            return Ok(None);
        }

        let settled = self
            .journal
            .get(&intent.id)
            .ok_or_else(|| DcaError::IntentNotFound(intent.id.clone()))?;

        Ok(Some(TradeEvent {
            action: settled.action,
            pair: self.settings.pair.clone(),
            amount: settled.order_amount(),
            price: settled.price,
        }))
    }

    async fn require_balance(&self, currency: &str, required: Decimal) -> Result<()> {
        let available = self.trader.get_balance(currency).await?;
        if available < required {
            return Err(DcaError::InsufficientBalance {
                currency: currency.to_string(),
                required,
                available,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IntentStatus, REASON_FULL_SELL_BY_CAP, REASON_STAIRCASE_STEP};
    use crate::exchange::{FixedPricer, MockPricer, MockTrader, OrderExecution, PaperTrader};
    use crate::persistence::MemoryLog;
    use rust_decimal_macros::dec;

    fn settings(auto_start: bool) -> DcaSettings {
        DcaSettings {
            pair: "BTCUSDT".to_string(),
            base_currency: "BTC".to_string(),
            quote_currency: "USDT".to_string(),
            quote_amount_per_trade: dec!(100),
            thresholds: Thresholds::new(dec!(5), dec!(10), 5).unwrap(),
            auto_start,
        }
    }

    fn paper_strategy(auto_start: bool, price: Decimal) -> (DcaStrategy, Arc<FixedPricer>) {
        let pricer = Arc::new(FixedPricer::new(price));
        let trader = Arc::new(
            PaperTrader::new("BTCUSDT", "BTC", "USDT", pricer.clone())
                .with_balances(dec!(1000), Decimal::ZERO),
        );
        let strategy = DcaStrategy::new(
            settings(auto_start),
            Box::new(MemoryLog::new()),
            trader,
            pricer.clone(),
            Reconciler::new(Duration::from_millis(1)),
            ShutdownToken::never(),
        )
        .unwrap();
        (strategy, pricer)
    }

    fn mock_strategy(trader: MockTrader) -> DcaStrategy {
        DcaStrategy::new(
            settings(true),
            Box::new(MemoryLog::new()),
            Arc::new(trader),
            Arc::new(FixedPricer::new(dec!(100))),
            Reconciler::new(Duration::from_millis(1)),
            ShutdownToken::never(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_idle_tick_is_a_noop() {
        let (mut strategy, _pricer) = paper_strategy(false, dec!(100));
        strategy.initialize().await.unwrap();

        assert_eq!(strategy.state(), StrategyState::Idle);
        assert!(strategy.tick().await.unwrap().is_none());
        assert!(strategy.journal().intents().is_empty());
        assert!(!strategy.last_decision().unwrap().is_actionable());
    }

    #[tokio::test]
    async fn test_auto_start_places_initial_buy() {
        let (mut strategy, _pricer) = paper_strategy(true, dec!(100));
        let report = strategy.initialize().await.unwrap();

        assert_eq!(report, ReconciliationReport::default());
        assert_eq!(strategy.state(), StrategyState::Active);
        assert_eq!(strategy.series().purchase_count(), 1);
        assert_eq!(strategy.series().avg_entry_price(), dec!(100));
        assert_eq!(strategy.journal().intents()[0].status, IntentStatus::Done);
        assert!(strategy.last_decision().unwrap().is_actionable());
    }

    #[tokio::test]
    async fn test_buy_on_dip_then_hold() {
        let (mut strategy, pricer) = paper_strategy(true, dec!(100));
        strategy.initialize().await.unwrap();

        pricer.set_price(dec!(97)).await;
        assert!(strategy.tick().await.unwrap().is_none());

        pricer.set_price(dec!(94)).await;
        let event = strategy.tick().await.unwrap().expect("dip should buy");
        assert_eq!(event.action, TradeAction::Buy);
        assert_eq!(event.amount, dec!(100));
        assert_eq!(event.price, dec!(94));

        let series = strategy.series();
        assert_eq!(series.purchase_count(), 2);
        assert_eq!(series.last_buy_price(), dec!(94));
        assert_eq!(series.purchases()[1].trade_part(), 2);
        assert_eq!(series.avg_entry_price(), dec!(97));
    }

    #[tokio::test]
    async fn test_full_sell_then_waiting_for_dip_reentry() {
        let (mut strategy, pricer) = paper_strategy(true, dec!(100));
        strategy.initialize().await.unwrap();

        pricer.set_price(dec!(111)).await;
        let event = strategy.tick().await.unwrap().expect("gain should sell");
        assert_eq!(event.action, TradeAction::Sell);
        assert_eq!(event.amount, dec!(1));
        match strategy.last_decision() {
            Some(DecisionEvent::Dca(d)) => assert_eq!(d.reason(), REASON_FULL_SELL_BY_CAP),
            other => panic!("unexpected decision {:?}", other),
        }
        assert_eq!(strategy.state(), StrategyState::WaitingForDip);
        assert_eq!(strategy.series().last_sell_price(), dec!(111));

        pricer.set_price(dec!(106)).await;
        assert!(strategy.tick().await.unwrap().is_none());

        pricer.set_price(dec!(105)).await;
        let event = strategy.tick().await.unwrap().expect("dip below exit should buy");
        assert_eq!(event.action, TradeAction::Buy);
        assert_eq!(strategy.state(), StrategyState::Active);
        assert_eq!(strategy.series().purchases()[0].trade_part(), 1);
        assert_eq!(strategy.status().pending_intents, 0);
    }

    #[tokio::test]
    async fn test_staircase_sell_keeps_remaining_tranches() {
        let (mut strategy, pricer) = paper_strategy(true, dec!(100));
        strategy.initialize().await.unwrap();

        pricer.set_price(dec!(80)).await;
        strategy.tick().await.unwrap().expect("dip should buy");
        assert_eq!(strategy.series().total_base_amount(), dec!(2.25));
        assert_eq!(strategy.series().avg_entry_price(), dec!(90));

        pricer.set_price(dec!(100)).await;
        let event = strategy.tick().await.unwrap().expect("gain should sell");
        assert_eq!(event.action, TradeAction::Sell);
        assert_eq!(event.amount, dec!(1.125));
        assert_eq!(event.price, dec!(100));
        match strategy.last_decision() {
            Some(DecisionEvent::Dca(d)) => assert_eq!(d.reason(), REASON_STAIRCASE_STEP),
            other => panic!("unexpected decision {:?}", other),
        }

        let series = strategy.series();
        assert_eq!(strategy.state(), StrategyState::Active);
        assert_eq!(series.purchase_count(), 2);
        assert_eq!(series.purchases()[1].amount(), dec!(10));
        assert_eq!(series.total_base_amount(), dec!(1.125));
        assert_eq!(series.last_sell_price(), dec!(100));

        // Next step is measured from the last exit, not the average
        pricer.set_price(dec!(105)).await;
        assert!(strategy.tick().await.unwrap().is_none());
        assert_eq!(strategy.series().total_base_amount(), dec!(1.125));
    }

    #[tokio::test]
    async fn test_reconcile_does_not_auto_start() {
        let (mut strategy, _pricer) = paper_strategy(true, dec!(100));
        let report = strategy.reconcile().await.unwrap();

        assert_eq!(report, ReconciliationReport::default());
        assert_eq!(strategy.state(), StrategyState::Idle);
        assert!(strategy.journal().intents().is_empty());
        assert!(strategy.last_decision().is_none());
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_rejected_before_journaling() {
        let mut trader = MockTrader::new();
        trader
            .expect_get_balance()
            .returning(|_| Ok(dec!(50)));
        trader.expect_execute_action().times(0);

        let mut strategy = mock_strategy(trader);
        let err = strategy.initialize().await.unwrap_err();

        assert!(matches!(err, DcaError::InsufficientBalance { .. }));
        assert!(strategy.journal().intents().is_empty());
    }

    #[tokio::test]
    async fn test_execution_error_marks_intent_failed() {
        let mut trader = MockTrader::new();
        trader
            .expect_get_balance()
            .returning(|_| Ok(dec!(1000)));
        trader
            .expect_execute_action()
            .times(1)
            .returning(|_, _, _| Err(DcaError::Exchange("rejected".to_string())));
        trader.expect_order_executed().times(0);

        let mut strategy = mock_strategy(trader);
        let err = strategy.initialize().await.unwrap_err();

        assert!(matches!(err, DcaError::Exchange(_)));
        let intent = &strategy.journal().intents()[0];
        assert_eq!(intent.status, IntentStatus::Failed);
        assert!(intent.error.as_deref().unwrap_or_default().contains("rejected"));
        assert!(strategy.series().is_empty());
    }

    #[tokio::test]
    async fn test_non_positive_price_is_rejected() {
        let mut pricer = MockPricer::new();
        pricer.expect_get_price().returning(|_| Ok(Decimal::ZERO));
        let mut trader = MockTrader::new();
        trader.expect_execute_action().times(0);

        let mut strategy = DcaStrategy::new(
            settings(false),
            Box::new(MemoryLog::new()),
            Arc::new(trader),
            Arc::new(pricer),
            Reconciler::new(Duration::from_millis(1)),
            ShutdownToken::never(),
        )
        .unwrap();

        let err = strategy.tick().await.unwrap_err();
        assert!(err.is_transient());
        assert!(strategy.last_decision().is_none());
    }

    #[tokio::test]
    async fn test_zero_fill_returns_no_event() {
        let mut trader = MockTrader::new();
        trader
            .expect_get_balance()
            .returning(|_| Ok(dec!(1000)));
        trader
            .expect_execute_action()
            .returning(|_, _, _| Ok(()));
        trader
            .expect_order_executed()
            .returning(|_| Ok(OrderExecution::filled(Decimal::ZERO)));

        let mut strategy = mock_strategy(trader);
        strategy.initialize().await.unwrap();

        assert!(strategy.series().is_empty());
        assert_eq!(strategy.journal().intents()[0].status, IntentStatus::Failed);
        assert_eq!(strategy.state(), StrategyState::Idle);
    }
}
