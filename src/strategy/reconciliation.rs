//! Crash-recovery reconciliation
//!
//! Drives every pending trade intent to a terminal status after a restart:
//! - Intents already applied to the series are closed without re-applying
//! - Others are polled on the exchange until executed (or cancelled)
//! - Partial fills are journaled as soon as they are observed
//! - Executed fills are applied to the series, snapshotted, then marked done
//!
//! The same settle routine confirms fills for orders placed by live ticks.

use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ReconciliationConfig;
use crate::coordination::ShutdownToken;
use crate::domain::{DcaSeries, IntentStatus, TradeAction, TradeIntent};
use crate::error::{DcaError, Result};
use crate::exchange::{OrderExecution, Trader};
use crate::persistence::TradeJournal;

/// Precision used when comparing exchange fills with journaled amounts
const FILL_COMPARE_DP: u32 = 8;

pub const ZERO_FILL_CAUSE: &str = "executed with zero fill";

/// How a single intent was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleOutcome {
    /// Fill applied to the series
    Applied,
    /// Already reflected in the series; only the journal was closed
    AlreadyApplied,
    /// Terminal failure recorded in the journal
    Failed,
}

/// Summary of a reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub examined: usize,
    pub already_applied: usize,
    pub applied: usize,
    pub failed: usize,
}

impl ReconciliationReport {
    fn record(&mut self, outcome: SettleOutcome) {
        match outcome {
            SettleOutcome::Applied => self.applied += 1,
            SettleOutcome::AlreadyApplied => self.already_applied += 1,
            SettleOutcome::Failed => self.failed += 1,
        }
    }
}

fn differs(a: Decimal, b: Decimal) -> bool {
    a.round_dp(FILL_COMPARE_DP) != b.round_dp(FILL_COMPARE_DP)
}

/// Resolves pending intents against the exchange
#[derive(Debug, Clone)]
pub struct Reconciler {
    poll_interval: Duration,
}

impl Reconciler {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    pub fn from_config(config: &ReconciliationConfig) -> Self {
        Self::new(Duration::from_millis(config.poll_interval_ms.max(1)))
    }

    /// Resolve every pending intent in the journal.
    ///
    /// Stops at the first error; intents resolved before it stay resolved and
    /// the failing one stays pending.
    pub async fn reconcile(
        &self,
        journal: &mut TradeJournal,
        series: &mut DcaSeries,
        trader: &dyn Trader,
        shutdown: &mut ShutdownToken,
    ) -> Result<ReconciliationReport> {
        let pending = journal.pending();
        let mut report = ReconciliationReport::default();

        if pending.is_empty() {
            debug!(pair = %journal.pair(), "no pending trade intents");
            return Ok(report);
        }

        info!(
            pair = %journal.pair(),
            pending = pending.len(),
            "reconciling pending trade intents"
        );

        for intent in pending {
            report.examined += 1;
            let outcome = self
                .settle(journal, series, trader, &intent.id, shutdown)
                .await?;
            report.record(outcome);
        }

        info!(
            pair = %journal.pair(),
            examined = report.examined,
            applied = report.applied,
            already_applied = report.already_applied,
            failed = report.failed,
            "reconciliation complete"
        );
        Ok(report)
    }

    /// Wait for one intent's order to execute and apply the result
    pub async fn settle(
        &self,
        journal: &mut TradeJournal,
        series: &mut DcaSeries,
        trader: &dyn Trader,
        id: &str,
        shutdown: &mut ShutdownToken,
    ) -> Result<SettleOutcome> {
        let intent = journal
            .get(id)
            .cloned()
            .ok_or_else(|| DcaError::IntentNotFound(id.to_string()))?;

        match intent.status {
            IntentStatus::Done => return Ok(SettleOutcome::AlreadyApplied),
            IntentStatus::Failed => return Ok(SettleOutcome::Failed),
            IntentStatus::Pending => {}
        }

        if series.is_processed(id) {
            info!(intent_id = id, action = %intent.action, "intent already applied, closing");
            journal.mark_done(id)?;
            return Ok(SettleOutcome::AlreadyApplied);
        }

        let execution = self.await_execution(journal, trader, id, shutdown).await?;

        if execution.filled_amount <= Decimal::ZERO {
            warn!(intent_id = id, action = %intent.action, "order executed with zero fill");
            journal.mark_failed(id, ZERO_FILL_CAUSE)?;
            return Ok(SettleOutcome::Failed);
        }

        // Re-read: the poll loop may have journaled a different fill
        let intent = journal
            .get(id)
            .cloned()
            .ok_or_else(|| DcaError::IntentNotFound(id.to_string()))?;

        let applied = match intent.action {
            TradeAction::Buy => series.apply_buy(
                id,
                intent.price,
                intent.amount,
                intent.time,
                intent.trade_part,
            ),
            TradeAction::Sell => series.apply_sell(
                id,
                execution.filled_amount,
                intent.price,
                intent.is_full_sell,
            ),
        };

        match applied {
            Ok(true) => {}
            Ok(false) => {
                journal.mark_done(id)?;
                return Ok(SettleOutcome::AlreadyApplied);
            }
            Err(e) => {
                error!(intent_id = id, error = %e, "cannot apply executed fill");
                journal.mark_failed(id, &e.to_string())?;
                return Ok(SettleOutcome::Failed);
            }
        }

        journal.save_series(series)?;
        journal.mark_done(id)?;

        info!(
            intent_id = id,
            action = %intent.action,
            price = %intent.price,
            base = %execution.filled_amount,
            purchases = series.purchase_count(),
            avg_entry = %series.avg_entry_price(),
            "trade intent applied"
        );
        Ok(SettleOutcome::Applied)
    }

    /// Poll until the exchange reports the order executed
    async fn await_execution(
        &self,
        journal: &mut TradeJournal,
        trader: &dyn Trader,
        id: &str,
        shutdown: &mut ShutdownToken,
    ) -> Result<OrderExecution> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempt: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    warn!(intent_id = id, attempt, "fill polling cancelled, intent left pending");
                    return Err(DcaError::Cancelled);
                }
                _ = ticker.tick() => {}
            }
            attempt += 1;

            match trader.order_executed(id).await {
                Ok(execution) => {
                    record_fill(journal, id, execution.filled_amount)?;
                    if execution.executed {
                        debug!(intent_id = id, attempt, "order executed");
                        return Ok(execution);
                    }
                    debug!(intent_id = id, attempt, "order not executed yet");
                }
                Err(e) => {
                    warn!(intent_id = id, attempt, error = %e, "fill poll failed, retrying");
                }
            }
        }
    }
}

/// Journal a reported base fill if it differs from what is recorded
fn record_fill(journal: &mut TradeJournal, id: &str, filled_base: Decimal) -> Result<()> {
    if filled_base <= Decimal::ZERO {
        return Ok(());
    }
    let intent: &TradeIntent = journal
        .get(id)
        .ok_or_else(|| DcaError::IntentNotFound(id.to_string()))?;

    let amount = match intent.action {
        TradeAction::Buy => {
            let quote = filled_base * intent.price;
            if !differs(quote, intent.amount) {
                return Ok(());
            }
            quote
        }
        TradeAction::Sell => {
            if !differs(filled_base, intent.requested_base()) {
                return Ok(());
            }
            filled_base
        }
    };

    journal.update_amount(id, amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::ShutdownHandle;
    use crate::exchange::MockTrader;
    use crate::persistence::MemoryLog;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn journal() -> TradeJournal {
        let (journal, series) = TradeJournal::restore(Box::new(MemoryLog::new()), "BTCUSDT").unwrap();
        assert!(series.is_none());
        journal
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_pending_buy_is_applied_once() {
        let mut journal = journal();
        let mut series = DcaSeries::new();
        let intent = journal
            .prepare(TradeAction::Buy, dec!(48000), dec!(1000), None, Utc::now(), 1, false)
            .unwrap();

        let mut trader = MockTrader::new();
        trader
            .expect_order_executed()
            .times(1)
            .returning(|_| Ok(OrderExecution::filled(dec!(1000) / dec!(48000))));

        let report = reconciler()
            .reconcile(&mut journal, &mut series, &trader, &mut ShutdownToken::never())
            .await
            .unwrap();

        assert_eq!(
            report,
            ReconciliationReport {
                examined: 1,
                applied: 1,
                ..Default::default()
            }
        );
        assert_eq!(series.purchase_count(), 1);
        assert_eq!(series.purchases()[0].amount(), dec!(1000));
        assert_eq!(series.purchases()[0].price(), dec!(48000));
        assert!(series.is_processed(&intent.id));
        assert_eq!(journal.get(&intent.id).unwrap().status, IntentStatus::Done);
        assert!(journal.pending().is_empty());

        // Second pass has nothing to do
        let report = reconciler()
            .reconcile(&mut journal, &mut series, &trader, &mut ShutdownToken::never())
            .await
            .unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(series.purchase_count(), 1);
    }

    #[tokio::test]
    async fn test_processed_sell_is_closed_without_polling() {
        let mut journal = journal();
        let mut series = DcaSeries::new();
        series
            .add_purchase("b1", dec!(100), dec!(1000), Utc::now(), 1)
            .unwrap();

        let intent = journal
            .prepare(TradeAction::Sell, dec!(111), dec!(1110), Some(dec!(10)), Utc::now(), 1, true)
            .unwrap();
        series.mark_processed(&intent.id);
        let before = series.clone();

        let mut trader = MockTrader::new();
        trader.expect_order_executed().times(0);

        let report = reconciler()
            .reconcile(&mut journal, &mut series, &trader, &mut ShutdownToken::never())
            .await
            .unwrap();

        assert_eq!(report.already_applied, 1);
        assert_eq!(series, before);
        assert_eq!(journal.get(&intent.id).unwrap().status, IntentStatus::Done);
    }

    #[tokio::test]
    async fn test_zero_fill_marks_failed() {
        let mut journal = journal();
        let mut series = DcaSeries::new();
        let intent = journal
            .prepare(TradeAction::Buy, dec!(100), dec!(500), None, Utc::now(), 1, false)
            .unwrap();

        let mut trader = MockTrader::new();
        trader
            .expect_order_executed()
            .returning(|_| Ok(OrderExecution::filled(Decimal::ZERO)));

        let report = reconciler()
            .reconcile(&mut journal, &mut series, &trader, &mut ShutdownToken::never())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert!(series.is_empty());
        let failed = journal.get(&intent.id).unwrap();
        assert_eq!(failed.status, IntentStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some(ZERO_FILL_CAUSE));
    }

    #[tokio::test]
    async fn test_partial_sell_fill_is_journaled_and_applied() {
        let mut journal = journal();
        let mut series = DcaSeries::new();
        series
            .add_purchase("b1", dec!(100), dec!(1000), Utc::now(), 1)
            .unwrap();
        series
            .add_purchase("b2", dec!(100), dec!(1000), Utc::now(), 2)
            .unwrap();

        let intent = journal
            .prepare(TradeAction::Sell, dec!(120), dec!(1200), Some(dec!(10)), Utc::now(), 2, false)
            .unwrap();

        let mut trader = MockTrader::new();
        let mut polls = 0;
        trader.expect_order_executed().returning(move |_| {
            polls += 1;
            match polls {
                1 => Err(DcaError::Exchange("timeout".to_string())),
                2 => Ok(OrderExecution {
                    executed: false,
                    filled_amount: dec!(4),
                }),
                _ => Ok(OrderExecution::filled(dec!(4))),
            }
        });

        let report = reconciler()
            .reconcile(&mut journal, &mut series, &trader, &mut ShutdownToken::never())
            .await
            .unwrap();

        assert_eq!(report.applied, 1);
        let done = journal.get(&intent.id).unwrap();
        assert_eq!(done.status, IntentStatus::Done);
        assert_eq!(done.base_amount, Some(dec!(4)));
        assert_eq!(done.amount, dec!(480));

        assert_eq!(series.total_base_amount(), dec!(16));
        assert_eq!(series.last_sell_price(), dec!(120));
        assert!(!series.waiting_for_dip());
    }

    #[tokio::test]
    async fn test_cancellation_leaves_intent_pending() {
        let mut journal = journal();
        let mut series = DcaSeries::new();
        let intent = journal
            .prepare(TradeAction::Buy, dec!(100), dec!(500), None, Utc::now(), 1, false)
            .unwrap();

        let mut trader = MockTrader::new();
        trader
            .expect_order_executed()
            .returning(|_| Ok(OrderExecution::pending()));

        let handle = ShutdownHandle::new();
        let mut token = handle.token();
        handle.trigger();

        let err = reconciler()
            .reconcile(&mut journal, &mut series, &trader, &mut token)
            .await
            .unwrap_err();

        assert!(matches!(err, DcaError::Cancelled));
        assert!(journal.get(&intent.id).unwrap().is_pending());
        assert!(series.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_keeps_earlier_intents_done() {
        let mut journal = journal();
        let mut series = DcaSeries::new();
        let first = journal
            .prepare(TradeAction::Buy, dec!(100), dec!(500), None, Utc::now(), 1, false)
            .unwrap();
        let second = journal
            .prepare(TradeAction::Buy, dec!(95), dec!(500), None, Utc::now(), 2, false)
            .unwrap();

        let handle = Arc::new(ShutdownHandle::new());
        let mut token = handle.token();

        let mut trader = MockTrader::new();
        let first_id = first.id.clone();
        let trigger = Arc::clone(&handle);
        trader.expect_order_executed().returning(move |id| {
            if id == first_id {
                Ok(OrderExecution::filled(dec!(5)))
            } else {
                // Signal arrives while the second order is still open
                trigger.trigger();
                Ok(OrderExecution::pending())
            }
        });

        let err = reconciler()
            .reconcile(&mut journal, &mut series, &trader, &mut token)
            .await
            .unwrap_err();

        assert!(matches!(err, DcaError::Cancelled));
        assert_eq!(journal.get(&first.id).unwrap().status, IntentStatus::Done);
        assert!(journal.get(&second.id).unwrap().is_pending());
        assert_eq!(journal.pending().len(), 1);
        assert_eq!(series.purchase_count(), 1);
        assert!(series.is_processed(&first.id));
        assert!(!series.is_processed(&second.id));
    }

    #[tokio::test]
    async fn test_full_sell_resets_series() {
        let mut journal = journal();
        let mut series = DcaSeries::new();
        series
            .add_purchase("b1", dec!(100), dec!(1000), Utc::now(), 1)
            .unwrap();
        let intent = journal
            .prepare(TradeAction::Sell, dec!(111), dec!(1110), Some(dec!(10)), Utc::now(), 1, true)
            .unwrap();

        let mut trader = MockTrader::new();
        trader
            .expect_order_executed()
            .returning(|_| Ok(OrderExecution::filled(dec!(10))));

        reconciler()
            .reconcile(&mut journal, &mut series, &trader, &mut ShutdownToken::never())
            .await
            .unwrap();

        assert!(series.is_empty());
        assert!(series.waiting_for_dip());
        assert_eq!(series.last_sell_price(), dec!(111));
        assert!(series.is_processed("b1"));
        assert!(series.is_processed(&intent.id));
    }
}
