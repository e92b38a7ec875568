//! Trade intent journal
//!
//! Every prospective trade is written to the durable log as a `pending` intent
//! before the exchange sees it, and re-written in full on every change. The log
//! is a sequence of snapshots per intent key, so a forward replay leaves each
//! intent at its latest status.
//!
//! The journal is also the single writer of the pair's series snapshot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::wal::DurableLog;
use crate::domain::{DcaSeries, IntentStatus, TradeAction, TradeIntent};
use crate::error::{DcaError, Result};

pub const INTENT_KEY_PREFIX: &str = "dca_trade_intent_";
pub const SERIES_KEY_PREFIX: &str = "dca_series_";

pub fn intent_key(id: &str) -> String {
    format!("{}{}", INTENT_KEY_PREFIX, id)
}

pub fn series_key(pair: &str) -> String {
    format!("{}{}", SERIES_KEY_PREFIX, pair)
}

/// Durable journal of trade intents for one pair
pub struct TradeJournal {
    log: Box<dyn DurableLog>,
    pair: String,
    intents: Vec<TradeIntent>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for TradeJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeJournal")
            .field("pair", &self.pair)
            .field("intents", &self.intents.len())
            .field("log_index", &self.log.current_index())
            .finish()
    }
}

impl TradeJournal {
    /// Rebuild the journal and the latest series snapshot from the log.
    ///
    /// Records that fail to decode are logged and skipped.
    pub fn restore(log: Box<dyn DurableLog>, pair: &str) -> Result<(Self, Option<DcaSeries>)> {
        let snapshot_key = series_key(pair);
        let mut intents: Vec<TradeIntent> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut series: Option<DcaSeries> = None;
        let mut skipped = 0usize;

        for entry in log.iter() {
            if let Some(id) = entry.key.strip_prefix(INTENT_KEY_PREFIX) {
                let intent = match serde_json::from_str::<TradeIntent>(&entry.value) {
                    Ok(intent) => intent,
                    Err(e) => {
                        warn!(index = entry.index, key = %entry.key, error = %e, "skipping undecodable trade intent");
                        skipped += 1;
                        continue;
                    }
                };
                if intent.id != id {
                    warn!(index = entry.index, key = %entry.key, intent_id = %intent.id, "trade intent id does not match its key, skipping");
                    skipped += 1;
                    continue;
                }

                match index.get(id) {
                    Some(&pos) => intents[pos] = intent,
                    None => {
                        index.insert(id.to_string(), intents.len());
                        intents.push(intent);
                    }
                }
            } else if entry.key == snapshot_key {
                match serde_json::from_str::<DcaSeries>(&entry.value) {
                    Ok(mut snapshot) => {
                        snapshot.recalculate_stats();
                        series = Some(snapshot);
                    }
                    Err(e) => {
                        warn!(index = entry.index, key = %entry.key, error = %e, "skipping undecodable series snapshot");
                        skipped += 1;
                    }
                }
            } else {
                debug!(index = entry.index, key = %entry.key, "ignoring unrelated log key");
            }
        }

        let pending = intents.iter().filter(|i| i.is_pending()).count();
        info!(
            pair,
            intents = intents.len(),
            pending,
            skipped,
            has_series = series.is_some(),
            "replayed trade journal"
        );

        Ok((
            Self {
                log,
                pair: pair.to_string(),
                intents,
                index,
            },
            series,
        ))
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    /// Journal a new pending intent. Durable before this returns.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare(
        &mut self,
        action: TradeAction,
        price: Decimal,
        amount: Decimal,
        base_amount: Option<Decimal>,
        time: DateTime<Utc>,
        trade_part: u32,
        is_full_sell: bool,
    ) -> Result<TradeIntent> {
        if amount <= Decimal::ZERO {
            return Err(DcaError::Validation(format!(
                "intent amount must be positive, got {}",
                amount
            )));
        }

        let intent = TradeIntent::new(
            action,
            price,
            amount,
            base_amount,
            time,
            trade_part,
            is_full_sell,
        );
        self.persist(&intent)?;

        self.index.insert(intent.id.clone(), self.intents.len());
        self.intents.push(intent.clone());

        info!(
            pair = %self.pair,
            intent_id = %intent.id,
            action = %intent.action,
            amount = %intent.amount,
            price = %intent.price,
            trade_part = intent.trade_part,
            "prepared trade intent"
        );
        Ok(intent)
    }

    /// Mark an intent done. Already-done intents are left alone.
    pub fn mark_done(&mut self, id: &str) -> Result<()> {
        if self.require(id)?.status == IntentStatus::Done {
            return Ok(());
        }
        self.transition(id, IntentStatus::Done, None)
    }

    pub fn mark_failed(&mut self, id: &str, cause: &str) -> Result<()> {
        self.transition(id, IntentStatus::Failed, Some(cause.to_string()))
    }

    /// Record the amount the exchange actually filled.
    ///
    /// For buys `amount` is quote currency. For sells it is base currency and
    /// the quote equivalent is recomputed at the intent's reference price.
    pub fn update_amount(&mut self, id: &str, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(DcaError::Validation(format!(
                "filled amount must be positive, got {}",
                amount
            )));
        }

        let current = self.require(id)?;
        if !current.is_pending() {
            return Err(DcaError::InvalidStateTransition {
                from: current.status.to_string(),
                to: "amount update".to_string(),
            });
        }

        let previous = current.order_amount();
        let mut updated = current.clone();
        match updated.action {
            TradeAction::Buy => updated.amount = amount,
            TradeAction::Sell => {
                updated.base_amount = Some(amount);
                updated.amount = amount * updated.price;
            }
        }

        self.persist(&updated)?;
        info!(
            pair = %self.pair,
            intent_id = id,
            previous = %previous,
            filled = %amount,
            "updated trade intent amount"
        );
        self.replace(updated);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&TradeIntent> {
        self.index.get(id).map(|&pos| &self.intents[pos])
    }

    /// All intents in log order
    pub fn intents(&self) -> &[TradeIntent] {
        &self.intents
    }

    pub fn pending(&self) -> Vec<TradeIntent> {
        self.intents
            .iter()
            .filter(|i| i.is_pending())
            .cloned()
            .collect()
    }

    /// Persist the pair's series snapshot
    pub fn save_series(&mut self, series: &DcaSeries) -> Result<()> {
        let value = serde_json::to_string(series)?;
        let key = series_key(&self.pair);
        let index = self.log.current_index() + 1;
        self.log.write(index, &key, &value)?;
        debug!(pair = %self.pair, index, purchases = series.purchase_count(), "saved series snapshot");
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.log.close()
    }

    fn require(&self, id: &str) -> Result<&TradeIntent> {
        self.get(id)
            .ok_or_else(|| DcaError::IntentNotFound(id.to_string()))
    }

    fn transition(&mut self, id: &str, target: IntentStatus, error: Option<String>) -> Result<()> {
        let current = self.require(id)?;
        if !current.status.can_transition_to(target) {
            return Err(DcaError::InvalidStateTransition {
                from: current.status.to_string(),
                to: target.to_string(),
            });
        }

        let mut updated = current.clone();
        updated.status = target;
        updated.error = error;

        self.persist(&updated)?;
        match target {
            IntentStatus::Failed => warn!(
                pair = %self.pair,
                intent_id = id,
                error = updated.error.as_deref().unwrap_or(""),
                "trade intent failed"
            ),
            _ => info!(pair = %self.pair, intent_id = id, status = %target, "trade intent resolved"),
        }
        self.replace(updated);
        Ok(())
    }

    fn replace(&mut self, intent: TradeIntent) {
        if let Some(&pos) = self.index.get(&intent.id) {
            self.intents[pos] = intent;
        }
    }

    fn persist(&mut self, intent: &TradeIntent) -> Result<()> {
        let value = serde_json::to_string(intent)?;
        let index = self.log.current_index() + 1;
        self.log.write(index, &intent_key(&intent.id), &value)
    }
}
