//! Decision events
//!
//! One record per evaluated tick. Strategies of different kinds produce
//! different payloads; consumers match on the variant.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{BuyDecision, SellDecision, StrategyState};

/// What a DCA tick decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DcaVerdict {
    Hold,
    InitialBuy,
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DcaDecisionEvent {
    pub pair: String,
    pub price: Decimal,
    pub state: StrategyState,
    pub verdict: DcaVerdict,
    pub buy: Option<BuyDecision>,
    pub sell: Option<SellDecision>,
    pub time: DateTime<Utc>,
}

impl DcaDecisionEvent {
    pub fn reason(&self) -> &'static str {
        match self.verdict {
            DcaVerdict::Sell => self.sell.map(|s| s.reason).unwrap_or("sell"),
            DcaVerdict::InitialBuy => "dip_below_last_sell",
            _ => self
                .buy
                .map(|b| b.reason)
                .or(self.sell.map(|s| s.reason))
                .unwrap_or("no_signal"),
        }
    }
}

/// Model-driven decision payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiDecisionEvent {
    pub pair: String,
    pub model: String,
    pub action: String,
    pub confidence: Option<f64>,
    pub rationale: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionEvent {
    Ai(AiDecisionEvent),
    Dca(DcaDecisionEvent),
}

impl DecisionEvent {
    pub fn pair(&self) -> &str {
        match self {
            DecisionEvent::Ai(e) => &e.pair,
            DecisionEvent::Dca(e) => &e.pair,
        }
    }

    /// True when the decision led to an order
    pub fn is_actionable(&self) -> bool {
        match self {
            DecisionEvent::Ai(e) => !e.action.eq_ignore_ascii_case("hold"),
            DecisionEvent::Dca(e) => e.verdict != DcaVerdict::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decision_event_is_tagged() {
        let event = DecisionEvent::Dca(DcaDecisionEvent {
            pair: "BTCUSDT".to_string(),
            price: dec!(94),
            state: StrategyState::Active,
            verdict: DcaVerdict::Hold,
            buy: Some(BuyDecision {
                should_buy: false,
                reason: "drop_below_threshold",
            }),
            sell: None,
            time: Utc::now(),
        });

        assert!(!event.is_actionable());
        assert_eq!(event.pair(), "BTCUSDT");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "dca");
        assert_eq!(json["verdict"], "hold");

        if let DecisionEvent::Dca(dca) = &event {
            assert_eq!(dca.reason(), "drop_below_threshold");
        }
    }

    #[test]
    fn test_ai_hold_is_not_actionable() {
        let event = DecisionEvent::Ai(AiDecisionEvent {
            pair: "ETHUSDT".to_string(),
            model: "local".to_string(),
            action: "HOLD".to_string(),
            confidence: Some(0.4),
            rationale: "flat".to_string(),
            time: Utc::now(),
        });
        assert!(!event.is_actionable());
    }
}
