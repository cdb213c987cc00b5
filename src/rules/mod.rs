pub mod catalog;

use std::collections::HashSet;

use crate::model::{Alert, AlertRule, Metrics, RuleType};

/// Holds the enabled rule set loaded once at startup (Design Notes §9:
/// "loaded once, read-only thereafter; reloads must be copy-on-write").
pub struct RuleEngine {
    enabled: HashSet<RuleType>,
}

impl RuleEngine {
    pub fn new(rules: &[AlertRule]) -> Self {
        let enabled = rules
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.rule_type)
            .collect();
        Self { enabled }
    }

    /// Evaluate every enabled rule against `metrics`, returning pre-cooldown
    /// alert candidates in `RuleType::ALL` order.
    pub fn evaluate(&self, metrics: &Metrics) -> Vec<Alert> {
        RuleType::ALL
            .into_iter()
            .filter(|rt| self.enabled.contains(rt))
            .filter_map(|rt| catalog::evaluate(rt, metrics))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FibonacciLevels, MacdValue, TimeframeCandle};
    use chrono::Utc;

    fn metrics_triggering_big_bull() -> Metrics {
        Metrics {
            symbol: "BTCUSDT".into(),
            timestamp: Utc::now(),
            last_price: 100.0,
            timeframe_1m: TimeframeCandle::default(),
            timeframe_5m: TimeframeCandle::default(),
            timeframe_15m: TimeframeCandle::default(),
            timeframe_1h: TimeframeCandle::default(),
            timeframe_4h: TimeframeCandle::default(),
            timeframe_8h: TimeframeCandle::default(),
            timeframe_1d: TimeframeCandle::default(),
            price_change_5m: 0.0,
            price_change_15m: 0.0,
            price_change_1h: 6.0,
            price_change_4h: 0.0,
            price_change_8h: 0.0,
            price_change_1d: 0.0,
            volume_ratio_5m: 0.0,
            volume_ratio_15m: 0.0,
            volume_ratio_1h: 2.0,
            volume_ratio_4h: 0.0,
            volume_ratio_8h: 0.0,
            vcp: 0.0,
            fibonacci: FibonacciLevels::default(),
            rsi: 50.0,
            macd: MacdValue::default(),
        }
    }

    #[test]
    fn disabled_rule_never_fires() {
        let engine = RuleEngine::new(&[AlertRule {
            rule_type: RuleType::FuturesBigBull60,
            enabled: false,
            config: serde_json::json!({}),
            description: "".into(),
        }]);
        assert!(engine.evaluate(&metrics_triggering_big_bull()).is_empty());
    }

    #[test]
    fn enabled_rule_fires_when_predicate_holds() {
        let engine = RuleEngine::new(&[AlertRule {
            rule_type: RuleType::FuturesBigBull60,
            enabled: true,
            config: serde_json::json!({}),
            description: "".into(),
        }]);
        let alerts = engine.evaluate(&metrics_triggering_big_bull());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_type, RuleType::FuturesBigBull60);
    }

    #[test]
    fn unloaded_rule_type_is_treated_as_disabled() {
        let engine = RuleEngine::new(&[]);
        assert!(engine.evaluate(&metrics_triggering_big_bull()).is_empty());
    }
}
