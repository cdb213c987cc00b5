use serde_json::json;
use uuid::Uuid;

use crate::model::{Alert, Metrics, RuleType};

/// Dispatch one of the ten hard-coded rule predicates against `metrics`.
/// Thresholds are chosen per spec.md's Open Question #2 resolution (the
/// reference frontend's exact formulas are not available in this pack) and
/// recorded per-rule in DESIGN.md.
pub fn evaluate(rule_type: RuleType, metrics: &Metrics) -> Option<Alert> {
    let triggered = match rule_type {
        RuleType::FuturesBigBull60 => big_bull_60(metrics),
        RuleType::FuturesBigBear60 => big_bear_60(metrics),
        RuleType::FuturesPioneerBull => pioneer_bull(metrics),
        RuleType::FuturesPioneerBear => pioneer_bear(metrics),
        RuleType::Futures5BigBull => five_big_bull(metrics),
        RuleType::Futures5BigBear => five_big_bear(metrics),
        RuleType::Futures15BigBull => fifteen_big_bull(metrics),
        RuleType::Futures15BigBear => fifteen_big_bear(metrics),
        RuleType::FuturesBottomHunter => bottom_hunter(metrics),
        RuleType::FuturesTopHunter => top_hunter(metrics),
    };

    triggered.map(|message| Alert {
        id: Uuid::new_v4(),
        symbol: metrics.symbol.clone(),
        rule_type,
        timestamp: metrics.timestamp,
        price: metrics.last_price,
        message,
        metadata: json!({
            "price_change_1h": metrics.price_change_1h,
            "price_change_15m": metrics.price_change_15m,
            "price_change_5m": metrics.price_change_5m,
            "volume_ratio_1h": metrics.volume_ratio_1h,
            "volume_ratio_15m": metrics.volume_ratio_15m,
            "volume_ratio_5m": metrics.volume_ratio_5m,
            "rsi": metrics.rsi,
            "macd": metrics.macd,
            "vcp": metrics.vcp,
        }),
    })
}

/// Large 1h move confirmed by above-average 1h volume.
fn big_bull_60(m: &Metrics) -> Option<String> {
    (m.price_change_1h >= 5.0 && m.volume_ratio_1h >= 1.5)
        .then(|| format!("{} up {:.2}% over 1h on {:.1}x volume", m.symbol, m.price_change_1h, m.volume_ratio_1h))
}

fn big_bear_60(m: &Metrics) -> Option<String> {
    (m.price_change_1h <= -5.0 && m.volume_ratio_1h >= 1.5)
        .then(|| format!("{} down {:.2}% over 1h on {:.1}x volume", m.symbol, m.price_change_1h, m.volume_ratio_1h))
}

/// Early bullish momentum shift: 15m breakout confirmed by MACD turning
/// positive while RSI has room before overbought.
fn pioneer_bull(m: &Metrics) -> Option<String> {
    (m.price_change_15m >= 3.0 && m.macd.histogram > 0.0 && (50.0..70.0).contains(&m.rsi))
        .then(|| format!("{} early bull breakout: 15m {:.2}%, RSI {:.1}", m.symbol, m.price_change_15m, m.rsi))
}

fn pioneer_bear(m: &Metrics) -> Option<String> {
    (m.price_change_15m <= -3.0 && m.macd.histogram < 0.0 && (30.0..50.0).contains(&m.rsi))
        .then(|| format!("{} early bear breakdown: 15m {:.2}%, RSI {:.1}", m.symbol, m.price_change_15m, m.rsi))
}

fn five_big_bull(m: &Metrics) -> Option<String> {
    (m.price_change_5m >= 2.0 && m.volume_ratio_5m >= 2.0)
        .then(|| format!("{} up {:.2}% over 5m on {:.1}x volume", m.symbol, m.price_change_5m, m.volume_ratio_5m))
}

fn five_big_bear(m: &Metrics) -> Option<String> {
    (m.price_change_5m <= -2.0 && m.volume_ratio_5m >= 2.0)
        .then(|| format!("{} down {:.2}% over 5m on {:.1}x volume", m.symbol, m.price_change_5m, m.volume_ratio_5m))
}

fn fifteen_big_bull(m: &Metrics) -> Option<String> {
    (m.price_change_15m >= 4.0 && m.volume_ratio_15m >= 1.8)
        .then(|| format!("{} up {:.2}% over 15m on {:.1}x volume", m.symbol, m.price_change_15m, m.volume_ratio_15m))
}

fn fifteen_big_bear(m: &Metrics) -> Option<String> {
    (m.price_change_15m <= -4.0 && m.volume_ratio_15m >= 1.8)
        .then(|| format!("{} down {:.2}% over 15m on {:.1}x volume", m.symbol, m.price_change_15m, m.volume_ratio_15m))
}

/// RSI oversold with price resting on the daily S1 support.
fn bottom_hunter(m: &Metrics) -> Option<String> {
    (m.rsi <= 30.0 && near(m.last_price, m.fibonacci.s1, 0.005))
        .then(|| format!("{} oversold (RSI {:.1}) near S1 {:.3}", m.symbol, m.rsi, m.fibonacci.s1))
}

/// RSI overbought with price pressing on the daily R1 resistance.
fn top_hunter(m: &Metrics) -> Option<String> {
    (m.rsi >= 70.0 && near(m.last_price, m.fibonacci.r1, 0.005))
        .then(|| format!("{} overbought (RSI {:.1}) near R1 {:.3}", m.symbol, m.rsi, m.fibonacci.r1))
}

/// `true` when `value` is within `pct` (fractional) of `target`.
fn near(value: f64, target: f64, pct: f64) -> bool {
    if target == 0.0 {
        return value == 0.0;
    }
    ((value - target) / target).abs() <= pct
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FibonacciLevels, MacdValue, TimeframeCandle};
    use chrono::Utc;

    fn base_metrics() -> Metrics {
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
            price_change_1h: 0.0,
            price_change_4h: 0.0,
            price_change_8h: 0.0,
            price_change_1d: 0.0,
            volume_ratio_5m: 0.0,
            volume_ratio_15m: 0.0,
            volume_ratio_1h: 0.0,
            volume_ratio_4h: 0.0,
            volume_ratio_8h: 0.0,
            vcp: 0.0,
            fibonacci: FibonacciLevels::default(),
            rsi: 50.0,
            macd: MacdValue::default(),
        }
    }

    #[test]
    fn big_bull_60_requires_both_conditions() {
        let mut m = base_metrics();
        m.price_change_1h = 6.0;
        assert!(evaluate(RuleType::FuturesBigBull60, &m).is_none());
        m.volume_ratio_1h = 2.0;
        assert!(evaluate(RuleType::FuturesBigBull60, &m).is_some());
    }

    #[test]
    fn big_bear_60_symmetric() {
        let mut m = base_metrics();
        m.price_change_1h = -6.0;
        m.volume_ratio_1h = 2.0;
        assert!(evaluate(RuleType::FuturesBigBear60, &m).is_some());
        assert!(evaluate(RuleType::FuturesBigBull60, &m).is_none());
    }

    #[test]
    fn bottom_hunter_requires_oversold_and_s1_proximity() {
        let mut m = base_metrics();
        m.rsi = 25.0;
        m.fibonacci.s1 = 99.6;
        m.last_price = 100.0;
        assert!(evaluate(RuleType::FuturesBottomHunter, &m).is_some());
        m.last_price = 120.0;
        assert!(evaluate(RuleType::FuturesBottomHunter, &m).is_none());
    }

    #[test]
    fn top_hunter_requires_overbought_and_r1_proximity() {
        let mut m = base_metrics();
        m.rsi = 75.0;
        m.fibonacci.r1 = 100.3;
        m.last_price = 100.0;
        assert!(evaluate(RuleType::FuturesTopHunter, &m).is_some());
    }

    #[test]
    fn all_rule_types_have_a_dispatch_arm() {
        let m = base_metrics();
        for rt in RuleType::ALL {
            // Should not panic for any rule type, triggered or not.
            let _ = evaluate(rt, &m);
        }
    }
}
