use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Candle timeframe supported by the aggregator.
///
/// String representations match the wire/config format (e.g. `"1m"`, `"1h"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    Min1,
    Min5,
    Min15,
    Hour1,
    Hour4,
    Hour8,
    Day1,
}

impl TimeFrame {
    /// All seven timeframes the aggregator derives from the 1m ring buffer,
    /// in ascending order.
    pub const ALL: [TimeFrame; 7] = [
        TimeFrame::Min1,
        TimeFrame::Min5,
        TimeFrame::Min15,
        TimeFrame::Hour1,
        TimeFrame::Hour4,
        TimeFrame::Hour8,
        TimeFrame::Day1,
    ];

    /// Parse a config/wire-format string into a `TimeFrame`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::Min1),
            "5m" => Some(Self::Min5),
            "15m" => Some(Self::Min15),
            "1h" => Some(Self::Hour1),
            "4h" => Some(Self::Hour4),
            "8h" => Some(Self::Hour8),
            "1d" => Some(Self::Day1),
            _ => None,
        }
    }

    /// Return the config/wire-format string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Hour1 => "1h",
            Self::Hour4 => "4h",
            Self::Hour8 => "8h",
            Self::Day1 => "1d",
        }
    }

    /// Number of 1-minute candles a window of this timeframe spans.
    pub fn minutes(self) -> usize {
        match self {
            Self::Min1 => 1,
            Self::Min5 => 5,
            Self::Min15 => 15,
            Self::Hour1 => 60,
            Self::Hour4 => 240,
            Self::Hour8 => 480,
            Self::Day1 => 1440,
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable 1-minute OHLCV candle, the unit the Ingestor emits and the
/// Aggregator's ring buffer stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trades: u64,
}

impl Candle {
    /// `true` when the candle satisfies the invariants of spec.md §3:
    /// `low <= open,close <= high`, `low <= high`, `volume >= 0`.
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.low <= self.high
            && self.volume >= 0.0
    }
}

/// Aggregated OHLCV over a trailing window of 1-minute candles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeframeCandle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Classic Fibonacci pivot levels computed off the daily `TimeframeCandle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FibonacciLevels {
    pub pivot: f64,
    pub r1: f64,
    #[serde(rename = "r0.618")]
    pub r0_618: f64,
    #[serde(rename = "r0.382")]
    pub r0_382: f64,
    #[serde(rename = "s0.382")]
    pub s0_382: f64,
    #[serde(rename = "s0.618")]
    pub s0_618: f64,
    pub s1: f64,
}

/// MACD(12,26,9) line/signal/histogram triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Per-candle computed metrics, emitted by the Aggregator on
/// `metrics.calculated` once a symbol's ring buffer holds >= 15 entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub last_price: f64,

    pub timeframe_1m: TimeframeCandle,
    pub timeframe_5m: TimeframeCandle,
    pub timeframe_15m: TimeframeCandle,
    pub timeframe_1h: TimeframeCandle,
    pub timeframe_4h: TimeframeCandle,
    pub timeframe_8h: TimeframeCandle,
    pub timeframe_1d: TimeframeCandle,

    pub price_change_5m: f64,
    pub price_change_15m: f64,
    pub price_change_1h: f64,
    pub price_change_4h: f64,
    pub price_change_8h: f64,
    pub price_change_1d: f64,

    pub volume_ratio_5m: f64,
    pub volume_ratio_15m: f64,
    pub volume_ratio_1h: f64,
    pub volume_ratio_4h: f64,
    pub volume_ratio_8h: f64,

    pub vcp: f64,
    pub fibonacci: FibonacciLevels,
    pub rsi: f64,
    pub macd: MacdValue,
}

impl Metrics {
    /// Look up the `TimeframeCandle` for a given timeframe.
    pub fn timeframe(&self, tf: TimeFrame) -> TimeframeCandle {
        match tf {
            TimeFrame::Min1 => self.timeframe_1m,
            TimeFrame::Min5 => self.timeframe_5m,
            TimeFrame::Min15 => self.timeframe_15m,
            TimeFrame::Hour1 => self.timeframe_1h,
            TimeFrame::Hour4 => self.timeframe_4h,
            TimeFrame::Hour8 => self.timeframe_8h,
            TimeFrame::Day1 => self.timeframe_1d,
        }
    }
}

/// The ten hard-coded rule identifiers (spec.md §4.3). A closed, exhaustive
/// set — never extended by config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    FuturesBigBull60,
    FuturesBigBear60,
    FuturesPioneerBull,
    FuturesPioneerBear,
    Futures5BigBull,
    Futures5BigBear,
    Futures15BigBull,
    Futures15BigBear,
    FuturesBottomHunter,
    FuturesTopHunter,
}

impl RuleType {
    pub const ALL: [RuleType; 10] = [
        RuleType::FuturesBigBull60,
        RuleType::FuturesBigBear60,
        RuleType::FuturesPioneerBull,
        RuleType::FuturesPioneerBear,
        RuleType::Futures5BigBull,
        RuleType::Futures5BigBear,
        RuleType::Futures15BigBull,
        RuleType::Futures15BigBear,
        RuleType::FuturesBottomHunter,
        RuleType::FuturesTopHunter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FuturesBigBull60 => "futures_big_bull_60",
            Self::FuturesBigBear60 => "futures_big_bear_60",
            Self::FuturesPioneerBull => "futures_pioneer_bull",
            Self::FuturesPioneerBear => "futures_pioneer_bear",
            Self::Futures5BigBull => "futures_5_big_bull",
            Self::Futures5BigBear => "futures_5_big_bear",
            Self::Futures15BigBull => "futures_15_big_bull",
            Self::Futures15BigBear => "futures_15_big_bear",
            Self::FuturesBottomHunter => "futures_bottom_hunter",
            Self::FuturesTopHunter => "futures_top_hunter",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Row loaded from the `alert_rules` metadata table at startup.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub rule_type: RuleType,
    pub enabled: bool,
    pub config: serde_json::Value,
    pub description: String,
}

/// An accepted, cooldown-cleared alert, persisted and fanned out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: uuid::Uuid,
    pub symbol: String,
    pub rule_type: RuleType,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub message: String,
    pub metadata: serde_json::Value,
}
