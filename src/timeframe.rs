use crate::model::{Candle, TimeframeCandle};

/// Aggregate a chronologically-ordered slice of 1-minute candles into a
/// single `TimeframeCandle`: `open` of the first slot, `close` of the last,
/// `high`/`low` across all slots, `volume` summed.
///
/// Returns the zero value when `candles` is empty (callers only invoke
/// this once `Size >= 1`, but an empty partial window is still well-defined).
pub fn aggregate(candles: &[Candle]) -> TimeframeCandle {
    let Some(first) = candles.first() else {
        return TimeframeCandle::default();
    };
    let last = candles.last().unwrap();

    let high = candles.iter().fold(first.high, |acc, c| acc.max(c.high));
    let low = candles.iter().fold(first.low, |acc, c| acc.min(c.low));
    let volume = candles.iter().map(|c| c.volume).sum();

    TimeframeCandle {
        open: first.open,
        high,
        low,
        close: last.close,
        volume,
    }
}

/// `(close - open) / open * 100`; 0 if `open == 0`.
pub fn price_change(candle: &TimeframeCandle) -> f64 {
    if candle.open == 0.0 {
        return 0.0;
    }
    (candle.close - candle.open) / candle.open * 100.0
}

/// Volume ratio for a timeframe of `n` minutes: sum of `quote_volume` over
/// the last `n` slots divided by the sum over the prior `n` slots. `recent`
/// and `prior` must each hold exactly `n` slots drawn from the ring buffer
/// (oldest first); 0 when either window is short or the prior sum is 0.
pub fn volume_ratio(recent: &[Candle], prior: &[Candle], n: usize) -> f64 {
    if recent.len() < n || prior.len() < n {
        return 0.0;
    }
    let recent_sum: f64 = recent.iter().map(|c| c.quote_volume).sum();
    let prior_sum: f64 = prior.iter().map(|c| c.quote_volume).sum();
    if prior_sum == 0.0 {
        return 0.0;
    }
    recent_sum / prior_sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            open_time: Utc::now(),
            close_time: Utc::now() + chrono::Duration::seconds(60),
            open,
            high,
            low,
            close,
            volume,
            quote_volume: volume,
            trades: 1,
        }
    }

    #[test]
    fn aggregate_takes_first_open_last_close_extremes_and_summed_volume() {
        let candles = vec![
            candle(10.0, 12.0, 9.0, 11.0, 1.0),
            candle(11.0, 13.0, 10.0, 12.0, 2.0),
            candle(12.0, 14.0, 11.0, 13.0, 3.0),
        ];
        let tf = aggregate(&candles);
        assert_eq!(tf.open, 10.0);
        assert_eq!(tf.close, 13.0);
        assert_eq!(tf.high, 14.0);
        assert_eq!(tf.low, 9.0);
        assert_eq!(tf.volume, 6.0);
    }

    #[test]
    fn aggregate_empty_is_default() {
        assert_eq!(aggregate(&[]), TimeframeCandle::default());
    }

    #[test]
    fn price_change_zero_open_is_zero() {
        let tf = TimeframeCandle {
            open: 0.0,
            high: 1.0,
            low: 0.0,
            close: 1.0,
            volume: 1.0,
        };
        assert_eq!(price_change(&tf), 0.0);
    }

    #[test]
    fn price_change_known_value() {
        let tf = TimeframeCandle {
            open: 100.0,
            high: 110.0,
            low: 95.0,
            close: 110.0,
            volume: 1.0,
        };
        assert_eq!(price_change(&tf), 10.0);
    }

    #[test]
    fn volume_ratio_insufficient_history_is_zero() {
        let recent = vec![candle(1.0, 1.0, 1.0, 1.0, 5.0)];
        let prior = vec![];
        assert_eq!(volume_ratio(&recent, &prior, 5), 0.0);
    }

    #[test]
    fn volume_ratio_zero_prior_sum_is_zero() {
        let recent = vec![candle(1.0, 1.0, 1.0, 1.0, 5.0)];
        let prior = vec![candle(1.0, 1.0, 1.0, 1.0, 0.0)];
        assert_eq!(volume_ratio(&recent, &prior, 1), 0.0);
    }

    #[test]
    fn volume_ratio_known_value() {
        let recent = vec![candle(1.0, 1.0, 1.0, 1.0, 10.0)];
        let prior = vec![candle(1.0, 1.0, 1.0, 1.0, 5.0)];
        assert_eq!(volume_ratio(&recent, &prior, 1), 2.0);
    }
}
