use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::ma::Ema;
use crate::indicator::round3;
use crate::model::MacdValue;

const FAST_PERIOD: usize = 12;
const SLOW_PERIOD: usize = 26;
const SIGNAL_PERIOD: usize = 9;

/// Per-symbol state carrying the MACD signal line's running EMA(9) across
/// ticks (the open question in spec.md §9, resolved as a true running EMA
/// rather than a value re-derived from a fixed window each call).
#[derive(Debug, Clone, Default)]
pub struct MacdSignalState {
    /// MACD line values collected while seeding the signal EMA.
    pending: Vec<f64>,
    ema: Option<f64>,
}

impl MacdSignalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one new MACD line value, returning the signal value for this
    /// tick. Seeds with the SMA of the first `SIGNAL_PERIOD` MACD values,
    /// matching the EMA seeding convention used elsewhere in this module.
    pub fn update(&mut self, macd_line: f64) -> f64 {
        if let Some(prev) = self.ema {
            let k = 2.0 / (SIGNAL_PERIOD as f64 + 1.0);
            let next = (macd_line - prev) * k + prev;
            self.ema = Some(next);
            return next;
        }

        self.pending.push(macd_line);
        if self.pending.len() < SIGNAL_PERIOD {
            return self.pending.iter().sum::<f64>() / self.pending.len() as f64;
        }

        let seed = self.pending.iter().sum::<f64>() / SIGNAL_PERIOD as f64;
        self.ema = Some(seed);
        self.pending.clear();
        seed
    }
}

/// Compute `{macd, signal, histogram}` for the current tick. `closes` must
/// hold at least the last 26 closes, oldest first. `signal_state` carries
/// the running signal EMA forward across calls for this symbol.
pub fn calculate(
    closes: &[f64],
    signal_state: &mut MacdSignalState,
) -> Result<MacdValue, Report<IndicatorError>> {
    if closes.len() < SLOW_PERIOD {
        bail!(IndicatorError::InsufficientData {
            required: SLOW_PERIOD,
            available: closes.len(),
        });
    }

    let window = &closes[closes.len() - SLOW_PERIOD..];
    let fast = Ema::new(FAST_PERIOD)?.calculate_prices(window)?;
    let slow = Ema::new(SLOW_PERIOD)?.calculate_prices(window)?;

    let macd_line = fast.last().copied().unwrap_or(0.0) - slow.last().copied().unwrap_or(0.0);
    let signal = signal_state.update(macd_line);
    let histogram = macd_line - signal;

    Ok(MacdValue {
        macd: round3(macd_line),
        signal: round3(signal),
        histogram: round3(histogram),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data() {
        let mut state = MacdSignalState::new();
        assert!(calculate(&[1.0; 20], &mut state).is_err());
    }

    #[test]
    fn flat_prices_yield_zero() {
        let mut state = MacdSignalState::new();
        let closes = [10.0_f64; 26];
        let value = calculate(&closes, &mut state).unwrap();
        assert_eq!(value.macd, 0.0);
        assert_eq!(value.signal, 0.0);
        assert_eq!(value.histogram, 0.0);
    }

    #[test]
    fn signal_state_persists_across_ticks() {
        let mut state = MacdSignalState::new();
        let rising: Vec<f64> = (1..=26).map(|i| i as f64).collect();
        let first = calculate(&rising, &mut state).unwrap();

        let mut next = rising.clone();
        next.remove(0);
        next.push(27.0);
        let second = calculate(&next, &mut state).unwrap();

        // Signal is a smoothed trailing value; it should lag the (larger)
        // second MACD line reading rather than equal it.
        assert_ne!(first.signal, second.signal);
        assert!(second.signal <= second.macd);
    }

    #[test]
    fn seeds_signal_after_nine_ticks() {
        let mut state = MacdSignalState::new();
        for i in 0..8 {
            let value = state.update(i as f64);
            assert!(state.ema.is_none(), "should not seed before 9 updates");
            let _ = value;
        }
        state.update(8.0);
        assert!(state.ema.is_some());
    }
}
