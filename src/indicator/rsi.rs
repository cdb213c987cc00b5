use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::round3;

const PERIOD: usize = 14;
const REQUIRED_CLOSES: usize = PERIOD + 1;

/// RSI-14, Wilder-free simple-average variant: recomputed fresh on every
/// tick over the last 15 closes, never smoothed across calls.
pub fn calculate(closes: &[f64]) -> Result<f64, Report<IndicatorError>> {
    if closes.len() < REQUIRED_CLOSES {
        bail!(IndicatorError::InsufficientData {
            required: REQUIRED_CLOSES,
            available: closes.len(),
        });
    }

    let window = &closes[closes.len() - REQUIRED_CLOSES..];
    let deltas: Vec<f64> = window.windows(2).map(|w| w[1] - w[0]).collect();

    let avg_gain = deltas.iter().map(|d| d.max(0.0)).sum::<f64>() / PERIOD as f64;
    let avg_loss = deltas.iter().map(|d| (-d).max(0.0)).sum::<f64>() / PERIOD as f64;

    Ok(round3(rsi_value(avg_gain, avg_loss)))
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}
