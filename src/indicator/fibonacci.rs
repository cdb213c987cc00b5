use crate::indicator::round3;
use crate::model::{FibonacciLevels, TimeframeCandle};

/// Classic Fibonacci pivot levels over the 1-day `TimeframeCandle`.
///
/// `pivot = (high+low+close)/3`, `range = high-low`; resistances at
/// `+0.382/+0.618/+1.0` multiples of `range`, supports symmetric below pivot.
pub fn calculate(candle: &TimeframeCandle) -> FibonacciLevels {
    let pivot = (candle.high + candle.low + candle.close) / 3.0;
    let range = candle.high - candle.low;

    FibonacciLevels {
        pivot: round3(pivot),
        r1: round3(pivot + range),
        r0_618: round3(pivot + 0.618 * range),
        r0_382: round3(pivot + 0.382 * range),
        s0_382: round3(pivot - 0.382 * range),
        s0_618: round3(pivot - 0.618 * range),
        s1: round3(pivot - range),
    }
}
