use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use error_stack::{Report, ResultExt};
use tokio::sync::RwLock;
use tracing::warn;

use crate::bus::Bus;
use crate::error::AggregatorError;
use crate::indicator::macd::MacdSignalState;
use crate::indicator::{close_prices, fibonacci, macd, rsi, vcp};
use crate::model::{Candle, Metrics, TimeFrame};
use crate::ring_buffer::RingBuffer;
use crate::storage::TimeseriesStore;
use crate::timeframe;

const MIN_CANDLES_FOR_EMISSION: usize = 15;
const METRICS_SUBJECT: &str = "metrics.calculated";

struct SymbolState {
    ring: RingBuffer,
    macd_signal: Mutex<MacdSignalState>,
}

impl SymbolState {
    fn new() -> Self {
        Self {
            ring: RingBuffer::new(),
            macd_signal: Mutex::new(MacdSignalState::new()),
        }
    }
}

/// Owns a per-symbol ring buffer map and the indicator pipeline driven by
/// every incoming `Candle`. Persists raw candles and batches `Metrics` for
/// persistence; publishes each computed `Metrics` downstream.
pub struct Aggregator {
    symbols: RwLock<HashMap<String, Arc<SymbolState>>>,
    timeseries: Arc<dyn TimeseriesStore>,
    bus: Arc<dyn Bus>,
    batch: tokio::sync::Mutex<Vec<Metrics>>,
    batch_size: usize,
}

impl Aggregator {
    pub fn new(timeseries: Arc<dyn TimeseriesStore>, bus: Arc<dyn Bus>, batch_size: usize) -> Self {
        Self {
            symbols: RwLock::new(HashMap::new()),
            timeseries,
            bus,
            batch: tokio::sync::Mutex::new(Vec::new()),
            batch_size,
        }
    }

    async fn symbol_state(&self, symbol: &str) -> Arc<SymbolState> {
        if let Some(state) = self.symbols.read().await.get(symbol) {
            return state.clone();
        }
        let mut symbols = self.symbols.write().await;
        symbols
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(SymbolState::new()))
            .clone()
    }

    /// Drives the full per-candle pipeline: append, best-effort persist,
    /// compute once `Size >= 15`, enqueue for batched persistence, publish.
    pub async fn handle_candle(&self, candle: Candle) -> Result<(), Report<AggregatorError>> {
        let state = self.symbol_state(&candle.symbol).await;
        state.ring.append(candle.clone()).await;

        if let Err(e) = self.timeseries.insert_candle(&candle).await {
            warn!(symbol = %candle.symbol, error = ?e, "best-effort candle persist failed");
        }

        if state.ring.size().await < MIN_CANDLES_FOR_EMISSION {
            return Ok(());
        }

        let Some(metrics) = self.compute_metrics(&candle, &state).await else {
            return Ok(());
        };

        self.enqueue_for_persistence(metrics.clone()).await;

        let payload = serde_json::to_vec(&metrics).change_context(AggregatorError::Indicator {
            symbol: candle.symbol.clone(),
        })?;
        self.bus
            .publish(METRICS_SUBJECT, payload)
            .await
            .change_context(AggregatorError::Indicator {
                symbol: candle.symbol,
            })?;

        Ok(())
    }

    async fn compute_metrics(&self, candle: &Candle, state: &SymbolState) -> Option<Metrics> {
        let mut timeframe_candles = HashMap::new();
        for tf in TimeFrame::ALL {
            let window = state.ring.get_last(tf.minutes()).await;
            timeframe_candles.insert(tf, timeframe::aggregate(&window));
        }

        let tf_1m = timeframe_candles[&TimeFrame::Min1];
        let tf_5m = timeframe_candles[&TimeFrame::Min5];
        let tf_15m = timeframe_candles[&TimeFrame::Min15];
        let tf_1h = timeframe_candles[&TimeFrame::Hour1];
        let tf_4h = timeframe_candles[&TimeFrame::Hour4];
        let tf_8h = timeframe_candles[&TimeFrame::Hour8];
        let tf_1d = timeframe_candles[&TimeFrame::Day1];

        let rsi_window = state.ring.get_last(15).await;
        let rsi_value = match rsi::calculate(&close_prices(&rsi_window)) {
            Ok(v) => v,
            Err(e) => {
                warn!(symbol = %candle.symbol, error = ?e, "rsi calculation skipped");
                0.0
            }
        };

        let macd_window = state.ring.get_last(26).await;
        let macd_value = {
            let mut signal_state = state.macd_signal.lock().unwrap();
            match macd::calculate(&close_prices(&macd_window), &mut signal_state) {
                Ok(v) => v,
                Err(e) => {
                    warn!(symbol = %candle.symbol, error = ?e, "macd calculation skipped");
                    Default::default()
                }
            }
        };

        Some(Metrics {
            symbol: candle.symbol.clone(),
            timestamp: candle.close_time,
            last_price: candle.close,
            timeframe_1m: tf_1m,
            timeframe_5m: tf_5m,
            timeframe_15m: tf_15m,
            timeframe_1h: tf_1h,
            timeframe_4h: tf_4h,
            timeframe_8h: tf_8h,
            timeframe_1d: tf_1d,
            price_change_5m: timeframe::price_change(&tf_5m),
            price_change_15m: timeframe::price_change(&tf_15m),
            price_change_1h: timeframe::price_change(&tf_1h),
            price_change_4h: timeframe::price_change(&tf_4h),
            price_change_8h: timeframe::price_change(&tf_8h),
            price_change_1d: timeframe::price_change(&tf_1d),
            volume_ratio_5m: self.volume_ratio(state, 5).await,
            volume_ratio_15m: self.volume_ratio(state, 15).await,
            volume_ratio_1h: self.volume_ratio(state, 60).await,
            volume_ratio_4h: self.volume_ratio(state, 240).await,
            volume_ratio_8h: self.volume_ratio(state, 480).await,
            vcp: vcp::calculate(&tf_1m),
            fibonacci: fibonacci::calculate(&tf_1d),
            rsi: rsi_value,
            macd: macd_value,
        })
    }

    async fn volume_ratio(&self, state: &SymbolState, n: usize) -> f64 {
        let window = state.ring.get_last(2 * n).await;
        if window.len() < 2 * n {
            return 0.0;
        }
        let (prior, recent) = window.split_at(n);
        timeframe::volume_ratio(recent, prior, n)
    }

    async fn enqueue_for_persistence(&self, metrics: Metrics) {
        let mut batch = self.batch.lock().await;
        batch.push(metrics);
        if batch.len() >= self.batch_size {
            let flushed = std::mem::take(&mut *batch);
            drop(batch);
            if let Err(e) = self.timeseries.insert_metrics_batch(&flushed).await {
                warn!(error = ?e, batch_size = flushed.len(), "metrics batch persist failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BusError, StorageError};
    use chrono::Utc;
    use futures::future::BoxFuture;
    use futures::stream::BoxStream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullStore;

    impl TimeseriesStore for NullStore {
        fn insert_candle(
            &self,
            _candle: &Candle,
        ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
            Box::pin(async { Ok(()) })
        }

        fn insert_metrics_batch(
            &self,
            _batch: &[Metrics],
        ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
            Box::pin(async { Ok(()) })
        }

        fn insert_alert(
            &self,
            _alert: &crate::model::Alert,
        ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct CountingBus {
        published: AtomicUsize,
    }

    impl Bus for CountingBus {
        fn publish(
            &self,
            _subject: &str,
            _payload: Vec<u8>,
        ) -> BoxFuture<'_, Result<(), Report<BusError>>> {
            self.published.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn subscribe(
            &self,
            _subject: &str,
            _durable_name: &str,
        ) -> BoxFuture<'_, Result<BoxStream<'static, crate::bus::Delivery>, Report<BusError>>>
        {
            Box::pin(async { unimplemented!("not exercised in aggregator tests") })
        }
    }

    fn candle(symbol: &str, minute: i64, close: f64) -> Candle {
        let open_time = Utc::now() + chrono::Duration::minutes(minute);
        Candle {
            symbol: symbol.to_string(),
            open_time,
            close_time: open_time + chrono::Duration::seconds(60),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
            quote_volume: close,
            trades: 1,
        }
    }

    #[tokio::test]
    async fn no_emission_before_fifteen_candles() {
        let bus = Arc::new(CountingBus {
            published: AtomicUsize::new(0),
        });
        let store = Arc::new(NullStore);
        let aggregator = Aggregator::new(store, bus.clone(), 50);

        for i in 0..10 {
            aggregator
                .handle_candle(candle("BTCUSDT", i, 100.0 + i as f64))
                .await
                .unwrap();
        }
        assert_eq!(bus.published.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn emits_exactly_once_at_fifteenth_candle() {
        let bus = Arc::new(CountingBus {
            published: AtomicUsize::new(0),
        });
        let store = Arc::new(NullStore);
        let aggregator = Aggregator::new(store, bus.clone(), 50);

        for i in 0..15 {
            aggregator
                .handle_candle(candle("BTCUSDT", i, 100.0 + i as f64))
                .await
                .unwrap();
        }
        assert_eq!(bus.published.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn last_price_matches_candle_close() {
        let bus = Arc::new(CountingBus {
            published: AtomicUsize::new(0),
        });
        let store = Arc::new(NullStore);
        let aggregator = Aggregator::new(store, bus, 50);

        let mut last_candle = candle("BTCUSDT", 0, 100.0);
        for i in 0..15 {
            last_candle = candle("BTCUSDT", i, 100.0 + i as f64);
            aggregator.handle_candle(last_candle.clone()).await.unwrap();
        }

        let state = aggregator.symbol_state("BTCUSDT").await;
        let metrics = aggregator
            .compute_metrics(&last_candle, &state)
            .await
            .unwrap();
        assert_eq!(metrics.symbol, last_candle.symbol);
        assert_eq!(metrics.last_price, last_candle.close);
    }
}
