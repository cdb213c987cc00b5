use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::exchange::Exchange;
use crate::model::Candle;

const BINANCE_FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const BINANCE_FUTURES_WS_BASE: &str = "wss://fstream.binance.com/stream";
const MAX_CANDLES_PER_REQUEST: usize = 1000;
// Reconnect before Binance's 24-hour auto-disconnect.
const WS_RECONNECT_SECS: u64 = 23 * 60 * 60;
const MAX_BACKOFF_SECS: u64 = 60;
/// Kline REST endpoint costs weight 2; stay well under the 2400 weight/min
/// futures limit.
const BINANCE_REQUESTS_PER_SECOND: u32 = 15;

pub struct BinanceExchange {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl BinanceExchange {
    pub fn new() -> Self {
        let quota = Quota::per_second(NonZeroU32::new(BINANCE_REQUESTS_PER_SECOND).unwrap());
        Self {
            client: reqwest::Client::new(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }
}

impl Default for BinanceExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl Exchange for BinanceExchange {
    fn fetch_recent_candles(
        &self,
        symbol: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<IngestError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let url = format!("{}/fapi/v1/klines", BINANCE_FUTURES_BASE_URL);
            let fetch_limit = limit.min(MAX_CANDLES_PER_REQUEST);
            let limit_str = fetch_limit.to_string();
            let params = [
                ("symbol", symbol.as_str()),
                ("interval", "1m"),
                ("limit", limit_str.as_str()),
            ];

            let response = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await
                .change_context(IngestError::Request)?;

            if !response.status().is_success() {
                return Err(Report::new(IngestError::Request)
                    .attach(format!("HTTP status: {}", response.status())));
            }

            let raw: Vec<BinanceKlineRow> = response
                .json()
                .await
                .change_context(IngestError::ResponseParse)?;

            info!(symbol = %symbol, fetched = raw.len(), "binance backfill fetch complete");

            raw.into_iter()
                .map(|row| row.into_candle(&symbol))
                .collect()
        })
    }

    fn stream_candles(
        &self,
        symbols: &[String],
        tx: mpsc::Sender<Candle>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<IngestError>>> {
        let symbols = symbols.to_vec();
        Box::pin(async move {
            let mut backoff = Duration::from_secs(1);

            loop {
                if cancel.is_cancelled() {
                    break;
                }

                match run_kline_ws(&symbols, &tx, &cancel).await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(error = %e, "binance kline ws disconnected, retrying");
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
                        continue;
                    }
                }
            }
            Ok(())
        })
    }
}

async fn run_kline_ws(
    symbols: &[String],
    tx: &mpsc::Sender<Candle>,
    cancel: &CancellationToken,
) -> Result<(), Report<IngestError>> {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@kline_1m", s.to_lowercase()))
        .collect();
    let ws_url = format!("{}?streams={}", BINANCE_FUTURES_WS_BASE, streams.join("/"));

    let (ws_stream, _) = connect_async(&ws_url)
        .await
        .change_context(IngestError::Connection)?;

    let (mut write, mut read) = ws_stream.split();

    info!(symbols = ?symbols, "binance kline ws connected");

    let reconnect_timer = tokio::time::sleep(Duration::from_secs(WS_RECONNECT_SECS));
    tokio::pin!(reconnect_timer);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("binance kline ws cancelled");
                break;
            }
            _ = &mut reconnect_timer => {
                info!("binance kline ws 23h limit reached, reconnecting");
                return Err(Report::new(IngestError::Connection)
                    .attach("scheduled 23h reconnect"));
            }
            msg = read.next() => {
                match msg {
                    None => break,
                    Some(Err(e)) => {
                        return Err(Report::new(e).change_context(IngestError::Connection));
                    }
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<BinanceCombinedMsg<BinanceKlineMsg>>(&text) {
                            Ok(combined) => {
                                // Only forward closed candles; Binance streams the
                                // in-progress candle on every trade.
                                if combined.data.kline.is_closed {
                                    let candle = combined.data.kline.into_candle();
                                    if tx.send(candle).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, raw = %text, "binance kline parse error");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    Ok(())
}

// ── REST response types ─────────────────────────────────────────────────

/// Binance kline row: 12-element array
/// [open_time, open, high, low, close, volume, close_time, quote_volume, trades, ...]
#[derive(Debug, Deserialize)]
struct BinanceKlineRow(
    i64,                        // 0: open_time (ms)
    String,                     // 1: open
    String,                     // 2: high
    String,                     // 3: low
    String,                     // 4: close
    String,                     // 5: volume
    i64,                        // 6: close_time (ms)
    String,                     // 7: quote asset volume
    u64,                        // 8: number of trades
    #[allow(dead_code)] String, // 9: taker buy base volume
    #[allow(dead_code)] String, // 10: taker buy quote volume
    #[allow(dead_code)] String, // 11: ignore
);

impl BinanceKlineRow {
    fn into_candle(self, symbol: &str) -> Result<Candle, Report<IngestError>> {
        let parse_f64 =
            |s: &str| -> Result<f64, Report<IngestError>> {
                s.parse::<f64>().change_context(IngestError::ResponseParse)
            };

        let open_time = DateTime::from_timestamp_millis(self.0).unwrap_or_else(Utc::now);
        let close_time = DateTime::from_timestamp_millis(self.6).unwrap_or_else(Utc::now);

        Ok(Candle {
            symbol: symbol.to_owned(),
            open_time,
            close_time,
            open: parse_f64(&self.1)?,
            high: parse_f64(&self.2)?,
            low: parse_f64(&self.3)?,
            close: parse_f64(&self.4)?,
            volume: parse_f64(&self.5)?,
            quote_volume: parse_f64(&self.7)?,
            trades: self.8,
        })
    }
}

// ── WebSocket message types ─────────────────────────────────────────────

/// Combined stream wrapper: `{ "stream": "...", "data": { ... } }`
#[derive(Debug, Deserialize)]
struct BinanceCombinedMsg<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct BinanceKlineMsg {
    #[serde(rename = "k")]
    kline: BinanceKlinePayload,
}

#[derive(Debug, Deserialize)]
struct BinanceKlinePayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "q")]
    quote_volume: String,
    #[serde(rename = "n")]
    trades: u64,
    /// `true` once this kline interval has closed.
    #[serde(rename = "x")]
    is_closed: bool,
}

impl BinanceKlinePayload {
    fn into_candle(self) -> Candle {
        Candle {
            symbol: self.symbol,
            open_time: DateTime::from_timestamp_millis(self.open_time).unwrap_or_else(Utc::now),
            close_time: DateTime::from_timestamp_millis(self.close_time).unwrap_or_else(Utc::now),
            open: self.open.parse().unwrap_or(0.0),
            high: self.high.parse().unwrap_or(0.0),
            low: self.low.parse().unwrap_or(0.0),
            close: self.close.parse().unwrap_or(0.0),
            volume: self.volume.parse().unwrap_or(0.0),
            quote_volume: self.quote_volume.parse().unwrap_or(0.0),
            trades: self.trades,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_kline_row_parses_into_candle() {
        let row = BinanceKlineRow(
            1704067200000,
            "42000.0".into(),
            "43000.0".into(),
            "41500.0".into(),
            "42500.0".into(),
            "100.5".into(),
            1704067259999,
            "4250000.0".into(),
            321,
            "0".into(),
            "0".into(),
            "0".into(),
        );
        let candle = row.into_candle("BTCUSDT").unwrap();
        assert_eq!(candle.symbol, "BTCUSDT");
        assert_eq!(candle.open, 42000.0);
        assert_eq!(candle.close, 42500.0);
        assert_eq!(candle.volume, 100.5);
        assert_eq!(candle.trades, 321);
        assert!(candle.is_valid());
    }

    #[test]
    fn kline_payload_only_forwarded_when_closed() {
        let text = r#"{
            "stream": "btcusdt@kline_1m",
            "data": {
                "k": {
                    "s": "BTCUSDT", "t": 1704067200000, "T": 1704067259999,
                    "o": "42000.0", "h": "43000.0", "l": "41500.0", "c": "42500.0",
                    "v": "100.5", "q": "4250000.0", "n": 321, "x": false
                }
            }
        }"#;
        let combined: BinanceCombinedMsg<BinanceKlineMsg> = serde_json::from_str(text).unwrap();
        assert!(!combined.data.kline.is_closed);
    }

    /// Integration test: requires network access. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_fetch_recent_candles() {
        let exchange = BinanceExchange::new();
        let candles = exchange
            .fetch_recent_candles("BTCUSDT", 10)
            .await
            .unwrap();
        assert!(!candles.is_empty());
        assert!(candles.len() <= 10);
    }
}
