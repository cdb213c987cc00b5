pub mod binance;

use error_stack::Report;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::IngestError;
use crate::model::Candle;

/// The Ingestor's upstream boundary. A single perpetual-futures venue in
/// this deployment, but kept as a trait so the ingestor binary and its
/// tests don't depend on a live network connection.
pub trait Exchange: Send + Sync {
    /// Fetch up to `limit` of the most recent closed 1-minute candles for
    /// `symbol`, used to pre-fill a symbol's ring buffer on startup.
    fn fetch_recent_candles(
        &self,
        symbol: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<IngestError>>>;

    /// Stream closed 1-minute candles for `symbols` onto `tx` until
    /// `cancel` fires. Reconnects with backoff on transport failure;
    /// only returns `Err` if told to stop while already disconnected.
    fn stream_candles(
        &self,
        symbols: &[String],
        tx: mpsc::Sender<Candle>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), Report<IngestError>>>;
}
