pub mod postgres;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::StorageError;
use crate::model::{Alert, AlertRule, Candle, Metrics};

/// The metadata store: `alert_rules`, read once at startup. `user_settings`
/// and `user_alert_subscriptions` are owned by the external UI gateway and
/// have no Rust-side counterpart here.
pub trait MetadataStore: Send + Sync {
    fn load_alert_rules(&self) -> BoxFuture<'_, Result<Vec<AlertRule>, Report<StorageError>>>;
}

/// The time-series store: raw candles, computed metrics, and alert history.
pub trait TimeseriesStore: Send + Sync {
    fn insert_candle(&self, candle: &Candle) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Batched insert, called once the Aggregator's persistence queue
    /// reaches its configured batch size.
    fn insert_metrics_batch(
        &self,
        batch: &[Metrics],
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    fn insert_alert(&self, alert: &Alert) -> BoxFuture<'_, Result<(), Report<StorageError>>>;
}
