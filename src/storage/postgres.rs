use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::PgPool;

use crate::error::StorageError;
use crate::model::{Alert, AlertRule, Candle, Metrics, RuleType};
use crate::storage::{MetadataStore, TimeseriesStore};

/// Opens a Postgres pool and runs the workspace migrations. Shared by both
/// the metadata and time-series stores — in a single-node deployment they
/// may point at the same database, or be split across two.
pub async fn connect(url: &str) -> Result<PgPool, Report<StorageError>> {
    let pool = PgPool::connect(url)
        .await
        .change_context(StorageError::Migration)
        .attach_with(|| "connecting to postgres".to_string())?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .change_context(StorageError::Migration)?;

    Ok(pool)
}

pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl MetadataStore for PgMetadataStore {
    fn load_alert_rules(&self) -> BoxFuture<'_, Result<Vec<AlertRule>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<(String, bool, serde_json::Value, String)> = sqlx::query_as(
                "SELECT rule_type, enabled, config, description FROM alert_rules",
            )
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(rows
                .into_iter()
                .filter_map(|(rule_type, enabled, config, description)| {
                    RuleType::from_str(&rule_type).map(|rule_type| AlertRule {
                        rule_type,
                        enabled,
                        config,
                        description,
                    })
                })
                .collect())
        })
    }
}

pub struct PgTimeseriesStore {
    pool: PgPool,
}

impl PgTimeseriesStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl TimeseriesStore for PgTimeseriesStore {
    fn insert_candle(&self, candle: &Candle) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let candle = candle.clone();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO candles_1m \
                 (time, symbol, open, high, low, close, volume, quote_volume, trades) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (time, symbol) DO UPDATE SET \
                 open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
                 close = EXCLUDED.close, volume = EXCLUDED.volume, \
                 quote_volume = EXCLUDED.quote_volume, trades = EXCLUDED.trades",
            )
            .bind(candle.open_time)
            .bind(&candle.symbol)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .bind(candle.quote_volume)
            .bind(candle.trades as i64)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn insert_metrics_batch(
        &self,
        batch: &[Metrics],
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let batch = batch.to_vec();
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .change_context(StorageError::Insert)?;

            for m in &batch {
                for tf in crate::model::TimeFrame::ALL {
                    let candle = m.timeframe(tf);
                    sqlx::query(
                        "INSERT INTO metrics_calculated \
                         (time, symbol, timeframe, open, high, low, close, volume, \
                          price_change, volume_ratio, vcp, rsi_14, macd, macd_signal, \
                          fib_pivot, fib_r1, fib_s1) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
                         ON CONFLICT (time, symbol, timeframe) DO NOTHING",
                    )
                    .bind(m.timestamp)
                    .bind(&m.symbol)
                    .bind(tf.as_str())
                    .bind(candle.open)
                    .bind(candle.high)
                    .bind(candle.low)
                    .bind(candle.close)
                    .bind(candle.volume)
                    .bind(price_change_for(m, tf))
                    .bind(volume_ratio_for(m, tf))
                    .bind(m.vcp)
                    .bind(m.rsi)
                    .bind(m.macd.macd)
                    .bind(m.macd.signal)
                    .bind(m.fibonacci.pivot)
                    .bind(m.fibonacci.r1)
                    .bind(m.fibonacci.s1)
                    .execute(&mut *tx)
                    .await
                    .change_context(StorageError::Insert)?;
                }
            }

            tx.commit().await.change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn insert_alert(&self, alert: &Alert) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let alert = alert.clone();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO alert_history \
                 (id, created_at, symbol, rule_type, price, message, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(alert.id)
            .bind(alert.timestamp)
            .bind(&alert.symbol)
            .bind(alert.rule_type.as_str())
            .bind(alert.price)
            .bind(&alert.message)
            .bind(&alert.metadata)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;
            Ok(())
        })
    }
}

/// `metrics_calculated` carries one `price_change`/`volume_ratio` pair per
/// row; 1m has neither in `Metrics` (the six/five timeframe-specific fields
/// start at 5m), so both are 0 there.
fn price_change_for(m: &Metrics, tf: crate::model::TimeFrame) -> f64 {
    use crate::model::TimeFrame::*;
    match tf {
        Min1 => 0.0,
        Min5 => m.price_change_5m,
        Min15 => m.price_change_15m,
        Hour1 => m.price_change_1h,
        Hour4 => m.price_change_4h,
        Hour8 => m.price_change_8h,
        Day1 => m.price_change_1d,
    }
}

fn volume_ratio_for(m: &Metrics, tf: crate::model::TimeFrame) -> f64 {
    use crate::model::TimeFrame::*;
    match tf {
        Min1 => 0.0,
        Min5 => m.volume_ratio_5m,
        Min15 => m.volume_ratio_15m,
        Hour1 => m.volume_ratio_1h,
        Hour4 => m.volume_ratio_4h,
        Hour8 => m.volume_ratio_8h,
        Day1 => 0.0,
    }
}
