use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use futures::StreamExt;
use signal_core::aggregator::Aggregator;
use signal_core::bus::Bus;
use signal_core::bus::nats::NatsBus;
use signal_core::config::{self, AppConfig};
use signal_core::health::{self, ReadinessFlag};
use signal_core::model::Candle;
use signal_core::shutdown;
use signal_core::storage::TimeseriesStore;
use signal_core::storage::postgres::{self, PgTimeseriesStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Display, Error)]
enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("failed to connect to the message bus")]
    Bus,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "aggregator", about = "Ring buffer + indicator engine")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(&cli.config).change_context(AppError::Config)?;
    init_tracing(&config);

    let cancel = CancellationToken::new();
    let readiness = ReadinessFlag::new();

    let pool = postgres::connect(&config.timeseries_store.url)
        .await
        .change_context(AppError::Storage)?;
    let timeseries: Arc<dyn TimeseriesStore> = Arc::new(PgTimeseriesStore::new(pool));

    let bus: Arc<dyn Bus> = {
        let nats = NatsBus::connect(&config.bus.url)
            .await
            .change_context(AppError::Bus)?;
        nats.ensure_streams().await.change_context(AppError::Bus)?;
        Arc::new(nats)
    };

    let aggregator = Arc::new(Aggregator::new(
        Arc::clone(&timeseries),
        Arc::clone(&bus),
        config.general.metrics_persist_batch_size,
    ));

    let mut handles = Vec::new();

    let health_cancel = cancel.clone();
    let health_readiness = readiness.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = health::serve(
            config.general.metrics_port,
            health_readiness,
            async move { health_cancel.cancelled().await },
        )
        .await
        {
            warn!(error = ?e, "operational endpoint server exited");
        }
    }));

    let durable_name = format!("aggregator-{}", hostname());
    let mut deliveries = bus
        .subscribe("candles.1m.>", &durable_name)
        .await
        .change_context(AppError::Bus)?;

    readiness.mark_ready();
    info!("aggregator started");

    let consume_cancel = cancel.clone();
    let consume_aggregator = Arc::clone(&aggregator);
    handles.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = consume_cancel.cancelled() => break,
                delivery = deliveries.next() => {
                    let Some(delivery) = delivery else { break };
                    match serde_json::from_slice::<Candle>(&delivery.payload) {
                        Ok(candle) => {
                            if let Err(e) = consume_aggregator.handle_candle(candle).await {
                                warn!(error = ?e, "candle handling failed, leaving message un-acked");
                                continue;
                            }
                            if let Err(e) = delivery.ack().await {
                                warn!(error = ?e, "failed to ack candle message");
                            }
                        }
                        Err(e) => {
                            warn!(error = ?e, "malformed candle payload, dropping and acking");
                            let _ = delivery.ack().await;
                        }
                    }
                }
            }
        }
    }));

    shutdown::wait_for_shutdown_signal(cancel).await;
    shutdown::drain(handles).await;
    info!("aggregator shutdown complete");
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
