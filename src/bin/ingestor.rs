use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use signal_core::bus::Bus;
use signal_core::bus::nats::NatsBus;
use signal_core::config::{self, AppConfig};
use signal_core::exchange::Exchange;
use signal_core::exchange::binance::BinanceExchange;
use signal_core::health::{self, ReadinessFlag};
use signal_core::model::Candle;
use signal_core::shutdown;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Display, Error)]
enum AppError {
    #[display("configuration error")]
    Config,
    #[display("failed to connect to the message bus")]
    Bus,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "ingestor", about = "Exchange kline ingestion boundary")]
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

    let bus: Arc<dyn Bus> = {
        let nats = NatsBus::connect(&config.bus.url)
            .await
            .change_context(AppError::Bus)?;
        nats.ensure_streams().await.change_context(AppError::Bus)?;
        Arc::new(nats)
    };

    let exchange: Arc<dyn Exchange> = Arc::new(BinanceExchange::new());

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

    backfill_symbols(&config, exchange.as_ref(), bus.as_ref()).await;

    let (tx, mut rx) = mpsc::channel::<Candle>(4096);

    let stream_cancel = cancel.clone();
    let stream_symbols = config.symbols.clone();
    let stream_exchange = Arc::clone(&exchange);
    handles.push(tokio::spawn(async move {
        if let Err(e) = stream_exchange
            .stream_candles(&stream_symbols, tx, stream_cancel)
            .await
        {
            warn!(error = ?e, "exchange candle stream exited");
        }
    }));

    let publish_bus = Arc::clone(&bus);
    let publish_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = publish_cancel.cancelled() => break,
                candle = rx.recv() => {
                    match candle {
                        Some(candle) => publish_candle(publish_bus.as_ref(), candle).await,
                        None => break,
                    }
                }
            }
        }
    }));

    readiness.mark_ready();
    info!(symbols = config.symbols.len(), "ingestor started");

    shutdown::wait_for_shutdown_signal(cancel).await;
    shutdown::drain(handles).await;
    info!("ingestor shutdown complete");
    Ok(())
}

async fn backfill_symbols(config: &AppConfig, exchange: &dyn Exchange, bus: &dyn Bus) {
    for symbol in &config.symbols {
        match exchange
            .fetch_recent_candles(symbol, config.general.historical_candles)
            .await
        {
            Ok(candles) => {
                info!(symbol = %symbol, fetched = candles.len(), "historical backfill fetched");
                for candle in candles {
                    publish_candle(bus, candle).await;
                }
            }
            Err(e) => warn!(symbol = %symbol, error = ?e, "historical backfill failed, continuing"),
        }
    }
}

async fn publish_candle(bus: &dyn Bus, candle: Candle) {
    let subject = format!("candles.1m.{}", candle.symbol);
    match serde_json::to_vec(&candle) {
        Ok(payload) => {
            if let Err(e) = bus.publish(&subject, payload).await {
                warn!(symbol = %candle.symbol, error = ?e, "failed to publish candle");
            }
        }
        Err(e) => warn!(symbol = %candle.symbol, error = ?e, "failed to serialize candle"),
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
