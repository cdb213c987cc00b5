use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State as AxumState;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use futures::StreamExt;
use signal_core::broadcast_hub::BroadcastHub;
use signal_core::bus::Bus;
use signal_core::bus::nats::NatsBus;
use signal_core::config::{self, AppConfig};
use signal_core::health;
use signal_core::health::ReadinessFlag;
use signal_core::model::Alert;
use signal_core::shutdown;
use signal_core::webhook::WebhookSender;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Display, Error)]
enum AppError {
    #[display("configuration error")]
    Config,
    #[display("failed to connect to the message bus")]
    Bus,
    #[display("I/O error serving the WebSocket gateway")]
    Io,
}

#[derive(Parser)]
#[command(name = "broadcaster", about = "WebSocket/webhook fan-out boundary")]
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

    let webhooks = Arc::new(WebhookSender::new(
        config.webhooks.urls.clone(),
        Duration::from_millis(config.webhooks.timeout_ms),
        config.webhooks.max_retries,
    ));

    let bus: Arc<dyn Bus> = {
        let nats = NatsBus::connect(&config.bus.url)
            .await
            .change_context(AppError::Bus)?;
        nats.ensure_streams().await.change_context(AppError::Bus)?;
        Arc::new(nats)
    };

    let hub = Arc::new(BroadcastHub::new());

    let mut handles = Vec::new();

    let durable_name = format!("broadcaster-{}", hostname());
    let mut deliveries = bus
        .subscribe("alerts.triggered", &durable_name)
        .await
        .change_context(AppError::Bus)?;

    let consume_cancel = cancel.clone();
    let consume_hub = Arc::clone(&hub);
    let consume_webhooks = Arc::clone(&webhooks);
    handles.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = consume_cancel.cancelled() => break,
                delivery = deliveries.next() => {
                    let Some(delivery) = delivery else { break };
                    match serde_json::from_slice::<Alert>(&delivery.payload) {
                        Ok(alert) => {
                            consume_hub.publish(delivery.payload.clone());
                            for (url, e) in consume_webhooks.send(&alert).await {
                                warn!(error = ?e, url, alert_id = %alert.id, "webhook delivery failed");
                            }
                            if let Err(e) = delivery.ack().await {
                                warn!(error = ?e, "failed to ack alert message");
                            }
                        }
                        Err(e) => {
                            warn!(error = ?e, "malformed alert payload, dropping and acking");
                            let _ = delivery.ack().await;
                        }
                    }
                }
            }
        }
    }));

    let operational_router = health::router(readiness.clone()).map_err(|e| {
        Report::new(AppError::Io).attach(format!("prometheus recorder install failed: {e}"))
    })?;
    let ws_router = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(Arc::clone(&hub));
    let router = operational_router.merge(ws_router).layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.general.metrics_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .change_context(AppError::Io)?;
    info!(%addr, "broadcaster ws gateway listening");

    let serve_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
            .await;
    }));

    readiness.mark_ready();
    info!("broadcaster started");

    shutdown::wait_for_shutdown_signal(cancel).await;
    shutdown::drain(handles).await;
    info!("broadcaster shutdown complete");
    Ok(())
}

async fn ws_upgrade(
    AxumState(hub): AxumState<Arc<BroadcastHub>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move { hub.serve_client(socket).await })
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
