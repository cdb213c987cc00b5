use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use futures::StreamExt;
use signal_core::bus::Bus;
use signal_core::bus::nats::NatsBus;
use signal_core::config::{self, AppConfig};
use signal_core::cooldown::{Cooldown, RedisCooldown, cooldown_key};
use signal_core::health::{self, ReadinessFlag};
use signal_core::model::{Alert, Metrics};
use signal_core::rules::RuleEngine;
use signal_core::shutdown;
use signal_core::storage::TimeseriesStore;
use signal_core::storage::postgres::{self, PgMetadataStore, PgTimeseriesStore};
use signal_core::storage::MetadataStore;
use signal_core::webhook::WebhookSender;
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
    #[display("failed to connect to the cooldown store")]
    Cooldown,
}

#[derive(Parser)]
#[command(name = "rule-engine", about = "Rule catalog, cooldown, alert fan-out")]
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

    let metadata_pool = postgres::connect(&config.metadata_store.url)
        .await
        .change_context(AppError::Storage)?;
    let metadata_store = PgMetadataStore::new(metadata_pool);
    let rules = metadata_store
        .load_alert_rules()
        .await
        .change_context(AppError::Storage)?;
    let engine = Arc::new(RuleEngine::new(&rules));
    info!(loaded = rules.len(), "alert rules loaded");

    let timeseries_pool = postgres::connect(&config.timeseries_store.url)
        .await
        .change_context(AppError::Storage)?;
    let timeseries: Arc<dyn TimeseriesStore> = Arc::new(PgTimeseriesStore::new(timeseries_pool));

    let cooldown: Arc<dyn Cooldown> = Arc::new(
        RedisCooldown::connect(&config.cooldown_store.url)
            .await
            .change_context(AppError::Cooldown)?,
    );
    let cooldown_ttl = Duration::from_secs(config.cooldown_store.ttl_seconds);

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

    let durable_name = format!("rule-engine-{}", hostname());
    let mut deliveries = bus
        .subscribe("metrics.calculated", &durable_name)
        .await
        .change_context(AppError::Bus)?;

    readiness.mark_ready();
    info!("rule engine started");

    let consume_cancel = cancel.clone();
    let consume_bus = Arc::clone(&bus);
    handles.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = consume_cancel.cancelled() => break,
                delivery = deliveries.next() => {
                    let Some(delivery) = delivery else { break };
                    match serde_json::from_slice::<Metrics>(&delivery.payload) {
                        Ok(metrics) => {
                            handle_metrics(
                                &metrics,
                                engine.as_ref(),
                                cooldown.as_ref(),
                                cooldown_ttl,
                                timeseries.as_ref(),
                                webhooks.as_ref(),
                                consume_bus.as_ref(),
                            )
                            .await;
                            if let Err(e) = delivery.ack().await {
                                warn!(error = ?e, "failed to ack metrics message");
                            }
                        }
                        Err(e) => {
                            warn!(error = ?e, "malformed metrics payload, dropping and acking");
                            let _ = delivery.ack().await;
                        }
                    }
                }
            }
        }
    }));

    shutdown::wait_for_shutdown_signal(cancel).await;
    shutdown::drain(handles).await;
    info!("rule engine shutdown complete");
    Ok(())
}

/// Evaluates `metrics` against the rule catalog; for each accepted alert,
/// attempts the cooldown, then persists, sends webhooks, and publishes —
/// each exactly once per accepted alert (spec.md §4.3 invariant).
async fn handle_metrics(
    metrics: &Metrics,
    engine: &RuleEngine,
    cooldown: &dyn Cooldown,
    cooldown_ttl: Duration,
    timeseries: &dyn TimeseriesStore,
    webhooks: &WebhookSender,
    bus: &dyn Bus,
) {
    for alert in engine.evaluate(metrics) {
        let key = cooldown_key(&alert.symbol, alert.rule_type);
        match cooldown.try_acquire(&key, cooldown_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                metrics::counter!("alerts_duplicated").increment(1);
                continue;
            }
            Err(e) => {
                warn!(error = ?e, symbol = %alert.symbol, rule = %alert.rule_type, "cooldown check failed");
                continue;
            }
        }

        dispatch_alert(&alert, timeseries, webhooks, bus).await;
    }
}

async fn dispatch_alert(
    alert: &Alert,
    timeseries: &dyn TimeseriesStore,
    webhooks: &WebhookSender,
    bus: &dyn Bus,
) {
    if let Err(e) = timeseries.insert_alert(alert).await {
        warn!(error = ?e, alert_id = %alert.id, "best-effort alert persist failed");
    }

    for (url, e) in webhooks.send(alert).await {
        warn!(error = ?e, url, alert_id = %alert.id, "webhook delivery failed");
    }

    match serde_json::to_vec(alert) {
        Ok(payload) => {
            if let Err(e) = bus.publish("alerts.triggered", payload).await {
                warn!(error = ?e, alert_id = %alert.id, "failed to publish alert");
            }
        }
        Err(e) => warn!(error = ?e, alert_id = %alert.id, "failed to serialize alert"),
    }
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
