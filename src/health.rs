use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Flips to `true` once the process has finished its startup sequence
/// (config loaded, rule set loaded, bus/store connections established).
/// `/health/ready` reports this; `/health/live` reports only that the
/// process is scheduled and responsive.
#[derive(Clone, Default)]
pub struct ReadinessFlag(Arc<AtomicBool>);

impl ReadinessFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

async fn live() -> impl IntoResponse {
    StatusCode::OK
}

async fn ready(State(flag): State<ReadinessFlag>) -> impl IntoResponse {
    if flag.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Builds the operational HTTP router (`/health/live`, `/health/ready`) and
/// installs the process-global Prometheus recorder, whose render handler
/// backs `/metrics`.
pub fn router(readiness: ReadinessFlag) -> Result<Router, metrics_exporter_prometheus::BuildError> {
    let prometheus = PrometheusBuilder::new().install_recorder()?;

    Ok(Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route(
            "/metrics",
            get(move || {
                let handle = prometheus.clone();
                async move { handle.render() }
            }),
        )
        .with_state(readiness)
        .layer(CorsLayer::permissive()))
}

/// Serves the operational router on `port` until `shutdown` resolves.
pub async fn serve(
    port: u16,
    readiness: ReadinessFlag,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = router(readiness).expect("prometheus recorder installs exactly once per process");
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "operational endpoints listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_flag_starts_false() {
        let flag = ReadinessFlag::new();
        assert!(!flag.is_ready());
        flag.mark_ready();
        assert!(flag.is_ready());
    }
}
