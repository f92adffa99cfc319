//! HTTP API for health checks and swap visibility

use crate::config::ApiConfig;
use crate::lifecycle::{InFlightSwap, OrderLifecycleManager, SwapReport};

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<OrderLifecycleManager>,
}

pub fn router(manager: Arc<OrderLifecycleManager>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/swaps", get(list_swaps))
        .route("/swaps/:intent_id", get(get_swap))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { manager })
}

/// Run the HTTP API server until `shutdown` resolves
pub async fn run_server(
    config: ApiConfig,
    manager: Arc<OrderLifecycleManager>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(manager);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding API server to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server stopped")?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    crate::metrics::record_health_check();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Ready once at least one provider is registered
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<String> = state
        .manager
        .providers()
        .iter()
        .map(|p| p.as_str().to_string())
        .collect();
    let signer = state.manager.signer();
    let response = ReadinessResponse {
        ready: !providers.is_empty(),
        providers,
        ledger_signing: signer.ledger_address().is_some(),
        evm_signing: signer.evm_address().is_some(),
    };

    let code = if response.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

async fn list_swaps(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.manager.registry();
    let mut finished = registry.finished();
    finished.sort_by_key(|r| std::cmp::Reverse(r.history.first().map(|t| t.at)));

    Json(SwapsResponse {
        in_flight: registry.in_flight(),
        finished,
    })
}

async fn get_swap(
    State(state): State<AppState>,
    Path(intent_id): Path<Uuid>,
) -> impl IntoResponse {
    let registry = state.manager.registry();
    if let Some(swap) = registry.in_flight().into_iter().find(|s| s.intent_id == intent_id) {
        return (StatusCode::OK, Json(SwapLookup::InFlight(swap)));
    }
    match registry.report(&intent_id) {
        Some(report) => (StatusCode::OK, Json(SwapLookup::Finished(Box::new(report)))),
        None => (StatusCode::NOT_FOUND, Json(SwapLookup::Unknown)),
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    providers: Vec<String>,
    ledger_signing: bool,
    evm_signing: bool,
}

#[derive(Serialize)]
struct SwapsResponse {
    in_flight: Vec<InFlightSwap>,
    finished: Vec<SwapReport>,
}

#[derive(Serialize)]
#[serde(tag = "status", content = "swap", rename_all = "snake_case")]
enum SwapLookup {
    InFlight(InFlightSwap),
    Finished(Box<SwapReport>),
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainSigner;
    use crate::lifecycle::SwapReport;
    use crate::poller::{PollPolicy, StatusPoller};
    use crate::types::ProviderKind;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::collections::HashMap;
    use std::time::Duration;
    use tower::ServiceExt;

    fn manager() -> Arc<OrderLifecycleManager> {
        let signer = Arc::new(ChainSigner::new("xrpl", HashMap::new(), None, None));
        Arc::new(OrderLifecycleManager::new(
            signer,
            StatusPoller::default(),
            PollPolicy {
                interval: Duration::from_secs(5),
                max_attempts: Some(3),
            },
        ))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_not_ready_without_providers() {
        let (status, body) = get(router(manager()), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);
        assert_eq!(body["ledger_signing"], false);
    }

    #[tokio::test]
    async fn test_swaps_lists_finished_reports() {
        let manager = manager();
        let report = SwapReport::new(Uuid::new_v4(), ProviderKind::SquidRouter);
        let id = report.intent_id;
        manager.registry().record(report);

        let (status, body) = get(router(manager.clone()), "/swaps").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["finished"][0]["provider"], "squid_router");

        let (status, body) = get(router(manager.clone()), &format!("/swaps/{}", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "finished");

        let (status, _) = get(router(manager), &format!("/swaps/{}", Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
