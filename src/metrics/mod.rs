//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Swaps started and their outcomes per provider
//! - Status polls and rate-limit retries per backend
//! - Origin-chain transactions and released escrow secrets
//!
//! Metrics are registered once against the default registry. If registration
//! fails the recorders become no-ops and a warning is logged.

use anyhow::{Context, Result};
use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_counter, CounterVec, Encoder, IntCounter, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info, warn};

struct SwapMetrics {
    swaps_started: CounterVec,
    swap_outcomes: CounterVec,
    poll_attempts: CounterVec,
    rate_limited: CounterVec,
    chain_txs: CounterVec,
    secrets_released: CounterVec,
    health_checks: IntCounter,
}

impl SwapMetrics {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            swaps_started: register_counter_vec!(
                "swap_orchestrator_swaps_started_total",
                "Swaps started per provider",
                &["provider"]
            )?,
            swap_outcomes: register_counter_vec!(
                "swap_orchestrator_swap_outcomes_total",
                "Swaps reaching a terminal state",
                &["provider", "outcome"]
            )?,
            poll_attempts: register_counter_vec!(
                "swap_orchestrator_poll_attempts_total",
                "Status reads per backend",
                &["service"]
            )?,
            rate_limited: register_counter_vec!(
                "swap_orchestrator_rate_limited_total",
                "Calls answered with a rate limit",
                &["service"]
            )?,
            chain_txs: register_counter_vec!(
                "swap_orchestrator_chain_transactions_total",
                "Origin-chain transactions by result",
                &["family", "result"]
            )?,
            secrets_released: register_counter_vec!(
                "swap_orchestrator_secrets_released_total",
                "Escrow secrets submitted to the relayer",
                &["provider"]
            )?,
            health_checks: register_int_counter!(
                "swap_orchestrator_health_checks_total",
                "Health check requests served"
            )?,
        })
    }
}

lazy_static! {
    static ref METRICS: Option<SwapMetrics> = match SwapMetrics::register() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            warn!("Metrics registration failed, recording disabled: {}", e);
            None
        }
    };
}

fn with_metrics(record: impl FnOnce(&SwapMetrics)) {
    if let Some(metrics) = METRICS.as_ref() {
        record(metrics);
    }
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding metrics server to {}", addr))?;
        axum::serve(listener, app)
            .await
            .context("metrics server stopped")?;

        Ok(())
    }
}

async fn metrics_handler() -> (StatusCode, String) {
    match render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

/// Text exposition of every registered metric
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// Helper functions to record metrics

pub fn record_swap_started(provider: &str) {
    with_metrics(|m| m.swaps_started.with_label_values(&[provider]).inc());
}

pub fn record_swap_outcome(provider: &str, outcome: &str) {
    with_metrics(|m| {
        m.swap_outcomes
            .with_label_values(&[provider, outcome])
            .inc()
    });
}

pub fn record_poll_attempt(service: &str) {
    with_metrics(|m| m.poll_attempts.with_label_values(&[service]).inc());
}

pub fn record_rate_limited(service: &str) {
    with_metrics(|m| m.rate_limited.with_label_values(&[service]).inc());
}

pub fn record_chain_tx(family: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    with_metrics(|m| m.chain_txs.with_label_values(&[family, result]).inc());
}

pub fn record_secret_released(provider: &str) {
    with_metrics(|m| m.secrets_released.with_label_values(&[provider]).inc());
}

pub fn record_health_check() {
    with_metrics(|m| m.health_checks.inc());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_metrics_are_rendered() {
        record_swap_started("one_click");
        record_swap_outcome("one_click", "success");
        record_chain_tx("ledger", false);

        let body = render().unwrap();
        assert!(body.contains("swap_orchestrator_swaps_started_total"));
        assert!(body.contains("outcome=\"success\""));
        assert!(body.contains("result=\"failure\""));
    }
}
