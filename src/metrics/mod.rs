/*!
 * # Metrics Module
 *
 * Prometheus counters for stock movements and sign-ins, collected in one
 * crate registry and exposed in text format at `/metrics`.
 *
 * - `aidstock_transfers_total`: committed transfer lines
 * - `aidstock_transfer_failures_total{reason}`: rejected or failed transfers
 * - `aidstock_transfer_undos_total`: undone transfers and rolled-back batches
 * - `aidstock_stock_mutations_total{operation}`: single-location stock changes
 * - `aidstock_login_attempts_total{outcome}`: PIN sign-in attempts
 */

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to export metrics: {0}")]
    ExportError(String),
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

fn register<C: Collector + Clone + 'static>(collector: C) -> C {
    if let Err(e) = REGISTRY.register(Box::new(collector.clone())) {
        warn!(error = %e, "metric registration failed");
    }
    collector
}

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref TRANSFERS_TOTAL: IntCounter = register(
        IntCounter::new("aidstock_transfers_total", "Total number of committed transfer lines")
            .expect("metric can be created")
    );
    pub static ref TRANSFER_FAILURES: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new(
                "aidstock_transfer_failures_total",
                "Total number of rejected or failed transfers"
            ),
            &["reason"]
        )
        .expect("metric can be created")
    );
    pub static ref TRANSFER_UNDOS: IntCounter = register(
        IntCounter::new(
            "aidstock_transfer_undos_total",
            "Total number of reverted transfer lines"
        )
        .expect("metric can be created")
    );
    pub static ref STOCK_MUTATIONS: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new(
                "aidstock_stock_mutations_total",
                "Total number of single-location stock changes"
            ),
            &["operation"]
        )
        .expect("metric can be created")
    );
    pub static ref LOGIN_ATTEMPTS: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new("aidstock_login_attempts_total", "Total number of PIN sign-in attempts"),
            &["outcome"]
        )
        .expect("metric can be created")
    );
}

/// Registers every counter up front so `/metrics` lists them before first use.
pub fn init_metrics() {
    lazy_static::initialize(&TRANSFERS_TOTAL);
    lazy_static::initialize(&TRANSFER_FAILURES);
    lazy_static::initialize(&TRANSFER_UNDOS);
    lazy_static::initialize(&STOCK_MUTATIONS);
    lazy_static::initialize(&LOGIN_ATTEMPTS);
    info!("Metrics registry initialised");
}

pub fn export_text() -> Result<String, MetricsError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| MetricsError::ExportError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| MetricsError::ExportError(e.to_string()))
}

// HTTP endpoint handler for metrics
pub async fn metrics_handler() -> Result<impl IntoResponse, MetricsError> {
    let body = export_text()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
