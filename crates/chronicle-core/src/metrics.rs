//! Prometheus metrics helpers for Chronicle components.
//!
//! This module provides centralized metrics initialization and the metric
//! definitions used across the archiver.
//!
//! # Usage
//!
//! ```rust,ignore
//! use chronicle_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Initialize the Prometheus recorder
//!     let handle = init_metrics();
//!
//!     // Start the HTTP server for the /metrics endpoint
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     // Now use metrics anywhere in your code
//!     use metrics::counter;
//!     counter!("ingest_pages_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`ingest_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: use sparingly to avoid cardinality explosion

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
/// Returns a handle that can be used with [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_ingest_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if the recorder is already
/// installed, instead of panicking. Useful for tests or optional metrics.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves the `/metrics` endpoint on the specified port.
/// This spawns a background task and returns immediately.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        axum::serve(listener, app).await.unwrap();
    });

    Ok(())
}

/// Register descriptions for the ingestion metrics.
///
/// Called automatically by [`init_metrics`].
fn register_ingest_metrics() {
    describe_counter!("ingest_pages_total", "Pages fetched from the source");
    describe_counter!(
        "ingest_messages_fetched_total",
        "Messages received from the source (before dedup)"
    );
    describe_counter!(
        "ingest_messages_written_total",
        "Net-new messages written to the archive"
    );
    describe_counter!(
        "ingest_messages_duplicate_total",
        "Messages skipped because they were already archived"
    );
    describe_counter!(
        "ingest_messages_textless_total",
        "Messages dropped for carrying no text payload"
    );
    describe_counter!(
        "ingest_rate_limited_total",
        "Rate-limit signals honored from the source"
    );
    describe_counter!(
        "ingest_backoff_seconds_total",
        "Cumulative seconds spent in source-directed backoff"
    );
    describe_gauge!(
        "ingest_checkpoint_id",
        "Last checkpoint id persisted for the current stream"
    );
    describe_gauge!(
        "ingest_running",
        "Whether an ingestion run is in progress (1=yes, 0=no)"
    );
}
