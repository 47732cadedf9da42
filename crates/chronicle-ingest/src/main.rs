//! Chronicle channel ingestion daemon.
//!
//! This is the entry point for mirroring one channel's message history into
//! ClickHouse. It walks the history backward from the newest message (or
//! from the saved checkpoint), page by page, honoring the source's rate
//! limits, and records durable progress after every batch.
//!
//! # Usage
//!
//! ```bash
//! # Mirror a channel with default settings
//! chronicle-ingest --channel history_channel
//!
//! # Custom endpoints
//! chronicle-ingest \
//!     --channel history_channel \
//!     --gateway-url https://gateway.example \
//!     --clickhouse-url http://clickhouse:8123
//! ```
//!
//! The gateway bearer token, if required, is read from the
//! `CHRONICLE_GATEWAY_TOKEN` environment variable (a `.env` file is
//! honored).
//!
//! # Graceful Shutdown
//!
//! SIGINT (Ctrl+C) stops the loop at the next page boundary; the last known
//! checkpoint is flushed before exit, so a rerun resumes where this one
//! stopped.

use anyhow::{Context, Result};
use chronicle_core::metrics::{init_metrics, start_metrics_server};
use chronicle_ingest::{
    ClickHouseConfig, ClickHouseStore, GatewayConfig, GatewaySource, IngestConfig, IngestRunner,
    StopReason,
};
use clap::Parser;
use metrics::gauge;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Chronicle channel ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "chronicle-ingest")]
#[command(about = "Channel history ingestion daemon")]
#[command(version)]
struct Args {
    /// Channel to mirror (as the gateway names it)
    #[arg(long)]
    channel: String,

    /// History gateway base URL
    #[arg(long, default_value = "http://localhost:8085")]
    gateway_url: String,

    /// ClickHouse URL (e.g., http://localhost:8123)
    #[arg(long, default_value = "http://localhost:8123")]
    clickhouse_url: String,

    /// ClickHouse database name
    #[arg(long, default_value = "chronicle")]
    clickhouse_db: String,

    /// Table for archived messages
    #[arg(long, default_value = "messages")]
    messages_table: String,

    /// Table for the ingestion checkpoint
    #[arg(long, default_value = "ingest_checkpoint")]
    checkpoint_table: String,

    /// Messages requested per page
    #[arg(long, default_value = "100")]
    batch_size: usize,

    /// Pause between pages, in seconds
    #[arg(long, default_value = "2")]
    page_delay: u64,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A .env file may carry the gateway token; ignore if absent.
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("chronicle_ingest=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Chronicle ingestion daemon starting...");

    // Initialize metrics
    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle).await?;
        gauge!("ingest_running").set(1.0);
        tracing::info!("Metrics server listening on port {}", args.metrics_port);
    }

    // Set up graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    tracing::info!("Configuration:");
    tracing::info!("  Channel: {}", args.channel);
    tracing::info!("  Gateway: {}", args.gateway_url);
    tracing::info!("  ClickHouse: {} (db {})", args.clickhouse_url, args.clickhouse_db);
    tracing::info!("  Batch size: {}", args.batch_size);
    tracing::info!("  Page delay: {}s", args.page_delay);

    // Initialize the store and make sure the schema exists
    let store_config = ClickHouseConfig {
        url: args.clickhouse_url.clone(),
        database: args.clickhouse_db.clone(),
        messages_table: args.messages_table.clone(),
        checkpoint_table: args.checkpoint_table.clone(),
    };
    let store = ClickHouseStore::new(store_config, &args.channel);

    let healthy = store
        .health_check()
        .await
        .context("failed to reach ClickHouse")?;
    if !healthy {
        anyhow::bail!("ClickHouse health check returned an unexpected result");
    }

    store
        .ensure_schema()
        .await
        .context("failed to create ClickHouse tables")?;

    // Initialize the source
    let source = GatewaySource::new(GatewayConfig {
        base_url: args.gateway_url.clone(),
        token: std::env::var("CHRONICLE_GATEWAY_TOKEN").ok(),
    })
    .context("failed to create gateway source")?;

    // Run the ingestion loop
    let runner = IngestRunner::new(
        source,
        store,
        IngestConfig {
            channel: args.channel.clone(),
            batch_size: args.batch_size,
            page_delay: Duration::from_secs(args.page_delay),
        },
        Arc::clone(&running),
    );

    let report = runner.run().await.context("ingestion failed")?;

    // Mark as stopped
    gauge!("ingest_running").set(0.0);

    // Print summary
    let stopped_because = report
        .stop_reason
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("INGESTION COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Pages fetched:        {}", report.pages);
    tracing::info!("Messages fetched:     {}", report.messages_fetched);
    tracing::info!("Messages written:     {}", report.messages_written);
    tracing::info!("Duplicates skipped:   {}", report.duplicates_skipped);
    tracing::info!("Without text:         {}", report.without_text);
    tracing::info!("Rate-limit waits:     {}", report.rate_limit_hits);
    tracing::info!(
        "Checkpoint:           {}",
        report
            .checkpoint
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    tracing::info!("Stopped because:      {}", stopped_because);

    if report.stop_reason == Some(StopReason::NothingNew) && report.messages_fetched > 0 {
        tracing::info!(
            "Note: the run stopped on a page with nothing new; older history \
             may remain unfetched."
        );
    }

    Ok(())
}
