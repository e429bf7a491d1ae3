//! Parkwatch - location-triggered parking spot sharing
//!
//! Watches a device position stream, detects park/departure episodes and
//! shares freed spots with nearby searchers.
//!
//! Module structure:
//! - `domain/` - Core types (samples, states, spots) and geo math
//! - `io/` - External interfaces (MQTT position feed, document store, egress)
//! - `services/` - Detection logic (detector, lifecycle, notifier, session)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use clap::Parser;
use parkwatch::infra::{Config, Metrics};
use parkwatch::io::{Egress, HttpDocumentStore, ProfileStore, SpotStore};
use parkwatch::services::MonitoringSession;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Parkwatch - parking spot detection and sharing daemon
#[derive(Parser, Debug)]
#[command(name = "parkwatch", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("parkwatch starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    // Start embedded MQTT broker with config
    if config.broker_enabled() {
        parkwatch::infra::broker::start_embedded_broker(&config);
    }

    info!(
        config_file = %config.config_file(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        position_topic = %config.position_topic(),
        speed_threshold_kmh = %config.speed_threshold_kmh(),
        stop_duration_ms = %config.stop_duration().as_millis(),
        distance_threshold_m = %config.distance_threshold_m(),
        notification_radius_m = %config.notification_radius_m(),
        store_configured = %config.store_base_url().is_some(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());

    // Document store: absent base URL degrades to local-only operation
    let (spot_store, profile_store): (Option<Arc<dyn SpotStore>>, Option<Arc<dyn ProfileStore>>) =
        match config.store_base_url() {
            Some(base_url) => {
                let store = Arc::new(HttpDocumentStore::new(
                    base_url,
                    config.spots_collection(),
                    config.users_collection(),
                    config.store_api_key(),
                )?);
                (Some(store.clone()), Some(store))
            }
            None => {
                info!("store_not_configured: spots will not be shared or fetched");
                (None, None)
            }
        };

    // Position event channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(100);

    // Start MQTT position feed
    let feed_config = config.clone();
    let feed_metrics = metrics.clone();
    let feed_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = parkwatch::io::position::start_position_feed(
            &feed_config,
            event_tx,
            feed_metrics,
            feed_shutdown,
        )
        .await
        {
            tracing::error!(error = %e, "position feed error");
        }
    });

    // Start live-spot polling (requires the store)
    let (spots_tx, spots_rx) = watch::channel(Vec::new());
    if let Some(ref store) = spot_store {
        let poll_store = store.clone();
        let poll_interval = config.spot_poll_interval();
        let poll_metrics = metrics.clone();
        let poll_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            parkwatch::io::spot_feed::start_spot_feed(
                poll_store,
                poll_interval,
                spots_tx,
                poll_metrics,
                poll_shutdown,
            )
            .await;
        });
    }

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = parkwatch::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run the monitoring session - consumes events until the feed closes
    let egress = Egress::new(config.egress_file());
    let mut session = MonitoringSession::new(config, metrics, egress, spot_store, profile_store);
    session.run(event_rx, spots_rx, shutdown_rx).await;

    info!("parkwatch shutdown complete");
    Ok(())
}
