//! Live spot polling
//!
//! Periodically fetches the free-spot collection from the document store and
//! publishes the latest set over a watch channel. A failed poll keeps the
//! previous set in place; consumers never see a transient empty list.

use crate::domain::types::PublishedSpot;
use crate::infra::metrics::Metrics;
use crate::io::store::SpotStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Poll the store on an interval until shutdown.
///
/// The first fetch happens immediately so the session has a spot set before
/// the first position sample arrives.
pub async fn start_spot_feed(
    store: Arc<dyn SpotStore>,
    poll_interval: Duration,
    spots_tx: watch::Sender<Vec<PublishedSpot>>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_ms = %poll_interval.as_millis(), "spot_feed_started");

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("spot_feed_shutdown");
                    return;
                }
            }
            _ = ticker.tick() => {
                match store.fetch_spots().await {
                    Ok(spots) => {
                        metrics.set_live_spots(spots.len() as u64);
                        debug!(count = %spots.len(), "spot_feed_refreshed");
                        if spots_tx.send(spots).is_err() {
                            info!("spot_feed_receiver_gone");
                            return;
                        }
                    }
                    Err(e) => {
                        metrics.record_spot_poll_error();
                        warn!(error = %e, "spot_poll_failed");
                    }
                }
            }
        }
    }
}
