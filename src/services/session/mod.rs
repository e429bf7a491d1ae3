//! Monitoring session - wires the detector, lifecycle and notifier together
//!
//! Owns the single select! loop that consumes position events, fires the
//! settle timer, reacts to publish outcomes and refreshes the live spot set.
//! All detection state is mutated here, on one task; the only concurrency is
//! the spawned store calls, whose outcomes come back over a channel.


use crate::domain::types::{
    CandidateSpot, DetectionState, GeoPoint, PositionSample, PublishedSpot, WatchEvent,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress::Egress;
use crate::io::store::{PersistError, ProfileStore, SpotStore};
use crate::services::detector::{DetectorEffect, ParkingDetector};
use crate::services::lifecycle::SpotLifecycle;
use crate::services::notifier::{filter_fresh, ProximityNotifier};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Minimum gap between position writes to the profile store
const PROFILE_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

type PublishOutcome = Result<PublishedSpot, PersistError>;

/// One user's monitoring session from start to shutdown
pub struct MonitoringSession {
    detector: ParkingDetector,
    lifecycle: SpotLifecycle,
    notifier: ProximityNotifier,
    config: Config,
    metrics: Arc<Metrics>,
    egress: Egress,
    spot_store: Option<Arc<dyn SpotStore>>,
    profile_store: Option<Arc<dyn ProfileStore>>,
    searching: bool,
    last_position: Option<GeoPoint>,
    last_profile_update: Option<Instant>,
}

impl MonitoringSession {
    pub fn new(
        config: Config,
        metrics: Arc<Metrics>,
        egress: Egress,
        spot_store: Option<Arc<dyn SpotStore>>,
        profile_store: Option<Arc<dyn ProfileStore>>,
    ) -> Self {
        let detector = ParkingDetector::new(
            config.speed_threshold_mps(),
            config.stop_duration(),
            config.distance_threshold_m(),
        )
        .with_metrics(metrics.clone());
        let notifier = ProximityNotifier::new(config.notification_radius_m());
        let searching = config.search_default();

        Self {
            detector,
            lifecycle: SpotLifecycle::new(),
            notifier,
            config,
            metrics,
            egress,
            spot_store,
            profile_store,
            searching,
            last_position: None,
            last_profile_update: None,
        }
    }

    pub fn state(&self) -> DetectionState {
        self.detector.state()
    }

    pub fn searching(&self) -> bool {
        self.searching
    }

    pub fn notified_count(&self) -> usize {
        self.notifier.notified_count()
    }

    pub fn last_publish_failure(&self) -> Option<&str> {
        self.lifecycle.last_failure()
    }

    /// Run the session until the position feed closes, a provider error
    /// arrives or shutdown is signalled.
    pub async fn run(
        &mut self,
        mut watch_rx: mpsc::Receiver<WatchEvent>,
        mut spots_rx: watch::Receiver<Vec<PublishedSpot>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.detector.start();
        self.load_search_mode().await;
        info!(searching = %self.searching, "session_started");

        // Outcomes of spawned publish calls come back over this channel;
        // the sender half stays alive for the whole session
        let (publish_tx, mut publish_rx) = mpsc::channel::<PublishOutcome>(4);

        let mut spots: Vec<PublishedSpot> = spots_rx.borrow_and_update().clone();
        let mut spots_closed = false;

        loop {
            let settle_deadline = self.detector.settle_deadline();

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("session_shutdown");
                        self.detector.stop();
                        break;
                    }
                }
                event = watch_rx.recv() => {
                    match event {
                        Some(WatchEvent::Sample(sample)) => {
                            self.on_sample(&sample, &spots, &publish_tx);
                        }
                        Some(WatchEvent::Error(err)) => {
                            error!(
                                error = %err.as_str(),
                                message = %err.message(),
                                "provider_error"
                            );
                            self.detector.handle_provider_error(err);
                            // Terminal: the Error state stays visible
                            return;
                        }
                        None => {
                            info!("position_feed_closed");
                            break;
                        }
                    }
                }
                outcome = publish_rx.recv() => {
                    if let Some(result) = outcome {
                        self.on_publish_outcome(result);
                    }
                }
                _ = tokio::time::sleep_until(
                    settle_deadline.unwrap_or_else(Instant::now)
                ), if settle_deadline.is_some() => {
                    self.on_settle_fired();
                }
                changed = spots_rx.changed(), if !spots_closed => {
                    match changed {
                        Ok(()) => {
                            spots = spots_rx.borrow_and_update().clone();
                            debug!(count = %spots.len(), "live_spots_updated");
                            if self.searching {
                                self.notify(&spots);
                            }
                        }
                        Err(_) => spots_closed = true,
                    }
                }
            }
        }

        info!(state = %self.detector.state().as_str(), "session_ended");
    }

    /// Fetch the searching flag from the profile store, keeping the
    /// configured default when the store is absent or unreachable.
    async fn load_search_mode(&mut self) {
        let Some(store) = self.profile_store.clone() else {
            return;
        };
        match store.load(self.config.owner_id()).await {
            Ok(profile) => {
                self.searching = profile.is_searching;
                debug!(searching = %self.searching, "search_mode_loaded");
            }
            Err(e) => {
                warn!(error = %e, "profile_load_failed");
            }
        }
    }

    fn on_sample(
        &mut self,
        sample: &PositionSample,
        spots: &[PublishedSpot],
        publish_tx: &mpsc::Sender<PublishOutcome>,
    ) {
        let started = Instant::now();
        let effect = self.detector.handle_sample(sample, started);
        self.last_position = Some(sample.point());

        if let Some(DetectorEffect::Departure(spot)) = effect {
            self.on_departure(spot, publish_tx);
        }

        if self.searching {
            self.notify(spots);
        }
        self.maybe_update_profile(sample);

        self.metrics.record_sample_processed(started.elapsed().as_micros() as u64);
    }

    /// Confirmed departure: claim the episode's publish and spawn the store
    /// call. The claim happens before the spawn, so a burst of departure
    /// effects cannot double-publish.
    fn on_departure(&mut self, spot: CandidateSpot, publish_tx: &mpsc::Sender<PublishOutcome>) {
        if !self.lifecycle.try_claim() {
            return;
        }

        let Some(store) = self.spot_store.clone() else {
            warn!("spot_not_published: store not configured");
            self.lifecycle.note_failure(&PersistError::NotConfigured);
            return;
        };

        let owner = self.config.owner_id().to_string();
        let tx = publish_tx.clone();
        tokio::spawn(async move {
            let result = store.publish(spot.latitude, spot.longitude, &owner).await;
            let _ = tx.send(result).await;
        });
    }

    fn on_publish_outcome(&mut self, result: PublishOutcome) {
        match result {
            Ok(spot) => {
                self.lifecycle.note_published(&spot);
                self.detector.note_spot_shared();
                self.metrics.record_publish_ok();
                self.egress.write_spot(&spot);
            }
            Err(e) => {
                self.lifecycle.note_failure(&e);
                self.detector.note_publish_failed();
                self.metrics.record_publish_failure();
            }
        }
    }

    /// The settle deadline passed without a cancelling sample
    fn on_settle_fired(&mut self) {
        if let Some(spot) = self.detector.settle_elapsed() {
            self.lifecycle.begin_episode(spot);
        }
    }

    fn notify(&mut self, spots: &[PublishedSpot]) {
        let Some(current) = self.last_position else {
            return;
        };

        let fresh = filter_fresh(spots, Utc::now(), self.config.spot_expiration());
        let events = self.notifier.on_tick(current, &fresh);
        if events.is_empty() {
            return;
        }

        self.metrics.record_notifications(events.len() as u64);
        for event in &events {
            self.egress.write_notification(event);
        }
    }

    /// Mirror the current position to the profile store, fire-and-forget,
    /// at most once per PROFILE_UPDATE_INTERVAL.
    fn maybe_update_profile(&mut self, sample: &PositionSample) {
        let Some(store) = self.profile_store.clone() else {
            return;
        };

        let due = self
            .last_profile_update
            .map(|t| t.elapsed() >= PROFILE_UPDATE_INTERVAL)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_profile_update = Some(Instant::now());

        let owner = self.config.owner_id().to_string();
        let (latitude, longitude) = (sample.latitude, sample.longitude);
        tokio::spawn(async move {
            if let Err(e) = store.update_position(&owner, latitude, longitude).await {
                debug!(error = %e, "profile_position_update_failed");
            }
        });
    }
}
