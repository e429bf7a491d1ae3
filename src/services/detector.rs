//! Parking detection state machine
//!
//! Classifies the live position stream into detection states using speed and
//! elapsed-time thresholds. A stop is only confirmed after the settle timer
//! runs uninterrupted; the confirmed spot is the snapshot captured when the
//! timer was armed, not the latest sample.
//!
//! The detector owns its state and the single cancelable settle arm. It never
//! performs IO: departures are surfaced as effects for the session to act on.

use crate::domain::geo::haversine_distance;
use crate::domain::types::{CandidateSpot, DetectionState, PositionSample, ProviderError};
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

/// Armed settle timer.
///
/// `spot` is the arming sample's position; cancellation and firing both
/// reference this immutable snapshot. At most one arm exists at a time.
#[derive(Debug, Clone, Copy)]
struct SettleArm {
    spot: CandidateSpot,
    deadline: Instant,
}

/// Side effect requested by a state transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectorEffect {
    /// Confirmed departure from the candidate spot: publish it as free
    Departure(CandidateSpot),
}

/// Finite-state machine over the position stream
pub struct ParkingDetector {
    state: DetectionState,
    speed_threshold_mps: f64,
    stop_duration: Duration,
    distance_threshold_m: f64,
    settle: Option<SettleArm>,
    candidate: Option<CandidateSpot>,
    last_error: Option<ProviderError>,
    metrics: Option<Arc<Metrics>>,
}

impl ParkingDetector {
    pub fn new(
        speed_threshold_mps: f64,
        stop_duration: Duration,
        distance_threshold_m: f64,
    ) -> Self {
        Self {
            state: DetectionState::Idle,
            speed_threshold_mps,
            stop_duration,
            distance_threshold_m,
            settle: None,
            candidate: None,
            last_error: None,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    pub fn candidate(&self) -> Option<CandidateSpot> {
        self.candidate
    }

    pub fn last_error(&self) -> Option<ProviderError> {
        self.last_error
    }

    /// Deadline of the armed settle timer, if any.
    ///
    /// The session sleeps until this instant and then calls
    /// [`settle_elapsed`](Self::settle_elapsed).
    pub fn settle_deadline(&self) -> Option<Instant> {
        self.settle.map(|arm| arm.deadline)
    }

    /// Begin a monitoring session: `Idle` -> `AcquiringPermission`.
    ///
    /// Resets the candidate, the settle arm and any previous error.
    pub fn start(&mut self) {
        self.settle = None;
        self.candidate = None;
        self.last_error = None;
        self.set_state(DetectionState::AcquiringPermission);
        debug!("detector_started");
    }

    /// Process one position sample.
    ///
    /// Runs to completion before the next event; returns at most one effect.
    pub fn handle_sample(&mut self, sample: &PositionSample, now: Instant) -> Option<DetectorEffect> {
        if self.state == DetectionState::Idle {
            // Samples before start or after stop are not part of a session
            debug!("sample_ignored_idle");
            return None;
        }

        if self.state == DetectionState::AcquiringPermission {
            // First successful sample: permission granted
            self.set_state(DetectionState::Moving);
            info!(
                latitude = %sample.latitude,
                longitude = %sample.longitude,
                "first_fix_acquired"
            );
        }

        let speed = sample.speed_or_zero();

        if let Some(candidate) = self.candidate {
            return self.evaluate_parked(candidate, sample, speed);
        }

        if speed < self.speed_threshold_mps {
            if self.settle.is_none() {
                let spot =
                    CandidateSpot { latitude: sample.latitude, longitude: sample.longitude };
                self.settle = Some(SettleArm { spot, deadline: now + self.stop_duration });
                self.set_state(DetectionState::Settling);
                if let Some(ref m) = self.metrics {
                    m.record_settle_armed();
                }
                info!(
                    latitude = %spot.latitude,
                    longitude = %spot.longitude,
                    stop_duration_ms = %self.stop_duration.as_millis(),
                    "settle_armed"
                );
            }
            // Already settling: keep the original arm, do not re-snapshot
        } else {
            if self.settle.take().is_some() {
                if let Some(ref m) = self.metrics {
                    m.record_settle_cancelled();
                }
                info!(speed_mps = %speed, "settle_cancelled");
            }
            self.set_state(DetectionState::Moving);
        }

        None
    }

    /// Evaluate a sample while a candidate spot is held (`Parked`).
    ///
    /// Departure requires both above-threshold speed and above-threshold
    /// distance from the candidate. Distance alone keeps the spot sticky:
    /// the armed position is never re-settled while we stay nearby.
    fn evaluate_parked(
        &mut self,
        candidate: CandidateSpot,
        sample: &PositionSample,
        speed: f64,
    ) -> Option<DetectorEffect> {
        if speed <= self.speed_threshold_mps {
            debug!(speed_mps = %speed, "parked_stationary");
            return None;
        }

        let distance_m = haversine_distance(candidate.point(), sample.point());
        if distance_m <= self.distance_threshold_m {
            debug!(distance_m = %format!("{distance_m:.1}"), "parked_nearby");
            return None;
        }

        self.candidate = None;
        self.set_state(DetectionState::Moving);
        if let Some(ref m) = self.metrics {
            m.record_departure();
        }
        info!(
            latitude = %candidate.latitude,
            longitude = %candidate.longitude,
            distance_m = %format!("{distance_m:.1}"),
            "departure_detected"
        );
        Some(DetectorEffect::Departure(candidate))
    }

    /// The settle timer fired uninterrupted: `Settling` -> `Parked`.
    ///
    /// Returns the confirmed candidate, or `None` when the arm was cancelled
    /// before the session got around to this call (idempotent).
    pub fn settle_elapsed(&mut self) -> Option<CandidateSpot> {
        let arm = self.settle.take()?;
        self.candidate = Some(arm.spot);
        self.set_state(DetectionState::Parked);
        if let Some(ref m) = self.metrics {
            m.record_park_detected();
        }
        info!(
            latitude = %arm.spot.latitude,
            longitude = %arm.spot.longitude,
            "parked_detected"
        );
        Some(arm.spot)
    }

    /// Terminal position provider failure: any state -> `Error`.
    ///
    /// Clears the settle arm and the candidate; the session ends after this.
    pub fn handle_provider_error(&mut self, err: ProviderError) {
        self.settle = None;
        self.candidate = None;
        self.last_error = Some(err);
        self.set_state(DetectionState::Error);
    }

    /// Publish outcome arrived: success.
    ///
    /// Display transition only; the next sample classifies `SpotShared`
    /// exactly like `Moving`.
    pub fn note_spot_shared(&mut self) {
        if self.state == DetectionState::Moving {
            self.set_state(DetectionState::SpotShared);
        }
    }

    /// Publish outcome arrived: failure.
    ///
    /// Terminal for that attempt only; the session keeps consuming samples
    /// and the next one reclassifies out of `Error`.
    pub fn note_publish_failed(&mut self) {
        self.set_state(DetectionState::Error);
    }

    /// Manual stop: always returns to `Idle`, clearing timers and candidate.
    pub fn stop(&mut self) {
        self.settle = None;
        self.candidate = None;
        self.last_error = None;
        self.set_state(DetectionState::Idle);
        debug!("detector_stopped");
    }

    fn set_state(&mut self, state: DetectionState) {
        if self.state != state {
            debug!(from = %self.state.as_str(), to = %state.as_str(), "state_transition");
            self.state = state;
            if let Some(ref m) = self.metrics {
                m.set_detection_state(state.gauge_value());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Production defaults: 5 km/h, 60 s, 50 m
    const SPEED_THRESHOLD_MPS: f64 = 5.0 / 3.6;
    const STOP_DURATION: Duration = Duration::from_millis(60_000);
    const DISTANCE_THRESHOLD_M: f64 = 50.0;

    const ROME_LAT: f64 = 41.9028;
    const ROME_LNG: f64 = 12.4964;

    fn detector() -> ParkingDetector {
        ParkingDetector::new(SPEED_THRESHOLD_MPS, STOP_DURATION, DISTANCE_THRESHOLD_M)
    }

    fn sample(lat: f64, lng: f64, speed: Option<f64>, ts: u64) -> PositionSample {
        PositionSample { latitude: lat, longitude: lng, speed_mps: speed, timestamp_ms: ts }
    }

    fn started() -> ParkingDetector {
        let mut d = detector();
        d.start();
        d
    }

    #[test]
    fn test_start_acquires_permission() {
        let d = started();
        assert_eq!(d.state(), DetectionState::AcquiringPermission);
        assert!(d.settle_deadline().is_none());
        assert!(d.candidate().is_none());
    }

    #[test]
    fn test_first_sample_moves() {
        let mut d = started();
        d.handle_sample(&sample(ROME_LAT, ROME_LNG, Some(10.0), 1), Instant::now());
        assert_eq!(d.state(), DetectionState::Moving);
    }

    #[test]
    fn test_idle_ignores_samples() {
        let mut d = detector();
        let effect = d.handle_sample(&sample(ROME_LAT, ROME_LNG, Some(0.0), 1), Instant::now());
        assert!(effect.is_none());
        assert_eq!(d.state(), DetectionState::Idle);
    }

    #[test]
    fn test_low_speed_arms_settle_with_snapshot() {
        let mut d = started();
        let now = Instant::now();
        d.handle_sample(&sample(ROME_LAT, ROME_LNG, Some(0.5), 1), now);

        assert_eq!(d.state(), DetectionState::Settling);
        assert_eq!(d.settle_deadline(), Some(now + STOP_DURATION));

        // Later low-speed samples elsewhere must not re-arm or re-snapshot
        let later = now + Duration::from_secs(10);
        d.handle_sample(&sample(ROME_LAT + 0.0001, ROME_LNG, Some(0.3), 2), later);
        assert_eq!(d.settle_deadline(), Some(now + STOP_DURATION));

        let spot = d.settle_elapsed().unwrap();
        assert_eq!(spot.latitude, ROME_LAT);
        assert_eq!(spot.longitude, ROME_LNG);
        assert_eq!(d.state(), DetectionState::Parked);
    }

    #[test]
    fn test_missing_speed_is_stationary() {
        let mut d = started();
        d.handle_sample(&sample(ROME_LAT, ROME_LNG, None, 1), Instant::now());
        assert_eq!(d.state(), DetectionState::Settling);
    }

    #[test]
    fn test_fast_sample_cancels_settle() {
        let mut d = started();
        let now = Instant::now();
        d.handle_sample(&sample(ROME_LAT, ROME_LNG, Some(0.0), 1), now);
        assert_eq!(d.state(), DetectionState::Settling);

        d.handle_sample(&sample(ROME_LAT, ROME_LNG, Some(8.0), 2), now + Duration::from_secs(5));
        assert_eq!(d.state(), DetectionState::Moving);
        assert!(d.settle_deadline().is_none());

        // Cancelled arm never fires
        assert!(d.settle_elapsed().is_none());
        assert_eq!(d.state(), DetectionState::Moving);
    }

    #[test]
    fn test_sustained_stop_parks_exactly_once() {
        let mut d = started();
        let now = Instant::now();
        for i in 0..61 {
            d.handle_sample(
                &sample(ROME_LAT, ROME_LNG, Some(0.0), i),
                now + Duration::from_secs(i),
            );
        }
        let spot = d.settle_elapsed().unwrap();
        assert_eq!((spot.latitude, spot.longitude), (ROME_LAT, ROME_LNG));
        assert_eq!(d.state(), DetectionState::Parked);

        // A second fire attempt is a no-op
        assert!(d.settle_elapsed().is_none());
        assert_eq!(d.state(), DetectionState::Parked);
    }

    #[test]
    fn test_parked_stays_on_slow_samples() {
        let mut d = started();
        let now = Instant::now();
        d.handle_sample(&sample(ROME_LAT, ROME_LNG, Some(0.0), 1), now);
        d.settle_elapsed().unwrap();

        let effect = d.handle_sample(&sample(ROME_LAT, ROME_LNG, Some(0.2), 2), now);
        assert!(effect.is_none());
        assert_eq!(d.state(), DetectionState::Parked);
    }

    #[test]
    fn test_parked_sticky_within_distance_threshold() {
        let mut d = started();
        let now = Instant::now();
        d.handle_sample(&sample(ROME_LAT, ROME_LNG, Some(0.0), 1), now);
        d.settle_elapsed().unwrap();

        // Above-threshold speed but only a few meters away: no departure
        let effect = d.handle_sample(&sample(ROME_LAT + 0.0001, ROME_LNG, Some(2.0), 2), now);
        assert!(effect.is_none());
        assert_eq!(d.state(), DetectionState::Parked);
        assert!(d.candidate().is_some());
    }

    #[test]
    fn test_departure_emits_publish_effect() {
        let mut d = started();
        let now = Instant::now();
        d.handle_sample(&sample(ROME_LAT, ROME_LNG, Some(0.0), 1), now);
        d.settle_elapsed().unwrap();

        // Next sample one block away at 2 m/s
        let effect = d.handle_sample(&sample(41.9033, 12.4970, Some(2.0), 2), now);
        match effect {
            Some(DetectorEffect::Departure(spot)) => {
                assert_eq!((spot.latitude, spot.longitude), (ROME_LAT, ROME_LNG));
            }
            other => panic!("expected departure, got {other:?}"),
        }
        assert_eq!(d.state(), DetectionState::Moving);
        assert!(d.candidate().is_none());

        // Further fast samples past the threshold emit nothing: the episode
        // is over
        let effect = d.handle_sample(&sample(41.9040, 12.4980, Some(3.0), 3), now);
        assert!(effect.is_none());
    }

    #[test]
    fn test_provider_error_is_terminal() {
        let mut d = started();
        let now = Instant::now();
        d.handle_sample(&sample(ROME_LAT, ROME_LNG, Some(0.0), 1), now);
        assert_eq!(d.state(), DetectionState::Settling);

        d.handle_provider_error(ProviderError::PermissionDenied);
        assert_eq!(d.state(), DetectionState::Error);
        assert_eq!(d.last_error(), Some(ProviderError::PermissionDenied));
        assert!(d.settle_deadline().is_none());
        assert!(d.candidate().is_none());
    }

    #[test]
    fn test_stop_returns_to_idle() {
        let mut d = started();
        let now = Instant::now();
        d.handle_sample(&sample(ROME_LAT, ROME_LNG, Some(0.0), 1), now);
        d.settle_elapsed().unwrap();

        d.stop();
        assert_eq!(d.state(), DetectionState::Idle);
        assert!(d.candidate().is_none());
        assert!(d.settle_deadline().is_none());
    }

    #[test]
    fn test_spot_shared_then_new_episode() {
        let mut d = started();
        let now = Instant::now();
        d.handle_sample(&sample(ROME_LAT, ROME_LNG, Some(0.0), 1), now);
        d.settle_elapsed().unwrap();
        d.handle_sample(&sample(41.9033, 12.4970, Some(2.0), 2), now);
        assert_eq!(d.state(), DetectionState::Moving);

        d.note_spot_shared();
        assert_eq!(d.state(), DetectionState::SpotShared);

        // A new stop starts a fresh episode
        d.handle_sample(&sample(41.9040, 12.4980, Some(0.0), 3), now);
        assert_eq!(d.state(), DetectionState::Settling);
    }

    #[test]
    fn test_publish_failure_recovers_on_next_sample() {
        let mut d = started();
        let now = Instant::now();
        d.handle_sample(&sample(ROME_LAT, ROME_LNG, Some(0.0), 1), now);
        d.settle_elapsed().unwrap();
        d.handle_sample(&sample(41.9033, 12.4970, Some(2.0), 2), now);

        d.note_publish_failed();
        assert_eq!(d.state(), DetectionState::Error);

        d.handle_sample(&sample(41.9040, 12.4980, Some(6.0), 3), now);
        assert_eq!(d.state(), DetectionState::Moving);
    }
}
