//! Proximity notification with per-session dedup
//!
//! Given the current position and the live set of free spots, emits at most
//! one notification per spot per session. The notified set only grows; spots
//! leaving the live set are not un-notified. Staleness filtering is owned by
//! the caller via [`filter_fresh`].

use crate::domain::geo::haversine_distance;
use crate::domain::types::{GeoPoint, NotificationEvent, PublishedSpot, SpotId};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use std::time::Duration;
use tracing::{debug, info};

/// Keep only spots younger than `expiration`.
///
/// Applied by the session before spots reach the notifier (and the map);
/// the dedup set below never sees expired spots.
pub fn filter_fresh(
    spots: &[PublishedSpot],
    now: DateTime<Utc>,
    expiration: Duration,
) -> Vec<PublishedSpot> {
    let max_age = chrono::Duration::from_std(expiration).unwrap_or(chrono::Duration::MAX);
    spots
        .iter()
        .filter(|spot| now.signed_duration_since(spot.created_at) < max_age)
        .cloned()
        .collect()
}

/// Emits at-most-one notification per spot id per session
pub struct ProximityNotifier {
    /// Spot ids already surfaced this session; monotonically grows
    notified: FxHashSet<SpotId>,
    radius_m: f64,
}

impl ProximityNotifier {
    pub fn new(radius_m: f64) -> Self {
        Self { notified: FxHashSet::default(), radius_m }
    }

    /// Evaluate the live spot set against the current position.
    ///
    /// Invoked whenever either input changes. Each free, not-yet-notified
    /// spot within the radius yields exactly one event and joins the dedup
    /// set.
    pub fn on_tick(
        &mut self,
        current: GeoPoint,
        spots: &[PublishedSpot],
    ) -> Vec<NotificationEvent> {
        let mut events = Vec::new();

        for spot in spots {
            if !spot.is_free() || self.notified.contains(&spot.id) {
                continue;
            }

            let distance_m = haversine_distance(current, spot.point());
            if distance_m > self.radius_m {
                debug!(
                    spot_id = %spot.id,
                    distance_m = %format!("{distance_m:.0}"),
                    "spot_out_of_range"
                );
                continue;
            }

            self.notified.insert(spot.id.clone());
            info!(
                spot_id = %spot.id,
                distance_m = %format!("{distance_m:.0}"),
                "spot_nearby"
            );
            events.push(NotificationEvent {
                spot_id: spot.id.clone(),
                latitude: spot.latitude,
                longitude: spot.longitude,
                distance_m,
            });
        }

        events
    }

    /// Number of spots notified so far this session
    pub fn notified_count(&self) -> usize {
        self.notified.len()
    }

    /// New monitoring session: the dedup set must not outlive the old one
    pub fn reset(&mut self) {
        self.notified.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SpotStatus;

    const HERE: GeoPoint = GeoPoint { latitude: 41.9028, longitude: 12.4964 };

    fn spot(id: &str, latitude: f64, longitude: f64, status: SpotStatus) -> PublishedSpot {
        PublishedSpot {
            id: SpotId(id.to_string()),
            latitude,
            longitude,
            status,
            created_at: Utc::now(),
            user_id: "someone-else".to_string(),
        }
    }

    /// ~800 m north of HERE (0.0072 degrees of latitude)
    fn spot_800m(id: &str) -> PublishedSpot {
        spot(id, 41.9100, 12.4964, SpotStatus::Free)
    }

    /// ~2 km north of HERE
    fn spot_2km(id: &str) -> PublishedSpot {
        spot(id, 41.9208, 12.4964, SpotStatus::Free)
    }

    #[test]
    fn test_nearby_free_spot_notifies_once() {
        let mut notifier = ProximityNotifier::new(1000.0);
        let spots = vec![spot_800m("a")];

        let events = notifier.on_tick(HERE, &spots);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].spot_id, SpotId("a".to_string()));
        assert!(events[0].distance_m > 700.0 && events[0].distance_m < 900.0);

        // Same inputs again: no further events
        let events = notifier.on_tick(HERE, &spots);
        assert!(events.is_empty());
        assert_eq!(notifier.notified_count(), 1);
    }

    #[test]
    fn test_out_of_range_spot_is_skipped() {
        let mut notifier = ProximityNotifier::new(1000.0);
        let events = notifier.on_tick(HERE, &[spot_2km("far")]);
        assert!(events.is_empty());

        // Not in the dedup set: it may still notify once it comes in range
        let events = notifier.on_tick(GeoPoint::new(41.9150, 12.4964), &[spot_2km("far")]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_non_free_spots_are_ignored() {
        let mut notifier = ProximityNotifier::new(1000.0);
        let spots = vec![
            spot("taken", 41.9100, 12.4964, SpotStatus::Taken),
            spot("unknown", 41.9100, 12.4964, SpotStatus::Unknown),
        ];
        assert!(notifier.on_tick(HERE, &spots).is_empty());
    }

    #[test]
    fn test_each_spot_notifies_independently() {
        let mut notifier = ProximityNotifier::new(1000.0);
        let spots = vec![spot_800m("a"), spot("b", 41.8960, 12.4964, SpotStatus::Free)];

        let events = notifier.on_tick(HERE, &spots);
        assert_eq!(events.len(), 2);

        // Adding a third spot later only notifies the new one
        let mut spots = spots;
        spots.push(spot("c", 41.9090, 12.4964, SpotStatus::Free));
        let events = notifier.on_tick(HERE, &spots);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].spot_id, SpotId("c".to_string()));
    }

    #[test]
    fn test_reset_starts_a_new_session() {
        let mut notifier = ProximityNotifier::new(1000.0);
        let spots = vec![spot_800m("a")];
        assert_eq!(notifier.on_tick(HERE, &spots).len(), 1);

        notifier.reset();
        assert_eq!(notifier.notified_count(), 0);
        assert_eq!(notifier.on_tick(HERE, &spots).len(), 1);
    }

    #[test]
    fn test_filter_fresh_drops_expired_spots() {
        let now = Utc::now();
        let mut fresh = spot_800m("fresh");
        fresh.created_at = now - chrono::Duration::seconds(60);
        let mut stale = spot_800m("stale");
        stale.created_at = now - chrono::Duration::seconds(6 * 60);

        let kept = filter_fresh(&[fresh.clone(), stale], now, Duration::from_secs(5 * 60));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, fresh.id);
    }
}
