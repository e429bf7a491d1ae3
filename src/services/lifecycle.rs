//! Spot lifecycle: at-most-one publish per parked episode
//!
//! The lifecycle holds the publish guard for the current parked episode. The
//! guard is claimed before the store call is spawned, so a burst of departure
//! samples can never double-publish, and it is reset only when a new
//! candidate is armed. A failed store call keeps the claim: there is no
//! automatic retry within an episode, the next one starts clean.

use crate::domain::types::{CandidateSpot, PublishedSpot};
use crate::io::store::PersistError;
use tracing::{debug, info, warn};

/// Publish guard and episode bookkeeping
pub struct SpotLifecycle {
    /// The episode's single publish has been claimed
    claimed: bool,
    /// Candidate of the current (or last failed) episode; kept across a
    /// publish failure so the attempt can be inspected, cleared on the next
    /// episode
    last_candidate: Option<CandidateSpot>,
    /// Last publish failure, if any
    last_failure: Option<String>,
}

impl SpotLifecycle {
    pub fn new() -> Self {
        Self { claimed: false, last_candidate: None, last_failure: None }
    }

    /// A new candidate was confirmed (`Settling` -> `Parked`): start a fresh
    /// episode. This is the only place the publish guard resets.
    pub fn begin_episode(&mut self, candidate: CandidateSpot) {
        self.claimed = false;
        self.last_failure = None;
        self.last_candidate = Some(candidate);
        debug!(
            latitude = %candidate.latitude,
            longitude = %candidate.longitude,
            "episode_started"
        );
    }

    /// Claim the episode's single publish.
    ///
    /// Returns `true` exactly once per episode; every later call is refused.
    pub fn try_claim(&mut self) -> bool {
        if self.last_candidate.is_none() {
            debug!("publish_claim_without_episode");
            return false;
        }
        if self.claimed {
            debug!("publish_already_claimed");
            return false;
        }
        self.claimed = true;
        true
    }

    /// Record a successful publish
    pub fn note_published(&mut self, spot: &PublishedSpot) {
        self.last_failure = None;
        info!(
            spot_id = %spot.id,
            latitude = %spot.latitude,
            longitude = %spot.longitude,
            "spot_published"
        );
    }

    /// Record a failed publish.
    ///
    /// The claim is kept (no retry within the episode) and the candidate
    /// remains until the next episode resets it.
    pub fn note_failure(&mut self, err: &PersistError) {
        self.last_failure = Some(err.to_string());
        warn!(error = %err, "spot_publish_failed");
    }

    /// Candidate of the current episode, if one was armed
    pub fn last_candidate(&self) -> Option<CandidateSpot> {
        self.last_candidate
    }

    pub fn already_shared(&self) -> bool {
        self.claimed && self.last_failure.is_none()
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Session start/stop: drop all episode state
    pub fn reset(&mut self) {
        self.claimed = false;
        self.last_candidate = None;
        self.last_failure = None;
    }
}

impl Default for SpotLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{SpotId, SpotStatus};
    use chrono::Utc;

    fn candidate() -> CandidateSpot {
        CandidateSpot { latitude: 41.9028, longitude: 12.4964 }
    }

    fn published() -> PublishedSpot {
        PublishedSpot {
            id: SpotId("spot-1".to_string()),
            latitude: 41.9028,
            longitude: 12.4964,
            status: SpotStatus::Free,
            created_at: Utc::now(),
            user_id: "owner-1".to_string(),
        }
    }

    #[test]
    fn test_claim_requires_episode() {
        let mut lifecycle = SpotLifecycle::new();
        assert!(!lifecycle.try_claim());
    }

    #[test]
    fn test_claim_is_at_most_once_per_episode() {
        let mut lifecycle = SpotLifecycle::new();
        lifecycle.begin_episode(candidate());

        assert!(lifecycle.try_claim());
        assert!(!lifecycle.try_claim());
        assert!(!lifecycle.try_claim());
    }

    #[test]
    fn test_new_episode_resets_guard() {
        let mut lifecycle = SpotLifecycle::new();
        lifecycle.begin_episode(candidate());
        assert!(lifecycle.try_claim());
        lifecycle.note_published(&published());
        assert!(lifecycle.already_shared());

        lifecycle.begin_episode(candidate());
        assert!(!lifecycle.already_shared());
        assert!(lifecycle.try_claim());
    }

    #[test]
    fn test_failure_keeps_claim_and_candidate() {
        let mut lifecycle = SpotLifecycle::new();
        lifecycle.begin_episode(candidate());
        assert!(lifecycle.try_claim());

        lifecycle.note_failure(&PersistError::Http("503 from store".to_string()));

        // No retry within the episode, but the attempt stays inspectable
        assert!(!lifecycle.try_claim());
        assert!(!lifecycle.already_shared());
        assert_eq!(lifecycle.last_candidate(), Some(candidate()));
        assert!(lifecycle.last_failure().unwrap().contains("503"));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut lifecycle = SpotLifecycle::new();
        lifecycle.begin_episode(candidate());
        lifecycle.try_claim();

        lifecycle.reset();
        assert!(lifecycle.last_candidate().is_none());
        assert!(!lifecycle.already_shared());
        assert!(!lifecycle.try_claim());
    }
}
