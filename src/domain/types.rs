//! Shared types for the parking detection core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Newtype wrapper for spot identifiers to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SpotId(pub String);

impl std::fmt::Display for SpotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A geographic coordinate (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    #[inline]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// One reading from the device position stream.
///
/// Immutable once created; each new sample supersedes the previous one.
/// `speed_mps` may be absent when the provider cannot derive a speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    pub timestamp_ms: u64,
}

impl PositionSample {
    #[inline]
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Speed with unreported values mapped to stationary.
    ///
    /// An absent speed gates the settle timer the same as 0 m/s; this is the
    /// only place the `None` case is interpreted.
    #[inline]
    pub fn speed_or_zero(&self) -> f64 {
        self.speed_mps.unwrap_or(0.0)
    }
}

/// Parking state machine state
///
/// Owned exclusively by the detector; transitions are the only mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionState {
    Idle,
    AcquiringPermission,
    Moving,
    Settling,
    Parked,
    SpotShared,
    Error,
}

impl DetectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionState::Idle => "idle",
            DetectionState::AcquiringPermission => "acquiring_permission",
            DetectionState::Moving => "moving",
            DetectionState::Settling => "settling",
            DetectionState::Parked => "parked",
            DetectionState::SpotShared => "spot_shared",
            DetectionState::Error => "error",
        }
    }

    /// Numeric value for the Prometheus state gauge
    pub fn gauge_value(&self) -> u64 {
        match self {
            DetectionState::Idle => 0,
            DetectionState::AcquiringPermission => 1,
            DetectionState::Moving => 2,
            DetectionState::Settling => 3,
            DetectionState::Parked => 4,
            DetectionState::SpotShared => 5,
            DetectionState::Error => 6,
        }
    }
}

/// The provisional parked location, captured when the settle timer fired.
/// Exactly one candidate may exist at a time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateSpot {
    pub latitude: f64,
    pub longitude: f64,
}

impl CandidateSpot {
    #[inline]
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Spot status in the shared store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpotStatus {
    Free,
    Taken,
    #[serde(other)]
    Unknown,
}

impl SpotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpotStatus::Free => "free",
            SpotStatus::Taken => "taken",
            SpotStatus::Unknown => "unknown",
        }
    }
}

/// A parking spot submitted to the shared store, visible to other users.
///
/// Immutable after creation except for `status`, which external consumers
/// drive; this core only ever writes `Free`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedSpot {
    pub id: SpotId,
    pub latitude: f64,
    pub longitude: f64,
    pub status: SpotStatus,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
}

impl PublishedSpot {
    #[inline]
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.status == SpotStatus::Free
    }
}

/// Proximity notification for a free spot within the configured radius
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub spot_id: SpotId,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_m: f64,
}

/// Position provider error taxonomy
///
/// All three are terminal for the monitoring session: the state machine
/// moves to `Error` and monitoring stops, with no automatic retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderError {
    PermissionDenied,
    Unavailable,
    Timeout,
}

impl ProviderError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderError::PermissionDenied => "permission_denied",
            ProviderError::Unavailable => "position_unavailable",
            ProviderError::Timeout => "timeout",
        }
    }

    /// Human-readable message surfaced to the user
    pub fn message(&self) -> &'static str {
        match self {
            ProviderError::PermissionDenied => "Geolocation permission was denied.",
            ProviderError::Unavailable => "Position information is unavailable.",
            ProviderError::Timeout => "The geolocation request timed out.",
        }
    }

    /// Parse the wire representation used by the position feed
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "permission_denied" => Some(ProviderError::PermissionDenied),
            "position_unavailable" => Some(ProviderError::Unavailable),
            "timeout" => Some(ProviderError::Timeout),
            _ => None,
        }
    }
}

/// Event delivered to the session by the position feed
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Sample(PositionSample),
    Error(ProviderError),
}

/// Wire message published by the device on the position topic.
///
/// Exactly one of `sample` or `error` is expected per message.
#[derive(Debug, Deserialize)]
pub struct WatchMessage {
    #[serde(default)]
    pub sample: Option<PositionSample>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_or_zero_treats_missing_as_stationary() {
        let sample = PositionSample {
            latitude: 41.9028,
            longitude: 12.4964,
            speed_mps: None,
            timestamp_ms: 1,
        };
        assert_eq!(sample.speed_or_zero(), 0.0);

        let moving = PositionSample { speed_mps: Some(3.5), ..sample };
        assert_eq!(moving.speed_or_zero(), 3.5);
    }

    #[test]
    fn test_detection_state_as_str() {
        assert_eq!(DetectionState::Idle.as_str(), "idle");
        assert_eq!(DetectionState::Settling.as_str(), "settling");
        assert_eq!(DetectionState::SpotShared.as_str(), "spot_shared");
    }

    #[test]
    fn test_provider_error_from_wire() {
        assert_eq!(
            ProviderError::from_wire("permission_denied"),
            Some(ProviderError::PermissionDenied)
        );
        assert_eq!(
            ProviderError::from_wire("position_unavailable"),
            Some(ProviderError::Unavailable)
        );
        assert_eq!(ProviderError::from_wire("timeout"), Some(ProviderError::Timeout));
        assert_eq!(ProviderError::from_wire("something_else"), None);
    }

    #[test]
    fn test_spot_status_serde() {
        assert_eq!(serde_json::to_string(&SpotStatus::Free).unwrap(), "\"free\"");
        let status: SpotStatus = serde_json::from_str("\"taken\"").unwrap();
        assert_eq!(status, SpotStatus::Taken);
        // Unrecognized statuses from external writers must not fail parsing
        let status: SpotStatus = serde_json::from_str("\"reserved\"").unwrap();
        assert_eq!(status, SpotStatus::Unknown);
    }

    #[test]
    fn test_published_spot_round_trip() {
        let spot = PublishedSpot {
            id: SpotId("0192aa-test".to_string()),
            latitude: 41.9028,
            longitude: 12.4964,
            status: SpotStatus::Free,
            created_at: Utc::now(),
            user_id: "user-1".to_string(),
        };
        let json = serde_json::to_string(&spot).unwrap();
        let parsed: PublishedSpot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spot);
        assert!(parsed.is_free());
    }
}
