//! Domain models - core parking detection types
//!
//! This module contains the canonical data types used throughout the system:
//! - `PositionSample` - one reading from the device position stream
//! - `DetectionState` - the parking state machine's state
//! - `CandidateSpot` / `PublishedSpot` - provisional and shared parking spots
//! - `NotificationEvent` - proximity notification for a nearby free spot
//! - `geo` - the shared haversine distance primitive

pub mod geo;
pub mod types;
