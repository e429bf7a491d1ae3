//! Services - detection logic and session orchestration
//!
//! This module contains the core business logic services:
//! - `detector` - Parking detection state machine
//! - `lifecycle` - At-most-once spot publishing per parked episode
//! - `notifier` - Proximity notifications with per-session dedup
//! - `session` - The select! loop wiring everything together

pub mod detector;
pub mod lifecycle;
pub mod notifier;
pub mod session;

// Re-export commonly used types
pub use detector::{DetectorEffect, ParkingDetector};
pub use lifecycle::SpotLifecycle;
pub use notifier::ProximityNotifier;
pub use session::MonitoringSession;
