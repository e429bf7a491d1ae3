//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `position` - MQTT client for receiving device position updates
//! - `store` - HTTP document store client (spots and user profiles)
//! - `spot_feed` - Periodic polling of the free-spot collection
//! - `egress` - Local spot/notification output to file (JSONL format)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod egress;
pub mod position;
pub mod prometheus;
pub mod spot_feed;
pub mod store;

// Re-export commonly used types
pub use egress::Egress;
pub use store::{HttpDocumentStore, PersistError, ProfileStore, SpotStore, UserProfile};
