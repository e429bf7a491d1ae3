//! Local egress - writes published spots and notifications to file
//!
//! Records are written in JSONL format (one JSON object per line) with a
//! `kind` discriminator, to the file specified in config. This is the local
//! audit trail; the shared store is the source of truth.

use crate::domain::types::{NotificationEvent, PublishedSpot};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

#[derive(Serialize)]
struct SpotRecord<'a> {
    kind: &'static str,
    #[serde(flatten)]
    spot: &'a PublishedSpot,
}

#[derive(Serialize)]
struct NotificationRecord<'a> {
    kind: &'static str,
    #[serde(flatten)]
    event: &'a NotificationEvent,
}

/// Egress writer for spot and notification records
pub struct Egress {
    file_path: String,
}

impl Egress {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "egress_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write a published spot to the egress file
    /// Returns true if successful, false otherwise
    pub fn write_spot(&self, spot: &PublishedSpot) -> bool {
        let record = SpotRecord { kind: "spot_shared", spot };
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                error!(spot_id = %spot.id, error = %e, "spot_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                info!(
                    spot_id = %spot.id,
                    latitude = %spot.latitude,
                    longitude = %spot.longitude,
                    "spot_egressed"
                );
                true
            }
            Err(e) => {
                error!(spot_id = %spot.id, error = %e, "spot_egress_failed");
                false
            }
        }
    }

    /// Write a proximity notification to the egress file
    pub fn write_notification(&self, event: &NotificationEvent) -> bool {
        let record = NotificationRecord { kind: "spot_nearby", event };
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                error!(spot_id = %event.spot_id, error = %e, "notification_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => true,
            Err(e) => {
                error!(spot_id = %event.spot_id, error = %e, "notification_egress_failed");
                false
            }
        }
    }

    /// Append a line to the egress file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "egress_written");

        Ok(())
    }
}
