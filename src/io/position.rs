//! MQTT client for receiving device position updates
//!
//! The device publishes one JSON message per position reading (or provider
//! error) on the position topic. Messages are parsed here and forwarded to
//! the session over a bounded channel; a full channel drops samples rather
//! than stalling the MQTT eventloop.

use crate::domain::types::{PositionSample, ProviderError, WatchEvent, WatchMessage};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Discards out-of-order and replayed position readings.
///
/// Timestamps must be strictly increasing; a reading at or before the last
/// accepted one is dropped before it can disturb the detector.
struct StalenessGuard {
    last_timestamp_ms: u64,
}

impl StalenessGuard {
    fn new() -> Self {
        Self { last_timestamp_ms: 0 }
    }

    fn accept(&mut self, sample: &PositionSample) -> bool {
        if sample.timestamp_ms <= self.last_timestamp_ms {
            return false;
        }
        self.last_timestamp_ms = sample.timestamp_ms;
        true
    }
}

/// Parse one position-topic payload into a watch event.
///
/// A message carrying both a sample and an error is treated as an error
/// message. Unparsable payloads and unknown error codes yield `None`.
pub fn parse_watch_message(json_str: &str) -> Option<WatchEvent> {
    let message: WatchMessage = match serde_json::from_str(json_str) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "watch_message_invalid");
            return None;
        }
    };

    if let Some(code) = message.error {
        return match ProviderError::from_wire(&code) {
            Some(err) => Some(WatchEvent::Error(err)),
            None => {
                warn!(code = %code, "watch_error_unknown_code");
                None
            }
        };
    }

    message.sample.map(WatchEvent::Sample)
}

/// Run the MQTT position feed until shutdown or channel close.
///
/// Events are forwarded with try_send so the eventloop never blocks on a
/// slow session; drops are counted and warned about at most once a second.
pub async fn start_position_feed(
    config: &Config,
    event_tx: mpsc::Sender<WatchEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut mqttoptions = MqttOptions::new("parkwatch", config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.position_topic(), QoS::AtMostOnce).await?;

    info!(
        topic = %config.position_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "position_feed_subscribed"
    );

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);
    let mut staleness = StalenessGuard::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("position_feed_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = match std::str::from_utf8(&publish.payload) {
                            Ok(s) => s,
                            Err(e) => {
                                warn!(error = %e, "position_payload_not_utf8");
                                continue;
                            }
                        };

                        let Some(event) = parse_watch_message(payload) else {
                            continue;
                        };

                        if let WatchEvent::Sample(ref sample) = event {
                            if !staleness.accept(sample) {
                                metrics.record_sample_stale();
                                debug!(
                                    timestamp_ms = %sample.timestamp_ms,
                                    "position_sample_stale"
                                );
                                continue;
                            }
                        }

                        if let Err(e) = event_tx.try_send(event) {
                            match e {
                                TrySendError::Full(_) => {
                                    metrics.record_sample_dropped();
                                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                        warn!("position_event_dropped: channel full");
                                        last_drop_warn = Instant::now();
                                    }
                                }
                                TrySendError::Closed(_) => {
                                    warn!("position_channel_closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("position_feed_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "position_feed_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
