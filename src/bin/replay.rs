//! Route replay - publishes a recorded position trace over MQTT
//!
//! Feeds the daemon a JSONL route file (one position message per line, the
//! same format the device publishes) for local testing:
//!
//!   cargo run --bin replay -- --route routes/park_and_leave.jsonl
//!
//! Lines that do not parse as position messages are skipped with a warning.

use clap::Parser;
use parkwatch::io::position::parse_watch_message;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Replay a recorded position route over MQTT")]
struct Args {
    /// JSONL route file, one position message per line
    #[arg(short, long)]
    route: String,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    mqtt_port: u16,

    /// Topic the daemon listens on
    #[arg(long, default_value = "parkwatch/position")]
    topic: String,

    /// Delay between messages in milliseconds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let content = std::fs::read_to_string(&args.route)?;

    let mut mqttoptions = MqttOptions::new("parkwatch-replay", &args.mqtt_host, args.mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 16);

    // Drive the eventloop in the background; the publisher below only
    // enqueues messages
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                warn!(error = %e, "replay_mqtt_error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    info!(
        route = %args.route,
        topic = %args.topic,
        interval_ms = %args.interval_ms,
        "replay_started"
    );

    let mut published = 0usize;
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if parse_watch_message(line).is_none() {
            warn!(line = %(lineno + 1), "route_line_skipped");
            continue;
        }

        client.publish(args.topic.as_str(), QoS::AtMostOnce, false, line).await?;
        published += 1;
        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    // Let the eventloop flush the last publish before exiting
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!(published = %published, "replay_finished");
    Ok(())
}
