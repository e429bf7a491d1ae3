//! Prometheus metrics HTTP endpoint
//!
//! Exposes detection metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::Metrics;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

/// Format metrics in Prometheus text exposition format.
///
/// Reads only the monotonic counters; the rate window consumed by the
/// periodic log reporter is left untouched.
fn format_prometheus_metrics(metrics: &Metrics) -> String {
    let mut output = String::with_capacity(2048);

    write_metric(
        &mut output,
        "parkwatch_samples_total",
        "Position samples processed",
        MetricType::Counter,
        metrics.samples_total(),
    );
    write_metric(
        &mut output,
        "parkwatch_samples_dropped_total",
        "Position samples dropped due to channel full",
        MetricType::Counter,
        metrics.samples_dropped(),
    );
    write_metric(
        &mut output,
        "parkwatch_samples_stale_total",
        "Position samples discarded as out-of-order",
        MetricType::Counter,
        metrics.samples_stale(),
    );
    write_metric(
        &mut output,
        "parkwatch_settle_armed_total",
        "Settle timers armed",
        MetricType::Counter,
        metrics.settle_armed_total(),
    );
    write_metric(
        &mut output,
        "parkwatch_settle_cancelled_total",
        "Settle timers cancelled by movement",
        MetricType::Counter,
        metrics.settle_cancelled_total(),
    );
    write_metric(
        &mut output,
        "parkwatch_parks_total",
        "Confirmed parking events",
        MetricType::Counter,
        metrics.parks_total(),
    );
    write_metric(
        &mut output,
        "parkwatch_departures_total",
        "Confirmed departures from a parked spot",
        MetricType::Counter,
        metrics.departures_total(),
    );
    write_metric(
        &mut output,
        "parkwatch_publishes_total",
        "Spots published to the shared store",
        MetricType::Counter,
        metrics.publishes_total(),
    );
    write_metric(
        &mut output,
        "parkwatch_publish_failures_total",
        "Spot publish attempts that failed",
        MetricType::Counter,
        metrics.publish_failures_total(),
    );
    write_metric(
        &mut output,
        "parkwatch_notifications_total",
        "Proximity notifications emitted",
        MetricType::Counter,
        metrics.notifications_total(),
    );
    write_metric(
        &mut output,
        "parkwatch_spot_poll_errors_total",
        "Failed live-spot polls",
        MetricType::Counter,
        metrics.spot_poll_errors_total(),
    );
    write_metric(
        &mut output,
        "parkwatch_detection_state",
        "Detection state (0=idle 1=acquiring 2=moving 3=settling 4=parked 5=shared 6=error)",
        MetricType::Gauge,
        metrics.detection_state(),
    );
    write_metric(
        &mut output,
        "parkwatch_live_spots",
        "Free spots in the last successful poll",
        MetricType::Gauge,
        metrics.live_spots(),
    );

    output
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
