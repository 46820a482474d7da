//! Prometheus metrics HTTP endpoint
//!
//! Exposes fleet sync metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
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

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.peek();
    let mut output = String::with_capacity(4096);

    write_cycle_metrics(&mut output, site_id, &summary);
    write_fetch_metrics(&mut output, site_id, &summary);
    write_fleet_metrics(&mut output, site_id, &summary);

    output
}

fn write_cycle_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "fleet_sync_cycles_total",
        "Sync cycles applied to the fleet",
        MetricType::Counter,
        site,
        summary.cycles_total,
    );
    write_metric(
        output,
        "fleet_sync_cycles_failed_total",
        "Sync cycles that ended in an error",
        MetricType::Counter,
        site,
        summary.cycles_failed,
    );
    write_metric(
        output,
        "fleet_sync_cycles_discarded_total",
        "Cycle results dropped because the connection was stopped",
        MetricType::Counter,
        site,
        summary.cycles_discarded,
    );
    write_metric(
        output,
        "fleet_sync_cycles_skipped_total",
        "Ticks skipped while a previous cycle was in flight",
        MetricType::Counter,
        site,
        summary.cycles_skipped,
    );
    write_metric(
        output,
        "fleet_sync_rows_fetched_total",
        "Raw rows received from the source",
        MetricType::Counter,
        site,
        summary.rows_fetched,
    );
    write_metric(
        output,
        "fleet_sync_rows_dropped_total",
        "Rows dropped for a missing or invalid vehicle id",
        MetricType::Counter,
        site,
        summary.rows_dropped,
    );
}

fn write_fetch_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "fleet_sync_fetch_latency_ms",
        "Source fetch latency in milliseconds",
        site,
        &summary.fetch_latency_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.fetch_latency_sum_ms,
    );
    write_metric(
        output,
        "fleet_sync_fetch_latency_p95_ms",
        "95th percentile fetch latency",
        MetricType::Gauge,
        site,
        summary.fetch_latency_p95_ms,
    );
    write_metric(
        output,
        "fleet_sync_fetch_latency_max_ms",
        "Maximum fetch latency",
        MetricType::Gauge,
        site,
        summary.max_fetch_latency_ms,
    );
}

fn write_fleet_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "fleet_sync_vehicles",
        "Vehicles in the fleet",
        MetricType::Gauge,
        site,
        summary.fleet_size,
    );

    let _ = writeln!(output, "# HELP fleet_sync_vehicles_by_status Vehicles per status");
    let _ = writeln!(output, "# TYPE fleet_sync_vehicles_by_status gauge");
    for (status, count) in [
        ("vor", summary.status_vor),
        ("on_route", summary.status_on_route),
        ("yard", summary.status_yard),
        ("running_defect", summary.status_running_defect),
    ] {
        let _ = writeln!(
            output,
            "fleet_sync_vehicles_by_status{{site=\"{site}\",status=\"{status}\"}} {count}"
        );
    }

    write_metric(
        output,
        "fleet_sync_connection_state",
        "Connection state (0=idle 1=connecting 2=connected 3=updating 4=error)",
        MetricType::Gauge,
        site,
        summary.connection_state,
    );
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
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
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
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
