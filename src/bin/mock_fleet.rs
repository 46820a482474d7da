//! Mock fleet source server
//!
//! Serves generated fleet data for local testing of the network adapters.
//! Every request produces a fresh batch, so statuses move between polls.
//!
//! Routes:
//! - GET /fleet.csv  - delimited export (header row + one row per vehicle)
//! - GET /fleet.json - JSON array of row objects, bearer token checked if set
//! - GET /health
//!
//! Usage:
//!   cargo run --bin mock-fleet -- --port 8080 --rows 57 --token secret

use bytes::Bytes;
use clap::Parser;
use fleet_sync::domain::RawRow;
use fleet_sync::io::mock::MockGenerator;
use http_body_util::Full;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

const CSV_COLUMNS: [&str; 4] = ["HGV_Number", "Status", "Location", "Driver"];

#[derive(Parser, Debug)]
#[command(name = "mock-fleet")]
#[command(about = "Mock fleet spreadsheet / JSON endpoint for local testing")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Vehicles per batch
    #[arg(short, long, default_value = "57")]
    rows: u32,

    /// RNG seed for reproducible batches
    #[arg(long)]
    seed: Option<u64>,

    /// Require `Authorization: Bearer <token>` on /fleet.json
    #[arg(long)]
    token: Option<String>,

    /// Field delimiter for /fleet.csv
    #[arg(long, default_value = ",")]
    delimiter: char,
}

struct MockServer {
    generator: MockGenerator,
    token: Option<String>,
    delimiter: u8,
}

impl MockServer {
    fn csv_body(&self) -> Result<Vec<u8>, csv::Error> {
        let mut writer = csv::WriterBuilder::new().delimiter(self.delimiter).from_writer(Vec::new());
        writer.write_record(CSV_COLUMNS)?;
        for row in self.generator.generate() {
            writer.write_record(CSV_COLUMNS.iter().map(|column| cell_text(&row, column)))?;
        }
        writer.into_inner().map_err(|e| e.into_error().into())
    }

    fn json_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.generator.generate())
    }

    fn authorized(&self, req: &Request<hyper::body::Incoming>) -> bool {
        let Some(token) = &self.token else {
            return true;
        };
        req.headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|presented| presented == token)
    }
}

fn cell_text(row: &RawRow, column: &str) -> String {
    match row.get(column) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(Full::new(body.into()))
        .expect("static response should not fail")
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    server: Arc<MockServer>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/fleet.csv") => match server.csv_body() {
            Ok(body) => respond(StatusCode::OK, "text/csv; charset=utf-8", body),
            Err(e) => {
                error!(error = %e, "csv_render_failed");
                respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "csv render failed")
            }
        },
        (&Method::GET, "/fleet.json") => {
            if !server.authorized(&req) {
                warn!("json_request_unauthorized");
                respond(StatusCode::UNAUTHORIZED, "text/plain", "missing or invalid bearer token")
            } else {
                match server.json_body() {
                    Ok(body) => respond(StatusCode::OK, "application/json", body),
                    Err(e) => {
                        error!(error = %e, "json_render_failed");
                        respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "json render failed")
                    }
                }
            }
        }
        (&Method::GET, "/health") => respond(StatusCode::OK, "text/plain", "ok"),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };
    info!(path = %req.uri().path(), status = %response.status().as_u16(), "request_served");
    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    if !args.delimiter.is_ascii() {
        anyhow::bail!("delimiter must be a single ASCII character");
    }

    let server = Arc::new(MockServer {
        generator: MockGenerator::new(args.rows, Duration::ZERO, args.seed),
        token: args.token.clone(),
        delimiter: args.delimiter as u8,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!(
        port = %args.port,
        rows = %args.rows,
        token_required = %args.token.is_some(),
        "mock_fleet_listening"
    );

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let server = server.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, server.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(peer = %peer, error = %e, "mock_http_error");
            }
        });
    }
}
