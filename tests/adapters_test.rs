//! Network adapters against an in-process HTTP source

use bytes::Bytes;
use fleet_sync::domain::{SourceConfig, SourceType, StatusCounts, SyncError, VehicleId, VehicleStatus};
use fleet_sync::infra::Metrics;
use fleet_sync::io::delimited::DelimitedExportAdapter;
use fleet_sync::io::json_endpoint::TokenedJsonAdapter;
use fleet_sync::io::{http_client, SourceAdapter};
use fleet_sync::services::{ConnectionState, EngineSettings, FleetEngine};
use http_body_util::Full;
use hyper::header::AUTHORIZATION;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

const TOKEN: &str = "letmein";

const CSV_BODY: &str = "HGV_Number,Status,Location,Driver\n\
                        1,On Route,M1 J32,J. Smith\n\
                        2,VOR,Main Yard,\n\
                        ,Yard,Main Yard,\n\
                        4,running_defect,A1(M),A. Patel\n";

const SEMICOLON_BODY: &str = "\u{feff}Vehicle;State;Location\n7;Yard;Main Yard\n8;On Route;Hull Docks\n";

const JSON_BODY: &str = r#"[
    {"HGV_Number": 3, "Status": "VOR", "Location": "Leeds Depot"},
    {"HGV_Number": "5", "Status": "On Route", "Driver": "L. Chen"},
    "not a row"
]"#;

async fn route(req: Request<hyper::body::Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, body) = match req.uri().path() {
        "/fleet.csv" => (StatusCode::OK, CSV_BODY),
        "/fleet.ssv" => (StatusCode::OK, SEMICOLON_BODY),
        "/fleet.json" => {
            let bearer = req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok());
            if bearer == Some("Bearer letmein") {
                (StatusCode::OK, JSON_BODY)
            } else {
                (StatusCode::UNAUTHORIZED, "unauthorized")
            }
        }
        "/broken.json" => (StatusCode::OK, "{\"rows\": ["),
        "/boom" => (StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        _ => (StatusCode::NOT_FOUND, "Not Found"),
    };
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    Ok(response)
}

async fn serve() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(route))
                    .await;
            });
        }
    });
    addr
}

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

fn delimited(addr: SocketAddr, path: &str) -> DelimitedExportAdapter {
    let config = SourceConfig::new(SourceType::DelimitedExport).with_endpoint(url(addr, path));
    DelimitedExportAdapter::new(http_client(2_000).unwrap(), &config).unwrap()
}

fn json(addr: SocketAddr, path: &str, token: Option<&str>) -> TokenedJsonAdapter {
    let mut config = SourceConfig::new(SourceType::TokenedJsonEndpoint).with_endpoint(url(addr, path));
    if let Some(token) = token {
        config = config.with_api_key(token);
    }
    TokenedJsonAdapter::new(http_client(2_000).unwrap(), &config)
}

#[tokio::test]
async fn test_delimited_export_fetches_rows() {
    let addr = serve().await;
    let rows = delimited(addr, "/fleet.csv").fetch_rows().await.unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["Status"], "On Route");
    assert_eq!(rows[3]["Driver"], "A. Patel");
}

#[tokio::test]
async fn test_delimited_export_sniffs_semicolons() {
    let addr = serve().await;
    let rows = delimited(addr, "/fleet.ssv").fetch_rows().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["Vehicle"], "7");
    assert_eq!(rows[1]["Location"], "Hull Docks");
}

#[tokio::test]
async fn test_http_error_is_source_unavailable() {
    let addr = serve().await;

    let err = delimited(addr, "/boom").fetch_rows().await.unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable(ref m) if m.contains("500")));

    let err = json(addr, "/missing", Some(TOKEN)).fetch_rows().await.unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable(ref m) if m.contains("404")));
}

#[tokio::test]
async fn test_json_endpoint_sends_bearer_token() {
    let addr = serve().await;

    let rows = json(addr, "/fleet.json", Some(TOKEN)).fetch_rows().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["Driver"], "L. Chen");

    let err = json(addr, "/fleet.json", None).fetch_rows().await.unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable(ref m) if m.contains("401")));
}

#[tokio::test]
async fn test_json_endpoint_rejects_malformed_body() {
    let addr = serve().await;
    let err = json(addr, "/broken.json", None).fetch_rows().await.unwrap_err();
    assert!(matches!(err, SyncError::Parse(_)));
}

#[tokio::test]
async fn test_unreachable_source_is_source_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = delimited(addr, "/fleet.csv").fetch_rows().await.unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable(_)));
}

#[tokio::test]
async fn test_engine_syncs_from_delimited_export() {
    let addr = serve().await;
    let settings = EngineSettings { seed_vehicles: 2, ..EngineSettings::default() };
    let engine = FleetEngine::new(settings, Arc::new(Metrics::new())).unwrap();

    let config = SourceConfig::new(SourceType::DelimitedExport)
        .with_endpoint(url(addr, "/fleet.csv"))
        .with_interval_ms(60_000);
    engine.connect(config).await.unwrap();

    assert_eq!(engine.state(), ConnectionState::Connected);
    assert!(engine.is_polling());

    let snapshot = engine.snapshot();
    // The row without an id is dropped; slot 3 is filled with a placeholder
    assert_eq!(snapshot.vehicles.len(), 4);
    assert_eq!(snapshot.vehicles[0].id, VehicleId(1));
    assert_eq!(snapshot.vehicles[0].status, VehicleStatus::OnRoute);
    assert_eq!(snapshot.vehicles[2].status, VehicleStatus::Yard);
    assert_eq!(snapshot.vehicles[2].location, "N/A");
    assert_eq!(
        snapshot.counts,
        StatusCounts { vor: 1, on_route: 1, yard: 1, running_defect: 1 }
    );
    assert!(snapshot.last_success.is_some());

    engine.disconnect();
    assert_eq!(engine.state(), ConnectionState::Idle);
    assert!(!engine.is_polling());
}

#[tokio::test]
async fn test_engine_connect_failure_reports_error_state() {
    let addr = serve().await;
    let engine = FleetEngine::new(EngineSettings::default(), Arc::new(Metrics::new())).unwrap();

    let config = SourceConfig::new(SourceType::TokenedJsonEndpoint)
        .with_endpoint(url(addr, "/fleet.json"))
        .with_api_key("wrong");
    let err = engine.connect(config).await.unwrap_err();

    assert!(matches!(err, SyncError::SourceUnavailable(_)));
    assert!(matches!(engine.state(), ConnectionState::Error(ref m) if m.contains("401")));
    assert!(!engine.is_polling());
}
