//! HTTP routes driven through the router without binding a socket.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use grillgauge::api::{ApiServer, ApiServerConfig, AppState};
use grillgauge::ble::{MockDevice, MockTransport, ReadBehavior};
use grillgauge::domain::{ProbeAddress, ProbeIdentity, ProbeName};
use grillgauge::metrics::{HealthChecker, MetricsStore, PrometheusExporter, SystemHealth};
use grillgauge::poller::{POLLER_COMPONENT, PollerConfig, PollingLoop};
use grillgauge::registry::{MemoryStore, ProbeRegistry};

struct TestApp {
    server: ApiServer,
    poller: Option<PollingLoop<MockTransport>>,
}

async fn test_app() -> TestApp {
    let identity = ProbeIdentity::new(
        ProbeAddress::new("AA:00:00:00:00:01").unwrap(),
        ProbeName::new("Brisket").unwrap(),
    );
    let mut registry = ProbeRegistry::new();
    registry.register(identity.clone(), None).unwrap();

    let transport = Arc::new(MockTransport::with_devices([MockDevice::probe(
        identity.address.clone(),
    )
    .read_by_default(ReadBehavior::temperatures(55.0, 180.0))]));
    let store = Arc::new(MemoryStore::new(registry));
    let metrics = Arc::new(MetricsStore::new());
    let poller =
        PollingLoop::new(transport, store, metrics.clone(), PollerConfig::default()).unwrap();

    let exporter = Arc::new(PrometheusExporter::new(metrics, poller.membership()));
    let health_checker = Arc::new(HealthChecker::new());
    let poller_health = poller.health();
    health_checker
        .register(POLLER_COMPONENT, Arc::new(move || poller_health.component()))
        .await;

    TestApp {
        server: ApiServer::new(
            ApiServerConfig::default(),
            AppState::new(exporter, health_checker),
        ),
        poller: Some(poller),
    }
}

async fn get(server: &ApiServer, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = server
        .build_router()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_health_follows_poller_lifecycle() {
    let mut app = test_app().await;

    let (status, _, body) = get(&app.server, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let health: SystemHealth = serde_json::from_str(&body).unwrap();
    assert!(health.components.contains_key(POLLER_COMPONENT));

    let (status, _, _) = get(&app.server, "/health/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let token = CancellationToken::new();
    let handle = app.poller.take().unwrap().spawn(token.clone());
    tokio::time::sleep(Duration::from_secs(1)).await;

    let (status, _, body) = get(&app.server, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let health: SystemHealth = serde_json::from_str(&body).unwrap();
    assert!(health.is_healthy());

    token.cancel();
    handle.await.unwrap();

    let (status, _, body) = get(&app.server, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains("polling loop stopped"));

    // Liveness only reflects the HTTP server.
    let (status, _, body) = get(&app.server, "/health/live").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("alive"));
}

#[tokio::test(start_paused = true)]
async fn test_metrics_endpoint() {
    let mut app = test_app().await;

    let (status, content_type, body) = get(&app.server, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        content_type.as_deref(),
        Some("text/plain; version=0.0.4; charset=utf-8")
    );
    assert!(body.is_empty());

    let mut poller = app.poller.take().unwrap();
    poller.run_cycle().await;

    let (_, _, body) = get(&app.server, "/metrics").await;
    let labels = "device_address=\"AA:00:00:00:00:01\",probe_name=\"brisket\"";
    assert!(body.contains("# TYPE grillgauge_meat_temperature_celsius gauge\n"));
    assert!(body.contains(&format!("grillgauge_meat_temperature_celsius{{{}}} 55\n", labels)));
    assert!(body.contains(&format!("grillgauge_grill_temperature_celsius{{{}}} 180\n", labels)));
    assert!(body.contains(&format!("grillgauge_probe_status{{{}}} 1\n", labels)));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = test_app().await;
    let (status, _, _) = get(&app.server, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
