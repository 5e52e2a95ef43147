//! Router tests over real probes.

use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use pulse_api::{HealthState, build_router};
use pulse_probe::probe::{spawn_cluster_readiness, spawn_default, spawn_unavailable};
use pulse_probe::{MembershipFeed, Signal, Status};
use tower::ServiceExt;

async fn get(router: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn alive_and_ready_report_probe_status() {
    let (liveness, set_liveness) = spawn_default("live", Signal::Liveness, Status::up("alive"));
    let feed = MembershipFeed::new(16);
    let readiness = spawn_cluster_readiness("a", &feed, Duration::from_secs(20));
    let router = build_router(HealthState {
        liveness,
        readiness,
        ask_timeout: Duration::from_secs(1),
    });

    let (code, body) = get(router.clone(), "/alive").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["up"], true);
    assert_eq!(body["message"], "alive");

    let (code, body) = get(router.clone(), "/ready").await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["message"].as_str().unwrap().contains("has not joined"));

    set_liveness.down("store failure").unwrap();
    feed.publish(pulse_probe::MemberEvent::Up("a".into()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (code, body) = get(router.clone(), "/alive").await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], "store failure");

    let (code, body) = get(router, "/ready").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["up"], true);
}

#[tokio::test]
async fn misconfigured_probe_is_unavailable() {
    let liveness = spawn_unavailable(Signal::Liveness, "unknown liveness provider 'bogus'");
    let (readiness, _) = spawn_default("ready", Signal::Readiness, Status::up("ready"));
    let router = build_router(HealthState {
        liveness,
        readiness,
        ask_timeout: Duration::from_secs(1),
    });

    let (code, body) = get(router, "/alive").await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["message"].as_str().unwrap().starts_with("misconfigured liveness probe"));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let (liveness, _) = spawn_default("live", Signal::Liveness, Status::up("alive"));
    let (readiness, _) = spawn_default("ready", Signal::Readiness, Status::up("ready"));
    let router = build_router(HealthState {
        liveness,
        readiness,
        ask_timeout: Duration::from_secs(1),
    });

    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
