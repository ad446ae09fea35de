mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::extract::Path as AxumPath;
use axum::routing::get;
use axum::{Json, Router};
use common::{direct_config, settle, stations, Harness};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tuner_daemon::catalog::Catalog;
use tuner_daemon::http::{router, HttpState, ValidationResult};
use tuner_proto::config::{CatalogConfig, PlaybackConfig};
use tuner_proto::protocol::{PlaybackPhase, ValidationStatus};
use tuner_proto::store::StationStore;

async fn mirror(clicks: Arc<AtomicUsize>) -> String {
    let app = Router::new()
        .route(
            "/json/stations/byuuid",
            get(|| async {
                Json(json!([{
                    "stationuuid": "uuid-9", "name": "Delta Lounge",
                    "url": "http://delta.example/live", "tags": "lounge"
                }]))
            }),
        )
        .route(
            "/json/stations/bycountrycodeexact/:code",
            get(|AxumPath(code): AxumPath<String>| async move {
                Json(json!([{
                    "stationuuid": "uuid-fr", "name": "Radio Paris",
                    "url": "http://paris.example/live", "countrycode": code
                }]))
            }),
        )
        .route(
            "/json/url/:uuid",
            get(move || {
                let clicks = clicks.clone();
                async move {
                    clicks.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"ok": true}))
                }
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

async fn app(h: &Harness) -> Router {
    app_counting_clicks(h).await.0
}

async fn app_counting_clicks(h: &Harness) -> (Router, Arc<AtomicUsize>) {
    let clicks = Arc::new(AtomicUsize::new(0));
    let catalog = Catalog::new(&CatalogConfig {
        scheme: "http".into(),
        mirrors: vec![mirror(clicks.clone()).await],
        ..CatalogConfig::default()
    })
    .unwrap();
    let app = router(HttpState {
        orchestrator: h.handle.clone(),
        store: h.store.clone(),
        catalog: Arc::new(catalog),
        validator: h.validator.clone(),
    });
    (app, clicks)
}

async fn call(app: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    settle().await;
    (status, value)
}

#[tokio::test]
async fn state_and_transport_commands() {
    let h = Harness::start(direct_config(), stations()).await;
    let app = app(&h).await;

    let (status, state) = call(&app, Method::GET, "/api/state", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["phase"], "Idle");

    let (status, _) = call(&app, Method::POST, "/api/select/b", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.state().await.current_station_id(), Some("b"));

    let (status, _) = call(&app, Method::POST, "/api/select/nope", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, Method::POST, "/api/volume/150", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let (_, volume) = call(&app, Method::GET, "/api/volume", Body::empty()).await;
    assert_eq!(volume["volume"], 100);

    call(&app, Method::POST, "/api/stop", Body::empty()).await;
    assert_eq!(h.state().await.phase, PlaybackPhase::Idle);

    let (_, queue) = call(&app, Method::GET, "/api/queue", Body::empty()).await;
    assert_eq!(queue.as_array().unwrap().len(), 3);
    assert_eq!(queue[0]["media_id"], "station_a");
}

#[tokio::test]
async fn sleep_timer_routes() {
    let h = Harness::start(direct_config(), stations()).await;
    let app = app(&h).await;

    call(&app, Method::POST, "/api/sleep/30", Body::empty()).await;
    assert!(h.state().await.sleep_timer_deadline.is_some());
    call(&app, Method::DELETE, "/api/sleep", Body::empty()).await;
    assert!(h.state().await.sleep_timer_deadline.is_none());
}

#[tokio::test]
async fn saved_list_management() {
    let h = Harness::start(direct_config(), stations()).await;
    let app = app(&h).await;

    let (status, saved) = call(&app, Method::POST, "/api/stations/uuid-9", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["name"], "Delta Lounge");
    let queue = h.handle.state_manager().get_queue().await;
    assert_eq!(queue.len(), 4);
    assert_eq!(queue[3].station_id, "uuid-9");

    let (status, _) = call(&app, Method::DELETE, "/api/stations/a", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::DELETE, "/api/stations/a", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let order = Body::from(json!(["uuid-9", "c"]).to_string());
    let (status, _) = call(&app, Method::POST, "/api/stations/order", order).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<String> = h.store.stations().await.into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["uuid-9", "c", "b"]);
    let queue = h.handle.state_manager().get_queue().await;
    assert_eq!(queue[0].station_id, "uuid-9");
}

#[tokio::test]
async fn validate_all_reports_each_station() {
    let list = stations();
    let h = Harness::start(PlaybackConfig::default(), list.clone()).await;
    h.factory
        .failing_urls
        .lock()
        .unwrap()
        .insert(list[1].url.clone());
    let app = app(&h).await;

    let (status, body) = call(&app, Method::POST, "/api/validate", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let mut results: Vec<ValidationResult> = serde_json::from_value(body).unwrap();
    results.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].status, ValidationStatus::Working);
    assert_eq!(results[1].status, ValidationStatus::Failed);
    assert_eq!(
        h.store.station("b").await.unwrap().validation_status,
        ValidationStatus::Failed
    );
}

#[tokio::test]
async fn clicks_are_tracked_only_for_catalog_stations() {
    let h = Harness::start(direct_config(), stations()).await;
    let (app, clicks) = app_counting_clicks(&h).await;

    let (status, _) = call(&app, Method::POST, "/api/select/b", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    call(&app, Method::POST, "/api/stations/uuid-9", Body::empty()).await;
    let (status, _) = call(&app, Method::POST, "/api/select/uuid-9", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    for _ in 0..200 {
        if clicks.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Give a stray click for the seeded station time to show up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(clicks.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.store.station("uuid-9").await.unwrap().catalog_uuid.as_deref(),
        Some("uuid-9")
    );
    assert_eq!(h.store.station("b").await.unwrap().catalog_uuid, None);
}

#[tokio::test]
async fn stations_by_country() {
    let h = Harness::start(direct_config(), stations()).await;
    let app = app(&h).await;

    let (status, body) = call(&app, Method::GET, "/api/country/FR?limit=10", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "Radio Paris");
    assert_eq!(body[0]["country"], "FR");
}
