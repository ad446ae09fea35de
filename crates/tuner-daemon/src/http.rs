use crate::catalog::{Catalog, CatalogFacet, SearchQuery};
use crate::core::OrchestratorHandle;
use crate::validator::StationValidator;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tuner_proto::protocol::{
    Command, PlaybackSnapshot, QueueItem, Station, ValidationStatus,
};
use tuner_proto::store::StationStore;

/// Command origin for everything arriving over HTTP.
const HTTP_ORIGIN: &str = "http";

/// Probes running at once during a bulk validation.
const VALIDATE_CONCURRENCY: usize = 4;

#[derive(Clone)]
pub struct HttpState {
    pub orchestrator: OrchestratorHandle,
    pub store: Arc<dyn StationStore>,
    pub catalog: Arc<Catalog>,
    pub validator: Arc<StationValidator>,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

#[derive(Deserialize)]
struct TopQuery {
    #[serde(default = "default_top_limit")]
    limit: u32,
}

fn default_top_limit() -> u32 {
    50
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub id: String,
    pub status: ValidationStatus,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/queue", get(get_queue))
        .route("/api/select/:id", post(select_station))
        .route("/api/toggle", post(toggle))
        .route("/api/stop", post(stop))
        .route("/api/next", post(next_station))
        .route("/api/prev", post(prev_station))
        .route("/api/volume/:pct", get(set_volume).post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/sleep/:minutes", post(start_sleep))
        .route("/api/sleep", delete(cancel_sleep))
        .route("/api/search", get(search))
        .route("/api/top", get(top_voted))
        .route("/api/countries", get(countries))
        .route("/api/country/:code", get(by_country))
        .route("/api/languages", get(languages))
        .route("/api/tags", get(tags))
        .route("/api/stations", get(saved_stations))
        .route("/api/stations/order", post(reorder_stations))
        .route(
            "/api/stations/:id",
            post(save_from_catalog).delete(remove_station),
        )
        .route("/api/validate", post(validate_all))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn send(state: &HttpState, command: Command) -> StatusCode {
    match state.orchestrator.send(HTTP_ORIGIN, command).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!("HTTP API: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

// ── playback ─────────────────────────────────────────────────────────────────

async fn get_state(State(state): State<HttpState>) -> Json<PlaybackSnapshot> {
    Json(state.orchestrator.state_manager().get_state().await)
}

async fn get_queue(State(state): State<HttpState>) -> Json<Vec<QueueItem>> {
    Json(state.orchestrator.state_manager().get_queue().await)
}

async fn select_station(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    let Some(station) = state.store.station(&id).await else {
        return StatusCode::NOT_FOUND;
    };
    info!("HTTP API: Select {}", station.name);
    // Seeded stations are unknown to the catalog.
    let catalog_uuid = station.catalog_uuid.clone();
    let status = send(&state, Command::SelectStation { station }).await;
    if let (StatusCode::OK, Some(uuid)) = (status, catalog_uuid) {
        let catalog = Arc::clone(&state.catalog);
        tokio::spawn(async move { catalog.track_click(&uuid).await });
    }
    status
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::TogglePlayPause).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Stop).await
}

async fn next_station(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::SkipNext).await
}

async fn prev_station(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::SkipPrevious).await
}

async fn set_volume(State(state): State<HttpState>, Path(pct): Path<i32>) -> StatusCode {
    info!("HTTP API: Set volume to {}%", pct);
    send(
        &state,
        Command::SetVolume {
            value: pct as f32 / 100.0,
        },
    )
    .await
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let snapshot = state.orchestrator.state_manager().get_state().await;
    let volume = (snapshot.volume * 100.0).round() as u8;
    Json(VolumeStatus { volume })
}

async fn start_sleep(State(state): State<HttpState>, Path(minutes): Path<u32>) -> StatusCode {
    send(&state, Command::StartSleepTimer { minutes }).await
}

async fn cancel_sleep(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::CancelSleepTimer).await
}

// ── catalog ──────────────────────────────────────────────────────────────────

async fn search(
    State(state): State<HttpState>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<Station>> {
    Json(state.catalog.search(&query).await)
}

async fn top_voted(State(state): State<HttpState>, Query(query): Query<TopQuery>) -> Json<Vec<Station>> {
    Json(state.catalog.top_voted(query.limit).await)
}

async fn by_country(
    State(state): State<HttpState>,
    Path(code): Path<String>,
    Query(query): Query<TopQuery>,
) -> Json<Vec<Station>> {
    Json(state.catalog.by_country(&code, query.limit).await)
}

async fn countries(State(state): State<HttpState>) -> Json<Vec<CatalogFacet>> {
    Json(state.catalog.countries().await)
}

async fn languages(State(state): State<HttpState>) -> Json<Vec<CatalogFacet>> {
    Json(state.catalog.languages().await)
}

async fn tags(State(state): State<HttpState>) -> Json<Vec<CatalogFacet>> {
    Json(state.catalog.tags().await)
}

// ── saved stations ───────────────────────────────────────────────────────────

async fn saved_stations(State(state): State<HttpState>) -> Json<Vec<Station>> {
    Json(state.store.stations().await)
}

async fn save_from_catalog(
    State(state): State<HttpState>,
    Path(uuid): Path<String>,
) -> Result<Json<Station>, StatusCode> {
    let station = state
        .catalog
        .by_uuid(&uuid)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    if let Err(e) = state.store.save_station(station.clone()).await {
        error!("Failed to save station {}: {}", station.name, e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    info!("Saved station {}", station.name);
    reload(&state).await;
    Ok(Json(station))
}

async fn remove_station(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    match state.store.remove_station(&id).await {
        Ok(true) => {
            reload(&state).await;
            StatusCode::OK
        }
        Ok(false) => StatusCode::NOT_FOUND,
        Err(e) => {
            error!("Failed to remove station {}: {}", id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn reorder_stations(
    State(state): State<HttpState>,
    Json(ids): Json<Vec<String>>,
) -> StatusCode {
    if let Err(e) = state.store.reorder(&ids).await {
        error!("Failed to reorder stations: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    reload(&state).await;
    StatusCode::OK
}

async fn validate_all(State(state): State<HttpState>) -> Json<Vec<ValidationResult>> {
    let stations = state.store.stations().await;
    info!("HTTP API: validating {} stations", stations.len());
    let validator = &state.validator;
    let results = stream::iter(stations)
        .map(|station| async move {
            validator.validate(&station).await;
            ValidationResult {
                status: validator.status_of(&station),
                id: station.id,
            }
        })
        .buffer_unordered(VALIDATE_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;
    reload(&state).await;
    Json(results)
}

async fn reload(state: &HttpState) {
    if state
        .orchestrator
        .send(HTTP_ORIGIN, Command::ReloadStations)
        .await
        .is_err()
    {
        warn!("Station list changed but the orchestrator is not running");
    }
}
