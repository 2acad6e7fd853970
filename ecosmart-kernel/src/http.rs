/**
 * API REST ECOSMART - Serveur HTTP du kernel
 *
 * RÔLE :
 * Expose l'ingestion HTTP, l'historique des mesures, l'administration des
 * poubelles et l'abonnement temps réel (WebSocket) au fan-out.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, état partagé AppState (stores injectés, pas de global)
 * - Routes : /api/health, /api/system, /api/iot, /api/admin, /api/bins,
 *   /api/dashboard, /api/ws
 * - Erreurs métier converties en JSON `{error, field?}` avec le bon code
 *   (400, 404, 409, 500)
 */

use crate::alerts::AlertSettings;
use crate::fanout::{Broadcaster, ChannelSink, Topic};
use crate::fleet::{self, BinFilter, FleetStats, NearbyBin};
use crate::health::{HealthTracker, KernelHealth};
use crate::ingest::{IngestError, Ingestor};
use crate::models::{Bin, BinPatch, IngestRequest, NewBin, Reading};
use crate::status::BinStatus;
use crate::store::{DeviceRegistry, ReadingQuery, ReadingStore, StoreError};
use crate::sweep::{SweepReport, Sweeper, TickOutcome};
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const DEFAULT_PAGE_LIMIT: usize = 50;
const DETAIL_READINGS: usize = 10;
const DEFAULT_RADIUS_KM: f64 = 5.0;
const WS_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn DeviceRegistry>,
    pub readings: Arc<dyn ReadingStore>,
    pub ingestor: Arc<Ingestor>,
    pub broadcaster: Arc<Broadcaster>,
    pub sweeper: Arc<Sweeper>,
    pub health: HealthTracker,
    pub alerts: AlertSettings,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest { field: Option<&'static str>, reason: String },
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    fn field(field: &'static str, reason: impl Into<String>) -> Self {
        ApiError::BadRequest { field: Some(field), reason: reason.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, body) = match self {
            ApiError::BadRequest { field, reason } => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": reason, "field": field }))
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({ "error": msg })),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, serde_json::json!({ "error": msg })),
            ApiError::Internal(msg) => {
                log::error!("[http] internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, serde_json::json!({ "error": "Internal storage error" }))
            }
        };
        (code, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ApiError::NotFound(format!("Bin not found: {id}")),
            e @ (StoreError::Conflict(_) | StoreError::HasReadings { .. }) => ApiError::Conflict(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::InvalidInput { field, reason } => ApiError::field(field, reason),
            IngestError::NotFound(id) => ApiError::NotFound(format!("Bin not found: {id}")),
            IngestError::Storage(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest { field: None, reason: e.body_text() }
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(|| async { "ok" }))
        .route("/api/system/health", get(get_system_health))
        .route("/api/iot/update", post(post_reading))
        .route("/api/iot/history/{bin_id}", get(get_history))
        .route("/api/admin/bins", get(list_bins).post(register_bin))
        .route("/api/admin/bins/{bin_id}", get(get_bin).put(update_bin).delete(delete_bin))
        .route("/api/admin/sweep", post(run_sweep))
        .route("/api/bins/nearby", get(get_nearby))
        .route("/api/dashboard/bins", get(get_dashboard))
        .route("/api/ws/{topic}", get(subscribe_ws))
        .with_state(app_state)
}

// GET /api/system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(app.registry.as_ref(), app.readings.as_ref(), &app.broadcaster, &app.sweeper))
}

// POST /api/iot/update (mesure capteur)
async fn post_reading(
    State(app): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<Bin>, ApiError> {
    let Json(req) = payload?;
    // écritures disque sous verrou : hors des workers async
    let ingestor = app.ingestor.clone();
    let bin = tokio::task::spawn_blocking(move || ingestor.ingest(&req.bin_id, &req.reading))
        .await
        .map_err(|e| ApiError::Internal(format!("ingest task aborted: {e}")))??;
    Ok(Json(bin))
}

#[derive(Debug, Default, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
    from: Option<String>,
    to: Option<String>,
}

fn parse_bound(field: &'static str, raw: Option<&str>) -> Result<Option<OffsetDateTime>, ApiError> {
    raw.map(|s| {
        OffsetDateTime::parse(s, &Rfc3339).map_err(|e| ApiError::field(field, format!("expected RFC 3339: {e}")))
    })
    .transpose()
}

fn history_query(params: &HistoryParams) -> Result<ReadingQuery, ApiError> {
    let from = parse_bound("from", params.from.as_deref())?;
    let to = parse_bound("to", params.to.as_deref())?;
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(ApiError::field("from", "must not be after 'to'"));
        }
    }
    let mut query = ReadingQuery { from, to, ..ReadingQuery::default() };
    if let Some(limit) = params.limit {
        query.limit = Some(limit);
    }
    Ok(query)
}

// GET /api/iot/history/{bin_id}
async fn get_history(
    State(app): State<AppState>,
    Path(bin_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Reading>>, ApiError> {
    let query = history_query(&params)?;
    if app.registry.get_bin(&bin_id)?.is_none() {
        return Err(ApiError::NotFound(format!("Bin not found: {bin_id}")));
    }
    Ok(Json(app.readings.history(&bin_id, &query)?))
}

// POST /api/admin/bins (enregistrement)
async fn register_bin(
    State(app): State<AppState>,
    payload: Result<Json<NewBin>, JsonRejection>,
) -> Result<(StatusCode, Json<Bin>), ApiError> {
    let Json(new) = payload?;
    new.validate().map_err(|e| ApiError::field(e.field, e.reason))?;
    let bin = app.registry.register_bin(new, OffsetDateTime::now_utc())?;
    log::info!("[http] registered bin {}", bin.bin_id);
    Ok((StatusCode::CREATED, Json(bin)))
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    area: Option<String>,
    status: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct PageMeta {
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

#[derive(Debug, Serialize)]
struct BinPage {
    bins: Vec<Bin>,
    meta: PageMeta,
}

/// Découpe une liste déjà triée. `page` commence à 1.
pub fn paginate<T>(items: Vec<T>, page: Option<usize>, limit: Option<usize>) -> (Vec<T>, PageMeta) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(1);
    let total = items.len();
    let slice = items.into_iter().skip((page - 1).saturating_mul(limit)).take(limit).collect();
    (slice, PageMeta { total, page, limit, total_pages: total.div_ceil(limit) })
}

fn bin_filter(params: &ListParams) -> Result<BinFilter, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(|s| s.parse::<BinStatus>().map_err(|e| ApiError::field("status", e)))
        .transpose()?;
    Ok(BinFilter { area: params.area.clone(), status })
}

// GET /api/admin/bins (liste filtrée, paginée)
async fn list_bins(
    State(app): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<BinPage>, ApiError> {
    let filter = bin_filter(&params)?;
    let mut bins: Vec<Bin> = app.registry.list_bins()?.into_iter().filter(|b| filter.matches(b)).collect();
    bins.sort_by(|a, b| b.last_update.cmp(&a.last_update));
    let (bins, meta) = paginate(bins, params.page, params.limit);
    Ok(Json(BinPage { bins, meta }))
}

#[derive(Debug, Serialize)]
struct BinDetail {
    bin: Bin,
    reading_count: usize,
    recent_readings: Vec<Reading>,
}

// GET /api/admin/bins/{bin_id}
async fn get_bin(State(app): State<AppState>, Path(bin_id): Path<String>) -> Result<Json<BinDetail>, ApiError> {
    let Some(bin) = app.registry.get_bin(&bin_id)? else {
        return Err(ApiError::NotFound(format!("Bin not found: {bin_id}")));
    };
    let query = ReadingQuery { limit: Some(DETAIL_READINGS), ..ReadingQuery::default() };
    let recent_readings = app.readings.history(&bin_id, &query)?;
    let reading_count = app.readings.count_for(&bin_id)?;
    Ok(Json(BinDetail { bin, reading_count, recent_readings }))
}

// PUT /api/admin/bins/{bin_id} (nom, zone, position ; jamais le statut)
async fn update_bin(
    State(app): State<AppState>,
    Path(bin_id): Path<String>,
    payload: Result<Json<BinPatch>, JsonRejection>,
) -> Result<Json<Bin>, ApiError> {
    let Json(patch) = payload?;
    patch.validate().map_err(|e| ApiError::field(e.field, e.reason))?;
    Ok(Json(app.registry.update_bin_meta(&bin_id, &patch)?))
}

// DELETE /api/admin/bins/{bin_id}
async fn delete_bin(
    State(app): State<AppState>,
    Path(bin_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    app.ingestor.remove_bin(&bin_id)?;
    log::info!("[http] deleted bin {}", bin_id);
    Ok(Json(serde_json::json!({ "ok": true, "bin_id": bin_id })))
}

// POST /api/admin/sweep (passage manuel)
async fn run_sweep(State(app): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
    let sweeper = app.sweeper.clone();
    let outcome = tokio::task::spawn_blocking(move || sweeper.tick(OffsetDateTime::now_utc()))
        .await
        .map_err(|e| ApiError::Internal(format!("sweep task aborted: {e}")))?;
    match outcome {
        TickOutcome::Completed(report) => Ok(Json(report)),
        TickOutcome::Skipped => Err(ApiError::Conflict("A sweep is already running".into())),
        TickOutcome::Failed(e) => Err(ApiError::Internal(e.to_string())),
    }
}

#[derive(Debug, Default, Deserialize)]
struct NearbyParams {
    lat: Option<f64>,
    lng: Option<f64>,
    radius: Option<f64>,
}

// GET /api/bins/nearby
async fn get_nearby(
    State(app): State<AppState>,
    Query(params): Query<NearbyParams>,
) -> Result<Json<Vec<NearbyBin>>, ApiError> {
    let lat = params.lat.ok_or_else(|| ApiError::field("lat", "is required"))?;
    let lng = params.lng.ok_or_else(|| ApiError::field("lng", "is required"))?;
    if !(-90.0..=90.0).contains(&lat) {
        return Err(ApiError::field("lat", "must be between -90 and 90"));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(ApiError::field("lng", "must be between -180 and 180"));
    }
    let radius = params.radius.unwrap_or(DEFAULT_RADIUS_KM);
    if !radius.is_finite() || radius < 0.0 {
        return Err(ApiError::field("radius", "must be a positive distance in km"));
    }
    Ok(Json(fleet::nearby(app.registry.list_bins()?, lat, lng, radius)))
}

// GET /api/dashboard/bins
async fn get_dashboard(State(app): State<AppState>) -> Result<Json<FleetStats>, ApiError> {
    let bins = app.registry.list_bins()?;
    Ok(Json(fleet::fleet_stats(&bins, app.alerts.inactivity_window, OffsetDateTime::now_utc())))
}

// GET /api/ws/{topic} (abonnement temps réel)
async fn subscribe_ws(
    State(app): State<AppState>,
    Path(topic): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let topic: Topic = topic.parse().map_err(|e: String| ApiError::field("topic", e))?;
    let broadcaster = app.broadcaster.clone();
    Ok(ws.on_upgrade(move |socket| ws_session(socket, broadcaster, topic)))
}

async fn ws_session(mut socket: WebSocket, broadcaster: Arc<Broadcaster>, topic: Topic) {
    let (sink, mut rx) = ChannelSink::new(format!("ws:{topic}"), WS_BUFFER);
    let id = broadcaster.subscribe(topic, Arc::new(sink));
    log::info!("[http] websocket {} joined {}", id, topic);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        log::warn!("[http] failed to encode event: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }

    broadcaster.unsubscribe(&id);
    log::info!("[http] websocket {} left {}", id, topic);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::{recording_broadcaster, EventKind};
    use crate::models::ReadingInput;
    use crate::store::MemoryStore;

    fn app() -> (AppState, Arc<crate::fanout::RecordingSink>) {
        let store = Arc::new(MemoryStore::in_memory());
        let (broadcaster, recorder) = recording_broadcaster();
        let alerts = AlertSettings::default();
        let ingestor = Arc::new(Ingestor::new(store.clone(), store.clone(), broadcaster.clone(), &alerts));
        let sweeper = Arc::new(Sweeper::new(store.clone(), broadcaster.clone(), &alerts));
        let state = AppState {
            registry: store.clone(),
            readings: store,
            ingestor,
            broadcaster,
            sweeper,
            health: HealthTracker::new(),
            alerts,
        };
        (state, recorder)
    }

    fn new_bin(id: &str) -> NewBin {
        NewBin {
            bin_id: id.into(),
            location_name: "Central Market".into(),
            area: "Central Zone".into(),
            latitude: 28.6139,
            longitude: 77.209,
        }
    }

    fn reading(bin_id: &str, fill: f64) -> IngestRequest {
        IngestRequest { bin_id: bin_id.into(), reading: ReadingInput { fill_level: Some(fill), ..Default::default() } }
    }

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_paginate() {
        let (items, meta) = paginate((1..=7).collect::<Vec<_>>(), Some(2), Some(3));
        assert_eq!(items, vec![4, 5, 6]);
        assert_eq!(meta, PageMeta { total: 7, page: 2, limit: 3, total_pages: 3 });

        let (items, meta) = paginate((1..=7).collect::<Vec<_>>(), Some(9), None);
        assert!(items.is_empty());
        assert_eq!((meta.limit, meta.total_pages), (50, 1));

        let (items, meta) = paginate(vec![1, 2], Some(0), Some(0));
        assert_eq!(items, vec![1]);
        assert_eq!((meta.page, meta.limit), (1, 1));
    }

    #[test]
    fn test_history_query_bounds() {
        let params = HistoryParams {
            limit: Some(5),
            from: Some("2025-06-01T00:00:00Z".into()),
            to: Some("2025-06-02T00:00:00Z".into()),
        };
        let query = history_query(&params).unwrap();
        assert_eq!(query.limit, Some(5));
        assert!(query.from.is_some() && query.to.is_some());

        assert_eq!(history_query(&HistoryParams::default()).unwrap().limit, Some(100));

        let bad = HistoryParams { from: Some("yesterday".into()), ..Default::default() };
        assert!(matches!(history_query(&bad), Err(ApiError::BadRequest { field: Some("from"), .. })));

        let inverted = HistoryParams {
            from: Some("2025-06-02T00:00:00Z".into()),
            to: Some("2025-06-01T00:00:00Z".into()),
            ..Default::default()
        };
        assert!(history_query(&inverted).is_err());
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(status_of(StoreError::Conflict("BIN-1".into()).into()), StatusCode::CONFLICT);
        assert_eq!(
            status_of(StoreError::HasReadings { bin_id: "BIN-1".into(), readings: 3 }.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(StoreError::Io(std::io::Error::other("disk full")).into()), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_of(IngestError::NotFound("BIN-9".into()).into()), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(IngestError::InvalidInput { field: "fill_level", reason: "is required".into() }.into()),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_register_ingest_and_history() {
        let (app, recorder) = app();
        let (code, Json(bin)) = register_bin(State(app.clone()), Ok(Json(new_bin("BIN-001")))).await.unwrap();
        assert_eq!(code, StatusCode::CREATED);
        assert_eq!(bin.status, BinStatus::Normal);

        let Json(bin) = post_reading(State(app.clone()), Ok(Json(reading("BIN-001", 85.0)))).await.unwrap();
        assert_eq!(bin.status, BinStatus::Overflow);
        assert_eq!(recorder.count(EventKind::OverflowEntered), 1);

        let Json(history) = get_history(State(app.clone()), Path("BIN-001".into()), Query(HistoryParams::default()))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].fill_level, 85.0);

        let Json(detail) = get_bin(State(app.clone()), Path("BIN-001".into())).await.unwrap();
        assert_eq!(detail.recent_readings.len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_and_duplicate() {
        let (app, _) = app();
        let mut bad = new_bin("BIN-002");
        bad.latitude = 120.0;
        let err = register_bin(State(app.clone()), Ok(Json(bad))).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { field: Some("latitude"), .. }));

        register_bin(State(app.clone()), Ok(Json(new_bin("BIN-002")))).await.unwrap();
        let err = register_bin(State(app.clone()), Ok(Json(new_bin("BIN-002")))).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unknown_bin_is_not_found() {
        let (app, recorder) = app();
        let err = post_reading(State(app.clone()), Ok(Json(reading("BIN-404", 10.0)))).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        let err = get_history(State(app.clone()), Path("BIN-404".into()), Query(HistoryParams::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_delete_only_without_readings() {
        let (app, _) = app();
        register_bin(State(app.clone()), Ok(Json(new_bin("BIN-003")))).await.unwrap();
        register_bin(State(app.clone()), Ok(Json(new_bin("BIN-004")))).await.unwrap();
        post_reading(State(app.clone()), Ok(Json(reading("BIN-003", 20.0)))).await.unwrap();

        let err = delete_bin(State(app.clone()), Path("BIN-003".into())).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        delete_bin(State(app.clone()), Path("BIN-004".into())).await.unwrap();
        let err = delete_bin(State(app.clone()), Path("BIN-004".into())).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_bin_metadata() {
        let (app, _) = app();
        register_bin(State(app.clone()), Ok(Json(new_bin("BIN-005")))).await.unwrap();
        post_reading(State(app.clone()), Ok(Json(reading("BIN-005", 80.0)))).await.unwrap();

        let patch = BinPatch { location_name: Some("Central Market Gate 2".into()), ..Default::default() };
        let Json(bin) = update_bin(State(app.clone()), Path("BIN-005".into()), Ok(Json(patch))).await.unwrap();
        assert_eq!(bin.location_name, "Central Market Gate 2");
        assert_eq!(bin.status, BinStatus::Overflow);
        assert_eq!(bin.fill_level, 80.0);

        let bad = BinPatch { area: Some("x".into()), ..Default::default() };
        let err = update_bin(State(app.clone()), Path("BIN-005".into()), Ok(Json(bad))).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { field: Some("area"), .. }));

        let err = update_bin(State(app.clone()), Path("BIN-404".into()), Ok(Json(BinPatch::default())))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let Json(detail) = get_bin(State(app.clone()), Path("BIN-005".into())).await.unwrap();
        assert_eq!(detail.reading_count, 1);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let (app, _) = app();
        for id in ["BIN-010", "BIN-011", "BIN-012"] {
            register_bin(State(app.clone()), Ok(Json(new_bin(id)))).await.unwrap();
        }
        post_reading(State(app.clone()), Ok(Json(reading("BIN-011", 95.0)))).await.unwrap();

        let params = ListParams { status: Some("overflow".into()), ..Default::default() };
        let Json(page) = list_bins(State(app.clone()), Query(params)).await.unwrap();
        assert_eq!(page.meta.total, 1);
        assert_eq!(page.bins[0].bin_id, "BIN-011");

        let Json(page) = list_bins(State(app.clone()), Query(ListParams::default())).await.unwrap();
        assert_eq!(page.meta.total, 3);
        assert_eq!(page.bins[0].bin_id, "BIN-011");

        let params = ListParams { status: Some("full".into()), ..Default::default() };
        assert!(list_bins(State(app.clone()), Query(params)).await.is_err());
    }

    #[tokio::test]
    async fn test_nearby_requires_coordinates() {
        let (app, _) = app();
        register_bin(State(app.clone()), Ok(Json(new_bin("BIN-020")))).await.unwrap();

        let err = get_nearby(State(app.clone()), Query(NearbyParams::default())).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { field: Some("lat"), .. }));

        let params = NearbyParams { lat: Some(28.614), lng: Some(77.21), radius: None };
        let Json(found) = get_nearby(State(app.clone()), Query(params)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bin.bin_id, "BIN-020");
    }

    #[tokio::test]
    async fn test_manual_sweep_reports() {
        let (app, recorder) = app();
        register_bin(State(app.clone()), Ok(Json(new_bin("BIN-030")))).await.unwrap();
        post_reading(State(app.clone()), Ok(Json(reading("BIN-030", 90.0)))).await.unwrap();
        recorder.clear();

        let Json(report) = run_sweep(State(app.clone())).await.unwrap();
        assert_eq!(report.overflow, vec!["BIN-030".to_string()]);
        assert_eq!(recorder.count(EventKind::OverflowSweep), 1);

        let Json(stats) = get_dashboard(State(app.clone())).await.unwrap();
        assert_eq!((stats.total, stats.overflow), (1, 1));
    }
}
