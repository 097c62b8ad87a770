use crate::db::ReadingStore;
use crate::model::{
    DebugResponse, HistoryResponse, LatestResponse, ReadingView, SensorTail, SensorsResponse,
    StatsResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::error;

#[derive(Debug, Clone)]
struct AppState {
    store: ReadingStore,
}

/// Rows per sensor returned by `/api/debug`.
const DEBUG_TAIL: u32 = 5;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    hours: Option<u32>,
}

pub fn create_router(store: ReadingStore) -> Router {
    let state = AppState { store };

    Router::new()
        .route("/api/latest", get(get_latest))
        .route("/api/history/:sensor_id", get(get_history))
        .route("/api/stats", get(get_stats))
        .route("/api/sensors", get(get_sensors))
        .route("/api/debug", get(get_debug))
        .with_state(state)
        .layer(middleware::map_response(no_cache))
}

/// Dashboards poll these endpoints; stale responses are never useful.
async fn no_cache(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    response
}

fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

async fn get_latest(State(state): State<AppState>) -> Result<Json<LatestResponse>, AppError> {
    let readings = state.store.latest_per_sensor().await?;

    Ok(Json(LatestResponse {
        readings: readings.into_iter().map(ReadingView::from).collect(),
        timestamp: now_seconds(),
    }))
}

async fn get_history(
    State(state): State<AppState>,
    Path(sensor_id): Path<u32>,
    Query(params): Query<HistoryQuery>,
) -> Result<Response, AppError> {
    let hours = params.hours.unwrap_or(1);
    let since = match Duration::try_hours(i64::from(hours))
        .and_then(|window| Utc::now().checked_sub_signed(window))
    {
        Some(since) => since,
        None => {
            return Ok((
                StatusCode::BAD_REQUEST,
                format!("hours={} reaches past the earliest representable time", hours),
            )
                .into_response())
        }
    };

    let readings = state.store.history(sensor_id, since).await?;
    let total_readings = readings.len() as i64;

    Ok(Json(HistoryResponse {
        sensor_id,
        readings: readings.into_iter().map(ReadingView::from).collect(),
        total_readings,
        timestamp: now_seconds(),
    })
    .into_response())
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let stats = state.store.stats().await?;

    Ok(Json(StatsResponse {
        stats,
        timestamp: now_seconds(),
    }))
}

async fn get_sensors(State(state): State<AppState>) -> Result<Json<SensorsResponse>, AppError> {
    let sensors = state.store.sensor_ids().await?;
    Ok(Json(SensorsResponse { sensors }))
}

async fn get_debug(State(state): State<AppState>) -> Result<Json<DebugResponse>, AppError> {
    let total_rows = state.store.count_all().await?;

    let mut sensors = Vec::new();
    for sensor_id in state.store.sensor_ids().await? {
        let readings = state.store.recent(sensor_id, DEBUG_TAIL).await?;
        sensors.push(SensorTail {
            sensor_id,
            latest_readings: readings.into_iter().map(ReadingView::from).collect(),
        });
    }

    Ok(Json(DebugResponse {
        total_rows,
        sensors,
        timestamp: now_seconds(),
    }))
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
