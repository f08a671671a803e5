/*!
 * HTTP API - Administration du moniteur
 *
 * RÔLE :
 * Gestion des hôtes, lecture des résultats et du débit, changement de
 * l'intervalle de sonde à chaud.
 *
 * FONCTIONNEMENT :
 * - JSON uniquement ; erreurs au format `{"error": "..."}`
 * - Les handlers passent par le handle du moniteur et n'attendent jamais une
 *   sonde : `add_host` répond tout de suite et sonde en arrière-plan
 * - Clé API optionnelle : toutes les routes sauf `/health` exigent alors
 *   l'en-tête `x-api-key`
 */

use crate::models::{BandwidthSnapshot, ProbeResult, ScheduleConfig};
use crate::monitor::Monitor;
use crate::scheduler::SchedulerError;
use crate::store::{HostRegistry, ResultQuery, ResultStore, StoreError, DEFAULT_QUERY_LIMIT};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const DEFAULT_SET_INTERVAL_SECS: u64 = 10;

#[derive(Clone)]
pub struct AppState {
    /// Handle partagé avec les jobs périodiques
    pub monitor: Monitor,
    /// None = API ouverte
    pub api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(monitor: Monitor) -> Self {
        Self { monitor, api_key: None }
    }

    /// Clé vide = pas de contrôle
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.trim().is_empty()).map(Arc::from);
        self
    }
}

/// Corps d'erreur : `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match e {
            StoreError::Conflict(_) => StatusCode::CONFLICT,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidHost(_) => StatusCode::BAD_REQUEST,
            StoreError::Io(_) | StoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        let status = match e {
            SchedulerError::InvalidInterval(_) => StatusCode::BAD_REQUEST,
            SchedulerError::UnknownJob(_) | SchedulerError::DuplicateJob(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/data", get(get_data))
        .route("/api/results", get(get_results))
        .route("/api/hosts", get(get_hosts))
        .route("/api/add_host", post(add_host))
        .route("/api/remove_host/{host}", delete(remove_host))
        .route("/clear", post(clear_all))
        .route("/api/clear_host/{host}", post(clear_host))
        .route("/api/set_interval", post(set_interval))
        .route("/api/network", get(get_network))
        .route("/api/config", get(get_config))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

/// hôte -> ses derniers résultats, du plus récent au plus ancien
async fn get_data(State(app): State<AppState>) -> Result<Json<BTreeMap<String, Vec<ProbeResult>>>, ApiError> {
    let store = app.monitor.store();
    let mut data = BTreeMap::new();
    for host in store.list_hosts()? {
        let results = store.query(&ResultQuery::for_host(host.clone(), DEFAULT_QUERY_LIMIT))?;
        data.insert(host, results);
    }
    Ok(Json(data))
}

async fn get_results(
    State(app): State<AppState>,
    Query(query): Query<ResultQuery>,
) -> Result<Json<Vec<ProbeResult>>, ApiError> {
    Ok(Json(app.monitor.store().query(&query)?))
}

async fn get_hosts(State(app): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(app.monitor.store().list_hosts()?))
}

#[derive(Debug, Deserialize)]
struct AddHostBody {
    host: Option<String>,
}

async fn add_host(State(app): State<AppState>, Json(body): Json<AddHostBody>) -> Result<Json<Value>, ApiError> {
    let host = body.host.as_deref().map(str::trim).unwrap_or_default().to_string();
    if host.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Host is empty"));
    }

    app.monitor.store().add_host(&host).map_err(|e| match e {
        StoreError::Conflict(_) => ApiError::new(StatusCode::CONFLICT, "Host is already monitored"),
        other => other.into(),
    })?;

    let monitor = app.monitor.clone();
    let target = host.clone();
    tokio::spawn(async move {
        // échecs déjà logués par le moniteur
        let _ = monitor.probe_host(&target).await;
    });

    Ok(Json(json!({ "message": format!("{host} added for monitoring") })))
}

async fn remove_host(State(app): State<AppState>, Path(host): Path<String>) -> Result<Json<Value>, ApiError> {
    let deleted = app.monitor.store().remove_host(&host).map_err(|e| match e {
        StoreError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, "Host not found"),
        other => other.into(),
    })?;
    Ok(Json(json!({ "message": format!("{host} removed."), "deleted": deleted })))
}

async fn clear_all(State(app): State<AppState>) -> Result<Json<Value>, ApiError> {
    let deleted = app.monitor.store().delete_all()?;
    Ok(Json(json!({ "message": format!("{deleted} record(s) deleted."), "deleted": deleted })))
}

async fn clear_host(State(app): State<AppState>, Path(host): Path<String>) -> Result<Json<Value>, ApiError> {
    let deleted = app.monitor.store().delete_by_host(&host)?;
    Ok(Json(json!({
        "message": format!("{deleted} record(s) deleted for {host}."),
        "deleted": deleted
    })))
}

#[derive(Debug, Deserialize)]
struct SetIntervalBody {
    interval: Option<u64>,
}

async fn set_interval(State(app): State<AppState>, Json(body): Json<SetIntervalBody>) -> Result<Json<Value>, ApiError> {
    let interval = body.interval.unwrap_or(DEFAULT_SET_INTERVAL_SECS);
    if interval == 0 {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Interval must be greater than zero"));
    }
    app.monitor.set_probe_interval(interval)?;
    info!(interval_secs = interval, "probe interval changed via api");
    Ok(Json(json!({
        "message": format!("Ping interval updated to {interval} seconds"),
        "interval": interval
    })))
}

async fn get_network(State(app): State<AppState>) -> Json<BandwidthSnapshot> {
    Json(app.monitor.bandwidth())
}

async fn get_config(State(app): State<AppState>) -> Json<ScheduleConfig> {
    Json(app.monitor.schedule())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_status_codes() {
        let status = |e: StoreError| ApiError::from(e).status();
        assert_eq!(status(StoreError::Conflict("a".into())), StatusCode::CONFLICT);
        assert_eq!(status(StoreError::NotFound("a".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(StoreError::InvalidHost(" ".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(StoreError::Io(std::io::Error::other("disk full"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn scheduler_errors_map_to_status_codes() {
        assert_eq!(
            ApiError::from(SchedulerError::InvalidInterval("probe".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SchedulerError::UnknownJob("probe".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
