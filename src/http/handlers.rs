use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::events::Event;
use crate::http::error::ApiError;
use crate::http::middleware::ClientIp;
use crate::http::server::AppState;
use crate::services::{ClientRegistration, ExportState, ImportSummary};
use crate::stores::{ClientMetricsBucket, FeatureToggle};

/// Recorded as the author of changes made through the admin API.
const ADMIN_USER: &str = "admin-api";

#[derive(Serialize)]
pub struct HealthStatus {
    pub health: &'static str,
    pub version: &'static str,
}

pub async fn get_health(State(state): State<AppState>) -> Response {
    if state.db.is_closed() {
        let body = HealthStatus {
            health: "BAD",
            version: state.version,
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }
    Json(HealthStatus {
        health: "GOOD",
        version: state.version,
    })
    .into_response()
}

pub async fn get_prometheus(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Serialize)]
pub struct ClientFeatures {
    pub version: u32,
    pub features: Vec<FeatureToggle>,
}

pub async fn get_client_features(State(state): State<AppState>) -> Result<Json<ClientFeatures>, ApiError> {
    let features = state.services.feature_toggles.list(false).await?;
    Ok(Json(ClientFeatures { version: 1, features }))
}

pub async fn register_client(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    Json(registration): Json<ClientRegistration>,
) -> Result<StatusCode, ApiError> {
    state
        .services
        .client_instances
        .register_client(registration, client_ip)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn register_metrics(
    State(state): State<AppState>,
    Json(bucket): Json<ClientMetricsBucket>,
) -> Result<StatusCode, ApiError> {
    state.services.client_instances.register_metrics(bucket).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub archived: bool,
}

#[derive(Serialize)]
pub struct FeatureList {
    pub features: Vec<FeatureToggle>,
}

pub async fn list_features(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<FeatureList>, ApiError> {
    let features = state.services.feature_toggles.list(query.archived).await?;
    Ok(Json(FeatureList { features }))
}

pub async fn create_feature(
    State(state): State<AppState>,
    Json(feature): Json<FeatureToggle>,
) -> Result<(StatusCode, Json<FeatureToggle>), ApiError> {
    let created = state.services.feature_toggles.create(feature, ADMIN_USER).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_feature(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<FeatureToggle>, ApiError> {
    Ok(Json(state.services.feature_toggles.get(&name).await?))
}

pub async fn update_feature(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut feature): Json<FeatureToggle>,
) -> Result<Json<FeatureToggle>, ApiError> {
    feature.name = name;
    Ok(Json(state.services.feature_toggles.update(feature, ADMIN_USER).await?))
}

pub async fn toggle_feature(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<FeatureToggle>, ApiError> {
    Ok(Json(state.services.feature_toggles.toggle(&name, ADMIN_USER).await?))
}

pub async fn archive_feature(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.services.feature_toggles.archive(&name, ADMIN_USER).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn export_state(State(state): State<AppState>) -> Result<Json<ExportState>, ApiError> {
    Ok(Json(state.services.state.export_state().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    #[serde(flatten)]
    pub state: ExportState,
    #[serde(default)]
    pub drop_before_import: bool,
    #[serde(default)]
    pub keep_existing: bool,
}

pub async fn import_state(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportSummary>, ApiError> {
    let summary = state
        .services
        .state
        .import_state(
            request.state,
            request.drop_before_import,
            request.keep_existing,
            ADMIN_USER,
        )
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct EventList {
    pub events: Vec<Event>,
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventList>, ApiError> {
    let limit = query.limit.unwrap_or(100).min(1000);
    let events = state.events.list(limit).await?;
    Ok(Json(EventList { events }))
}
