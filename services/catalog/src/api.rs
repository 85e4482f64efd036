use crate::catalog_service::{
    CatalogService, DataFile, ScenarioDetail, SearchRequest, SearchResult, MAX_PAGE_SIZE,
};
use crate::catalog_store::{CatalogStore, Location, NearMissCode, Section};
use crate::config::ApiConfig;
use crate::download_service::{DownloadResult, DownloadService};
use crate::error::{CatalogError, MessageCatalog};
use crate::frontend_log::{self, FrontendLogRecord};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Near-miss type codes are exactly this many characters
const NEAR_MISS_CODE_LEN: usize = 3;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogService>,
    pub downloads: Arc<DownloadService>,
    pub store: Arc<dyn CatalogStore>,
    pub messages: Arc<MessageCatalog>,
    /// Header carrying the caller identity
    pub user_header: String,
}

/// Error body returned for every failed request
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Uuid,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Successful payloads are wrapped in `results`
#[derive(Debug, Serialize)]
pub struct Results<T> {
    pub results: T,
}

fn ok<T>(results: T) -> Json<Results<T>> {
    Json(Results { results })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeEntry {
    pub code: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionEntry {
    pub section_id: String,
    pub section_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeListResponse {
    pub nearmiss_type: Vec<CodeEntry>,
    pub happen_section: Vec<SectionEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEntry {
    pub location_id: String,
    pub location_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationListResponse {
    pub happen_location: Vec<LocationEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearMissTypeEntry {
    pub nearmiss_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioListItem {
    pub nearmiss_type_list: Vec<NearMissTypeEntry>,
    pub video_thumbnail_url: String,
    pub section_name: String,
    pub location_name: String,
    pub uuid: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioListResponse {
    pub counts: i64,
    pub lists: Vec<ScenarioListItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFileEntry {
    pub name: String,
    /// Division code, empty when unclassified
    pub data_division: String,
    pub size: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDetailResponse {
    pub id: i64,
    pub nearmiss_type_list: Vec<NearMissTypeEntry>,
    pub video_url: String,
    pub video_thumbnail_url: String,
    pub scenario_create_time: DateTime<Utc>,
    pub section_name: String,
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub uuid: String,
    pub scenario_data_list: Vec<DataFileEntry>,
    pub machine_learning_data_list: Vec<DataFileEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub download_url: Option<String>,
}

fn near_miss_entries(codes: Vec<String>) -> Vec<NearMissTypeEntry> {
    codes
        .into_iter()
        .map(|nearmiss_type| NearMissTypeEntry { nearmiss_type })
        .collect()
}

impl From<NearMissCode> for CodeEntry {
    fn from(c: NearMissCode) -> Self {
        Self {
            code: c.code,
            value: c.value,
        }
    }
}

impl From<Section> for SectionEntry {
    fn from(s: Section) -> Self {
        Self {
            section_id: s.section_id,
            section_name: s.section_name,
        }
    }
}

impl From<Location> for LocationEntry {
    fn from(l: Location) -> Self {
        Self {
            location_id: l.location_id,
            location_name: l.location_name,
        }
    }
}

impl From<DataFile> for DataFileEntry {
    fn from(f: DataFile) -> Self {
        Self {
            name: f.name,
            data_division: f.division.map(|d| d.code().to_string()).unwrap_or_default(),
            size: f.size,
        }
    }
}

impl From<SearchResult> for ScenarioListResponse {
    fn from(r: SearchResult) -> Self {
        Self {
            counts: r.total,
            lists: r
                .scenarios
                .into_iter()
                .map(|s| ScenarioListItem {
                    nearmiss_type_list: near_miss_entries(s.near_miss_types),
                    video_thumbnail_url: s.thumbnail_url,
                    section_name: s.section_name,
                    location_name: s.location_name,
                    uuid: s.uuid,
                })
                .collect(),
        }
    }
}

impl From<ScenarioDetail> for ScenarioDetailResponse {
    fn from(d: ScenarioDetail) -> Self {
        Self {
            id: d.scenario.id,
            nearmiss_type_list: near_miss_entries(d.near_miss_types),
            video_url: d.video_url,
            video_thumbnail_url: d.thumbnail_url,
            scenario_create_time: d.scenario.scenario_create_time,
            section_name: d.scenario.section_name,
            location_name: d.scenario.location_name,
            latitude: d.scenario.latitude,
            longitude: d.scenario.longitude,
            uuid: d.scenario.uuid,
            scenario_data_list: d.scenario_data.into_iter().map(Into::into).collect(),
            machine_learning_data_list: d.ml_data.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<DownloadResult> for DownloadResponse {
    fn from(r: DownloadResult) -> Self {
        Self {
            download_url: r.download_url,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationListQuery {
    pub section_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DetailQuery {
    pub uuid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    pub uuid: Option<String>,
    pub data_division: Option<String>,
}

/// HTTP status of a catalog error
pub fn status_for(err: &CatalogError) -> StatusCode {
    match err {
        CatalogError::NotAuthorizedOrNotFound => StatusCode::NOT_FOUND,
        CatalogError::StoreAccess(_) | CatalogError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_REQUEST,
    }
}

/// Render an error with the given catalog and log it with its code
pub fn error_response(messages: &MessageCatalog, err: CatalogError) -> ApiError {
    let code = err.code();
    let request_id = Uuid::new_v4();

    if matches!(err, CatalogError::Validation(_)) {
        debug!(code, request_id = %request_id, error = %err, "Request rejected");
    } else {
        error!(code, request_id = %request_id, error = %err, "Request failed");
    }
    metrics::counter!("catalog.errors", "code" => code).increment(1);

    (
        status_for(&err),
        Json(ErrorResponse {
            code: code.to_string(),
            message: messages.message_for(&err),
            request_id,
        }),
    )
}

fn fail(state: &AppState) -> impl Fn(CatalogError) -> ApiError + '_ {
    move |err| error_response(&state.messages, err)
}

/// Resolved caller identity from the configured header
pub fn caller_id(headers: &HeaderMap, header: &str) -> Result<String, CatalogError> {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| CatalogError::Validation(format!("missing caller identity header {header}")))
}

fn required(value: Option<String>, name: &str) -> Result<String, CatalogError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CatalogError::Validation(format!("{name} is required")))
}

fn positive(value: Option<&str>, name: &str, max: u32) -> Result<u32, CatalogError> {
    let raw = value.ok_or_else(|| CatalogError::Validation(format!("{name} is required")))?;
    match raw.trim().parse::<u32>() {
        Ok(n) if (1..=max).contains(&n) => Ok(n),
        _ => Err(CatalogError::Validation(format!(
            "{name} must be an integer between 1 and {max}"
        ))),
    }
}

/// Build a search request from raw query pairs. `nearmissType` may repeat
/// and each occurrence may hold comma-separated codes.
pub fn parse_search_params(pairs: &[(String, String)]) -> Result<SearchRequest, CatalogError> {
    let value = |name: &str| {
        pairs
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.trim().is_empty())
    };

    let mut near_miss_types = Vec::new();
    for (_, raw) in pairs.iter().filter(|(k, _)| k == "nearmissType") {
        for code in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            if code.chars().count() != NEAR_MISS_CODE_LEN {
                return Err(CatalogError::Validation(format!(
                    "nearmissType must be {NEAR_MISS_CODE_LEN} characters: {code}"
                )));
            }
            near_miss_types.push(code.to_string());
        }
    }

    let created_on = value("happenTime")
        .map(|raw| {
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
                CatalogError::Validation("happenTime must be YYYY-MM-DD".to_string())
            })
        })
        .transpose()?;

    Ok(SearchRequest {
        near_miss_types,
        page: positive(value("requestPage"), "requestPage", u32::MAX)?,
        page_size: positive(value("itemsPerPage"), "itemsPerPage", MAX_PAGE_SIZE)?,
        created_on,
        section_id: value("happenSection").map(String::from),
        location_id: value("happenLocation").map(String::from),
    })
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/codes/list", get(code_list))
        .route("/api/codes/locationList", get(location_list))
        .route("/api/scenario/list", get(scenario_list))
        .route("/api/scenario/detail", get(scenario_detail))
        .route("/api/scenario/download", get(scenario_download))
        .route("/api/frontendlog/upload", post(upload_frontend_log))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "catalog-service"
    }))
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => {
            error!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "database": "disconnected",
                    "code": e.code()
                })),
            )
        }
    }
}

async fn code_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Results<CodeListResponse>>, ApiError> {
    let user_id = caller_id(&headers, &state.user_header).map_err(fail(&state))?;
    let codes = state.catalog.code_list(&user_id).await.map_err(fail(&state))?;

    Ok(ok(CodeListResponse {
        nearmiss_type: codes.near_miss_types.into_iter().map(Into::into).collect(),
        happen_section: codes.sections.into_iter().map(Into::into).collect(),
    }))
}

async fn location_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<LocationListQuery>,
) -> Result<Json<Results<LocationListResponse>>, ApiError> {
    let user_id = caller_id(&headers, &state.user_header).map_err(fail(&state))?;
    let section_id = required(params.section_id, "sectionId").map_err(fail(&state))?;

    let locations = state
        .catalog
        .location_list(&section_id, &user_id)
        .await
        .map_err(fail(&state))?;

    Ok(ok(LocationListResponse {
        happen_location: locations.into_iter().map(Into::into).collect(),
    }))
}

async fn scenario_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Results<ScenarioListResponse>>, ApiError> {
    let user_id = caller_id(&headers, &state.user_header).map_err(fail(&state))?;
    let request = parse_search_params(&pairs).map_err(fail(&state))?;

    let result = state
        .catalog
        .search(&request, &user_id)
        .await
        .map_err(fail(&state))?;

    Ok(ok(result.into()))
}

async fn scenario_detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DetailQuery>,
) -> Result<Json<Results<ScenarioDetailResponse>>, ApiError> {
    let user_id = caller_id(&headers, &state.user_header).map_err(fail(&state))?;
    let uuid = required(params.uuid, "uuid").map_err(fail(&state))?;

    let detail = state
        .catalog
        .detail(&uuid, &user_id)
        .await
        .map_err(fail(&state))?;

    Ok(ok(detail.into()))
}

async fn scenario_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DownloadQuery>,
) -> Result<Json<Results<DownloadResponse>>, ApiError> {
    let user_id = caller_id(&headers, &state.user_header).map_err(fail(&state))?;
    let uuid = required(params.uuid, "uuid").map_err(fail(&state))?;
    let division = required(params.data_division, "dataDivision").map_err(fail(&state))?;

    let result = state
        .downloads
        .download(&uuid, &division, &user_id)
        .await
        .map_err(fail(&state))?;

    Ok(ok(result.into()))
}

async fn upload_frontend_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(record): Json<FrontendLogRecord>,
) -> Result<StatusCode, ApiError> {
    let user_id = caller_id(&headers, &state.user_header).map_err(fail(&state))?;
    frontend_log::relay(&user_id, &record);
    Ok(StatusCode::NO_CONTENT)
}

/// Start the catalog API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting catalog API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
