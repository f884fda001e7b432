//! HTTP handlers
//!
//! - GET  /get-tables/:connection_id
//! - GET  /get-columns/:connection_id/:table
//! - GET  /scan/:connection_id/:table?sample_size=N
//! - POST /process (form)
//! - GET  /runs/:run_id
//! - POST /runs/:run_id/cancel
//! - POST /runs/:run_id/resume
//!
//! Failures always answer `{success: false, message}` with the stable public
//! message of the error; backend detail stays in the logs.

use crate::core::service::DeidService;
use crate::deidentification::TableScan;
use crate::domain::{ConnectionId, DeidError, MappingId, RuleId, RunId, RunRecord, RunRequest};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Service components
    pub service: Arc<DeidService>,
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/get-tables/:connection_id", get(get_tables))
        .route("/get-columns/:connection_id/:table", get(get_columns))
        .route("/scan/:connection_id/:table", get(scan_table))
        .route("/process", post(process))
        .route("/runs/:run_id", get(get_run))
        .route("/runs/:run_id/cancel", post(cancel_run))
        .route("/runs/:run_id/resume", post(resume_run))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct TablesResponse {
    success: bool,
    tables: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ColumnsResponse {
    success: bool,
    columns: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ScanResponse {
    success: bool,
    scan: TableScan,
}

#[derive(Debug, Deserialize)]
struct ScanParams {
    sample_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ProcessResponse {
    success: bool,
    run_id: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

/// Error response carrying only the public message
#[derive(Debug)]
pub struct ApiError(DeidError);

impl From<DeidError> for ApiError {
    fn from(err: DeidError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            DeidError::NotFound(_) => StatusCode::NOT_FOUND,
            DeidError::Validation(_)
            | DeidError::InvalidRuleParameter(_)
            | DeidError::TypeMismatch(_)
            | DeidError::Configuration(_) => StatusCode::BAD_REQUEST,
            DeidError::Connection(_) | DeidError::Timeout(_) | DeidError::Storage(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DeidError::Serialization(_) | DeidError::Io(_) | DeidError::Cancelled(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(kind = self.0.kind(), error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            success: false,
            message: self.0.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn connection_id(raw: &str) -> ApiResult<ConnectionId> {
    ConnectionId::new(raw).map_err(|e| ApiError(DeidError::Validation(e)))
}

fn run_id(raw: &str) -> ApiResult<RunId> {
    RunId::from_str(raw).map_err(|e| ApiError(DeidError::Validation(e)))
}

/// GET /get-tables/:connection_id
async fn get_tables(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<TablesResponse>> {
    let id = connection_id(&raw_id)?;
    let tables = state.service.inspector().list_tables(&id).await?;
    Ok(Json(TablesResponse {
        success: true,
        tables,
    }))
}

/// GET /get-columns/:connection_id/:table
async fn get_columns(
    State(state): State<AppState>,
    Path((raw_id, table)): Path<(String, String)>,
) -> ApiResult<Json<ColumnsResponse>> {
    let id = connection_id(&raw_id)?;
    let columns = state.service.inspector().list_columns(&id, &table).await?;
    Ok(Json(ColumnsResponse {
        success: true,
        columns: columns.into_iter().map(|c| c.name).collect(),
    }))
}

async fn scan_table(
    State(state): State<AppState>,
    Path((raw_id, table)): Path<(String, String)>,
    Query(params): Query<ScanParams>,
) -> ApiResult<Json<ScanResponse>> {
    let id = connection_id(&raw_id)?;
    let scan = state
        .service
        .inspector()
        .scan(&id, &table, params.sample_size)
        .await?;
    Ok(Json(ScanResponse {
        success: true,
        scan,
    }))
}

/// Fields of the `/process` form
///
/// `rule_ids[]` and `mapping_ids[]` repeat, which the plain `Form` extractor
/// cannot collect, so the body is parsed by hand.
#[derive(Debug, Default, PartialEq)]
pub struct ProcessForm {
    /// Connection id
    pub connection_id: String,
    /// Patient table
    pub patient_table: String,
    /// Patient identifier column
    pub patient_id_field: String,
    /// Selected rules, in order
    pub rule_ids: Vec<String>,
    /// Selected field mappings
    pub mapping_ids: Vec<String>,
    /// Optional run name
    pub process_name: Option<String>,
    /// Optional pseudonym template, for example `SW{:07d}`
    pub patient_id_format: Option<String>,
    /// Optional destination connection for the new_table sink
    pub destination_connection_id: Option<String>,
}

impl ProcessForm {
    /// Parses an `application/x-www-form-urlencoded` body
    pub fn parse(body: &[u8]) -> Self {
        let mut form = ProcessForm::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            let value = value.trim().to_string();
            match key.as_ref() {
                "connection_id" => form.connection_id = value,
                "patient_table" => form.patient_table = value,
                "patient_id_field" => form.patient_id_field = value,
                "rule_ids[]" | "rule_ids" if !value.is_empty() => form.rule_ids.push(value),
                "mapping_ids[]" | "mapping_ids" if !value.is_empty() => {
                    form.mapping_ids.push(value)
                }
                "process_name" if !value.is_empty() => form.process_name = Some(value),
                "patient_id_format" if !value.is_empty() => form.patient_id_format = Some(value),
                "destination_connection_id" if !value.is_empty() => {
                    form.destination_connection_id = Some(value)
                }
                _ => {}
            }
        }
        form
    }

    /// Typed run request
    pub fn into_request(self) -> crate::domain::Result<RunRequest> {
        if self.connection_id.is_empty() {
            return Err(DeidError::Validation("connection_id is required".to_string()));
        }
        let rule_ids = self
            .rule_ids
            .iter()
            .map(|id| RuleId::new(id.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DeidError::Validation)?;
        let mapping_ids = self
            .mapping_ids
            .iter()
            .map(|id| MappingId::new(id.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DeidError::Validation)?;
        let destination_connection_id = self
            .destination_connection_id
            .map(ConnectionId::new)
            .transpose()
            .map_err(DeidError::Validation)?;

        Ok(RunRequest {
            connection_id: ConnectionId::new(self.connection_id).map_err(DeidError::Validation)?,
            table: self.patient_table,
            patient_id_field: self.patient_id_field,
            rule_ids,
            mapping_ids,
            patient_id_format: self.patient_id_format,
            name: self.process_name,
            destination_connection_id,
        })
    }
}

/// POST /process
async fn process(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<ProcessResponse>> {
    let request = ProcessForm::parse(&body).into_request()?;
    let id = state.service.coordinator().dispatch(request).await?;
    Ok(Json(ProcessResponse {
        success: true,
        run_id: id.to_string(),
        message: "Processing started".to_string(),
    }))
}

/// GET /runs/:run_id
async fn get_run(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<RunRecord>> {
    let id = run_id(&raw_id)?;
    Ok(Json(state.service.tracker().get(&id).await?))
}

/// POST /runs/:run_id/cancel
async fn cancel_run(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<ProcessResponse>> {
    let id = run_id(&raw_id)?;
    state.service.coordinator().cancel(&id).await?;
    Ok(Json(ProcessResponse {
        success: true,
        run_id: id.to_string(),
        message: "Cancellation requested".to_string(),
    }))
}

/// POST /runs/:run_id/resume
async fn resume_run(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<ProcessResponse>> {
    let id = run_id(&raw_id)?;
    state.service.coordinator().resume(&id).await?;
    Ok(Json(ProcessResponse {
        success: true,
        run_id: id.to_string(),
        message: "Run resumed".to_string(),
    }))
}
