//! HTTP handlers mapping the wire endpoints onto the runtime facade.

use crate::AppState;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use shellbox_api_types::{
    BashAction, BashObservation, CloseBashSessionRequest, CloseResponse, CloseSessionResponse,
    Command, CommandResponse, CreateSessionRequest, CreateSessionResponse, IsAliveResponse,
    ReadFileRequest, ReadFileResponse, RuntimeError, UploadResponse, WriteFileRequest,
    WriteFileResponse, ERROR_HTTP_STATUS,
};
use shellbox_runtime::Runtime;

/// Wrapper turning a taxonomy error into its wire envelope.
#[derive(Debug)]
pub struct ApiErrorResponse(RuntimeError);

impl From<RuntimeError> for ApiErrorResponse {
    fn from(err: RuntimeError) -> Self {
        ApiErrorResponse(err)
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(ERROR_HTTP_STATUS)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_envelope())).into_response()
    }
}

pub async fn root() -> Json<Value> {
    Json(json!({"message": "running"}))
}

pub async fn is_alive<R: Runtime>(
    State(state): State<AppState<R>>,
) -> Result<Json<IsAliveResponse>, ApiErrorResponse> {
    Ok(Json(state.runtime.is_alive().await?))
}

pub async fn create_session<R: Runtime>(
    State(state): State<AppState<R>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ApiErrorResponse> {
    Ok(Json(state.runtime.create_session(request).await?))
}

pub async fn run_in_session<R: Runtime>(
    State(state): State<AppState<R>>,
    Json(action): Json<BashAction>,
) -> Result<Json<BashObservation>, ApiErrorResponse> {
    Ok(Json(state.runtime.run_in_session(action).await?))
}

pub async fn close_session<R: Runtime>(
    State(state): State<AppState<R>>,
    Json(request): Json<CloseBashSessionRequest>,
) -> Result<Json<CloseSessionResponse>, ApiErrorResponse> {
    Ok(Json(state.runtime.close_session(request).await?))
}

pub async fn execute<R: Runtime>(
    State(state): State<AppState<R>>,
    Json(command): Json<Command>,
) -> Result<Json<CommandResponse>, ApiErrorResponse> {
    Ok(Json(state.runtime.execute(command).await?))
}

pub async fn read_file<R: Runtime>(
    State(state): State<AppState<R>>,
    Json(request): Json<ReadFileRequest>,
) -> Result<Json<ReadFileResponse>, ApiErrorResponse> {
    Ok(Json(state.runtime.read_file(request).await?))
}

pub async fn write_file<R: Runtime>(
    State(state): State<AppState<R>>,
    Json(request): Json<WriteFileRequest>,
) -> Result<Json<WriteFileResponse>, ApiErrorResponse> {
    Ok(Json(state.runtime.write_file(request).await?))
}

/// Multipart form: `file` (the payload), `target_path`, and `unzip` ("true"
/// marks the payload as an archive to extract into `target_path`).
pub async fn upload<R: Runtime>(
    State(state): State<AppState<R>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiErrorResponse> {
    let mut data: Option<Vec<u8>> = None;
    let mut target_path: Option<String> = None;
    let mut unpack = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RuntimeError::FileOp(format!("invalid multipart upload: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| RuntimeError::FileOp(format!("failed to read upload: {e}")))?;
                data = Some(bytes.to_vec());
            }
            Some("target_path") => {
                target_path = Some(field.text().await.map_err(|e| {
                    RuntimeError::FileOp(format!("failed to read target_path: {e}"))
                })?);
            }
            Some("unzip") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| RuntimeError::FileOp(format!("failed to read unzip flag: {e}")))?;
                unpack = text.trim().eq_ignore_ascii_case("true");
            }
            _ => {}
        }
    }

    let data =
        data.ok_or_else(|| RuntimeError::FileOp("upload is missing the file field".to_string()))?;
    let target_path = target_path
        .ok_or_else(|| RuntimeError::FileOp("upload is missing target_path".to_string()))?;

    Ok(Json(state.runtime.upload(target_path, data, unpack).await?))
}

pub async fn close<R: Runtime>(
    State(state): State<AppState<R>>,
) -> Result<Json<CloseResponse>, ApiErrorResponse> {
    Ok(Json(state.runtime.close().await?))
}
