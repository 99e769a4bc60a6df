//! Intake API handlers
//!
//! POST /intake/batch, file commands, duplicate resolution and observation

use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use intake_common::events::{CollectionKind, DocumentType, DuplicateDecision, PipelineStage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{OutputCollections, RawFile},
    services::{
        BatchReceipt, CancelOutcome, ConflictView, FileView, IntakeSnapshot, IntakeSummary,
        ResolveOutcome,
    },
    AppState,
};

/// Header carrying the caller's role for upload permission checks
pub const ROLE_HEADER: &str = "x-intake-role";

/// POST /intake/conflicts/:file_id/resolve request
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub decision: DuplicateDecision,
}

/// POST /intake/files/:file_id/reclassify request
#[derive(Debug, Deserialize)]
pub struct ReclassifyRequest {
    pub document_type: DocumentType,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub file_id: Uuid,
    #[serde(flatten)]
    pub outcome: CancelOutcome,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub file_id: Uuid,
    pub stage: PipelineStage,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub file_id: Uuid,
    pub outcome: ResolveOutcome,
}

#[derive(Debug, Serialize)]
pub struct ReclassifyResponse {
    pub file_id: Uuid,
    pub collection: CollectionKind,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub files_dropped: usize,
}

/// POST /intake/batch
///
/// Multipart upload, one part per file, sent with an `X-Intake-Role`
/// header. Returns 202 Accepted with the receipt while pipelines run in the
/// background, 422 when the batch is refused as a whole, or 403 when the
/// role may not upload.
///
/// Parts are streamed. A file over the size limit, or past the batch's file
/// limit, is only counted; its bytes are never held in memory.
pub async fn submit_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<BatchReceipt>)> {
    let role = headers.get(ROLE_HEADER).and_then(|value| value.to_str().ok());
    state.orchestrator.authorize_upload(role)?;

    let policy = state.orchestrator.policy();
    let max_bytes = policy.max_file_size_bytes();
    let max_files = policy.max_files_per_batch();
    let mut files = Vec::new();

    while let Some(mut field) = multipart.next_field().await? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            // Non-file form fields carry nothing for us
            continue;
        };
        let content_type = field.content_type().map(str::to_string);

        let mut keep = files.len() < max_files;
        let mut size_bytes = 0u64;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = field.chunk().await? {
            size_bytes += chunk.len() as u64;
            if keep && size_bytes > max_bytes {
                keep = false;
                buffer = BytesMut::new();
            }
            if keep {
                buffer.extend_from_slice(&chunk);
            }
        }

        let mut raw = if keep {
            RawFile::new(file_name, buffer.freeze())
        } else {
            tracing::debug!(file_name = %file_name, size_bytes, "Part not buffered");
            RawFile::unbuffered(file_name, size_bytes)
        };
        if let Some(content_type) = content_type {
            raw = raw.with_content_type(content_type);
        }
        files.push(raw);
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest(
            "Request contained no files".to_string(),
        ));
    }

    let receipt = state.orchestrator.submit_batch(files).await;
    let status = if receipt.batch_error.is_some() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(receipt)))
}

/// GET /intake/files
pub async fn list_files(State(state): State<AppState>) -> Json<Vec<FileView>> {
    Json(state.orchestrator.files().await)
}

/// GET /intake/files/:file_id
pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> ApiResult<Json<FileView>> {
    state
        .orchestrator
        .get_file(file_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("File not found: {}", file_id)))
}

/// POST /intake/files/:file_id/cancel
pub async fn cancel_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    let outcome = state.orchestrator.cancel(file_id).await?;
    Ok(Json(CancelResponse { file_id, outcome }))
}

/// POST /intake/files/:file_id/retry
pub async fn retry_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<RetryResponse>)> {
    let stage = state.orchestrator.retry(file_id).await?;
    Ok((StatusCode::ACCEPTED, Json(RetryResponse { file_id, stage })))
}

/// POST /intake/files/:file_id/reclassify
pub async fn reclassify_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Json(request): Json<ReclassifyRequest>,
) -> ApiResult<Json<ReclassifyResponse>> {
    let collection = state
        .orchestrator
        .reclassify(file_id, request.document_type)
        .await?;
    Ok(Json(ReclassifyResponse {
        file_id,
        collection,
    }))
}

/// GET /intake/conflicts/current
///
/// `null` when no decision is pending.
pub async fn current_conflict(State(state): State<AppState>) -> Json<Option<ConflictView>> {
    Json(state.orchestrator.current_conflict().await)
}

/// POST /intake/conflicts/:file_id/resolve
pub async fn resolve_conflict(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<ResolveResponse>> {
    let outcome = state
        .orchestrator
        .resolve_duplicate(file_id, request.decision)
        .await?;
    Ok(Json(ResolveResponse { file_id, outcome }))
}

/// GET /intake/collections
pub async fn collections(State(state): State<AppState>) -> Json<OutputCollections> {
    Json(state.orchestrator.collections().await)
}

/// GET /intake/summary
pub async fn summary(State(state): State<AppState>) -> Json<IntakeSummary> {
    Json(state.orchestrator.summary().await)
}

/// GET /intake/snapshot
pub async fn snapshot(State(state): State<AppState>) -> Json<IntakeSnapshot> {
    Json(state.orchestrator.snapshot().await)
}

/// POST /intake/clear
pub async fn clear(State(state): State<AppState>) -> Json<ClearResponse> {
    let files_dropped = state.orchestrator.clear().await;
    Json(ClearResponse { files_dropped })
}

/// Build intake routes
pub fn intake_routes() -> Router<AppState> {
    Router::new()
        .route("/intake/batch", post(submit_batch))
        .route("/intake/files", get(list_files))
        .route("/intake/files/:file_id", get(get_file))
        .route("/intake/files/:file_id/cancel", post(cancel_file))
        .route("/intake/files/:file_id/retry", post(retry_file))
        .route("/intake/files/:file_id/reclassify", post(reclassify_file))
        .route("/intake/conflicts/current", get(current_conflict))
        .route("/intake/conflicts/:file_id/resolve", post(resolve_conflict))
        .route("/intake/collections", get(collections))
        .route("/intake/summary", get(summary))
        .route("/intake/snapshot", get(snapshot))
        .route("/intake/clear", post(clear))
}
