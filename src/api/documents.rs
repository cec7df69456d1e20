// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    auth::Auth,
    documents::{DeleteOutcome, DocumentAnalysis},
    error::ApiError,
    state::AppState,
    storage::{Document, DocumentStatus},
};

/// Document metadata as exposed to its owner. The blob path is never returned.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DocumentResponse {
    pub id: String,
    pub prediction_id: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_delete_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<&Document> for DocumentResponse {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            prediction_id: doc.prediction_id.clone(),
            content_type: doc.content_type.clone(),
            size_bytes: doc.size_bytes,
            status: doc.status,
            created_at: doc.created_at,
            scheduled_delete_at: doc.scheduled_delete_at,
            processed_at: doc.processed_at,
            deleted_at: doc.deleted_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentStatusResponse {
    pub document: DocumentResponse,
    /// Seconds until the deletion timer fires, if one is live.
    pub remaining_ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProcessResponse {
    pub document: DocumentResponse,
    pub analysis: DocumentAnalysis,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub status: DeleteOutcome,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkDeleteResponse {
    pub deleted: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConsentResponse {
    pub prediction_id: String,
    pub consented_at: DateTime<Utc>,
}

#[utoipa::path(
    post,
    path = "/v1/predictions/{prediction_id}/consent",
    params(("prediction_id" = String, Path, description = "Prediction the consent applies to")),
    tag = "Documents",
    responses(
        (status = 201, body = ConsentResponse),
        (status = 404, description = "Prediction not found")
    )
)]
pub async fn record_consent(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Path(prediction_id): Path<String>,
) -> Result<(StatusCode, Json<ConsentResponse>), ApiError> {
    let entry = state.documents.record_consent(&caller, &prediction_id)?;
    Ok((
        StatusCode::CREATED,
        Json(ConsentResponse {
            prediction_id,
            consented_at: entry.created_at,
        }),
    ))
}

/// Upload a document image. The body is the raw file; `Content-Type` names its format.
#[utoipa::path(
    post,
    path = "/v1/predictions/{prediction_id}/documents",
    params(("prediction_id" = String, Path, description = "Paid prediction receiving the document")),
    request_body(content = Vec<u8>, content_type = "image/jpeg"),
    tag = "Documents",
    responses(
        (status = 201, body = DocumentResponse),
        (status = 400, description = "Unsupported type or size"),
        (status = 404, description = "Prediction not found"),
        (status = 422, description = "Upload window closed"),
        (status = 429, description = "Too many uploads")
    )
)]
pub async fn upload_document(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Path(prediction_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<DocumentResponse>), ApiError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let document = state
        .documents
        .ingest(&caller, &prediction_id, content_type, &body)
        .await?;
    Ok((StatusCode::CREATED, Json(DocumentResponse::from(&document))))
}

#[utoipa::path(
    delete,
    path = "/v1/predictions/{prediction_id}/documents",
    params(("prediction_id" = String, Path, description = "Prediction whose documents are erased")),
    tag = "Documents",
    responses(
        (status = 200, body = BulkDeleteResponse),
        (status = 404, description = "Prediction not found")
    )
)]
pub async fn delete_prediction_documents(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Path(prediction_id): Path<String>,
) -> Result<Json<BulkDeleteResponse>, ApiError> {
    let deleted = state.documents.bulk_delete(&caller, &prediction_id).await?;
    Ok(Json(BulkDeleteResponse { deleted }))
}

#[utoipa::path(
    get,
    path = "/v1/documents/{document_id}",
    params(("document_id" = String, Path, description = "Document identifier")),
    tag = "Documents",
    responses(
        (status = 200, body = DocumentStatusResponse),
        (status = 404, description = "Document not found")
    )
)]
pub async fn get_document(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentStatusResponse>, ApiError> {
    let view = state.documents.status(&caller, &document_id).await?;
    Ok(Json(DocumentStatusResponse {
        document: DocumentResponse::from(&view.document),
        remaining_ttl_secs: view.deletion_timer_remaining.map(|d| d.as_secs()),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/documents/{document_id}/process",
    params(("document_id" = String, Path, description = "Document identifier")),
    tag = "Documents",
    responses(
        (status = 200, body = ProcessResponse),
        (status = 404, description = "Document not found"),
        (status = 409, description = "Document already deleted")
    )
)]
pub async fn process_document(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Path(document_id): Path<String>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let (document, analysis) = state.documents.process(&caller, &document_id).await?;
    Ok(Json(ProcessResponse {
        document: DocumentResponse::from(&document),
        analysis,
    }))
}

#[utoipa::path(
    delete,
    path = "/v1/documents/{document_id}",
    params(("document_id" = String, Path, description = "Document identifier")),
    tag = "Documents",
    responses(
        (status = 200, body = DeleteResponse),
        (status = 404, description = "Document not found")
    )
)]
pub async fn delete_document(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Path(document_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let status = state.documents.manual_delete(&caller, &document_id).await?;
    Ok(Json(DeleteResponse { status }))
}
