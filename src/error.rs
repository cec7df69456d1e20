// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy shared by the core and its HTTP surface.
//!
//! Core operations return [`CoreError`]. Handlers convert it into an
//! [`ApiError`], which renders the stable `{ "error": ..., "details": ... }`
//! body. Internal detail (database, blob store, cipher failures) is logged
//! here and replaced with a generic message.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::crypto::CryptoError;
use crate::kv::KvError;
use crate::storage::{BlobError, DbError};

/// A state conflict, surfaced as 409 or 422 with the conflicting state named.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Conflict {
    #[error("prediction is already paid")]
    AlreadyPaid,

    #[error("a payment is already pending for this product")]
    PaymentAlreadyPending { order_id: String },

    #[error("document is already deleted")]
    AlreadyDeleted,

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: String,
        to: String,
        allowed: Vec<String>,
    },

    #[error("document upload window is closed")]
    UploadWindowClosed,
}

impl Conflict {
    fn status(&self) -> StatusCode {
        match self {
            Conflict::AlreadyPaid
            | Conflict::PaymentAlreadyPending { .. }
            | Conflict::AlreadyDeleted => StatusCode::CONFLICT,
            Conflict::InvalidTransition { .. } | Conflict::UploadWindowClosed => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        }
    }

    fn details(&self) -> Value {
        match self {
            Conflict::AlreadyPaid => json!({ "state": "ALREADY_PAID" }),
            Conflict::PaymentAlreadyPending { order_id } => {
                json!({ "state": "PAYMENT_ALREADY_PENDING", "order_id": order_id })
            }
            Conflict::AlreadyDeleted => json!({ "state": "ALREADY_DELETED" }),
            Conflict::InvalidTransition { from, to, allowed } => json!({
                "state": "INVALID_TRANSITION",
                "from": from,
                "to": to,
                "allowed": allowed,
            }),
            Conflict::UploadWindowClosed => json!({ "state": "UPLOAD_WINDOW_CLOSED" }),
        }
    }
}

/// Errors produced by core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    #[error("authentication required")]
    AuthenticationRequired,

    /// Missing record, or a record owned by someone else.
    #[error("not found")]
    NotFound,

    /// Privilege gate (admin paths only).
    #[error("forbidden")]
    Forbidden,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Conflict(#[from] Conflict),

    #[error("payment gateway error: {0}")]
    Upstream(String),

    #[error("payment gateway not configured: {0}")]
    GatewayUnavailable(&'static str),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        CoreError::Validation {
            details: Some(json!({ "field": field, "reason": message })),
            message,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<Value>,
    pub retry_after: Option<u64>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation { message, details } => ApiError {
                details,
                ..ApiError::bad_request(message)
            },
            CoreError::AuthenticationRequired => ApiError::unauthorized("Authentication required"),
            CoreError::NotFound => ApiError::not_found("Not found"),
            CoreError::Forbidden => ApiError::forbidden("Insufficient privileges"),
            CoreError::Conflict(conflict) => {
                ApiError::new(conflict.status(), conflict.to_string())
                    .with_details(conflict.details())
            }
            CoreError::Upstream(detail) => {
                error!(error = %detail, "Payment gateway call failed");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Payment provider unavailable, please try again",
                )
            }
            CoreError::GatewayUnavailable(gateway) => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Payment gateway {gateway} is not available"),
            ),
            CoreError::RateLimited { retry_after_secs } => ApiError {
                retry_after: Some(retry_after_secs),
                ..ApiError::new(
                    StatusCode::TOO_MANY_REQUESTS,
                    format!("Too many requests, try again in {retry_after_secs} seconds"),
                )
            },
            other @ (CoreError::Crypto(_)
            | CoreError::Database(_)
            | CoreError::Blob(_)
            | CoreError::Kv(_)
            | CoreError::Internal(_)) => {
                error!(error = %other, "Request failed with internal error");
                ApiError::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after;
        let body = Json(ErrorBody {
            error: self.message,
            details: self.details,
        });
        let mut response = (self.status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn constructors_set_status_and_message() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.message, "missing");

        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);

        let unp = ApiError::unprocessable("oops");
        assert_eq!(unp.status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn into_response_omits_empty_details() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data"}"#);
    }

    #[tokio::test]
    async fn validation_carries_field_details() {
        let err = CoreError::validation_field("content_type", "unsupported type");
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_of(response).await;
        assert_eq!(body["details"]["field"], "content_type");
    }

    #[tokio::test]
    async fn conflicts_name_the_state() {
        let pending = ApiError::from(CoreError::from(Conflict::PaymentAlreadyPending {
            order_id: "o1".into(),
        }));
        assert_eq!(pending.status, StatusCode::CONFLICT);
        assert_eq!(pending.details.as_ref().unwrap()["order_id"], "o1");

        let transition = ApiError::from(CoreError::from(Conflict::InvalidTransition {
            from: "PAID".into(),
            to: "COMPLETED".into(),
            allowed: vec!["DELIVERED".into()],
        }));
        assert_eq!(transition.status, StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_of(transition.into_response()).await;
        assert_eq!(body["details"]["allowed"][0], "DELIVERED");
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() {
        let response =
            ApiError::from(CoreError::RateLimited { retry_after_secs: 42 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[tokio::test]
    async fn internal_errors_are_generic() {
        let response = ApiError::from(CoreError::Internal("db path /data/core.redb".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(response).await;
        assert_eq!(body["error"], "Internal server error");

        let upstream = ApiError::from(CoreError::Upstream("401 from gateway".into()));
        assert_eq!(upstream.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!upstream.message.contains("401"));
    }

    #[test]
    fn ownership_mismatch_and_missing_look_identical() {
        let err = ApiError::from(CoreError::NotFound);
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
