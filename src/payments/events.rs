// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Gateway-neutral webhook events.
//!
//! Each gateway verifies its own signature scheme and extracts a
//! [`VerifiedPaymentEvent`]; reconciliation only ever sees that type.

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use crate::error::ApiError;
use crate::storage::Gateway;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Payment outcome as reported by a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedStatus {
    Paid,
    Failed,
    Expired,
    /// Intermediate or unknown status; acknowledged and ignored.
    Other(String),
}

impl ReportedStatus {
    /// Map a raw status string (case-insensitive).
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PAID" | "SUCCEEDED" | "SETTLED" => ReportedStatus::Paid,
            "FAILED" => ReportedStatus::Failed,
            "EXPIRED" => ReportedStatus::Expired,
            _ => ReportedStatus::Other(raw.trim().to_string()),
        }
    }
}

/// A webhook whose signature has been checked and whose fields were extracted.
#[derive(Debug, Clone)]
pub struct VerifiedPaymentEvent {
    pub gateway: Gateway,
    pub event_id: String,
    pub event_type: String,
    /// Gateway-side payment reference; the primary order lookup key.
    pub payment_ref: String,
    /// Our order id, when the gateway echoes it back.
    pub order_id: Option<String>,
    pub status: ReportedStatus,
    pub amount: Option<f64>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("webhook timestamp outside tolerance")]
    StaleTimestamp,

    #[error("malformed webhook payload: {0}")]
    Malformed(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("webhook secret not configured for {0}")]
    NotConfigured(Gateway),
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::MissingSignature
            | WebhookError::InvalidSignature
            | WebhookError::StaleTimestamp => StatusCode::UNAUTHORIZED,
            WebhookError::Malformed(_) | WebhookError::MissingField(_) => StatusCode::BAD_REQUEST,
            WebhookError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        let status = err.status();
        match &err {
            WebhookError::MissingField(field) => {
                ApiError::new(status, err.to_string()).with_details(json!({ "field": field }))
            }
            WebhookError::Malformed(_) => ApiError::new(status, "Malformed webhook payload"),
            _ => ApiError::new(status, err.to_string()),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

/// Signature verification and field extraction for one gateway.
pub trait WebhookVerifier: Send + Sync {
    fn gateway(&self) -> Gateway;

    /// Verify `body` exactly as received, then parse it.
    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<VerifiedPaymentEvent, WebhookError>;
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub(crate) fn non_empty(value: Option<String>, field: &'static str) -> Result<String, WebhookError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(WebhookError::MissingField(field))
}
