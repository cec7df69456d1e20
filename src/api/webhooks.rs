// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Gateway callbacks.
//!
//! Bodies are taken as raw bytes: signatures cover the exact payload, so
//! nothing is parsed before verification succeeds. Any 2xx tells the
//! gateway to stop retrying; storage failures surface as 500 so the event is
//! redelivered.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use tracing::warn;

use crate::{
    error::ApiError,
    payments::{WebhookAck, WebhookVerifier},
    state::AppState,
};

async fn intake(
    state: &AppState,
    verifier: &dyn WebhookVerifier,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<WebhookAck>, ApiError> {
    let event = verifier.verify(headers, body).map_err(|e| {
        warn!(gateway = %verifier.gateway(), error = %e, "Rejected webhook");
        e
    })?;
    let ack = state.reconciler.reconcile(event).await?;
    Ok(Json(ack))
}

#[utoipa::path(
    post,
    path = "/v1/webhooks/dompetx",
    request_body(content = String, content_type = "application/json"),
    params(("X-Dompetx-Signature" = String, Header, description = "Hex HMAC-SHA256 of the raw body")),
    tag = "Webhooks",
    responses(
        (status = 200, body = WebhookAck),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Signature verification failed"),
        (status = 503, description = "Webhook secret not configured")
    )
)]
pub async fn dompetx_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let verifier = state.dompetx_webhooks.clone();
    intake(&state, verifier.as_ref(), &headers, &body).await
}

#[utoipa::path(
    post,
    path = "/v1/webhooks/polar",
    request_body(content = String, content_type = "application/json"),
    params(
        ("webhook-id" = String, Header, description = "Message identifier"),
        ("webhook-timestamp" = String, Header, description = "Unix seconds when the message was sent"),
        ("webhook-signature" = String, Header, description = "Space-separated `v1,<base64>` signatures")
    ),
    tag = "Webhooks",
    responses(
        (status = 200, body = WebhookAck),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Signature verification failed"),
        (status = 503, description = "Webhook secret not configured")
    )
)]
pub async fn polar_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let verifier = state.polar_webhooks.clone();
    intake(&state, verifier.as_ref(), &headers, &body).await
}
