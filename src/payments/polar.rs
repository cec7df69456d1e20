// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Polar (gateway B): USD checkout sessions and Standard Webhooks verification.
//!
//! ## Signature scheme
//!
//! ```text
//! signed content = "{webhook-id}.{webhook-timestamp}.{raw body}"
//! signature      = base64(HMAC-SHA256(secret, signed content))
//! header         = "v1,<signature> v1,<signature> ..."
//! ```
//!
//! A `whsec_` prefix marks a base64 secret; any other secret is used as-is.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use hmac::Mac;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::events::{
    header_str, HmacSha256, ReportedStatus, VerifiedPaymentEvent, WebhookError, WebhookVerifier,
};
use super::gateway::{CheckoutRequest, CheckoutSession, GatewayError, PaymentGateway};
use crate::crypto::constant_time_eq;
use crate::storage::Gateway;

pub const DEFAULT_API_BASE_URL: &str = "https://api.polar.sh";

pub const WEBHOOK_ID_HEADER: &str = "webhook-id";
pub const WEBHOOK_TIMESTAMP_HEADER: &str = "webhook-timestamp";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "webhook-signature";

/// Accepted distance between the webhook timestamp and now.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 5 * 60;

const SECRET_PREFIX: &str = "whsec_";

#[derive(Clone)]
pub struct PolarConfig {
    pub api_base_url: String,
    pub access_token: Option<String>,
    pub product_id: Option<String>,
    pub webhook_secret: Option<String>,
}

impl std::fmt::Debug for PolarConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolarConfig")
            .field("api_base_url", &self.api_base_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("product_id", &self.product_id)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// =============================================================================
// Webhooks
// =============================================================================

#[derive(Debug, Deserialize)]
struct PolarWebhook {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

pub struct PolarVerifier {
    secret: Option<Vec<u8>>,
}

impl PolarVerifier {
    /// Fails only when a `whsec_` secret is not valid base64.
    pub fn new(secret: Option<&str>) -> Result<Self, WebhookError> {
        let secret = secret.map(decode_secret).transpose()?;
        Ok(Self { secret })
    }

    /// Verify against an explicit clock.
    pub fn verify_at(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<VerifiedPaymentEvent, WebhookError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or(WebhookError::NotConfigured(Gateway::Polar))?;

        let message_id = header_str(headers, WEBHOOK_ID_HEADER).ok_or(WebhookError::MissingSignature)?;
        let timestamp = header_str(headers, WEBHOOK_TIMESTAMP_HEADER)
            .ok_or(WebhookError::MissingSignature)?;
        let signatures = header_str(headers, WEBHOOK_SIGNATURE_HEADER)
            .ok_or(WebhookError::MissingSignature)?;

        let sent_at: i64 = timestamp.parse().map_err(|_| WebhookError::InvalidSignature)?;
        // Unauthenticated header value: compare without overflow.
        if now.timestamp().abs_diff(sent_at) > TIMESTAMP_TOLERANCE_SECS.unsigned_abs() {
            return Err(WebhookError::StaleTimestamp);
        }

        let expected = signature(secret, message_id, timestamp, body)?;
        let matched = signatures
            .split_whitespace()
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == "v1")
            .any(|(_, candidate)| constant_time_eq(candidate.as_bytes(), expected.as_bytes()));
        if !matched {
            return Err(WebhookError::InvalidSignature);
        }

        let payload: PolarWebhook =
            serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;
        Ok(extract_event(message_id, payload))
    }
}

impl WebhookVerifier for PolarVerifier {
    fn gateway(&self) -> Gateway {
        Gateway::Polar
    }

    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<VerifiedPaymentEvent, WebhookError> {
        self.verify_at(headers, body, Utc::now())
    }
}

fn decode_secret(secret: &str) -> Result<Vec<u8>, WebhookError> {
    match secret.strip_prefix(SECRET_PREFIX) {
        Some(encoded) => Base64::decode_vec(encoded)
            .map_err(|_| WebhookError::Malformed("webhook secret is not valid base64".to_string())),
        None => Ok(secret.as_bytes().to_vec()),
    }
}

/// Base64 HMAC over `{id}.{timestamp}.{body}`.
pub fn signature(
    secret: &[u8],
    message_id: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<String, WebhookError> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(message_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(Base64::encode_string(&mac.finalize().into_bytes()))
}

fn str_at<'a>(data: &'a Value, pointer: &str) -> Option<&'a str> {
    data.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn extract_event(message_id: &str, payload: PolarWebhook) -> VerifiedPaymentEvent {
    let data = &payload.data;
    let order_id = str_at(data, "/metadata/order_id").map(str::to_string);

    let (payment_ref, status) = match payload.event_type.as_str() {
        "order.paid" => (
            str_at(data, "/checkout_id").or_else(|| str_at(data, "/id")),
            ReportedStatus::Paid,
        ),
        "checkout.updated" => {
            let raw = str_at(data, "/status").unwrap_or_default();
            let status = match raw {
                "failed" => ReportedStatus::Failed,
                "expired" => ReportedStatus::Expired,
                other => ReportedStatus::Other(other.to_string()),
            };
            (str_at(data, "/id"), status)
        }
        other => (str_at(data, "/id"), ReportedStatus::Other(other.to_string())),
    };

    let paid_at = matches!(status, ReportedStatus::Paid)
        .then(|| str_at(data, "/created_at"))
        .flatten()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc));
    let amount = data
        .get("total_amount")
        .or_else(|| data.get("amount"))
        .and_then(Value::as_f64);

    VerifiedPaymentEvent {
        gateway: Gateway::Polar,
        event_id: message_id.to_string(),
        event_type: payload.event_type.clone(),
        payment_ref: payment_ref.unwrap_or_default().to_string(),
        order_id,
        status,
        amount,
        paid_at,
    }
}

// =============================================================================
// Checkout
// =============================================================================

pub struct PolarClient {
    api_base_url: String,
    access_token: String,
    product_id: String,
    http: Client,
}

impl PolarClient {
    pub fn new(config: &PolarConfig) -> Result<Self, GatewayError> {
        let access_token = config
            .access_token
            .clone()
            .ok_or_else(|| GatewayError::MissingConfig("POLAR_ACCESS_TOKEN".to_string()))?;
        let product_id = config
            .product_id
            .clone()
            .ok_or_else(|| GatewayError::MissingConfig("POLAR_PRODUCT_ID".to_string()))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| GatewayError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base_url: config.api_base_url.clone(),
            access_token,
            product_id,
            http,
        })
    }
}

#[async_trait]
impl PaymentGateway for PolarClient {
    fn kind(&self) -> Gateway {
        Gateway::Polar
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        let mut prices = serde_json::Map::new();
        prices.insert(
            self.product_id.clone(),
            json!([{
                "amount_type": "fixed",
                "price_amount": request.amount_usd_cents,
                "price_currency": "usd",
            }]),
        );
        let payload = json!({
            "products": [self.product_id],
            "prices": prices,
            "external_customer_id": request.user_id,
            "success_url": request.return_url,
            "metadata": { "order_id": request.order_id },
        });

        let path = "/v1/checkouts/";
        let response = self
            .http
            .post(format!("{}{}", self.api_base_url.trim_end_matches('/'), path))
            .header("Authorization", format!("Bearer {}", self.access_token))
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Request(format!("POST {path} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Request(format!(
                "POST {path} returned {status}: {body}"
            )));
        }

        let response: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("POST {path} invalid JSON: {e}")))?;

        let payment_ref = response
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidResponse("missing checkout id in response".to_string()))?
            .to_string();
        let redirect_url = response
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidResponse("missing checkout url in response".to_string()))?
            .to_string();

        info!(order_id = %request.order_id, checkout_id = %payment_ref, "Polar checkout created");
        Ok(CheckoutSession {
            payment_ref,
            redirect_url,
        })
    }
}
