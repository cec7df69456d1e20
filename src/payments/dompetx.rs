// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! DompetX (gateway A): IDR checkout creation and webhook verification.
//!
//! Webhooks carry a hex HMAC-SHA256 of the raw body in `X-Dompetx-Signature`.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use hmac::Mac;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::events::{
    header_str, non_empty, HmacSha256, ReportedStatus, VerifiedPaymentEvent, WebhookError,
    WebhookVerifier,
};
use super::gateway::{CheckoutRequest, CheckoutSession, GatewayError, PaymentGateway};
use crate::storage::Gateway;

pub const SIGNATURE_HEADER: &str = "x-dompetx-signature";
pub const DEFAULT_API_BASE_URL: &str = "https://api.dompetx.com";

#[derive(Clone)]
pub struct DompetxConfig {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub webhook_secret: Option<String>,
}

impl std::fmt::Debug for DompetxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DompetxConfig")
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// =============================================================================
// Webhooks
// =============================================================================

#[derive(Debug, Deserialize)]
struct DompetxWebhook {
    event_id: Option<String>,
    event_type: Option<String>,
    payment_ref: Option<String>,
    external_ref: Option<String>,
    amount: Option<f64>,
    status: Option<String>,
    paid_at: Option<DateTime<Utc>>,
}

pub struct DompetxVerifier {
    secret: Option<Vec<u8>>,
}

impl DompetxVerifier {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret.map(|s| s.as_bytes().to_vec()),
        }
    }
}

impl WebhookVerifier for DompetxVerifier {
    fn gateway(&self) -> Gateway {
        Gateway::Dompetx
    }

    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<VerifiedPaymentEvent, WebhookError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or(WebhookError::NotConfigured(Gateway::Dompetx))?;
        let provided = header_str(headers, SIGNATURE_HEADER).ok_or(WebhookError::MissingSignature)?;
        let provided = hex::decode(provided).map_err(|_| WebhookError::InvalidSignature)?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
            .map_err(|_| WebhookError::InvalidSignature)?;
        mac.update(body);
        mac.verify_slice(&provided)
            .map_err(|_| WebhookError::InvalidSignature)?;

        let payload: DompetxWebhook =
            serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;

        let event_id = non_empty(payload.event_id, "event_id")?;
        let payment_ref = non_empty(payload.payment_ref, "payment_ref")?;
        let status = non_empty(payload.status, "status")?;

        Ok(VerifiedPaymentEvent {
            gateway: Gateway::Dompetx,
            event_id,
            event_type: payload.event_type.unwrap_or_else(|| "payment.updated".to_string()),
            payment_ref,
            order_id: payload.external_ref.filter(|r| !r.trim().is_empty()),
            status: ReportedStatus::parse(&status),
            amount: payload.amount,
            paid_at: payload.paid_at,
        })
    }
}

// =============================================================================
// Checkout
// =============================================================================

pub struct DompetxClient {
    api_base_url: String,
    api_key: String,
    http: Client,
}

impl DompetxClient {
    pub fn new(config: &DompetxConfig) -> Result<Self, GatewayError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| GatewayError::MissingConfig("DOMPETX_API_KEY".to_string()))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| GatewayError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base_url: config.api_base_url.clone(),
            api_key,
            http,
        })
    }
}

#[async_trait]
impl PaymentGateway for DompetxClient {
    fn kind(&self) -> Gateway {
        Gateway::Dompetx
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        let payload = json!({
            "external_ref": request.order_id,
            "amount": request.amount_idr,
            "currency": "IDR",
            "description": request.description,
            "customer": { "reference": request.user_id },
            "success_redirect_url": request.return_url,
            "failure_redirect_url": request.return_url,
        });

        let path = "/v1/payments";
        let response = self
            .http
            .post(format!("{}{}", self.api_base_url.trim_end_matches('/'), path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Idempotency-Key", &request.order_id)
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

        let session = parse_checkout_response(&response)?;
        info!(
            order_id = %request.order_id,
            payment_ref = %session.payment_ref,
            "DompetX checkout created"
        );
        Ok(session)
    }
}

fn parse_checkout_response(response: &Value) -> Result<CheckoutSession, GatewayError> {
    let payment_ref = response
        .get("id")
        .or_else(|| response.get("payment_ref"))
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidResponse("missing payment id in response".to_string()))?
        .to_string();

    let redirect_url = response
        .get("checkout_url")
        .and_then(Value::as_str)
        .or_else(|| response.pointer("/actions/redirect_url").and_then(Value::as_str))
        .ok_or_else(|| GatewayError::InvalidResponse("missing checkout url in response".to_string()))?
        .to_string();

    Ok(CheckoutSession {
        payment_ref,
        redirect_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "whk_dompetx_test";

    fn sign(secret: &[u8], body: &[u8]) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed(body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&sign(SECRET.as_bytes(), body)).unwrap(),
        );
        headers
    }

    fn verifier() -> DompetxVerifier {
        DompetxVerifier::new(Some(SECRET))
    }

    const PAID: &[u8] = br#"{"event_id":"evt_1","event_type":"payment.paid","payment_ref":"ref_1","external_ref":"o1","amount":159840,"status":"PAID","paid_at":"2026-03-01T10:00:00Z"}"#;

    #[test]
    fn verifies_and_extracts_fields() {
        let event = verifier().verify(&signed(PAID), PAID).unwrap();
        assert_eq!(event.gateway, Gateway::Dompetx);
        assert_eq!(event.event_id, "evt_1");
        assert_eq!(event.payment_ref, "ref_1");
        assert_eq!(event.order_id.as_deref(), Some("o1"));
        assert_eq!(event.status, ReportedStatus::Paid);
        assert_eq!(event.amount, Some(159_840.0));
        assert!(event.paid_at.is_some());
    }

    #[test]
    fn any_changed_byte_fails_verification() {
        let headers = signed(PAID);
        for i in 0..PAID.len() {
            let mut tampered = PAID.to_vec();
            tampered[i] ^= 0x01;
            assert!(matches!(
                verifier().verify(&headers, &tampered),
                Err(WebhookError::InvalidSignature)
            ));
        }
    }

    #[test]
    fn missing_or_garbled_signature_is_rejected() {
        assert!(matches!(
            verifier().verify(&HeaderMap::new(), PAID),
            Err(WebhookError::MissingSignature)
        ));

        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("not-hex"));
        assert!(matches!(
            verifier().verify(&headers, PAID),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn signature_is_checked_before_parsing() {
        let garbage = b"{not json";
        assert!(matches!(
            verifier().verify(&HeaderMap::new(), garbage),
            Err(WebhookError::MissingSignature)
        ));
        assert!(matches!(
            verifier().verify(&signed(garbage), garbage),
            Err(WebhookError::Malformed(_))
        ));
    }

    #[test]
    fn required_fields_are_enforced() {
        let body = br#"{"event_id":"evt_2","status":"PAID"}"#;
        assert!(matches!(
            verifier().verify(&signed(body), body),
            Err(WebhookError::MissingField("payment_ref"))
        ));

        let body = br#"{"event_id":"  ","payment_ref":"ref_1","status":"PAID"}"#;
        assert!(matches!(
            verifier().verify(&signed(body), body),
            Err(WebhookError::MissingField("event_id"))
        ));
    }

    #[test]
    fn unconfigured_secret_rejects() {
        let verifier = DompetxVerifier::new(None);
        assert!(matches!(
            verifier.verify(&signed(PAID), PAID),
            Err(WebhookError::NotConfigured(Gateway::Dompetx))
        ));
    }

    #[test]
    fn checkout_response_parsing() {
        let session = parse_checkout_response(&json!({
            "id": "pay_123",
            "checkout_url": "https://checkout.dompetx.com/pay_123"
        }))
        .unwrap();
        assert_eq!(session.payment_ref, "pay_123");

        let err = parse_checkout_response(&json!({ "id": "pay_123" })).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
    }
}
