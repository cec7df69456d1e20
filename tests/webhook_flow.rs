// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! End-to-end payment flow through the HTTP router: checkout creation,
//! signed gateway callbacks, redelivery and the resulting unlocks.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;

use visa_docs_core::{
    api::router,
    auth::{sign_session_token, Role},
    config::AppConfig,
    kv::MemoryKv,
    notify::RecordingNotifier,
    payments::{
        polar, CheckoutRequest, CheckoutSession, GatewayError, GatewayRegistry, PaymentGateway,
    },
    state::{AppState, Backends},
    storage::{AuditAction, CoreDb, Gateway, MemoryBlobStore, OrderStatus, Prediction},
};

const MASTER_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
const SESSION_SECRET: &str = "flow-session-secret";
const DOMPETX_SECRET: &str = "flow-dompetx-secret";
const POLAR_SECRET: &str = "flow-polar-secret";

/// Hosted checkout stand-in: the payment reference is derived from the order.
struct StubGateway(Gateway);

#[async_trait]
impl PaymentGateway for StubGateway {
    fn kind(&self) -> Gateway {
        self.0
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        Ok(CheckoutSession {
            payment_ref: format!("{}_{}", self.0, request.order_id),
            redirect_url: format!("https://checkout.test/{}", request.order_id),
        })
    }
}

struct Flow {
    state: AppState,
    notifier: Arc<RecordingNotifier>,
    _dir: tempfile::TempDir,
}

impl Flow {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let vars = [
            ("MASTER_ENCRYPTION_KEY", MASTER_KEY),
            ("SESSION_JWT_SECRET", SESSION_SECRET),
            ("DOMPETX_WEBHOOK_SECRET", DOMPETX_SECRET),
            ("POLAR_WEBHOOK_SECRET", POLAR_SECRET),
        ];
        let config = AppConfig::from_lookup(|name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        })
        .unwrap();

        let notifier = Arc::new(RecordingNotifier::new());
        let backends = Backends {
            db: Arc::new(CoreDb::open(&dir.path().join("core.redb")).unwrap()),
            blobs: Arc::new(MemoryBlobStore::new()),
            kv: Arc::new(MemoryKv::default()),
            notifier: notifier.clone(),
        };
        let gateways = GatewayRegistry::new()
            .with(Arc::new(StubGateway(Gateway::Dompetx)))
            .with(Arc::new(StubGateway(Gateway::Polar)));
        let state = AppState::new(&config, backends, gateways).unwrap();

        let prediction = Prediction::new("pred_1", "user_1");
        state.db.write(|tx| tx.put_prediction(&prediction)).unwrap();

        Self {
            state,
            notifier,
            _dir: dir,
        }
    }

    fn app(&self) -> Router {
        router(self.state.clone())
    }

    fn bearer(&self) -> String {
        let token = sign_session_token(SESSION_SECRET.as_bytes(), "user_1", Role::User, 300).unwrap();
        format!("Bearer {token}")
    }

    async fn create_payment(&self, gateway: &str) -> Response {
        let body = json!({
            "product_type": "PREDICTION",
            "product_id": "pred_1",
            "gateway": gateway,
        });
        self.app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/payments")
                    .header(header::AUTHORIZATION, self.bearer())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn dompetx_webhook(&self, body: &[u8], signature: &str) -> Response {
        self.app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/webhooks/dompetx")
                    .header("x-dompetx-signature", signature)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn polar_webhook(&self, message_id: &str, body: &[u8]) -> Response {
        let timestamp = Utc::now().timestamp().to_string();
        let signature =
            polar::signature(POLAR_SECRET.as_bytes(), message_id, &timestamp, body).unwrap();
        self.app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/webhooks/polar")
                    .header("webhook-id", message_id)
                    .header("webhook-timestamp", timestamp)
                    .header("webhook-signature", format!("v1,{signature}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn delivered(&self) -> usize {
        self.state.notifications.drain().await;
        self.notifier.count()
    }

    fn payment_audits(&self, action: AuditAction) -> usize {
        self.state
            .db
            .audit_entries()
            .unwrap()
            .iter()
            .filter(|entry| entry.action == action)
            .count()
    }
}

fn dompetx_signature(body: &[u8]) -> String {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(DOMPETX_SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn paid_webhook_unlocks_exactly_once() {
    let flow = Flow::new();

    let created = flow.create_payment("dompetx").await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = json_body(created).await;
    let order_id = created["order_id"].as_str().unwrap().to_string();
    let payment_ref = created["payment_ref"].as_str().unwrap().to_string();

    let event = serde_json::to_vec(&json!({
        "event_id": "evt_paid_1",
        "payment_ref": payment_ref,
        "status": "PAID",
        "external_ref": order_id,
    }))
    .unwrap();
    let signature = dompetx_signature(&event);

    let first = flow.dompetx_webhook(&event, &signature).await;
    assert_eq!(first.status(), StatusCode::OK);
    let first = json_body(first).await;
    assert_eq!(first["outcome"], "applied");
    assert_eq!(first["order_status"], "PAID");

    let prediction = flow.state.db.get_prediction("pred_1").unwrap().unwrap();
    assert!(prediction.is_paid);
    assert!(prediction.upload_window_open(Utc::now()));
    assert_eq!(flow.delivered().await, 1);

    // Redelivery of the same event is acknowledged without side effects.
    let second = flow.dompetx_webhook(&event, &signature).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(json_body(second).await["outcome"], "already_processed");
    assert_eq!(flow.delivered().await, 1);
    assert_eq!(flow.payment_audits(AuditAction::PaymentConfirmed), 1);

    // The unlocked prediction now accepts documents.
    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
    let upload = flow
        .app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/predictions/pred_1/documents")
                .header(header::AUTHORIZATION, flow.bearer())
                .header(header::CONTENT_TYPE, "image/png")
                .body(Body::from(png.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(upload.status(), StatusCode::CREATED);

    // A second checkout for a paid prediction is refused.
    assert_eq!(flow.create_payment("dompetx").await.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn tampered_webhook_is_rejected_without_side_effects() {
    let flow = Flow::new();
    let created = json_body(flow.create_payment("dompetx").await).await;
    let order_id = created["order_id"].as_str().unwrap().to_string();
    let payment_ref = created["payment_ref"].as_str().unwrap().to_string();

    let genuine = serde_json::to_vec(&json!({
        "event_id": "evt_1",
        "payment_ref": payment_ref,
        "status": "FAILED",
    }))
    .unwrap();
    let signature = dompetx_signature(&genuine);
    let tampered = serde_json::to_vec(&json!({
        "event_id": "evt_1",
        "payment_ref": payment_ref,
        "status": "PAID",
    }))
    .unwrap();

    let response = flow.dompetx_webhook(&tampered, &signature).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let order = flow.state.db.get_order(&order_id).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(!flow.state.db.get_prediction("pred_1").unwrap().unwrap().is_paid);
    assert_eq!(flow.delivered().await, 0);
}

#[tokio::test]
async fn expired_checkout_frees_the_product_for_a_new_payment() {
    let flow = Flow::new();

    let created = json_body(flow.create_payment("polar").await).await;
    let order_id = created["order_id"].as_str().unwrap().to_string();
    let payment_ref = created["payment_ref"].as_str().unwrap().to_string();

    // While the first order is pending, a second one is refused.
    assert_eq!(flow.create_payment("polar").await.status(), StatusCode::CONFLICT);

    let event = serde_json::to_vec(&json!({
        "type": "checkout.updated",
        "data": { "id": payment_ref, "status": "expired" },
    }))
    .unwrap();
    let response = flow.polar_webhook("msg_expired_1", &event).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["outcome"], "applied");

    let order = flow.state.db.get_order(&order_id).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Expired);
    assert_eq!(flow.payment_audits(AuditAction::PaymentFailed), 1);
    assert_eq!(flow.delivered().await, 0);

    assert_eq!(flow.create_payment("polar").await.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn polar_signature_with_unknown_secret_is_rejected() {
    let flow = Flow::new();
    let body = br#"{"type":"order.paid","data":{"id":"x"}}"#;
    let timestamp = Utc::now().timestamp().to_string();
    let foreign = polar::signature(b"someone-else", "msg_1", &timestamp, body).unwrap();

    let response = flow
        .app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/webhooks/polar")
                .header("webhook-id", "msg_1")
                .header("webhook-timestamp", timestamp)
                .header("webhook-signature", format!("v1,{foreign}"))
                .body(Body::from(body.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
