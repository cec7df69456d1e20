// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    bookings::BookingStatus,
    documents::{DeleteOutcome, DocumentAnalysis, SweepReport},
    payments::{PaymentCreated, ReconcileOutcome, WebhookAck},
    state::AppState,
    storage::{AuditEntry, DocumentStatus, Gateway, OrderStatus, ProductType},
};

pub mod bookings;
pub mod cron;
pub mod documents;
pub mod health;
pub mod payments;
pub mod webhooks;

/// Headroom above the document size bound so oversized uploads reach
/// validation instead of being cut off by the extractor.
const UPLOAD_BODY_SLACK: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let upload_limit = state.documents.policy().max_bytes + UPLOAD_BODY_SLACK;

    let v1_routes = Router::new()
        .route(
            "/predictions/{prediction_id}/consent",
            post(documents::record_consent),
        )
        .route(
            "/predictions/{prediction_id}/documents",
            post(documents::upload_document)
                .delete(documents::delete_prediction_documents)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/documents/{document_id}",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route(
            "/documents/{document_id}/process",
            post(documents::process_document),
        )
        .route("/payments", post(payments::create_payment))
        .route("/webhooks/dompetx", post(webhooks::dompetx_webhook))
        .route("/webhooks/polar", post(webhooks::polar_webhook))
        .route(
            "/admin/bookings/{booking_id}/status",
            post(bookings::update_booking_status),
        )
        .route("/cron/document-sweep", post(cron::document_sweep))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .with_state(state);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        documents::record_consent,
        documents::upload_document,
        documents::delete_prediction_documents,
        documents::get_document,
        documents::process_document,
        documents::delete_document,
        payments::create_payment,
        webhooks::dompetx_webhook,
        webhooks::polar_webhook,
        bookings::update_booking_status,
        cron::document_sweep,
        health::health
    ),
    components(
        schemas(
            documents::ConsentResponse,
            documents::DocumentResponse,
            documents::DocumentStatusResponse,
            documents::ProcessResponse,
            documents::DeleteResponse,
            documents::BulkDeleteResponse,
            payments::CreatePaymentRequest,
            bookings::UpdateBookingStatusRequest,
            bookings::BookingResponse,
            health::HealthResponse,
            health::HealthChecks,
            AuditEntry,
            BookingStatus,
            DeleteOutcome,
            DocumentAnalysis,
            DocumentStatus,
            Gateway,
            OrderStatus,
            PaymentCreated,
            ProductType,
            ReconcileOutcome,
            SweepReport,
            WebhookAck
        )
    ),
    tags(
        (name = "Documents", description = "Document upload, processing and erasure"),
        (name = "Payments", description = "Checkout creation"),
        (name = "Webhooks", description = "Payment gateway callbacks"),
        (name = "Bookings", description = "Booking fulfilment (admin)"),
        (name = "Cron", description = "Scheduled jobs"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;


#[cfg(test)]
mod tests {
    use super::test_support::test_app;
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let app = router(test_app().state);
        let _ = app.into_make_service();
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let app = router(test_app().state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api-doc/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn session_routes_require_a_token() {
        let app = router(test_app().state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/documents/doc_1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("x-request-id"));
    }
}
