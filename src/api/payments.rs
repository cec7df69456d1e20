// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    auth::Auth,
    error::{ApiError, CoreError},
    payments::{PaymentCreated, PaymentProduct},
    state::AppState,
    storage::{Gateway, ProductType},
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreatePaymentRequest {
    pub product_type: ProductType,
    pub product_id: String,
    pub gateway: Gateway,
}

#[utoipa::path(
    post,
    path = "/v1/payments",
    request_body = CreatePaymentRequest,
    tag = "Payments",
    responses(
        (status = 201, body = PaymentCreated),
        (status = 404, description = "Product not found"),
        (status = 409, description = "Already paid or a payment is pending"),
        (status = 429, description = "Too many payment attempts"),
        (status = 503, description = "Gateway not configured")
    )
)]
pub async fn create_payment(
    State(state): State<AppState>,
    Auth(caller): Auth,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentCreated>), ApiError> {
    let product_id = request.product_id.trim();
    if product_id.is_empty() {
        return Err(CoreError::validation_field("product_id", "must not be empty").into());
    }

    let created = state
        .payments
        .create_payment(
            &caller,
            PaymentProduct::new(request.product_type, product_id),
            request.gateway,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}
