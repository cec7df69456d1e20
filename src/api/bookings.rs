// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::AdminOnly,
    bookings::BookingStatus,
    error::ApiError,
    state::AppState,
    storage::Booking,
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateBookingStatusRequest {
    pub status: BookingStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BookingResponse {
    pub id: String,
    pub user_id: String,
    pub order_id: Option<String>,
    pub status: BookingStatus,
    pub product_name: String,
    pub updated_at: DateTime<Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        Self {
            id: booking.id,
            user_id: booking.user_id,
            order_id: booking.order_id,
            status: booking.status,
            product_name: booking.product_name,
            updated_at: booking.updated_at,
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/admin/bookings/{booking_id}/status",
    params(("booking_id" = String, Path, description = "Booking identifier")),
    request_body = UpdateBookingStatusRequest,
    tag = "Bookings",
    responses(
        (status = 200, body = BookingResponse),
        (status = 403, description = "Caller is not an admin"),
        (status = 404, description = "Booking not found"),
        (status = 422, description = "Transition not allowed from the current status")
    )
)]
pub async fn update_booking_status(
    State(state): State<AppState>,
    AdminOnly(admin): AdminOnly,
    Path(booking_id): Path<String>,
    Json(request): Json<UpdateBookingStatusRequest>,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking = state
        .bookings
        .transition(&admin, &booking_id, request.status)
        .await?;
    Ok(Json(booking.into()))
}
