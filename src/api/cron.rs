// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};
use chrono::Utc;

use crate::{auth::CronAuth, documents::SweepReport, error::ApiError, state::AppState};

/// Erase documents whose retention has ended, one batch per call.
#[utoipa::path(
    post,
    path = "/v1/cron/document-sweep",
    tag = "Cron",
    responses(
        (status = 200, body = SweepReport),
        (status = 401, description = "Missing or wrong cron secret")
    )
)]
pub async fn document_sweep(
    State(state): State<AppState>,
    _auth: CronAuth,
) -> Result<Json<SweepReport>, ApiError> {
    let report = state
        .documents
        .sweep(Utc::now(), state.sweep_batch_size)
        .await?;
    Ok(Json(report))
}
