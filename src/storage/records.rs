// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persisted record types.
//!
//! Every record is stored as JSON in its redb table, keyed by id.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::bookings::BookingStatus;

use super::ownership::OwnedResource;

// =============================================================================
// Documents
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Uploaded,
    Processed,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub prediction_id: String,
    /// Random blob path; unlinkable to the user or filename.
    pub storage_path: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_delete_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn is_deleted(&self) -> bool {
        self.status == DocumentStatus::Deleted
    }
}

impl OwnedResource for Document {
    fn owner_user_id(&self) -> &str {
        &self.user_id
    }
}

/// Wrapped per-document key. Exists exactly while its document is live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptionKeyRecord {
    pub id: String,
    pub document_id: String,
    pub wrapped_key: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    Dompetx,
    Polar,
}

impl Gateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gateway::Dompetx => "dompetx",
            Gateway::Polar => "polar",
        }
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Expired,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductType {
    Prediction,
    Booking,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub product_type: ProductType,
    pub product_id: String,
    /// Predictions unlocked when this order is paid.
    pub prediction_ids: Vec<String>,
    /// Bookings advanced when this order is paid or fails.
    pub booking_ids: Vec<String>,
    pub amount_usd_cents: u64,
    pub amount_idr: u64,
    pub exchange_rate: f64,
    pub gateway: Gateway,
    pub payment_ref: Option<String>,
    pub redirect_url: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl OwnedResource for Order {
    fn owner_user_id(&self) -> &str {
        &self.user_id
    }
}

// =============================================================================
// Predictions & bookings
// =============================================================================

/// How long documents may be submitted after a prediction is paid.
pub const UPLOAD_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub id: String,
    pub user_id: String,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub upload_window_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Prediction {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            is_paid: false,
            paid_at: None,
            upload_window_expires_at: None,
            created_at: Utc::now(),
        }
    }

    /// Unlock the prediction and open the document upload window.
    pub fn mark_paid(&mut self, now: DateTime<Utc>) {
        self.is_paid = true;
        self.paid_at = Some(now);
        self.upload_window_expires_at = Some(now + Duration::hours(UPLOAD_WINDOW_HOURS));
    }

    pub fn upload_window_open(&self, now: DateTime<Utc>) -> bool {
        self.is_paid && self.upload_window_expires_at.is_some_and(|expires| expires > now)
    }
}

impl OwnedResource for Prediction {
    fn owner_user_id(&self) -> &str {
        &self.user_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: String,
    pub user_id: String,
    pub order_id: Option<String>,
    pub status: BookingStatus,
    pub product_name: String,
    pub price_usd_cents: u64,
    pub contact_name: String,
    pub contact_email: String,
    pub travel_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn draft(
        id: impl Into<String>,
        user_id: impl Into<String>,
        product_name: impl Into<String>,
        price_usd_cents: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            order_id: None,
            status: BookingStatus::Draft,
            product_name: product_name.into(),
            price_usd_cents,
            contact_name: String::new(),
            contact_email: String::new(),
            travel_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl OwnedResource for Booking {
    fn owner_user_id(&self) -> &str {
        &self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_paid_opens_24h_window() {
        let now = Utc::now();
        let mut prediction = Prediction::new("p1", "u1");
        assert!(!prediction.upload_window_open(now));

        prediction.mark_paid(now);
        assert!(prediction.is_paid);
        assert_eq!(
            prediction.upload_window_expires_at,
            Some(now + Duration::hours(24))
        );
        assert!(prediction.upload_window_open(now + Duration::hours(23)));
        assert!(!prediction.upload_window_open(now + Duration::hours(24)));
    }

    #[test]
    fn statuses_serialize_upper_case() {
        assert_eq!(
            serde_json::to_string(&DocumentStatus::Uploaded).unwrap(),
            "\"UPLOADED\""
        );
        assert_eq!(serde_json::to_string(&OrderStatus::Paid).unwrap(), "\"PAID\"");
        assert_eq!(serde_json::to_string(&Gateway::Polar).unwrap(), "\"polar\"");
    }
}
