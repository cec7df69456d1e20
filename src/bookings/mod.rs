// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Booking Status State Machine
//!
//! ```text
//! DRAFT ──► PENDING_PAYMENT ──► PAID ──► PROCESSING
//!               │                 │
//!               ▼                 └─(admin)─► DELIVERED ─(admin)─► COMPLETED
//!           CANCELLED
//! ```
//!
//! Payment edges are applied by reconciliation only. Admins may perform
//! exactly two edges: `PAID → DELIVERED` and `DELIVERED → COMPLETED`.
//! No edge moves a booking backward.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::auth::Caller;
use crate::error::{Conflict, CoreError, CoreResult};
use crate::notify::{Dispatcher, Notification};
use crate::storage::{
    AuditAction, AuditEntry, Booking, CoreDb, DbError, OrderStatus,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Draft,
    PendingPayment,
    Paid,
    Processing,
    Delivered,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Draft => "DRAFT",
            BookingStatus::PendingPayment => "PENDING_PAYMENT",
            BookingStatus::Paid => "PAID",
            BookingStatus::Processing => "PROCESSING",
            BookingStatus::Delivered => "DELIVERED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    /// Targets an admin action may move a booking to from `self`.
    pub fn admin_targets(&self) -> &'static [BookingStatus] {
        match self {
            BookingStatus::Paid => &[BookingStatus::Delivered],
            BookingStatus::Delivered => &[BookingStatus::Completed],
            _ => &[],
        }
    }

    /// Target of a payment outcome, if the booking is still awaiting one.
    pub fn after_payment(&self, succeeded: bool) -> Option<BookingStatus> {
        match (self, succeeded) {
            (BookingStatus::PendingPayment, true) => Some(BookingStatus::Paid),
            (BookingStatus::PendingPayment, false) => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate an admin-triggered transition.
pub fn check_admin_transition(from: BookingStatus, to: BookingStatus) -> Result<(), Conflict> {
    let allowed = from.admin_targets();
    if allowed.contains(&to) {
        return Ok(());
    }
    Err(Conflict::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
        allowed: allowed.iter().map(ToString::to_string).collect(),
    })
}

/// Admin fulfilment operations on bookings.
pub struct BookingService {
    db: Arc<CoreDb>,
    notifications: Dispatcher,
}

impl BookingService {
    pub fn new(db: Arc<CoreDb>, notifications: Dispatcher) -> Self {
        Self { db, notifications }
    }

    /// Move a booking along an admin edge.
    ///
    /// The booking update, the order sync on completion and the audit entry
    /// commit together. Reaching DELIVERED then notifies the user in the background.
    pub async fn transition(
        &self,
        admin: &Caller,
        booking_id: &str,
        target: BookingStatus,
    ) -> CoreResult<Booking> {
        if !admin.is_admin() {
            return Err(CoreError::Forbidden);
        }

        let now = Utc::now();
        let booking = self.db.write(|tx| -> CoreResult<Booking> {
            let mut booking = tx.get_booking(booking_id)?.ok_or(CoreError::NotFound)?;
            let from = booking.status;
            check_admin_transition(from, target)?;

            booking.status = target;
            booking.updated_at = now;
            tx.put_booking(&booking)?;

            if target == BookingStatus::Completed {
                if let Some(order_id) = booking.order_id.as_deref() {
                    let mut order = tx
                        .get_order(order_id)?
                        .ok_or_else(|| DbError::NotFound(format!("order {order_id}")))?;
                    if order.status == OrderStatus::Paid {
                        order.status = OrderStatus::Completed;
                        order.updated_at = now;
                        tx.put_order(&order)?;
                    }
                }
            }

            tx.append_audit(
                &AuditEntry::new(AuditAction::BookingStatusChanged)
                    .with_user(&admin.user_id)
                    .with_resource("booking", &booking.id)
                    .with_ip(admin.ip())
                    .with_details(json!({ "from": from, "to": target })),
            )?;
            Ok(booking)
        })?;

        info!(
            booking_id = %booking.id,
            status = %booking.status,
            admin = %admin.user_id,
            "Booking status changed"
        );

        if target == BookingStatus::Delivered {
            self.notify_delivered(admin, &booking);
        }

        Ok(booking)
    }

    fn notify_delivered(&self, admin: &Caller, booking: &Booking) {
        let db = self.db.clone();
        let booking_id = booking.id.clone();
        let entry = AuditEntry::new(AuditAction::NotificationDelivery)
            .with_user(&admin.user_id)
            .with_resource("booking", &booking.id)
            .with_ip(admin.ip())
            .with_purpose("booking delivery notification");

        self.notifications.dispatch_then(
            Notification::BookingDelivered {
                user_id: booking.user_id.clone(),
                booking_id: booking.id.clone(),
                contact_email: booking.contact_email.clone(),
            },
            move |delivered| {
                let entry = entry.with_details(json!({ "delivered": delivered }));
                if let Err(e) = db.write(|tx| tx.append_audit(&entry)) {
                    warn!(booking_id = %booking_id, error = %e, "Failed to audit delivery notification");
                }
            },
        );
    }
}
