// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Webhook Reconciliation
//!
//! The only path that marks money as received. One verified event is applied
//! at most once:
//!
//! 1. KV marker present → already processed (fast path)
//! 2. Order located by gateway payment reference, else by echoed order id
//! 3. Unknown order → acknowledged and logged at error level
//! 4. One write transaction records the event id in the durable ledger and
//!    applies the order, prediction and booking updates together
//! 5. KV marker written after commit
//! 6. Notifications handed to the background dispatcher after commit, only
//!    for a fresh PAID transition; the acknowledgement never waits on them

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::events::{ReportedStatus, VerifiedPaymentEvent};
use crate::error::CoreResult;
use crate::kv::{idempotency_key, KvStore, IDEMPOTENCY_TTL};
use crate::notify::{Dispatcher, Notification};
use crate::storage::{AuditAction, AuditEntry, CoreDb, DbError, Order, OrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The event moved the order out of PENDING.
    Applied,
    /// This event id was handled before.
    AlreadyProcessed,
    /// The order was no longer PENDING; recorded without changes.
    NoChange,
    /// Intermediate or unrecognised status.
    Ignored,
    /// No order matches the event.
    OrderNotFound,
}

/// Acknowledgement body returned to the gateway.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_status: Option<OrderStatus>,
    pub outcome: ReconcileOutcome,
}

impl WebhookAck {
    fn new(event: &VerifiedPaymentEvent, order: Option<&Order>, outcome: ReconcileOutcome) -> Self {
        Self {
            received: true,
            event_id: event.event_id.clone(),
            order_id: order.map(|o| o.id.clone()),
            order_status: order.map(|o| o.status),
            outcome,
        }
    }
}

pub struct Reconciler {
    db: Arc<CoreDb>,
    kv: Arc<dyn KvStore>,
    notifications: Dispatcher,
}

impl Reconciler {
    pub fn new(db: Arc<CoreDb>, kv: Arc<dyn KvStore>, notifications: Dispatcher) -> Self {
        Self {
            db,
            kv,
            notifications,
        }
    }

    pub async fn reconcile(&self, event: VerifiedPaymentEvent) -> CoreResult<WebhookAck> {
        let marker = idempotency_key(event.gateway.as_str(), &event.event_id);

        match self.kv.exists(&marker).await {
            Ok(true) => {
                info!(gateway = %event.gateway, event_id = %event.event_id, "Webhook already processed");
                let order = self.locate_order(&event)?;
                return Ok(WebhookAck::new(&event, order.as_ref(), ReconcileOutcome::AlreadyProcessed));
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "Idempotency marker lookup failed, relying on ledger");
            }
        }

        let Some(order) = self.locate_order(&event)? else {
            if matches!(event.status, ReportedStatus::Other(_)) {
                info!(
                    gateway = %event.gateway,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "Ignoring webhook without a matching order"
                );
                return Ok(WebhookAck::new(&event, None, ReconcileOutcome::Ignored));
            }
            error!(
                gateway = %event.gateway,
                event_id = %event.event_id,
                payment_ref = %event.payment_ref,
                order_id = ?event.order_id,
                "Webhook for unknown order, acknowledging without changes"
            );
            return Ok(WebhookAck::new(&event, None, ReconcileOutcome::OrderNotFound));
        };

        let succeeded = match &event.status {
            ReportedStatus::Paid => true,
            ReportedStatus::Failed | ReportedStatus::Expired => false,
            ReportedStatus::Other(status) => {
                info!(
                    order_id = %order.id,
                    status = %status,
                    event_type = %event.event_type,
                    "Ignoring intermediate payment status"
                );
                return Ok(WebhookAck::new(&event, Some(&order), ReconcileOutcome::Ignored));
            }
        };

        let (outcome, order) = self.apply(&event, &order.id, succeeded)?;

        if let Err(e) = self
            .kv
            .schedule_expiry(&marker, &Utc::now().to_rfc3339(), IDEMPOTENCY_TTL)
            .await
        {
            warn!(event_id = %event.event_id, error = %e, "Failed to write idempotency marker");
        }

        info!(
            gateway = %event.gateway,
            event_id = %event.event_id,
            order_id = %order.id,
            status = order.status.as_str(),
            outcome = ?outcome,
            "Webhook reconciled"
        );

        if outcome == ReconcileOutcome::Applied && order.status == OrderStatus::Paid {
            self.notify_paid(&order);
        }

        Ok(WebhookAck::new(&event, Some(&order), outcome))
    }

    fn locate_order(&self, event: &VerifiedPaymentEvent) -> CoreResult<Option<Order>> {
        if !event.payment_ref.is_empty() {
            if let Some(order) = self.db.order_by_payment_ref(event.gateway, &event.payment_ref)? {
                return Ok(Some(order));
            }
        }
        let Some(order_id) = event.order_id.as_deref() else {
            return Ok(None);
        };
        Ok(self
            .db
            .get_order(order_id)?
            .filter(|order| order.gateway == event.gateway))
    }

    fn apply(
        &self,
        event: &VerifiedPaymentEvent,
        order_id: &str,
        succeeded: bool,
    ) -> CoreResult<(ReconcileOutcome, Order)> {
        let now = Utc::now();

        self.db.write(|tx| -> CoreResult<(ReconcileOutcome, Order)> {
            let mut order = tx
                .get_order(order_id)?
                .ok_or_else(|| DbError::NotFound(format!("order {order_id}")))?;

            if !tx.record_event(event.gateway, &event.event_id, now)? {
                return Ok((ReconcileOutcome::AlreadyProcessed, order));
            }
            if order.status != OrderStatus::Pending {
                return Ok((ReconcileOutcome::NoChange, order));
            }

            if order.payment_ref.is_none() && !event.payment_ref.is_empty() {
                order.payment_ref = Some(event.payment_ref.clone());
                tx.link_payment_ref(order.gateway, &event.payment_ref, &order.id)?;
            }

            order.status = match event.status {
                ReportedStatus::Expired => OrderStatus::Expired,
                _ if succeeded => OrderStatus::Paid,
                _ => OrderStatus::Failed,
            };
            order.updated_at = now;
            if succeeded {
                order.paid_at = Some(event.paid_at.unwrap_or(now));

                for prediction_id in &order.prediction_ids {
                    let mut prediction = tx
                        .get_prediction(prediction_id)?
                        .ok_or_else(|| DbError::NotFound(format!("prediction {prediction_id}")))?;
                    if !prediction.is_paid {
                        prediction.mark_paid(now);
                        tx.put_prediction(&prediction)?;
                    }
                }
            }

            for booking_id in &order.booking_ids {
                let mut booking = tx
                    .get_booking(booking_id)?
                    .ok_or_else(|| DbError::NotFound(format!("booking {booking_id}")))?;
                if let Some(next) = booking.status.after_payment(succeeded) {
                    booking.status = next;
                    booking.updated_at = now;
                    tx.put_booking(&booking)?;
                }
            }

            tx.put_order(&order)?;
            tx.release_pending(&order.product_id, &order.id)?;

            let action = if succeeded {
                AuditAction::PaymentConfirmed
            } else {
                AuditAction::PaymentFailed
            };
            tx.append_audit(
                &AuditEntry::new(action)
                    .with_user(&order.user_id)
                    .with_resource("order", &order.id)
                    .with_purpose("payment reconciliation")
                    .with_details(json!({
                        "gateway": event.gateway,
                        "event_id": event.event_id,
                        "event_type": event.event_type,
                        "payment_ref": event.payment_ref,
                        "status": order.status,
                        "amount": event.amount,
                    })),
            )?;

            Ok((ReconcileOutcome::Applied, order))
        })
    }

    fn notify_paid(&self, order: &Order) {
        self.notifications.dispatch(Notification::PaymentConfirmed {
            user_id: order.user_id.clone(),
            order_id: order.id.clone(),
            amount_usd_cents: order.amount_usd_cents,
        });

        for booking_id in &order.booking_ids {
            self.notifications.dispatch(Notification::BookingPaidAlert {
                booking_id: booking_id.clone(),
                order_id: order.id.clone(),
            });
        }
    }
}
