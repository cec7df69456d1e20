// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payment creation.
//!
//! The order is created PENDING inside one transaction that also checks
//! ownership, the already-paid state and the one-pending-order-per-product
//! rule. The gateway is called only after that transaction commits.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::gateway::{CheckoutRequest, GatewayRegistry};
use super::rates::{cents_to_idr, ExchangeRates};
use crate::auth::Caller;
use crate::bookings::BookingStatus;
use crate::error::{Conflict, CoreError, CoreResult};
use crate::kv::{KvStore, RateDecision, RateLimit, RateLimiter};
use crate::storage::{CoreDb, Gateway, Order, OrderStatus, OwnershipCheck, ProductType};

/// What a payment unlocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentProduct {
    Prediction(String),
    Booking(String),
}

impl PaymentProduct {
    pub fn new(product_type: ProductType, product_id: impl Into<String>) -> Self {
        match product_type {
            ProductType::Prediction => PaymentProduct::Prediction(product_id.into()),
            ProductType::Booking => PaymentProduct::Booking(product_id.into()),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            PaymentProduct::Prediction(id) | PaymentProduct::Booking(id) => id,
        }
    }

    pub fn product_type(&self) -> ProductType {
        match self {
            PaymentProduct::Prediction(_) => ProductType::Prediction,
            PaymentProduct::Booking(_) => ProductType::Booking,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentCreated {
    pub order_id: String,
    pub gateway: Gateway,
    pub payment_ref: String,
    pub redirect_url: String,
    pub amount_usd_cents: u64,
    pub amount_idr: u64,
    pub exchange_rate: f64,
}

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub prediction_price_usd_cents: u64,
    /// Root of the frontend; the gateway returns the user below it.
    pub public_base_url: String,
}

pub struct PaymentService {
    db: Arc<CoreDb>,
    gateways: GatewayRegistry,
    rates: Arc<ExchangeRates>,
    limiter: RateLimiter,
    settings: PaymentSettings,
}

impl PaymentService {
    pub fn new(
        db: Arc<CoreDb>,
        kv: Arc<dyn KvStore>,
        gateways: GatewayRegistry,
        rates: Arc<ExchangeRates>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            db,
            gateways,
            rates,
            limiter: RateLimiter::new(kv),
            settings,
        }
    }

    pub async fn create_payment(
        &self,
        caller: &Caller,
        product: PaymentProduct,
        gateway: Gateway,
    ) -> CoreResult<PaymentCreated> {
        if let RateDecision::Limited { retry_after } =
            self.limiter.check(RateLimit::PAYMENT_CREATE, &caller.user_id).await
        {
            return Err(CoreError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        let client = self.gateways.get(gateway)?;
        let rate = self.rates.usd_to_idr().await;

        let order = self.open_order(caller, &product, gateway, rate)?;

        let description = match &product {
            PaymentProduct::Prediction(_) => "Visa prediction unlock".to_string(),
            PaymentProduct::Booking(_) => "Travel document booking".to_string(),
        };
        let request = CheckoutRequest {
            order_id: order.id.clone(),
            user_id: order.user_id.clone(),
            description,
            amount_usd_cents: order.amount_usd_cents,
            amount_idr: order.amount_idr,
            return_url: format!(
                "{}/payments/{}",
                self.settings.public_base_url.trim_end_matches('/'),
                order.id
            ),
        };

        let session = match client.create_checkout(&request).await {
            Ok(session) => session,
            Err(e) => {
                error!(order_id = %order.id, gateway = %gateway, error = %e, "Checkout creation failed");
                self.fail_order(&order.id);
                return Err(CoreError::Upstream(e.to_string()));
            }
        };

        self.db.write(|tx| -> CoreResult<()> {
            let mut current = tx.get_order(&order.id)?.ok_or(CoreError::NotFound)?;
            current.payment_ref = Some(session.payment_ref.clone());
            current.redirect_url = Some(session.redirect_url.clone());
            current.updated_at = Utc::now();
            tx.put_order(&current)?;
            tx.link_payment_ref(gateway, &session.payment_ref, &current.id)?;
            Ok(())
        })?;

        info!(
            order_id = %order.id,
            gateway = %gateway,
            payment_ref = %session.payment_ref,
            amount_usd_cents = order.amount_usd_cents,
            "Payment created"
        );

        Ok(PaymentCreated {
            order_id: order.id,
            gateway,
            payment_ref: session.payment_ref,
            redirect_url: session.redirect_url,
            amount_usd_cents: order.amount_usd_cents,
            amount_idr: order.amount_idr,
            exchange_rate: rate,
        })
    }

    fn open_order(
        &self,
        caller: &Caller,
        product: &PaymentProduct,
        gateway: Gateway,
        rate: f64,
    ) -> CoreResult<Order> {
        let now = Utc::now();

        self.db.write(|tx| -> CoreResult<Order> {
            let (amount_usd_cents, prediction_ids, booking_ids) = match product {
                PaymentProduct::Prediction(id) => {
                    let prediction = tx.get_prediction(id)?.owned_by(&caller.user_id)?;
                    if prediction.is_paid {
                        return Err(Conflict::AlreadyPaid.into());
                    }
                    (self.settings.prediction_price_usd_cents, vec![prediction.id], vec![])
                }
                PaymentProduct::Booking(id) => {
                    let booking = tx.get_booking(id)?.owned_by(&caller.user_id)?;
                    match booking.status {
                        BookingStatus::Draft | BookingStatus::PendingPayment => {}
                        BookingStatus::Cancelled => {
                            return Err(Conflict::InvalidTransition {
                                from: booking.status.to_string(),
                                to: BookingStatus::PendingPayment.to_string(),
                                allowed: vec![],
                            }
                            .into())
                        }
                        _ => return Err(Conflict::AlreadyPaid.into()),
                    }
                    (booking.price_usd_cents, vec![], vec![booking.id])
                }
            };

            if let Some(order_id) = tx.pending_order_for(product.id())? {
                return Err(Conflict::PaymentAlreadyPending { order_id }.into());
            }

            let order = Order {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: caller.user_id.clone(),
                product_type: product.product_type(),
                product_id: product.id().to_string(),
                prediction_ids,
                booking_ids,
                amount_usd_cents,
                amount_idr: cents_to_idr(amount_usd_cents, rate),
                exchange_rate: rate,
                gateway,
                payment_ref: None,
                redirect_url: None,
                status: OrderStatus::Pending,
                created_at: now,
                updated_at: now,
                paid_at: None,
            };
            tx.put_order(&order)?;
            tx.hold_pending(&order.product_id, &order.id)?;

            for booking_id in &order.booking_ids {
                let mut booking = tx.get_booking(booking_id)?.ok_or(CoreError::NotFound)?;
                booking.status = BookingStatus::PendingPayment;
                booking.order_id = Some(order.id.clone());
                booking.updated_at = now;
                tx.put_booking(&booking)?;
            }

            Ok(order)
        })
    }

    /// Mark an order whose checkout could not be created as FAILED.
    ///
    /// Bookings stay PENDING_PAYMENT so the user can retry.
    fn fail_order(&self, order_id: &str) {
        let result = self.db.write(|tx| -> CoreResult<()> {
            let Some(mut order) = tx.get_order(order_id)? else {
                return Ok(());
            };
            if order.status != OrderStatus::Pending {
                return Ok(());
            }
            order.status = OrderStatus::Failed;
            order.updated_at = Utc::now();
            tx.put_order(&order)?;
            tx.release_pending(&order.product_id, &order.id)?;
            Ok(())
        });
        if let Err(e) = result {
            warn!(order_id = %order_id, error = %e, "Failed to release order after checkout failure");
        }
    }
}
