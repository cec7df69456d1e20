// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Payment Reconciliation Engine
//!
//! | Gateway | Currency | Webhook signature |
//! |---------|----------|-------------------|
//! | DompetX | IDR | hex HMAC-SHA256 of the body in `X-Dompetx-Signature` |
//! | Polar | USD | Standard Webhooks (`webhook-id`, `webhook-timestamp`, `webhook-signature`) |
//!
//! Both verifiers produce a [`VerifiedPaymentEvent`] consumed by one shared
//! [`Reconciler`]. Orders only leave PENDING through that path.

pub mod checkout;
pub mod dompetx;
pub mod events;
pub mod gateway;
pub mod polar;
pub mod rates;
pub mod reconcile;

pub use checkout::{PaymentCreated, PaymentProduct, PaymentService, PaymentSettings};
pub use dompetx::{DompetxClient, DompetxConfig, DompetxVerifier};
pub use events::{ReportedStatus, VerifiedPaymentEvent, WebhookError, WebhookVerifier};
pub use gateway::{CheckoutRequest, CheckoutSession, GatewayError, GatewayRegistry, PaymentGateway};
pub use polar::{PolarClient, PolarConfig, PolarVerifier};
pub use rates::ExchangeRates;
pub use reconcile::{ReconcileOutcome, Reconciler, WebhookAck};
