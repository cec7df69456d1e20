// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Outbound checkout creation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CoreError, CoreResult};
use crate::storage::Gateway;

/// What the gateway needs to open a hosted checkout for one order.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub order_id: String,
    pub user_id: String,
    pub description: String,
    pub amount_usd_cents: u64,
    pub amount_idr: u64,
    /// Where the gateway sends the user after paying.
    pub return_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    /// Gateway-side reference echoed back in webhooks.
    pub payment_ref: String,
    pub redirect_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway configuration missing: {0}")]
    MissingConfig(String),

    #[error("gateway request failed: {0}")]
    Request(String),

    #[error("gateway response was invalid: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> Gateway;

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession, GatewayError>;
}

/// The configured outbound clients, one slot per gateway.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    dompetx: Option<Arc<dyn PaymentGateway>>,
    polar: Option<Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client in the slot matching its [`PaymentGateway::kind`].
    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        match gateway.kind() {
            Gateway::Dompetx => self.dompetx = Some(gateway),
            Gateway::Polar => self.polar = Some(gateway),
        }
        self
    }

    pub fn get(&self, gateway: Gateway) -> CoreResult<Arc<dyn PaymentGateway>> {
        let slot = match gateway {
            Gateway::Dompetx => &self.dompetx,
            Gateway::Polar => &self.polar,
        };
        slot.clone()
            .ok_or(CoreError::GatewayUnavailable(gateway.as_str()))
    }

    pub fn is_configured(&self, gateway: Gateway) -> bool {
        self.get(gateway).is_ok()
    }
}
