// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use axum::extract::FromRef;
use tracing::info;

use crate::auth::AuthConfig;
use crate::bookings::BookingService;
use crate::config::{AppConfig, ConfigError};
use crate::documents::{DocumentManager, FormatAnalyzer};
use crate::kv::KvStore;
use crate::notify::{Dispatcher, Notifier};
use crate::payments::{
    DompetxClient, DompetxVerifier, ExchangeRates, GatewayRegistry, PaymentService,
    PaymentSettings, PolarClient, PolarVerifier, Reconciler, WebhookVerifier,
};
use crate::storage::{BlobStore, CoreDb};

/// Storage and side-effect backends the services are built on.
#[derive(Clone)]
pub struct Backends {
    pub db: Arc<CoreDb>,
    pub blobs: Arc<dyn BlobStore>,
    pub kv: Arc<dyn KvStore>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<CoreDb>,
    pub kv: Arc<dyn KvStore>,
    pub documents: Arc<DocumentManager>,
    pub payments: Arc<PaymentService>,
    pub reconciler: Arc<Reconciler>,
    pub bookings: Arc<BookingService>,
    /// Background notification deliveries, drained on shutdown.
    pub notifications: Dispatcher,
    pub dompetx_webhooks: Arc<dyn WebhookVerifier>,
    pub polar_webhooks: Arc<dyn WebhookVerifier>,
    pub auth_config: Arc<AuthConfig>,
    pub sweep_batch_size: usize,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        backends: Backends,
        gateways: GatewayRegistry,
    ) -> Result<Self, ConfigError> {
        let Backends {
            db,
            blobs,
            kv,
            notifier,
        } = backends;

        let polar_webhooks =
            PolarVerifier::new(config.polar.webhook_secret.as_deref()).map_err(|e| {
                ConfigError::Invalid {
                    name: "POLAR_WEBHOOK_SECRET",
                    reason: e.to_string(),
                }
            })?;
        let dompetx_webhooks = DompetxVerifier::new(config.dompetx.webhook_secret.as_deref());

        let rates = match config.exchange_rate_url.as_deref() {
            Some(url) => ExchangeRates::from_url(url, config.fallback_usd_idr_rate),
            None => ExchangeRates::fixed(config.fallback_usd_idr_rate),
        };

        let documents = DocumentManager::new(
            db.clone(),
            blobs,
            kv.clone(),
            Arc::new(FormatAnalyzer),
            config.master_key.clone(),
            config.document_policy,
        );
        let payments = PaymentService::new(
            db.clone(),
            kv.clone(),
            gateways,
            Arc::new(rates),
            PaymentSettings {
                prediction_price_usd_cents: config.prediction_price_usd_cents,
                public_base_url: config.public_base_url.clone(),
            },
        );
        let notifications = Dispatcher::new(notifier);
        let reconciler = Reconciler::new(db.clone(), kv.clone(), notifications.clone());
        let bookings = BookingService::new(db.clone(), notifications.clone());

        Ok(Self {
            db,
            kv,
            documents: Arc::new(documents),
            payments: Arc::new(payments),
            reconciler: Arc::new(reconciler),
            bookings: Arc::new(bookings),
            notifications,
            dompetx_webhooks: Arc::new(dompetx_webhooks),
            polar_webhooks: Arc::new(polar_webhooks),
            auth_config: Arc::new(AuthConfig {
                session_secret: config.session_secret.clone(),
                cron_secret: config.cron_secret.clone(),
            }),
            sweep_batch_size: config.sweep_batch_size,
        })
    }
}

impl FromRef<AppState> for Arc<AuthConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.auth_config.clone()
    }
}

/// Outbound clients for every gateway whose credentials are configured.
pub fn gateway_registry(config: &AppConfig) -> GatewayRegistry {
    let mut registry = GatewayRegistry::new();

    match DompetxClient::new(&config.dompetx) {
        Ok(client) => registry = registry.with(Arc::new(client)),
        Err(e) => info!(reason = %e, "DompetX payments disabled"),
    }
    match PolarClient::new(&config.polar) {
        Ok(client) => registry = registry.with(Arc::new(client)),
        Err(e) => info!(reason = %e, "Polar payments disabled"),
    }

    registry
}
