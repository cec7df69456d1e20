// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use visa_docs_core::{
    api::router,
    config::{AppConfig, LogFormat},
    documents::DocumentSweeper,
    kv::{KvStore, MemoryKv, RedisKv},
    notify::{HttpNotifier, LogNotifier, Notifier},
    state::{gateway_registry, AppState, Backends},
    storage::{CoreDb, FsBlobStore, StoragePaths},
};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("Invalid configuration");
    init_tracing(config.log_format);

    let paths = StoragePaths::new(&config.data_dir);
    let db = Arc::new(CoreDb::open(&paths.database_file()).expect("Failed to open database"));

    let kv: Arc<dyn KvStore> = match config.redis_url.as_deref() {
        Some(url) => Arc::new(RedisKv::connect(url).await.expect("Failed to connect to Redis")),
        None => {
            warn!("REDIS_URL not set, using in-process KV store (single instance only)");
            Arc::new(MemoryKv::default())
        }
    };

    let notifier: Arc<dyn Notifier> = match config.notify_webhook_url.as_deref() {
        Some(url) => Arc::new(HttpNotifier::new(url).expect("Failed to build notifier")),
        None => Arc::new(LogNotifier),
    };

    let backends = Backends {
        db,
        blobs: Arc::new(FsBlobStore::new(paths.blobs_dir())),
        kv,
        notifier,
    };
    let state = AppState::new(&config, backends, gateway_registry(&config))
        .expect("Failed to initialize services");

    let shutdown = CancellationToken::new();
    let sweeper = config.sweep_interval.map(|interval| {
        let sweeper = DocumentSweeper::new(state.documents.clone())
            .with_interval(interval)
            .with_batch_size(config.sweep_batch_size);
        tokio::spawn(sweeper.run(shutdown.clone()))
    });

    let notifications = state.notifications.clone();
    let app = router(state);
    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");

    info!(address = %addr, "Visa docs core listening (docs at /docs)");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal.cancel();
        })
        .await
        .expect("HTTP server failed");

    shutdown.cancel();
    if let Some(handle) = sweeper {
        if let Err(e) = handle.await {
            warn!(error = %e, "Sweep loop ended abnormally");
        }
    }
    if notifications.in_flight() > 0 {
        info!(in_flight = notifications.in_flight(), "Waiting for pending notifications");
    }
    notifications.drain().await;
    info!("Shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down");
}
