// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Deletion Sweeper
//!
//! In-process fallback for the cron endpoint. Every `interval` it erases one
//! batch of documents whose retention has ended. Sweeps are idempotent, so
//! running this alongside the external cron job is harmless.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`; the loop exits at the next
//! tick boundary after cancellation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{DocumentManager, DEFAULT_SWEEP_BATCH};

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

pub struct DocumentSweeper {
    documents: Arc<DocumentManager>,
    interval: Duration,
    batch_size: usize,
}

impl DocumentSweeper {
    pub fn new(documents: Arc<DocumentManager>) -> Self {
        Self {
            documents,
            interval: DEFAULT_SWEEP_INTERVAL,
            batch_size: DEFAULT_SWEEP_BATCH,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Run until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Document sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Document sweeper shutting down");
                return;
            }

            self.sweep_step().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Document sweeper shutting down");
                    return;
                }
            }
        }
    }

    async fn sweep_step(&self) {
        if let Err(e) = self.documents.sweep(Utc::now(), self.batch_size).await {
            warn!(error = %e, "Document sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{MasterKey, KEY_LEN};
    use crate::documents::{DocumentPolicy, FormatAnalyzer};
    use crate::kv::MemoryKv;
    use crate::storage::{CoreDb, MemoryBlobStore};

    #[tokio::test]
    async fn stops_on_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(CoreDb::open(&dir.path().join("sweep.redb")).unwrap());
        let manager = Arc::new(DocumentManager::new(
            db,
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryKv::default()),
            Arc::new(FormatAnalyzer),
            MasterKey::from_bytes([1u8; KEY_LEN]),
            DocumentPolicy::default(),
        ));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            DocumentSweeper::new(manager)
                .with_interval(Duration::from_secs(3600))
                .run(shutdown.clone()),
        );

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
