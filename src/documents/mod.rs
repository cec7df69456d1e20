// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Document Lifecycle Manager
//!
//! ```text
//! UPLOADED ──► PROCESSED ──► DELETED
//!     └───────────────────────┘
//! ```
//!
//! Documents are encrypted under a fresh per-document key before they reach
//! the blob store. Erasure destroys the wrapped key and flips the status in
//! one transaction; blob removal and timer cancellation are best-effort.
//!
//! Deletion paths:
//!
//! - manual delete (owner, one document)
//! - bulk delete (owner, every document of a prediction)
//! - sweep (scheduled job, documents past `scheduled_delete_at`)

pub mod analyzer;
pub mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::auth::Caller;
use crate::crypto::{decrypt, encrypt, generate_document_key, unwrap_key, wrap_key, MasterKey};
use crate::error::{Conflict, CoreError, CoreResult};
use crate::kv::{deletion_timer_key, KvStore, RateDecision, RateLimit, RateLimiter};
use crate::storage::{
    new_object_path, AuditAction, AuditEntry, BlobStore, CoreDb, Document, DocumentStatus,
    EncryptionKeyRecord, OwnershipCheck,
};

pub use analyzer::{DocumentAnalysis, DocumentAnalyzer, FormatAnalyzer};
pub use sweeper::DocumentSweeper;

/// Content types accepted for upload.
pub const ALLOWED_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/heic"];

/// Documents erased per sweep run unless configured otherwise.
pub const DEFAULT_SWEEP_BATCH: usize = 100;

/// Limits applied to uploads.
#[derive(Debug, Clone, Copy)]
pub struct DocumentPolicy {
    pub max_bytes: usize,
    pub retention: Duration,
    pub upload_limit: RateLimit,
}

impl Default for DocumentPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            retention: Duration::from_secs(24 * 60 * 60),
            upload_limit: RateLimit::DOCUMENT_UPLOAD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    AlreadyDeleted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    pub processed: usize,
    pub deleted: usize,
    pub errors: usize,
}

/// A document plus its live deletion timer.
#[derive(Debug, Clone)]
pub struct DocumentView {
    pub document: Document,
    /// `None` once the timer has fired, been cancelled or was never set.
    pub deletion_timer_remaining: Option<Duration>,
}

pub struct DocumentManager {
    db: Arc<CoreDb>,
    blobs: Arc<dyn BlobStore>,
    kv: Arc<dyn KvStore>,
    analyzer: Arc<dyn DocumentAnalyzer>,
    master_key: MasterKey,
    policy: DocumentPolicy,
    limiter: RateLimiter,
}

impl DocumentManager {
    pub fn new(
        db: Arc<CoreDb>,
        blobs: Arc<dyn BlobStore>,
        kv: Arc<dyn KvStore>,
        analyzer: Arc<dyn DocumentAnalyzer>,
        master_key: MasterKey,
        policy: DocumentPolicy,
    ) -> Self {
        let limiter = RateLimiter::new(kv.clone());
        Self {
            db,
            blobs,
            kv,
            analyzer,
            master_key,
            policy,
            limiter,
        }
    }

    pub fn policy(&self) -> DocumentPolicy {
        self.policy
    }

    /// Record that the caller consented to document processing for a
    /// prediction they own.
    pub fn record_consent(&self, caller: &Caller, prediction_id: &str) -> CoreResult<AuditEntry> {
        let prediction = self.db.get_prediction(prediction_id)?.owned_by(&caller.user_id)?;

        let entry = AuditEntry::new(AuditAction::Consent)
            .with_user(&caller.user_id)
            .with_resource("prediction", &prediction.id)
            .with_ip(caller.ip())
            .with_purpose(format!("document audit for prediction {}", prediction.id));
        self.db.write(|tx| tx.append_audit(&entry))?;

        info!(prediction_id = %prediction.id, user_id = %caller.user_id, "Consent recorded");
        Ok(entry)
    }

    /// Encrypt and store an uploaded document, then schedule its erasure.
    pub async fn ingest(
        &self,
        caller: &Caller,
        prediction_id: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> CoreResult<Document> {
        let content_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
            return Err(CoreError::validation_field(
                "content_type",
                format!("unsupported content type; allowed: {}", ALLOWED_CONTENT_TYPES.join(", ")),
            ));
        }
        if bytes.is_empty() {
            return Err(CoreError::validation_field("body", "document is empty"));
        }
        if bytes.len() > self.policy.max_bytes {
            return Err(CoreError::validation_field(
                "body",
                format!("document exceeds {} bytes", self.policy.max_bytes),
            ));
        }

        if let RateDecision::Limited { retry_after } =
            self.limiter.check(self.policy.upload_limit, &caller.user_id).await
        {
            return Err(CoreError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        let prediction = self.db.get_prediction(prediction_id)?.owned_by(&caller.user_id)?;
        let now = Utc::now();
        if !prediction.upload_window_open(now) {
            return Err(Conflict::UploadWindowClosed.into());
        }

        let file_key = generate_document_key()?;
        let ciphertext = encrypt(bytes, &file_key)?;
        let wrapped_key = wrap_key(&file_key, &self.master_key)?;
        drop(file_key);

        let retention = chrono::Duration::from_std(self.policy.retention)
            .map_err(|e| CoreError::Internal(format!("retention out of range: {e}")))?;
        let document = Document {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: caller.user_id.clone(),
            prediction_id: prediction.id.clone(),
            storage_path: new_object_path(),
            content_type,
            size_bytes: bytes.len() as u64,
            status: DocumentStatus::Uploaded,
            created_at: now,
            scheduled_delete_at: now + retention,
            processed_at: None,
            deleted_at: None,
        };
        let key_record = EncryptionKeyRecord {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document.id.clone(),
            wrapped_key,
            created_at: now,
        };

        // A failed blob write leaves no rows behind.
        self.blobs.put(&document.storage_path, &ciphertext).await?;

        let committed = self.db.write(|tx| {
            tx.insert_document(&document, &key_record)?;
            tx.append_audit(
                &AuditEntry::new(AuditAction::Upload)
                    .with_user(&caller.user_id)
                    .with_resource("document", &document.id)
                    .with_ip(caller.ip())
                    .with_purpose(format!("document audit for prediction {}", document.prediction_id))
                    .with_details(json!({
                        "content_type": document.content_type,
                        "size_bytes": document.size_bytes,
                    })),
            )
        });
        if let Err(e) = committed {
            if let Err(cleanup) = self.blobs.delete(&document.storage_path).await {
                warn!(error = %cleanup, "Failed to remove orphaned blob after aborted upload");
            }
            return Err(e.into());
        }

        self.schedule_timer(&document).await;

        info!(
            document_id = %document.id,
            prediction_id = %document.prediction_id,
            size_bytes = document.size_bytes,
            "Document stored"
        );
        Ok(document)
    }

    /// Owner-only metadata read with the remaining deletion timer.
    pub async fn status(&self, caller: &Caller, document_id: &str) -> CoreResult<DocumentView> {
        let document = self.db.get_document(document_id)?.owned_by(&caller.user_id)?;

        let deletion_timer_remaining = if document.is_deleted() {
            None
        } else {
            match self.kv.remaining_ttl(&deletion_timer_key(&document.id)).await {
                Ok(ttl) => ttl,
                Err(e) => {
                    warn!(document_id = %document.id, error = %e, "Deletion timer lookup failed");
                    None
                }
            }
        };

        Ok(DocumentView {
            document,
            deletion_timer_remaining,
        })
    }

    /// Decrypt the document, hand it to the analyzer, and mark it PROCESSED.
    ///
    /// The scheduled deletion is unchanged: processed documents are still
    /// erased when their retention ends.
    pub async fn process(
        &self,
        caller: &Caller,
        document_id: &str,
    ) -> CoreResult<(Document, DocumentAnalysis)> {
        let document = self.db.get_document(document_id)?.owned_by(&caller.user_id)?;
        if document.is_deleted() {
            return Err(Conflict::AlreadyDeleted.into());
        }

        let key_record = self.db.get_encryption_key(&document.id)?.ok_or_else(|| {
            CoreError::Internal(format!("live document {} has no key", document.id))
        })?;
        let file_key = unwrap_key(&key_record.wrapped_key, &self.master_key)?;
        let ciphertext = self.blobs.get(&document.storage_path).await?;
        let plaintext = decrypt(&ciphertext, &file_key)?;

        let analysis = self
            .analyzer
            .analyze(&document.content_type, &plaintext)
            .await
            .map_err(|e| CoreError::Upstream(e.to_string()))?;
        drop(plaintext);

        let now = Utc::now();
        let updated = self.db.write(|tx| -> CoreResult<Document> {
            let mut current = tx.get_document(&document.id)?.ok_or(CoreError::NotFound)?;
            if current.is_deleted() {
                return Err(Conflict::AlreadyDeleted.into());
            }
            current.status = DocumentStatus::Processed;
            current.processed_at = Some(now);
            tx.update_document(&current)?;
            tx.append_audit(
                &AuditEntry::new(AuditAction::Process)
                    .with_user(&caller.user_id)
                    .with_resource("document", &current.id)
                    .with_ip(caller.ip())
                    .with_purpose(format!("document audit for prediction {}", current.prediction_id))
                    .with_details(json!({
                        "content_type_matches": analysis.content_type_matches,
                        "findings": analysis.findings.len(),
                    })),
            )?;
            Ok(current)
        })?;

        info!(document_id = %updated.id, "Document processed");
        Ok((updated, analysis))
    }

    /// Erase one document the caller owns.
    pub async fn manual_delete(&self, caller: &Caller, document_id: &str) -> CoreResult<DeleteOutcome> {
        let document = self.db.get_document(document_id)?.owned_by(&caller.user_id)?;
        if document.is_deleted() {
            return Ok(DeleteOutcome::AlreadyDeleted);
        }

        self.delete_blob(&document).await;

        let now = Utc::now();
        let erased = self.db.write(|tx| -> CoreResult<bool> {
            let Some(current) = tx.get_document(&document.id)? else {
                return Err(CoreError::NotFound);
            };
            if current.is_deleted() {
                return Ok(false);
            }
            tx.erase_document(&current, now)?;
            tx.append_audit(
                &AuditEntry::new(AuditAction::ManualDelete)
                    .with_user(&caller.user_id)
                    .with_resource("document", &current.id)
                    .with_ip(caller.ip())
                    .with_purpose("user requested erasure"),
            )?;
            Ok(true)
        })?;

        self.cancel_timer(&document.id).await;

        if !erased {
            return Ok(DeleteOutcome::AlreadyDeleted);
        }
        info!(document_id = %document.id, "Document deleted by owner");
        Ok(DeleteOutcome::Deleted)
    }

    /// Erase every live document the caller uploaded for a prediction.
    ///
    /// Returns how many were erased; none found is not an error.
    pub async fn bulk_delete(&self, caller: &Caller, prediction_id: &str) -> CoreResult<usize> {
        let targets: Vec<Document> = self
            .db
            .documents_for_prediction(prediction_id)?
            .into_iter()
            .filter(|d| d.user_id == caller.user_id && !d.is_deleted())
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        for document in &targets {
            self.delete_blob(document).await;
            self.cancel_timer(&document.id).await;
        }

        let now = Utc::now();
        let erased_ids = self.db.write(|tx| -> CoreResult<Vec<String>> {
            let mut erased = Vec::with_capacity(targets.len());
            for document in &targets {
                let Some(current) = tx.get_document(&document.id)? else {
                    continue;
                };
                if current.is_deleted() {
                    continue;
                }
                tx.erase_document(&current, now)?;
                erased.push(current.id);
            }
            if !erased.is_empty() {
                tx.append_audit(
                    &AuditEntry::new(AuditAction::BulkDelete)
                        .with_user(&caller.user_id)
                        .with_resource("prediction", prediction_id)
                        .with_ip(caller.ip())
                        .with_purpose("user requested erasure")
                        .with_details(json!({ "count": erased.len(), "document_ids": erased })),
                )?;
            }
            Ok(erased)
        })?;

        info!(
            prediction_id = %prediction_id,
            count = erased_ids.len(),
            "Documents bulk deleted"
        );
        Ok(erased_ids.len())
    }

    /// Erase up to `batch_size` documents whose retention ended before `now`.
    ///
    /// A failure on one document is counted and logged; the rest of the
    /// batch still runs. Safe to run concurrently with itself.
    pub async fn sweep(&self, now: DateTime<Utc>, batch_size: usize) -> CoreResult<SweepReport> {
        let due = self.db.expired_documents(now, batch_size)?;
        let mut report = SweepReport::default();

        for document in due {
            report.processed += 1;
            match self.expire(&document, now).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    report.errors += 1;
                    warn!(document_id = %document.id, error = %e, "Scheduled deletion failed");
                }
            }
        }

        if report.processed > 0 {
            info!(
                processed = report.processed,
                deleted = report.deleted,
                errors = report.errors,
                "Document sweep finished"
            );
        }
        Ok(report)
    }

    async fn expire(&self, document: &Document, now: DateTime<Utc>) -> CoreResult<bool> {
        self.delete_blob(document).await;

        let erased = self.db.write(|tx| -> CoreResult<bool> {
            let Some(current) = tx.get_document(&document.id)? else {
                return Ok(false);
            };
            if current.is_deleted() {
                return Ok(false);
            }
            tx.erase_document(&current, now)?;
            tx.append_audit(
                &AuditEntry::new(AuditAction::AutoDelete)
                    .with_resource("document", &current.id)
                    .with_purpose("retention period elapsed")
                    .with_details(json!({ "owner": current.user_id })),
            )?;
            Ok(true)
        })?;

        self.cancel_timer(&document.id).await;
        Ok(erased)
    }

    async fn schedule_timer(&self, document: &Document) {
        let key = deletion_timer_key(&document.id);
        let value = document.scheduled_delete_at.to_rfc3339();
        if let Err(e) = self.kv.schedule_expiry(&key, &value, self.policy.retention).await {
            warn!(document_id = %document.id, error = %e, "Failed to schedule deletion timer");
        }
    }

    async fn cancel_timer(&self, document_id: &str) {
        if let Err(e) = self.kv.cancel(&deletion_timer_key(document_id)).await {
            warn!(document_id = %document_id, error = %e, "Failed to cancel deletion timer");
        }
    }

    async fn delete_blob(&self, document: &Document) {
        if let Err(e) = self.blobs.delete(&document.storage_path).await {
            warn!(document_id = %document.id, error = %e, "Blob delete failed, key destruction still applies");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;
    use crate::kv::MemoryKv;
    use crate::storage::{AuditLog, MemoryBlobStore, Prediction};

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4, 5, 6, 7, 8];

    struct Harness {
        manager: DocumentManager,
        db: Arc<CoreDb>,
        blobs: Arc<MemoryBlobStore>,
        kv: Arc<MemoryKv>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        harness_with_uploads(1_000)
    }

    fn harness_with_uploads(max_uploads: u64) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(CoreDb::open(&dir.path().join("docs.redb")).unwrap());
        let blobs = Arc::new(MemoryBlobStore::new());
        let kv = Arc::new(MemoryKv::default());
        let manager = DocumentManager::new(
            db.clone(),
            blobs.clone(),
            kv.clone(),
            Arc::new(FormatAnalyzer),
            MasterKey::from_bytes([7u8; KEY_LEN]),
            DocumentPolicy {
                max_bytes: 64,
                retention: Duration::from_secs(24 * 60 * 60),
                upload_limit: RateLimit {
                    scope: "document-upload",
                    max: max_uploads,
                    window: Duration::from_secs(60 * 60),
                },
            },
        );
        Harness {
            manager,
            db,
            blobs,
            kv,
            _dir: dir,
        }
    }

    fn seed_paid_prediction(db: &CoreDb, id: &str, user_id: &str) {
        let mut prediction = Prediction::new(id, user_id);
        prediction.mark_paid(Utc::now());
        db.write(|tx| tx.put_prediction(&prediction)).unwrap();
    }

    fn owner() -> Caller {
        Caller::user("u1").with_ip("198.51.100.4")
    }

    #[tokio::test]
    async fn ingest_encrypts_and_schedules_deletion() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");

        let doc = h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Uploaded);
        assert!(!doc.storage_path.contains("u1"));
        assert!(!doc.storage_path.contains("p1"));

        let stored = h.blobs.get(&doc.storage_path).await.unwrap();
        assert_ne!(stored, JPEG);
        assert_eq!(stored.len(), JPEG.len() + crate::crypto::envelope::MIN_FRAME_LEN);

        assert!(h.db.get_encryption_key(&doc.id).unwrap().is_some());
        assert!(h.kv.exists(&deletion_timer_key(&doc.id)).await.unwrap());

        let uploads = AuditLog::new(&h.db).with_action(AuditAction::Upload).unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].ip_address.as_deref(), Some("198.51.100.4"));
    }

    #[tokio::test]
    async fn ingest_validates_type_and_size() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");

        let err = h.manager.ingest(&owner(), "p1", "application/pdf", JPEG).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));

        let err = h.manager.ingest(&owner(), "p1", "image/png", &[0u8; 65]).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));

        let ok = h.manager.ingest(&owner(), "p1", "image/JPEG; charset=binary", JPEG).await;
        assert_eq!(ok.unwrap().content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn ingest_requires_owned_prediction_with_open_window() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "someone-else");
        let err = h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound));

        let unpaid = Prediction::new("p2", "u1");
        h.db.write(|tx| tx.put_prediction(&unpaid)).unwrap();
        let err = h.manager.ingest(&owner(), "p2", "image/jpeg", JPEG).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(Conflict::UploadWindowClosed)));
    }

    #[tokio::test]
    async fn uploads_are_rate_limited_per_user() {
        let h = harness_with_uploads(2);
        seed_paid_prediction(&h.db, "p1", "u1");
        seed_paid_prediction(&h.db, "p2", "u2");

        for _ in 0..2 {
            h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap();
        }
        let err = h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap_err();
        assert!(matches!(err, CoreError::RateLimited { retry_after_secs } if retry_after_secs > 0));

        let other = Caller::user("u2");
        assert!(h.manager.ingest(&other, "p2", "image/jpeg", JPEG).await.is_ok());
    }

    #[tokio::test]
    async fn failed_blob_write_leaves_no_rows() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");
        h.blobs.fail_puts(true);

        let err = h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap_err();
        assert!(matches!(err, CoreError::Blob(_)));
        assert!(h.db.documents_for_prediction("p1").unwrap().is_empty());
        assert!(AuditLog::new(&h.db).entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn manual_delete_destroys_key_and_is_idempotent() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");
        let doc = h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap();

        let outcome = h.manager.manual_delete(&owner(), &doc.id).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert!(h.db.get_encryption_key(&doc.id).unwrap().is_none());
        let stored = h.db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Deleted);
        assert!(stored.deleted_at.is_some());
        assert!(!h.blobs.contains(&doc.storage_path));
        assert!(!h.kv.exists(&deletion_timer_key(&doc.id)).await.unwrap());

        let again = h.manager.manual_delete(&owner(), &doc.id).await.unwrap();
        assert_eq!(again, DeleteOutcome::AlreadyDeleted);

        let deletes = AuditLog::new(&h.db).with_action(AuditAction::ManualDelete).unwrap();
        assert_eq!(deletes.len(), 1);
    }

    #[tokio::test]
    async fn manual_delete_survives_blob_failure() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");
        let doc = h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap();
        h.blobs.fail_deletes(true);

        let outcome = h.manager.manual_delete(&owner(), &doc.id).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert!(h.db.get_encryption_key(&doc.id).unwrap().is_none());
        // The ciphertext outlives its key and is unreadable.
        assert!(h.blobs.contains(&doc.storage_path));
    }

    #[tokio::test]
    async fn other_users_cannot_see_or_delete() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");
        let doc = h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap();

        let intruder = Caller::user("u2");
        assert!(matches!(
            h.manager.manual_delete(&intruder, &doc.id).await,
            Err(CoreError::NotFound)
        ));
        assert!(matches!(
            h.manager.status(&intruder, &doc.id).await,
            Err(CoreError::NotFound)
        ));
        assert!(matches!(
            h.manager.process(&intruder, &doc.id).await,
            Err(CoreError::NotFound)
        ));
        assert_eq!(h.manager.bulk_delete(&intruder, "p1").await.unwrap(), 0);
        assert!(h.db.get_encryption_key(&doc.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn bulk_delete_erases_all_and_audits_once() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap().id);
        }
        h.manager.manual_delete(&owner(), &ids[0]).await.unwrap();

        let count = h.manager.bulk_delete(&owner(), "p1").await.unwrap();
        assert_eq!(count, 2);
        for id in &ids {
            assert!(h.db.get_encryption_key(id).unwrap().is_none());
            assert!(h.db.get_document(id).unwrap().unwrap().is_deleted());
        }
        assert!(h.blobs.is_empty());

        let bulk = AuditLog::new(&h.db).with_action(AuditAction::BulkDelete).unwrap();
        assert_eq!(bulk.len(), 1);
        assert_eq!(bulk[0].details.as_ref().unwrap()["count"], 2);

        assert_eq!(h.manager.bulk_delete(&owner(), "p1").await.unwrap(), 0);
        assert_eq!(h.manager.bulk_delete(&owner(), "no-such-prediction").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn process_decrypts_and_marks_processed() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");
        let doc = h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap();

        let (processed, analysis) = h.manager.process(&owner(), &doc.id).await.unwrap();
        assert_eq!(processed.status, DocumentStatus::Processed);
        assert!(analysis.content_type_matches);
        assert_eq!(processed.scheduled_delete_at, doc.scheduled_delete_at);

        h.manager.manual_delete(&owner(), &doc.id).await.unwrap();
        assert!(matches!(
            h.manager.process(&owner(), &doc.id).await,
            Err(CoreError::Conflict(Conflict::AlreadyDeleted))
        ));
    }

    #[tokio::test]
    async fn tampered_blob_fails_integrity() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");
        let doc = h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap();

        let mut stored = h.blobs.get(&doc.storage_path).await.unwrap();
        let last = stored.len() - 1;
        stored[last] ^= 0x01;
        h.blobs.put(&doc.storage_path, &stored).await.unwrap();

        let err = h.manager.process(&owner(), &doc.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Crypto(_)));
        let current = h.db.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(current.status, DocumentStatus::Uploaded);
    }

    #[tokio::test]
    async fn status_reports_remaining_timer() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");
        let doc = h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap();

        let view = h.manager.status(&owner(), &doc.id).await.unwrap();
        let remaining = view.deletion_timer_remaining.unwrap();
        assert!(remaining <= Duration::from_secs(24 * 60 * 60));
        assert!(remaining > Duration::from_secs(23 * 60 * 60));

        h.manager.manual_delete(&owner(), &doc.id).await.unwrap();
        let view = h.manager.status(&owner(), &doc.id).await.unwrap();
        assert!(view.deletion_timer_remaining.is_none());
        assert_eq!(view.document.status, DocumentStatus::Deleted);
    }

    #[tokio::test]
    async fn consent_is_audited_for_owned_prediction() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");

        let entry = h.manager.record_consent(&owner(), "p1").unwrap();
        assert_eq!(entry.action, AuditAction::Consent);
        assert!(entry.purpose.unwrap().contains("p1"));

        assert!(matches!(
            h.manager.record_consent(&Caller::user("u2"), "p1"),
            Err(CoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn sweep_is_bounded_by_batch_size() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");
        for _ in 0..150 {
            h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap();
        }
        let later = Utc::now() + chrono::Duration::hours(25);

        let first = h.manager.sweep(later, 100).await.unwrap();
        assert_eq!(first, SweepReport { processed: 100, deleted: 100, errors: 0 });
        assert_eq!(h.db.expired_documents(later, 1000).unwrap().len(), 50);

        let second = h.manager.sweep(later, 100).await.unwrap();
        assert_eq!(second, SweepReport { processed: 50, deleted: 50, errors: 0 });
        assert!(h.db.expired_documents(later, 1000).unwrap().is_empty());

        let auto = AuditLog::new(&h.db).with_action(AuditAction::AutoDelete).unwrap();
        assert_eq!(auto.len(), 150);
    }

    #[tokio::test]
    async fn sweep_skips_documents_not_yet_due() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");
        h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap();

        let report = h.manager.sweep(Utc::now(), 100).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn overlapping_sweeps_erase_each_document_once() {
        let h = harness();
        seed_paid_prediction(&h.db, "p1", "u1");
        for _ in 0..10 {
            h.manager.ingest(&owner(), "p1", "image/jpeg", JPEG).await.unwrap();
        }
        let later = Utc::now() + chrono::Duration::hours(25);

        let (a, b) = tokio::join!(h.manager.sweep(later, 100), h.manager.sweep(later, 100));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.deleted + b.deleted, 10);
        assert_eq!(a.errors + b.errors, 0);

        let auto = AuditLog::new(&h.db).with_action(AuditAction::AutoDelete).unwrap();
        assert_eq!(auto.len(), 10);
    }
}
