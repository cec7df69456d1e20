// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded relational store backed by redb (pure Rust, ACID).
//!
//! redb is the single source of truth. Every multi-record mutation (document
//! erasure, payment reconciliation, booking transitions) runs inside one
//! [`CoreDb::write`] closure, which commits on `Ok` and aborts on `Err`.
//!
//! ## Table Layout
//!
//! - `documents`: document_id → Document
//! - `encryption_keys`: document_id → EncryptionKeyRecord
//! - `document_expiry`: (scheduled_delete_ms_be | document_id) → document_id
//! - `prediction_documents`: `prediction_id|document_id` → user_id
//! - `orders`: order_id → Order
//! - `order_payment_refs`: `gateway:payment_ref` → order_id
//! - `pending_orders`: product_id → order_id (at most one PENDING per product)
//! - `predictions`: prediction_id → Prediction
//! - `bookings`: booking_id → Booking
//! - `audit_log`: (created_ms_be | seq_be | entry_id) → AuditEntry
//! - `processed_events`: `gateway:event_id` → processed_at (RFC 3339)

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use serde::{de::DeserializeOwned, Serialize};

use super::audit::AuditEntry;
use super::records::{
    Booking, Document, DocumentStatus, EncryptionKeyRecord, Gateway, Order, Prediction,
};

// =============================================================================
// Table Definitions
// =============================================================================

const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

const ENCRYPTION_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("encryption_keys");

/// Key format: `scheduled_delete_ms_be | document_id` for ascending-time scans.
const DOCUMENT_EXPIRY: TableDefinition<&[u8], &str> = TableDefinition::new("document_expiry");

const PREDICTION_DOCUMENTS: TableDefinition<&str, &str> =
    TableDefinition::new("prediction_documents");

const ORDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

const ORDER_PAYMENT_REFS: TableDefinition<&str, &str> = TableDefinition::new("order_payment_refs");

const PENDING_ORDERS: TableDefinition<&str, &str> = TableDefinition::new("pending_orders");

const PREDICTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("predictions");

const BOOKINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("bookings");

const AUDIT_LOG: TableDefinition<&[u8], &[u8]> = TableDefinition::new("audit_log");

const PROCESSED_EVENTS: TableDefinition<&str, &str> = TableDefinition::new("processed_events");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Key Helpers
// =============================================================================

static AUDIT_SEQ: AtomicU64 = AtomicU64::new(0);

fn millis_be(at: DateTime<Utc>) -> [u8; 8] {
    (at.timestamp_millis().max(0) as u64).to_be_bytes()
}

fn expiry_key(scheduled_delete_at: DateTime<Utc>, document_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + document_id.len());
    key.extend_from_slice(&millis_be(scheduled_delete_at));
    key.extend_from_slice(document_id.as_bytes());
    key
}

fn audit_key(entry: &AuditEntry) -> Vec<u8> {
    let seq = AUDIT_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut key = Vec::with_capacity(16 + entry.id.len());
    key.extend_from_slice(&millis_be(entry.created_at));
    key.extend_from_slice(&seq.to_be_bytes());
    key.extend_from_slice(entry.id.as_bytes());
    key
}

fn prediction_document_key(prediction_id: &str, document_id: &str) -> String {
    format!("{prediction_id}|{document_id}")
}

/// `[prefix, prefix_end)` covering every `prediction_id|…` key.
fn prediction_prefix_range(prediction_id: &str) -> (String, String) {
    // '}' is the byte after '|'
    (format!("{prediction_id}|"), format!("{prediction_id}}}"))
}

fn payment_ref_key(gateway: Gateway, payment_ref: &str) -> String {
    format!("{}:{payment_ref}", gateway.as_str())
}

fn event_key(gateway: Gateway, event_id: &str) -> String {
    format!("{}:{event_id}", gateway.as_str())
}

fn get_json<T, R>(table: &R, key: &str) -> DbResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

fn get_str<R>(table: &R, key: &str) -> DbResult<Option<String>>
where
    R: ReadableTable<&'static str, &'static str>,
{
    Ok(table.get(key)?.map(|v| v.value().to_string()))
}

// =============================================================================
// CoreDb
// =============================================================================

/// Embedded ACID store for documents, keys, orders and their links.
pub struct CoreDb {
    db: Database,
}

impl CoreDb {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DOCUMENTS)?;
            let _ = write_txn.open_table(ENCRYPTION_KEYS)?;
            let _ = write_txn.open_table(DOCUMENT_EXPIRY)?;
            let _ = write_txn.open_table(PREDICTION_DOCUMENTS)?;
            let _ = write_txn.open_table(ORDERS)?;
            let _ = write_txn.open_table(ORDER_PAYMENT_REFS)?;
            let _ = write_txn.open_table(PENDING_ORDERS)?;
            let _ = write_txn.open_table(PREDICTIONS)?;
            let _ = write_txn.open_table(BOOKINGS)?;
            let _ = write_txn.open_table(AUDIT_LOG)?;
            let _ = write_txn.open_table(PROCESSED_EVENTS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Run `f` inside one write transaction.
    ///
    /// Commits when `f` returns `Ok`, aborts (discarding every write made
    /// through the [`WriteTx`]) when it returns `Err`.
    pub fn write<T, E>(&self, f: impl FnOnce(&WriteTx) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        let txn = self.db.begin_write().map_err(DbError::from)?;
        let tx = WriteTx { txn };
        match f(&tx) {
            Ok(value) => {
                tx.txn.commit().map_err(DbError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = tx.txn.abort() {
                    tracing::warn!(error = %abort_err, "Failed to abort write transaction");
                }
                Err(e)
            }
        }
    }

    /// Cheap read used by health checks.
    pub fn ping(&self) -> DbResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(DOCUMENTS)?;
        Ok(())
    }

    // =========================================================================
    // Documents
    // =========================================================================

    pub fn get_document(&self, id: &str) -> DbResult<Option<Document>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS)?;
        get_json(&table, id)
    }

    pub fn get_encryption_key(&self, document_id: &str) -> DbResult<Option<EncryptionKeyRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENCRYPTION_KEYS)?;
        get_json(&table, document_id)
    }

    /// Every document uploaded against a prediction, any status.
    pub fn documents_for_prediction(&self, prediction_id: &str) -> DbResult<Vec<Document>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(PREDICTION_DOCUMENTS)?;
        let docs = read_txn.open_table(DOCUMENTS)?;

        let (start, end) = prediction_prefix_range(prediction_id);
        let mut results = Vec::new();
        for entry in index.range(start.as_str()..end.as_str())? {
            let (key, _owner) = entry?;
            let Some((_, document_id)) = key.value().split_once('|') else {
                continue;
            };
            if let Some(doc) = get_json::<Document, _>(&docs, document_id)? {
                results.push(doc);
            }
        }
        Ok(results)
    }

    /// Non-deleted documents whose scheduled deletion is strictly before
    /// `now`, oldest first, at most `limit`.
    pub fn expired_documents(&self, now: DateTime<Utc>, limit: usize) -> DbResult<Vec<Document>> {
        let read_txn = self.db.begin_read()?;
        let expiry = read_txn.open_table(DOCUMENT_EXPIRY)?;
        let docs = read_txn.open_table(DOCUMENTS)?;

        let end = millis_be(now);
        let mut results = Vec::with_capacity(limit.min(1024));
        for entry in expiry.range(..end.as_slice())? {
            if results.len() >= limit {
                break;
            }
            let (_, document_id) = entry?;
            if let Some(doc) = get_json::<Document, _>(&docs, document_id.value())? {
                if !doc.is_deleted() && doc.scheduled_delete_at < now {
                    results.push(doc);
                }
            }
        }
        Ok(results)
    }

    // =========================================================================
    // Orders, predictions, bookings
    // =========================================================================

    pub fn get_order(&self, id: &str) -> DbResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS)?;
        get_json(&table, id)
    }

    pub fn order_by_payment_ref(
        &self,
        gateway: Gateway,
        payment_ref: &str,
    ) -> DbResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let refs = read_txn.open_table(ORDER_PAYMENT_REFS)?;
        let Some(order_id) = get_str(&refs, &payment_ref_key(gateway, payment_ref))? else {
            return Ok(None);
        };
        let orders = read_txn.open_table(ORDERS)?;
        get_json(&orders, &order_id)
    }

    pub fn get_prediction(&self, id: &str) -> DbResult<Option<Prediction>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PREDICTIONS)?;
        get_json(&table, id)
    }

    pub fn get_booking(&self, id: &str) -> DbResult<Option<Booking>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BOOKINGS)?;
        get_json(&table, id)
    }

    // =========================================================================
    // Audit & processed events
    // =========================================================================

    pub fn audit_entries(&self) -> DbResult<Vec<AuditEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;
        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    pub fn is_event_processed(&self, gateway: Gateway, event_id: &str) -> DbResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PROCESSED_EVENTS)?;
        Ok(table.get(event_key(gateway, event_id).as_str())?.is_some())
    }
}

// =============================================================================
// WriteTx
// =============================================================================

/// Handle to an open write transaction.
///
/// Each method opens the table it needs and releases it before returning,
/// so methods compose freely inside one [`CoreDb::write`] closure.
pub struct WriteTx {
    txn: WriteTransaction,
}

impl WriteTx {
    fn put_json<T: Serialize>(
        &self,
        definition: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> DbResult<()> {
        let json = serde_json::to_vec(value)?;
        let mut table = self.txn.open_table(definition)?;
        table.insert(key, json.as_slice())?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(
        &self,
        definition: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> DbResult<Option<T>> {
        let table = self.txn.open_table(definition)?;
        get_json(&table, key)
    }

    // ========== Documents ==========

    pub fn get_document(&self, id: &str) -> DbResult<Option<Document>> {
        self.read_json(DOCUMENTS, id)
    }

    /// Insert a new document with its wrapped key and index entries.
    pub fn insert_document(&self, doc: &Document, key: &EncryptionKeyRecord) -> DbResult<()> {
        self.put_json(DOCUMENTS, &doc.id, doc)?;
        self.put_json(ENCRYPTION_KEYS, &doc.id, key)?;
        {
            let mut expiry = self.txn.open_table(DOCUMENT_EXPIRY)?;
            let k = expiry_key(doc.scheduled_delete_at, &doc.id);
            expiry.insert(k.as_slice(), doc.id.as_str())?;
        }
        let mut index = self.txn.open_table(PREDICTION_DOCUMENTS)?;
        let k = prediction_document_key(&doc.prediction_id, &doc.id);
        index.insert(k.as_str(), doc.user_id.as_str())?;
        Ok(())
    }

    /// Update a live document's record (status or timestamps).
    pub fn update_document(&self, doc: &Document) -> DbResult<()> {
        self.put_json(DOCUMENTS, &doc.id, doc)
    }

    /// Destroy the document's key and mark it DELETED, together.
    ///
    /// Returns the updated record.
    pub fn erase_document(&self, doc: &Document, now: DateTime<Utc>) -> DbResult<Document> {
        {
            let mut keys = self.txn.open_table(ENCRYPTION_KEYS)?;
            keys.remove(doc.id.as_str())?;
        }
        {
            let mut expiry = self.txn.open_table(DOCUMENT_EXPIRY)?;
            let k = expiry_key(doc.scheduled_delete_at, &doc.id);
            expiry.remove(k.as_slice())?;
        }

        let mut erased = doc.clone();
        erased.status = DocumentStatus::Deleted;
        erased.deleted_at = Some(now);
        self.put_json(DOCUMENTS, &erased.id, &erased)?;
        Ok(erased)
    }

    // ========== Orders ==========

    pub fn get_order(&self, id: &str) -> DbResult<Option<Order>> {
        self.read_json(ORDERS, id)
    }

    pub fn put_order(&self, order: &Order) -> DbResult<()> {
        self.put_json(ORDERS, &order.id, order)
    }

    /// Index the order under its gateway payment reference.
    pub fn link_payment_ref(&self, gateway: Gateway, payment_ref: &str, order_id: &str) -> DbResult<()> {
        let mut refs = self.txn.open_table(ORDER_PAYMENT_REFS)?;
        let key = payment_ref_key(gateway, payment_ref);
        refs.insert(key.as_str(), order_id)?;
        Ok(())
    }

    /// The PENDING order currently holding `product_id`, if any.
    pub fn pending_order_for(&self, product_id: &str) -> DbResult<Option<String>> {
        let table = self.txn.open_table(PENDING_ORDERS)?;
        get_str(&table, product_id)
    }

    pub fn hold_pending(&self, product_id: &str, order_id: &str) -> DbResult<()> {
        let mut table = self.txn.open_table(PENDING_ORDERS)?;
        table.insert(product_id, order_id)?;
        Ok(())
    }

    /// Release the pending slot if `order_id` still holds it.
    pub fn release_pending(&self, product_id: &str, order_id: &str) -> DbResult<()> {
        let mut table = self.txn.open_table(PENDING_ORDERS)?;
        let holder = get_str(&table, product_id)?;
        if holder.as_deref() == Some(order_id) {
            table.remove(product_id)?;
        }
        Ok(())
    }

    // ========== Predictions & bookings ==========

    pub fn get_prediction(&self, id: &str) -> DbResult<Option<Prediction>> {
        self.read_json(PREDICTIONS, id)
    }

    pub fn put_prediction(&self, prediction: &Prediction) -> DbResult<()> {
        self.put_json(PREDICTIONS, &prediction.id, prediction)
    }

    pub fn get_booking(&self, id: &str) -> DbResult<Option<Booking>> {
        self.read_json(BOOKINGS, id)
    }

    pub fn put_booking(&self, booking: &Booking) -> DbResult<()> {
        self.put_json(BOOKINGS, &booking.id, booking)
    }

    // ========== Audit & processed events ==========

    pub fn append_audit(&self, entry: &AuditEntry) -> DbResult<()> {
        let json = serde_json::to_vec(entry)?;
        let key = audit_key(entry);
        let mut table = self.txn.open_table(AUDIT_LOG)?;
        table.insert(key.as_slice(), json.as_slice())?;
        Ok(())
    }

    /// Record a gateway event as applied.
    ///
    /// Returns `false` if it was already recorded, in which case nothing is
    /// written.
    pub fn record_event(&self, gateway: Gateway, event_id: &str, at: DateTime<Utc>) -> DbResult<bool> {
        let key = event_key(gateway, event_id);
        let mut table = self.txn.open_table(PROCESSED_EVENTS)?;
        if table.get(key.as_str())?.is_some() {
            return Ok(false);
        }
        let stamp = at.to_rfc3339();
        table.insert(key.as_str(), stamp.as_str())?;
        Ok(true)
    }
}

// =============================================================================
// Tests
// =============================================================================
