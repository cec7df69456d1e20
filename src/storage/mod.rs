// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Durable state lives in two places:
//!
//! - **Relational store** (`database`): redb, authoritative for documents,
//!   wrapped keys, orders, predictions, bookings, the audit log, and the
//!   processed-event ledger.
//! - **Blob store** (`blob`): ciphertext only, at random object paths.
//!   Non-authoritative; a blob without a key is unreadable.
//!
//! ## Storage Layout
//!
//! ```text
//! $DATA_DIR/
//!   core.redb                 # relational store
//!   blobs/{uuid}/{uuid}       # encrypted document bodies
//! ```

pub mod audit;
pub mod blob;
pub mod database;
pub mod ownership;
pub mod paths;
pub mod records;

pub use audit::{AuditAction, AuditEntry, AuditLog};
pub use blob::{BlobError, BlobResult, BlobStore, FsBlobStore, MemoryBlobStore};
pub use database::{CoreDb, DbError, DbResult, WriteTx};
pub use ownership::{OwnedResource, OwnershipCheck};
pub use paths::{new_object_path, StoragePaths};
pub use records::{
    Booking, Document, DocumentStatus, EncryptionKeyRecord, Gateway, Order, OrderStatus,
    Prediction, ProductType,
};
