// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Visa Docs Core - Document Lifecycle & Payment Reconciliation
//!
//! Passport and visa images are held encrypted for at most 24 hours and then
//! provably erased. Payments from two gateways are reconciled exactly once
//! into prediction unlocks and booking progress.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Caller identity (HS256 session JWT), admin and cron gates
//! - `bookings` - Booking status state machine
//! - `crypto` - Envelope encryption (AES-256-GCM)
//! - `documents` - Upload, processing and erasure of documents
//! - `kv` - Expiring keys: deletion timers, webhook markers, rate limits
//! - `payments` - Checkout creation and webhook reconciliation
//! - `storage` - redb relational store and ciphertext blob store

pub mod api;
pub mod auth;
pub mod bookings;
pub mod config;
pub mod crypto;
pub mod documents;
pub mod error;
pub mod kv;
pub mod notify;
pub mod payments;
pub mod state;
pub mod storage;
