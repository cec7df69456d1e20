// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! The core never resolves sessions on its own: handlers extract a
//! [`Caller`] and pass it explicitly to every operation.
//!
//! ## Auth Flow
//!
//! 1. The web frontend signs an HS256 session token (`SESSION_JWT_SECRET`)
//! 2. Clients send `Authorization: Bearer <token>`
//! 3. [`Auth`] verifies signature and expiry and extracts:
//!    - `sub` → `user_id`
//!    - `role` → [`Role`] (defaults to `user`)
//!
//! Admin-only routes use [`AdminOnly`] (403 for non-admins). Scheduled jobs
//! use [`CronAuth`], a constant-time shared-secret check.

pub mod claims;
pub mod error;
pub mod extractor;
pub mod roles;

pub use claims::{sign_session_token, Caller, SessionClaims};
pub use error::AuthError;
pub use extractor::{AdminOnly, Auth, AuthConfig, CronAuth};
pub use roles::Role;
