// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key-Value Cache & Scheduler
//!
//! One shared store backs three concerns:
//!
//! | Use | Key | TTL |
//! |-----|-----|-----|
//! | Deletion timers | `doc-delete:{document_id}` | document retention (24h) |
//! | Webhook idempotency | `webhook:{gateway}:{event_id}` | 24h |
//! | Rate limiting | `ratelimit:{scope}:{identity}` | limit window |
//!
//! The store is never authoritative. A marker that expires early only risks
//! reprocessing (guarded by the durable event ledger in the relational
//! store), and a deletion timer that is lost is still caught by the sweep.

use std::time::Duration;

use async_trait::async_trait;

pub mod memory;
pub mod rate_limit;
pub mod redis;

pub use memory::MemoryKv;
pub use rate_limit::{RateDecision, RateLimit, RateLimiter};
pub use redis::RedisKv;

/// Webhook idempotency markers live for 24 hours.
pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("kv store lock poisoned")]
    Poisoned,
}

pub type KvResult<T> = Result<T, KvError>;

/// Ephemeral expiring-key store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Set `key` to `value`, disappearing automatically after `ttl`.
    async fn schedule_expiry(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()>;

    /// Remove `key` before it expires. Returns whether it existed.
    async fn cancel(&self, key: &str) -> KvResult<bool>;

    async fn exists(&self, key: &str) -> KvResult<bool>;

    /// Time left before `key` expires, `None` if absent.
    async fn remaining_ttl(&self, key: &str) -> KvResult<Option<Duration>>;

    /// Atomically increment the counter at `key`. The first increment starts
    /// the `window` TTL; later increments leave it running.
    async fn increment_and_get_count(&self, key: &str, window: Duration) -> KvResult<u64>;

    /// Liveness probe for health checks.
    async fn ping(&self) -> KvResult<()>;
}

/// Deletion timer key for a document.
pub fn deletion_timer_key(document_id: &str) -> String {
    format!("doc-delete:{document_id}")
}

/// Idempotency marker key for a gateway event.
pub fn idempotency_key(gateway: &str, event_id: &str) -> String {
    format!("webhook:{gateway}:{event_id}")
}

/// Rate-limit counter key.
pub fn rate_limit_key(scope: &str, identity: &str) -> String {
    format!("ratelimit:{scope}:{identity}")
}
