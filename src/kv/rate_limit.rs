// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixed-window rate limiting over the shared KV store.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::{rate_limit_key, KvStore};

/// A named limit: at most `max` hits per `window`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub scope: &'static str,
    pub max: u64,
    pub window: Duration,
}

impl RateLimit {
    pub const PAYMENT_CREATE: RateLimit = RateLimit {
        scope: "payment-create",
        max: 5,
        window: Duration::from_secs(60),
    };

    pub const DOCUMENT_UPLOAD: RateLimit = RateLimit {
        scope: "document-upload",
        max: 20,
        window: Duration::from_secs(60 * 60),
    };
}

/// Outcome of a limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Count one hit for `identity` against `limit`.
    ///
    /// A KV outage fails open: requests are allowed and the error is logged.
    pub async fn check(&self, limit: RateLimit, identity: &str) -> RateDecision {
        let key = rate_limit_key(limit.scope, identity);
        let count = match self.kv.increment_and_get_count(&key, limit.window).await {
            Ok(count) => count,
            Err(e) => {
                warn!(scope = limit.scope, error = %e, "rate limiter unavailable, allowing request");
                return RateDecision::Allowed;
            }
        };

        if count <= limit.max {
            return RateDecision::Allowed;
        }

        let retry_after = self
            .kv
            .remaining_ttl(&key)
            .await
            .ok()
            .flatten()
            .filter(|ttl| *ttl < Duration::MAX)
            .unwrap_or(limit.window);
        RateDecision::Limited { retry_after }
    }
}
