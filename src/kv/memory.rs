// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process LRU-backed key-value store.
//!
//! Used when no `REDIS_URL` is configured (single instance deployments and
//! tests). Expired entries are dropped lazily on access; the LRU bound keeps
//! memory flat if timers are never read again.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;

use super::{KvError, KvResult, KvStore};

const DEFAULT_CAPACITY: usize = 100_000;

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process expiring-key store.
pub struct MemoryKv {
    entries: Mutex<LruCache<String, Entry>>,
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MemoryKv {
    /// Create a store holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut LruCache<String, Entry>) -> T) -> KvResult<T> {
        let mut entries = self.entries.lock().map_err(|_| KvError::Poisoned)?;
        Ok(f(&mut entries))
    }
}

/// Look up a live entry, evicting it if it has expired.
fn live<'a>(entries: &'a mut LruCache<String, Entry>, key: &str, now: Instant) -> Option<&'a mut Entry> {
    let expired = match entries.peek(key) {
        Some(entry) => !entry.is_live(now),
        None => return None,
    };
    if expired {
        entries.pop(key);
        return None;
    }
    entries.get_mut(key)
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn schedule_expiry(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        self.with_entries(|entries| {
            entries.put(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: Instant::now() + ttl,
                },
            );
        })
    }

    async fn cancel(&self, key: &str) -> KvResult<bool> {
        self.with_entries(|entries| {
            let now = Instant::now();
            entries.pop(key).is_some_and(|entry| entry.is_live(now))
        })
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        self.with_entries(|entries| live(entries, key, Instant::now()).is_some())
    }

    async fn remaining_ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        self.with_entries(|entries| {
            let now = Instant::now();
            live(entries, key, now).map(|entry| entry.expires_at.saturating_duration_since(now))
        })
    }

    async fn increment_and_get_count(&self, key: &str, window: Duration) -> KvResult<u64> {
        self.with_entries(|entries| {
            let now = Instant::now();
            if let Some(entry) = live(entries, key, now) {
                let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
                entry.value = count.to_string();
                return count;
            }
            entries.put(
                key.to_string(),
                Entry {
                    value: "1".to_string(),
                    expires_at: now + window,
                },
            );
            1
        })
    }

    async fn ping(&self) -> KvResult<()> {
        self.with_entries(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scheduled_key_exists_until_cancelled() {
        let kv = MemoryKv::default();
        kv.schedule_expiry("doc-delete:1", "1", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(kv.exists("doc-delete:1").await.unwrap());

        assert!(kv.cancel("doc-delete:1").await.unwrap());
        assert!(!kv.exists("doc-delete:1").await.unwrap());
        assert!(!kv.cancel("doc-delete:1").await.unwrap());
    }

    #[tokio::test]
    async fn keys_expire_after_ttl() {
        let kv = MemoryKv::default();
        kv.schedule_expiry("k", "v", Duration::from_millis(1))
            .await
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!kv.exists("k").await.unwrap());
        assert_eq!(kv.remaining_ttl("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remaining_ttl_counts_down() {
        let kv = MemoryKv::default();
        assert_eq!(kv.remaining_ttl("absent").await.unwrap(), None);

        kv.schedule_expiry("k", "v", Duration::from_secs(100))
            .await
            .unwrap();
        let ttl = kv.remaining_ttl("k").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(100));
        assert!(ttl > Duration::from_secs(98));
    }

    #[tokio::test]
    async fn increment_starts_window_on_first_hit() {
        let kv = MemoryKv::default();
        let window = Duration::from_secs(60);
        assert_eq!(kv.increment_and_get_count("c", window).await.unwrap(), 1);
        assert_eq!(kv.increment_and_get_count("c", window).await.unwrap(), 2);
        assert_eq!(kv.increment_and_get_count("c", window).await.unwrap(), 3);
        assert!(kv.remaining_ttl("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn counter_resets_after_window() {
        let kv = MemoryKv::default();
        let window = Duration::from_millis(1);
        assert_eq!(kv.increment_and_get_count("c", window).await.unwrap(), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(kv.increment_and_get_count("c", window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let kv = std::sync::Arc::new(MemoryKv::default());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let kv = kv.clone();
            handles.push(tokio::spawn(async move {
                kv.increment_and_get_count("shared", Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }
        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=50).collect::<Vec<u64>>());
    }
}
