// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Redis-backed key-value store, shared by every server instance.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;

use super::{KvResult, KvStore};

/// INCR and start the window on the first hit, in one server-side step.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

#[derive(Clone)]
pub struct RedisKv {
    connection: MultiplexedConnection,
    increment: Script,
}

impl RedisKv {
    /// Connect to the Redis instance at `url`.
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            connection,
            increment: Script::new(INCREMENT_SCRIPT),
        })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisKv {
    async fn schedule_expiry(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        let mut con = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut con)
            .await?;
        Ok(())
    }

    async fn cancel(&self, key: &str) -> KvResult<bool> {
        let mut con = self.connection.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut con).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        let mut con = self.connection.clone();
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut con).await?;
        Ok(count > 0)
    }

    async fn remaining_ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        let mut con = self.connection.clone();
        // -2: absent, -1: no expiry set.
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut con).await?;
        Ok(match millis {
            -2 => None,
            -1 => Some(Duration::MAX),
            ms => Some(Duration::from_millis(ms.max(0) as u64)),
        })
    }

    async fn increment_and_get_count(&self, key: &str, window: Duration) -> KvResult<u64> {
        let mut con = self.connection.clone();
        let count: u64 = self
            .increment
            .key(key)
            .arg(ttl_millis(window))
            .invoke_async(&mut con)
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> KvResult<()> {
        let mut con = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }
}
