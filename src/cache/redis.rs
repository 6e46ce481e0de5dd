//! Redis-backed [`SharedCache`].

use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use std::time::Duration;
use tracing::{Instrument, info_span};

use super::{CacheError, CounterCommit, CounterWrite, Publish, SharedCache, ttl_seconds};

#[derive(Clone)]
pub struct RedisCache {
    client: Client,
    conn: MultiplexedConnection,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Open the client and a shared multiplexed connection for plain commands.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, conn })
    }
}

impl SharedCache for RedisCache {
    async fn update_counter<F>(
        &self,
        key: &str,
        decide: F,
    ) -> Result<Option<CounterCommit>, CacheError>
    where
        F: FnOnce(u64) -> CounterWrite + Send,
    {
        // WATCH state lives on the connection, so the shared multiplexed
        // connection must not be used here.
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let span = info_span!(
            "cache.command",
            cache.system = "redis",
            cache.operation = "WATCH"
        );
        let _: () = redis::cmd("WATCH")
            .arg(key)
            .query_async(&mut conn)
            .instrument(span)
            .await?;

        let span = info_span!(
            "cache.command",
            cache.system = "redis",
            cache.operation = "GET"
        );
        let current: Option<u64> = conn.get(key).instrument(span).await?;
        let previous = current.unwrap_or(0);
        let write = decide(previous);

        let mut pipe = redis::pipe();
        pipe.atomic();
        match write {
            CounterWrite::Increment { ttl } => {
                pipe.incr(key, 1_u64);
                if let Some(ttl) = ttl {
                    pipe.expire(key, expire_arg(ttl));
                }
            }
            CounterWrite::Extend { ttl } => {
                pipe.expire(key, expire_arg(ttl));
            }
        }

        let span = info_span!(
            "cache.command",
            cache.system = "redis",
            cache.operation = "EXEC"
        );
        // EXEC replies nil when a watched key was modified.
        let reply: Option<Vec<redis::Value>> = pipe.query_async(&mut conn).instrument(span).await?;

        Ok(reply.map(|_| CounterCommit { previous, write }))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let span = info_span!(
            "cache.command",
            cache.system = "redis",
            cache.operation = "DEL"
        );
        let _: () = conn.del(key).instrument(span).await?;
        Ok(())
    }

    async fn set_all_if_newer(
        &self,
        generation_key: &str,
        generation: u64,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<Option<Publish>, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let span = info_span!(
            "cache.command",
            cache.system = "redis",
            cache.operation = "WATCH"
        );
        let _: () = redis::cmd("WATCH")
            .arg(generation_key)
            .query_async(&mut conn)
            .instrument(span)
            .await?;

        let span = info_span!(
            "cache.command",
            cache.system = "redis",
            cache.operation = "GET"
        );
        let current: Option<u64> = conn.get(generation_key).instrument(span).await?;
        if let Some(current) = current.filter(|current| *current >= generation) {
            let _: () = redis::cmd("UNWATCH").query_async(&mut conn).await?;
            return Ok(Some(Publish::Stale { current }));
        }

        let seconds = ttl_seconds(ttl);
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set_ex(generation_key, generation, seconds);
        for (key, value) in entries {
            pipe.set_ex(key, value, seconds);
        }

        let span = info_span!(
            "cache.command",
            cache.system = "redis",
            cache.operation = "EXEC"
        );
        let reply: Option<Vec<redis::Value>> = pipe.query_async(&mut conn).instrument(span).await?;

        Ok(reply.map(|_| Publish::Written))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let span = info_span!(
            "cache.command",
            cache.system = "redis",
            cache.operation = "GET"
        );
        let value: Option<String> = conn.get(key).instrument(span).await?;
        Ok(value)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let span = info_span!(
            "cache.command",
            cache.system = "redis",
            cache.operation = "PING"
        );
        let _: () = redis::cmd("PING")
            .query_async(&mut conn)
            .instrument(span)
            .await?;
        Ok(())
    }
}

fn expire_arg(ttl: Duration) -> i64 {
    i64::try_from(ttl_seconds(ttl)).unwrap_or(i64::MAX)
}
