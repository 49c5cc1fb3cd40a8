//! Redis connections: one shared publish connection and dedicated subscriber connections.

use crate::error::{AppError, AppResult};
use redis::aio::{ConnectionManager, ConnectionManagerConfig, PubSub};
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Reconnect delays grow 100, 200, 400 ms ... and stop growing at 2 s.
const RETRY_FACTOR_MS: u64 = 50;
const RETRY_MAX_DELAY_MS: u64 = 2_000;
const CONNECT_RETRIES: usize = 3;

/// Redis-backed repository: PUBLISH over a shared connection, SUBSCRIBE over dedicated ones.
pub struct RedisRepository {
    client: redis::Client,
    connect_retries: usize,
    publisher: OnceCell<ConnectionManager>,
}

impl RedisRepository {
    /// Create repository from Redis URL. Does not connect yet.
    pub fn new(redis_url: &str) -> Result<Self, AppError> {
        Self::with_retries(redis_url, CONNECT_RETRIES)
    }

    /// Like [`new`](Self::new) with an explicit number of retries per connect attempt.
    pub fn with_retries(redis_url: &str, connect_retries: usize) -> Result<Self, AppError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            connect_retries,
            publisher: OnceCell::new(),
        })
    }

    fn manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_exponent_base(2)
            .set_factor(RETRY_FACTOR_MS)
            .set_max_delay(RETRY_MAX_DELAY_MS)
            .set_number_of_retries(self.connect_retries)
            .set_connection_timeout(CONNECT_TIMEOUT)
    }

    /// The shared publish connection. Opened on first use; a failed open is retried
    /// on the next call. Once open, the manager reconnects on its own after drops.
    async fn publish_connection(&self) -> AppResult<ConnectionManager> {
        let manager = self
            .publisher
            .get_or_try_init(|| async {
                let manager = self
                    .client
                    .get_connection_manager_with_config(self.manager_config())
                    .await?;
                info!("redis publisher connected");
                Ok::<_, AppError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }

    /// Publish a message to a channel (Redis PUBLISH). Returns the receiver count.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<u64, AppError> {
        let mut conn = self.publish_connection().await?;
        let count: u64 = conn.publish(channel, message).await?;
        debug!(channel = %channel, count, "published");
        Ok(count)
    }

    /// Open a dedicated connection in subscriber mode. It cannot issue other commands.
    pub async fn subscriber(&self) -> Result<PubSub, AppError> {
        tokio::time::timeout(CONNECT_TIMEOUT, self.client.get_async_pubsub())
            .await
            .map_err(|_| AppError::Timeout("redis subscriber connect".to_string()))?
            .map_err(AppError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_url() {
        assert!(RedisRepository::new("not a url").is_err());
    }

    #[tokio::test]
    async fn unreachable_redis_fails_publish_and_retries_on_next_call() {
        // Port 1 on localhost refuses connections.
        let repo = RedisRepository::with_retries("redis://127.0.0.1:1/", 0).unwrap();
        assert!(matches!(
            repo.publish("recipe:created", "{}").await,
            Err(AppError::Redis(_))
        ));
        assert!(repo.publisher.get().is_none());
        assert!(repo.publish("recipe:created", "{}").await.is_err());
    }
}
