//! Redis client implementation with connection management

use crate::Result;
use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;

/// Redis client with automatic reconnection.
///
/// The connection manager is cheap to clone and safe to share across tasks;
/// every Mailsift subsystem (bus, cache, mapping store) holds a clone of the
/// same client.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisClient {
    /// Connect to a Redis server
    ///
    /// Supports both redis:// and rediss:// (TLS) URLs
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn })
    }

    /// GET - Get value by key
    pub async fn get<T: redis::FromRedisValue>(&self, key: &str) -> Result<Option<T>> {
        self.conn.clone().get(key).await
    }

    /// SETEX - Set key with expiry in seconds
    pub async fn set_ex<V>(&self, key: &str, value: V, seconds: u64) -> Result<()>
    where
        V: redis::ToRedisArgs + Send + Sync,
    {
        self.conn.clone().set_ex(key, value, seconds).await
    }

    /// PUBLISH - Publish a payload to a channel
    pub async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        self.conn.clone().publish(channel, payload).await
    }

    /// Open a dedicated pub/sub connection.
    ///
    /// Subscriptions cannot be multiplexed over the shared connection
    /// manager, so each consumer loop gets its own connection.
    pub async fn pubsub(&self) -> Result<PubSub> {
        self.client.get_async_pubsub().await
    }
}
