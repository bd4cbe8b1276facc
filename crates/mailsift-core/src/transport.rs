//! Transport seams
//!
//! The learning pipeline and the SRS rewriter talk to their external
//! collaborators through these traits: a pub/sub bus, a content-addressable
//! message cache, and a keyed mapping store with expiry. The production
//! implementations are all backed by the shared Redis client.

use async_trait::async_trait;
use futures_util::StreamExt;
use mailsift_common::{Error, Result};
use mailsift_storage::RedisClient;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Publishes opaque payloads to named channels. Best-effort, at-most-once,
/// no ordering guarantee across channels.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()>;
}

/// Looks up serialized message snapshots by message id
#[async_trait]
pub trait MessageCache: Send + Sync {
    async fn fetch(&self, message_id: &str) -> Result<Option<Vec<u8>>>;
}

/// Keyed string store with per-entry expiry. Writes overwrite
/// unconditionally; colliding keys are last-writer-wins.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

fn transport_err(e: mailsift_storage::RedisError) -> Error {
    Error::Transport(e.to_string())
}

/// Redis-backed pub/sub bus
pub struct RedisBus {
    client: RedisClient,
}

impl RedisBus {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    /// Consume subscribed channels and push payloads into the bounded
    /// queues in `routes`. A full queue blocks this loop, which is the
    /// system's backpressure against an overloaded broker.
    ///
    /// Runs until every queue receiver is gone; a dropped broker
    /// connection is retried with a short sleep.
    pub async fn pump(&self, routes: HashMap<String, mpsc::Sender<Vec<u8>>>) {
        loop {
            let mut pubsub = match self.client.pubsub().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "could not open pub/sub connection, retrying in 5s");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            let mut subscribed = true;
            for channel in routes.keys() {
                if let Err(e) = pubsub.subscribe(channel).await {
                    error!(channel = %channel, error = %e, "could not subscribe, retrying in 5s");
                    subscribed = false;
                    break;
                }
            }
            if !subscribed {
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }

            info!(channels = routes.len(), "subscribed to learning channels");

            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let Some(queue) = routes.get(&channel) else {
                    continue;
                };

                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        error!(channel = %channel, error = %e, "could not read pub/sub payload");
                        continue;
                    }
                };

                if queue.send(payload).await.is_err() {
                    info!(channel = %channel, "queue closed, stopping subscription pump");
                    return;
                }
            }

            warn!("pub/sub stream ended, reconnecting");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

#[async_trait]
impl PubSub for RedisBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        self.client
            .publish(channel, payload)
            .await
            .map_err(transport_err)
    }
}

/// Redis-backed message cache. Message ids are used as keys directly.
pub struct RedisMessageCache {
    client: RedisClient,
}

impl RedisMessageCache {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MessageCache for RedisMessageCache {
    async fn fetch(&self, message_id: &str) -> Result<Option<Vec<u8>>> {
        self.client.get(message_id).await.map_err(transport_err)
    }
}

/// Redis-backed mapping store (SETEX / GET)
pub struct RedisMappingStore {
    client: RedisClient,
}

impl RedisMappingStore {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MappingStore for RedisMappingStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.client
            .set_ex(key, value, ttl.as_secs())
            .await
            .map_err(transport_err)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.client.get(key).await.map_err(transport_err)
    }
}

/// In-process mapping store with lazy expiry. Used by tests and by
/// single-node deployments that run without Redis.
#[derive(Default)]
pub struct MemoryMappingStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let deadline = Instant::now() + ttl;
        self.entries
            .lock()
            .expect("mapping store lock poisoned")
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().expect("mapping store lock poisoned");
        match entries.get(key) {
            Some((_, deadline)) if *deadline <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }
}
