//! `LocalBus` over Redis pub/sub.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::Mutex;
use tracing::debug;

use causeway_core::{LocalBus, LocalBusError, LocalMessage};

/// A Redis-backed local bus.
///
/// Holds two connections: an auto-reconnecting one for PUBLISH and a
/// dedicated one for SUBSCRIBE, because a Redis connection in subscriber
/// mode cannot issue regular commands.
pub struct RedisBus {
    publish: ConnectionManager,
    pubsub: Mutex<redis::aio::PubSub>,
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus").finish_non_exhaustive()
    }
}

impl RedisBus {
    /// Connect to the Redis server at `uri` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`LocalBusError::Connection`] if the URI is invalid or
    /// either connection cannot be established.
    pub async fn connect(uri: &str) -> Result<Self, LocalBusError> {
        let client = Client::open(uri).map_err(|e| LocalBusError::Connection(e.to_string()))?;
        let publish = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| LocalBusError::Connection(e.to_string()))?;
        let pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| LocalBusError::Connection(e.to_string()))?;

        Ok(Self {
            publish,
            pubsub: Mutex::new(pubsub),
        })
    }
}

#[async_trait]
impl LocalBus for RedisBus {
    async fn publish(&self, channel: &str, data: &[u8]) -> Result<u64, LocalBusError> {
        // ConnectionManager is a cheap handle; commands need it mutable.
        let mut conn = self.publish.clone();
        let receivers: u64 = conn
            .publish(channel, data)
            .await
            .map_err(|e| LocalBusError::Publish(e.to_string()))?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<(), LocalBusError> {
        self.pubsub
            .lock()
            .await
            .subscribe(channel)
            .await
            .map_err(|e| LocalBusError::Subscribe(e.to_string()))?;
        debug!(channel = %channel, "subscribed redis channel");
        Ok(())
    }

    async fn recv(&self) -> Result<LocalMessage, LocalBusError> {
        let mut pubsub = self.pubsub.lock().await;
        // Messages arriving while nobody polls are buffered inside the
        // connection, so re-creating the stream per call loses nothing.
        let message = pubsub
            .on_message()
            .next()
            .await
            .ok_or_else(|| LocalBusError::Connection("subscription stream ended".to_string()))?;

        let channel = message.get_channel_name().to_string();
        let data: Vec<u8> = message
            .get_payload()
            .map_err(|e| LocalBusError::Payload(e.to_string()))?;
        Ok(LocalMessage { channel, data })
    }
}
