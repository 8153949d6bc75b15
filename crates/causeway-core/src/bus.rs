//! Capabilities the relay engine runs against.
//!
//! The engine never speaks a wire protocol itself; it drives these traits,
//! and the adapter crates bind them to real client libraries. Tests bind
//! them to in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;

/// A handle to a provisioned cloud topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicHandle {
    /// Wire topic id (percent-encoded topic name).
    pub id: String,
    /// Fully qualified resource name, e.g. `projects/p/topics/orders%2Fcreated`.
    pub name: String,
}

/// A handle to a provisioned cloud subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    /// Wire topic id this subscription was provisioned under.
    pub id: String,
    /// Fully qualified resource name of the subscription.
    pub name: String,
    /// Fully qualified resource name of the topic it consumes.
    pub topic: String,
}

/// Push delivery configuration for a subscription.
///
/// Passing `None` where a `PushConfig` is accepted selects pull delivery,
/// which is what the relay itself uses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PushConfig {
    /// HTTPS endpoint the cloud bus pushes to.
    pub endpoint: String,
}

/// A message taken off the local bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMessage {
    /// Channel (topic name) the message was published on.
    pub channel: String,
    /// Raw payload bytes.
    pub data: Vec<u8>,
}

/// A message pulled from a cloud subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudMessage {
    /// Opaque token passed back to acknowledge this delivery.
    pub ack_id: String,
    /// Raw payload bytes.
    pub data: Vec<u8>,
}

/// The low-latency colocated bus (Redis in production).
///
/// Delivery is fire-and-forget: a publish reaches whoever is subscribed at
/// that instant and is gone. Receipt order for a single subscriber matches
/// publish order.
#[async_trait]
pub trait LocalBus: Send + Sync {
    /// Publish `data` on `channel`. Returns the number of subscribers that
    /// received it.
    async fn publish(&self, channel: &str, data: &[u8]) -> Result<u64, LocalBusError>;

    /// Subscribe to `channel`; its messages then surface through `recv`.
    async fn subscribe(&self, channel: &str) -> Result<(), LocalBusError>;

    /// Receive the next message from any subscribed channel.
    async fn recv(&self) -> Result<LocalMessage, LocalBusError>;
}

/// The durable remote bus (Google Cloud Pub/Sub in production).
///
/// Resources are project-scoped and survive the process; creation and
/// open-by-name are separate operations so callers can distinguish "made
/// it" from "it was already there". Deliveries are at-least-once and must
/// be acknowledged.
#[async_trait]
pub trait CloudBus: Send + Sync {
    /// Create the topic `id`.
    ///
    /// Fails with [`CloudBusError::AlreadyExists`] when a previous run
    /// created it.
    async fn create_topic(&self, id: &str) -> Result<TopicHandle, CloudBusError>;

    /// Open the existing topic `id` without creating it.
    async fn topic(&self, id: &str) -> Result<TopicHandle, CloudBusError>;

    /// Publish `data` to `topic`. Returns the server-assigned message id.
    async fn publish(&self, topic: &TopicHandle, data: &[u8]) -> Result<String, CloudBusError>;

    /// Create the subscription `id` on `topic` with the given ack deadline.
    /// `push` of `None` selects pull delivery.
    async fn create_subscription(
        &self,
        id: &str,
        topic: &TopicHandle,
        ack_deadline: Duration,
        push: Option<PushConfig>,
    ) -> Result<SubscriptionHandle, CloudBusError>;

    /// Open the existing subscription `id` without creating it.
    async fn subscription(&self, id: &str) -> Result<SubscriptionHandle, CloudBusError>;

    /// Pull the next batch of messages from `subscription`.
    ///
    /// Waits until at least one message is available or the bus chooses to
    /// return an empty batch; repeated calls form the delivery stream.
    /// [`CloudBusError::Closed`] means the stream is exhausted for good.
    async fn pull(
        &self,
        subscription: &SubscriptionHandle,
    ) -> Result<Vec<CloudMessage>, CloudBusError>;

    /// Acknowledge deliveries so they are not redelivered.
    async fn ack(
        &self,
        subscription: &SubscriptionHandle,
        ack_ids: &[String],
    ) -> Result<(), CloudBusError>;
}

/// Errors from the local bus.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LocalBusError {
    /// Connection establishment failed or an established connection broke
    #[error("local bus connection error: {0}")]
    Connection(String),
    /// Publish failed
    #[error("local publish failed: {0}")]
    Publish(String),
    /// Subscribe failed
    #[error("local subscribe failed: {0}")]
    Subscribe(String),
    /// A received payload could not be read as bytes
    #[error("local payload error: {0}")]
    Payload(String),
}

/// Errors from the cloud bus.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CloudBusError {
    /// The resource being created already exists (benign during provisioning)
    #[error("resource already exists: {0}")]
    AlreadyExists(String),
    /// The resource does not exist
    #[error("resource not found: {0}")]
    NotFound(String),
    /// Publish failed
    #[error("cloud publish failed: {0}")]
    Publish(String),
    /// The pull stream is exhausted and will yield nothing further
    #[error("subscription closed: {0}")]
    Closed(String),
    /// Transport-level request failure
    #[error("cloud request failed: {0}")]
    Request(String),
    /// The cloud API rejected a call
    #[error("cloud api error (status {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or status text
        message: String,
    },
}
