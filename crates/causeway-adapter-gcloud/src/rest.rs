//! Serde bodies for the Pub/Sub v1 REST API.
//!
//! Field names follow the JSON wire form (camelCase). Only the fields the
//! relay touches are modeled; unknown response fields are ignored.

use serde::{Deserialize, Serialize};

/// A message as carried in publish requests and pull responses.
///
/// `data` is base64 in the JSON body. That encoding belongs to the REST
/// transport and is independent of whatever the payload bytes themselves
/// contain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    /// Base64-encoded payload; absent means empty.
    #[serde(default)]
    pub data: String,
    /// Server-assigned id, present on pulled messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Body of `POST …/topics/{id}:publish`.
#[derive(Debug, Clone, Serialize)]
pub struct PublishRequest {
    /// Messages to publish in one call.
    pub messages: Vec<PubsubMessage>,
}

/// Response of `:publish`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    /// Server-assigned ids, one per published message.
    #[serde(default)]
    pub message_ids: Vec<String>,
}

/// A topic resource.
#[derive(Debug, Clone, Deserialize)]
pub struct Topic {
    /// Fully qualified resource name.
    pub name: String,
}

/// Body of `PUT …/subscriptions/{id}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    /// Fully qualified name of the topic to attach to.
    pub topic: String,
    /// Seconds the subscriber has to ack a delivery.
    pub ack_deadline_seconds: i32,
    /// Omitted entirely for pull delivery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_config: Option<PushConfigBody>,
}

/// Push delivery block inside a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushConfigBody {
    /// HTTPS endpoint deliveries are pushed to.
    pub push_endpoint: String,
}

/// A subscription resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Fully qualified resource name.
    pub name: String,
    /// Fully qualified name of the topic it consumes.
    pub topic: String,
}

/// Body of `POST …/subscriptions/{id}:pull`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Upper bound on the batch size returned.
    pub max_messages: u32,
}

/// Response of `:pull`. Empty when nothing was ready before the server
/// gave up waiting.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Deliveries in this batch.
    #[serde(default)]
    pub received_messages: Vec<ReceivedMessage>,
}

/// One delivery in a pull response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    /// Token passed back to `:acknowledge`.
    pub ack_id: String,
    /// The message itself.
    pub message: PubsubMessage,
}

/// Body of `POST …/subscriptions/{id}:acknowledge`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    /// Tokens of the deliveries being settled.
    pub ack_ids: Vec<String>,
}
