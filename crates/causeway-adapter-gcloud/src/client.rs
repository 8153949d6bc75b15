//! HTTP client for the Pub/Sub v1 REST API.
//!
//! Implements the relay's cloud-bus capability directly over REST, so the
//! same code runs against the real service and the emulator.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use causeway_core::{
    CloudBus, CloudBusError, CloudMessage, PushConfig, SubscriptionHandle, TopicHandle,
};
use reqwest::{Client, StatusCode};

use crate::rest;

/// Pub/Sub HTTP client configuration.
#[derive(Debug, Clone)]
pub struct PubsubConfig {
    /// Project all topics and subscriptions live under.
    pub project_id: String,
    /// Base URL of the Pub/Sub API (e.g., <https://pubsub.googleapis.com>)
    pub endpoint: String,
    /// Request timeout for everything except pull
    pub timeout: Duration,
    /// Request timeout for pull, which long-polls on the server
    pub pull_timeout: Duration,
    /// Upper bound on messages returned by a single pull
    pub pull_batch: u32,
    /// Optional bearer token for authentication
    pub bearer_token: Option<String>,
}

impl Default for PubsubConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            endpoint: "https://pubsub.googleapis.com".to_string(),
            timeout: Duration::from_secs(30),
            pull_timeout: Duration::from_secs(90),
            pull_batch: 16,
            bearer_token: None,
        }
    }
}

/// HTTP client for Pub/Sub topic, subscription, publish, pull and
/// acknowledge operations.
pub struct PubsubClient {
    client: Client,
    config: PubsubConfig,
}

impl PubsubClient {
    /// Create a new Pub/Sub client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: PubsubConfig) -> Result<Self, CloudBusError> {
        let mut builder = Client::builder().timeout(config.timeout);

        if config.endpoint.starts_with("https://") {
            builder = builder.use_rustls_tls();
        }

        let client = builder
            .build()
            .map_err(|e| CloudBusError::Request(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Fully qualified topic resource name, carrying the wire id
    /// verbatim. Handles and request bodies use this form; `url` adds
    /// the path escaping.
    fn topic_name(&self, id: &str) -> String {
        format!("projects/{}/topics/{}", self.config.project_id, id)
    }

    /// Fully qualified subscription resource name.
    fn subscription_name(&self, id: &str) -> String {
        format!("projects/{}/subscriptions/{}", self.config.project_id, id)
    }

    /// Request URL for a fully qualified resource name. The API front
    /// end percent-decodes path segments (every escape except `%2F`),
    /// so `%` goes over the wire as `%25` and the server decodes the
    /// segment back to exactly the wire id.
    fn url(&self, resource: &str) -> String {
        format!(
            "{}/v1/{}",
            self.config.endpoint,
            resource.replace('%', "%25")
        )
    }

    /// Build the authorization header if configured.
    fn auth_header(&self) -> Option<String> {
        self.config
            .bearer_token
            .as_ref()
            .map(|t| format!("Bearer {t}"))
    }
}

/// Map a non-success response to the matching bus error.
async fn api_error(response: reqwest::Response, resource: &str) -> CloudBusError {
    match response.status() {
        StatusCode::CONFLICT => CloudBusError::AlreadyExists(resource.to_string()),
        StatusCode::NOT_FOUND => CloudBusError::NotFound(resource.to_string()),
        status => CloudBusError::Api {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        },
    }
}

#[async_trait]
impl CloudBus for PubsubClient {
    async fn create_topic(&self, id: &str) -> Result<TopicHandle, CloudBusError> {
        let name = self.topic_name(id);
        let url = self.url(&name);

        tracing::debug!(url, "PUT topic");

        let mut request = self.client.put(&url).json(&serde_json::json!({}));
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CloudBusError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(response, &name).await);
        }

        let topic: rest::Topic = response
            .json()
            .await
            .map_err(|e| CloudBusError::Request(e.to_string()))?;

        Ok(TopicHandle {
            id: id.to_string(),
            name: topic.name,
        })
    }

    async fn topic(&self, id: &str) -> Result<TopicHandle, CloudBusError> {
        let name = self.topic_name(id);
        let url = self.url(&name);

        tracing::debug!(url, "GET topic");

        let mut request = self.client.get(&url);
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CloudBusError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(response, &name).await);
        }

        let topic: rest::Topic = response
            .json()
            .await
            .map_err(|e| CloudBusError::Request(e.to_string()))?;

        Ok(TopicHandle {
            id: id.to_string(),
            name: topic.name,
        })
    }

    async fn publish(&self, topic: &TopicHandle, data: &[u8]) -> Result<String, CloudBusError> {
        let url = format!("{}:publish", self.url(&topic.name));
        let body = rest::PublishRequest {
            messages: vec![rest::PubsubMessage {
                data: STANDARD.encode(data),
                message_id: None,
            }],
        };

        tracing::debug!(url, "POST publish");

        let mut request = self.client.post(&url).json(&body);
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CloudBusError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(response, &topic.name).await);
        }

        let body: rest::PublishResponse = response
            .json()
            .await
            .map_err(|e| CloudBusError::Request(e.to_string()))?;

        body.message_ids
            .into_iter()
            .next()
            .ok_or_else(|| CloudBusError::Publish("no message id returned".to_string()))
    }

    async fn create_subscription(
        &self,
        id: &str,
        topic: &TopicHandle,
        ack_deadline: Duration,
        push: Option<PushConfig>,
    ) -> Result<SubscriptionHandle, CloudBusError> {
        let name = self.subscription_name(id);
        let url = self.url(&name);
        let body = rest::CreateSubscriptionRequest {
            topic: topic.name.clone(),
            ack_deadline_seconds: i32::try_from(ack_deadline.as_secs()).unwrap_or(600),
            push_config: push.map(|p| rest::PushConfigBody {
                push_endpoint: p.endpoint,
            }),
        };

        tracing::debug!(url, "PUT subscription");

        let mut request = self.client.put(&url).json(&body);
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CloudBusError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(response, &name).await);
        }

        let subscription: rest::Subscription = response
            .json()
            .await
            .map_err(|e| CloudBusError::Request(e.to_string()))?;

        Ok(SubscriptionHandle {
            id: id.to_string(),
            name: subscription.name,
            topic: subscription.topic,
        })
    }

    async fn subscription(&self, id: &str) -> Result<SubscriptionHandle, CloudBusError> {
        let name = self.subscription_name(id);
        let url = self.url(&name);

        tracing::debug!(url, "GET subscription");

        let mut request = self.client.get(&url);
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CloudBusError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(response, &name).await);
        }

        let subscription: rest::Subscription = response
            .json()
            .await
            .map_err(|e| CloudBusError::Request(e.to_string()))?;

        Ok(SubscriptionHandle {
            id: id.to_string(),
            name: subscription.name,
            topic: subscription.topic,
        })
    }

    async fn pull(
        &self,
        subscription: &SubscriptionHandle,
    ) -> Result<Vec<CloudMessage>, CloudBusError> {
        let url = format!("{}:pull", self.url(&subscription.name));
        let body = rest::PullRequest {
            max_messages: self.config.pull_batch,
        };

        tracing::debug!(url, "POST pull");

        let mut request = self
            .client
            .post(&url)
            .timeout(self.config.pull_timeout)
            .json(&body);
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", auth);
        }

        let response = match request.send().await {
            Ok(response) => response,
            // An idle long poll that runs into the client-side timeout
            // is an empty batch, not a dead subscription.
            Err(e) if e.is_timeout() => {
                tracing::debug!(url, "pull timed out with no messages");
                return Ok(Vec::new());
            }
            Err(e) => return Err(CloudBusError::Request(e.to_string())),
        };

        // A deleted subscription ends this pull stream for good.
        if response.status() == StatusCode::NOT_FOUND {
            return Err(CloudBusError::Closed(format!(
                "subscription {} no longer exists",
                subscription.id
            )));
        }

        if !response.status().is_success() {
            return Err(api_error(response, &subscription.name).await);
        }

        let body: rest::PullResponse = response
            .json()
            .await
            .map_err(|e| CloudBusError::Request(e.to_string()))?;

        let mut messages = Vec::with_capacity(body.received_messages.len());
        for received in body.received_messages {
            let data = STANDARD.decode(received.message.data).map_err(|e| {
                CloudBusError::Request(format!("invalid base64 in pulled message: {e}"))
            })?;
            messages.push(CloudMessage {
                ack_id: received.ack_id,
                data,
            });
        }

        tracing::debug!(
            subscription = %subscription.id,
            count = messages.len(),
            "pulled batch"
        );

        Ok(messages)
    }

    async fn ack(
        &self,
        subscription: &SubscriptionHandle,
        ack_ids: &[String],
    ) -> Result<(), CloudBusError> {
        let url = format!("{}:acknowledge", self.url(&subscription.name));
        let body = rest::AcknowledgeRequest {
            ack_ids: ack_ids.to_vec(),
        };

        tracing::debug!(url, count = ack_ids.len(), "POST acknowledge");

        let mut request = self.client.post(&url).json(&body);
        if let Some(auth) = self.auth_header() {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CloudBusError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(response, &subscription.name).await);
        }

        Ok(())
    }
}
