//! Idempotent provisioning of cloud topics and subscriptions.
//!
//! Create-then-open: try to create, and when the resource is left over from
//! a previous run, open it by name instead. Both paths return the same
//! handle; any other failure aborts startup and is never retried here.

use std::time::Duration;

use tracing::{debug, info};

use causeway_proto::encode_topic_id;

use crate::bus::{CloudBus, CloudBusError, PushConfig, SubscriptionHandle, TopicHandle};

/// Ack deadline applied to subscriptions unless configured otherwise.
pub const DEFAULT_ACK_DEADLINE: Duration = Duration::from_secs(10);

/// Ensure the cloud topic for the topic name `name` exists.
///
/// The wire id is derived from `name`; creating and opening an existing
/// topic are indistinguishable to the caller.
///
/// # Errors
///
/// Returns [`ProvisionError::Topic`] if the topic can neither be created
/// nor opened.
pub async fn ensure_topic<C: CloudBus>(cloud: &C, name: &str) -> Result<TopicHandle, ProvisionError> {
    let id = encode_topic_id(name);
    match cloud.create_topic(&id).await {
        Ok(handle) => {
            info!(topic = %name, id = %handle.id, "created cloud topic");
            Ok(handle)
        }
        Err(CloudBusError::AlreadyExists(_)) => {
            let handle = cloud.topic(&id).await.map_err(|e| ProvisionError::Topic {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
            debug!(topic = %name, id = %handle.id, "cloud topic already provisioned");
            Ok(handle)
        }
        Err(e) => Err(ProvisionError::Topic {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Ensure the cloud subscription for the topic name `name` exists on
/// `topic`.
///
/// `push` of `None` selects pull delivery, which is what the relay uses for
/// itself.
///
/// # Errors
///
/// Returns [`ProvisionError::Subscription`] if the subscription can neither
/// be created nor opened.
pub async fn ensure_subscription<C: CloudBus>(
    cloud: &C,
    name: &str,
    topic: &TopicHandle,
    ack_deadline: Duration,
    push: Option<PushConfig>,
) -> Result<SubscriptionHandle, ProvisionError> {
    let id = encode_topic_id(name);
    match cloud.create_subscription(&id, topic, ack_deadline, push).await {
        Ok(handle) => {
            info!(subscription = %name, id = %handle.id, "created cloud subscription");
            Ok(handle)
        }
        Err(CloudBusError::AlreadyExists(_)) => {
            let handle = cloud
                .subscription(&id)
                .await
                .map_err(|e| ProvisionError::Subscription {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            debug!(subscription = %name, id = %handle.id, "cloud subscription already provisioned");
            Ok(handle)
        }
        Err(e) => Err(ProvisionError::Subscription {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Errors raised while provisioning cloud resources. Always fatal to
/// startup.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisionError {
    /// Topic could neither be created nor opened
    #[error("provisioning topic '{name}' failed: {reason}")]
    Topic {
        /// Topic name as configured
        name: String,
        /// Underlying cloud bus error
        reason: String,
    },
    /// Subscription could neither be created nor opened
    #[error("provisioning subscription '{name}' failed: {reason}")]
    Subscription {
        /// Topic name as configured
        name: String,
        /// Underlying cloud bus error
        reason: String,
    },
}
