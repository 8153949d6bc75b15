//! Shared registry of provisioned cloud resources.
//!
//! Filled once during startup under the write lock, then read-locked by
//! every publish lookup. Handles are cloned out, so no guard ever lives
//! across an `.await`.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::bus::{SubscriptionHandle, TopicHandle};

/// Registry of provisioned topics and subscriptions, keyed by wire topic id.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    topics: HashMap<String, TopicHandle>,
    subscriptions: HashMap<String, SubscriptionHandle>,
}

impl TopicRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a provisioned topic under its wire id.
    ///
    /// Registering the same id twice keeps the latest handle; both refer to
    /// the same cloud resource.
    pub fn insert_topic(&self, handle: TopicHandle) {
        self.inner.write().topics.insert(handle.id.clone(), handle);
    }

    /// Record a provisioned subscription under its wire id.
    pub fn insert_subscription(&self, handle: SubscriptionHandle) {
        self.inner
            .write()
            .subscriptions
            .insert(handle.id.clone(), handle);
    }

    /// Look up the topic provisioned under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownTopic`] if the id was never
    /// provisioned.
    pub fn topic(&self, id: &str) -> Result<TopicHandle, RegistryError> {
        self.inner
            .read()
            .topics
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTopic(id.to_string()))
    }

    /// Look up the subscription provisioned under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownSubscription`] if the id was never
    /// provisioned.
    pub fn subscription(&self, id: &str) -> Result<SubscriptionHandle, RegistryError> {
        self.inner
            .read()
            .subscriptions
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownSubscription(id.to_string()))
    }

    /// Snapshot of every provisioned topic id, sorted for deterministic
    /// iteration.
    #[must_use]
    pub fn topic_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().topics.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of every provisioned subscription, sorted by wire id.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionHandle> {
        let mut subs: Vec<SubscriptionHandle> =
            self.inner.read().subscriptions.values().cloned().collect();
        subs.sort_by(|a, b| a.id.cmp(&b.id));
        subs
    }
}

/// Errors from registry lookups.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// No topic provisioned under this wire id
    #[error("topic not registered: {0}")]
    UnknownTopic(String),
    /// No subscription provisioned under this wire id
    #[error("subscription not registered: {0}")]
    UnknownSubscription(String),
}
