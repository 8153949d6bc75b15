//! The bidirectional relay engine.
//!
//! One engine owns both buses and the registry. Startup provisions every
//! configured topic, subscribes the local bus, then spawns one pump per
//! direction-and-subscription. Pumps run until a fatal error or until the
//! shutdown token fires; the engine supervises their exits and joins them
//! all before returning.
//!
//! Loop prevention: a payload crossing the bridge is wrapped with the
//! origin of the bus it came from, and each pump drops messages already
//! tagged with the origin it would assign. A message crosses the bridge at
//! most once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use causeway_proto::{decode_topic_id, encode_topic_id, Envelope, EnvelopeError, Origin};

use crate::bus::{CloudBus, CloudBusError, LocalBus, SubscriptionHandle};
use crate::provision::{ensure_subscription, ensure_topic};
use crate::registry::TopicRegistry;

/// Errors that terminate the relay or one of its pump tasks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    /// Startup provisioning failed
    #[error(transparent)]
    Provision(#[from] crate::provision::ProvisionError),
    /// The local bus failed in a way the relay cannot continue from
    #[error(transparent)]
    LocalBus(#[from] crate::bus::LocalBusError),
    /// The cloud bus failed in a way the owning pump cannot continue from
    #[error(transparent)]
    CloudBus(#[from] CloudBusError),
    /// A message arrived on a channel with no provisioned topic
    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),
    /// A provisioned wire id failed to decode back to a channel name
    #[error("topic id decode failed: {0}")]
    TopicId(String),
}

/// The relay engine, generic over the two bus capabilities.
pub struct RelayEngine<L, C> {
    local: Arc<L>,
    cloud: Arc<C>,
    registry: Arc<TopicRegistry>,
    topics: Vec<String>,
    ack_deadline: Duration,
}

impl<L, C> RelayEngine<L, C>
where
    L: LocalBus + 'static,
    C: CloudBus + 'static,
{
    /// Create an engine relaying `topics` between the two buses.
    #[must_use]
    pub fn new(local: Arc<L>, cloud: Arc<C>, topics: Vec<String>, ack_deadline: Duration) -> Self {
        Self {
            local,
            cloud,
            registry: Arc::new(TopicRegistry::new()),
            topics,
            ack_deadline,
        }
    }

    /// The registry of provisioned resources, shared with the pumps and
    /// populated by `init`.
    #[must_use]
    pub fn registry(&self) -> Arc<TopicRegistry> {
        Arc::clone(&self.registry)
    }

    /// Provision every configured topic and its subscription, filling the
    /// registry.
    ///
    /// # Errors
    ///
    /// Returns the first resource that can neither be created nor opened;
    /// nothing is retried.
    pub async fn init(&self) -> Result<(), RelayError> {
        for name in &self.topics {
            let topic = ensure_topic(self.cloud.as_ref(), name).await?;
            let subscription =
                ensure_subscription(self.cloud.as_ref(), name, &topic, self.ack_deadline, None)
                    .await?;
            self.registry.insert_topic(topic);
            self.registry.insert_subscription(subscription);
        }
        info!(topics = self.topics.len(), "provisioned cloud resources");
        Ok(())
    }

    /// Subscribe the local bus to every provisioned topic.
    ///
    /// Channel names come from decoding the registry's wire ids, so local
    /// subscriptions always match what was provisioned.
    ///
    /// # Errors
    ///
    /// Returns an error if an id fails to decode or a subscribe fails; both
    /// are fatal to startup.
    pub async fn subscribe_local(&self) -> Result<(), RelayError> {
        for id in self.registry.topic_ids() {
            let channel = decode_topic_id(&id).map_err(|e| RelayError::TopicId(e.to_string()))?;
            self.local.subscribe(&channel).await?;
            debug!(channel = %channel, "subscribed local bus");
        }
        Ok(())
    }

    /// Run the relay until `shutdown` fires or a fatal error occurs.
    ///
    /// Spawns the single local→cloud pump and one cloud→local pump per
    /// provisioned subscription, then supervises them. A fatal exit of the
    /// local→cloud pump cancels the remaining pumps and is returned once
    /// they are joined; a cloud→local pump failure is logged and its
    /// siblings keep running.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: provisioning, local subscription, or
    /// a fatal local→cloud pump exit.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), RelayError> {
        self.init().await?;
        self.subscribe_local().await?;

        let subscriptions = self.registry.subscriptions();
        let (exit_tx, mut exit_rx) = mpsc::channel::<PumpExit>(subscriptions.len() + 1);
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(subscriptions.len() + 1);

        for subscription in subscriptions {
            let local = Arc::clone(&self.local);
            let cloud = Arc::clone(&self.cloud);
            let token = shutdown.clone();
            let tx = exit_tx.clone();
            handles.push(tokio::spawn(async move {
                let id = subscription.id.clone();
                let result = pump_cloud_to_local(local, cloud, subscription, token).await;
                let _ = tx
                    .send(PumpExit::CloudToLocal {
                        subscription: id,
                        result,
                    })
                    .await;
            }));
        }

        {
            let local = Arc::clone(&self.local);
            let cloud = Arc::clone(&self.cloud);
            let registry = Arc::clone(&self.registry);
            let token = shutdown.clone();
            let tx = exit_tx.clone();
            handles.push(tokio::spawn(async move {
                let result = pump_local_to_cloud(local, cloud, registry, token).await;
                let _ = tx.send(PumpExit::LocalToCloud(result)).await;
            }));
        }
        drop(exit_tx);

        info!(pumps = handles.len(), "relay running");

        let mut fatal: Option<RelayError> = None;
        while let Some(exit) = exit_rx.recv().await {
            match exit {
                PumpExit::CloudToLocal {
                    subscription,
                    result,
                } => match result {
                    Ok(()) => debug!(subscription = %subscription, "cloud pump stopped"),
                    Err(e) => {
                        error!(
                            subscription = %subscription,
                            error = %e,
                            "cloud pump failed; other subscriptions unaffected"
                        );
                    }
                },
                PumpExit::LocalToCloud(Ok(())) => debug!("local pump stopped"),
                PumpExit::LocalToCloud(Err(e)) => {
                    error!(error = %e, "local pump failed; shutting relay down");
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                    shutdown.cancel();
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }
        info!("relay stopped");

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

enum PumpExit {
    LocalToCloud(Result<(), RelayError>),
    CloudToLocal {
        subscription: String,
        result: Result<(), RelayError>,
    },
}

/// Re-wrap a payload for the outgoing direction: a decodable envelope
/// contributes its inner payload, anything else contributes itself.
/// Envelopes never nest.
fn wrap_payload(data: Vec<u8>, origin: Origin) -> Result<Vec<u8>, EnvelopeError> {
    let payload = match Envelope::from_bytes(&data) {
        Ok(envelope) => envelope.payload,
        Err(_) => data,
    };
    Envelope::new(payload, origin).to_bytes()
}

/// The single local→cloud pump.
///
/// Receive, lookup, and publish failures all end the pump: there is one
/// ordered stream from the local bus, and relaying it out of order is worse
/// than not relaying at all.
async fn pump_local_to_cloud<L, C>(
    local: Arc<L>,
    cloud: Arc<C>,
    registry: Arc<TopicRegistry>,
    shutdown: CancellationToken,
) -> Result<(), RelayError>
where
    L: LocalBus,
    C: CloudBus,
{
    loop {
        let message = tokio::select! {
            received = local.recv() => received?,
            _ = shutdown.cancelled() => return Ok(()),
        };

        if Envelope::origin_of(&message.data) == Some(Origin::Cloud) {
            debug!(channel = %message.channel, "dropping cloud-originated message");
            continue;
        }

        let envelope = match wrap_payload(message.data, Origin::Local) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(channel = %message.channel, error = %e, "skipping message that failed to wrap");
                continue;
            }
        };

        let topic = registry.topic(&encode_topic_id(&message.channel))?;
        let message_id = cloud.publish(&topic, &envelope).await?;
        debug!(channel = %message.channel, message_id = %message_id, "relayed local message to cloud");
    }
}

/// A cloud→local pump; one runs per subscription.
///
/// Local-tagged messages are dropped but acked so the cloud stops
/// redelivering them. Everything else is re-wrapped as cloud-originated and
/// published locally, and acked only after that publish succeeds; a failed
/// publish leaves the message to come back. Pull failures end this pump
/// only.
async fn pump_cloud_to_local<L, C>(
    local: Arc<L>,
    cloud: Arc<C>,
    subscription: SubscriptionHandle,
    shutdown: CancellationToken,
) -> Result<(), RelayError>
where
    L: LocalBus,
    C: CloudBus,
{
    let channel =
        decode_topic_id(&subscription.id).map_err(|e| RelayError::TopicId(e.to_string()))?;

    loop {
        let batch = tokio::select! {
            pulled = cloud.pull(&subscription) => match pulled {
                Ok(batch) => batch,
                Err(CloudBusError::Closed(reason)) => {
                    info!(subscription = %subscription.id, reason = %reason, "subscription closed");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            },
            _ = shutdown.cancelled() => return Ok(()),
        };

        for message in batch {
            if Envelope::origin_of(&message.data) == Some(Origin::Local) {
                // Our own relayed message coming back around.
                debug!(channel = %channel, "dropping local-originated message");
                ack_one(cloud.as_ref(), &subscription, message.ack_id).await;
                continue;
            }

            let envelope = match wrap_payload(message.data, Origin::Cloud) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(channel = %channel, error = %e, "skipping message that failed to wrap");
                    continue;
                }
            };

            match local.publish(&channel, &envelope).await {
                Ok(receivers) => {
                    debug!(channel = %channel, receivers, "relayed cloud message to local");
                    ack_one(cloud.as_ref(), &subscription, message.ack_id).await;
                }
                Err(e) => {
                    // Unacked on purpose: the cloud redelivers after the
                    // ack deadline.
                    warn!(channel = %channel, error = %e, "local publish failed; leaving message unacked");
                }
            }
        }
    }
}

/// Ack failures are logged, not propagated: the worst case is a redelivery,
/// which loop prevention already tolerates.
async fn ack_one<C: CloudBus>(cloud: &C, subscription: &SubscriptionHandle, ack_id: String) {
    if let Err(e) = cloud.ack(subscription, &[ack_id]).await {
        warn!(subscription = %subscription.id, error = %e, "ack failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::time::Instant;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    use crate::bus::{CloudMessage, LocalBusError, LocalMessage, PushConfig, TopicHandle};
    use crate::provision::DEFAULT_ACK_DEADLINE;

    /// Local bus fake: publishes are recorded, and received messages are
    /// fed in by the test through an unbounded channel.
    struct FakeLocal {
        published: Mutex<Vec<LocalMessage>>,
        publish_attempts: Mutex<u32>,
        subscribed: Mutex<Vec<String>>,
        fail_publish: Mutex<bool>,
        incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<LocalMessage>>,
    }

    impl FakeLocal {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<LocalMessage>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let bus = Arc::new(Self {
                published: Mutex::new(Vec::new()),
                publish_attempts: Mutex::new(0),
                subscribed: Mutex::new(Vec::new()),
                fail_publish: Mutex::new(false),
                incoming: tokio::sync::Mutex::new(rx),
            });
            (bus, tx)
        }

        fn published(&self) -> Vec<LocalMessage> {
            self.published.lock().clone()
        }

        fn set_fail_publish(&self, fail: bool) {
            *self.fail_publish.lock() = fail;
        }
    }

    #[async_trait]
    impl LocalBus for FakeLocal {
        async fn publish(&self, channel: &str, data: &[u8]) -> Result<u64, LocalBusError> {
            *self.publish_attempts.lock() += 1;
            if *self.fail_publish.lock() {
                return Err(LocalBusError::Publish("injected".to_string()));
            }
            self.published.lock().push(LocalMessage {
                channel: channel.to_string(),
                data: data.to_vec(),
            });
            Ok(1)
        }

        async fn subscribe(&self, channel: &str) -> Result<(), LocalBusError> {
            self.subscribed.lock().push(channel.to_string());
            Ok(())
        }

        async fn recv(&self) -> Result<LocalMessage, LocalBusError> {
            let mut incoming = self.incoming.lock().await;
            incoming
                .recv()
                .await
                .ok_or_else(|| LocalBusError::Connection("feed closed".to_string()))
        }
    }

    #[derive(Default)]
    struct CloudState {
        topics: HashMap<String, TopicHandle>,
        subscriptions: HashMap<String, SubscriptionHandle>,
        deadlines: HashMap<String, Duration>,
        /// Undelivered-or-unacked messages per subscription id. Pull
        /// returns them all without removing; ack removes. An unacked
        /// message is therefore redelivered by the next pull.
        queues: HashMap<String, Vec<CloudMessage>>,
        published: Vec<(String, Vec<u8>)>,
        acked: Vec<String>,
        closed: HashSet<String>,
        fail_pull_once: HashSet<String>,
        fail_publish: bool,
        next_id: u64,
    }

    /// Cloud bus fake with Pub/Sub-shaped delivery: publishing to a topic
    /// enqueues on every subscription attached to it, including the
    /// relay's own.
    struct FakeCloud {
        state: Mutex<CloudState>,
        notify: Notify,
    }

    impl FakeCloud {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(CloudState::default()),
                notify: Notify::new(),
            })
        }

        /// Enqueue a message as if an external cloud publisher sent it.
        fn inject(&self, sub_id: &str, data: Vec<u8>) {
            {
                let mut state = self.state.lock();
                state.next_id += 1;
                let ack_id = format!("ack-{}", state.next_id);
                state
                    .queues
                    .entry(sub_id.to_string())
                    .or_default()
                    .push(CloudMessage { ack_id, data });
            }
            self.notify.notify_waiters();
        }

        fn published(&self) -> Vec<(String, Vec<u8>)> {
            self.state.lock().published.clone()
        }

        fn acked_count(&self) -> usize {
            self.state.lock().acked.len()
        }

        fn close_subscription(&self, sub_id: &str) {
            self.state.lock().closed.insert(sub_id.to_string());
            self.notify.notify_waiters();
        }

        fn fail_next_pull(&self, sub_id: &str) {
            self.state.lock().fail_pull_once.insert(sub_id.to_string());
            self.notify.notify_waiters();
        }

        fn set_fail_publish(&self, fail: bool) {
            self.state.lock().fail_publish = fail;
        }
    }

    #[async_trait]
    impl CloudBus for FakeCloud {
        async fn create_topic(&self, id: &str) -> Result<TopicHandle, CloudBusError> {
            let mut state = self.state.lock();
            if state.topics.contains_key(id) {
                return Err(CloudBusError::AlreadyExists(id.to_string()));
            }
            let handle = TopicHandle {
                id: id.to_string(),
                name: format!("projects/test/topics/{id}"),
            };
            state.topics.insert(id.to_string(), handle.clone());
            Ok(handle)
        }

        async fn topic(&self, id: &str) -> Result<TopicHandle, CloudBusError> {
            self.state
                .lock()
                .topics
                .get(id)
                .cloned()
                .ok_or_else(|| CloudBusError::NotFound(id.to_string()))
        }

        async fn publish(&self, topic: &TopicHandle, data: &[u8]) -> Result<String, CloudBusError> {
            let message_id;
            {
                let mut state = self.state.lock();
                if state.fail_publish {
                    return Err(CloudBusError::Publish("injected".to_string()));
                }
                state.next_id += 1;
                message_id = state.next_id;
                let ack_id = format!("ack-{message_id}");
                state.published.push((topic.id.clone(), data.to_vec()));
                let attached: Vec<String> = state
                    .subscriptions
                    .values()
                    .filter(|s| s.topic == topic.name)
                    .map(|s| s.id.clone())
                    .collect();
                for sub_id in attached {
                    state.queues.entry(sub_id).or_default().push(CloudMessage {
                        ack_id: ack_id.clone(),
                        data: data.to_vec(),
                    });
                }
            }
            self.notify.notify_waiters();
            Ok(format!("m-{message_id}"))
        }

        async fn create_subscription(
            &self,
            id: &str,
            topic: &TopicHandle,
            ack_deadline: Duration,
            push: Option<PushConfig>,
        ) -> Result<SubscriptionHandle, CloudBusError> {
            assert!(push.is_none(), "relay subscriptions use pull delivery");
            let mut state = self.state.lock();
            if state.subscriptions.contains_key(id) {
                return Err(CloudBusError::AlreadyExists(id.to_string()));
            }
            let handle = SubscriptionHandle {
                id: id.to_string(),
                name: format!("projects/test/subscriptions/{id}"),
                topic: topic.name.clone(),
            };
            state.subscriptions.insert(id.to_string(), handle.clone());
            state.deadlines.insert(id.to_string(), ack_deadline);
            state.queues.entry(id.to_string()).or_default();
            Ok(handle)
        }

        async fn subscription(&self, id: &str) -> Result<SubscriptionHandle, CloudBusError> {
            self.state
                .lock()
                .subscriptions
                .get(id)
                .cloned()
                .ok_or_else(|| CloudBusError::NotFound(id.to_string()))
        }

        async fn pull(
            &self,
            subscription: &SubscriptionHandle,
        ) -> Result<Vec<CloudMessage>, CloudBusError> {
            // Keep the scheduler fair even when a pump spins on redelivery.
            tokio::task::yield_now().await;
            loop {
                let notified = self.notify.notified();
                {
                    let mut state = self.state.lock();
                    if state.fail_pull_once.remove(&subscription.id) {
                        return Err(CloudBusError::Request("injected".to_string()));
                    }
                    if state.closed.contains(&subscription.id) {
                        return Err(CloudBusError::Closed("test".to_string()));
                    }
                    if let Some(queue) = state.queues.get(&subscription.id) {
                        if !queue.is_empty() {
                            return Ok(queue.clone());
                        }
                    }
                }
                notified.await;
            }
        }

        async fn ack(
            &self,
            subscription: &SubscriptionHandle,
            ack_ids: &[String],
        ) -> Result<(), CloudBusError> {
            let mut state = self.state.lock();
            if let Some(queue) = state.queues.get_mut(&subscription.id) {
                queue.retain(|m| !ack_ids.contains(&m.ack_id));
            }
            state.acked.extend(ack_ids.iter().cloned());
            Ok(())
        }
    }

    fn new_engine(
        topics: &[&str],
    ) -> (
        Arc<FakeLocal>,
        mpsc::UnboundedSender<LocalMessage>,
        Arc<FakeCloud>,
        RelayEngine<FakeLocal, FakeCloud>,
    ) {
        let (local, feed) = FakeLocal::new();
        let cloud = FakeCloud::new();
        let engine = RelayEngine::new(
            Arc::clone(&local),
            Arc::clone(&cloud),
            topics.iter().map(ToString::to_string).collect(),
            DEFAULT_ACK_DEADLINE,
        );
        (local, feed, cloud, engine)
    }

    fn local_message(channel: &str, data: &[u8]) -> LocalMessage {
        LocalMessage {
            channel: channel.to_string(),
            data: data.to_vec(),
        }
    }

    async fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn init_provisions_topics_and_subscriptions() {
        let (_local, _feed, cloud, engine) = new_engine(&["orders/created", "orders/cancelled"]);

        engine.init().await.unwrap();

        let registry = engine.registry();
        assert_eq!(
            registry.topic_ids(),
            vec!["orders%2Fcancelled", "orders%2Fcreated"]
        );
        let sub = registry.subscription("orders%2Fcreated").unwrap();
        assert_eq!(sub.topic, "projects/test/topics/orders%2Fcreated");
        assert_eq!(
            cloud.state.lock().deadlines["orders%2Fcreated"],
            DEFAULT_ACK_DEADLINE
        );
    }

    #[tokio::test]
    async fn init_is_idempotent_across_restarts() {
        let (_local, _feed, cloud, engine) = new_engine(&["orders/created"]);
        engine.init().await.unwrap();
        let first = engine.registry().topic("orders%2Fcreated").unwrap();

        // A second engine against the same cloud: create hits
        // AlreadyExists and falls back to open-by-name.
        let (local2, _feed2) = FakeLocal::new();
        let engine2 = RelayEngine::new(
            local2,
            Arc::clone(&cloud),
            vec!["orders/created".to_string()],
            DEFAULT_ACK_DEADLINE,
        );
        engine2.init().await.unwrap();

        let second = engine2.registry().topic("orders%2Fcreated").unwrap();
        assert_eq!(first, second);
        assert_eq!(cloud.state.lock().topics.len(), 1);
        assert_eq!(cloud.state.lock().subscriptions.len(), 1);
    }

    #[tokio::test]
    async fn subscribe_local_uses_decoded_names() {
        let (local, _feed, _cloud, engine) = new_engine(&["orders/created"]);

        engine.init().await.unwrap();
        engine.subscribe_local().await.unwrap();

        assert_eq!(*local.subscribed.lock(), vec!["orders/created"]);
    }

    #[tokio::test]
    async fn relays_local_messages_wrapped_with_local_origin() {
        let (_local, feed, cloud, engine) = new_engine(&["orders/created"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });

        feed.send(local_message("orders/created", b"hello")).unwrap();
        wait_until("cloud publish", || !cloud.published().is_empty()).await;

        let (topic_id, bytes) = cloud.published().remove(0);
        assert_eq!(topic_id, "orders%2Fcreated");
        let envelope = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.payload, b"hello");
        assert_eq!(envelope.origin, Origin::Local);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn local_to_cloud_preserves_order() {
        let (_local, feed, cloud, engine) = new_engine(&["t"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });

        for i in 0..10u8 {
            feed.send(local_message("t", &[i])).unwrap();
        }
        wait_until("all publishes", || cloud.published().len() == 10).await;

        let payloads: Vec<u8> = cloud
            .published()
            .into_iter()
            .map(|(_, bytes)| Envelope::from_bytes(&bytes).unwrap().payload[0])
            .collect();
        assert_eq!(payloads, (0..10).collect::<Vec<u8>>());

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn drops_cloud_tagged_messages_from_local() {
        let (_local, feed, cloud, engine) = new_engine(&["t"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });

        let echo = Envelope::from_cloud(b"already relayed".to_vec())
            .to_bytes()
            .unwrap();
        feed.send(local_message("t", &echo)).unwrap();
        // A marker after the echo: once it shows up, the echo has been
        // processed (the pump is sequential).
        feed.send(local_message("t", b"marker")).unwrap();
        wait_until("marker relay", || !cloud.published().is_empty()).await;

        let published = cloud.published();
        assert_eq!(published.len(), 1);
        let envelope = Envelope::from_bytes(&published[0].1).unwrap();
        assert_eq!(envelope.payload, b"marker");

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn relays_cloud_messages_and_acks_after_publish() {
        let (local, _feed, cloud, engine) = new_engine(&["orders/created"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });
        wait_until("subscription ready", || {
            !cloud.state.lock().subscriptions.is_empty()
        })
        .await;

        let incoming = Envelope::from_cloud(b"world".to_vec()).to_bytes().unwrap();
        cloud.inject("orders%2Fcreated", incoming);

        wait_until("local publish", || !local.published().is_empty()).await;
        wait_until("ack", || cloud.acked_count() == 1).await;

        let published = local.published();
        assert_eq!(published[0].channel, "orders/created");
        let envelope = Envelope::from_bytes(&published[0].data).unwrap();
        assert_eq!(envelope.payload, b"world");
        assert_eq!(envelope.origin, Origin::Cloud);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn untagged_cloud_payloads_are_forwarded_wrapped() {
        let (local, _feed, cloud, engine) = new_engine(&["t"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });
        wait_until("subscription ready", || {
            !cloud.state.lock().subscriptions.is_empty()
        })
        .await;

        cloud.inject("t", b"plain bytes".to_vec());
        wait_until("local publish", || !local.published().is_empty()).await;

        let envelope = Envelope::from_bytes(&local.published()[0].data).unwrap();
        assert_eq!(envelope.payload, b"plain bytes");
        assert_eq!(envelope.origin, Origin::Cloud);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn own_relayed_messages_are_dropped_but_acked() {
        let (local, feed, cloud, engine) = new_engine(&["t"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });

        // The fake cloud delivers a publish to the topic's own
        // subscription, exactly like the real bus does.
        feed.send(local_message("t", b"hello")).unwrap();
        wait_until("cloud publish", || !cloud.published().is_empty()).await;
        wait_until("self-delivery settled", || cloud.acked_count() == 1).await;

        assert!(local.published().is_empty(), "echo must not reach the local bus");

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn full_round_trip_crosses_once_in_each_direction() {
        let (local, feed, cloud, engine) = new_engine(&["t"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });
        wait_until("subscription ready", || {
            !cloud.state.lock().subscriptions.is_empty()
        })
        .await;

        // Cloud → local, then simulate the local bus looping the relay's
        // own publish back into its subscription feed.
        let incoming = Envelope::from_cloud(b"world".to_vec()).to_bytes().unwrap();
        cloud.inject("t", incoming);
        wait_until("local publish", || !local.published().is_empty()).await;
        let relayed = local.published()[0].clone();
        feed.send(relayed).unwrap();

        // Marker proves the looped-back message went through the pump.
        feed.send(local_message("t", b"marker")).unwrap();
        wait_until("marker relay", || !cloud.published().is_empty()).await;

        let published = cloud.published();
        assert_eq!(published.len(), 1, "cloud-tagged echo must not cross again");
        assert_eq!(
            Envelope::from_bytes(&published[0].1).unwrap().payload,
            b"marker"
        );

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_local_publish_leaves_message_unacked_until_redelivery() {
        let (local, _feed, cloud, engine) = new_engine(&["t"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });
        wait_until("subscription ready", || {
            !cloud.state.lock().subscriptions.is_empty()
        })
        .await;

        local.set_fail_publish(true);
        cloud.inject("t", b"payload".to_vec());
        wait_until("publish attempted", || *local.publish_attempts.lock() >= 1).await;
        assert_eq!(cloud.acked_count(), 0, "failed delivery must not be acked");

        // Recovery: the fake redelivers unacked messages on the next pull.
        local.set_fail_publish(false);
        wait_until("redelivered and published", || !local.published().is_empty()).await;
        wait_until("acked after success", || cloud.acked_count() == 1).await;

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn local_receive_failure_is_fatal_to_the_relay() {
        let (_local, feed, _cloud, engine) = new_engine(&["t"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });

        drop(feed);

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(RelayError::LocalBus(_))));
    }

    #[tokio::test]
    async fn cloud_publish_failure_is_fatal_to_the_relay() {
        let (_local, feed, cloud, engine) = new_engine(&["t"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });

        cloud.set_fail_publish(true);
        feed.send(local_message("t", b"doomed")).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(RelayError::CloudBus(_))));
    }

    #[tokio::test]
    async fn unknown_channel_is_fatal_to_the_relay() {
        let (_local, feed, _cloud, engine) = new_engine(&["t"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });

        // Subscription drift: a message on a channel that was never
        // provisioned.
        feed.send(local_message("ghost", b"x")).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(RelayError::Registry(_))));
    }

    #[tokio::test]
    async fn cloud_pump_failure_leaves_siblings_running() {
        let (local, feed, cloud, engine) = new_engine(&["a", "b"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });
        wait_until("subscriptions ready", || {
            cloud.state.lock().subscriptions.len() == 2
        })
        .await;

        cloud.fail_next_pull("a");
        // Give the failed pump a moment to exit, then prove both the other
        // cloud pump and the local pump still work.
        tokio::time::sleep(Duration::from_millis(20)).await;
        cloud.inject("b", b"still alive".to_vec());
        feed.send(local_message("a", b"local side too")).unwrap();

        wait_until("sibling cloud pump", || !local.published().is_empty()).await;
        wait_until("local pump", || !cloud.published().is_empty()).await;

        shutdown.cancel();
        let result = handle.await.unwrap();
        assert!(result.is_ok(), "cloud pump failure must not fail the relay");
    }

    #[tokio::test]
    async fn closed_subscription_is_a_clean_stop() {
        let (_local, feed, cloud, engine) = new_engine(&["t"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });
        wait_until("subscription ready", || {
            !cloud.state.lock().subscriptions.is_empty()
        })
        .await;

        cloud.close_subscription("t");
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The relay is still serving the local direction.
        feed.send(local_message("t", b"x")).unwrap();
        wait_until("local pump alive", || !cloud.published().is_empty()).await;

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn concurrent_topics_relay_without_deadlock() {
        let (local, feed, cloud, engine) = new_engine(&["a", "b"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });
        wait_until("subscriptions ready", || {
            cloud.state.lock().subscriptions.len() == 2
        })
        .await;

        for i in 0..20u8 {
            let channel = if i % 2 == 0 { "a" } else { "b" };
            feed.send(local_message(channel, &[i])).unwrap();
        }
        cloud.inject("a", b"from cloud a".to_vec());
        cloud.inject("b", b"from cloud b".to_vec());

        wait_until("local→cloud", || cloud.published().len() == 20).await;
        wait_until("cloud→local", || local.published().len() == 2).await;

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_all_pumps() {
        let (_local, _feed, _cloud, engine) = new_engine(&["a", "b", "c"]);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let token = shutdown.clone();
            async move { engine.run(token).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("pumps must stop promptly")
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn rewrap_never_nests() {
        let inner = Envelope::from_local(b"x".to_vec()).to_bytes().unwrap();
        let rewrapped = wrap_payload(inner, Origin::Cloud).unwrap();

        let envelope = Envelope::from_bytes(&rewrapped).unwrap();
        assert_eq!(envelope.payload, b"x");
        assert_eq!(envelope.origin, Origin::Cloud);
    }

    #[test]
    fn rewrap_passes_raw_bytes_through() {
        let rewrapped = wrap_payload(b"raw".to_vec(), Origin::Local).unwrap();

        let envelope = Envelope::from_bytes(&rewrapped).unwrap();
        assert_eq!(envelope.payload, b"raw");
        assert_eq!(envelope.origin, Origin::Local);
    }
}
