//! Topic router: hands inbound updates to the subscription registry.
//!
//! Per-topic delivery order matches arrival order on the transport; no
//! ordering is guaranteed across topics. Dispatch never blocks on a
//! slow consumer - hand-off is a non-blocking channel send and overflow
//! is dropped per consumer.

use std::sync::Arc;
use tracing::trace;

use crate::error::ClientError;
use crate::registry::{
    Delivery, Inbound, RegistryStats, SubscribeOutcome, SubscriptionHandle, SubscriptionRegistry,
    Topic, TopicEvent, UnsubscribeOutcome,
};

/// Routes inbound topic updates to registered consumers.
#[derive(Debug)]
pub struct TopicRouter {
    registry: SubscriptionRegistry,
}

impl TopicRouter {
    /// Create a router whose subscriptions buffer `buffer` updates each.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: SubscriptionRegistry::new(buffer),
        }
    }

    /// Register a consumer. See [`SubscriptionRegistry::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidTopic` if the topic fails validation.
    pub fn subscribe(
        &mut self,
        topic: &str,
    ) -> Result<
        (
            SubscriptionHandle,
            tokio::sync::mpsc::Receiver<TopicEvent>,
            SubscribeOutcome,
        ),
        ClientError,
    > {
        self.registry.subscribe(topic)
    }

    /// Remove a consumer. See [`SubscriptionRegistry::unsubscribe`].
    ///
    /// # Errors
    ///
    /// Returns `AlreadyUnsubscribed` if the handle was already used.
    pub fn unsubscribe(
        &mut self,
        handle: &SubscriptionHandle,
    ) -> Result<UnsubscribeOutcome, ClientError> {
        self.registry.unsubscribe(handle)
    }

    /// Dispatch one inbound update to the current consumers of its topic.
    pub fn dispatch(&mut self, inbound: Inbound) -> Delivery {
        trace!(topic = %inbound.topic, bytes = inbound.payload.len(), "Dispatching update");
        let topic = inbound.topic.clone();
        let event = TopicEvent::Message(Arc::new(inbound));
        self.registry.deliver(&topic, &event)
    }

    /// Tell every live consumer, once, that the connection is gone for
    /// good. Returns the number of consumers notified.
    pub fn connection_lost(&mut self) -> usize {
        self.registry.notify_all(&TopicEvent::ConnectionLost)
    }

    /// Current reference count for a topic.
    #[must_use]
    pub fn refcount(&self, topic: &str) -> usize {
        self.registry.refcount(topic)
    }

    /// All topics with at least one consumer.
    #[must_use]
    pub fn active_topics(&self) -> Vec<Topic> {
        self.registry.active_topics()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}
