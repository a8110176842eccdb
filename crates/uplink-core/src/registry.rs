//! Reference-counted subscription registry.
//!
//! Many consumers may share one topic; the transport is subscribed to a
//! topic exactly while its local reference count is above zero. The
//! registry reports 0->1 and 1->0 transitions so the connection manager
//! can mirror them to the server, and it checks the *current* consumer
//! set on every delivery - a consumer that unsubscribed never sees
//! another update.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use crate::error::ClientError;

/// Maximum topic length.
pub const MAX_TOPIC_LENGTH: usize = 256;

/// A topic identifier, e.g. `event:42:update` or `crowd:7:update`.
/// Opaque to the core; payload schemas belong to consumers.
pub type Topic = String;

/// Validate a topic name.
///
/// # Errors
///
/// Returns a message describing why the topic is invalid.
pub fn validate_topic(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Topic cannot be empty");
    }
    if name.len() > MAX_TOPIC_LENGTH {
        return Err("Topic too long");
    }
    if name.starts_with('$') {
        return Err("Topics starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Topic contains invalid characters");
    }
    Ok(())
}

/// Token returned by `subscribe`, required to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
}

impl SubscriptionHandle {
    /// The topic this handle subscribes to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

/// A server-pushed update as seen by consumers.
#[derive(Debug)]
pub struct Inbound {
    /// The topic the update arrived on.
    pub topic: Topic,
    /// Optional event name qualifying the payload.
    pub event: Option<String>,
    /// Opaque payload; decoding belongs to the consumer.
    pub payload: Bytes,
}

/// What a subscription receives.
#[derive(Debug, Clone)]
pub enum TopicEvent {
    /// An update arrived on the subscribed topic.
    Message(Arc<Inbound>),
    /// The connection is gone for good (reconnect attempts exhausted or
    /// the credential was rejected mid-flight). Delivered exactly once
    /// per live subscription.
    ConnectionLost,
}

/// Reference-count effect of a subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// 0 -> 1: the transport must be told.
    First,
    /// The topic was already subscribed locally.
    Shared,
}

/// Reference-count effect of an unsubscribe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// 1 -> 0: the transport subscription can be released.
    Released(Topic),
    /// Other consumers remain on the topic.
    Retained,
}

/// Delivery outcome for one inbound update.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Consumers that received the update.
    pub delivered: usize,
    /// Consumers whose buffer was full; the update was dropped for them.
    pub dropped: usize,
    /// Topics whose reference count hit zero because every remaining
    /// consumer had vanished without unsubscribing.
    pub released: Vec<Topic>,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Topics with at least one consumer.
    pub topic_count: usize,
    /// Live subscriptions across all topics.
    pub subscription_count: usize,
}

#[derive(Debug)]
struct Consumer {
    id: u64,
    tx: mpsc::Sender<TopicEvent>,
}

/// Reference-counted set of consumers per topic.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    topics: HashMap<Topic, Vec<Consumer>>,
    handles: HashMap<u64, Topic>,
    next_id: u64,
    buffer: usize,
}

impl SubscriptionRegistry {
    /// Create a registry whose subscriptions buffer `buffer` updates.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            topics: HashMap::new(),
            handles: HashMap::new(),
            next_id: 1,
            buffer: buffer.max(1),
        }
    }

    /// Register a consumer on `topic`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTopic` if the topic fails validation.
    pub fn subscribe(
        &mut self,
        topic: &str,
    ) -> Result<(SubscriptionHandle, mpsc::Receiver<TopicEvent>, SubscribeOutcome), ClientError>
    {
        validate_topic(topic).map_err(ClientError::InvalidTopic)?;

        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = mpsc::channel(self.buffer);
        let consumers = self.topics.entry(topic.to_string()).or_default();
        let outcome = if consumers.is_empty() {
            SubscribeOutcome::First
        } else {
            SubscribeOutcome::Shared
        };
        consumers.push(Consumer { id, tx });
        let subscribers = consumers.len();
        self.handles.insert(id, topic.to_string());

        debug!(topic, subscribers, "Subscribed");

        Ok((
            SubscriptionHandle {
                id,
                topic: topic.to_string(),
            },
            rx,
            outcome,
        ))
    }

    /// Drop the consumer behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyUnsubscribed` if the handle was already used.
    pub fn unsubscribe(
        &mut self,
        handle: &SubscriptionHandle,
    ) -> Result<UnsubscribeOutcome, ClientError> {
        let topic = self
            .handles
            .remove(&handle.id())
            .ok_or(ClientError::AlreadyUnsubscribed)?;

        let mut released = false;
        if let Some(consumers) = self.topics.get_mut(&topic) {
            consumers.retain(|c| c.id != handle.id());
            if consumers.is_empty() {
                self.topics.remove(&topic);
                released = true;
            }
        }

        debug!(topic = %topic, released, "Unsubscribed");

        Ok(if released {
            UnsubscribeOutcome::Released(topic)
        } else {
            UnsubscribeOutcome::Retained
        })
    }

    /// Current reference count for a topic.
    #[must_use]
    pub fn refcount(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, Vec::len)
    }

    /// Whether the topic has any consumers.
    #[must_use]
    pub fn is_active(&self, topic: &str) -> bool {
        self.refcount(topic) > 0
    }

    /// All topics with at least one consumer.
    #[must_use]
    pub fn active_topics(&self) -> Vec<Topic> {
        self.topics.keys().cloned().collect()
    }

    /// Deliver an event to the current consumers of `topic`.
    ///
    /// Delivery is non-blocking: a consumer whose buffer is full misses
    /// this update, and a consumer whose receiver was dropped is pruned.
    /// Unknown topics are dropped silently - the server may know topics
    /// this client never subscribed to.
    pub fn deliver(&mut self, topic: &str, event: &TopicEvent) -> Delivery {
        let mut delivery = Delivery::default();

        let Some(consumers) = self.topics.get_mut(topic) else {
            trace!(topic, "Update for topic with no consumers, dropping");
            return delivery;
        };

        let mut dead = Vec::new();
        for consumer in consumers.iter() {
            match consumer.tx.try_send(event.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(topic, "Consumer buffer full, dropping update");
                    delivery.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => dead.push(consumer.id),
            }
        }

        if !dead.is_empty() {
            consumers.retain(|c| !dead.contains(&c.id));
            let empty = consumers.is_empty();
            for id in &dead {
                self.handles.remove(id);
            }
            warn!(topic, vanished = dead.len(), "Pruned consumers that vanished without unsubscribing");
            if empty {
                self.topics.remove(topic);
                delivery.released.push(topic.to_string());
            }
        }

        delivery
    }

    /// Deliver an event to every live consumer, once each.
    pub fn notify_all(&mut self, event: &TopicEvent) -> usize {
        let mut notified = 0;
        for (topic, consumers) in &self.topics {
            for consumer in consumers {
                match consumer.tx.try_send(event.clone()) {
                    Ok(()) => notified += 1,
                    Err(e) => warn!(topic = %topic, error = %e, "Failed to notify consumer"),
                }
            }
        }
        notified
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            topic_count: self.topics.len(),
            subscription_count: self.handles.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, payload: &[u8]) -> TopicEvent {
        TopicEvent::Message(Arc::new(Inbound {
            topic: topic.to_string(),
            event: None,
            payload: Bytes::copy_from_slice(payload),
        }))
    }

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("event:42:update").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("$internal").is_err());
        assert!(validate_topic("bad\ntopic").is_err());

        let long = "a".repeat(MAX_TOPIC_LENGTH + 1);
        assert!(validate_topic(&long).is_err());
    }

    #[test]
    fn test_refcount_transitions() {
        let mut registry = SubscriptionRegistry::new(8);

        let (h1, _rx1, outcome1) = registry.subscribe("event:42:update").unwrap();
        assert_eq!(outcome1, SubscribeOutcome::First);
        let (h2, _rx2, outcome2) = registry.subscribe("event:42:update").unwrap();
        assert_eq!(outcome2, SubscribeOutcome::Shared);
        assert_eq!(registry.refcount("event:42:update"), 2);

        assert_eq!(
            registry.unsubscribe(&h1).unwrap(),
            UnsubscribeOutcome::Retained
        );
        assert_eq!(
            registry.unsubscribe(&h2).unwrap(),
            UnsubscribeOutcome::Released("event:42:update".to_string())
        );
        assert_eq!(registry.refcount("event:42:update"), 0);
        assert!(!registry.is_active("event:42:update"));
    }

    #[test]
    fn test_double_unsubscribe() {
        let mut registry = SubscriptionRegistry::new(8);
        let (handle, _rx, _) = registry.subscribe("crowd:7:update").unwrap();

        registry.unsubscribe(&handle).unwrap();
        assert!(matches!(
            registry.unsubscribe(&handle),
            Err(ClientError::AlreadyUnsubscribed)
        ));
    }

    #[test]
    fn test_deliver_checks_current_consumers() {
        let mut registry = SubscriptionRegistry::new(8);
        let (h1, mut rx1, _) = registry.subscribe("event:42:update").unwrap();
        let (_h2, mut rx2, _) = registry.subscribe("event:42:update").unwrap();

        registry.unsubscribe(&h1).unwrap();
        let delivery = registry.deliver("event:42:update", &message("event:42:update", b"m"));

        assert_eq!(delivery.delivered, 1);
        assert!(rx1.try_recv().is_err());
        assert!(matches!(rx2.try_recv(), Ok(TopicEvent::Message(_))));
    }

    #[test]
    fn test_deliver_unknown_topic() {
        let mut registry = SubscriptionRegistry::new(8);
        let delivery = registry.deliver("mystery:topic", &message("mystery:topic", b"m"));
        assert_eq!(delivery.delivered, 0);
        assert!(delivery.released.is_empty());
    }

    #[test]
    fn test_deliver_drops_when_buffer_full() {
        let mut registry = SubscriptionRegistry::new(1);
        let (_h, mut rx, _) = registry.subscribe("feed").unwrap();

        let first = registry.deliver("feed", &message("feed", b"1"));
        let second = registry.deliver("feed", &message("feed", b"2"));

        assert_eq!(first.delivered, 1);
        assert_eq!(second.dropped, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_deliver_prunes_vanished_consumers() {
        let mut registry = SubscriptionRegistry::new(8);
        let (_h, rx, _) = registry.subscribe("feed").unwrap();
        drop(rx);

        let delivery = registry.deliver("feed", &message("feed", b"m"));
        assert_eq!(delivery.delivered, 0);
        assert_eq!(delivery.released, vec!["feed".to_string()]);
        assert_eq!(registry.refcount("feed"), 0);
    }

    #[test]
    fn test_notify_all_once_per_consumer() {
        let mut registry = SubscriptionRegistry::new(8);
        let (_h1, mut rx1, _) = registry.subscribe("event:1:update").unwrap();
        let (_h2, mut rx2, _) = registry.subscribe("event:2:update").unwrap();
        let (_h3, mut rx3, _) = registry.subscribe("event:2:update").unwrap();

        let notified = registry.notify_all(&TopicEvent::ConnectionLost);
        assert_eq!(notified, 3);

        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            assert!(matches!(rx.try_recv(), Ok(TopicEvent::ConnectionLost)));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_stats() {
        let mut registry = SubscriptionRegistry::new(8);
        let (_h1, _rx1, _) = registry.subscribe("event:1:update").unwrap();
        let (_h2, _rx2, _) = registry.subscribe("event:1:update").unwrap();
        let (_h3, _rx3, _) = registry.subscribe("crowd:7:update").unwrap();

        let stats = registry.stats();
        assert_eq!(stats.topic_count, 2);
        assert_eq!(stats.subscription_count, 3);
    }
}
