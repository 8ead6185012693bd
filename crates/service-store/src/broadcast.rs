//! Live fan-out of service log entries

use crate::error::Result;
use crate::models::LogEntry;
use crate::store::ServiceStore;
use async_channel::{Receiver, Sender, TrySendError};
use futures::lock::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tracing::{debug, error, warn};

/// Subscribers of one service id
///
/// Holding the topic lock is what orders persistence, replay and delivery
/// for that service.
#[derive(Default)]
struct Topic {
    subscribers: HashMap<String, Sender<LogEntry>>,
}

/// A live subscription created by [`LogBroadcastHub::subscribe`]
#[derive(Debug)]
pub struct Subscription {
    /// Subscriber id, used to disconnect
    pub id: String,
    /// Service the subscription follows
    pub service_id: String,
    /// Replayed history followed by live entries
    pub receiver: Receiver<LogEntry>,
}

/// Per-service log fan-out with replay-then-tail
pub struct LogBroadcastHub {
    store: Arc<ServiceStore>,
    topics: std::sync::Mutex<HashMap<String, Arc<Mutex<Topic>>>>,
}

impl LogBroadcastHub {
    /// Create a hub in front of `store`
    pub fn new(store: Arc<ServiceStore>) -> Self {
        Self {
            store,
            topics: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The store entries are persisted to
    pub fn store(&self) -> &Arc<ServiceStore> {
        &self.store
    }

    fn topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<Topic>>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn topic(&self, service_id: &str) -> Arc<Mutex<Topic>> {
        self.topics().entry(service_id.to_string()).or_default().clone()
    }

    /// Forget the topic of `service_id` once nobody subscribes or waits on it
    ///
    /// Topics are only handed out under the map lock, so a count of one
    /// means no task holds or waits for this topic.
    fn release(&self, service_id: &str) {
        let mut topics = self.topics();
        let idle = topics.get(service_id).is_some_and(|topic| {
            Arc::strong_count(topic) == 1
                && topic.try_lock().is_some_and(|t| t.subscribers.is_empty())
        });
        if idle {
            topics.remove(service_id);
        }
    }

    /// Number of services with subscribers or work in flight
    pub fn topic_count(&self) -> usize {
        self.topics().len()
    }

    /// Register `sender` as subscriber `subscriber_id` of `service_id`
    ///
    /// The persisted history is sent first, in order, and only then does the
    /// subscriber start receiving live entries. Connecting an id that is
    /// already connected does nothing and returns `false`.
    pub async fn connect(
        &self,
        service_id: &str,
        subscriber_id: &str,
        sender: Sender<LogEntry>,
    ) -> Result<bool> {
        let connected = self.replay_and_join(service_id, subscriber_id, sender).await;
        self.release(service_id);
        connected
    }

    async fn replay_and_join(
        &self,
        service_id: &str,
        subscriber_id: &str,
        sender: Sender<LogEntry>,
    ) -> Result<bool> {
        let topic = self.topic(service_id);
        let mut topic = topic.lock().await;

        if topic.subscribers.contains_key(subscriber_id) {
            return Ok(false);
        }

        let history = self.store.history(service_id).await?;
        debug!(
            "Replaying {} entries of {} to subscriber {}",
            history.len(),
            service_id,
            subscriber_id
        );
        for entry in history {
            if sender.send(entry).await.is_err() {
                debug!("Subscriber {} went away during replay", subscriber_id);
                return Ok(false);
            }
        }

        topic
            .subscribers
            .insert(subscriber_id.to_string(), sender);
        Ok(true)
    }

    /// Subscribe with a fresh unbounded channel
    pub async fn subscribe(&self, service_id: &str) -> Result<Subscription> {
        let (sender, receiver) = async_channel::unbounded();
        let id = uuid::Uuid::new_v4().to_string();
        self.connect(service_id, &id, sender).await?;

        Ok(Subscription {
            id,
            service_id: service_id.to_string(),
            receiver,
        })
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub async fn disconnect(&self, service_id: &str, subscriber_id: &str) -> bool {
        let removed = {
            let topic = self.topic(service_id);
            let mut topic = topic.lock().await;
            topic.subscribers.remove(subscriber_id).is_some()
        };
        self.release(service_id);
        removed
    }

    /// Number of live subscribers for a service
    pub async fn subscriber_count(&self, service_id: &str) -> usize {
        let count = {
            let topic = self.topic(service_id);
            let topic = topic.lock().await;
            topic.subscribers.len()
        };
        self.release(service_id);
        count
    }

    /// Deliver `entry` to every live subscriber of `service_id`
    ///
    /// Returns how many subscribers received it. Closed subscribers are
    /// dropped; full ones miss this entry.
    pub async fn broadcast(&self, entry: &LogEntry, service_id: &str) -> usize {
        let delivered = {
            let topic = self.topic(service_id);
            let mut topic = topic.lock().await;
            Self::deliver(&mut topic, entry, service_id)
        };
        self.release(service_id);
        delivered
    }

    /// Persist `entry` to the service log and deliver it to subscribers
    ///
    /// Persistence failures are logged and swallowed; the entry is still
    /// delivered live. Returns the sequence number when persisted.
    pub async fn publish(&self, service_id: &str, entry: LogEntry) -> Option<u64> {
        let seq = {
            let topic = self.topic(service_id);
            let mut topic = topic.lock().await;

            let seq = match self.store.append_log(service_id, &entry).await {
                Ok(seq) => Some(seq),
                Err(e) => {
                    error!("Failed to persist log entry for {}: {}", service_id, e);
                    None
                }
            };

            Self::deliver(&mut topic, &entry, service_id);
            seq
        };
        self.release(service_id);
        seq
    }

    fn deliver(topic: &mut Topic, entry: &LogEntry, service_id: &str) -> usize {
        let mut delivered = 0;
        topic.subscribers.retain(|id, sender| match sender.try_send(entry.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("Subscriber {} of {} is full, skipping entry", id, service_id);
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Subscriber {} of {} closed", id, service_id);
                false
            }
        });
        delivered
    }
}
