use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use uuid::Uuid;

use recado_types::events::GatewayEvent;

/// A named broadcast group. Every connection subscribes to its own user
/// topic at handshake; conversation topics are joined on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    User(Uuid),
    Conversation(Uuid),
}

/// In-memory registry of who is currently listening to which topic.
///
/// This is a disposable cache, never durable state: a restart drops every
/// subscription but loses nothing persisted. Publishing never blocks on a
/// slow client (the per-connection channels are unbounded); a dead client is
/// only detected when a write to its channel fails, at which point it is
/// pruned from the topic.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    topics: RwLock<HashMap<Topic, HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                topics: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self, topic: Topic, conn_id: Uuid, tx: mpsc::UnboundedSender<GatewayEvent>) {
        self.inner
            .topics
            .write()
            .expect("topic registry lock poisoned")
            .entry(topic)
            .or_default()
            .insert(conn_id, tx);
    }

    pub fn unsubscribe(&self, topic: Topic, conn_id: Uuid) {
        let mut topics = self
            .inner
            .topics
            .write()
            .expect("topic registry lock poisoned");
        if let Some(subscribers) = topics.get_mut(&topic) {
            subscribers.remove(&conn_id);
            if subscribers.is_empty() {
                topics.remove(&topic);
            }
        }
    }

    /// Remove a connection from every topic it joined. Called once when the
    /// connection ends.
    pub fn drop_connection(&self, conn_id: Uuid) {
        self.inner
            .topics
            .write()
            .expect("topic registry lock poisoned")
            .retain(|_, subscribers| {
                subscribers.remove(&conn_id);
                !subscribers.is_empty()
            });
    }

    /// Send an event to every subscriber of a topic. Returns how many
    /// subscribers received it; subscribers whose channel is closed are
    /// pruned on the spot.
    pub fn publish(&self, topic: Topic, event: &GatewayEvent) -> usize {
        let mut topics = self
            .inner
            .topics
            .write()
            .expect("topic registry lock poisoned");
        let Some(subscribers) = topics.get_mut(&topic) else {
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|_, tx| match tx.send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => false,
        });
        if subscribers.is_empty() {
            topics.remove(&topic);
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .topics
            .read()
            .expect("topic registry lock poisoned")
            .get(&topic)
            .map_or(0, |subscribers| subscribers.len())
    }

    pub fn is_subscribed(&self, topic: Topic, conn_id: Uuid) -> bool {
        self.inner
            .topics
            .read()
            .expect("topic registry lock poisoned")
            .get(&topic)
            .is_some_and(|subscribers| subscribers.contains_key(&conn_id))
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
