use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type ConnId = Uuid;

pub const FEED_TOPIC: &str = "feed:global";

pub fn user_topic(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

pub fn conversation_topic(conversation_id: Uuid) -> String {
    format!("conversation:{conversation_id}")
}

#[derive(Default)]
struct HubInner {
    // topic -> subscribed connections
    topics: HashMap<String, HashSet<ConnId>>,
    // connection -> topics, kept purely for O(1) cleanup on close
    memberships: HashMap<ConnId, HashSet<String>>,
    senders: HashMap<ConnId, UnboundedSender<String>>,
}

/// In-process publish/subscribe keyed by topic string.
///
/// Process-local only; cross-instance delivery is the fanout bridge's job.
/// Owned by `AppState` and constructed once at process start.
#[derive(Default, Clone)]
pub struct TopicHub {
    inner: Arc<RwLock<HubInner>>,
}

impl TopicHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound channel. Must precede `subscribe`.
    pub async fn register(&self, conn_id: ConnId, sender: UnboundedSender<String>) {
        let mut guard = self.inner.write().await;
        guard.senders.insert(conn_id, sender);
        guard.memberships.entry(conn_id).or_default();
    }

    pub async fn subscribe(&self, conn_id: ConnId, topic: &str) {
        let mut guard = self.inner.write().await;
        if !guard.senders.contains_key(&conn_id) {
            return;
        }
        guard
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(conn_id);
        guard
            .memberships
            .entry(conn_id)
            .or_default()
            .insert(topic.to_string());
    }

    /// Deliver `payload` to every still-open connection subscribed to `topic`
    /// on this process. Returns the number of connections reached.
    pub async fn publish_local(&self, topic: &str, payload: &str) -> usize {
        let mut guard = self.inner.write().await;
        let Some(conn_ids) = guard.topics.get(topic) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead: Vec<ConnId> = Vec::new();
        for conn_id in conn_ids.iter() {
            match guard.senders.get(conn_id) {
                Some(tx) if tx.send(payload.to_string()).is_ok() => delivered += 1,
                _ => dead.push(*conn_id),
            }
        }

        for conn_id in dead {
            Self::remove_locked(&mut guard, conn_id);
        }

        delivered
    }

    /// Release every topic membership held by a connection.
    pub async fn unsubscribe_all(&self, conn_id: ConnId) {
        let mut guard = self.inner.write().await;
        Self::remove_locked(&mut guard, conn_id);
    }

    fn remove_locked(guard: &mut HubInner, conn_id: ConnId) {
        guard.senders.remove(&conn_id);
        if let Some(topics) = guard.memberships.remove(&conn_id) {
            for topic in topics {
                if let Some(set) = guard.topics.get_mut(&topic) {
                    set.remove(&conn_id);
                    if set.is_empty() {
                        guard.topics.remove(&topic);
                    }
                }
            }
        }
    }

    #[cfg(test)]
    async fn topic_count(&self) -> usize {
        self.inner.read().await.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn publishes_to_subscribers_of_topic() {
        let hub = TopicHub::new();
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        hub.register(a, tx_a).await;
        hub.register(b, tx_b).await;
        hub.subscribe(a, "conversation:c1").await;
        hub.subscribe(b, "conversation:c2").await;

        let delivered = hub.publish_local("conversation:c1", "hello").await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_a.recv().await.unwrap(), "hello");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_all_releases_every_topic() {
        let hub = TopicHub::new();
        let (tx, _rx) = unbounded_channel();
        let conn = Uuid::new_v4();

        hub.register(conn, tx).await;
        hub.subscribe(conn, "user:u1").await;
        hub.subscribe(conn, "conversation:c1").await;
        hub.subscribe(conn, FEED_TOPIC).await;
        assert_eq!(hub.topic_count().await, 3);

        hub.unsubscribe_all(conn).await;
        assert_eq!(hub.topic_count().await, 0);
        assert_eq!(hub.publish_local("user:u1", "x").await, 0);
    }

    #[tokio::test]
    async fn closed_receivers_are_pruned_on_publish() {
        let hub = TopicHub::new();
        let (tx, rx) = unbounded_channel();
        let conn = Uuid::new_v4();

        hub.register(conn, tx).await;
        hub.subscribe(conn, "conversation:c1").await;
        drop(rx);

        assert_eq!(hub.publish_local("conversation:c1", "x").await, 0);
        assert_eq!(hub.topic_count().await, 0);
    }
}
