use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::metrics;
use crate::websocket::hub::TopicHub;

/// Which route a publish took; surfaced for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishPath {
    Broker,
    Local,
}

impl PublishPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishPath::Broker => "broker",
            PublishPath::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishScope {
    User,
    Conversation,
    Feed,
}

impl PublishScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishScope::User => "user",
            PublishScope::Conversation => "conversation",
            PublishScope::Feed => "feed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerRetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub ceiling: u32,
}

impl BrokerRetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(1u32 << attempt.min(16));
        exp.min(self.max)
    }
}

/// Bridges the topic hub across processes through a redis pub/sub broker.
///
/// Publishes go to `<prefix><topic>`; every instance holds one wildcard
/// subscription on `<prefix>*` and forwards inbound broker messages to its
/// own local hub. Broker unavailability never blocks a publish; it only
/// narrows delivery to this process.
pub struct FanoutBridge {
    hub: TopicHub,
    client: Option<redis::Client>,
    prefix: String,
    broker_up: AtomicBool,
    retry: BrokerRetryPolicy,
}

impl FanoutBridge {
    pub fn new(
        hub: TopicHub,
        client: Option<redis::Client>,
        prefix: impl Into<String>,
        retry: BrokerRetryPolicy,
    ) -> Self {
        Self {
            hub,
            client,
            prefix: prefix.into(),
            broker_up: AtomicBool::new(false),
            retry,
        }
    }

    /// Local-only bridge, used in tests and single-instance deployments.
    pub fn local_only(hub: TopicHub) -> Self {
        Self::new(
            hub,
            None,
            "ws:",
            BrokerRetryPolicy {
                base: Duration::from_millis(500),
                max: Duration::from_secs(30),
                ceiling: 10,
            },
        )
    }

    pub fn broker_connected(&self) -> bool {
        self.broker_up.load(Ordering::Relaxed)
    }

    /// Publish a payload under a topic, reporting which path delivered it.
    pub async fn publish(&self, scope: PublishScope, topic: &str, payload: &str) -> PublishPath {
        if self.broker_connected() {
            if let Some(client) = &self.client {
                match self.publish_broker(client, topic, payload).await {
                    Ok(()) => {
                        metrics::record_publish(scope.as_str(), PublishPath::Broker.as_str());
                        return PublishPath::Broker;
                    }
                    Err(e) => {
                        self.broker_up.store(false, Ordering::Relaxed);
                        warn!(error = %e, topic, "broker publish failed, delivering locally");
                    }
                }
            }
        }

        metrics::record_publish(scope.as_str(), PublishPath::Local.as_str());
        self.hub.publish_local(topic, payload).await;
        PublishPath::Local
    }

    async fn publish_broker(
        &self,
        client: &redis::Client,
        topic: &str,
        payload: &str,
    ) -> redis::RedisResult<()> {
        use redis::AsyncCommands;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let channel = format!("{}{}", self.prefix, topic);
        conn.publish::<_, _, ()>(channel, payload).await
    }

    /// Run the inbound broker subscription. Reconnects with bounded
    /// exponential backoff; the ceiling bounds CONSECUTIVE failures, so a
    /// long-lived process with occasional broker drops keeps reconnecting.
    /// Only after the ceiling without a single successful subscribe does
    /// the bridge stay in local-only mode.
    pub async fn run_listener(self: Arc<Self>) {
        let Some(client) = self.client.clone() else {
            info!("no broker configured, fanout runs local-only");
            return;
        };

        let pattern = format!("{}*", self.prefix);
        let mut attempt: u32 = 0;

        loop {
            match self.listen_once(&client, &pattern, &mut attempt).await {
                Ok(()) => {
                    // Subscription stream ended; treat like a drop.
                    self.broker_up.store(false, Ordering::Relaxed);
                    warn!("broker subscription ended, reconnecting");
                }
                Err(e) => {
                    self.broker_up.store(false, Ordering::Relaxed);
                    warn!(error = %e, attempt, "broker subscription failed");
                }
            }

            if attempt >= self.retry.ceiling {
                error!(
                    attempts = attempt,
                    "broker retry ceiling reached, staying in local-only fanout"
                );
                return;
            }
            tokio::time::sleep(self.retry.delay_for(attempt)).await;
            attempt += 1;
        }
    }

    /// Mark the subscription live and clear the consecutive-failure count.
    fn mark_subscribed(&self, attempt: &mut u32) {
        self.broker_up.store(true, Ordering::Relaxed);
        *attempt = 0;
    }

    async fn listen_once(
        &self,
        client: &redis::Client,
        pattern: &str,
        attempt: &mut u32,
    ) -> redis::RedisResult<()> {
        // Pub/sub needs a dedicated connection, not the multiplexed one.
        let conn = client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.psubscribe(pattern).await?;
        self.mark_subscribed(attempt);
        info!(pattern, "broker fanout subscription established");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let channel: String = msg.get_channel_name().into();
            let payload: String = msg.get_payload()?;
            let Some(topic) = channel.strip_prefix(&self.prefix) else {
                continue;
            };
            if topic.is_empty() {
                continue;
            }
            metrics::record_fanout_deliver(PublishPath::Broker.as_str());
            self.hub.publish_local(topic, &payload).await;
        }
        Ok(())
    }
}
