pub mod connection;
pub mod fanout;
pub mod frames;
pub mod hub;
pub mod presence;
pub mod rate_limit;
pub mod router;
pub mod transport;

pub use fanout::{FanoutBridge, PublishPath, PublishScope};
pub use hub::{conversation_topic, user_topic, TopicHub, FEED_TOPIC};
pub use presence::PresenceTracker;
