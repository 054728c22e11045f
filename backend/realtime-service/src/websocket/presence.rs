use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Best-effort online/offline tracking for a user's devices.
///
/// Entries expire after the liveness TTL; every lookup purges stale entries
/// first, so staleness self-heals without a background sweeper. State is
/// process-local and lost on restart, which is the intended durability.
#[derive(Clone)]
pub struct PresenceTracker {
    ttl: Duration,
    inner: Arc<RwLock<HashMap<Uuid, HashMap<String, Instant>>>>,
}

impl PresenceTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register or refresh a device heartbeat.
    pub async fn connect(&self, user_id: Uuid, device_id: &str) {
        let mut guard = self.inner.write().await;
        guard
            .entry(user_id)
            .or_default()
            .insert(device_id.to_string(), Instant::now());
    }

    pub async fn disconnect(&self, user_id: Uuid, device_id: &str) {
        let mut guard = self.inner.write().await;
        if let Some(devices) = guard.get_mut(&user_id) {
            devices.remove(device_id);
            if devices.is_empty() {
                guard.remove(&user_id);
            }
        }
    }

    /// True iff at least one non-expired device remains.
    pub async fn is_online(&self, user_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        let Some(devices) = guard.get_mut(&user_id) else {
            return false;
        };
        let ttl = self.ttl;
        devices.retain(|_, seen| seen.elapsed() < ttl);
        if devices.is_empty() {
            guard.remove(&user_id);
            return false;
        }
        true
    }

    pub async fn is_device_online(&self, user_id: Uuid, device_id: &str) -> bool {
        let mut guard = self.inner.write().await;
        let Some(devices) = guard.get_mut(&user_id) else {
            return false;
        };
        match devices.get(device_id) {
            Some(seen) if seen.elapsed() < self.ttl => true,
            Some(_) => {
                devices.remove(device_id);
                if devices.is_empty() {
                    guard.remove(&user_id);
                }
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_makes_user_online() {
        let presence = PresenceTracker::new(Duration::from_secs(90));
        let user = Uuid::new_v4();

        assert!(!presence.is_online(user).await);
        presence.connect(user, "device-a").await;
        assert!(presence.is_online(user).await);
        assert!(presence.is_device_online(user, "device-a").await);
        assert!(!presence.is_device_online(user, "device-b").await);
    }

    #[tokio::test]
    async fn disconnect_of_last_device_goes_offline() {
        let presence = PresenceTracker::new(Duration::from_secs(90));
        let user = Uuid::new_v4();

        presence.connect(user, "device-a").await;
        presence.connect(user, "device-b").await;
        presence.disconnect(user, "device-a").await;
        assert!(presence.is_online(user).await);
        presence.disconnect(user, "device-b").await;
        assert!(!presence.is_online(user).await);
    }

    #[tokio::test]
    async fn stale_entries_expire_without_explicit_disconnect() {
        let presence = PresenceTracker::new(Duration::from_millis(30));
        let user = Uuid::new_v4();

        presence.connect(user, "device-a").await;
        assert!(presence.is_online(user).await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!presence.is_online(user).await);
        assert!(!presence.is_device_online(user, "device-a").await);
    }

    #[tokio::test]
    async fn heartbeat_extends_liveness() {
        let presence = PresenceTracker::new(Duration::from_millis(80));
        let user = Uuid::new_v4();

        presence.connect(user, "device-a").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        presence.connect(user, "device-a").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(presence.is_online(user).await);
    }
}
