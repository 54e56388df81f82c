//! Per-user real-time event channels.
//!
//! Sessions subscribe through the SSE endpoint; producers push without knowing
//! whether anyone is listening.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Best-effort delivery to a user's connected sessions
pub trait RealtimePush: Send + Sync {
    fn push(&self, user_id: i64, event: &str, payload: Value);
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    pub event: String,
    pub payload: Value,
}

#[derive(Debug)]
pub struct RealtimeHub {
    channels: DashMap<i64, broadcast::Sender<RealtimeEvent>>,
    capacity: usize,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl RealtimeHub {
    /// `capacity` events are buffered per user before slow sessions lag
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    pub fn subscribe(&self, user_id: i64) -> broadcast::Receiver<RealtimeEvent> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn connected_users(&self) -> usize {
        self.channels.len()
    }
}

impl RealtimePush for RealtimeHub {
    fn push(&self, user_id: i64, event: &str, payload: Value) {
        let delivered = match self.channels.get(&user_id) {
            Some(tx) => tx
                .send(RealtimeEvent {
                    event: event.to_string(),
                    payload,
                })
                .is_ok(),
            None => {
                debug!(user_id, event, "no realtime session, event dropped");
                return;
            }
        };
        if !delivered {
            // every session of this user went away
            self.channels
                .remove_if(&user_id, |_, tx| tx.receiver_count() == 0);
            debug!(user_id, event, "realtime sessions closed, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn events_reach_only_the_target_user() {
        let hub = RealtimeHub::new(8);
        let mut alice = hub.subscribe(1);
        let mut bob = hub.subscribe(2);

        hub.push(1, "enrollment:new", json!({ "courseId": 7 }));

        let event = alice.recv().await.unwrap();
        assert_eq!(event.event, "enrollment:new");
        assert_eq!(event.payload["courseId"], 7);
        assert!(bob.try_recv().is_err());
    }

    #[test]
    fn pushing_without_sessions_is_harmless() {
        let hub = RealtimeHub::default();
        hub.push(42, "notification:new", json!({}));
        assert_eq!(hub.connected_users(), 0);
    }

    #[test]
    fn closed_sessions_are_forgotten() {
        let hub = RealtimeHub::default();
        drop(hub.subscribe(3));
        assert_eq!(hub.connected_users(), 1);
        hub.push(3, "enrollment:new", json!({}));
        assert_eq!(hub.connected_users(), 0);
    }
}
