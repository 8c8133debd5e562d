//! Subscribe hub
//!
//! Controllers publish every status change of an execution here; subscribe
//! streams replay the current record and then forward changes in the exact
//! order they were applied to the store, closing once a terminal phase goes
//! by. A separate broadcast carries newly-created AgentExecution ids to the
//! agent runner.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use stigmer_core::ExecutionPhase;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct SubscribeHub {
    channels: Arc<DashMap<String, broadcast::Sender<Value>>>,
    agent_created: broadcast::Sender<String>,
}

impl Default for SubscribeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscribeHub {
    pub fn new() -> Self {
        let (agent_created, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            channels: Arc::new(DashMap::new()),
            agent_created,
        }
    }

    fn sender(&self, id: &str) -> broadcast::Sender<Value> {
        self.channels
            .entry(id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish a status snapshot. Terminal snapshots also retire the channel
    /// so late subscribers replay from the store instead.
    pub fn publish(&self, id: &str, snapshot: Value) {
        let terminal = snapshot_phase(&snapshot).map(|p| p.is_terminal()).unwrap_or(false);
        // A send error only means nobody is subscribed right now.
        let _ = self.sender(id).send(snapshot);
        if terminal {
            self.channels.remove(id);
        }
    }

    pub fn subscribe(&self, id: &str) -> broadcast::Receiver<Value> {
        self.sender(id).subscribe()
    }

    pub fn publish_agent_created(&self, id: &str) {
        let _ = self.agent_created.send(id.to_string());
    }

    /// Stream of newly created AgentExecution ids (the agent runner's feed)
    pub fn agent_created(&self) -> broadcast::Receiver<String> {
        self.agent_created.subscribe()
    }
}

/// Extract `status.phase` from a resource snapshot
pub fn snapshot_phase(snapshot: &Value) -> Option<ExecutionPhase> {
    serde_json::from_value(snapshot.get("status")?.get("phase")?.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribers_see_updates_in_publish_order() {
        let hub = SubscribeHub::new();
        let mut rx = hub.subscribe("wfe-1");

        hub.publish("wfe-1", json!({"status": {"phase": "PENDING"}}));
        hub.publish("wfe-1", json!({"status": {"phase": "IN_PROGRESS"}}));

        assert_eq!(
            snapshot_phase(&rx.try_recv().unwrap()),
            Some(ExecutionPhase::Pending)
        );
        assert_eq!(
            snapshot_phase(&rx.try_recv().unwrap()),
            Some(ExecutionPhase::InProgress)
        );
    }

    #[test]
    fn terminal_snapshot_retires_the_channel() {
        let hub = SubscribeHub::new();
        let _rx = hub.subscribe("wfe-1");
        hub.publish("wfe-1", json!({"status": {"phase": "COMPLETED"}}));
        assert!(hub.channels.get("wfe-1").is_none());
    }

    #[test]
    fn agent_created_feed_delivers_ids() {
        let hub = SubscribeHub::new();
        let mut rx = hub.agent_created();
        hub.publish_agent_created("age-9");
        assert_eq!(rx.try_recv().unwrap(), "age-9");
    }
}
