use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use super::events::BoardEvent;
use super::models::timestamp_now;
use super::registry::ConnectionRegistry;

/// Fans events out to the connections registered for a project.
///
/// Delivery is best-effort and at-most-once: closed connections are
/// skipped and nothing here can fail the mutation that produced the event.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Serialize `event` once and queue it on every open connection of the
    /// project. Returns the number of connections it was delivered to.
    pub fn broadcast(&self, project_id: &str, event: &BoardEvent) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!(project_id, kind = event.kind(), error = %e, "Failed to serialize event");
                return 0;
            }
        };
        let delivered = self.deliver(project_id, &payload);
        debug!(project_id, kind = event.kind(), delivered, "Broadcast event");
        delivered
    }

    /// Timestamp a client message and rebroadcast it to the whole project,
    /// sender included. Anything but a JSON object is dropped.
    pub fn relay(&self, project_id: &str, raw: &str) -> usize {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(project_id, error = %e, "Dropping unparseable client message");
                return 0;
            }
        };
        let Value::Object(mut message) = value else {
            warn!(project_id, "Dropping non-object client message");
            return 0;
        };
        message.insert("timestamp".to_string(), Value::String(timestamp_now()));
        let payload = Value::Object(message).to_string();
        let delivered = self.deliver(project_id, &payload);
        debug!(project_id, delivered, "Relayed client message");
        delivered
    }

    fn deliver(&self, project_id: &str, payload: &str) -> usize {
        self.registry
            .connections(project_id)
            .iter()
            .filter(|conn| conn.is_open() && conn.send(payload.to_string()))
            .count()
    }
}
