//! Control and status messaging for UI integration
//!
//! A broadcast bus of [`AgentMessage`]s. The engine publishes task
//! assignment/completion and cancellation notices; any number of subscribers
//! may listen. Publishing with nobody listening is not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Default number of messages a slow subscriber may lag behind
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Kind of control/status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "task.assign")]
    TaskAssign,
    #[serde(rename = "task.complete")]
    TaskComplete,
    #[serde(rename = "task.fail")]
    TaskFail,
    #[serde(rename = "status.update")]
    StatusUpdate,
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "cancel")]
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub from: String,
    pub to: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AgentMessage {
    pub fn new(
        message_type: MessageType,
        from: impl Into<String>,
        to: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_type,
            from: from.into(),
            to: to.into(),
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Publish/subscribe hub for [`AgentMessage`]s
#[derive(Debug, Clone)]
pub struct MessageBus {
    sender: broadcast::Sender<AgentMessage>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentMessage> {
        self.sender.subscribe()
    }

    /// Deliver to all current subscribers; returns how many received it
    pub fn publish(&self, message: AgentMessage) -> usize {
        match self.sender.send(message) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!("No message bus subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
