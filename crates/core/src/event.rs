//! Domain event system: decoupled observation of agent activity.
//!
//! The agent loop publishes events when a turn starts, a tool runs, or a
//! turn ends. Subscribers (the gateway's event logger, tests) react
//! without the loop knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A user turn began
    TurnStarted {
        session_id: String,
        history_len: usize,
        timestamp: DateTime<Utc>,
    },

    /// One model generation pass finished streaming
    PassCompleted {
        session_id: String,
        pass: usize,
        tool_calls: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed (or looked up and not found)
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A turn finished and was committed to the session
    TurnCompleted {
        session_id: String,
        passes: usize,
        tool_calls: usize,
        timestamp: DateTime<Utc>,
    },

    /// A turn aborted without committing
    TurnAborted {
        session_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TurnStarted { .. } => "turn_started",
            Self::PassCompleted { .. } => "pass_completed",
            Self::ToolExecuted { .. } => "tool_executed",
            Self::TurnCompleted { .. } => "turn_completed",
            Self::TurnAborted { .. } => "turn_aborted",
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
