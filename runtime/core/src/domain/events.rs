// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Event Model
//!
//! Typed event envelope, priority levels, and per-family payload shapes for
//! the event engine. The kind set is closed: every [`EventType`] belongs to
//! exactly one family and every family has exactly one payload shape in
//! [`EventData`], so payload access is exhaustively checked instead of going
//! through runtime downcasts.
//!
//! Events are immutable once accepted by the processor. The envelope carries
//! no cancellation context; handlers receive the processor's shutdown token
//! alongside the event and each dispatch attempt is bounded by the
//! processor's configured timeout.

use crate::domain::agent::{AgentId, AgentState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Dispatch ordering level. Within one event, handlers run in descending
/// priority order; priority never affects queue admission.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Closed set of event kinds, grouped by family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentCreated,
    AgentStarted,
    AgentStopped,
    AgentPaused,
    AgentResumed,
    AgentFailed,
    AgentDeleted,
    TaskCreated,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    MessageReceived,
    MessageSent,
    MessageFailed,
    PoolCreated,
    PoolUpdated,
    PoolDeleted,
    ConfigChanged,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::AgentCreated => "agent_created",
            EventType::AgentStarted => "agent_started",
            EventType::AgentStopped => "agent_stopped",
            EventType::AgentPaused => "agent_paused",
            EventType::AgentResumed => "agent_resumed",
            EventType::AgentFailed => "agent_failed",
            EventType::AgentDeleted => "agent_deleted",
            EventType::TaskCreated => "task_created",
            EventType::TaskStarted => "task_started",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskFailed => "task_failed",
            EventType::MessageReceived => "message_received",
            EventType::MessageSent => "message_sent",
            EventType::MessageFailed => "message_failed",
            EventType::PoolCreated => "pool_created",
            EventType::PoolUpdated => "pool_updated",
            EventType::PoolDeleted => "pool_deleted",
            EventType::ConfigChanged => "config_changed",
        };
        f.write_str(s)
    }
}

/// Payload for the agent lifecycle family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEventData {
    pub agent_id: AgentId,
    pub name: String,
    pub agent_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<AgentState>,
    /// Failure reason, set for `AgentFailed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload for the task family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEventData {
    pub task_id: Uuid,
    pub agent_id: AgentId,
    pub task_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload for the message family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEventData {
    pub message_id: Uuid,
    pub from: AgentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<AgentId>,
    pub content: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload for the pool family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEventData {
    pub pool_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
}

/// Payload for configuration changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEventData {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<serde_json::Value>,
    pub new_value: serde_json::Value,
}

/// One payload shape per event family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum EventData {
    Agent(AgentEventData),
    Task(TaskEventData),
    Message(MessageEventData),
    Pool(PoolEventData),
    Config(ConfigEventData),
}

/// Typed, prioritized, timestamped notification of something that occurred.
///
/// A nil `id` means "assign at publish time"; [`Event::new`] leaves it nil
/// and the processor fills it in on admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub priority: EventPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    pub data: EventData,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, data: EventData) -> Self {
        Self {
            id: Uuid::nil(),
            event_type,
            priority: EventPriority::Normal,
            agent_id: None,
            data,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_agent_id(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Error returned by a handler for one dispatch attempt.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::Failed(err.to_string())
    }
}

/// A named, prioritized unit of logic that processes events.
///
/// Handlers are registered with the `HandlerRegistry`, either globally or
/// scoped to explicit event types; `can_handle` is consulted in both cases
/// at dispatch time. `shutdown` is the processor's own shutdown token —
/// long-running handlers should observe it and bail early.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, shutdown: &CancellationToken, event: &Event) -> Result<(), HandlerError>;

    fn can_handle(&self, event_type: &EventType) -> bool;

    fn priority(&self) -> EventPriority;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(EventPriority::Low < EventPriority::Normal);
        assert!(EventPriority::Normal < EventPriority::High);
        assert!(EventPriority::High < EventPriority::Critical);
    }

    #[test]
    fn test_new_event_defaults() {
        let agent_id = AgentId::new();
        let event = Event::new(
            EventType::AgentCreated,
            EventData::Agent(AgentEventData {
                agent_id,
                name: "w1".to_string(),
                agent_type: "worker".to_string(),
                state: Some(AgentState::Created),
                reason: None,
            }),
        );

        assert!(event.id.is_nil());
        assert_eq!(event.priority, EventPriority::Normal);
        assert!(event.agent_id.is_none());
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn test_builder_methods() {
        let agent_id = AgentId::new();
        let event = Event::new(
            EventType::ConfigChanged,
            EventData::Config(ConfigEventData {
                key: "worker_count".to_string(),
                old_value: Some(serde_json::json!(4)),
                new_value: serde_json::json!(8),
            }),
        )
        .with_priority(EventPriority::High)
        .with_agent_id(agent_id)
        .with_metadata("source", "api");

        assert_eq!(event.priority, EventPriority::High);
        assert_eq!(event.agent_id, Some(agent_id));
        assert_eq!(event.metadata.get("source").map(String::as_str), Some("api"));
    }

    #[test]
    fn test_payload_family_access_is_exhaustive() {
        let data = EventData::Message(MessageEventData {
            message_id: Uuid::new_v4(),
            from: AgentId::new(),
            to: None,
            content: serde_json::json!({"text": "hello"}),
            error: None,
        });

        // Matching on the sum forces every family to be considered.
        let family = match &data {
            EventData::Agent(_) => "agent",
            EventData::Task(_) => "task",
            EventData::Message(_) => "message",
            EventData::Pool(_) => "pool",
            EventData::Config(_) => "config",
        };
        assert_eq!(family, "message");
    }
}
