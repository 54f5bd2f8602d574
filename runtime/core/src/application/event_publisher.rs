// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Lifecycle Event Publisher
//!
//! Thin glue between the lifecycle manager's raw occurrences and the event
//! engine: builds the matching [`Event`] for each occurrence and hands it to
//! the processor's publish contract. The manager itself never publishes —
//! embedders layer this service on top of the operations they care about.
//!
//! Admission failures (processor not running, queue full) are logged and
//! swallowed: event delivery is observability, and it never fails a
//! lifecycle operation.

use crate::domain::agent::{Agent, AgentId, Task};
use crate::domain::events::{
    AgentEventData, Event, EventData, EventPriority, EventType, TaskEventData,
};
use crate::infrastructure::event_processor::EventProcessor;
use std::sync::Arc;
use tracing::warn;

pub struct LifecycleEventPublisher {
    processor: Arc<EventProcessor>,
}

impl LifecycleEventPublisher {
    pub fn new(processor: Arc<EventProcessor>) -> Self {
        Self { processor }
    }

    fn agent_event(event_type: EventType, agent: &Agent, reason: Option<String>) -> Event {
        Event::new(
            event_type,
            EventData::Agent(AgentEventData {
                agent_id: agent.id,
                name: agent.name.clone(),
                agent_type: agent.agent_type.clone(),
                state: Some(agent.state),
                reason,
            }),
        )
        .with_agent_id(agent.id)
    }

    fn task_event(event_type: EventType, agent_id: AgentId, task: &Task, error: Option<String>) -> Event {
        Event::new(
            event_type,
            EventData::Task(TaskEventData {
                task_id: task.id,
                agent_id,
                task_type: task.task_type.clone(),
                error,
            }),
        )
        .with_agent_id(agent_id)
    }

    pub fn agent_created(&self, agent: &Agent) {
        self.publish(Self::agent_event(EventType::AgentCreated, agent, None));
    }

    pub fn agent_started(&self, agent: &Agent) {
        self.publish(Self::agent_event(EventType::AgentStarted, agent, None));
    }

    pub fn agent_stopped(&self, agent: &Agent) {
        self.publish(Self::agent_event(EventType::AgentStopped, agent, None));
    }

    pub fn agent_paused(&self, agent: &Agent) {
        self.publish(Self::agent_event(EventType::AgentPaused, agent, None));
    }

    pub fn agent_resumed(&self, agent: &Agent) {
        self.publish(Self::agent_event(EventType::AgentResumed, agent, None));
    }

    pub fn agent_deleted(&self, agent: &Agent) {
        self.publish(Self::agent_event(EventType::AgentDeleted, agent, None));
    }

    pub fn agent_failed(&self, agent: &Agent, reason: &str) {
        self.publish(
            Self::agent_event(EventType::AgentFailed, agent, Some(reason.to_string()))
                .with_priority(EventPriority::High),
        );
    }

    pub fn task_created(&self, agent_id: AgentId, task: &Task) {
        self.publish(Self::task_event(EventType::TaskCreated, agent_id, task, None));
    }

    pub fn task_completed(&self, agent_id: AgentId, task: &Task) {
        self.publish(Self::task_event(EventType::TaskCompleted, agent_id, task, None));
    }

    pub fn task_failed(&self, agent_id: AgentId, task: &Task, error: &str) {
        self.publish(
            Self::task_event(EventType::TaskFailed, agent_id, task, Some(error.to_string()))
                .with_priority(EventPriority::High),
        );
    }

    /// Publish an already-built event through the same admission path.
    pub fn publish(&self, event: Event) {
        let event_type = event.event_type;
        if let Err(e) = self.processor.publish_event(event) {
            warn!(event_type = %event_type, error = %e, "event not admitted");
        }
    }
}
