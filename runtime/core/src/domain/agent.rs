// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Aggregate
//!
//! The `Agent` record is the persisted snapshot of one logical worker:
//! identity, declared configuration, lifecycle state, and timestamps.
//! Runtime-only concerns (cancellation, task inbox, loop handles) live in
//! `crate::application::runtime` and are never serialized.
//!
//! `State` and `LastHeartbeat` are read and written both by the agent's own
//! supervised loops and by manager-thread callers, so live agents carry an
//! [`AgentShared`] cell with its own fine-grained locks instead of relying on
//! the lifecycle manager's cache lock.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of an agent.
///
/// Legal transitions are defined by `crate::domain::lifecycle` and enforced
/// by the lifecycle manager; no other component mutates state directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Created,
    Running,
    Paused,
    Stopped,
    Failed,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Created => "created",
            AgentState::Running => "running",
            AgentState::Paused => "paused",
            AgentState::Stopped => "stopped",
            AgentState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Declared per-agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on concurrently executing tasks, enforced by executors
    /// that support it.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Capacity of the bounded task inbox.
    #[serde(default = "default_task_queue_size")]
    pub task_queue_size: usize,

    /// Interval between liveness timestamp updates while the agent is active.
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,
}

fn default_max_concurrent_tasks() -> usize {
    4
}
fn default_task_queue_size() -> usize {
    32
}
fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            task_queue_size: default_task_queue_size(),
            heartbeat_interval: default_heartbeat_interval(),
        }
    }
}

/// Persisted agent snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    /// Free-form tag identifying the agent's behavioral role.
    pub agent_type: String,
    pub state: AgentState,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub config: AgentConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last liveness update; `None` until the agent has been started.
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, agent_type: impl Into<String>, config: AgentConfig) -> Self {
        let now = Utc::now();
        Self {
            id: AgentId::new(),
            name: name.into(),
            agent_type: agent_type.into(),
            state: AgentState::Created,
            metadata: HashMap::new(),
            config,
            created_at: now,
            updated_at: now,
            last_heartbeat: None,
        }
    }

    /// Whether the agent currently owns runtime loops.
    pub fn is_active(&self) -> bool {
        matches!(self.state, AgentState::Running | AgentState::Paused)
    }
}

/// One unit of work submitted to an agent's inbox.
///
/// Tasks are consumed exactly once by the owning agent's task loop, or
/// dropped if the agent is not running at dequeue time. There is no
/// persistence and no redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    pub payload: serde_json::Value,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            payload,
        }
    }
}

/// Mutable agent fields shared between the manager and the agent's own loops.
///
/// Strictly scoped to `state` and `last_heartbeat`; everything else on the
/// record is immutable after creation or owned by the manager.
#[derive(Debug)]
pub struct AgentShared {
    state: RwLock<AgentState>,
    last_heartbeat: RwLock<Option<DateTime<Utc>>>,
}

impl AgentShared {
    pub fn new(state: AgentState, last_heartbeat: Option<DateTime<Utc>>) -> Self {
        Self {
            state: RwLock::new(state),
            last_heartbeat: RwLock::new(last_heartbeat),
        }
    }

    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    pub fn set_state(&self, state: AgentState) {
        *self.state.write() = state;
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self.last_heartbeat.read()
    }

    /// Record a liveness update. Called from the heartbeat loop.
    pub fn beat(&self) {
        *self.last_heartbeat.write() = Some(Utc::now());
    }
}
