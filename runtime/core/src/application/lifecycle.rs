// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Lifecycle Manager
//!
//! Application service coordinating the transition validator, the supervised
//! agent runtime, and the `AgentRepository` collaborator. Every mutating
//! operation follows the same shape: validate the transition, apply the
//! side effect, persist the new snapshot, and compensate the side effect if
//! persistence fails where compensation is still possible.
//!
//! The manager keeps a read-through/write-through cache of live records
//! behind one `RwLock`. The lock guards only cache lookups and mutations;
//! runtime spawning and repository I/O happen outside it. Per-agent
//! start/stop sequencing is serialized by each record's own handle mutex.

use crate::application::runtime::{spawn_agent_runtime, AgentHandle, TaskExecutor};
use crate::domain::agent::{Agent, AgentConfig, AgentId, AgentShared, AgentState, Task};
use crate::domain::lifecycle::{validate_transition, StateTransitionError};
use crate::domain::repository::{AgentRepository, RepositoryError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle operation errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("agent not found: {0}")]
    NotFound(AgentId),

    #[error(transparent)]
    InvalidTransition(#[from] StateTransitionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("agent runtime did not exit within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("agent {0} has no active runtime")]
    NotRunning(AgentId),

    #[error("task inbox full for agent {0}")]
    TaskQueueFull(AgentId),
}

/// Point-in-time status snapshot for one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub id: AgentId,
    pub name: String,
    pub state: AgentState,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub queued_tasks: usize,
}

/// Cached live record: immutable identity plus the shared state cell and the
/// runtime handle. The handle mutex serializes start/stop per agent.
struct ManagedAgent {
    id: AgentId,
    name: String,
    agent_type: String,
    metadata: HashMap<String, String>,
    config: AgentConfig,
    created_at: DateTime<Utc>,
    updated_at: parking_lot::RwLock<DateTime<Utc>>,
    shared: Arc<AgentShared>,
    handle: Mutex<Option<AgentHandle>>,
}

impl ManagedAgent {
    fn from_agent(agent: Agent) -> Self {
        Self {
            id: agent.id,
            name: agent.name,
            agent_type: agent.agent_type,
            metadata: agent.metadata,
            config: agent.config,
            created_at: agent.created_at,
            updated_at: parking_lot::RwLock::new(agent.updated_at),
            shared: Arc::new(AgentShared::new(agent.state, agent.last_heartbeat)),
            handle: Mutex::new(None),
        }
    }

    fn snapshot(&self) -> Agent {
        Agent {
            id: self.id,
            name: self.name.clone(),
            agent_type: self.agent_type.clone(),
            state: self.shared.state(),
            metadata: self.metadata.clone(),
            config: self.config.clone(),
            created_at: self.created_at,
            updated_at: *self.updated_at.read(),
            last_heartbeat: self.shared.last_heartbeat(),
        }
    }

    fn touch(&self) {
        *self.updated_at.write() = Utc::now();
    }
}

pub struct AgentLifecycleManager {
    repository: Arc<dyn AgentRepository>,
    executor: Arc<dyn TaskExecutor>,
    agents: RwLock<HashMap<AgentId, Arc<ManagedAgent>>>,
    shutdown_timeout: Duration,
}

impl AgentLifecycleManager {
    pub fn new(repository: Arc<dyn AgentRepository>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            repository,
            executor,
            agents: RwLock::new(HashMap::new()),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Bound on how long stop-side operations wait for runtime loops to exit.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Cache lookup with repository fallback; populates the cache on miss.
    async fn managed(&self, id: AgentId) -> Result<Arc<ManagedAgent>, LifecycleError> {
        if let Some(managed) = self.agents.read().await.get(&id) {
            return Ok(managed.clone());
        }

        let agent = self
            .repository
            .get(id)
            .await?
            .ok_or(LifecycleError::NotFound(id))?;

        let mut cache = self.agents.write().await;
        Ok(cache
            .entry(id)
            .or_insert_with(|| Arc::new(ManagedAgent::from_agent(agent)))
            .clone())
    }

    /// Build a new record in Created state, persist it, and cache it.
    pub async fn create_agent(
        &self,
        name: &str,
        agent_type: &str,
        config: AgentConfig,
    ) -> Result<Agent, LifecycleError> {
        let agent = Agent::new(name, agent_type, config);

        // Nothing else has happened yet; a failed write needs no compensation.
        self.repository.create(&agent).await?;

        let managed = Arc::new(ManagedAgent::from_agent(agent.clone()));
        self.agents.write().await.insert(agent.id, managed);

        info!(
            agent_id = %agent.id,
            name = %agent.name,
            agent_type = %agent.agent_type,
            "agent created"
        );
        Ok(agent)
    }

    /// Spawn the supervised runtime and transition to Running.
    pub async fn start_agent(&self, id: AgentId) -> Result<(), LifecycleError> {
        let managed = self.managed(id).await?;
        let mut handle_guard = managed.handle.lock().await;

        let from = managed.shared.state();
        validate_transition(from, AgentState::Running)?;

        let handle = spawn_agent_runtime(
            managed.id,
            &managed.config,
            managed.shared.clone(),
            self.executor.clone(),
        );
        managed.shared.set_state(AgentState::Running);
        managed.touch();

        if let Err(e) = self.repository.update(&managed.snapshot()).await {
            // Compensate: the runtime was already spawned, so tear it down
            // and restore the previous state before surfacing the error.
            managed.shared.set_state(from);
            if let Err(stop_err) = handle.shutdown(self.shutdown_timeout).await {
                warn!(
                    agent_id = %id,
                    error = %stop_err,
                    "runtime did not exit while rolling back start"
                );
            }
            return Err(e.into());
        }

        *handle_guard = Some(handle);
        info!(agent_id = %id, "agent started");
        Ok(())
    }

    /// Cancel the runtime, wait (bounded) for it to exit, and transition to
    /// Stopped.
    pub async fn stop_agent(&self, id: AgentId) -> Result<(), LifecycleError> {
        let managed = self.managed(id).await?;
        let mut handle_guard = managed.handle.lock().await;

        let from = managed.shared.state();
        validate_transition(from, AgentState::Stopped)?;

        if let Some(handle) = handle_guard.take() {
            if let Err(e) = handle.shutdown(self.shutdown_timeout).await {
                // The loops were aborted once the bound elapsed; the runtime
                // is gone either way, so record Stopped but surface the
                // timeout as its own error kind.
                managed.shared.set_state(AgentState::Stopped);
                managed.touch();
                if let Err(persist_err) = self.repository.update(&managed.snapshot()).await {
                    warn!(
                        agent_id = %id,
                        error = %persist_err,
                        "failed to persist stop after shutdown timeout"
                    );
                }
                return Err(LifecycleError::ShutdownTimeout(e.timeout));
            }
        }

        managed.shared.set_state(AgentState::Stopped);
        managed.touch();

        // The runtime is already irreversibly stopped; a persistence failure
        // here is logged, not propagated.
        if let Err(e) = self.repository.update(&managed.snapshot()).await {
            warn!(agent_id = %id, error = %e, "failed to persist stopped state");
        }

        info!(agent_id = %id, "agent stopped");
        Ok(())
    }

    /// State-only transition shared by pause and resume. Reverts the
    /// in-memory state if persistence fails.
    async fn state_only_transition(
        &self,
        id: AgentId,
        expected_from: AgentState,
        to: AgentState,
    ) -> Result<(), LifecycleError> {
        let managed = self.managed(id).await?;

        let from = managed.shared.state();
        // Pause/resume never touch the loops, so they only apply to an
        // active runtime in the expected state; everything else goes through
        // start/stop.
        if from != expected_from {
            return Err(StateTransitionError { from, to }.into());
        }
        validate_transition(from, to)?;

        managed.shared.set_state(to);
        managed.touch();

        if let Err(e) = self.repository.update(&managed.snapshot()).await {
            managed.shared.set_state(from);
            return Err(e.into());
        }

        info!(agent_id = %id, from = %from, to = %to, "agent state changed");
        Ok(())
    }

    /// Transition Running → Paused. The task loop keeps draining the inbox
    /// and drops tasks while paused.
    pub async fn pause_agent(&self, id: AgentId) -> Result<(), LifecycleError> {
        self.state_only_transition(id, AgentState::Running, AgentState::Paused)
            .await
    }

    /// Transition Paused → Running.
    pub async fn resume_agent(&self, id: AgentId) -> Result<(), LifecycleError> {
        self.state_only_transition(id, AgentState::Paused, AgentState::Running)
            .await
    }

    /// Stop then start. The bounded stop consumes the runtime's completion
    /// signal, so start can proceed immediately afterwards.
    pub async fn restart_agent(&self, id: AgentId) -> Result<(), LifecycleError> {
        self.stop_agent(id).await?;
        self.start_agent(id).await
    }

    /// Record that the agent's runtime has failed. Tears down any remaining
    /// loops and transitions to Failed.
    pub async fn mark_failed(&self, id: AgentId, reason: &str) -> Result<(), LifecycleError> {
        let managed = self.managed(id).await?;
        let mut handle_guard = managed.handle.lock().await;

        let from = managed.shared.state();
        validate_transition(from, AgentState::Failed)?;

        if let Some(handle) = handle_guard.take() {
            if let Err(e) = handle.shutdown(self.shutdown_timeout).await {
                warn!(
                    agent_id = %id,
                    error = %e,
                    "runtime did not exit cleanly while marking failed"
                );
            }
        }

        managed.shared.set_state(AgentState::Failed);
        managed.touch();

        if let Err(e) = self.repository.update(&managed.snapshot()).await {
            warn!(agent_id = %id, error = %e, "failed to persist failed state");
        }

        warn!(agent_id = %id, reason, "agent marked failed");
        Ok(())
    }

    /// Read path: cache first, repository on miss.
    pub async fn get_agent(&self, id: AgentId) -> Result<Agent, LifecycleError> {
        Ok(self.managed(id).await?.snapshot())
    }

    pub async fn get_agent_status(&self, id: AgentId) -> Result<AgentStatus, LifecycleError> {
        let managed = self.managed(id).await?;
        let queued_tasks = managed
            .handle
            .lock()
            .await
            .as_ref()
            .map(AgentHandle::queued_tasks)
            .unwrap_or(0);

        Ok(AgentStatus {
            id: managed.id,
            name: managed.name.clone(),
            state: managed.shared.state(),
            last_heartbeat: managed.shared.last_heartbeat(),
            queued_tasks,
        })
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>, LifecycleError> {
        Ok(self.repository.list().await?)
    }

    /// Submit a task into the agent's bounded inbox. Whether the task is
    /// executed depends on the agent's state at dequeue time.
    pub async fn submit_task(&self, id: AgentId, task: Task) -> Result<(), LifecycleError> {
        let managed = self.managed(id).await?;
        let handle_guard = managed.handle.lock().await;

        let Some(handle) = handle_guard.as_ref() else {
            return Err(LifecycleError::NotRunning(id));
        };

        handle.try_submit(task).map_err(|e| match e {
            TrySendError::Full(_) => LifecycleError::TaskQueueFull(id),
            TrySendError::Closed(_) => LifecycleError::NotRunning(id),
        })?;

        debug!(agent_id = %id, "task submitted");
        Ok(())
    }

    /// Remove a stopped agent permanently, forcing a stop first if needed.
    pub async fn delete_agent(&self, id: AgentId) -> Result<(), LifecycleError> {
        let managed = self.managed(id).await?;

        if managed.shared.state() != AgentState::Stopped {
            self.stop_agent(id).await?;
        }

        self.repository.delete(id).await?;
        self.agents.write().await.remove(&id);

        info!(agent_id = %id, "agent deleted");
        Ok(())
    }
}
