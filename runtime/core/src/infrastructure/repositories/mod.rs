//! Agent repository implementations.
//!
//! `InMemoryAgentRepository` backs development and tests;
//! `PostgresAgentRepository` is the production backend selected via
//! `StorageBackend` at startup.

pub mod postgres;

pub use postgres::PostgresAgentRepository;

use crate::domain::agent::{Agent, AgentId, AgentState};
use crate::domain::repository::{AgentRepository, RepositoryError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct InMemoryAgentRepository {
    agents: Arc<Mutex<HashMap<AgentId, Agent>>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn create(&self, agent: &Agent) -> Result<(), RepositoryError> {
        let mut agents = self.agents.lock();
        if agents.contains_key(&agent.id) {
            return Err(RepositoryError::AlreadyExists(agent.id.to_string()));
        }
        agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.agents.lock().get(&id).cloned())
    }

    async fn update(&self, agent: &Agent) -> Result<(), RepositoryError> {
        let mut agents = self.agents.lock();
        if !agents.contains_key(&agent.id) {
            return Err(RepositoryError::NotFound(agent.id.to_string()));
        }
        agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn delete(&self, id: AgentId) -> Result<(), RepositoryError> {
        if self.agents.lock().remove(&id).is_some() {
            Ok(())
        } else {
            Err(RepositoryError::NotFound(id.to_string()))
        }
    }

    async fn list(&self) -> Result<Vec<Agent>, RepositoryError> {
        let mut agents: Vec<Agent> = self.agents.lock().values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    async fn find_by_type(&self, agent_type: &str) -> Result<Vec<Agent>, RepositoryError> {
        Ok(self
            .agents
            .lock()
            .values()
            .filter(|a| a.agent_type == agent_type)
            .cloned()
            .collect())
    }

    async fn find_by_state(&self, state: AgentState) -> Result<Vec<Agent>, RepositoryError> {
        Ok(self
            .agents
            .lock()
            .values()
            .filter(|a| a.state == state)
            .cloned()
            .collect())
    }

    async fn find_healthy(
        &self,
        heartbeat_after: DateTime<Utc>,
    ) -> Result<Vec<Agent>, RepositoryError> {
        Ok(self
            .agents
            .lock()
            .values()
            .filter(|a| a.last_heartbeat.is_some_and(|hb| hb >= heartbeat_after))
            .cloned()
            .collect())
    }

    async fn find_by_type_and_state(
        &self,
        agent_type: &str,
        state: AgentState,
    ) -> Result<Vec<Agent>, RepositoryError> {
        Ok(self
            .agents
            .lock()
            .values()
            .filter(|a| a.agent_type == agent_type && a.state == state)
            .cloned()
            .collect())
    }
}
