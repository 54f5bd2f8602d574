// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contract for the `Agent` aggregate, following the DDD
//! Repository pattern: interface defined in the domain layer, implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `AgentRepository` | `Agent` | `InMemoryAgentRepository`, `PostgresAgentRepository` |
//!
//! The repository is the durable source of truth; the lifecycle manager's
//! in-memory cache is a read-through/write-through accelerator on top of it,
//! never an alternate source of truth.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::domain::agent::{Agent, AgentId, AgentState};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

/// Repository interface for Agent aggregates
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Persist a new agent; fails if the id already exists
    async fn create(&self, agent: &Agent) -> Result<(), RepositoryError>;

    /// Find agent by ID
    async fn get(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError>;

    /// Persist changes to an existing agent
    async fn update(&self, agent: &Agent) -> Result<(), RepositoryError>;

    /// Delete agent by ID
    async fn delete(&self, id: AgentId) -> Result<(), RepositoryError>;

    /// List all agents
    async fn list(&self) -> Result<Vec<Agent>, RepositoryError>;

    /// Find agents by behavioral role tag
    async fn find_by_type(&self, agent_type: &str) -> Result<Vec<Agent>, RepositoryError>;

    /// Find agents in a given lifecycle state
    async fn find_by_state(&self, state: AgentState) -> Result<Vec<Agent>, RepositoryError>;

    /// Find agents whose last heartbeat is at or after `heartbeat_after`
    async fn find_healthy(
        &self,
        heartbeat_after: DateTime<Utc>,
    ) -> Result<Vec<Agent>, RepositoryError>;

    /// Find agents matching both a role tag and a lifecycle state
    async fn find_by_type_and_state(
        &self,
        agent_type: &str,
        state: AgentState,
    ) -> Result<Vec<Agent>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
