// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Agent Repository
//!
//! Production `AgentRepository` implementation backed by the `agents` table
//! via `sqlx`. Translates between the `Agent` domain aggregate and the
//! relational schema; `metadata` and `config` are stored as `jsonb`.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE agents (
//!     id             UUID PRIMARY KEY,
//!     name           TEXT NOT NULL,
//!     agent_type     TEXT NOT NULL,
//!     state          TEXT NOT NULL,
//!     metadata       JSONB NOT NULL DEFAULT '{}',
//!     config         JSONB NOT NULL,
//!     created_at     TIMESTAMPTZ NOT NULL,
//!     updated_at     TIMESTAMPTZ NOT NULL,
//!     last_heartbeat TIMESTAMPTZ
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::collections::HashMap;

use crate::domain::agent::{Agent, AgentConfig, AgentId, AgentState};
use crate::domain::repository::{AgentRepository, RepositoryError};

pub struct PostgresAgentRepository {
    pool: PgPool,
}

impl PostgresAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn state_to_str(state: AgentState) -> &'static str {
    match state {
        AgentState::Created => "created",
        AgentState::Running => "running",
        AgentState::Paused => "paused",
        AgentState::Stopped => "stopped",
        AgentState::Failed => "failed",
    }
}

fn state_from_str(s: &str) -> Result<AgentState, RepositoryError> {
    match s {
        "created" => Ok(AgentState::Created),
        "running" => Ok(AgentState::Running),
        "paused" => Ok(AgentState::Paused),
        "stopped" => Ok(AgentState::Stopped),
        "failed" => Ok(AgentState::Failed),
        other => Err(RepositoryError::Serialization(format!(
            "unknown agent state '{other}' in agents table"
        ))),
    }
}

fn agent_from_row(row: &PgRow) -> Result<Agent, RepositoryError> {
    let id: uuid::Uuid = row.get("id");
    let name: String = row.get("name");
    let agent_type: String = row.get("agent_type");
    let state_str: String = row.get("state");
    let metadata_val: serde_json::Value = row.get("metadata");
    let config_val: serde_json::Value = row.get("config");
    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");
    let last_heartbeat: Option<DateTime<Utc>> = row.get("last_heartbeat");

    let metadata: HashMap<String, String> = serde_json::from_value(metadata_val)
        .map_err(|e| RepositoryError::Serialization(format!("bad metadata column: {e}")))?;
    let config: AgentConfig = serde_json::from_value(config_val)
        .map_err(|e| RepositoryError::Serialization(format!("bad config column: {e}")))?;

    Ok(Agent {
        id: AgentId(id),
        name,
        agent_type,
        state: state_from_str(&state_str)?,
        metadata,
        config,
        created_at,
        updated_at,
        last_heartbeat,
    })
}

const SELECT_COLUMNS: &str = "id, name, agent_type, state, metadata, config, \
                              created_at, updated_at, last_heartbeat";

#[async_trait]
impl AgentRepository for PostgresAgentRepository {
    async fn create(&self, agent: &Agent) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_value(&agent.metadata)?;
        let config = serde_json::to_value(&agent.config)?;

        sqlx::query(
            r#"
            INSERT INTO agents (
                id, name, agent_type, state, metadata, config,
                created_at, updated_at, last_heartbeat
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(agent.id.0)
        .bind(&agent.name)
        .bind(&agent.agent_type)
        .bind(state_to_str(agent.state))
        .bind(metadata)
        .bind(config)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .bind(agent.last_heartbeat)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let unique_violation = e
                .as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false);
            if unique_violation {
                RepositoryError::AlreadyExists(agent.id.to_string())
            } else {
                RepositoryError::Database(format!("failed to create agent: {e}"))
            }
        })?;

        Ok(())
    }

    async fn get(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM agents WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.as_ref().map(agent_from_row).transpose()
    }

    async fn update(&self, agent: &Agent) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_value(&agent.metadata)?;
        let config = serde_json::to_value(&agent.config)?;

        let result = sqlx::query(
            r#"
            UPDATE agents SET
                name = $2,
                agent_type = $3,
                state = $4,
                metadata = $5,
                config = $6,
                updated_at = $7,
                last_heartbeat = $8
            WHERE id = $1
            "#,
        )
        .bind(agent.id.0)
        .bind(&agent.name)
        .bind(&agent.agent_type)
        .bind(state_to_str(agent.state))
        .bind(metadata)
        .bind(config)
        .bind(agent.updated_at)
        .bind(agent.last_heartbeat)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("failed to update agent: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(agent.id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: AgentId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM agents ORDER BY name ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.iter().map(agent_from_row).collect()
    }

    async fn find_by_type(&self, agent_type: &str) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM agents WHERE agent_type = $1 ORDER BY name ASC"
        ))
        .bind(agent_type)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.iter().map(agent_from_row).collect()
    }

    async fn find_by_state(&self, state: AgentState) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM agents WHERE state = $1 ORDER BY name ASC"
        ))
        .bind(state_to_str(state))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.iter().map(agent_from_row).collect()
    }

    async fn find_healthy(
        &self,
        heartbeat_after: DateTime<Utc>,
    ) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM agents \
             WHERE last_heartbeat IS NOT NULL AND last_heartbeat >= $1 \
             ORDER BY name ASC"
        ))
        .bind(heartbeat_after)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.iter().map(agent_from_row).collect()
    }

    async fn find_by_type_and_state(
        &self,
        agent_type: &str,
        state: AgentState,
    ) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM agents \
             WHERE agent_type = $1 AND state = $2 ORDER BY name ASC"
        ))
        .bind(agent_type)
        .bind(state_to_str(state))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.iter().map(agent_from_row).collect()
    }
}
