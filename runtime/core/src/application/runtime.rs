// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Supervised Agent Runtime
//!
//! The pair of loops that exist only while an agent is active:
//!
//! - **Heartbeat loop** — updates the record's liveness timestamp on a fixed
//!   interval and exits when the agent's cancellation token fires.
//! - **Task loop** — blocks on "next task or cancellation", re-checks the
//!   agent's state at dequeue time, and drops (with a warning) any task that
//!   arrives while the agent is not running. Tasks submitted during a pause
//!   are lost, not deferred.
//!
//! Both loops share one [`CancellationToken`] per agent, independent of every
//! other agent and of the event processor. The returned [`AgentHandle`] joins
//! both loops under a bound on shutdown; "did not exit in time" is an error,
//! never an indefinite wait.
//!
//! Task execution itself is a pluggable extension point ([`TaskExecutor`]).
//! A panicking executor is not caught here beyond tokio's task isolation: it
//! kills that agent's task loop only. Executors that can panic must guard
//! themselves.

use crate::domain::agent::{AgentConfig, AgentId, AgentShared, AgentState, Task};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pluggable task execution capability.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, agent_id: AgentId, task: &Task) -> anyhow::Result<()>;
}

/// Default executor: logs the task and succeeds.
pub struct LoggingTaskExecutor;

#[async_trait]
impl TaskExecutor for LoggingTaskExecutor {
    async fn execute(&self, agent_id: AgentId, task: &Task) -> anyhow::Result<()> {
        info!(
            agent_id = %agent_id,
            task_id = %task.id,
            task_type = %task.task_type,
            "executing task"
        );
        Ok(())
    }
}

/// Runtime did not exit within the shutdown bound.
#[derive(Debug, Error)]
#[error("agent runtime did not exit within {timeout:?}")]
pub struct ShutdownTimeout {
    pub timeout: Duration,
}

/// Handle to one agent's supervised loops.
///
/// Dropping the handle detaches the loops; use [`AgentHandle::shutdown`] for
/// an orderly stop.
pub struct AgentHandle {
    cancel: CancellationToken,
    task_tx: mpsc::Sender<Task>,
    heartbeat_loop: JoinHandle<()>,
    task_loop: JoinHandle<()>,
}

impl AgentHandle {
    /// Non-blocking submit into the bounded task inbox.
    pub fn try_submit(&self, task: Task) -> Result<(), TrySendError<Task>> {
        self.task_tx.try_send(task)
    }

    /// Number of tasks currently buffered in the inbox.
    pub fn queued_tasks(&self) -> usize {
        self.task_tx.max_capacity() - self.task_tx.capacity()
    }

    /// Cancel both loops and wait for them to exit, up to `wait`.
    ///
    /// On timeout the loops are aborted (forced-abandon path) and a
    /// [`ShutdownTimeout`] is returned so the caller can record the failure
    /// instead of hanging.
    pub async fn shutdown(self, wait: Duration) -> Result<(), ShutdownTimeout> {
        let AgentHandle {
            cancel,
            task_tx,
            heartbeat_loop,
            task_loop,
        } = self;

        cancel.cancel();
        drop(task_tx);

        let heartbeat_abort = heartbeat_loop.abort_handle();
        let task_abort = task_loop.abort_handle();

        let join = async move {
            let _ = heartbeat_loop.await;
            let _ = task_loop.await;
        };

        match tokio::time::timeout(wait, join).await {
            Ok(()) => Ok(()),
            Err(_) => {
                heartbeat_abort.abort();
                task_abort.abort();
                Err(ShutdownTimeout { timeout: wait })
            }
        }
    }
}

/// Spawn the heartbeat and task loops for one agent.
pub fn spawn_agent_runtime(
    agent_id: AgentId,
    config: &AgentConfig,
    shared: Arc<AgentShared>,
    executor: Arc<dyn TaskExecutor>,
) -> AgentHandle {
    let cancel = CancellationToken::new();
    let (task_tx, task_rx) = mpsc::channel(config.task_queue_size.max(1));

    let heartbeat_loop = tokio::spawn(heartbeat_loop(
        agent_id,
        config.heartbeat_interval,
        shared.clone(),
        cancel.clone(),
    ));
    let task_loop = tokio::spawn(task_loop(agent_id, task_rx, shared, executor, cancel.clone()));

    AgentHandle {
        cancel,
        task_tx,
        heartbeat_loop,
        task_loop,
    }
}

async fn heartbeat_loop(
    agent_id: AgentId,
    heartbeat_interval: Duration,
    shared: Arc<AgentShared>,
    cancel: CancellationToken,
) {
    let mut tick = interval(heartbeat_interval);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                shared.beat();
                debug!(agent_id = %agent_id, "heartbeat");
            }
            _ = cancel.cancelled() => {
                debug!(agent_id = %agent_id, "heartbeat loop stopping");
                break;
            }
        }
    }
}

async fn task_loop(
    agent_id: AgentId,
    mut task_rx: mpsc::Receiver<Task>,
    shared: Arc<AgentShared>,
    executor: Arc<dyn TaskExecutor>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(agent_id = %agent_id, "task loop stopping");
                break;
            }
            maybe_task = task_rx.recv() => {
                let Some(task) = maybe_task else {
                    debug!(agent_id = %agent_id, "task inbox closed, task loop stopping");
                    break;
                };

                // State is re-checked at dequeue time; a task that arrives
                // while the agent is paused or stopping is dropped, not
                // requeued.
                let state = shared.state();
                if state != AgentState::Running {
                    warn!(
                        agent_id = %agent_id,
                        task_id = %task.id,
                        state = %state,
                        "dropping task, agent is not running"
                    );
                    continue;
                }

                if let Err(e) = executor.execute(agent_id, &task).await {
                    warn!(
                        agent_id = %agent_id,
                        task_id = %task.id,
                        error = %e,
                        "task execution failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        executed: AtomicUsize,
    }

    impl CountingExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                executed: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.executed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskExecutor for CountingExecutor {
        async fn execute(&self, _agent_id: AgentId, _task: &Task) -> anyhow::Result<()> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn short_config() -> AgentConfig {
        AgentConfig {
            max_concurrent_tasks: 1,
            task_queue_size: 4,
            heartbeat_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_heartbeat_advances() {
        let shared = Arc::new(AgentShared::new(AgentState::Running, None));
        let handle = spawn_agent_runtime(
            AgentId::new(),
            &short_config(),
            shared.clone(),
            CountingExecutor::new(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(shared.last_heartbeat().is_some());

        handle.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_tasks_execute_while_running() {
        let shared = Arc::new(AgentShared::new(AgentState::Running, None));
        let executor = CountingExecutor::new();
        let handle = spawn_agent_runtime(
            AgentId::new(),
            &short_config(),
            shared.clone(),
            executor.clone(),
        );

        for _ in 0..3 {
            handle
                .try_submit(Task::new("noop", serde_json::json!({})))
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(executor.count(), 3);

        handle.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_tasks_dropped_while_paused() {
        let shared = Arc::new(AgentShared::new(AgentState::Running, None));
        let executor = CountingExecutor::new();
        let handle = spawn_agent_runtime(
            AgentId::new(),
            &short_config(),
            shared.clone(),
            executor.clone(),
        );

        shared.set_state(AgentState::Paused);
        handle
            .try_submit(Task::new("noop", serde_json::json!({})))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(executor.count(), 0);

        // The task was consumed and dropped, not deferred: resuming does not
        // bring it back.
        shared.set_state(AgentState::Running);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(executor.count(), 0);

        handle.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_inbox_backpressure() {
        let shared = Arc::new(AgentShared::new(AgentState::Paused, None));
        let config = AgentConfig {
            task_queue_size: 1,
            ..short_config()
        };
        // Paused agent: the loop drains and drops, so fill the queue faster
        // than the loop can drain by never yielding between submits.
        let handle = spawn_agent_runtime(
            AgentId::new(),
            &config,
            shared.clone(),
            CountingExecutor::new(),
        );

        let mut saw_full = false;
        for _ in 0..64 {
            if let Err(TrySendError::Full(_)) =
                handle.try_submit(Task::new("noop", serde_json::json!({})))
            {
                saw_full = true;
                break;
            }
        }
        assert!(saw_full, "bounded inbox never reported full");

        handle.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_stuck_executor() {
        struct StuckExecutor;

        #[async_trait]
        impl TaskExecutor for StuckExecutor {
            async fn execute(&self, _agent_id: AgentId, _task: &Task) -> anyhow::Result<()> {
                // Ignores cancellation on purpose.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let shared = Arc::new(AgentShared::new(AgentState::Running, None));
        let handle = spawn_agent_runtime(
            AgentId::new(),
            &short_config(),
            shared.clone(),
            Arc::new(StuckExecutor),
        );

        handle
            .try_submit(Task::new("stuck", serde_json::json!({})))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = handle
            .shutdown(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.timeout, Duration::from_millis(50));
    }
}
