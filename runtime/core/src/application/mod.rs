// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod lifecycle;
pub mod runtime;
pub mod event_publisher;

// Re-export the main service types for convenience
pub use lifecycle::{AgentLifecycleManager, AgentStatus, LifecycleError};
pub use runtime::{AgentHandle, LoggingTaskExecutor, TaskExecutor};
pub use event_publisher::LifecycleEventPublisher;
