// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_processor;
pub mod handler_registry;
pub mod repositories;

pub use event_processor::{EventProcessor, EventProcessorConfig, MetricsSnapshot, ProcessorError};
pub use handler_registry::{HandlerRegistry, RegistryError};
