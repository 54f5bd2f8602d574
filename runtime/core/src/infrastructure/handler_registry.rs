// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Handler Registry
//!
//! Thread-safe index from event kind to the handlers able to process it,
//! plus a global handler list consulted for every kind. One registry-wide
//! read/write lock protects all operations; reads run concurrently, writes
//! serialize.
//!
//! Registration policy:
//! - scoped registration validates every requested type for duplicates
//!   before mutating anything, so a rejected call leaves the registry
//!   unchanged;
//! - global registration performs no duplicate check;
//! - a handler registered both globally and for an explicit type is returned
//!   twice by [`HandlerRegistry::handlers_for`] and therefore invoked twice
//!   per matching event. Intentional policy, pinned by tests.

use crate::domain::events::{EventHandler, EventType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("handler {name} already registered for {event_type}")]
    DuplicateHandler { name: String, event_type: EventType },

    #[error("handler {0} is not registered")]
    HandlerNotFound(String),
}

#[derive(Default)]
struct RegistryInner {
    global: Vec<Arc<dyn EventHandler>>,
    by_type: HashMap<EventType, Vec<Arc<dyn EventHandler>>>,
}

#[derive(Default)]
pub struct HandlerRegistry {
    inner: RwLock<RegistryInner>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. With an empty `types` slice the handler becomes
    /// global (subject to its own `can_handle` predicate at dispatch time);
    /// otherwise it is appended to each named type's list.
    pub fn register_handler(
        &self,
        handler: Arc<dyn EventHandler>,
        types: &[EventType],
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();

        if types.is_empty() {
            inner.global.push(handler);
            return Ok(());
        }

        // Validate before mutate: a duplicate anywhere rejects the whole
        // call with no partial registration left behind.
        for event_type in types {
            if let Some(handlers) = inner.by_type.get(event_type) {
                if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                    return Err(RegistryError::DuplicateHandler {
                        name: handler.name().to_string(),
                        event_type: *event_type,
                    });
                }
            }
        }

        for event_type in types {
            inner
                .by_type
                .entry(*event_type)
                .or_default()
                .push(handler.clone());
        }
        Ok(())
    }

    /// Remove a handler from the global list and from every per-type list.
    pub fn unregister_handler(&self, handler: &Arc<dyn EventHandler>) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let mut removed = false;

        let before = inner.global.len();
        inner.global.retain(|h| !Arc::ptr_eq(h, handler));
        removed |= inner.global.len() != before;

        for handlers in inner.by_type.values_mut() {
            let before = handlers.len();
            handlers.retain(|h| !Arc::ptr_eq(h, handler));
            removed |= handlers.len() != before;
        }
        inner.by_type.retain(|_, handlers| !handlers.is_empty());

        if removed {
            Ok(())
        } else {
            Err(RegistryError::HandlerNotFound(handler.name().to_string()))
        }
    }

    /// Handlers applicable to `event_type`: globals whose predicate accepts
    /// it, then scoped handlers whose predicate accepts it, in registration
    /// order within each group.
    pub fn handlers_for(&self, event_type: &EventType) -> Vec<Arc<dyn EventHandler>> {
        let inner = self.inner.read();

        let mut handlers: Vec<Arc<dyn EventHandler>> = inner
            .global
            .iter()
            .filter(|h| h.can_handle(event_type))
            .cloned()
            .collect();

        if let Some(scoped) = inner.by_type.get(event_type) {
            handlers.extend(scoped.iter().filter(|h| h.can_handle(event_type)).cloned());
        }

        handlers
    }

    /// Total registrations (global plus scoped entries).
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.global.len() + inner.by_type.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
