// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Event Processor
//!
//! Worker-pool engine behind the publish contract. Accepted events land in
//! one bounded queue drained by a fixed pool of workers; each dequeued event
//! is dispatched to every applicable handler in descending priority order,
//! sequentially, inside a per-attempt timeout. A failed attempt retries the
//! whole event — not just the failed handlers — up to the configured number
//! of additional attempts, with a shutdown-cancellable delay between them.
//!
//! Publishing is non-blocking: a full queue is a synchronous backpressure
//! error to the caller, never a silent drop. Handler failures are the
//! opposite — fire-and-forget from the publisher's perspective, observable
//! only through logs and the metrics snapshot.

use crate::domain::events::{Event, EventHandler};
use crate::infrastructure::handler_registry::HandlerRegistry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("event processor is already running")]
    AlreadyRunning,

    #[error("event processor is not running")]
    NotRunning,

    #[error("event queue is full")]
    QueueFull,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventProcessorConfig {
    /// Capacity of the bounded event queue.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Number of worker consume loops.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Additional dispatch attempts after the first failed one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Wait between attempts; cancellable by processor shutdown.
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Bound on one dispatch attempt across all handlers.
    #[serde(default = "default_processing_timeout", with = "humantime_serde")]
    pub processing_timeout: Duration,
}

fn default_queue_size() -> usize {
    256
}
fn default_worker_count() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> Duration {
    Duration::from_millis(200)
}
fn default_processing_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for EventProcessorConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            worker_count: default_worker_count(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            processing_timeout: default_processing_timeout(),
        }
    }
}

/// Immutable view of the processor's running counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub events_processed: u64,
    pub events_failed: u64,
    pub retry_attempts: u64,
    pub avg_processing_latency_ms: f64,
}

#[derive(Default)]
struct ProcessorMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl ProcessorMetrics {
    fn record_published(&self) {
        self.inner.lock().events_published += 1;
    }

    fn record_processed(&self, latency: Duration) {
        let mut inner = self.inner.lock();
        inner.events_processed += 1;
        let sample_ms = latency.as_secs_f64() * 1000.0;
        let count = inner.events_processed as f64;
        inner.avg_processing_latency_ms += (sample_ms - inner.avg_processing_latency_ms) / count;
    }

    fn record_failed(&self) {
        self.inner.lock().events_failed += 1;
    }

    fn record_retry(&self) {
        self.inner.lock().retry_attempts += 1;
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().clone()
    }
}

struct ProcessorCore {
    tx: mpsc::Sender<Event>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

pub struct EventProcessor {
    registry: Arc<HandlerRegistry>,
    config: EventProcessorConfig,
    metrics: Arc<ProcessorMetrics>,
    core: Mutex<Option<ProcessorCore>>,
}

impl EventProcessor {
    pub fn new(registry: Arc<HandlerRegistry>, config: EventProcessorConfig) -> Self {
        Self {
            registry,
            config,
            metrics: Arc::new(ProcessorMetrics::default()),
            core: Mutex::new(None),
        }
    }

    /// Spawn the worker pool. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<(), ProcessorError> {
        let mut core = self.core.lock();
        if core.is_some() {
            return Err(ProcessorError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel(self.config.queue_size.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));
        let shutdown = CancellationToken::new();

        let workers = (0..self.config.worker_count.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    rx.clone(),
                    self.registry.clone(),
                    self.config.clone(),
                    self.metrics.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        *core = Some(ProcessorCore {
            tx,
            shutdown,
            workers,
        });

        info!(
            workers = self.config.worker_count,
            queue_size = self.config.queue_size,
            "event processor started"
        );
        Ok(())
    }

    /// Cancel retry waits, close the queue, and wait for the workers to
    /// drain the remaining buffered events and exit.
    pub async fn stop(&self) -> Result<(), ProcessorError> {
        let ProcessorCore {
            tx,
            shutdown,
            workers,
        } = self.core.lock().take().ok_or(ProcessorError::NotRunning)?;

        shutdown.cancel();
        drop(tx);

        futures::future::join_all(workers).await;

        info!("event processor stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.core.lock().is_some()
    }

    /// Non-blocking admission into the bounded queue.
    ///
    /// Assigns the event id if it was left unset. A full queue or a stopped
    /// processor is reported synchronously and leaves the queue unchanged.
    pub fn publish_event(&self, mut event: Event) -> Result<(), ProcessorError> {
        let core_guard = self.core.lock();
        let Some(core) = core_guard.as_ref() else {
            return Err(ProcessorError::NotRunning);
        };

        if event.id.is_nil() {
            event.id = Uuid::new_v4();
        }

        match core.tx.try_send(event) {
            Ok(()) => {
                self.metrics.record_published();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(ProcessorError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(ProcessorError::NotRunning),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<AsyncMutex<mpsc::Receiver<Event>>>,
    registry: Arc<HandlerRegistry>,
    config: EventProcessorConfig,
    metrics: Arc<ProcessorMetrics>,
    shutdown: CancellationToken,
) {
    loop {
        // One worker at a time holds the receiver; the lock is released as
        // soon as an event is handed out, so processing runs concurrently.
        let event = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };

        match event {
            Some(event) => {
                process_event(worker, event, &registry, &config, &metrics, &shutdown).await;
            }
            None => {
                debug!(worker, "event queue closed, worker exiting");
                break;
            }
        }
    }
}

async fn process_event(
    worker: usize,
    event: Event,
    registry: &HandlerRegistry,
    config: &EventProcessorConfig,
    metrics: &ProcessorMetrics,
    shutdown: &CancellationToken,
) {
    let started = Instant::now();

    let mut handlers = registry.handlers_for(&event.event_type);
    // Stable sort: ties keep registry order (globals first, then scoped).
    handlers.sort_by(|a, b| b.priority().cmp(&a.priority()));

    if handlers.is_empty() {
        debug!(worker, event_id = %event.id, event_type = %event.event_type, "no handlers for event");
        metrics.record_processed(started.elapsed());
        return;
    }

    let mut attempt: u32 = 0;
    loop {
        let failures = run_attempt(&handlers, &event, config.processing_timeout, shutdown).await;

        if failures.is_empty() {
            metrics.record_processed(started.elapsed());
            return;
        }

        if attempt >= config.max_retries {
            metrics.record_failed();
            error!(
                worker,
                event_id = %event.id,
                event_type = %event.event_type,
                attempts = attempt + 1,
                failures = ?failures,
                "event failed after exhausting retries"
            );
            return;
        }

        attempt += 1;
        metrics.record_retry();
        debug!(worker, event_id = %event.id, attempt, "retrying event dispatch");

        tokio::select! {
            _ = tokio::time::sleep(config.retry_delay) => {}
            _ = shutdown.cancelled() => {
                metrics.record_failed();
                warn!(worker, event_id = %event.id, "shutdown during retry wait, abandoning event");
                return;
            }
        }
    }
}

/// One dispatch attempt: every handler runs, errors are collected, and the
/// whole pass is bounded by `timeout`.
async fn run_attempt(
    handlers: &[Arc<dyn EventHandler>],
    event: &Event,
    timeout: Duration,
    shutdown: &CancellationToken,
) -> Vec<String> {
    let attempt = async {
        let mut failures = Vec::new();
        for handler in handlers {
            if let Err(e) = handler.handle(shutdown, event).await {
                warn!(
                    handler = handler.name(),
                    event_id = %event.id,
                    error = %e,
                    "handler failed"
                );
                failures.push(format!("{}: {}", handler.name(), e));
            }
        }
        failures
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(failures) => failures,
        Err(_) => vec![format!("dispatch attempt timed out after {timeout:?}")],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{
        AgentEventData, EventData, EventPriority, EventType, HandlerError,
    };
    use crate::domain::agent::{AgentId, AgentState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct TestHandler {
        name: String,
        priority: EventPriority,
        fail_first: AtomicU32,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl TestHandler {
        fn new(name: &str, priority: EventPriority, calls: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                priority,
                fail_first: AtomicU32::new(0),
                calls,
            })
        }

        fn failing_first(name: &str, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                priority: EventPriority::Normal,
                fail_first: AtomicU32::new(failures),
                calls: Arc::new(Mutex::new(Vec::new())),
            })
        }
    }

    #[async_trait]
    impl crate::domain::events::EventHandler for TestHandler {
        async fn handle(
            &self,
            _shutdown: &CancellationToken,
            _event: &Event,
        ) -> Result<(), HandlerError> {
            self.calls.lock().push(self.name.clone());
            let remaining = self.fail_first.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_first.store(remaining - 1, Ordering::SeqCst);
                return Err(HandlerError::Failed("transient".to_string()));
            }
            Ok(())
        }

        fn can_handle(&self, _event_type: &EventType) -> bool {
            true
        }

        fn priority(&self) -> EventPriority {
            self.priority
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn agent_event() -> Event {
        let agent_id = AgentId::new();
        Event::new(
            EventType::AgentStarted,
            EventData::Agent(AgentEventData {
                agent_id,
                name: "w1".to_string(),
                agent_type: "worker".to_string(),
                state: Some(AgentState::Running),
                reason: None,
            }),
        )
        .with_agent_id(agent_id)
    }

    fn fast_config() -> EventProcessorConfig {
        EventProcessorConfig {
            queue_size: 16,
            worker_count: 2,
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
            processing_timeout: Duration::from_secs(1),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_publish_rejected_when_not_started() {
        let processor = EventProcessor::new(Arc::new(HandlerRegistry::new()), fast_config());
        let err = processor.publish_event(agent_event()).unwrap_err();
        assert!(matches!(err, ProcessorError::NotRunning));
        assert_eq!(processor.metrics().events_published, 0);
    }

    #[tokio::test]
    async fn test_double_start_and_double_stop_rejected() {
        let processor = EventProcessor::new(Arc::new(HandlerRegistry::new()), fast_config());

        processor.start().unwrap();
        assert!(matches!(
            processor.start().unwrap_err(),
            ProcessorError::AlreadyRunning
        ));

        processor.stop().await.unwrap();
        assert!(matches!(
            processor.stop().await.unwrap_err(),
            ProcessorError::NotRunning
        ));
    }

    #[tokio::test]
    async fn test_publish_rejected_when_queue_full() {
        let config = EventProcessorConfig {
            queue_size: 1,
            worker_count: 1,
            ..fast_config()
        };
        let processor = EventProcessor::new(Arc::new(HandlerRegistry::new()), config);
        processor.start().unwrap();

        // Current-thread test runtime: workers have not been polled yet, so
        // the first event stays buffered and the second hits the bound.
        processor.publish_event(agent_event()).unwrap();
        let err = processor.publish_event(agent_event()).unwrap_err();
        assert!(matches!(err, ProcessorError::QueueFull));
        assert_eq!(processor.metrics().events_published, 1);

        processor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_handlers_invoked_in_priority_order() {
        let registry = Arc::new(HandlerRegistry::new());
        let calls = Arc::new(Mutex::new(Vec::new()));

        // Registered low-to-high on purpose; dispatch must re-order.
        for (name, priority) in [
            ("low", EventPriority::Low),
            ("normal", EventPriority::Normal),
            ("critical", EventPriority::Critical),
        ] {
            registry
                .register_handler(
                    TestHandler::new(name, priority, calls.clone()),
                    &[EventType::AgentStarted],
                )
                .unwrap();
        }

        let config = EventProcessorConfig {
            worker_count: 1,
            ..fast_config()
        };
        let processor = EventProcessor::new(registry, config);
        processor.start().unwrap();
        processor.publish_event(agent_event()).unwrap();

        wait_until(|| calls.lock().len() == 3).await;
        assert_eq!(*calls.lock(), vec!["critical", "normal", "low"]);

        processor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_then_success_accounting() {
        let registry = Arc::new(HandlerRegistry::new());
        let handler = TestHandler::failing_first("flaky", 2);
        registry
            .register_handler(handler, &[EventType::AgentStarted])
            .unwrap();

        let processor = EventProcessor::new(registry, fast_config());
        processor.start().unwrap();
        processor.publish_event(agent_event()).unwrap();

        let metrics = || processor.metrics();
        wait_until(|| metrics().events_processed == 1).await;

        let snapshot = metrics();
        assert_eq!(snapshot.events_processed, 1);
        assert_eq!(snapshot.retry_attempts, 2);
        assert_eq!(snapshot.events_failed, 0);
        assert!(snapshot.avg_processing_latency_ms > 0.0);

        processor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_retries_count_as_failed() {
        let registry = Arc::new(HandlerRegistry::new());
        let handler = TestHandler::failing_first("broken", u32::MAX);
        registry
            .register_handler(handler, &[EventType::AgentStarted])
            .unwrap();

        let config = EventProcessorConfig {
            max_retries: 1,
            ..fast_config()
        };
        let processor = EventProcessor::new(registry, config);
        processor.start().unwrap();
        processor.publish_event(agent_event()).unwrap();

        wait_until(|| processor.metrics().events_failed == 1).await;

        let snapshot = processor.metrics();
        assert_eq!(snapshot.events_failed, 1);
        assert_eq!(snapshot.retry_attempts, 1);
        assert_eq!(snapshot.events_processed, 0);

        processor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_drains_buffered_events() {
        let processor = EventProcessor::new(Arc::new(HandlerRegistry::new()), fast_config());
        processor.start().unwrap();

        for _ in 0..3 {
            processor.publish_event(agent_event()).unwrap();
        }
        processor.stop().await.unwrap();

        // Workers drain the queue before exiting their consume loop.
        assert_eq!(processor.metrics().events_processed, 3);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let processor = EventProcessor::new(Arc::new(HandlerRegistry::new()), fast_config());
        processor.start().unwrap();
        processor.stop().await.unwrap();

        processor.start().unwrap();
        processor.publish_event(agent_event()).unwrap();
        processor.stop().await.unwrap();
        assert_eq!(processor.metrics().events_published, 1);
    }
}
