// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event dispatch: anycast consumer groups and broadcast subscriptions.
//!
//! Each registered consumer owns a bounded queue drained by a dedicated
//! worker task that awaits its handler to completion before taking the next
//! event. That serialisation is what provides per-domain-id FIFO delivery.
//! Shutting the dispatcher down aborts the workers, cancelling in-flight
//! handlers.

use crate::envelope::EventEnvelope;
use berth_core::{Event, EventDelivery};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Dispatch errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher is shut down")]
    Closed,
}

/// Burst compression for one anycast subscription.
///
/// Events accumulate until the batch reaches `max_batch_size` or `max_wait`
/// elapses since the first buffered event, then are delivered in one call.
#[derive(Debug, Clone, Copy)]
pub struct CoalescingOptions {
    pub max_wait: Duration,
    pub max_batch_size: usize,
}

type HandlerFut = Pin<Box<dyn Future<Output = ()> + Send>>;
type BatchHandler = Arc<dyn Fn(Vec<EventEnvelope>) -> HandlerFut + Send + Sync>;

const QUEUE_DEPTH: usize = 256;

struct GroupState {
    members: Vec<mpsc::Sender<EventEnvelope>>,
    next: usize,
}

#[derive(Default)]
struct Registry {
    /// event name -> consumer group -> members
    anycast: HashMap<String, HashMap<String, GroupState>>,
    /// event name -> subscriber queues
    broadcast: HashMap<String, Vec<mpsc::Sender<EventEnvelope>>>,
}

struct Shared {
    registry: Mutex<Registry>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: Mutex<bool>,
}

/// In-process event bus connecting producers to a dispatcher.
pub struct EventBus;

impl EventBus {
    /// Create a connected producer/dispatcher pair.
    ///
    /// `source` identifies the emitting process in envelopes.
    pub fn new(source: impl Into<String>) -> (EventProducer, EventDispatcher) {
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            workers: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        });
        (
            EventProducer {
                shared: Arc::clone(&shared),
                source: source.into(),
            },
            EventDispatcher { shared },
        )
    }
}

/// Publishes events into the bus.
#[derive(Clone)]
pub struct EventProducer {
    shared: Arc<Shared>,
    source: String,
}

impl EventProducer {
    /// Publish an event using its declared delivery mode.
    pub async fn produce(&self, event: Event) -> Result<(), DispatchError> {
        match event.delivery() {
            EventDelivery::Anycast => self.anycast(event).await,
            EventDelivery::Broadcast => self.broadcast(event).await,
        }
    }

    /// Deliver to exactly one member of every consumer group of this event.
    pub async fn anycast(&self, event: Event) -> Result<(), DispatchError> {
        if *self.shared.closed.lock() {
            return Err(DispatchError::Closed);
        }
        let envelope = self.envelope(event);
        tracing::debug!(event = %envelope.name, domain_id = %envelope.domain_id, "anycast");
        let targets: Vec<mpsc::Sender<EventEnvelope>> = {
            let mut registry = self.shared.registry.lock();
            match registry.anycast.get_mut(&envelope.name) {
                Some(groups) => groups
                    .values_mut()
                    .filter_map(|group| {
                        if group.members.is_empty() {
                            return None;
                        }
                        let member = group.members[group.next % group.members.len()].clone();
                        group.next = group.next.wrapping_add(1);
                        Some(member)
                    })
                    .collect(),
                None => Vec::new(),
            }
        };
        if targets.is_empty() {
            tracing::debug!(event = %envelope.name, "no anycast consumer registered");
        }
        for target in targets {
            if target.send(envelope.clone()).await.is_err() {
                tracing::warn!(event = %envelope.name, "anycast consumer queue closed");
            }
        }
        Ok(())
    }

    /// Deliver to every subscriber of this event.
    pub async fn broadcast(&self, event: Event) -> Result<(), DispatchError> {
        if *self.shared.closed.lock() {
            return Err(DispatchError::Closed);
        }
        let envelope = self.envelope(event);
        tracing::debug!(event = %envelope.name, domain_id = %envelope.domain_id, "broadcast");
        let targets: Vec<mpsc::Sender<EventEnvelope>> = {
            let registry = self.shared.registry.lock();
            registry
                .broadcast
                .get(&envelope.name)
                .map(|subs| subs.to_vec())
                .unwrap_or_default()
        };
        for target in targets {
            if target.send(envelope.clone()).await.is_err() {
                tracing::warn!(event = %envelope.name, "broadcast subscriber queue closed");
            }
        }
        Ok(())
    }

    fn envelope(&self, event: Event) -> EventEnvelope {
        EventEnvelope::new(event, self.source.clone(), chrono::Utc::now().to_rfc3339())
    }
}

/// Registers consumers and subscribers, owning their worker tasks.
pub struct EventDispatcher {
    shared: Arc<Shared>,
}

impl EventDispatcher {
    /// Register an anycast consumer in `group` for events named `name`.
    ///
    /// Within a group each event is handed to exactly one member.
    pub fn consume<F, Fut>(&self, group: &str, name: &str, handler: F)
    where
        F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: BatchHandler = Arc::new(move |mut batch: Vec<EventEnvelope>| {
            // registered without coalescing: batches are always singletons
            match batch.pop() {
                Some(envelope) => Box::pin(handler(envelope)) as HandlerFut,
                None => Box::pin(async {}) as HandlerFut,
            }
        });
        let rx = self.register_anycast(group, name);
        self.spawn_worker(rx, handler, None);
    }

    /// Register an anycast consumer that receives coalesced batches.
    pub fn consume_coalescing<F, Fut>(
        &self,
        group: &str,
        name: &str,
        opts: CoalescingOptions,
        handler: F,
    ) where
        F: Fn(Vec<EventEnvelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: BatchHandler =
            Arc::new(move |batch| Box::pin(handler(batch)) as HandlerFut);
        let rx = self.register_anycast(group, name);
        self.spawn_worker(rx, handler, Some(opts));
    }

    /// Register a broadcast subscriber for events named `name`.
    pub fn subscribe<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: BatchHandler = Arc::new(move |mut batch: Vec<EventEnvelope>| {
            match batch.pop() {
                Some(envelope) => Box::pin(handler(envelope)) as HandlerFut,
                None => Box::pin(async {}) as HandlerFut,
            }
        });
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        self.shared
            .registry
            .lock()
            .broadcast
            .entry(name.to_string())
            .or_default()
            .push(tx);
        self.spawn_worker(rx, handler, None);
    }

    /// Cancel all in-flight handlers and stop accepting events.
    pub fn shutdown(&self) {
        *self.shared.closed.lock() = true;
        let mut workers = self.shared.workers.lock();
        for worker in workers.drain(..) {
            worker.abort();
        }
    }

    fn register_anycast(&self, group: &str, name: &str) -> mpsc::Receiver<EventEnvelope> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let mut registry = self.shared.registry.lock();
        let groups = registry.anycast.entry(name.to_string()).or_default();
        let state = groups.entry(group.to_string()).or_insert(GroupState {
            members: Vec::new(),
            next: 0,
        });
        state.members.push(tx);
        rx
    }

    fn spawn_worker(
        &self,
        mut rx: mpsc::Receiver<EventEnvelope>,
        handler: BatchHandler,
        coalescing: Option<CoalescingOptions>,
    ) {
        let worker = tokio::spawn(async move {
            match coalescing {
                None => {
                    while let Some(envelope) = rx.recv().await {
                        handler(vec![envelope]).await;
                    }
                }
                Some(opts) => loop {
                    let first = match rx.recv().await {
                        Some(envelope) => envelope,
                        None => return,
                    };
                    let mut batch = vec![first];
                    let deadline = tokio::time::Instant::now() + opts.max_wait;
                    while batch.len() < opts.max_batch_size.max(1) {
                        match tokio::time::timeout_at(deadline, rx.recv()).await {
                            Ok(Some(envelope)) => batch.push(envelope),
                            Ok(None) | Err(_) => break,
                        }
                    }
                    handler(batch).await;
                },
            }
        });
        self.shared.workers.lock().push(worker);
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
