// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-bus subscriptions wiring agent events into manager state.
//!
//! One consumer group (`manager`) per event type; handlers translate events
//! into registry calls and scheduler ticks. All handlers are idempotent with
//! respect to redelivery because the underlying transitions are.

mod agent;
mod kernel;
mod schedule;
mod session;

use crate::registry::AgentRegistry;
use crate::scheduler::ScheduleCoordinator;
use berth_bus::EventDispatcher;
use berth_core::Clock;
use std::sync::Arc;

/// The consumer group shared by the manager replicas.
pub const CONSUMER_GROUP: &str = "manager";

/// Register every manager-side event handler on the dispatcher.
pub fn register_event_handlers<C: Clock>(
    dispatcher: &EventDispatcher,
    registry: Arc<AgentRegistry<C>>,
    coordinator: Arc<ScheduleCoordinator<C>>,
) {
    register_lifecycle_handlers(dispatcher, Arc::clone(&registry));
    schedule::register_ticks(dispatcher, coordinator);
}

/// Register everything except the automatic scheduling tick. Deployments
/// (and tests) driving ticks themselves use this.
pub fn register_lifecycle_handlers<C: Clock>(
    dispatcher: &EventDispatcher,
    registry: Arc<AgentRegistry<C>>,
) {
    kernel::register(dispatcher, Arc::clone(&registry));
    session::register(dispatcher, Arc::clone(&registry));
    agent::register(dispatcher, Arc::clone(&registry));
    schedule::register_session_start(dispatcher, registry);
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
