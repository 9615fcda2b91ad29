// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduling triggers.
//!
//! `schedule.do-schedule` events burst after heartbeats and terminations;
//! they are coalesced so one tick serves a batch of triggers.

use super::CONSUMER_GROUP;
use crate::registry::AgentRegistry;
use crate::scheduler::ScheduleCoordinator;
use berth_bus::{CoalescingOptions, EventDispatcher};
use berth_core::{Clock, Event};
use std::sync::Arc;
use std::time::Duration;

/// Automatic tick on `schedule.do-schedule` bursts.
pub(super) fn register_ticks<C: Clock>(
    dispatcher: &EventDispatcher,
    coordinator: Arc<ScheduleCoordinator<C>>,
) {
    {
        let coordinator = Arc::clone(&coordinator);
        dispatcher.consume_coalescing(
            CONSUMER_GROUP,
            "schedule.do-schedule",
            CoalescingOptions {
                max_wait: Duration::from_millis(50),
                max_batch_size: 32,
            },
            move |batch| {
                let coordinator = Arc::clone(&coordinator);
                async move {
                    tracing::debug!(triggers = batch.len(), "scheduling tick");
                    if let Err(err) = coordinator.schedule_tick().await {
                        tracing::error!(error = %err, "scheduling tick failed");
                    }
                }
            },
        );
    }
}

/// Kernel dispatch on `schedule.do-start-session`.
pub(super) fn register_session_start<C: Clock>(
    dispatcher: &EventDispatcher,
    registry: Arc<AgentRegistry<C>>,
) {
    dispatcher.consume(CONSUMER_GROUP, "schedule.do-start-session", move |envelope| {
        let registry = Arc::clone(&registry);
        async move {
            if let Event::DoStartSession { session_id } = envelope.payload {
                if let Err(err) = registry.start_session(&session_id).await {
                    tracing::error!(session_id = %session_id, error = %err, "session start failed");
                }
            }
        }
    });
}
