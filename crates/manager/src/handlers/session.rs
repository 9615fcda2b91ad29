// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-level commands

use super::CONSUMER_GROUP;
use crate::registry::AgentRegistry;
use berth_bus::EventDispatcher;
use berth_core::{Clock, Event};
use std::sync::Arc;

pub(super) fn register<C: Clock>(dispatcher: &EventDispatcher, registry: Arc<AgentRegistry<C>>) {
    dispatcher.consume(CONSUMER_GROUP, "session.do-terminate", move |envelope| {
        let registry = Arc::clone(&registry);
        async move {
            if let Event::DoTerminateSession { session_id, reason } = envelope.payload {
                if let Err(err) = registry.destroy_session(&session_id, reason, false).await {
                    tracing::error!(session_id = %session_id, error = %err, "session termination failed");
                }
            }
        }
    });
}
